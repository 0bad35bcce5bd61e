use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use futures::channel::oneshot;
use futures::executor::block_on;
use futures::future::LocalBoxFuture;
use futures::FutureExt;

use locix_core::{TileId, TileSource};
use locix_engine::{EntryState, FetchError, TileData, TileFetchCache, TileFetcher, TilePayload};

fn source() -> TileSource {
    TileSource {
        server: "http://localhost:8989/api/v1".to_string(),
        tileset_uid: "dedup".to_string(),
    }
}

fn tile(x: u64) -> TileId {
    TileId::new_1d(source(), 2, x)
}

fn payload_for(id: &TileId) -> TilePayload {
    Arc::new(TileData::new_1d(vec![id.pos.x() as f32, 1.0]))
}

/// Resolves every request immediately and records each batch it saw.
struct InstantFetcher {
    batches: Rc<RefCell<Vec<Vec<TileId>>>>,
}

impl TileFetcher for InstantFetcher {
    fn fetch_tiles(
        &self,
        _source: &TileSource,
        tile_ids: Vec<TileId>,
    ) -> LocalBoxFuture<'static, Result<HashMap<TileId, TilePayload>, FetchError>> {
        self.batches.borrow_mut().push(tile_ids.clone());
        let tiles = tile_ids
            .iter()
            .map(|id| (id.clone(), payload_for(id)))
            .collect();
        futures::future::ready(Ok(tiles)).boxed_local()
    }
}

/// Holds every request open until the test resolves it by hand.
struct ManualFetcher {
    #[allow(clippy::type_complexity)]
    pending: Rc<
        RefCell<
            Vec<(
                Vec<TileId>,
                oneshot::Sender<Result<HashMap<TileId, TilePayload>, FetchError>>,
            )>,
        >,
    >,
}

impl TileFetcher for ManualFetcher {
    fn fetch_tiles(
        &self,
        _source: &TileSource,
        tile_ids: Vec<TileId>,
    ) -> LocalBoxFuture<'static, Result<HashMap<TileId, TilePayload>, FetchError>> {
        let (sender, receiver) = oneshot::channel();
        self.pending.borrow_mut().push((tile_ids, sender));
        receiver
            .map(|result| result.unwrap_or(Err(FetchError::Network("fetcher dropped".to_string()))))
            .boxed_local()
    }
}

#[test]
fn concurrent_requests_share_one_network_call() {
    let pending = Rc::new(RefCell::new(Vec::new()));
    let cache = TileFetchCache::new(Arc::new(ManualFetcher {
        pending: pending.clone(),
    }));

    let ids = vec![tile(0), tile(1)];
    let first = cache.fetch(&ids);
    let second = cache.fetch(&ids);
    let third = cache.fetch(&[tile(1)]);

    // Three overlapping requests, one batch in flight.
    assert_eq!(pending.borrow().len(), 1);
    assert_eq!(cache.state(&tile(0)), Some(EntryState::Pending));

    let (batch_ids, sender) = pending.borrow_mut().pop().unwrap();
    let response: HashMap<TileId, TilePayload> = batch_ids
        .iter()
        .map(|id| (id.clone(), payload_for(id)))
        .collect();
    sender.send(Ok(response)).unwrap();

    let a = block_on(first[1].1.clone()).unwrap();
    let b = block_on(second[1].1.clone()).unwrap();
    let c = block_on(third[0].1.clone()).unwrap();
    // Every subscriber sees the same payload instance.
    assert!(Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&a, &c));
    assert_eq!(cache.state(&tile(1)), Some(EntryState::Ready));
}

#[test]
fn ready_tiles_are_served_without_refetching() {
    let batches = Rc::new(RefCell::new(Vec::new()));
    let cache = TileFetchCache::new(Arc::new(InstantFetcher {
        batches: batches.clone(),
    }));

    let first = cache.fetch(&[tile(3)]);
    block_on(first[0].1.clone()).unwrap();
    assert_eq!(batches.borrow().len(), 1);

    let second = cache.fetch(&[tile(3)]);
    block_on(second[0].1.clone()).unwrap();
    assert_eq!(batches.borrow().len(), 1);

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[test]
fn duplicate_ids_within_one_request_collapse() {
    let batches = Rc::new(RefCell::new(Vec::new()));
    let cache = TileFetchCache::new(Arc::new(InstantFetcher {
        batches: batches.clone(),
    }));

    let results = cache.fetch(&[tile(5), tile(5), tile(5)]);
    assert_eq!(results.len(), 3);
    assert_eq!(batches.borrow().len(), 1);
    assert_eq!(batches.borrow()[0].len(), 1);
}

#[test]
fn failures_are_not_cached_permanently() {
    struct FailOnce {
        failed: Rc<RefCell<bool>>,
        calls: Rc<RefCell<u32>>,
    }
    impl TileFetcher for FailOnce {
        fn fetch_tiles(
            &self,
            _source: &TileSource,
            tile_ids: Vec<TileId>,
        ) -> LocalBoxFuture<'static, Result<HashMap<TileId, TilePayload>, FetchError>> {
            *self.calls.borrow_mut() += 1;
            if !*self.failed.borrow() {
                *self.failed.borrow_mut() = true;
                return futures::future::ready(Err(FetchError::Network("503".to_string())))
                    .boxed_local();
            }
            let tiles = tile_ids
                .iter()
                .map(|id| (id.clone(), payload_for(id)))
                .collect();
            futures::future::ready(Ok(tiles)).boxed_local()
        }
    }

    let calls = Rc::new(RefCell::new(0));
    let cache = TileFetchCache::new(Arc::new(FailOnce {
        failed: Rc::new(RefCell::new(false)),
        calls: calls.clone(),
    }));

    let first = cache.fetch(&[tile(7)]);
    assert!(block_on(first[0].1.clone()).is_err());
    assert_eq!(cache.state(&tile(7)), Some(EntryState::Failed));

    // Re-requesting a failed tile issues a fresh network call.
    let second = cache.fetch(&[tile(7)]);
    assert!(block_on(second[0].1.clone()).is_ok());
    assert_eq!(cache.state(&tile(7)), Some(EntryState::Ready));
    assert_eq!(*calls.borrow(), 2);
}

#[test]
fn tiles_absent_from_a_response_fail_individually() {
    struct Partial;
    impl TileFetcher for Partial {
        fn fetch_tiles(
            &self,
            _source: &TileSource,
            tile_ids: Vec<TileId>,
        ) -> LocalBoxFuture<'static, Result<HashMap<TileId, TilePayload>, FetchError>> {
            // Only the first requested tile comes back.
            let tiles = tile_ids
                .iter()
                .take(1)
                .map(|id| (id.clone(), payload_for(id)))
                .collect();
            futures::future::ready(Ok(tiles)).boxed_local()
        }
    }

    let cache = TileFetchCache::new(Arc::new(Partial));
    let results = cache.fetch(&[tile(0), tile(1)]);
    assert!(block_on(results[0].1.clone()).is_ok());
    assert_eq!(
        block_on(results[1].1.clone()),
        Err(FetchError::MissingTile)
    );
}

#[test]
fn idle_entries_are_evicted_after_release() {
    let batches = Rc::new(RefCell::new(Vec::new()));
    let cache = TileFetchCache::new(Arc::new(InstantFetcher { batches }));

    let results = cache.fetch(&[tile(9)]);
    block_on(results[0].1.clone()).unwrap();

    // Still subscribed: survives the sweep.
    cache.evict_idle(Duration::ZERO);
    assert_eq!(cache.state(&tile(9)), Some(EntryState::Ready));

    cache.release(&[tile(9)]);
    cache.evict_idle(Duration::ZERO);
    assert_eq!(cache.state(&tile(9)), None);
}

#[test]
fn clear_empties_the_cache() {
    let batches = Rc::new(RefCell::new(Vec::new()));
    let cache = TileFetchCache::new(Arc::new(InstantFetcher { batches }));

    let results = cache.fetch(&[tile(0), tile(1)]);
    block_on(results[0].1.clone()).unwrap();
    cache.clear();
    assert_eq!(cache.stats().entries, 0);
    assert_eq!(cache.state(&tile(0)), None);
}
