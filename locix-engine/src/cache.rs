//! Deduplicating tile fetch cache.
//!
//! The cache is the one resource shared across every view and track. It
//! is the single writer of entry state transitions, and it guarantees
//! that no matter how many subscribers ask for a tile, the underlying
//! fetcher sees it at most once while the request is in flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::future::Shared;
use futures::FutureExt;
use locix_core::{TileId, TileSource};

use crate::fetcher::{FetchError, TileFetcher, TilePayload};

/// A cloneable handle on one tile's (possibly still in-flight) payload.
pub type TileFuture =
    Shared<futures::future::LocalBoxFuture<'static, Result<TilePayload, FetchError>>>;

/// Lifecycle of a cache entry. `Pending` transitions to exactly one of
/// `Ready` or `Failed` when the underlying request resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Pending,
    Ready,
    Failed,
}

fn state_of(future: &TileFuture) -> EntryState {
    match future.peek() {
        None => EntryState::Pending,
        Some(Ok(_)) => EntryState::Ready,
        Some(Err(_)) => EntryState::Failed,
    }
}

struct CacheEntry {
    future: TileFuture,
    subscriber_count: u64,
    last_access: Instant,
}

/// Cache traffic counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

pub struct TileFetchCache {
    fetcher: Arc<dyn TileFetcher>,
    entries: DashMap<TileId, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TileFetchCache {
    pub fn new(fetcher: Arc<dyn TileFetcher>) -> Self {
        Self {
            fetcher,
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Request a batch of tiles.
    ///
    /// Tiles already `Ready` or `Pending` reuse the existing entry; the
    /// rest are grouped per source into single fetcher calls. `Failed`
    /// entries are re-requested with a fresh entry. The returned futures
    /// are in input order (duplicates collapse onto the same entry).
    pub fn fetch(&self, tile_ids: &[TileId]) -> Vec<(TileId, TileFuture)> {
        let now = Instant::now();
        let mut resolved: HashMap<TileId, TileFuture> = HashMap::new();
        let mut missing: HashMap<TileSource, Vec<TileId>> = HashMap::new();

        for id in tile_ids {
            if resolved.contains_key(id) || missing.values().any(|ids| ids.contains(id)) {
                continue;
            }
            let reused = self.entries.get_mut(id).and_then(|mut entry| {
                if state_of(&entry.future) == EntryState::Failed {
                    // Failure is not cached permanently.
                    None
                } else {
                    entry.subscriber_count += 1;
                    entry.last_access = now;
                    Some(entry.future.clone())
                }
            });
            match reused {
                Some(future) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    resolved.insert(id.clone(), future);
                }
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    missing
                        .entry(id.source.clone())
                        .or_default()
                        .push(id.clone());
                }
            }
        }

        for (source, ids) in missing {
            log::debug!(
                "requesting {} tiles for {} from {}",
                ids.len(),
                source.tileset_uid,
                source.server
            );
            let batch = self.fetcher.fetch_tiles(&source, ids.clone()).shared();
            for id in ids {
                let batch = batch.clone();
                let key = id.clone();
                let future: TileFuture = async move {
                    match batch.await {
                        Ok(mut tiles) => tiles.remove(&key).ok_or(FetchError::MissingTile),
                        Err(err) => Err(err),
                    }
                }
                .boxed_local()
                .shared();
                self.entries.insert(
                    id.clone(),
                    CacheEntry {
                        future: future.clone(),
                        subscriber_count: 1,
                        last_access: now,
                    },
                );
                resolved.insert(id, future);
            }
        }

        tile_ids
            .iter()
            .map(|id| (id.clone(), resolved[id].clone()))
            .collect()
    }

    /// Drop one unit of subscriber interest per tile, e.g. when a view's
    /// visible set moves on. Entries are not evicted here; `evict_idle`
    /// reaps them once idle.
    pub fn release(&self, tile_ids: &[TileId]) {
        let now = Instant::now();
        for id in tile_ids {
            if let Some(mut entry) = self.entries.get_mut(id) {
                entry.subscriber_count = entry.subscriber_count.saturating_sub(1);
                entry.last_access = now;
            }
        }
    }

    /// Current lifecycle state of a tile, if the cache knows it.
    pub fn state(&self, tile_id: &TileId) -> Option<EntryState> {
        self.entries.get(tile_id).map(|entry| state_of(&entry.future))
    }

    /// The payload of a `Ready` tile, if present.
    pub fn payload(&self, tile_id: &TileId) -> Option<TilePayload> {
        self.entries.get(tile_id).and_then(|entry| {
            entry
                .future
                .peek()
                .and_then(|result| result.as_ref().ok().cloned())
        })
    }

    /// Remove completed entries that have had no subscribers for at
    /// least `max_age`. In-flight entries are never evicted.
    pub fn evict_idle(&self, max_age: Duration) {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            entry.subscriber_count > 0
                || state_of(&entry.future) == EntryState::Pending
                || now.duration_since(entry.last_access) < max_age
        });
        let evicted = before - self.entries.len();
        if evicted > 0 {
            log::debug!("evicted {evicted} idle tiles");
        }
    }

    /// Drop everything, including interest in in-flight requests.
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}
