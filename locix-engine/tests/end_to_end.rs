use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::LocalBoxFuture;
use futures::FutureExt;

use locix_core::{PyramidMeta, TileId, TileSource, TrackPosition, TrackRef};
use locix_engine::{
    EntryState, FetchError, GestureDelta, GestureError, GesturePhase, SyncCoordinator, TileData,
    TileFetcher, TilePayload,
};

struct InstantFetcher;

impl TileFetcher for InstantFetcher {
    fn fetch_tiles(
        &self,
        _source: &TileSource,
        tile_ids: Vec<TileId>,
    ) -> LocalBoxFuture<'static, Result<HashMap<TileId, TilePayload>, FetchError>> {
        let tiles = tile_ids
            .into_iter()
            .map(|id| (id, Arc::new(TileData::new_1d(vec![1.0, 2.0]))))
            .collect();
        futures::future::ready(Ok(tiles)).boxed_local()
    }
}

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

impl ManualFetcher {
    fn resolve_all(pending: &Rc<RefCell<Vec<(Vec<TileId>, oneshot::Sender<Result<HashMap<TileId, TilePayload>, FetchError>>)>>>) {
        for (ids, sender) in pending.borrow_mut().drain(..) {
            let tiles = ids
                .into_iter()
                .map(|id| (id, Arc::new(TileData::new_1d(vec![1.0]))))
                .collect();
            let _ = sender.send(Ok(tiles));
        }
    }
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

fn track(uid: &str, tileset_uid: &str) -> TrackRef {
    TrackRef {
        uid: uid.to_string(),
        server: "http://localhost:8989/api/v1".to_string(),
        tileset_uid: tileset_uid.to_string(),
        datatype: "vector".to_string(),
        position: TrackPosition::Top,
        options: serde_json::Value::Null,
        max_zoom: None,
    }
}

#[test]
fn zoom_to_converges_on_the_requested_domain() {
    let _ = env_logger::builder().is_test(true).try_init();
    let engine = SyncCoordinator::new(Arc::new(InstantFetcher));
    engine
        .add_view(
            "a",
            800.0,
            600.0,
            [1_480_820_463.0, 2_550_144_059.0],
            [1_480_820_463.0, 2_550_144_059.0],
            vec![],
        )
        .unwrap();

    engine
        .zoom_to("a", [6.069, 6.083], [-23.28, -23.27], 100.0)
        .unwrap();
    assert!(engine.has_active_transitions());

    // Drive the animation from a simulated frame loop.
    for _ in 0..10 {
        engine.tick(16.0);
    }
    assert!(!engine.has_active_transitions());
    engine.drive();

    let transform = engine.transform("a").unwrap();
    let [x_min, x_max] = transform.x_domain();
    assert!((x_min - 6.069).abs() < 1e-6);
    assert!((x_max - 6.083).abs() < 1e-6);
    // The y domain crossed into virtual (negative) coordinates.
    let [y_min, _] = transform.y_domain();
    assert!(y_min < 0.0);
    assert!((y_min - -23.28).abs() < 1e-6);

    assert_eq!(engine.phase("a"), GesturePhase::Settled);
}

#[test]
fn transform_notifications_precede_tile_notifications() {
    let engine = SyncCoordinator::new(Arc::new(InstantFetcher));
    engine
        .add_view("a", 100.0, 100.0, [0.0, 100.0], [0.0, 100.0], vec![track("t", "ts")])
        .unwrap();
    engine.set_tileset_info("a", "t", PyramidMeta::pow2(4, 256, 1000.0, 1));

    let log = Rc::new(RefCell::new(Vec::new()));
    let transforms = log.clone();
    engine.on_transform_changed(move |uid, _| {
        transforms.borrow_mut().push(format!("transform:{uid}"));
    });
    let tiles = log.clone();
    engine.on_tiles_loaded(move |uid| tiles.borrow_mut().push(format!("tiles:{uid}")));

    engine
        .apply_gesture("a", GestureDelta::Pan { dx: 10.0, dy: 0.0 })
        .unwrap();
    // The transform notification fired synchronously inside the gesture.
    assert_eq!(log.borrow().as_slice(), ["transform:a"]);

    engine.drive();
    assert_eq!(log.borrow().as_slice(), ["transform:a", "tiles:a"]);
}

#[test]
fn rapid_gestures_coalesce_into_one_settlement() {
    let pending = Rc::new(RefCell::new(Vec::new()));
    let engine = SyncCoordinator::new(Arc::new(ManualFetcher {
        pending: pending.clone(),
    }));
    engine
        .add_view("a", 100.0, 100.0, [0.0, 100.0], [0.0, 100.0], vec![track("t", "ts")])
        .unwrap();
    engine.set_tileset_info("a", "t", PyramidMeta::pow2(4, 256, 1000.0, 1));

    let loaded = Rc::new(RefCell::new(0u32));
    let count = loaded.clone();
    engine.on_tiles_loaded(move |_| *count.borrow_mut() += 1);

    engine
        .apply_gesture("a", GestureDelta::Pan { dx: 10.0, dy: 0.0 })
        .unwrap();
    assert_eq!(engine.phase("a"), GesturePhase::Refetching);

    // A second wheel event lands while the first fetch is in flight.
    engine
        .apply_gesture("a", GestureDelta::Pan { dx: 10.0, dy: 0.0 })
        .unwrap();

    ManualFetcher::resolve_all(&pending);
    engine.drive();

    // Only the latest gesture settles; the superseded one was dropped.
    assert_eq!(*loaded.borrow(), 1);
    assert_eq!(engine.phase("a"), GesturePhase::Settled);
}

#[test]
fn invalid_gestures_leave_state_untouched() {
    let engine = SyncCoordinator::new(Arc::new(InstantFetcher));
    engine
        .add_view("a", 100.0, 100.0, [0.0, 100.0], [0.0, 100.0], vec![])
        .unwrap();
    let before = engine.transform("a").unwrap();

    let err = engine
        .apply_gesture(
            "a",
            GestureDelta::Pan {
                dx: f64::NAN,
                dy: 0.0,
            },
        )
        .unwrap_err();
    assert!(matches!(err, GestureError::NonFinitePan { .. }));

    let err = engine
        .apply_gesture(
            "a",
            GestureDelta::Zoom {
                pivot: (0.0, 0.0),
                factor: -2.0,
            },
        )
        .unwrap_err();
    assert!(matches!(err, GestureError::BadZoomFactor(_)));

    let err = engine
        .apply_gesture(
            "a",
            GestureDelta::SetDomain {
                x_domain: [50.0, 50.0],
                y_domain: None,
            },
        )
        .unwrap_err();
    assert!(matches!(err, GestureError::Transform(_)));

    let err = engine
        .apply_gesture("missing", GestureDelta::Pan { dx: 1.0, dy: 0.0 })
        .unwrap_err();
    assert!(matches!(err, GestureError::UnknownView(_)));

    assert_eq!(engine.transform("a").unwrap(), before);
    assert_eq!(engine.phase("a"), GesturePhase::Idle);
}

#[test]
fn tile_failures_do_not_abort_the_gesture() {
    // Serves the first tile of each batch and omits the rest.
    struct Partial;
    impl TileFetcher for Partial {
        fn fetch_tiles(
            &self,
            _source: &TileSource,
            tile_ids: Vec<TileId>,
        ) -> LocalBoxFuture<'static, Result<HashMap<TileId, TilePayload>, FetchError>> {
            let tiles = tile_ids
                .iter()
                .take(1)
                .map(|id| (id.clone(), Arc::new(TileData::new_1d(vec![1.0]))))
                .collect();
            futures::future::ready(Ok(tiles)).boxed_local()
        }
    }

    let engine = SyncCoordinator::new(Arc::new(Partial));
    engine
        .add_view("a", 1000.0, 100.0, [0.0, 1000.0], [0.0, 100.0], vec![track("t", "ts")])
        .unwrap();
    engine.set_tileset_info("a", "t", PyramidMeta::pow2(4, 256, 1000.0, 1));

    let loaded = Rc::new(RefCell::new(0u32));
    let count = loaded.clone();
    engine.on_tiles_loaded(move |_| *count.borrow_mut() += 1);

    engine
        .apply_gesture("a", GestureDelta::Pan { dx: 5.0, dy: 0.0 })
        .unwrap();
    engine.drive();

    // The view settled even though some tiles failed.
    assert_eq!(*loaded.borrow(), 1);
    assert_eq!(engine.phase("a"), GesturePhase::Settled);

    // The 1000 bp window at this pyramid resolves to tiles 0 and 1 of
    // level 1; the fetcher served the first and dropped the second.
    let source = TileSource {
        server: "http://localhost:8989/api/v1".to_string(),
        tileset_uid: "ts".to_string(),
    };
    let cache = engine.cache();
    assert_eq!(
        cache.state(&TileId::new_1d(source.clone(), 1, 0)),
        Some(EntryState::Ready)
    );
    assert_eq!(
        cache.state(&TileId::new_1d(source, 1, 1)),
        Some(EntryState::Failed)
    );
}

#[test]
fn resizing_keeps_domains_and_refetches() {
    let engine = SyncCoordinator::new(Arc::new(InstantFetcher));
    engine
        .add_view("a", 100.0, 100.0, [0.0, 1000.0], [0.0, 100.0], vec![track("t", "ts")])
        .unwrap();
    engine.set_tileset_info("a", "t", PyramidMeta::pow2(4, 256, 1000.0, 1));

    let loaded = Rc::new(RefCell::new(0u32));
    let count = loaded.clone();
    engine.on_tiles_loaded(move |_| *count.borrow_mut() += 1);

    engine.resize_view("a", 1000.0, 100.0).unwrap();
    engine.drive();

    let transform = engine.transform("a").unwrap();
    assert_eq!(transform.width(), 1000.0);
    let [x_min, x_max] = transform.x_domain();
    assert!((x_min - 0.0).abs() < 1e-9 && (x_max - 1000.0).abs() < 1e-9);
    assert_eq!(*loaded.borrow(), 1);
}

#[test]
fn unlinked_views_do_not_follow_gestures() {
    let engine = SyncCoordinator::new(Arc::new(InstantFetcher));
    engine
        .add_view("a", 100.0, 100.0, [0.0, 100.0], [0.0, 100.0], vec![])
        .unwrap();
    engine
        .add_view("b", 100.0, 100.0, [0.0, 100.0], [0.0, 100.0], vec![])
        .unwrap();

    engine
        .apply_gesture("a", GestureDelta::Pan { dx: 25.0, dy: 0.0 })
        .unwrap();

    assert_eq!(engine.transform("b").unwrap().x_domain(), [0.0, 100.0]);
}
