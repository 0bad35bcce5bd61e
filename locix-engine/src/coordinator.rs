//! The top-level orchestrator.
//!
//! A gesture moves through `Applying` (mutate the origin view's
//! transform), `Propagating` (breadth-first walk over the lock graph),
//! `Refetching` (derive and request each affected view's tile set) and
//! finally `Settled` (all of the view's tile futures resolved). Transform
//! mutation and lock propagation are synchronous and atomic per gesture;
//! only tile fetches suspend.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::executor::{LocalPool, LocalSpawner};
use futures::future::join_all;
use futures::task::LocalSpawnExt;
use parking_lot::{Mutex, RwLock};

use locix_core::{
    pyramid, validate_domain, AxisDomain, PyramidMeta, PyramidPolicy, TileId, TrackPosition,
    TrackRef, TrackUid, TransformError, ViewUid, ViewportTransform,
};
use thiserror::Error;

use crate::cache::{CacheStats, TileFetchCache, TileFuture};
use crate::events::{EventChannels, SubscriptionId};
use crate::fetcher::{FetchError, TileFetcher, TilePayload};
use crate::lock::{
    track_member_uid, LockError, LockKind, LockRegistry, LockState, LockUid, MemberUid,
    PropagationContext,
};
use crate::registry::{Registry, RegistryError, View};
use crate::transition::Transition;

/// A single user- or API-initiated transform mutation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureDelta {
    Pan {
        dx: f64,
        dy: f64,
    },
    Zoom {
        pivot: (f64, f64),
        factor: f64,
    },
    SetDomain {
        x_domain: AxisDomain,
        y_domain: Option<AxisDomain>,
    },
}

/// Per-view progress of the most recent gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GesturePhase {
    #[default]
    Idle,
    Applying,
    Propagating,
    Refetching,
    Settled,
}

#[derive(Debug, Error)]
pub enum GestureError {
    #[error("unknown view {0}")]
    UnknownView(ViewUid),

    #[error("non-finite pan delta ({dx}, {dy})")]
    NonFinitePan { dx: f64, dy: f64 },

    #[error("non-finite zoom pivot ({x}, {y})")]
    NonFinitePivot { x: f64, y: f64 },

    #[error("invalid zoom factor {0}: must be finite and positive")]
    BadZoomFactor(f64),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Lock(#[from] LockError),
}

fn scales_state(registry: &Registry, member: &str) -> Option<LockState> {
    registry.view(member).map(|view| {
        let (center_x, center_y, k) = view.transform.center_and_scale();
        LockState::Scales {
            center_x,
            center_y,
            k,
        }
    })
}

pub struct SyncCoordinator {
    registry: RwLock<Registry>,
    locks: Arc<RwLock<LockRegistry>>,
    cache: Arc<TileFetchCache>,
    channels: Arc<EventChannels>,
    policy: PyramidPolicy,
    /// Per-view gesture generation; settlements for older generations
    /// are dropped rather than awaited.
    generations: Arc<Mutex<HashMap<ViewUid, u64>>>,
    phases: Arc<Mutex<HashMap<ViewUid, GesturePhase>>>,
    value_scales: Arc<Mutex<HashMap<MemberUid, (f64, f64)>>>,
    visible_tiles: Mutex<HashMap<ViewUid, Vec<TileId>>>,
    transitions: Mutex<Vec<Transition>>,
    next_lock_seq: AtomicU64,
    pool: RefCell<LocalPool>,
    spawner: LocalSpawner,
}

impl SyncCoordinator {
    pub fn new(fetcher: Arc<dyn TileFetcher>) -> Self {
        Self::with_policy(fetcher, PyramidPolicy::default())
    }

    pub fn with_policy(fetcher: Arc<dyn TileFetcher>, policy: PyramidPolicy) -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Self {
            registry: RwLock::new(Registry::new()),
            locks: Arc::new(RwLock::new(LockRegistry::new())),
            cache: Arc::new(TileFetchCache::new(fetcher)),
            channels: Arc::new(EventChannels::new()),
            policy,
            generations: Arc::new(Mutex::new(HashMap::new())),
            phases: Arc::new(Mutex::new(HashMap::new())),
            value_scales: Arc::new(Mutex::new(HashMap::new())),
            visible_tiles: Mutex::new(HashMap::new()),
            transitions: Mutex::new(Vec::new()),
            next_lock_seq: AtomicU64::new(1),
            pool: RefCell::new(pool),
            spawner,
        }
    }

    // ---- view management -------------------------------------------------

    pub fn add_view(
        &self,
        view_uid: &str,
        pixel_width: f64,
        pixel_height: f64,
        x_domain: AxisDomain,
        y_domain: AxisDomain,
        tracks: Vec<TrackRef>,
    ) -> Result<(), GestureError> {
        let transform = ViewportTransform::new(pixel_width, pixel_height, x_domain, y_domain)?;
        self.registry.write().add_view(View {
            uid: view_uid.to_string(),
            transform,
            tracks,
        })?;
        Ok(())
    }

    pub fn remove_view(&self, view_uid: &str) {
        let removed = self.registry.write().remove_view(view_uid);
        if let Some(view) = removed {
            let mut locks = self.locks.write();
            locks.remove_member(view_uid);
            for track in &view.tracks {
                locks.remove_member(&track_member_uid(view_uid, &track.uid));
            }
        }
        self.generations.lock().remove(view_uid);
        self.phases.lock().remove(view_uid);
        self.transitions.lock().retain(|t| t.view_uid != view_uid);
        if let Some(tiles) = self.visible_tiles.lock().remove(view_uid) {
            self.cache.release(&tiles);
        }
    }

    /// Change a view's pixel extent, keeping its visible domains. The
    /// tile set can change with the new footprint, so a refetch runs;
    /// locked views are untouched because no domain moved.
    pub fn resize_view(
        &self,
        view_uid: &str,
        pixel_width: f64,
        pixel_height: f64,
    ) -> Result<(), GestureError> {
        let transform = {
            let mut registry = self.registry.write();
            let view = registry
                .view_mut(view_uid)
                .ok_or_else(|| GestureError::UnknownView(view_uid.to_string()))?;
            view.transform.resize(pixel_width, pixel_height)?;
            view.transform.clone()
        };
        self.channels.emit_transform_changed(view_uid, &transform);
        self.set_phase(view_uid, GesturePhase::Refetching);
        self.refetch(&[view_uid.to_string()]);
        Ok(())
    }

    pub fn view_uids(&self) -> Vec<ViewUid> {
        self.registry
            .read()
            .views()
            .map(|view| view.uid.clone())
            .collect()
    }

    /// Record pyramid metadata for a track once the data layer reports it.
    pub fn set_tileset_info(&self, view_uid: &str, track_uid: &str, meta: PyramidMeta) {
        self.registry
            .write()
            .set_tileset_info(view_uid, track_uid, meta);
    }

    pub fn transform(&self, view_uid: &str) -> Option<ViewportTransform> {
        self.registry
            .read()
            .view(view_uid)
            .map(|view| view.transform.clone())
    }

    pub fn set_scale_bounds(
        &self,
        view_uid: &str,
        min_scale: f64,
        max_scale: f64,
    ) -> Result<(), GestureError> {
        let mut registry = self.registry.write();
        let view = registry
            .view_mut(view_uid)
            .ok_or_else(|| GestureError::UnknownView(view_uid.to_string()))?;
        view.transform.set_scale_bounds(min_scale, max_scale);
        Ok(())
    }

    /// The value domain last computed (or propagated) for a track.
    pub fn value_scale(&self, view_uid: &str, track_uid: &str) -> Option<(f64, f64)> {
        self.value_scales
            .lock()
            .get(&track_member_uid(view_uid, track_uid))
            .copied()
    }

    pub fn phase(&self, view_uid: &str) -> GesturePhase {
        self.phases
            .lock()
            .get(view_uid)
            .copied()
            .unwrap_or_default()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn cache(&self) -> &TileFetchCache {
        &self.cache
    }

    // ---- notifications ---------------------------------------------------

    pub fn on_transform_changed(
        &self,
        callback: impl Fn(&str, &ViewportTransform) + 'static,
    ) -> SubscriptionId {
        self.channels.on_transform_changed(callback)
    }

    pub fn off_transform_changed(&self, id: SubscriptionId) -> bool {
        self.channels.off_transform_changed(id)
    }

    pub fn on_tiles_loaded(&self, callback: impl Fn(&str) + 'static) -> SubscriptionId {
        self.channels.on_tiles_loaded(callback)
    }

    pub fn off_tiles_loaded(&self, id: SubscriptionId) -> bool {
        self.channels.off_tiles_loaded(id)
    }

    pub fn on_lock_changed(&self, callback: impl Fn(&str) + 'static) -> SubscriptionId {
        self.channels.on_lock_changed(callback)
    }

    pub fn off_lock_changed(&self, id: SubscriptionId) -> bool {
        self.channels.off_lock_changed(id)
    }

    // ---- locks -----------------------------------------------------------

    /// Link views (or `"view.track"` members for `ValueScale` locks),
    /// snapshotting their current states as the group baseline.
    pub fn create_lock(
        &self,
        kind: LockKind,
        member_uids: &[String],
    ) -> Result<LockUid, GestureError> {
        let mut members = Vec::with_capacity(member_uids.len());
        for member in member_uids {
            let state = if kind.is_geometric() {
                scales_state(&self.registry.read(), member)
                    .ok_or_else(|| GestureError::UnknownView(member.clone()))?
            } else {
                self.value_scales
                    .lock()
                    .get(member)
                    .map(|(min, max)| LockState::ValueRange {
                        min: *min,
                        max: *max,
                    })
                    .unwrap_or(LockState::ValueRange { min: 0.0, max: 1.0 })
            };
            members.push((member.clone(), state));
        }

        let uid = format!("lock-{}", self.next_lock_seq.fetch_add(1, Ordering::Relaxed));
        let uid = self.locks.write().create_lock(uid, kind, members)?;
        self.channels.emit_lock_changed(&uid);
        Ok(uid)
    }

    pub fn remove_lock(&self, lock_uid: &str) -> Result<(), GestureError> {
        self.locks.write().remove_lock(lock_uid)?;
        self.channels.emit_lock_changed(lock_uid);
        Ok(())
    }

    // ---- gestures --------------------------------------------------------

    /// Apply one gesture to a view: mutate its transform, propagate to
    /// locked views, notify, and kick off tile refetches.
    ///
    /// Input validation failures leave every view untouched. A gesture
    /// that changes nothing (zero pan, bounds-rejected zoom) propagates
    /// nothing and fetches nothing.
    pub fn apply_gesture(&self, view_uid: &str, delta: GestureDelta) -> Result<(), GestureError> {
        match delta {
            GestureDelta::Pan { dx, dy } if !dx.is_finite() || !dy.is_finite() => {
                return Err(GestureError::NonFinitePan { dx, dy });
            }
            GestureDelta::Zoom { factor, .. } if !factor.is_finite() || factor <= 0.0 => {
                return Err(GestureError::BadZoomFactor(factor));
            }
            GestureDelta::Zoom {
                pivot: (x, y), ..
            } if !x.is_finite() || !y.is_finite() => {
                return Err(GestureError::NonFinitePivot { x, y });
            }
            _ => {}
        }

        let prior_phase = self.phase(view_uid);
        let changed = {
            let mut registry = self.registry.write();
            let view = registry
                .view_mut(view_uid)
                .ok_or_else(|| GestureError::UnknownView(view_uid.to_string()))?;
            self.set_phase(view_uid, GesturePhase::Applying);

            let before = view.transform.clone();
            let applied = match delta {
                GestureDelta::Pan { dx, dy } => {
                    view.transform.pan(dx, dy);
                    Ok(())
                }
                GestureDelta::Zoom { pivot, factor } => {
                    view.transform.zoom(pivot, factor);
                    Ok(())
                }
                GestureDelta::SetDomain { x_domain, y_domain } => {
                    view.transform.set_domain(x_domain, y_domain)
                }
            };
            if let Err(err) = applied {
                self.set_phase(view_uid, prior_phase);
                return Err(err.into());
            }
            if view.transform == before {
                self.set_phase(view_uid, prior_phase);
                return Ok(());
            }

            self.set_phase(view_uid, GesturePhase::Propagating);
            self.propagate(&mut registry, view_uid)
        };

        // One synchronous notification batch for every affected view,
        // before any fetch can resolve.
        let snapshots: Vec<(ViewUid, ViewportTransform)> = {
            let registry = self.registry.read();
            changed
                .iter()
                .filter_map(|uid| {
                    registry
                        .view(uid)
                        .map(|view| (uid.clone(), view.transform.clone()))
                })
                .collect()
        };
        for (uid, transform) in &snapshots {
            self.channels.emit_transform_changed(uid, transform);
        }

        for uid in &changed {
            self.set_phase(uid, GesturePhase::Refetching);
        }
        self.refetch(&changed);
        Ok(())
    }

    /// Breadth-first propagation over every lock group touching the
    /// origin. Members are applied at most once per gesture; the context
    /// is discarded afterwards.
    fn propagate(&self, registry: &mut Registry, origin: &str) -> Vec<ViewUid> {
        let locks = self.locks.read();
        let mut ctx = PropagationContext::new();
        ctx.visit(origin);

        let mut order: Vec<ViewUid> = vec![origin.to_string()];
        let mut queue: VecDeque<ViewUid> = VecDeque::new();
        queue.push_back(origin.to_string());

        while let Some(member) = queue.pop_front() {
            // Read back the member's current state: lock application may
            // have clamped what propagation asked for.
            let Some(new_state) = scales_state(registry, &member) else {
                continue;
            };
            for group in locks
                .groups_containing(&member)
                .filter(|group| group.kind.is_geometric())
            {
                let applied = {
                    let lookup = |m: &str| scales_state(&*registry, m);
                    group.on_member_changed(&member, new_state, &lookup, &mut ctx)
                };
                for (other, state) in applied {
                    let LockState::Scales {
                        center_x,
                        center_y,
                        k,
                    } = state
                    else {
                        continue;
                    };
                    if let Some(view) = registry.view_mut(&other) {
                        view.transform.set_center(center_x, center_y, k);
                        order.push(other.clone());
                        queue.push_back(other);
                    }
                }
            }
        }

        if ctx.cycle_guard_hits() > 0 {
            log::debug!(
                "propagation from {origin}: cycle guard fired {} time(s)",
                ctx.cycle_guard_hits()
            );
        }
        order
    }

    /// Derive and request the tile set for each affected view, then
    /// schedule its settlement.
    fn refetch(&self, view_uids: &[ViewUid]) {
        for view_uid in view_uids {
            let generation = {
                let mut generations = self.generations.lock();
                let counter = generations.entry(view_uid.clone()).or_insert(0);
                *counter += 1;
                *counter
            };

            let mut track_futures: Vec<(TrackUid, Vec<TileFuture>)> = Vec::new();
            let mut new_visible: Vec<TileId> = Vec::new();
            {
                let registry = self.registry.read();
                let Some(view) = registry.view(view_uid) else {
                    continue;
                };
                let x_domain = view.transform.x_domain();
                let y_domain = view.transform.y_domain();
                let pixel_dims = (view.transform.width(), view.transform.height());

                for track in &view.tracks {
                    let Some(meta) = registry.tileset_info(view_uid, &track.uid) else {
                        log::debug!("track {} has no tileset info yet", track.uid);
                        continue;
                    };
                    let tiles =
                        match derive_track_tiles(track, meta, x_domain, y_domain, pixel_dims, &self.policy) {
                            Ok(tiles) => tiles,
                            Err(err) => {
                                log::warn!("track {} in view {view_uid}: {err}", track.uid);
                                continue;
                            }
                        };
                    let futures = self
                        .cache
                        .fetch(&tiles)
                        .into_iter()
                        .map(|(_, future)| future)
                        .collect();
                    new_visible.extend(tiles);
                    track_futures.push((track.uid.clone(), futures));
                }
            }

            // Interest in tiles that fell out of the visible set moves to
            // the cache's idle-eviction policy.
            let previous = self
                .visible_tiles
                .lock()
                .insert(view_uid.clone(), new_visible.clone());
            if let Some(previous) = previous {
                let stale: Vec<TileId> = previous
                    .into_iter()
                    .filter(|tile| !new_visible.contains(tile))
                    .collect();
                if !stale.is_empty() {
                    self.cache.release(&stale);
                }
            }

            self.spawn_settlement(view_uid.clone(), generation, track_futures);
        }
    }

    fn spawn_settlement(
        &self,
        view_uid: ViewUid,
        generation: u64,
        track_futures: Vec<(TrackUid, Vec<TileFuture>)>,
    ) {
        let generations = self.generations.clone();
        let phases = self.phases.clone();
        let channels = self.channels.clone();
        let value_scales = self.value_scales.clone();
        let locks = self.locks.clone();

        let task = async move {
            let mut track_results: Vec<(TrackUid, Vec<Result<TilePayload, FetchError>>)> =
                Vec::with_capacity(track_futures.len());
            for (track_uid, futures) in track_futures {
                let results = join_all(futures).await;
                track_results.push((track_uid, results));
            }

            // A newer gesture for this view supersedes this settlement.
            // The fetches above still populated the cache for reuse.
            if generations.lock().get(&view_uid).copied() != Some(generation) {
                log::debug!("settlement for {view_uid} (gen {generation}) superseded");
                return;
            }

            for (track_uid, results) in &track_results {
                let mut min = f64::INFINITY;
                let mut max = f64::NEG_INFINITY;
                let mut failed = 0usize;
                for result in results {
                    match result {
                        Ok(payload) => {
                            if let Some((lo, hi)) = payload.extrema() {
                                min = min.min(lo);
                                max = max.max(hi);
                            }
                        }
                        Err(err) => {
                            failed += 1;
                            log::debug!("tile for {view_uid}/{track_uid} failed: {err}");
                        }
                    }
                }
                if failed > 0 {
                    log::warn!("{failed} tile(s) failed for {view_uid}/{track_uid}");
                }
                if min <= max {
                    let member = track_member_uid(&view_uid, track_uid);
                    apply_value_scale(&locks, &value_scales, &member, min, max);
                }
            }

            phases.lock().insert(view_uid.clone(), GesturePhase::Settled);
            channels.emit_tiles_loaded(&view_uid);
        };

        if let Err(err) = self.spawner.spawn_local(task) {
            log::warn!("failed to spawn settlement for a gesture: {err}");
        }
    }

    fn set_phase(&self, view_uid: &str, phase: GesturePhase) {
        self.phases.lock().insert(view_uid.to_string(), phase);
    }

    // ---- transitions -----------------------------------------------------

    /// Animate a view to the given domains over `duration_ms`. A zero or
    /// negative duration applies immediately. Replaces any transition
    /// already running for the view.
    pub fn zoom_to(
        &self,
        view_uid: &str,
        x_domain: AxisDomain,
        y_domain: AxisDomain,
        duration_ms: f64,
    ) -> Result<(), GestureError> {
        validate_domain(x_domain)?;
        validate_domain(y_domain)?;
        if duration_ms <= 0.0 {
            return self.apply_gesture(
                view_uid,
                GestureDelta::SetDomain {
                    x_domain,
                    y_domain: Some(y_domain),
                },
            );
        }

        let (from_x, from_y) = {
            let registry = self.registry.read();
            let view = registry
                .view(view_uid)
                .ok_or_else(|| GestureError::UnknownView(view_uid.to_string()))?;
            (view.transform.x_domain(), view.transform.y_domain())
        };
        let mut transitions = self.transitions.lock();
        transitions.retain(|t| t.view_uid != view_uid);
        transitions.push(Transition::new(
            view_uid.to_string(),
            from_x,
            from_y,
            x_domain,
            y_domain,
            duration_ms,
        ));
        Ok(())
    }

    /// Advance active transitions by `dt_ms`, issuing one `SetDomain`
    /// gesture per view per tick. Called from the embedder's frame loop.
    pub fn tick(&self, dt_ms: f64) {
        let mut due: Vec<(ViewUid, AxisDomain, AxisDomain)> = Vec::new();
        {
            let mut transitions = self.transitions.lock();
            transitions.retain_mut(|transition| {
                let (x_domain, y_domain, done) = transition.advance(dt_ms);
                due.push((transition.view_uid.clone(), x_domain, y_domain));
                !done
            });
        }
        for (view_uid, x_domain, y_domain) in due {
            if let Err(err) = self.apply_gesture(
                &view_uid,
                GestureDelta::SetDomain {
                    x_domain,
                    y_domain: Some(y_domain),
                },
            ) {
                log::warn!("transition step for {view_uid} failed: {err}");
            }
        }
    }

    pub fn has_active_transitions(&self) -> bool {
        !self.transitions.lock().is_empty()
    }

    // ---- event loop ------------------------------------------------------

    /// Run queued settlement work until it stalls on pending fetches.
    /// The embedder calls this from its event loop after gestures and
    /// after fetcher completions. Must not be called re-entrantly from a
    /// notification callback.
    pub fn drive(&self) {
        self.pool.borrow_mut().run_until_stalled();
    }
}

/// Pick the axis domains a track samples from (vertical tracks read the
/// y axis) and enumerate its tiles, honoring any track-level zoom cap.
fn derive_track_tiles(
    track: &TrackRef,
    meta: &PyramidMeta,
    x_domain: AxisDomain,
    y_domain: AxisDomain,
    pixel_dims: (f64, f64),
    policy: &PyramidPolicy,
) -> Result<Vec<TileId>, pyramid::PyramidError> {
    let (primary, secondary) = match (meta.dims(), track.position) {
        (2, _) => (x_domain, Some(y_domain)),
        (_, TrackPosition::Left | TrackPosition::Right) => (y_domain, None),
        _ => (x_domain, None),
    };
    let mut level = pyramid::zoom_level(primary, secondary, pixel_dims, meta, policy)?;
    if let Some(cap) = track.max_zoom {
        level = level.min(cap.min(meta.max_zoom));
    }
    pyramid::tiles_at_level(&track.source(), level, primary, secondary, meta, policy)
}

fn apply_value_scale(
    locks: &RwLock<LockRegistry>,
    value_scales: &Mutex<HashMap<MemberUid, (f64, f64)>>,
    member: &str,
    min: f64,
    max: f64,
) {
    let mut scales = value_scales.lock();
    scales.insert(member.to_string(), (min, max));

    let locks = locks.read();
    let Some(group) = locks.group_for(member, LockKind::ValueScale) else {
        return;
    };

    // The group shares combined extrema: min of mins, max of maxes.
    let mut group_min = min;
    let mut group_max = max;
    for (other, _) in group.members() {
        if let Some((lo, hi)) = scales.get(other.as_str()) {
            group_min = group_min.min(*lo);
            group_max = group_max.max(*hi);
        }
    }

    let mut ctx = PropagationContext::new();
    ctx.visit(member);
    let no_lookup = |_: &str| -> Option<LockState> { None };
    let applied = group.on_member_changed(
        member,
        LockState::ValueRange {
            min: group_min,
            max: group_max,
        },
        &no_lookup,
        &mut ctx,
    );
    scales.insert(member.to_string(), (group_min, group_max));
    for (other, state) in applied {
        if let LockState::ValueRange { min, max } = state {
            scales.insert(other, (min, max));
        }
    }
}
