//! Typed notification channels.
//!
//! A fixed set of named channels with fixed payload shapes, implemented
//! as explicit observer lists. Subscribing returns an id usable for
//! removal; callbacks run on the engine's thread, synchronously with the
//! emit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use locix_core::ViewportTransform;
use parking_lot::Mutex;

pub type SubscriptionId = u64;

type TransformCallback = Arc<dyn Fn(&str, &ViewportTransform)>;
type ViewCallback = Arc<dyn Fn(&str)>;
type LockCallback = Arc<dyn Fn(&str)>;

#[derive(Default)]
pub struct EventChannels {
    next_id: AtomicU64,
    transform_changed: Mutex<Vec<(SubscriptionId, TransformCallback)>>,
    tiles_loaded: Mutex<Vec<(SubscriptionId, ViewCallback)>>,
    lock_changed: Mutex<Vec<(SubscriptionId, LockCallback)>>,
}

impl EventChannels {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> SubscriptionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Fires synchronously for every view whose transform a gesture
    /// changed, before any tile fetch for that gesture resolves.
    pub fn on_transform_changed(
        &self,
        callback: impl Fn(&str, &ViewportTransform) + 'static,
    ) -> SubscriptionId {
        let id = self.next_id();
        self.transform_changed.lock().push((id, Arc::new(callback)));
        id
    }

    pub fn off_transform_changed(&self, id: SubscriptionId) -> bool {
        let mut list = self.transform_changed.lock();
        let before = list.len();
        list.retain(|(sub, _)| *sub != id);
        list.len() != before
    }

    /// Fires once per settled gesture per view, after that view's tile
    /// futures have all resolved.
    pub fn on_tiles_loaded(&self, callback: impl Fn(&str) + 'static) -> SubscriptionId {
        let id = self.next_id();
        self.tiles_loaded.lock().push((id, Arc::new(callback)));
        id
    }

    pub fn off_tiles_loaded(&self, id: SubscriptionId) -> bool {
        let mut list = self.tiles_loaded.lock();
        let before = list.len();
        list.retain(|(sub, _)| *sub != id);
        list.len() != before
    }

    /// Fires when a lock group is created or removed.
    pub fn on_lock_changed(&self, callback: impl Fn(&str) + 'static) -> SubscriptionId {
        let id = self.next_id();
        self.lock_changed.lock().push((id, Arc::new(callback)));
        id
    }

    pub fn off_lock_changed(&self, id: SubscriptionId) -> bool {
        let mut list = self.lock_changed.lock();
        let before = list.len();
        list.retain(|(sub, _)| *sub != id);
        list.len() != before
    }

    pub fn emit_transform_changed(&self, view_uid: &str, transform: &ViewportTransform) {
        // Clone handles out of the lock so a callback can re-subscribe.
        let callbacks: Vec<TransformCallback> = self
            .transform_changed
            .lock()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in callbacks {
            callback(view_uid, transform);
        }
    }

    pub fn emit_tiles_loaded(&self, view_uid: &str) {
        let callbacks: Vec<ViewCallback> = self
            .tiles_loaded
            .lock()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in callbacks {
            callback(view_uid);
        }
    }

    pub fn emit_lock_changed(&self, lock_uid: &str) {
        let callbacks: Vec<LockCallback> = self
            .lock_changed
            .lock()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in callbacks {
            callback(lock_uid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn unsubscribed_callbacks_stop_firing() {
        let channels = EventChannels::new();
        let count = Rc::new(Cell::new(0u32));

        let seen = count.clone();
        let id = channels.on_tiles_loaded(move |_| seen.set(seen.get() + 1));
        channels.emit_tiles_loaded("a");
        assert_eq!(count.get(), 1);

        assert!(channels.off_tiles_loaded(id));
        channels.emit_tiles_loaded("a");
        assert_eq!(count.get(), 1);
        assert!(!channels.off_tiles_loaded(id));
    }
}
