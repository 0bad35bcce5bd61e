//! Explicit registry of views and their tracks.
//!
//! Replaces ambient global maps: the coordinator and the UI layer share
//! one `Registry` by reference, and views own their transforms.

use std::collections::HashMap;

use locix_core::{PyramidMeta, TrackRef, TrackUid, TransformError, ViewUid, ViewportTransform};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("view {0} already exists")]
    DuplicateView(ViewUid),

    #[error("unknown view {0}")]
    UnknownView(ViewUid),

    #[error(transparent)]
    Transform(#[from] TransformError),
}

/// One pannable/zoomable region of the screen and the tracks inside it.
#[derive(Debug, Clone)]
pub struct View {
    pub uid: ViewUid,
    pub transform: ViewportTransform,
    pub tracks: Vec<TrackRef>,
}

#[derive(Debug, Default)]
pub struct Registry {
    views: HashMap<ViewUid, View>,
    tileset_info: HashMap<(ViewUid, TrackUid), PyramidMeta>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_view(&mut self, view: View) -> Result<(), RegistryError> {
        if self.views.contains_key(&view.uid) {
            return Err(RegistryError::DuplicateView(view.uid));
        }
        self.views.insert(view.uid.clone(), view);
        Ok(())
    }

    pub fn remove_view(&mut self, view_uid: &str) -> Option<View> {
        self.tileset_info.retain(|(v, _), _| v != view_uid);
        self.views.remove(view_uid)
    }

    pub fn view(&self, view_uid: &str) -> Option<&View> {
        self.views.get(view_uid)
    }

    pub fn view_mut(&mut self, view_uid: &str) -> Option<&mut View> {
        self.views.get_mut(view_uid)
    }

    pub fn views(&self) -> impl Iterator<Item = &View> {
        self.views.values()
    }

    pub fn contains_view(&self, view_uid: &str) -> bool {
        self.views.contains_key(view_uid)
    }

    /// Record pyramid metadata for one track's tileset. Metadata arrives
    /// asynchronously from the data layer; until it does, the track is
    /// skipped during tile derivation.
    pub fn set_tileset_info(&mut self, view_uid: &str, track_uid: &str, meta: PyramidMeta) {
        self.tileset_info
            .insert((view_uid.to_string(), track_uid.to_string()), meta);
    }

    pub fn tileset_info(&self, view_uid: &str, track_uid: &str) -> Option<&PyramidMeta> {
        self.tileset_info
            .get(&(view_uid.to_string(), track_uid.to_string()))
    }
}
