//! The pluggable boundary to the data layer.
//!
//! The engine never assumes HTTP: anything that can resolve a batch of
//! tile ids to payloads can back a track, including plugin fetchers and
//! in-process test doubles.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::LocalBoxFuture;
use locix_core::{TileId, TileSource};
use thiserror::Error;

/// Failure to produce a single tile. Cloneable so one in-flight request
/// can report the same failure to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("malformed tile payload: {0}")]
    Parse(String),

    #[error("tile missing from response")]
    MissingTile,
}

/// Dense numeric payload for one tile, `shape[0] * shape[1]` values in
/// row-major order. 1D tiles carry `shape = [n, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct TileData {
    pub dense: Vec<f32>,
    pub shape: [u32; 2],
}

impl TileData {
    pub fn new_1d(dense: Vec<f32>) -> Self {
        let n = dense.len() as u32;
        Self {
            dense,
            shape: [n, 1],
        }
    }

    /// `(min, max)` over the finite values, or `None` for an empty or
    /// all-NaN tile.
    pub fn extrema(&self) -> Option<(f64, f64)> {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &v in &self.dense {
            let v = f64::from(v);
            if v.is_finite() {
                min = min.min(v);
                max = max.max(v);
            }
        }
        if min <= max {
            Some((min, max))
        } else {
            None
        }
    }
}

/// Payloads are shared between every view and track that requested them.
pub type TilePayload = Arc<TileData>;

/// A source of tile payloads, supplied per tileset type.
///
/// One call corresponds to at most one network round trip; the cache
/// guarantees a given tile id is only ever part of one outstanding call.
pub trait TileFetcher {
    fn fetch_tiles(
        &self,
        source: &TileSource,
        tile_ids: Vec<TileId>,
    ) -> LocalBoxFuture<'static, Result<HashMap<TileId, TilePayload>, FetchError>>;
}
