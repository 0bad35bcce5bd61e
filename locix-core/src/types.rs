use serde::{Deserialize, Serialize};
use std::fmt;

pub type ViewUid = String;
pub type TrackUid = String;
pub type TileIndex = u64;
pub type ZoomLevel = u8;

/// Position of a tile within its zoom level, one index per dataset dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TilePos {
    One(TileIndex),
    Two(TileIndex, TileIndex),
}

impl TilePos {
    pub fn dims(&self) -> usize {
        match self {
            TilePos::One(_) => 1,
            TilePos::Two(_, _) => 2,
        }
    }

    pub fn x(&self) -> TileIndex {
        match self {
            TilePos::One(x) => *x,
            TilePos::Two(x, _) => *x,
        }
    }

    pub fn y(&self) -> Option<TileIndex> {
        match self {
            TilePos::One(_) => None,
            TilePos::Two(_, y) => Some(*y),
        }
    }
}

/// The data source a set of tiles is served from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileSource {
    pub server: String,
    pub tileset_uid: String,
}

/// Cache key for a single tile. Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileId {
    pub source: TileSource,
    pub zoom_level: ZoomLevel,
    pub pos: TilePos,
}

impl TileId {
    pub fn new_1d(source: TileSource, zoom_level: ZoomLevel, x: TileIndex) -> Self {
        Self {
            source,
            zoom_level,
            pos: TilePos::One(x),
        }
    }

    pub fn new_2d(source: TileSource, zoom_level: ZoomLevel, x: TileIndex, y: TileIndex) -> Self {
        Self {
            source,
            zoom_level,
            pos: TilePos::Two(x, y),
        }
    }

    /// The id a tile server expects, e.g. `uuid.3.12` or `uuid.3.12.7`.
    pub fn remote_id(&self) -> String {
        match self.pos {
            TilePos::One(x) => format!("{}.{}.{}", self.source.tileset_uid, self.zoom_level, x),
            TilePos::Two(x, y) => {
                format!("{}.{}.{}.{}", self.source.tileset_uid, self.zoom_level, x, y)
            }
        }
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source.server, self.remote_id())
    }
}

/// Where a track is laid out within its view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackPosition {
    Top,
    Bottom,
    Left,
    Right,
    Center,
    Whole,
}

/// A non-owning reference from a view to a data source.
///
/// The track identifies what data it needs; it never owns tile payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRef {
    pub uid: TrackUid,
    pub server: String,
    pub tileset_uid: String,
    pub datatype: String,
    pub position: TrackPosition,
    #[serde(default)]
    pub options: serde_json::Value,
    /// Optional track-level cap on the pyramid zoom level.
    #[serde(default)]
    pub max_zoom: Option<ZoomLevel>,
}

impl TrackRef {
    pub fn source(&self) -> TileSource {
        TileSource {
            server: self.server.clone(),
            tileset_uid: self.tileset_uid.clone(),
        }
    }
}

/// Resolution pyramid metadata for one tileset.
///
/// Two pyramid shapes exist in the wild: power-of-two pyramids where level
/// `z` divides `max_width` into `2^z` tiles, and explicit resolution lists
/// (base pairs per bin, coarsest first) where the zoom level is an index
/// into the list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PyramidMeta {
    pub max_zoom: ZoomLevel,
    /// Bins along one tile edge, e.g. 256.
    pub tile_size: u32,
    /// Total extent of the pyramid's largest dimension in genomic units.
    pub max_width: f64,
    /// Data start per dimension (1 or 2 entries).
    pub min_pos: Vec<f64>,
    /// Data end per dimension (1 or 2 entries).
    pub max_pos: Vec<f64>,
    /// Base pairs per bin for each level, coarsest first. When present,
    /// `max_zoom` must equal `resolutions.len() - 1`.
    #[serde(default)]
    pub resolutions: Option<Vec<f64>>,
}

impl PyramidMeta {
    /// A power-of-two pyramid over `[0, max_width)` in `dims` dimensions.
    pub fn pow2(max_zoom: ZoomLevel, tile_size: u32, max_width: f64, dims: usize) -> Self {
        Self {
            max_zoom,
            tile_size,
            max_width,
            min_pos: vec![0.0; dims],
            max_pos: vec![max_width; dims],
            resolutions: None,
        }
    }

    pub fn dims(&self) -> usize {
        self.min_pos.len()
    }

    /// Genomic width covered by one tile at `zoom_level`.
    pub fn tile_width(&self, zoom_level: ZoomLevel) -> f64 {
        match &self.resolutions {
            Some(resolutions) => {
                let idx = (zoom_level as usize).min(resolutions.len().saturating_sub(1));
                resolutions[idx] * f64::from(self.tile_size)
            }
            None => self.max_width / f64::from(1u32 << u32::from(zoom_level).min(31)),
        }
    }

    /// Number of tiles along dimension `dim` at `zoom_level`.
    pub fn tile_count(&self, zoom_level: ZoomLevel, dim: usize) -> TileIndex {
        let extent = (self.max_pos[dim] - self.min_pos[dim]).max(0.0);
        let per_axis = (extent / self.tile_width(zoom_level)).ceil() as TileIndex;
        match self.resolutions {
            Some(_) => per_axis.max(1),
            // A power-of-two pyramid never has more than 2^z tiles per axis.
            None => per_axis.max(1).min(1u64 << u64::from(zoom_level).min(63)),
        }
    }
}
