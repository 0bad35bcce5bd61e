//! Visible-tile derivation from a genomic domain and a resolution pyramid.
//!
//! Everything here is a pure function of its inputs: the engine calls
//! `zoom_level` to pick a level for the current viewport, then
//! `tiles_at_level` to enumerate the tile ids covering the domain. No
//! side effects besides a warning log when a range is truncated.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transform::AxisDomain;
use crate::types::{PyramidMeta, TileId, TileIndex, TilePos, TileSource, ZoomLevel};

/// Guard against floating point edges landing exactly on a tile boundary.
const BOUNDARY_EPSILON: f64 = 1e-7;

/// Tunable tile-selection policy.
///
/// The defaults follow the original heuristics: a tile has to occupy at
/// least ~384 on-screen pixels before a finer level is preferred, one tile
/// of padding is kept on each side for smooth panning, and absurdly wide
/// requests are truncated instead of flooding the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PyramidPolicy {
    /// Minimum on-screen pixel footprint of one tile at the chosen level.
    pub min_tile_pixels: f64,
    /// Extra tiles fetched past each edge of the visible domain.
    pub edge_padding_tiles: TileIndex,
    /// Hard cap on tiles per axis per request.
    pub max_tiles_per_axis: usize,
}

impl Default for PyramidPolicy {
    fn default() -> Self {
        Self {
            min_tile_pixels: 384.0,
            edge_padding_tiles: 1,
            max_tiles_per_axis: 20,
        }
    }
}

#[derive(Debug, Error)]
pub enum PyramidError {
    #[error("degenerate domain [{min}, {max}]: width must be positive and finite")]
    DegenerateDomain { min: f64, max: f64 },

    #[error("pyramid covers {meta_dims} dimension(s) but the domain has {domain_dims}")]
    DimensionMismatch { meta_dims: usize, domain_dims: usize },
}

fn check_width(domain: AxisDomain) -> Result<(), PyramidError> {
    let [min, max] = domain;
    if !min.is_finite() || !max.is_finite() || max - min <= 0.0 {
        return Err(PyramidError::DegenerateDomain { min, max });
    }
    Ok(())
}

/// Zoom level for one axis of a power-of-two pyramid: the finest level
/// whose tiles still occupy at least `min_tile_pixels` on screen.
fn pow2_zoom_for_axis(domain_width: f64, pixel_extent: f64, meta: &PyramidMeta, policy: &PyramidPolicy) -> u32 {
    let px_per_unit = pixel_extent / domain_width;
    let ratio = meta.max_width * px_per_unit / policy.min_tile_pixels;
    if ratio <= 1.0 {
        0
    } else {
        ratio.log2().floor() as u32
    }
}

/// Zoom level for one axis of a resolution-list pyramid: the finest
/// resolution that still shows at least one pixel per bin.
fn resolution_zoom_for_axis(domain_width: f64, pixel_extent: f64, resolutions: &[f64]) -> u32 {
    let mut sorted: Vec<f64> = resolutions.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

    let mut level = 0u32;
    for (idx, resolution) in sorted.iter().enumerate() {
        let bins_displayed = domain_width / resolution;
        let bins_per_pixel = bins_displayed / pixel_extent;
        if bins_per_pixel < 1.0 {
            level = idx as u32;
        } else {
            break;
        }
    }
    level
}

/// Choose the zoom level for the given visible domain(s).
///
/// For 2D pyramids the level is synchronized across both axes by taking
/// the finer of the two picks, then clamped to `meta.max_zoom`.
pub fn zoom_level(
    x_domain: AxisDomain,
    y_domain: Option<AxisDomain>,
    pixel_dims: (f64, f64),
    meta: &PyramidMeta,
    policy: &PyramidPolicy,
) -> Result<ZoomLevel, PyramidError> {
    check_width(x_domain)?;
    if let Some(y) = y_domain {
        check_width(y)?;
    }

    let pick = |width: f64, extent: f64| match &meta.resolutions {
        Some(resolutions) => resolution_zoom_for_axis(width, extent, resolutions),
        None => pow2_zoom_for_axis(width, extent, meta, policy),
    };

    let mut level = pick(x_domain[1] - x_domain[0], pixel_dims.0);
    if let Some([y_min, y_max]) = y_domain {
        level = level.max(pick(y_max - y_min, pixel_dims.1));
    }
    Ok(level.min(u32::from(meta.max_zoom)) as ZoomLevel)
}

/// Half-open tile index range covering `domain` at `zoom_level`, padded
/// and clamped to the pyramid's extent along dimension `dim`.
///
/// Returns an empty range when the domain lies entirely outside the data.
fn tile_range(
    domain: AxisDomain,
    zoom_level: ZoomLevel,
    dim: usize,
    meta: &PyramidMeta,
    policy: &PyramidPolicy,
) -> std::ops::Range<TileIndex> {
    let min_pos = meta.min_pos[dim];
    let max_pos = meta.max_pos[dim];
    if domain[1] <= min_pos || domain[0] >= max_pos {
        return 0..0;
    }

    let tile_width = meta.tile_width(zoom_level);
    let count = meta.tile_count(zoom_level, dim);
    let pad = policy.edge_padding_tiles as i64;

    let raw_start = ((domain[0] - min_pos) / tile_width).floor() as i64;
    let raw_end = ((domain[1] - min_pos - BOUNDARY_EPSILON) / tile_width).ceil() as i64;

    let start = (raw_start - pad).clamp(0, count as i64 - 1) as TileIndex;
    let end = (raw_end + pad).clamp(1, count as i64) as TileIndex;
    if start >= end {
        return 0..0;
    }

    if (end - start) as usize > policy.max_tiles_per_axis {
        let truncated = start + policy.max_tiles_per_axis as TileIndex;
        log::warn!(
            "too many visible tiles at level {zoom_level}: {} truncated to {}",
            end - start,
            policy.max_tiles_per_axis
        );
        return start..truncated;
    }

    start..end
}

/// Enumerate the tiles covering `x_domain` (and `y_domain`, for 2D data)
/// at a precomputed zoom level.
pub fn tiles_at_level(
    source: &TileSource,
    zoom_level: ZoomLevel,
    x_domain: AxisDomain,
    y_domain: Option<AxisDomain>,
    meta: &PyramidMeta,
    policy: &PyramidPolicy,
) -> Result<Vec<TileId>, PyramidError> {
    let domain_dims = 1 + usize::from(y_domain.is_some());
    if meta.dims() != domain_dims {
        return Err(PyramidError::DimensionMismatch {
            meta_dims: meta.dims(),
            domain_dims,
        });
    }
    check_width(x_domain)?;
    if let Some(y) = y_domain {
        check_width(y)?;
    }

    let zoom_level = zoom_level.min(meta.max_zoom);
    let xs = tile_range(x_domain, zoom_level, 0, meta, policy);

    let mut tiles = Vec::new();
    match y_domain {
        None => {
            for x in xs {
                tiles.push(TileId {
                    source: source.clone(),
                    zoom_level,
                    pos: TilePos::One(x),
                });
            }
        }
        Some(y) => {
            let ys = tile_range(y, zoom_level, 1, meta, policy);
            for x in xs {
                for y in ys.clone() {
                    tiles.push(TileId {
                        source: source.clone(),
                        zoom_level,
                        pos: TilePos::Two(x, y),
                    });
                }
            }
        }
    }
    Ok(tiles)
}

/// Zoom-level selection and tile enumeration in one step: the set of
/// tiles a view must fetch to cover its visible domain(s).
pub fn tiles_for(
    source: &TileSource,
    x_domain: AxisDomain,
    y_domain: Option<AxisDomain>,
    pixel_dims: (f64, f64),
    meta: &PyramidMeta,
    policy: &PyramidPolicy,
) -> Result<Vec<TileId>, PyramidError> {
    let level = zoom_level(x_domain, y_domain, pixel_dims, meta, policy)?;
    tiles_at_level(source, level, x_domain, y_domain, meta, policy)
}
