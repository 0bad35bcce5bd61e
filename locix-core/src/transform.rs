//! Affine mapping between pixel space and genomic-coordinate space.
//!
//! One `ViewportTransform` is owned by each view. All mutation goes through
//! `pan` / `zoom` / `set_domain` / `set_center` so the invariants (positive
//! scale, finite domains) hold at every observable point.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `[min, max]` interval in genomic units. May extend below zero for
/// virtual padding around the assembly.
pub type AxisDomain = [f64; 2];

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("invalid domain [{min}, {max}]: bounds must be finite with min < max")]
    InvalidDomain { min: f64, max: f64 },

    #[error("invalid pixel extent {0}: must be finite and positive")]
    InvalidExtent(f64),
}

/// Check that a domain has finite bounds with `min < max`.
pub fn validate_domain(domain: AxisDomain) -> Result<(), TransformError> {
    let [min, max] = domain;
    if !min.is_finite() || !max.is_finite() || min >= max {
        return Err(TransformError::InvalidDomain { min, max });
    }
    Ok(())
}

fn check_extent(extent: f64) -> Result<(), TransformError> {
    if !extent.is_finite() || extent <= 0.0 {
        return Err(TransformError::InvalidExtent(extent));
    }
    Ok(())
}

/// Continuous pan/zoom state for one view: `pixel = scale * genomic + translate`
/// per axis, plus the pixel extent the domains are derived against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewportTransform {
    scale_x: f64,
    scale_y: f64,
    translate_x: f64,
    translate_y: f64,
    width: f64,
    height: f64,
    min_scale: f64,
    max_scale: f64,
}

impl ViewportTransform {
    /// Build a transform showing `x_domain` across `width` pixels and
    /// `y_domain` across `height` pixels.
    pub fn new(
        width: f64,
        height: f64,
        x_domain: AxisDomain,
        y_domain: AxisDomain,
    ) -> Result<Self, TransformError> {
        check_extent(width)?;
        check_extent(height)?;
        let mut transform = Self {
            scale_x: 1.0,
            scale_y: 1.0,
            translate_x: 0.0,
            translate_y: 0.0,
            width,
            height,
            min_scale: 0.0,
            max_scale: f64::INFINITY,
        };
        transform.set_domain(x_domain, Some(y_domain))?;
        Ok(transform)
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    /// Pixels per genomic unit along x. Always positive.
    pub fn scale_x(&self) -> f64 {
        self.scale_x
    }

    /// Pixels per genomic unit along y. Always positive.
    pub fn scale_y(&self) -> f64 {
        self.scale_y
    }

    /// Restrict the zoom scale to `[min_scale, max_scale]` pixels per unit,
    /// e.g. to stop zooming in past single-base-pair resolution. The current
    /// scale is left untouched; only future `zoom`/`set_center` calls clamp.
    pub fn set_scale_bounds(&mut self, min_scale: f64, max_scale: f64) {
        let (min_scale, max_scale) = if min_scale <= max_scale {
            (min_scale, max_scale)
        } else {
            (max_scale, min_scale)
        };
        self.min_scale = min_scale.max(0.0);
        self.max_scale = max_scale;
    }

    /// The genomic interval currently visible along x.
    pub fn x_domain(&self) -> AxisDomain {
        [self.to_genomic_x(0.0), self.to_genomic_x(self.width)]
    }

    /// The genomic interval currently visible along y.
    pub fn y_domain(&self) -> AxisDomain {
        [self.to_genomic_y(0.0), self.to_genomic_y(self.height)]
    }

    pub fn to_pixel_x(&self, genomic: f64) -> f64 {
        self.scale_x * genomic + self.translate_x
    }

    pub fn to_pixel_y(&self, genomic: f64) -> f64 {
        self.scale_y * genomic + self.translate_y
    }

    pub fn to_genomic_x(&self, pixel: f64) -> f64 {
        (pixel - self.translate_x) / self.scale_x
    }

    pub fn to_genomic_y(&self, pixel: f64) -> f64 {
        (pixel - self.translate_y) / self.scale_y
    }

    /// Translate the visible window by a pixel delta. Positive `dx` moves
    /// the window toward higher genomic coordinates. Never changes scale.
    pub fn pan(&mut self, dx: f64, dy: f64) {
        if !dx.is_finite() || !dy.is_finite() {
            return;
        }
        self.translate_x -= dx;
        self.translate_y -= dy;
    }

    /// Multiply the scale by `factor` (>1 zooms in) holding the given pixel
    /// fixed. Returns `false` without mutating when the resulting scale
    /// would leave the configured bounds.
    pub fn zoom(&mut self, pivot: (f64, f64), factor: f64) -> bool {
        if !factor.is_finite() || factor <= 0.0 {
            return false;
        }
        let new_scale_x = self.scale_x * factor;
        let new_scale_y = self.scale_y * factor;
        if !self.scale_in_bounds(new_scale_x) || !self.scale_in_bounds(new_scale_y) {
            return false;
        }
        let (px, py) = pivot;
        self.translate_x = px - factor * (px - self.translate_x);
        self.translate_y = py - factor * (py - self.translate_y);
        self.scale_x = new_scale_x;
        self.scale_y = new_scale_y;
        true
    }

    /// Absolute reset to the given domains. Rejects inverted or non-finite
    /// bounds, leaving the prior state untouched.
    pub fn set_domain(
        &mut self,
        x_domain: AxisDomain,
        y_domain: Option<AxisDomain>,
    ) -> Result<(), TransformError> {
        validate_domain(x_domain)?;
        if let Some(y) = y_domain {
            validate_domain(y)?;
        }

        self.scale_x = self.width / (x_domain[1] - x_domain[0]);
        self.translate_x = -self.scale_x * x_domain[0];
        if let Some([y_min, y_max]) = y_domain {
            self.scale_y = self.height / (y_max - y_min);
            self.translate_y = -self.scale_y * y_min;
        }
        Ok(())
    }

    /// Change the pixel extent while keeping the visible domains fixed.
    pub fn resize(&mut self, width: f64, height: f64) -> Result<(), TransformError> {
        check_extent(width)?;
        check_extent(height)?;
        let x_domain = self.x_domain();
        let y_domain = self.y_domain();
        self.width = width;
        self.height = height;
        self.set_domain(x_domain, Some(y_domain))
    }

    /// The `(center_x, center_y, k)` triple used for lock bookkeeping:
    /// domain midpoints plus the x zoom scale.
    pub fn center_and_scale(&self) -> (f64, f64, f64) {
        let [x_min, x_max] = self.x_domain();
        let [y_min, y_max] = self.y_domain();
        ((x_min + x_max) / 2.0, (y_min + y_max) / 2.0, self.scale_x)
    }

    /// Re-center the view on `(cx, cy)` at zoom scale `k`, preserving the
    /// transform's x/y aspect ratio. `k` is clamped into the scale bounds;
    /// non-positive or non-finite `k` leaves the current scale in place.
    pub fn set_center(&mut self, cx: f64, cy: f64, k: f64) {
        if !cx.is_finite() || !cy.is_finite() {
            return;
        }
        let k = if k.is_finite() && k > 0.0 {
            self.clamp_scale(k)
        } else {
            self.scale_x
        };
        let aspect = self.scale_y / self.scale_x;
        self.scale_x = k;
        self.scale_y = k * aspect;
        self.translate_x = self.width / 2.0 - self.scale_x * cx;
        self.translate_y = self.height / 2.0 - self.scale_y * cy;
    }

    fn scale_in_bounds(&self, scale: f64) -> bool {
        scale.is_finite() && scale > 0.0 && scale >= self.min_scale && scale <= self.max_scale
    }

    fn clamp_scale(&self, scale: f64) -> f64 {
        let lower = if self.min_scale > 0.0 {
            self.min_scale
        } else {
            f64::MIN_POSITIVE
        };
        scale.clamp(lower, self.max_scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transform() -> ViewportTransform {
        ViewportTransform::new(800.0, 600.0, [0.0, 4000.0], [0.0, 3000.0]).unwrap()
    }

    fn assert_domain_close(actual: AxisDomain, expected: AxisDomain) {
        assert!(
            (actual[0] - expected[0]).abs() < 1e-9 && (actual[1] - expected[1]).abs() < 1e-9,
            "{actual:?} != {expected:?}"
        );
    }

    #[test]
    fn domains_round_trip_through_construction() {
        let t = transform();
        assert_domain_close(t.x_domain(), [0.0, 4000.0]);
        assert_domain_close(t.y_domain(), [0.0, 3000.0]);
        assert_eq!(t.scale_x(), 0.2);
    }

    #[test]
    fn pixel_genomic_conversions_invert() {
        let t = transform();
        for genomic in [0.0, 1.0, 123.456, 3999.0] {
            let back = t.to_genomic_x(t.to_pixel_x(genomic));
            assert!((back - genomic).abs() < 1e-9, "{back} != {genomic}");
        }
        for pixel in [0.0, 17.5, 599.0] {
            let back = t.to_pixel_y(t.to_genomic_y(pixel));
            assert!((back - pixel).abs() < 1e-9);
        }
    }

    #[test]
    fn pan_shifts_domain_without_rescaling() {
        let mut t = transform();
        let scale_before = t.scale_x();
        t.pan(50.0, 0.0);
        // 50 px at 0.2 px/bp is 250 bp.
        assert_domain_close(t.x_domain(), [250.0, 4250.0]);
        assert_eq!(t.scale_x(), scale_before);
    }

    #[test]
    fn zoom_holds_pivot_fixed() {
        let mut t = transform();
        let pivot_genomic = t.to_genomic_x(400.0);
        assert!(t.zoom((400.0, 300.0), 2.0));
        assert!((t.to_pixel_x(pivot_genomic) - 400.0).abs() < 1e-9);
        // Domain width halved.
        let [min, max] = t.x_domain();
        assert!((max - min - 2000.0).abs() < 1e-9);
    }

    #[test]
    fn zoom_outside_scale_bounds_is_a_noop() {
        let mut t = transform();
        t.set_scale_bounds(0.1, 0.4);
        let before = t.clone();
        assert!(!t.zoom((400.0, 300.0), 4.0));
        assert_eq!(t, before);
        assert!(t.zoom((400.0, 300.0), 2.0));
    }

    #[test]
    fn set_domain_rejects_bad_bounds() {
        let mut t = transform();
        let before = t.clone();
        assert!(t.set_domain([10.0, 10.0], None).is_err());
        assert!(t.set_domain([f64::NAN, 5.0], None).is_err());
        assert!(t.set_domain([0.0, f64::INFINITY], None).is_err());
        assert!(t.set_domain([5.0, -5.0], None).is_err());
        assert_eq!(t, before);
    }

    #[test]
    fn set_center_round_trips_center_and_scale() {
        let mut t = transform();
        t.set_center(1000.0, 800.0, 0.5);
        let (cx, cy, k) = t.center_and_scale();
        assert!((cx - 1000.0).abs() < 1e-9);
        assert!((cy - 800.0).abs() < 1e-9);
        assert!((k - 0.5).abs() < 1e-12);
    }

    #[test]
    fn resize_preserves_domains() {
        let mut t = transform();
        t.pan(25.0, -10.0);
        let x = t.x_domain();
        let y = t.y_domain();
        t.resize(1600.0, 300.0).unwrap();
        let [x0, x1] = t.x_domain();
        assert!((x0 - x[0]).abs() < 1e-9 && (x1 - x[1]).abs() < 1e-9);
        let [y0, y1] = t.y_domain();
        assert!((y0 - y[0]).abs() < 1e-9 && (y1 - y[1]).abs() < 1e-9);
    }
}
