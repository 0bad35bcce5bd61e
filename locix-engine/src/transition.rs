//! Tick-driven domain transitions.
//!
//! The engine has no timer thread: the embedder advances animations from
//! its frame loop via `SyncCoordinator::tick`, and each tick turns into
//! an ordinary `SetDomain` gesture. The final tick lands exactly on the
//! target bounds.

use locix_core::{AxisDomain, ViewUid};

#[derive(Debug, Clone)]
pub struct Transition {
    pub view_uid: ViewUid,
    from_x: AxisDomain,
    from_y: AxisDomain,
    to_x: AxisDomain,
    to_y: AxisDomain,
    duration_ms: f64,
    elapsed_ms: f64,
}

fn lerp(from: AxisDomain, to: AxisDomain, t: f64) -> AxisDomain {
    [
        from[0] + (to[0] - from[0]) * t,
        from[1] + (to[1] - from[1]) * t,
    ]
}

impl Transition {
    pub fn new(
        view_uid: ViewUid,
        from_x: AxisDomain,
        from_y: AxisDomain,
        to_x: AxisDomain,
        to_y: AxisDomain,
        duration_ms: f64,
    ) -> Self {
        Self {
            view_uid,
            from_x,
            from_y,
            to_x,
            to_y,
            duration_ms: duration_ms.max(0.0),
            elapsed_ms: 0.0,
        }
    }

    /// Advance by `dt_ms` and return the interpolated domains plus
    /// whether the transition has finished. When finished, the returned
    /// domains are exactly the targets.
    pub fn advance(&mut self, dt_ms: f64) -> (AxisDomain, AxisDomain, bool) {
        self.elapsed_ms += dt_ms.max(0.0);
        if self.elapsed_ms >= self.duration_ms || self.duration_ms == 0.0 {
            return (self.to_x, self.to_y, true);
        }
        let t = self.elapsed_ms / self.duration_ms;
        (lerp(self.from_x, self.to_x, t), lerp(self.from_y, self.to_y, t), false)
    }
}
