//! Wheel delta accumulation
//!
//! The protocol only knows wheel "buttons", so continuous deltas are summed
//! per axis and turned into one click per full step.

use crate::mouse::{mask, MouseCoalescer};
use crate::InputSink;
use rfbview_core::WheelDeltaMode;

/// Pixels needed for one wheel step
pub const WHEEL_STEP: f64 = 50.0;

/// Assumed pixels for one line of scrolling
pub const WHEEL_LINE_HEIGHT: f64 = 19.0;

/// Running per-axis wheel sums
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct WheelAccumulator {
    accumulated_x: f64,
    accumulated_y: f64,
}

impl WheelAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining (x, y) deltas below one step
    pub fn accumulated(&self) -> (f64, f64) {
        (self.accumulated_x, self.accumulated_y)
    }

    /// Add a wheel event and emit a click for every full step
    #[allow(clippy::too_many_arguments)]
    pub fn handle_wheel<S: InputSink + ?Sized>(
        &mut self,
        x: f64,
        y: f64,
        dx: f64,
        dy: f64,
        mode: WheelDeltaMode,
        mouse: &mut MouseCoalescer,
        sink: &mut S,
    ) {
        if !dx.is_finite() || !dy.is_finite() {
            return;
        }

        let (dx, dy) = match mode {
            WheelDeltaMode::Pixel => (dx, dy),
            WheelDeltaMode::Line | WheelDeltaMode::Page => {
                (dx * WHEEL_LINE_HEIGHT, dy * WHEEL_LINE_HEIGHT)
            }
        };

        self.accumulated_x += dx;
        self.accumulated_y += dy;

        while self.accumulated_x.abs() >= WHEEL_STEP {
            let bmask = if self.accumulated_x < 0.0 {
                mask::WHEEL_LEFT
            } else {
                mask::WHEEL_RIGHT
            };
            mouse.click(x, y, bmask, sink);
            self.accumulated_x -= WHEEL_STEP.copysign(self.accumulated_x);
        }

        while self.accumulated_y.abs() >= WHEEL_STEP {
            let bmask = if self.accumulated_y < 0.0 {
                mask::WHEEL_UP
            } else {
                mask::WHEEL_DOWN
            };
            mouse.click(x, y, bmask, sink);
            self.accumulated_y -= WHEEL_STEP.copysign(self.accumulated_y);
        }
    }
}
