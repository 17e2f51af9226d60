//! Mouse move coalescing and viewport dragging

use crate::InputSink;
use rfbview_core::Timer;
use std::time::{Duration, Instant};
use tracing::debug;

/// Minimum wait between two pointer moves sent to the server
pub const MOUSE_MOVE_DELAY: Duration = Duration::from_millis(17);

/// Pixels the pointer must travel before a viewport drag starts
pub const DRAG_THRESHOLD: f64 = 10.0;

/// Button mask bits
pub mod mask {
    pub const LEFT: u8 = 1 << 0;
    pub const MIDDLE: u8 = 1 << 1;
    pub const RIGHT: u8 = 1 << 2;
    pub const WHEEL_UP: u8 = 1 << 3;
    pub const WHEEL_DOWN: u8 = 1 << 4;
    pub const WHEEL_LEFT: u8 = 1 << 5;
    pub const WHEEL_RIGHT: u8 = 1 << 6;

    /// Mask bit for a DOM-style button index (0=left, 1=middle, 2=right)
    pub fn for_button(button: u8) -> u8 {
        1u8.checked_shl(u32::from(button)).unwrap_or(0)
    }
}

/// Rate-limits pointer moves and tracks the logical button mask
#[derive(Debug, Default)]
pub struct MouseCoalescer {
    pos: (f64, f64),
    button_mask: u8,
    last_move: Option<Instant>,
    pending_move: Timer,
    /// Drag-viewport mode
    drag_viewport: bool,
    dragging: bool,
    drag_anchor: (f64, f64),
    has_drag_moved: bool,
}

impl MouseCoalescer {
    /// Create a new coalescer with no buttons down
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_drag_viewport(&mut self, enabled: bool) {
        self.drag_viewport = enabled;
    }

    pub fn drag_viewport(&self) -> bool {
        self.drag_viewport
    }

    /// Buttons currently held down
    pub fn button_mask(&self) -> u8 {
        self.button_mask
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    /// Last position seen by a move
    pub fn position(&self) -> (f64, f64) {
        self.pos
    }

    /// Deadline of the delayed move, if one is waiting
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending_move.deadline()
    }

    /// Handle a button press or release.
    ///
    /// A delayed move is always sent first so the server sees the pointer
    /// arrive before the click.
    pub fn handle_button<S: InputSink + ?Sized>(
        &mut self,
        x: f64,
        y: f64,
        down: bool,
        bmask: u8,
        sink: &mut S,
    ) {
        if self.drag_viewport {
            if down && !self.dragging {
                self.dragging = true;
                self.drag_anchor = (x, y);
                self.has_drag_moved = false;
                return;
            }

            self.dragging = false;

            // A real drag swallows the release
            if self.has_drag_moved {
                return;
            }

            // No movement: replay as a click, down edge now and the up edge below
            sink.pointer(x, y, bmask);
        }

        if self.pending_move.cancel() {
            sink.pointer(x, y, self.button_mask);
        }

        if down {
            self.button_mask |= bmask;
        } else {
            self.button_mask &= !bmask;
        }

        sink.pointer(x, y, self.button_mask);
    }

    /// Press and release `bmask` at the given position
    pub fn click<S: InputSink + ?Sized>(&mut self, x: f64, y: f64, bmask: u8, sink: &mut S) {
        self.handle_button(x, y, true, bmask, sink);
        self.handle_button(x, y, false, bmask, sink);
    }

    /// Handle a pointer move
    pub fn handle_move<S: InputSink + ?Sized>(&mut self, x: f64, y: f64, now: Instant, sink: &mut S) {
        if self.dragging {
            let dx = self.drag_anchor.0 - x;
            let dy = self.drag_anchor.1 - y;

            if self.has_drag_moved || dx.abs() > DRAG_THRESHOLD || dy.abs() > DRAG_THRESHOLD {
                self.has_drag_moved = true;
                self.drag_anchor = (x, y);
                sink.pan_viewport(dx, dy);
            }
            return;
        }

        self.pos = (x, y);

        // Already waiting: the timer will send the latest position
        if self.pending_move.is_armed() {
            return;
        }

        let elapsed = self
            .last_move
            .map(|last| now.saturating_duration_since(last))
            .unwrap_or(MOUSE_MOVE_DELAY);

        if elapsed >= MOUSE_MOVE_DELAY {
            sink.pointer(x, y, self.button_mask);
            self.last_move = Some(now);
        } else {
            debug!("Delaying mouse move by {:?}", MOUSE_MOVE_DELAY - elapsed);
            self.pending_move.arm(now, MOUSE_MOVE_DELAY - elapsed);
        }
    }

    /// Send the delayed move if its deadline has passed
    pub fn fire_pending<S: InputSink + ?Sized>(&mut self, now: Instant, sink: &mut S) {
        if self.pending_move.fire(now) {
            let (x, y) = self.pos;
            sink.pointer(x, y, self.button_mask);
            self.last_move = Some(now);
        }
    }

    /// Drop any delayed move and end a viewport drag
    pub fn reset(&mut self) {
        self.pending_move.cancel();
        self.dragging = false;
        self.has_drag_moved = false;
    }
}
