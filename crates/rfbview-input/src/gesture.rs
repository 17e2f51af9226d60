//! Touch gesture translation
//!
//! Gestures come pre-classified from a recognizer; this module turns them
//! into synthetic pointer, wheel and key activity.

use crate::keysym::XK_CONTROL_L;
use crate::mouse::{mask, MouseCoalescer};
use crate::InputSink;
use rfbview_core::{GestureEvent, GestureKind, GesturePhase};
use std::time::{Duration, Instant};
use tracing::debug;

/// Window in which a second tap may snap onto the first
pub const DOUBLE_TAP_TIMEOUT: Duration = Duration::from_millis(1000);

/// Maximum distance for a second tap to snap onto the first
pub const DOUBLE_TAP_THRESHOLD: f64 = 50.0;

/// Two-finger drag distance per wheel step
pub const GESTURE_SCRLSENS: f64 = 50.0;

/// Pinch distance per zoom step
pub const GESTURE_ZOOMSENS: f64 = 75.0;

/// Maps gestures onto mouse and key output
#[derive(Debug, Default)]
pub struct GestureTranslator {
    last_tap: Option<Instant>,
    first_tap: Option<GestureEvent>,
    last_magnitude_x: f64,
    last_magnitude_y: f64,
}

impl GestureTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate one gesture callback
    pub fn handle<S: InputSink + ?Sized>(
        &mut self,
        ev: &GestureEvent,
        now: Instant,
        mouse: &mut MouseCoalescer,
        sink: &mut S,
    ) {
        match ev.phase {
            GesturePhase::Start => self.start(ev, now, mouse, sink),
            GesturePhase::Move => self.moved(ev, now, mouse, sink),
            GesturePhase::End => self.end(ev, now, mouse, sink),
        }
    }

    fn start<S: InputSink + ?Sized>(
        &mut self,
        ev: &GestureEvent,
        now: Instant,
        mouse: &mut MouseCoalescer,
        sink: &mut S,
    ) {
        match ev.gesture {
            GestureKind::OneTap => self.tap(ev, now, mask::LEFT, mouse, sink),
            GestureKind::TwoTap => self.tap(ev, now, mask::RIGHT, mouse, sink),
            GestureKind::ThreeTap => self.tap(ev, now, mask::MIDDLE, mouse, sink),
            GestureKind::Drag => {
                fake_move(ev.x, ev.y, now, mouse, sink);
                mouse.handle_button(ev.x, ev.y, true, mask::LEFT, sink);
            }
            GestureKind::LongPress => {
                fake_move(ev.x, ev.y, now, mouse, sink);
                mouse.handle_button(ev.x, ev.y, true, mask::RIGHT, sink);
            }
            GestureKind::TwoDrag => {
                self.last_magnitude_x = ev.magnitude_x;
                self.last_magnitude_y = ev.magnitude_y;
                fake_move(ev.x, ev.y, now, mouse, sink);
            }
            GestureKind::Pinch => {
                self.last_magnitude_x = ev.magnitude_x.hypot(ev.magnitude_y);
                fake_move(ev.x, ev.y, now, mouse, sink);
            }
        }
    }

    fn moved<S: InputSink + ?Sized>(
        &mut self,
        ev: &GestureEvent,
        now: Instant,
        mouse: &mut MouseCoalescer,
        sink: &mut S,
    ) {
        match ev.gesture {
            GestureKind::OneTap | GestureKind::TwoTap | GestureKind::ThreeTap => {}
            GestureKind::Drag | GestureKind::LongPress => {
                fake_move(ev.x, ev.y, now, mouse, sink);
            }
            GestureKind::TwoDrag => {
                fake_move(ev.x, ev.y, now, mouse, sink);

                while ev.magnitude_y - self.last_magnitude_y > GESTURE_SCRLSENS {
                    mouse.click(ev.x, ev.y, mask::WHEEL_UP, sink);
                    self.last_magnitude_y += GESTURE_SCRLSENS;
                }
                while ev.magnitude_y - self.last_magnitude_y < -GESTURE_SCRLSENS {
                    mouse.click(ev.x, ev.y, mask::WHEEL_DOWN, sink);
                    self.last_magnitude_y -= GESTURE_SCRLSENS;
                }
                while ev.magnitude_x - self.last_magnitude_x > GESTURE_SCRLSENS {
                    mouse.click(ev.x, ev.y, mask::WHEEL_LEFT, sink);
                    self.last_magnitude_x += GESTURE_SCRLSENS;
                }
                while ev.magnitude_x - self.last_magnitude_x < -GESTURE_SCRLSENS {
                    mouse.click(ev.x, ev.y, mask::WHEEL_RIGHT, sink);
                    self.last_magnitude_x -= GESTURE_SCRLSENS;
                }
            }
            GestureKind::Pinch => {
                fake_move(ev.x, ev.y, now, mouse, sink);

                let magnitude = ev.magnitude_x.hypot(ev.magnitude_y);
                if (magnitude - self.last_magnitude_x).abs() <= GESTURE_ZOOMSENS {
                    return;
                }

                // Most applications zoom on Ctrl+wheel
                sink.key(XK_CONTROL_L, "ControlLeft", true);
                while magnitude - self.last_magnitude_x > GESTURE_ZOOMSENS {
                    mouse.click(ev.x, ev.y, mask::WHEEL_UP, sink);
                    self.last_magnitude_x += GESTURE_ZOOMSENS;
                }
                while magnitude - self.last_magnitude_x < -GESTURE_ZOOMSENS {
                    mouse.click(ev.x, ev.y, mask::WHEEL_DOWN, sink);
                    self.last_magnitude_x -= GESTURE_ZOOMSENS;
                }
                sink.key(XK_CONTROL_L, "ControlLeft", false);
            }
        }
    }

    fn end<S: InputSink + ?Sized>(
        &mut self,
        ev: &GestureEvent,
        now: Instant,
        mouse: &mut MouseCoalescer,
        sink: &mut S,
    ) {
        match ev.gesture {
            GestureKind::Drag => {
                fake_move(ev.x, ev.y, now, mouse, sink);
                mouse.handle_button(ev.x, ev.y, false, mask::LEFT, sink);
            }
            GestureKind::LongPress => {
                fake_move(ev.x, ev.y, now, mouse, sink);
                mouse.handle_button(ev.x, ev.y, false, mask::RIGHT, sink);
            }
            _ => {}
        }
    }

    fn tap<S: InputSink + ?Sized>(
        &mut self,
        ev: &GestureEvent,
        now: Instant,
        bmask: u8,
        mouse: &mut MouseCoalescer,
        sink: &mut S,
    ) {
        let mut pos = (ev.x, ev.y);

        let within_timeout = self
            .last_tap
            .is_some_and(|last| now.saturating_duration_since(last) < DOUBLE_TAP_TIMEOUT);

        match self.first_tap {
            Some(first) if within_timeout && first.gesture == ev.gesture => {
                let distance = (first.x - ev.x).hypot(first.y - ev.y);
                if distance < DOUBLE_TAP_THRESHOLD {
                    debug!("Snapping tap to previous position ({}, {})", first.x, first.y);
                    pos = (first.x, first.y);
                } else {
                    self.first_tap = Some(*ev);
                }
            }
            _ => self.first_tap = Some(*ev),
        }
        self.last_tap = Some(now);

        fake_move(pos.0, pos.1, now, mouse, sink);
        mouse.click(pos.0, pos.1, bmask, sink);
    }
}

/// Move both the remote pointer and the locally drawn cursor
fn fake_move<S: InputSink + ?Sized>(
    x: f64,
    y: f64,
    now: Instant,
    mouse: &mut MouseCoalescer,
    sink: &mut S,
) {
    mouse.handle_move(x, y, now, sink);
    sink.move_cursor(x, y);
}
