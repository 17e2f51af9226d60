//! Local input event types
//!
//! Coordinates are element-local pixels (relative to the rendered display,
//! before scaling is undone).

use serde::{Deserialize, Serialize};

/// Classified touch gesture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GestureKind {
    OneTap,
    TwoTap,
    ThreeTap,
    Drag,
    LongPress,
    TwoDrag,
    Pinch,
}

/// Phase of a gesture callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GesturePhase {
    Start,
    Move,
    End,
}

/// One gesture callback from the recognizer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GestureEvent {
    pub phase: GesturePhase,
    pub gesture: GestureKind,
    /// X coordinate of the gesture position
    pub x: f64,
    /// Y coordinate of the gesture position
    pub y: f64,
    /// Horizontal magnitude (two-finger drag and pinch)
    #[serde(default)]
    pub magnitude_x: f64,
    /// Vertical magnitude (two-finger drag and pinch)
    #[serde(default)]
    pub magnitude_y: f64,
}

impl GestureEvent {
    pub fn new(phase: GesturePhase, gesture: GestureKind, x: f64, y: f64) -> Self {
        Self {
            phase,
            gesture,
            x,
            y,
            magnitude_x: 0.0,
            magnitude_y: 0.0,
        }
    }

    pub fn with_magnitude(mut self, magnitude_x: f64, magnitude_y: f64) -> Self {
        self.magnitude_x = magnitude_x;
        self.magnitude_y = magnitude_y;
        self
    }
}

/// Unit of wheel deltas
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WheelDeltaMode {
    #[default]
    Pixel,
    Line,
    Page,
}

/// Input events fed into a client session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InputEvent {
    /// Mouse button pressed
    MouseDown {
        /// Button index (0=left, 1=middle, 2=right)
        button: u8,
        x: f64,
        y: f64,
    },
    /// Mouse button released
    MouseUp { button: u8, x: f64, y: f64 },
    /// Mouse moved
    MouseMove { x: f64, y: f64 },
    /// Scroll wheel
    Wheel {
        x: f64,
        y: f64,
        dx: f64,
        dy: f64,
        #[serde(default)]
        mode: WheelDeltaMode,
    },
    /// Keyboard key; press and release when `down` is absent
    Key {
        /// X11 keysym, absent when the key has no symbol
        keysym: Option<u32>,
        /// Physical key code (e.g. "ControlLeft")
        #[serde(default)]
        code: String,
        down: Option<bool>,
    },
    /// Touch gesture
    Gesture(GestureEvent),
    /// Paste text into the remote clipboard
    Paste { text: String },
    /// Send Ctrl+Alt+Del
    CtrlAltDel,
}
