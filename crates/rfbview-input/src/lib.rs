//! rfbview Input - local input translation
//!
//! Turns mouse, wheel, keyboard and touch gesture activity into the pointer
//! and key events a remote framebuffer server understands.

pub mod gesture;
pub mod keysym;
pub mod mouse;
pub mod scancode;
pub mod sink;
pub mod wheel;

pub use gesture::GestureTranslator;
pub use mouse::{mask, MouseCoalescer};
pub use scancode::xt_scancode;
pub use sink::InputSink;
pub use wheel::WheelAccumulator;
