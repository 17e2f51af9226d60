//! rfbview Core - Shared types, wire format and protocol definitions
//!
//! This crate provides the foundational types used by the input engine and
//! the client session.

pub mod config;
pub mod cursor;
pub mod error;
pub mod event;
pub mod inbound;
pub mod protocol;
pub mod state;
pub mod timer;

pub use config::Options;
pub use cursor::CursorImage;
pub use error::{Error, Result};
pub use event::{GestureEvent, GestureKind, GesturePhase, InputEvent, WheelDeltaMode};
pub use protocol::SendQueue;
pub use state::ConnectionState;
pub use timer::Timer;
