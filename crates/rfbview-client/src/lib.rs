//! rfbview Client - session state machine, transport and driver
//!
//! This crate ties the wire format and input engines together into a client
//! session and runs it over a transport.

pub mod cursor;
pub mod driver;
pub mod events;
pub mod handshake;
pub mod session;
pub mod surface;
pub mod transport;
pub mod viewport;

pub use cursor::CursorManager;
pub use driver::{run, Command};
pub use events::SessionEvent;
pub use session::Session;
pub use surface::{LoggingSurface, Surface};
pub use transport::{Channel, CloseInfo, OpenError, TcpTransport, Transport, TransportEvent};
pub use viewport::{Viewport, ViewportGeometry};
