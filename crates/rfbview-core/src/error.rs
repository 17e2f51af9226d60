//! Error types for rfbview

use crate::ConnectionState;
use thiserror::Error;

/// Main error type for rfbview operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Bad transition to {to} state, previous connection state: {from}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    #[error("Tried changing state of a disconnected session")]
    Disconnected,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unsupported security types: {0:?}")]
    UnsupportedSecurity(Vec<u8>),

    #[error("Security negotiation failed: {0}")]
    SecurityFailure(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using rfbview's Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a protocol violation error
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(message.into())
    }
}
