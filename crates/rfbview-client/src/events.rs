//! Lifecycle notifications published by a session

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Event delivered to session subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SessionEvent {
    /// Handshake finished, the session is connected
    Connect,
    /// Session reached its terminal state
    Disconnect { clean: bool },
    DesktopName { name: String },
    /// Full capability map after a change
    Capabilities { capabilities: BTreeMap<String, bool> },
    Bell,
    /// Clipboard text received from the server
    Clipboard { text: String },
}
