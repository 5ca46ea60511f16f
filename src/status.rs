//! Connection status for the chat session state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of the chat session.
///
/// Transitions are driven by the transport: `Disconnected → Connecting` on
/// `connect()`, `Connecting → Connected` on a successful handshake,
/// `Connected → Reconnecting` on an unexpected disconnect, and
/// `Reconnecting → Error` once the reconnect budget is exhausted. The
/// `Error` state is parked until the caller invokes `connect()` again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No session. Initial state, and the result of an explicit disconnect.
    Disconnected,
    /// A handshake is in flight.
    Connecting,
    /// The session is established and authenticated.
    Connected,
    /// The session was lost unexpectedly; automatic reconnection is underway.
    Reconnecting,
    /// The session failed and will not recover without a manual `connect()`.
    Error,
}

impl ConnectionStatus {
    /// Returns `true` iff the status is exactly [`Connected`](Self::Connected).
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        ConnectionStatus::Disconnected
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Error => "error",
        };
        write!(f, "{}", label)
    }
}
