use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of the live event stream connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Automatic reconnects exhausted; serving as a fallback signal
    Degraded,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timestamped transition broadcast to status subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatusEvent {
    pub state: ConnectionState,
    pub previous: ConnectionState,
    pub at: DateTime<Utc>,
    /// Consecutive failed attempts at the time of the transition
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionStatusEvent {
    /// True for every transition into `Connected`
    pub fn is_reconnect(&self) -> bool {
        self.state == ConnectionState::Connected && self.previous != ConnectionState::Connected
    }
}
