use std::fmt;

use serde::Serialize;

/// Lifecycle state of a [`ConnectionSession`](super::ConnectionSession).
///
/// ```text
/// Disconnected -> Connecting -> Connected -> Closing -> Disconnected
///                                   |  ^
///                                   v  |
///                               Reconnecting
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closing,
}

impl ConnectionState {
    /// Returns true while the driver task is running.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Disconnected)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closing => "closing",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
