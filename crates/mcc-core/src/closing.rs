//! Connection closing codes.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Status code describing why a connection was closed, with a human readable
/// message.
///
/// The catalogue below is fixed; [`ClosingCode::create`] exists for protocol
/// extensions. Whether the client reconnects after a close is decided by
/// [`ClosingCode::is_reconnectable`], so the catalogue is reconnection policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClosingCode {
    id: u16,
    message: Cow<'static, str>,
}

impl ClosingCode {
    /// The connection was closed normally.
    pub const NORMAL: ClosingCode = ClosingCode::from_static(1000, "Normal closure");

    /// The endpoint received a type of data it cannot accept
    /// (RFC 6455, section 7.4.1).
    pub const BAD_DATA: ClosingCode = ClosingCode::from_static(1003, "Bad data");

    /// Another client connected with the same identity. Only one client can be
    /// connected per identity; the older connection is closed with this code.
    pub const DUPLICATE_CONNECT: ClosingCode = ClosingCode::from_static(4012, "Duplicate connect");

    pub const WRONG_MESSAGE: ClosingCode = ClosingCode::from_static(4100, "Wrong msgtype");

    pub const CONNECT_CANCELLED: ClosingCode = ClosingCode::from_static(4101, "Connect Cancelled");

    const fn from_static(id: u16, message: &'static str) -> Self {
        Self {
            id,
            message: Cow::Borrowed(message),
        }
    }

    /// Creates a code outside the catalogue.
    pub fn create(id: u16, message: impl Into<String>) -> Self {
        Self {
            id,
            message: Cow::Owned(message.into()),
        }
    }

    /// Returns a code with the same id but a different message.
    #[must_use]
    pub fn with_message(&self, message: impl Into<String>) -> Self {
        Self::create(self.id, message)
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns true if a client may reconnect after being closed with this code.
    ///
    /// No code in the catalogue is reconnectable, normal closure included.
    pub fn is_reconnectable(&self) -> bool {
        false
    }

    /// Returns true if this code reports a duplicate identity.
    pub fn is_duplicate_connect(&self) -> bool {
        self.id == Self::DUPLICATE_CONNECT.id
    }
}

impl fmt::Display for ClosingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_values() {
        assert_eq!(ClosingCode::NORMAL.id(), 1000);
        assert_eq!(ClosingCode::NORMAL.message(), "Normal closure");
        assert_eq!(ClosingCode::BAD_DATA.id(), 1003);
        assert_eq!(ClosingCode::DUPLICATE_CONNECT.id(), 4012);
        assert_eq!(ClosingCode::WRONG_MESSAGE.id(), 4100);
        assert_eq!(ClosingCode::CONNECT_CANCELLED.id(), 4101);
        assert_eq!(ClosingCode::CONNECT_CANCELLED.message(), "Connect Cancelled");
    }

    #[test]
    fn test_no_catalogue_code_is_reconnectable() {
        for code in [
            ClosingCode::NORMAL,
            ClosingCode::BAD_DATA,
            ClosingCode::DUPLICATE_CONNECT,
            ClosingCode::WRONG_MESSAGE,
            ClosingCode::CONNECT_CANCELLED,
        ] {
            assert!(!code.is_reconnectable(), "{code} must not be reconnectable");
        }
        assert!(!ClosingCode::create(4999, "custom").is_reconnectable());
    }

    #[test]
    fn test_with_message_keeps_id() {
        let code = ClosingCode::DUPLICATE_CONNECT.with_message("kicked by mmsi:123");
        assert!(code.is_duplicate_connect());
        assert_eq!(code.message(), "kicked by mmsi:123");
        assert_ne!(code, ClosingCode::DUPLICATE_CONNECT);
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_value(ClosingCode::BAD_DATA).unwrap();
        assert_eq!(json, serde_json::json!({"id": 1003, "message": "Bad data"}));
        let parsed: ClosingCode = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, ClosingCode::BAD_DATA);
    }
}
