//! Actor identities.

use crate::error::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of an actor connected to the maritime cloud.
///
/// Textual form is `scheme:value`, e.g. `mmsi:219014000` for a vessel or
/// `mmsi:2190047` for a shore station. The relay uses the identity as its
/// de-duplication key: a second connection with the same id closes the
/// first one with [`ClosingCode::DUPLICATE_CONNECT`](crate::ClosingCode::DUPLICATE_CONNECT).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaritimeId(String);

impl MaritimeId {
    /// Creates an identity without checking its scheme.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parses an identity of the form `scheme:value`.
    pub fn parse(s: &str) -> DomainResult<Self> {
        let (scheme, value) = s.split_once(':').ok_or_else(|| DomainError::InvalidIdentity {
            value: s.to_string(),
            reason: "expected scheme:value".to_string(),
        })?;

        if scheme.is_empty() || value.is_empty() {
            return Err(DomainError::InvalidIdentity {
                value: s.to_string(),
                reason: "scheme and value must be non-empty".to_string(),
            });
        }
        if s.chars().any(char::is_whitespace) {
            return Err(DomainError::InvalidIdentity {
                value: s.to_string(),
                reason: "whitespace is not allowed".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }

    /// Returns the scheme part (`mmsi` in `mmsi:123`), if any.
    pub fn scheme(&self) -> Option<&str> {
        self.0.split_once(':').map(|(scheme, _)| scheme)
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MaritimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MaritimeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MaritimeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for MaritimeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let id = MaritimeId::parse("mmsi:123").unwrap();
        assert_eq!(id.as_str(), "mmsi:123");
        assert_eq!(id.scheme(), Some("mmsi"));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(MaritimeId::parse("123").is_err());
        assert!(MaritimeId::parse(":123").is_err());
        assert!(MaritimeId::parse("mmsi:").is_err());
        assert!(MaritimeId::parse("mmsi: 123").is_err());
    }

    #[test]
    fn test_display_matches_input() {
        let id = MaritimeId::new("imo:9074729");
        assert_eq!(format!("{id}"), "imo:9074729");
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = MaritimeId::new("mmsi:123");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"mmsi:123\"");
    }
}
