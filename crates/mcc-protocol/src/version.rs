//! Wire protocol version carried in every client frame and in `Welcome`.
//!
//! On the wire a version is the string `"<major>.<minor>"`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `major.minor` pair. A relay is usable when its major matches ours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    pub const CURRENT: ProtocolVersion = ProtocolVersion::new(1, 0);

    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Fails with `MajorMismatch` when `relay` cannot talk to `self`.
    pub fn ensure_compatible(self, relay: ProtocolVersion) -> Result<(), VersionError> {
        if self.major != relay.major {
            return Err(VersionError::MajorMismatch {
                relay,
                client: self,
            });
        }
        Ok(())
    }
}

impl FromStr for ProtocolVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || VersionError::Malformed(s.to_string());
        let (major, minor) = s.split_once('.').ok_or_else(malformed)?;
        Ok(Self {
            major: major.parse().map_err(|_| malformed())?,
            minor: minor.parse().map_err(|_| malformed())?,
        })
    }
}

impl TryFrom<String> for ProtocolVersion {
    type Error = VersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProtocolVersion> for String {
    fn from(version: ProtocolVersion) -> Self {
        version.to_string()
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VersionError {
    #[error("Malformed protocol version {0:?}")]
    Malformed(String),

    #[error("Relay speaks protocol {relay}, client speaks {client}")]
    MajorMismatch {
        relay: ProtocolVersion,
        client: ProtocolVersion,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_form_is_dotted_string() {
        let json = serde_json::to_string(&ProtocolVersion::new(1, 4)).unwrap();
        assert_eq!(json, "\"1.4\"");

        let back: ProtocolVersion = serde_json::from_str("\"3.12\"").unwrap();
        assert_eq!(back, ProtocolVersion::new(3, 12));
        assert!(serde_json::from_str::<ProtocolVersion>("\"3\"").is_err());
        assert!(serde_json::from_str::<ProtocolVersion>("{\"major\":1,\"minor\":0}").is_err());
    }

    #[test]
    fn test_from_str_rejects_extra_components() {
        assert_eq!(
            "1.0.0".parse::<ProtocolVersion>(),
            Err(VersionError::Malformed("1.0.0".to_string()))
        );
        assert!("-1.0".parse::<ProtocolVersion>().is_err());
        assert!("".parse::<ProtocolVersion>().is_err());
    }

    #[test]
    fn test_minor_differences_are_compatible() {
        let client = ProtocolVersion::new(1, 0);
        assert_eq!(client.ensure_compatible(ProtocolVersion::new(1, 9)), Ok(()));

        let error = client
            .ensure_compatible(ProtocolVersion::new(2, 0))
            .unwrap_err();
        assert_eq!(error.to_string(), "Relay speaks protocol 2.0, client speaks 1.0");
    }
}
