//! Position and time value objects.

use crate::error::{DomainError, DomainResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A position (WGS84 degrees) together with the time it was observed.
///
/// Outgoing traffic is stamped with the value returned by the configured
/// position supplier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionTime {
    latitude: f64,
    longitude: f64,
    time: DateTime<Utc>,
}

impl PositionTime {
    /// Creates a position, validating coordinate ranges.
    pub fn try_new(latitude: f64, longitude: f64, time: DateTime<Utc>) -> DomainResult<Self> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(DomainError::InvalidCoordinate {
                field: "latitude".to_string(),
                value: latitude,
                expected: "-90..=90".to_string(),
            });
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(DomainError::InvalidCoordinate {
                field: "longitude".to_string(),
                value: longitude,
                expected: "-180..=180".to_string(),
            });
        }
        Ok(Self {
            latitude,
            longitude,
            time,
        })
    }

    /// Creates a position from a timestamp in milliseconds since the Unix epoch.
    pub fn create(latitude: f64, longitude: f64, epoch_millis: i64) -> DomainResult<Self> {
        let time = DateTime::<Utc>::from_timestamp_millis(epoch_millis)
            .ok_or(DomainError::InvalidTimestamp {
                millis: epoch_millis,
            })?;
        Self::try_new(latitude, longitude, time)
    }

    /// Position `(0, 0)` at the Unix epoch.
    pub const fn zero() -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
            time: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    /// Timestamp in milliseconds since the Unix epoch.
    pub fn epoch_millis(&self) -> i64 {
        self.time.timestamp_millis()
    }
}

impl Default for PositionTime {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for PositionTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:.5}, {:.5}) @ {}",
            self.latitude,
            self.longitude,
            self.time.to_rfc3339()
        )
    }
}
