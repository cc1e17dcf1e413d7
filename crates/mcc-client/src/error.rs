//! Error types for the maritime cloud client.
//!
//! Errors fall in four groups:
//! - configuration errors (missing identity, malformed channel or service
//!   metadata), raised when a configuration is built or a type is registered
//! - session misuse (`connect` twice, sending while disconnected)
//! - invocation failures (faults, timeouts, lost connections)
//! - transport and serialization passthroughs
//!
//! Transport faults that the reconnection policy recovers from are never
//! returned to callers; they surface as listener events instead.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::time::Duration;

use mcc_protocol::ServiceFault;
use thiserror::Error;

use crate::session::ConnectionState;
use crate::transport::TransportError;

// ============================================================================
// Client Error Type
// ============================================================================

/// Errors returned by client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    /// No identity was supplied before building a session.
    #[error("No identity configured; set one on the configuration or use build_with_id")]
    MissingIdentity,

    /// A configuration value is unusable (empty host list, zero interval, ...).
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A broadcast message type declares an unusable channel identifier.
    ///
    /// Raised when the type is registered, never when a message is sent.
    #[error("Invalid broadcast message type {type_name}: {reason}")]
    InvalidMessageType {
        /// Rust type name of the offending message type.
        type_name: String,
        /// What is wrong with its channel identifier.
        reason: String,
    },

    /// A service type declares an unusable service name.
    #[error("Invalid service type {type_name}: {reason}")]
    InvalidServiceType {
        /// Rust type name (or raw name) of the offending service.
        type_name: String,
        /// What is wrong with its service name.
        reason: String,
    },

    /// Two message types claim the same channel.
    #[error("Channel {channel} is already bound to {existing}")]
    ChannelConflict {
        /// The contested channel.
        channel: String,
        /// Type already registered for it.
        existing: String,
    },

    /// `connect` was called while a connection attempt is running.
    #[error("Session is already connecting")]
    AlreadyConnecting,

    /// `connect` was called on a connected session.
    #[error("Session is already connected")]
    AlreadyConnected,

    /// `connect` was called while the session is shutting down.
    #[error("Session is closing")]
    Closing,

    /// An outbound message was issued while the session is not connected.
    ///
    /// Sends are never queued across reconnects; they fail fast.
    #[error("Not connected (session is {state})")]
    NotConnected {
        /// Session state at the time of the send.
        state: ConnectionState,
    },

    /// The service name is already offered by this session.
    #[error("Service {0} is already offered by this session")]
    ServiceAlreadyOffered(String),

    /// The invoked service is not offered (or no longer offered).
    #[error("Service {service} is unavailable")]
    ServiceUnavailable {
        /// Logical service name.
        service: String,
    },

    /// The remote handler answered with a fault.
    #[error("Service fault: {0}")]
    Fault(ServiceFault),

    /// The connection ended before a reply arrived.
    #[error("Connection lost before a reply arrived")]
    ConnectionLost,

    /// A bounded wait elapsed.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Session operations that spawn tasks need a tokio runtime.
    #[error("No tokio runtime available to drive the session")]
    NoRuntime,

    /// Transport passthrough.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// JSON encode/decode passthrough.
    #[error("Failed to encode or decode message: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClientError {
    /// Maps a fault received from the relay to a client error.
    pub fn from_fault(service: &str, fault: ServiceFault) -> Self {
        if fault.is_service_unavailable() {
            Self::ServiceUnavailable {
                service: service.to_string(),
            }
        } else {
            Self::Fault(fault)
        }
    }

    /// Returns true for errors caused by configuration or type metadata.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::MissingIdentity
                | Self::InvalidConfiguration(_)
                | Self::InvalidMessageType { .. }
                | Self::InvalidServiceType { .. }
                | Self::ChannelConflict { .. }
        )
    }
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Convenience Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

// ============================================================================
// Tests
// ============================================================================
