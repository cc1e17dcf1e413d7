//! Transport seam between a session and the relay.
//!
//! A [`TransportFactory`] opens a [`Connection`] to one relay endpoint. The
//! connection is split into a [`FrameSink`] (outbound) and a [`FrameStream`]
//! (inbound) so the session driver can wait on both at once. Frames are
//! already-typed protocol messages; byte-level framing is the transport's
//! business.
//!
//! Two transports ship with the crate:
//! - [`TcpTransportFactory`]: newline-delimited JSON over TCP
//! - [`MemoryRelay`]: an in-process relay for tests and demos

mod memory;
mod tcp;

pub use memory::{MemoryPeer, MemoryRelay};
pub use tcp::TcpTransportFactory;

use std::fmt;

use async_trait::async_trait;
use mcc_core::ClosingCode;
use mcc_protocol::{ClientMessage, RelayMessage};
use thiserror::Error;

/// Errors reported by a transport.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The endpoint could not be reached.
    #[error("Failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    /// The connection ended. `code` is set when the relay supplied one.
    #[error("Connection closed{}", match code { Some(code) => format!(" ({code})"), None => String::new() })]
    Closed { code: Option<ClosingCode> },

    /// Read or write failure on an open connection.
    #[error("I/O error: {0}")]
    Io(String),

    /// A frame could not be decoded. The connection stays usable.
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// An operation did not complete in time.
    #[error("Transport operation timed out")]
    Timeout,
}

impl TransportError {
    /// Closing code supplied by the relay, if any.
    pub fn closing_code(&self) -> Option<&ClosingCode> {
        match self {
            Self::Closed { code } => code.as_ref(),
            _ => None,
        }
    }

    /// Returns true if the connection is still usable after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

/// Outbound half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Sends one message.
    async fn send(&mut self, message: &ClientMessage) -> Result<(), TransportError>;

    /// Closes the connection, telling the relay why when the transport can.
    async fn close(&mut self, code: ClosingCode) -> Result<(), TransportError>;
}

/// Inbound half of a connection.
///
/// `recv` must be cancel-safe: the driver polls it inside `select!` and a
/// dropped future must not lose a frame.
#[async_trait]
pub trait FrameStream: Send {
    /// Waits for the next message.
    ///
    /// `Err(TransportError::Closed)` ends the connection; `Malformed` reports
    /// one bad frame and the stream can be polled again.
    async fn recv(&mut self) -> Result<RelayMessage, TransportError>;
}

/// An open connection to one relay endpoint.
pub struct Connection {
    pub endpoint: String,
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
}

impl Connection {
    pub fn new(
        endpoint: impl Into<String>,
        sink: Box<dyn FrameSink>,
        stream: Box<dyn FrameStream>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            sink,
            stream,
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// Opens connections to relay endpoints.
#[async_trait]
pub trait TransportFactory: Send + Sync + 'static {
    /// Connects to `endpoint` (`host:port` for network transports).
    async fn connect(&self, endpoint: &str) -> Result<Connection, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_display_includes_code() {
        let error = TransportError::Closed {
            code: Some(ClosingCode::DUPLICATE_CONNECT),
        };
        assert!(error.to_string().contains("4012"));
        assert_eq!(error.closing_code(), Some(&ClosingCode::DUPLICATE_CONNECT));

        let error = TransportError::Closed { code: None };
        assert_eq!(error.to_string(), "Connection closed");
        assert!(error.closing_code().is_none());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let error: TransportError = io.into();
        assert!(matches!(error, TransportError::Io(ref m) if m.contains("reset")));
        assert!(!error.is_recoverable());
        assert!(TransportError::Malformed("x".into()).is_recoverable());
    }
}
