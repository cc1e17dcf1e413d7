//! Connection lifecycle listeners.
//!
//! Listeners registered on a [`ClientConfiguration`](crate::ClientConfiguration)
//! are called, in registration order, from the session's driver task. A
//! listener that panics is logged and skipped; the remaining listeners still
//! run and the session is unaffected.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use mcc_core::{ClosingCode, MaritimeId};
use tracing::warn;

use crate::transport::TransportError;

// ============================================================================
// Event Payloads
// ============================================================================

/// Why an established connection was lost.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionLoss {
    /// Three consecutive keep-alives went unanswered.
    KeepAliveTimeout,
    /// The transport failed or ended without a closing code.
    Transport(TransportError),
    /// The relay closed with a reconnectable code.
    Closed(ClosingCode),
}

impl fmt::Display for ConnectionLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeepAliveTimeout => f.write_str("keep-alive timeout"),
            Self::Transport(e) => write!(f, "{e}"),
            Self::Closed(code) => write!(f, "closed by relay: {code}"),
        }
    }
}

/// Why a session ended for good.
#[derive(Debug, Clone, PartialEq)]
pub enum DisconnectReason {
    /// `close()` was called.
    Requested,
    /// The relay closed with a code that does not allow reconnecting.
    Closed(ClosingCode),
    /// Another client connected with the same identity.
    DuplicateIdentity,
    /// The relay broke the protocol (bad handshake, incompatible version).
    ProtocolViolation(String),
    /// Every reconnect attempt failed.
    Unreachable { attempts: u32 },
}

impl DisconnectReason {
    /// Closing code associated with the reason, if any.
    pub fn closing_code(&self) -> Option<ClosingCode> {
        match self {
            Self::Requested => Some(ClosingCode::NORMAL),
            Self::Closed(code) => Some(code.clone()),
            Self::DuplicateIdentity => Some(ClosingCode::DUPLICATE_CONNECT),
            Self::ProtocolViolation(_) => Some(ClosingCode::WRONG_MESSAGE),
            Self::Unreachable { .. } => None,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("closed by client"),
            Self::Closed(code) => write!(f, "closed by relay: {code}"),
            Self::DuplicateIdentity => f.write_str("another client connected with the same identity"),
            Self::ProtocolViolation(reason) => write!(f, "protocol violation: {reason}"),
            Self::Unreachable { attempts } => {
                write!(f, "relay unreachable after {attempts} attempts")
            }
        }
    }
}

/// An inbound frame the session could not route.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingFailure {
    /// Broadcast on a channel with no registered message type.
    UnknownChannel { channel: String, sender: MaritimeId },
    /// Broadcast payload did not decode as the registered type.
    MalformedBroadcast { channel: String, reason: String },
    /// Invocation of a service this session does not offer.
    UnknownService { service: String, caller: MaritimeId },
    /// Reply to an invocation that is no longer pending.
    UnmatchedReply { invocation_id: u64 },
    /// The transport delivered an undecodable frame.
    MalformedFrame { reason: String },
}

impl fmt::Display for RoutingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownChannel { channel, sender } => {
                write!(f, "broadcast from {sender} on unknown channel {channel}")
            }
            Self::MalformedBroadcast { channel, reason } => {
                write!(f, "undecodable broadcast on {channel}: {reason}")
            }
            Self::UnknownService { service, caller } => {
                write!(f, "invocation from {caller} for unknown service {service}")
            }
            Self::UnmatchedReply { invocation_id } => {
                write!(f, "reply for unknown invocation {invocation_id}")
            }
            Self::MalformedFrame { reason } => write!(f, "malformed frame: {reason}"),
        }
    }
}

// ============================================================================
// Listener Trait
// ============================================================================

/// Observer of a session's connection lifecycle.
///
/// Every method has an empty default; implement the ones you need.
pub trait ConnectionListener: Send + Sync {
    /// A connection attempt to `endpoint` is starting.
    fn connecting(&self, _endpoint: &str) {}

    /// The handshake with `endpoint` completed.
    fn connected(&self, _endpoint: &str) {}

    /// The connection was lost and the session will try again.
    fn reconnecting(&self, _loss: &ConnectionLoss) {}

    /// The session stopped and will not reconnect.
    fn disconnected(&self, _reason: &DisconnectReason) {}

    /// An inbound frame was dropped.
    fn routing_failure(&self, _failure: &RoutingFailure) {}
}

/// Owned form of a listener callback, for closure listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connecting(String),
    Connected(String),
    Reconnecting(ConnectionLoss),
    Disconnected(DisconnectReason),
    RoutingFailure(RoutingFailure),
}

struct FnListener<F>(F);

impl<F> ConnectionListener for FnListener<F>
where
    F: Fn(ConnectionEvent) + Send + Sync,
{
    fn connecting(&self, endpoint: &str) {
        (self.0)(ConnectionEvent::Connecting(endpoint.to_string()));
    }

    fn connected(&self, endpoint: &str) {
        (self.0)(ConnectionEvent::Connected(endpoint.to_string()));
    }

    fn reconnecting(&self, loss: &ConnectionLoss) {
        (self.0)(ConnectionEvent::Reconnecting(loss.clone()));
    }

    fn disconnected(&self, reason: &DisconnectReason) {
        (self.0)(ConnectionEvent::Disconnected(reason.clone()));
    }

    fn routing_failure(&self, failure: &RoutingFailure) {
        (self.0)(ConnectionEvent::RoutingFailure(failure.clone()));
    }
}

/// Wraps a closure receiving every event as a listener.
pub fn listener_fn<F>(callback: F) -> Arc<dyn ConnectionListener>
where
    F: Fn(ConnectionEvent) + Send + Sync + 'static,
{
    Arc::new(FnListener(callback))
}

// ============================================================================
// Fan-out
// ============================================================================

/// Ordered listener list with panic isolation.
#[derive(Clone, Default)]
pub(crate) struct ListenerSet {
    listeners: Vec<Arc<dyn ConnectionListener>>,
}

impl ListenerSet {
    pub(crate) fn new(listeners: Vec<Arc<dyn ConnectionListener>>) -> Self {
        Self { listeners }
    }

    /// Calls `event` on every listener in order.
    pub(crate) fn notify<F>(&self, event: &'static str, call: F)
    where
        F: Fn(&dyn ConnectionListener),
    {
        for (index, listener) in self.listeners.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| call(listener.as_ref()))).is_err() {
                warn!(listener = index, event, "Connection listener panicked");
            }
        }
    }
}

impl fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_notify_in_order_and_isolates_panics() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::clone(&seen);
        let third = Arc::clone(&seen);

        let set = ListenerSet::new(vec![
            listener_fn(move |event| first.lock().unwrap().push(("first", event))),
            listener_fn(|_| panic!("listener failure")),
            listener_fn(move |event| third.lock().unwrap().push(("third", event))),
        ]);

        set.notify("connected", |l| l.connected("relay:1"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, "first");
        assert_eq!(seen[1].0, "third");
        assert_eq!(seen[1].1, ConnectionEvent::Connected("relay:1".to_string()));
    }

    #[test]
    fn test_disconnect_reason_codes() {
        assert_eq!(
            DisconnectReason::DuplicateIdentity.closing_code(),
            Some(ClosingCode::DUPLICATE_CONNECT)
        );
        assert_eq!(DisconnectReason::Unreachable { attempts: 3 }.closing_code(), None);
        assert!(DisconnectReason::Unreachable { attempts: 3 }
            .to_string()
            .contains("3 attempts"));
    }
}
