//! In-process relay.
//!
//! [`MemoryRelay`] is a [`TransportFactory`] whose connections end in a
//! [`MemoryPeer`] held by the test (or demo) instead of a socket. The peer
//! sees every frame the client sends and can push relay frames, close the
//! connection with a code, or drop it abruptly.
//!
//! By default the relay answers `Hello` with `Welcome` and every `KeepAlive`
//! with its ack, so sessions connect and stay up without a scripted peer.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use mcc_core::ClosingCode;
use mcc_protocol::{ClientMessage, MessageType, RelayMessage};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use super::{Connection, FrameSink, FrameStream, TransportError, TransportFactory};

type Inbound = Result<RelayMessage, TransportError>;

struct RelayInner {
    accepting: AtomicBool,
    auto_welcome: AtomicBool,
    auto_ack_keep_alive: AtomicBool,
    attempts: AtomicUsize,
    next_session: AtomicU64,
    peers_tx: mpsc::UnboundedSender<MemoryPeer>,
    peers_rx: Mutex<mpsc::UnboundedReceiver<MemoryPeer>>,
}

/// In-memory relay. Cloning shares the same relay.
#[derive(Clone)]
pub struct MemoryRelay {
    inner: Arc<RelayInner>,
}

impl MemoryRelay {
    /// Creates a relay that accepts connections and auto-answers handshakes
    /// and keep-alives.
    pub fn new() -> Self {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(RelayInner {
                accepting: AtomicBool::new(true),
                auto_welcome: AtomicBool::new(true),
                auto_ack_keep_alive: AtomicBool::new(true),
                attempts: AtomicUsize::new(0),
                next_session: AtomicU64::new(1),
                peers_tx,
                peers_rx: Mutex::new(peers_rx),
            }),
        }
    }

    /// Refuses (`false`) or accepts (`true`) new connections.
    pub fn set_accepting(&self, accepting: bool) {
        self.inner.accepting.store(accepting, Ordering::SeqCst);
    }

    /// Controls the automatic `Welcome` reply to `Hello`.
    pub fn set_auto_welcome(&self, enabled: bool) {
        self.inner.auto_welcome.store(enabled, Ordering::SeqCst);
    }

    /// Controls the automatic `KeepAliveAck` reply.
    pub fn set_auto_ack_keep_alive(&self, enabled: bool) {
        self.inner.auto_ack_keep_alive.store(enabled, Ordering::SeqCst);
    }

    /// Number of `connect` calls seen, refused ones included.
    pub fn connection_attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Waits for the next accepted connection.
    ///
    /// Returns `None` only if the relay itself is gone, which cannot happen
    /// while `self` is alive.
    pub async fn accept(&self) -> Option<MemoryPeer> {
        self.inner.peers_rx.lock().await.recv().await
    }
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportFactory for MemoryRelay {
    async fn connect(&self, endpoint: &str) -> Result<Connection, TransportError> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);

        if !self.inner.accepting.load(Ordering::SeqCst) {
            debug!(endpoint, "Memory relay refusing connection");
            return Err(TransportError::Connect {
                endpoint: endpoint.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let session_id = format!(
            "memory-{}",
            self.inner.next_session.fetch_add(1, Ordering::SeqCst)
        );
        let (to_client, client_rx) = mpsc::unbounded_channel::<Inbound>();
        let (to_relay, relay_rx) = mpsc::unbounded_channel::<ClientMessage>();

        let sink = MemorySink {
            to_relay: Some(to_relay),
            replies: to_client.downgrade(),
            relay: Arc::clone(&self.inner),
            session_id: session_id.clone(),
        };
        let stream = MemoryStream { rx: client_rx };
        let peer = MemoryPeer {
            endpoint: endpoint.to_string(),
            session_id,
            to_client,
            from_client: relay_rx,
        };

        self.inner
            .peers_tx
            .send(peer)
            .map_err(|_| TransportError::Connect {
                endpoint: endpoint.to_string(),
                reason: "relay shut down".to_string(),
            })?;

        Ok(Connection::new(endpoint, Box::new(sink), Box::new(stream)))
    }
}

// ============================================================================
// Client Side
// ============================================================================

struct MemorySink {
    to_relay: Option<mpsc::UnboundedSender<ClientMessage>>,
    replies: mpsc::WeakUnboundedSender<Inbound>,
    relay: Arc<RelayInner>,
    session_id: String,
}

impl MemorySink {
    fn auto_reply(&self, message: &ClientMessage) {
        let reply = match &message.message {
            MessageType::Hello { .. } if self.relay.auto_welcome.load(Ordering::SeqCst) => {
                RelayMessage::welcome(self.session_id.clone())
            }
            MessageType::KeepAlive { seq, .. }
                if self.relay.auto_ack_keep_alive.load(Ordering::SeqCst) =>
            {
                RelayMessage::keep_alive_ack(*seq)
            }
            _ => return,
        };
        if let Some(replies) = self.replies.upgrade() {
            let _ = replies.send(Ok(reply));
        }
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, message: &ClientMessage) -> Result<(), TransportError> {
        let to_relay = self
            .to_relay
            .as_ref()
            .ok_or(TransportError::Closed { code: None })?;
        to_relay
            .send(message.clone())
            .map_err(|_| TransportError::Closed { code: None })?;
        self.auto_reply(message);
        Ok(())
    }

    async fn close(&mut self, code: ClosingCode) -> Result<(), TransportError> {
        debug!(session_id = %self.session_id, %code, "Memory connection closed by client");
        self.to_relay = None;
        Ok(())
    }
}

struct MemoryStream {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl FrameStream for MemoryStream {
    async fn recv(&mut self) -> Result<RelayMessage, TransportError> {
        self.rx
            .recv()
            .await
            .unwrap_or(Err(TransportError::Closed { code: None }))
    }
}

// ============================================================================
// Relay Side
// ============================================================================

/// Relay end of one in-memory connection.
pub struct MemoryPeer {
    endpoint: String,
    session_id: String,
    to_client: mpsc::UnboundedSender<Inbound>,
    from_client: mpsc::UnboundedReceiver<ClientMessage>,
}

impl MemoryPeer {
    /// Endpoint string the client connected to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Next frame sent by the client; `None` once the client closed.
    pub async fn recv(&mut self) -> Option<ClientMessage> {
        self.from_client.recv().await
    }

    /// Skips frames until one matches `predicate`.
    pub async fn expect<F>(&mut self, mut predicate: F) -> Option<ClientMessage>
    where
        F: FnMut(&MessageType) -> bool,
    {
        while let Some(message) = self.from_client.recv().await {
            if predicate(&message.message) {
                return Some(message);
            }
        }
        None
    }

    /// Pushes a relay frame to the client. Returns false if the client is gone.
    pub fn send(&self, message: RelayMessage) -> bool {
        self.to_client.send(Ok(message)).is_ok()
    }

    /// Makes the client's stream report one undecodable frame.
    pub fn send_malformed(&self, reason: impl Into<String>) -> bool {
        self.to_client
            .send(Err(TransportError::Malformed(reason.into())))
            .is_ok()
    }

    /// Closes the connection with a code, as a relay-initiated close.
    pub fn close(self, code: ClosingCode) {
        let _ = self
            .to_client
            .send(Err(TransportError::Closed { code: Some(code) }));
    }

    /// Drops the connection without a code.
    pub fn disconnect(self) {}
}
