//! Session driver task.
//!
//! One driver runs per connected session. It loops over:
//! 1. establish a connection (round-robin endpoints, exponential backoff)
//! 2. run it (outbound queue, keep-alives, inbound dispatch)
//! 3. on loss, reset registrations and go back to 1
//!
//! until the session is closed, the relay ends it with a non-reconnectable
//! code, or the reconnect policy gives up.

use std::sync::Arc;

use mcc_core::ClosingCode;
use mcc_protocol::{ClientMessage, ProtocolVersion, RelayMessage};
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{dispatch, ConnectionState, SessionInner};
use crate::listener::{ConnectionLoss, DisconnectReason, RoutingFailure};
use crate::service::RegistrationState;
use crate::transport::{Connection, TransportError};

/// Unanswered keep-alives tolerated before the connection counts as lost.
const MAX_MISSED_KEEP_ALIVES: u32 = 3;

/// How a single connection ended.
enum ConnectionEnd {
    /// `close()` was called.
    Shutdown,
    /// The session must stop.
    Terminal(DisconnectReason),
    /// The session should reconnect.
    Lost(ConnectionLoss),
}

/// Why a connection attempt failed.
enum AttemptError {
    Retry(TransportError),
    Fatal(DisconnectReason),
}

/// Classifies a relay-supplied closing code.
fn end_with_code(code: ClosingCode) -> ConnectionEnd {
    if code.is_duplicate_connect() {
        ConnectionEnd::Terminal(DisconnectReason::DuplicateIdentity)
    } else if code.is_reconnectable() {
        ConnectionEnd::Lost(ConnectionLoss::Closed(code))
    } else {
        ConnectionEnd::Terminal(DisconnectReason::Closed(code))
    }
}

pub(super) async fn run(inner: Arc<SessionInner>, shutdown: CancellationToken) {
    let reason = loop {
        let connection = match establish(&inner, &shutdown).await {
            Ok(connection) => connection,
            Err(reason) => break reason,
        };

        match run_connection(&inner, connection, &shutdown).await {
            ConnectionEnd::Shutdown => break DisconnectReason::Requested,
            ConnectionEnd::Terminal(reason) => break reason,
            ConnectionEnd::Lost(loss) => enter_reconnecting(&inner, &loss),
        }
    };

    finish(&inner, reason);
}

// ============================================================================
// Establishing
// ============================================================================

/// Connects to the first endpoint that completes a handshake.
async fn establish(
    inner: &SessionInner,
    shutdown: &CancellationToken,
) -> Result<Connection, DisconnectReason> {
    let endpoints = inner.config.endpoints();
    let policy = inner.config.reconnect_policy().clone();
    let connect_timeout = inner.config.connect_timeout();
    let mut delay = policy.initial_delay;
    let mut attempts = 0u32;

    loop {
        let endpoint = endpoints
            .get(attempts as usize % endpoints.len().max(1))
            .cloned()
            .ok_or_else(|| DisconnectReason::Unreachable { attempts })?;
        attempts = attempts.saturating_add(1);

        debug!(attempt = attempts, endpoint = %endpoint, "Attempting to connect to relay");
        inner
            .listeners
            .notify("connecting", |l| l.connecting(&endpoint));

        let attempt = tokio::select! {
            _ = shutdown.cancelled() => return Err(DisconnectReason::Requested),
            attempt = timeout(connect_timeout, open(inner, &endpoint)) => attempt,
        };

        match attempt {
            Ok(Ok(connection)) => return Ok(connection),
            Ok(Err(AttemptError::Fatal(reason))) => return Err(reason),
            Ok(Err(AttemptError::Retry(e))) => {
                debug!(attempt = attempts, endpoint = %endpoint, error = %e, "Connection attempt failed");
            }
            Err(_) => {
                debug!(attempt = attempts, endpoint = %endpoint, "Connection attempt timed out");
            }
        }

        if policy.is_exhausted(attempts) {
            return Err(DisconnectReason::Unreachable { attempts });
        }

        tokio::select! {
            _ = sleep(delay) => {
                delay = policy.next_delay(delay);
            }
            _ = shutdown.cancelled() => {
                info!("Connection retry cancelled");
                return Err(DisconnectReason::Requested);
            }
        }
    }
}

/// Opens a transport and runs the `Hello` / `Welcome` handshake.
async fn open(inner: &SessionInner, endpoint: &str) -> Result<Connection, AttemptError> {
    let mut connection = inner
        .factory
        .connect(endpoint)
        .await
        .map_err(AttemptError::Retry)?;

    let hello = ClientMessage::hello(inner.identity.clone(), inner.position());
    connection
        .sink
        .send(&hello)
        .await
        .map_err(AttemptError::Retry)?;

    loop {
        let frame = match connection.stream.recv().await {
            Ok(frame) => frame,
            Err(TransportError::Malformed(reason)) => {
                debug!(%reason, "Ignoring malformed frame during handshake");
                continue;
            }
            Err(TransportError::Closed { code: Some(code) }) => {
                return Err(handshake_closed(code));
            }
            Err(e) => return Err(AttemptError::Retry(e)),
        };

        match frame {
            RelayMessage::Welcome {
                protocol_version,
                session_id,
            } => {
                if let Err(e) = ProtocolVersion::CURRENT.ensure_compatible(protocol_version) {
                    let _ = connection.sink.close(ClosingCode::WRONG_MESSAGE).await;
                    return Err(AttemptError::Fatal(DisconnectReason::ProtocolViolation(
                        e.to_string(),
                    )));
                }
                info!(
                    endpoint,
                    session_id = %session_id,
                    protocol_version = %protocol_version,
                    "Handshake complete"
                );
                return Ok(connection);
            }
            RelayMessage::Closing { code } => return Err(handshake_closed(code)),
            other => {
                let _ = connection.sink.close(ClosingCode::WRONG_MESSAGE).await;
                return Err(AttemptError::Fatal(DisconnectReason::ProtocolViolation(
                    format!("expected welcome, got {}", other.kind()),
                )));
            }
        }
    }
}

fn handshake_closed(code: ClosingCode) -> AttemptError {
    match end_with_code(code.clone()) {
        ConnectionEnd::Terminal(reason) => AttemptError::Fatal(reason),
        _ => AttemptError::Retry(TransportError::Closed { code: Some(code) }),
    }
}

// ============================================================================
// Running
// ============================================================================

async fn run_connection(
    inner: &Arc<SessionInner>,
    connection: Connection,
    shutdown: &CancellationToken,
) -> ConnectionEnd {
    let Connection {
        endpoint,
        mut sink,
        mut stream,
    } = connection;

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    on_connected(inner, &endpoint, outbound_tx);

    let keep_alive = inner.config.keep_alive();
    let mut ticker = interval_at(Instant::now() + keep_alive, keep_alive);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut seq = 0u64;
    let mut unacked = 0u32;

    let end = loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                inner.set_state(ConnectionState::Closing);
                if let Err(e) = sink.send(&ClientMessage::close(ClosingCode::NORMAL)).await {
                    debug!(error = %e, "Failed to send close");
                }
                break ConnectionEnd::Shutdown;
            }

            Some(message) = outbound_rx.recv() => {
                if let Err(e) = sink.send(&message).await {
                    break ConnectionEnd::Lost(ConnectionLoss::Transport(e));
                }
            }

            _ = ticker.tick() => {
                if unacked >= MAX_MISSED_KEEP_ALIVES {
                    warn!(endpoint = %endpoint, unacked, "Keep-alive timeout");
                    break ConnectionEnd::Lost(ConnectionLoss::KeepAliveTimeout);
                }
                seq += 1;
                unacked += 1;
                if let Err(e) = sink.send(&ClientMessage::keep_alive(seq, inner.position())).await {
                    break ConnectionEnd::Lost(ConnectionLoss::Transport(e));
                }
            }

            frame = stream.recv() => match frame {
                Ok(RelayMessage::KeepAliveAck { .. }) => unacked = 0,
                Ok(RelayMessage::Closing { code }) => {
                    info!(endpoint = %endpoint, %code, "Relay closed the connection");
                    break end_with_code(code);
                }
                Ok(message) => dispatch::handle(inner, message),
                Err(TransportError::Closed { code: Some(code) }) => {
                    info!(endpoint = %endpoint, %code, "Relay closed the connection");
                    break end_with_code(code);
                }
                Err(TransportError::Malformed(reason)) => {
                    dispatch::report(inner, RoutingFailure::MalformedFrame { reason });
                }
                Err(e) => break ConnectionEnd::Lost(ConnectionLoss::Transport(e)),
            },
        }
    };

    let code = match &end {
        ConnectionEnd::Shutdown => ClosingCode::NORMAL,
        ConnectionEnd::Terminal(reason) => reason.closing_code().unwrap_or(ClosingCode::NORMAL),
        ConnectionEnd::Lost(_) => ClosingCode::CONNECT_CANCELLED,
    };
    if let Err(e) = sink.close(code).await {
        debug!(error = %e, "Transport close failed");
    }
    drop(stream);
    inner.release_connection();
    end
}

/// Publishes the new connection and re-sends pending registrations.
fn on_connected(
    inner: &SessionInner,
    endpoint: &str,
    outbound: mpsc::UnboundedSender<ClientMessage>,
) {
    {
        // Services before link, as in `register_service`.
        let services = inner.services.lock();
        {
            let mut link = inner.link.lock();
            link.outbound = Some(outbound.clone());
            inner.set_state_locked(&mut link, ConnectionState::Connected);
        }
        for registration in services.values() {
            if registration.state() == RegistrationState::Initiated
                && outbound
                    .send(ClientMessage::register_service(registration.service_name()))
                    .is_ok()
            {
                registration.mark_request_sent();
            }
        }
    }

    info!(endpoint, identity = %inner.identity, "Session connected");
    inner.listeners.notify("connected", |l| l.connected(endpoint));
}

fn enter_reconnecting(inner: &SessionInner, loss: &ConnectionLoss) {
    inner.set_state(ConnectionState::Reconnecting);
    let registrations: Vec<_> = inner.services.lock().values().cloned().collect();
    for registration in &registrations {
        registration.reset_for_reconnect();
    }

    warn!(identity = %inner.identity, %loss, "Connection lost, reconnecting");
    inner
        .listeners
        .notify("reconnecting", |l| l.reconnecting(loss));
}

/// Ends the session: cancels registrations, then reports the reason.
fn finish(inner: &SessionInner, reason: DisconnectReason) {
    inner.release_connection();

    let registrations: Vec<_> = inner.services.lock().drain().map(|(_, r)| r).collect();
    for registration in &registrations {
        registration.cancel_locally();
    }

    {
        let mut link = inner.link.lock();
        link.shutdown = None;
        link.driver = None;
        inner.set_state_locked(&mut link, ConnectionState::Disconnected);
    }

    match &reason {
        DisconnectReason::Requested => {
            info!(identity = %inner.identity, "Session closed");
        }
        _ => {
            error!(identity = %inner.identity, %reason, "Session disconnected");
        }
    }
    inner
        .listeners
        .notify("disconnected", |l| l.disconnected(&reason));
}
