//! Lifecycle of one locally offered service.
//!
//! ```text
//! Initiated --(relay ack)--> Registered --(cancel / unregister / disconnect)--> Cancelled
//!     |                          |
//!     +------(cancel)------------+---> Cancelled
//!     ^                          |
//!     +-------(reconnect)--------+
//! ```
//!
//! `Cancelled` is permanent. The state lives in a `watch` channel so that
//! transitions are atomic and every waiter observes them.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use mcc_core::MaritimeId;
use mcc_protocol::{ClientMessage, ServiceFault};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info};

use super::{ServiceHandler, ServiceInvocation};
use crate::session::SessionInner;

/// State of a [`ServiceRegistration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationState {
    /// Offered locally, not yet acknowledged by the relay.
    Initiated,
    /// Acknowledged by the relay; invocations are routed here.
    Registered,
    /// Withdrawn. Terminal.
    Cancelled,
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initiated => "initiated",
            Self::Registered => "registered",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

struct InFlight {
    caller: MaritimeId,
    abort: AbortHandle,
}

struct RegistrationInner {
    service: Arc<str>,
    state: watch::Sender<RegistrationState>,
    /// A `RegisterService` frame was sent on the current connection.
    request_in_flight: AtomicBool,
    handler: Arc<dyn ServiceHandler>,
    session: Weak<SessionInner>,
    in_flight: Mutex<HashMap<u64, InFlight>>,
}

/// Handle to a service offered by a session. Clones share the registration.
#[derive(Clone)]
pub struct ServiceRegistration {
    inner: Arc<RegistrationInner>,
}

impl ServiceRegistration {
    pub(crate) fn new(
        service: Arc<str>,
        handler: Arc<dyn ServiceHandler>,
        session: Weak<SessionInner>,
    ) -> Self {
        let (state, _) = watch::channel(RegistrationState::Initiated);
        Self {
            inner: Arc::new(RegistrationInner {
                service,
                state,
                request_in_flight: AtomicBool::new(false),
                handler,
                session,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.inner.service
    }

    pub fn state(&self) -> RegistrationState {
        *self.inner.state.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == RegistrationState::Cancelled
    }

    /// Receiver observing every state change.
    pub fn state_changes(&self) -> watch::Receiver<RegistrationState> {
        self.inner.state.subscribe()
    }

    /// Waits until the relay acknowledged the registration.
    ///
    /// Returns `true` once `Registered`. Returns `false` as soon as the
    /// registration is cancelled, or when `timeout` elapses. Timing out has
    /// no effect on the registration or the connection.
    pub async fn await_registered(&self, timeout: Duration) -> bool {
        let mut changes = self.inner.state.subscribe();
        let settled = changes.wait_for(|state| *state != RegistrationState::Initiated);
        let registered = match tokio::time::timeout(timeout, settled).await {
            Ok(Ok(state)) => *state == RegistrationState::Registered,
            _ => false,
        };
        registered
    }

    /// Withdraws the service. Cancelling twice is a no-op.
    ///
    /// The relay is told only if it knows about the registration: when it
    /// was acknowledged, or when a registration request is in flight.
    /// Invocations still running are aborted and answered with a
    /// service-unavailable fault.
    pub fn cancel(&self) {
        let prior = match self.inner.session.upgrade() {
            Some(session) => session.withdraw_service(self),
            None => self.transition_to_cancelled(),
        };
        let Some(prior) = prior else {
            return;
        };

        info!(service = %self.inner.service, prior = %prior, "Service registration cancelled");
        self.fail_in_flight();
    }

    // ------------------------------------------------------------------------
    // Session-facing transitions
    // ------------------------------------------------------------------------

    /// Moves to `Cancelled` without telling the relay (relay withdrawal or
    /// session shutdown).
    pub(crate) fn cancel_locally(&self) {
        if let Some(prior) = self.transition_to_cancelled() {
            debug!(service = %self.inner.service, prior = %prior, "Service registration cancelled locally");
            self.fail_in_flight();
        }
    }

    /// Relay acknowledged the registration. Returns false if it was ignored.
    pub(crate) fn mark_registered(&self) -> bool {
        self.inner.request_in_flight.store(false, Ordering::SeqCst);
        self.inner.state.send_if_modified(|state| {
            if *state == RegistrationState::Initiated {
                *state = RegistrationState::Registered;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn mark_request_sent(&self) {
        self.inner.request_in_flight.store(true, Ordering::SeqCst);
    }

    /// Connection lost: the relay must acknowledge again after reconnecting.
    pub(crate) fn reset_for_reconnect(&self) {
        self.inner.request_in_flight.store(false, Ordering::SeqCst);
        self.inner.state.send_if_modified(|state| {
            if *state == RegistrationState::Registered {
                *state = RegistrationState::Initiated;
                true
            } else {
                false
            }
        });
    }

    /// Runs the handler for an inbound invocation on its own task.
    ///
    /// Returns false if the registration is cancelled; the caller answers
    /// with a service-unavailable fault.
    pub(crate) fn dispatch(&self, invocation: ServiceInvocation) -> bool {
        let mut in_flight = self.inner.in_flight.lock();
        if self.is_cancelled() {
            return false;
        }

        let invocation_id = invocation.invocation_id;
        let caller = invocation.caller.clone();
        let handler = Arc::clone(&self.inner.handler);
        let work = tokio::spawn(async move { handler.handle(invocation).await });
        let abort = work.abort_handle();

        let registration = self.clone();
        tokio::spawn(async move {
            let outcome = match work.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => return,
                Err(_) => Err(ServiceFault::handler_failed("service handler panicked")),
            };
            registration.complete(invocation_id, outcome);
        });

        in_flight.insert(invocation_id, InFlight { caller, abort });
        true
    }

    /// Number of invocations currently being handled.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    pub(crate) fn same_as(&self, other: &ServiceRegistration) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Whether the relay has, or is about to have, this registration.
    pub(crate) fn relay_knows(&self, prior: RegistrationState) -> bool {
        match prior {
            RegistrationState::Registered => true,
            RegistrationState::Initiated => self.inner.request_in_flight.load(Ordering::SeqCst),
            RegistrationState::Cancelled => false,
        }
    }

    /// Returns the prior state, or `None` if already cancelled.
    pub(crate) fn transition_to_cancelled(&self) -> Option<RegistrationState> {
        let mut prior = RegistrationState::Cancelled;
        self.inner.state.send_if_modified(|state| {
            prior = *state;
            if *state == RegistrationState::Cancelled {
                false
            } else {
                *state = RegistrationState::Cancelled;
                true
            }
        });
        (prior != RegistrationState::Cancelled).then_some(prior)
    }

    fn complete(&self, invocation_id: u64, outcome: std::result::Result<Value, ServiceFault>) {
        let Some(entry) = self.inner.in_flight.lock().remove(&invocation_id) else {
            return;
        };
        let reply = match outcome {
            Ok(payload) => ClientMessage::invocation_result(invocation_id, entry.caller, payload),
            Err(fault) => {
                debug!(invocation_id, service = %self.inner.service, %fault, "Service handler failed");
                ClientMessage::invocation_fault(invocation_id, entry.caller, fault)
            }
        };
        self.reply(invocation_id, reply);
    }

    fn fail_in_flight(&self) {
        let aborted: Vec<(u64, InFlight)> = self.inner.in_flight.lock().drain().collect();
        for (invocation_id, entry) in aborted {
            entry.abort.abort();
            let fault = ServiceFault::service_unavailable(&self.inner.service);
            self.reply(
                invocation_id,
                ClientMessage::invocation_fault(invocation_id, entry.caller, fault),
            );
        }
    }

    fn reply(&self, invocation_id: u64, reply: ClientMessage) {
        let sent = self
            .inner
            .session
            .upgrade()
            .is_some_and(|session| session.try_send(reply));
        if !sent {
            debug!(invocation_id, service = %self.inner.service, "Reply dropped, session not connected");
        }
    }
}

impl fmt::Debug for ServiceRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistration")
            .field("service", &self.inner.service)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Never;

    #[async_trait]
    impl ServiceHandler for Never {
        async fn handle(&self, _: ServiceInvocation) -> std::result::Result<Value, ServiceFault> {
            std::future::pending().await
        }
    }

    fn detached() -> ServiceRegistration {
        ServiceRegistration::new(Arc::from("test.never"), Arc::new(Never), Weak::new())
    }

    #[test]
    fn test_starts_initiated() {
        let registration = detached();
        assert_eq!(registration.state(), RegistrationState::Initiated);
        assert_eq!(registration.service_name(), "test.never");
    }

    #[test]
    fn test_registered_then_reset_then_cancelled() {
        let registration = detached();
        assert!(registration.mark_registered());
        assert!(!registration.mark_registered());
        assert_eq!(registration.state(), RegistrationState::Registered);

        registration.reset_for_reconnect();
        assert_eq!(registration.state(), RegistrationState::Initiated);

        registration.cancel();
        registration.cancel();
        assert!(registration.is_cancelled());

        // Nothing leaves Cancelled.
        assert!(!registration.mark_registered());
        registration.reset_for_reconnect();
        assert!(registration.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_registered_returns_promptly_on_cancel() {
        let registration = detached();
        let waiter = registration.clone();
        let started = tokio::time::Instant::now();

        let task = tokio::spawn(async move { waiter.await_registered(Duration::from_secs(60)).await });
        tokio::task::yield_now().await;
        registration.cancel();

        assert!(!task.await.unwrap());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_registered_times_out() {
        let registration = detached();
        assert!(!registration.await_registered(Duration::from_millis(500)).await);
        assert_eq!(registration.state(), RegistrationState::Initiated);
    }

    #[tokio::test]
    async fn test_cancel_aborts_in_flight_invocations() {
        let registration = detached();
        registration.mark_registered();
        assert!(registration.dispatch(ServiceInvocation {
            invocation_id: 7,
            caller: MaritimeId::new("mmsi:2"),
            service: "test.never".to_string(),
            message_name: "wait".to_string(),
            payload: Value::Null,
        }));
        assert_eq!(registration.in_flight(), 1);

        registration.cancel();
        assert_eq!(registration.in_flight(), 0);
        assert!(!registration.dispatch(ServiceInvocation {
            invocation_id: 8,
            caller: MaritimeId::new("mmsi:2"),
            service: "test.never".to_string(),
            message_name: "wait".to_string(),
            payload: Value::Null,
        }));
    }
}
