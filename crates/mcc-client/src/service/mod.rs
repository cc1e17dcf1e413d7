//! Services: request/response invocations between actors.
//!
//! A service is named by a [`Service`] type; each request type implements
//! [`ServiceMessage`] and names its service and reply type. The offering
//! side registers a [`ServiceHandler`] and receives a [`ServiceRegistration`];
//! the invoking side binds a [`ServiceClient`].
//!
//! ```
//! use mcc_client::{Service, ServiceMessage};
//! use serde::{Deserialize, Serialize};
//!
//! struct Pilotage;
//! impl Service for Pilotage {
//!     const NAME: &'static str = "imo.pilotage";
//! }
//!
//! #[derive(Serialize, Deserialize)]
//! struct RequestPilot {
//!     eta_minutes: u32,
//! }
//!
//! #[derive(Serialize, Deserialize)]
//! struct PilotBooked {
//!     pilot: String,
//! }
//!
//! impl ServiceMessage for RequestPilot {
//!     type Service = Pilotage;
//!     type Reply = PilotBooked;
//!     const MESSAGE_NAME: &'static str = "request_pilot";
//! }
//! ```

mod registration;

pub use registration::{RegistrationState, ServiceRegistration};

use std::any::type_name;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mcc_core::MaritimeId;
use mcc_protocol::{ClientMessage, ServiceFault};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::channel::validate_identifier;
use crate::error::{ClientError, Result};
use crate::session::{ConnectionSession, SessionInner};

/// Names a service.
pub trait Service: Send + Sync + 'static {
    const NAME: &'static str;
}

/// A request sent to a service.
pub trait ServiceMessage: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Service that answers this message.
    type Service: Service;

    /// Reply produced by the service.
    type Reply: Serialize + DeserializeOwned + Send + 'static;

    /// Distinguishes message types sent to the same service.
    const MESSAGE_NAME: &'static str;
}

/// Validates a service name, attributing failures to `type_name`.
pub(crate) fn validate_service_name(service: &str, type_name: &str) -> Result<()> {
    validate_identifier(service).map_err(|reason| ClientError::InvalidServiceType {
        type_name: type_name.to_string(),
        reason,
    })
}

/// An inbound invocation of a locally offered service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceInvocation {
    pub invocation_id: u64,
    pub caller: MaritimeId,
    pub service: String,
    pub message_name: String,
    pub payload: Value,
}

impl ServiceInvocation {
    pub fn context(&self) -> InvocationContext {
        InvocationContext {
            invocation_id: self.invocation_id,
            caller: self.caller.clone(),
        }
    }
}

/// Who is invoking, passed to typed handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationContext {
    pub invocation_id: u64,
    pub caller: MaritimeId,
}

// ============================================================================
// Handlers
// ============================================================================

/// Handles invocations of an offered service.
///
/// Each invocation runs in its own task. A returned fault is sent back to the
/// caller for that invocation only; a panicking handler answers with
/// `HandlerFailed`.
#[async_trait]
pub trait ServiceHandler: Send + Sync + 'static {
    async fn handle(&self, invocation: ServiceInvocation) -> std::result::Result<Value, ServiceFault>;
}

/// Adapts a closure over a typed [`ServiceMessage`] to a [`ServiceHandler`].
pub struct ServiceFn<M, F> {
    callback: F,
    _message: PhantomData<fn() -> M>,
}

impl<M, F> ServiceFn<M, F> {
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            _message: PhantomData,
        }
    }
}

#[async_trait]
impl<M, F, Fut> ServiceHandler for ServiceFn<M, F>
where
    M: ServiceMessage,
    F: Fn(InvocationContext, M) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<M::Reply, ServiceFault>> + Send + 'static,
{
    async fn handle(&self, invocation: ServiceInvocation) -> std::result::Result<Value, ServiceFault> {
        if invocation.message_name != M::MESSAGE_NAME {
            return Err(ServiceFault::bad_request(format!(
                "service {} does not accept {}",
                invocation.service, invocation.message_name
            )));
        }

        let context = invocation.context();
        let message: M = serde_json::from_value(invocation.payload)
            .map_err(|e| ServiceFault::bad_request(format!("undecodable {}: {e}", M::MESSAGE_NAME)))?;

        let reply = (self.callback)(context, message).await?;
        serde_json::to_value(reply)
            .map_err(|e| ServiceFault::handler_failed(format!("undecodable reply: {e}")))
    }
}

// ============================================================================
// Invoking Side
// ============================================================================

/// Invokes one message type on remote actors.
///
/// The service name is validated once, when the client is bound.
pub struct ServiceClient<M> {
    session: ConnectionSession,
    service: Arc<str>,
    _message: PhantomData<fn() -> M>,
}

impl<M: ServiceMessage> ServiceClient<M> {
    pub(crate) fn bind(session: ConnectionSession) -> Result<Self> {
        let service = <M::Service as Service>::NAME;
        validate_service_name(service, type_name::<M::Service>())?;
        Ok(Self {
            session,
            service: Arc::from(service),
            _message: PhantomData,
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Sends `message` to `target` and waits for its reply.
    ///
    /// # Errors
    ///
    /// - `NotConnected` if the session is not connected
    /// - `Timeout` if no reply arrives in time
    /// - `ConnectionLost` if the connection drops first
    /// - `ServiceUnavailable` / `Fault` for fault replies
    pub async fn invoke(&self, target: &MaritimeId, message: &M, timeout: Duration) -> Result<M::Reply> {
        let inner = self.session.inner();
        let payload = serde_json::to_value(message)?;
        let invocation_id = inner.next_id();

        let (reply_tx, reply_rx) = oneshot::channel();
        inner.pending_invocations.lock().insert(invocation_id, reply_tx);
        let _pending = PendingInvocation {
            session: inner,
            invocation_id,
        };

        let request = ClientMessage::invoke(
            invocation_id,
            target.clone(),
            &*self.service,
            M::MESSAGE_NAME,
            payload,
        );
        inner.send(request)?;
        debug!(invocation_id, service = %self.service, %target, "Invocation sent");

        let outcome = match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => return Err(ClientError::ConnectionLost),
            Err(_) => return Err(ClientError::Timeout(timeout)),
        };

        match outcome {
            Ok(value) => Ok(serde_json::from_value(value)?),
            Err(fault) => Err(ClientError::from_fault(&self.service, fault)),
        }
    }
}

/// Removes the reply slot of an invocation however the call ends.
struct PendingInvocation<'a> {
    session: &'a SessionInner,
    invocation_id: u64,
}

impl Drop for PendingInvocation<'_> {
    fn drop(&mut self) {
        self.session
            .pending_invocations
            .lock()
            .remove(&self.invocation_id);
    }
}

impl<M> Clone for ServiceClient<M> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            service: Arc::clone(&self.service),
            _message: PhantomData,
        }
    }
}
