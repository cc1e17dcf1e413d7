//! Connection sessions.
//!
//! A [`ConnectionSession`] is one actor's logical connection to the relay.
//! It owns a driver task that opens the transport, runs the handshake,
//! sends keep-alives, dispatches inbound frames and reconnects after a
//! connection loss. Callers talk to the session from any task; outbound
//! frames are queued to the driver of the current connection.
//!
//! # Send Policy
//!
//! Outbound operations (broadcasts, invocations) fail fast with
//! [`ClientError::NotConnected`] unless the session is `Connected`. Nothing
//! is queued across reconnects.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

mod dispatch;
mod driver;
mod state;

pub use state::ConnectionState;

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use mcc_core::{BroadcastOptions, MaritimeId, PositionTime};
use mcc_protocol::{ClientMessage, ServiceFault};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{BroadcastMessage, ChannelRegistry};
use crate::config::ClientConfiguration;
use crate::error::{ClientError, Result};
use crate::listener::ListenerSet;
use crate::service::{
    validate_service_name, InvocationContext, RegistrationState, Service, ServiceClient,
    ServiceFn, ServiceHandler, ServiceMessage, ServiceRegistration,
};
use crate::transport::TransportFactory;

// ============================================================================
// Public Handles
// ============================================================================

/// Metadata of a received broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastHeader {
    pub message_id: u64,
    pub channel: Arc<str>,
    pub sender: MaritimeId,
    pub position: PositionTime,
}

/// Acknowledgment of one of our broadcasts by a receiver.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastAck {
    pub receiver: MaritimeId,
    pub position: PositionTime,
}

/// Returned by [`ConnectionSession::broadcast`].
///
/// Dropping the handle stops collecting acknowledgments.
#[derive(Debug)]
pub struct BroadcastHandle {
    message_id: u64,
    channel: Arc<str>,
    acks: Option<mpsc::UnboundedReceiver<BroadcastAck>>,
    session: Weak<SessionInner>,
}

impl BroadcastHandle {
    pub fn message_id(&self) -> u64 {
        self.message_id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next receiver acknowledgment.
    ///
    /// Returns `None` when acks were not requested or the connection that
    /// carried the broadcast ended.
    pub async fn next_ack(&mut self) -> Option<BroadcastAck> {
        match &mut self.acks {
            Some(acks) => acks.recv().await,
            None => None,
        }
    }
}

impl Drop for BroadcastHandle {
    fn drop(&mut self) {
        if self.acks.is_none() {
            return;
        }
        if let Some(session) = self.session.upgrade() {
            session.pending_acks.lock().remove(&self.message_id);
        }
    }
}

/// Handle to a broadcast listener registered with [`ConnectionSession::listen`].
#[must_use = "dropping the handle keeps the listener; call cancel() to remove it"]
pub struct Subscription {
    id: u64,
    type_id: TypeId,
    channel: Arc<str>,
    session: Weak<SessionInner>,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Stops delivering broadcasts to this listener.
    pub fn cancel(self) {
        if let Some(session) = self.session.upgrade() {
            let mut subscriptions = session.subscriptions.write();
            if let Some(subscribers) = subscriptions.get_mut(&self.type_id) {
                subscribers.retain(|s| s.id != self.id);
            }
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .finish()
    }
}

// ============================================================================
// Shared State
// ============================================================================

type Deliver = Arc<dyn Fn(&BroadcastHeader, &Value) -> serde_json::Result<()> + Send + Sync>;

#[derive(Clone)]
pub(crate) struct Subscriber {
    id: u64,
    deliver: Deliver,
}

pub(crate) type ReplySender = oneshot::Sender<std::result::Result<Value, ServiceFault>>;

/// Connection bookkeeping guarded by one lock.
#[derive(Default)]
struct Link {
    state: ConnectionState,
    outbound: Option<mpsc::UnboundedSender<ClientMessage>>,
    shutdown: Option<CancellationToken>,
    driver: Option<JoinHandle<()>>,
}

pub(crate) struct SessionInner {
    config: ClientConfiguration,
    identity: MaritimeId,
    factory: Arc<dyn TransportFactory>,
    listeners: ListenerSet,
    link: Mutex<Link>,
    state_tx: watch::Sender<ConnectionState>,
    services: Mutex<HashMap<String, ServiceRegistration>>,
    subscriptions: RwLock<HashMap<TypeId, Vec<Subscriber>>>,
    pub(crate) pending_invocations: Mutex<HashMap<u64, ReplySender>>,
    pending_acks: Mutex<HashMap<u64, mpsc::UnboundedSender<BroadcastAck>>>,
    next_id: AtomicU64,
}

impl SessionInner {
    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn registry(&self) -> &Arc<ChannelRegistry> {
        self.config.channel_registry()
    }

    /// Current position from the supplier, or `PositionTime::zero()` if it
    /// panics.
    fn position(&self) -> PositionTime {
        match catch_unwind(AssertUnwindSafe(|| self.config.position())) {
            Ok(position) => position,
            Err(_) => {
                warn!(identity = %self.identity, "Position supplier panicked");
                PositionTime::zero()
            }
        }
    }

    fn state(&self) -> ConnectionState {
        self.link.lock().state
    }

    fn set_state_locked(&self, link: &mut Link, state: ConnectionState) {
        link.state = state;
        self.state_tx.send_replace(state);
    }

    fn set_state(&self, state: ConnectionState) {
        let mut link = self.link.lock();
        self.set_state_locked(&mut link, state);
    }

    /// Queues a frame on the current connection.
    pub(crate) fn send(&self, message: ClientMessage) -> Result<()> {
        let link = self.link.lock();
        if link.state != ConnectionState::Connected {
            return Err(ClientError::NotConnected { state: link.state });
        }
        link.outbound
            .as_ref()
            .ok_or(ClientError::ConnectionLost)?
            .send(message)
            .map_err(|_| ClientError::ConnectionLost)
    }

    /// Like [`send`](Self::send), for frames that may be dropped.
    pub(crate) fn try_send(&self, message: ClientMessage) -> bool {
        self.send(message).is_ok()
    }

    fn register_service(
        self: &Arc<Self>,
        service: Arc<str>,
        handler: Arc<dyn ServiceHandler>,
    ) -> Result<ServiceRegistration> {
        let mut services = self.services.lock();
        if services.contains_key(&*service) {
            return Err(ClientError::ServiceAlreadyOffered(service.to_string()));
        }

        let registration =
            ServiceRegistration::new(Arc::clone(&service), handler, Arc::downgrade(self));
        services.insert(service.to_string(), registration.clone());

        if self.try_send(ClientMessage::register_service(&*service)) {
            registration.mark_request_sent();
        }
        info!(service = %service, identity = %self.identity, "Service offered");
        Ok(registration)
    }

    /// Cancels `registration`, telling the relay if it knows about it.
    ///
    /// Runs under the services lock, like `register_service` and the
    /// re-registration on connect, so the in-flight flag read here is the
    /// one the relay saw. Returns the prior state, or `None` if already
    /// cancelled.
    pub(crate) fn withdraw_service(
        &self,
        registration: &ServiceRegistration,
    ) -> Option<RegistrationState> {
        let mut services = self.services.lock();
        let prior = registration.transition_to_cancelled()?;

        if services
            .get(registration.service_name())
            .is_some_and(|current| current.same_as(registration))
        {
            services.remove(registration.service_name());
        }

        if registration.relay_knows(prior)
            && !self.try_send(ClientMessage::unregister_service(
                registration.service_name(),
            ))
        {
            debug!(service = %registration.service_name(), "Not connected, unregister not sent");
        }
        Some(prior)
    }

    pub(crate) fn remove_service(&self, registration: &ServiceRegistration) {
        let mut services = self.services.lock();
        if services
            .get(registration.service_name())
            .is_some_and(|current| current.same_as(registration))
        {
            services.remove(registration.service_name());
        }
    }

    fn service(&self, name: &str) -> Option<ServiceRegistration> {
        self.services.lock().get(name).cloned()
    }

    fn subscribers(&self, type_id: TypeId) -> Vec<Subscriber> {
        self.subscriptions
            .read()
            .get(&type_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Drops everything tied to the connection that just ended.
    ///
    /// Pending invocations observe `ConnectionLost`; ack streams end.
    fn release_connection(&self) {
        self.link.lock().outbound = None;
        let pending = std::mem::take(&mut *self.pending_invocations.lock());
        if !pending.is_empty() {
            debug!(count = pending.len(), "Failing pending invocations");
        }
        self.pending_acks.lock().clear();
    }
}

// ============================================================================
// Connection Session
// ============================================================================

/// One actor's connection to the relay. Clones share the session.
///
/// Dropping the last clone shuts the session down as `close()` would.
#[derive(Clone)]
pub struct ConnectionSession {
    inner: Arc<SessionInner>,
    _handles: Arc<HandleGuard>,
}

/// Shared by every [`ConnectionSession`] clone, including those held by
/// service clients. The driver does not hold one.
struct HandleGuard {
    inner: Arc<SessionInner>,
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        let shutdown = self.inner.link.lock().shutdown.clone();
        if let Some(shutdown) = shutdown {
            debug!(identity = %self.inner.identity, "Last session handle dropped, shutting down");
            shutdown.cancel();
        }
    }
}

impl ConnectionSession {
    pub(crate) fn new(
        config: ClientConfiguration,
        identity: MaritimeId,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let listeners = ListenerSet::new(config.listeners().to_vec());
        let inner = Arc::new(SessionInner {
            config,
            identity,
            factory,
            listeners,
            link: Mutex::new(Link::default()),
            state_tx,
            services: Mutex::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            pending_invocations: Mutex::new(HashMap::new()),
            pending_acks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        });
        Self {
            _handles: Arc::new(HandleGuard {
                inner: Arc::clone(&inner),
            }),
            inner,
        }
    }

    pub(crate) fn inner(&self) -> &Arc<SessionInner> {
        &self.inner
    }

    pub fn identity(&self) -> &MaritimeId {
        &self.inner.identity
    }

    /// Configuration snapshot taken when the session was built.
    pub fn configuration(&self) -> &ClientConfiguration {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Receiver observing state changes.
    ///
    /// A watch only keeps the latest value; use a listener to see every
    /// transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Starts connecting in the background.
    ///
    /// Returns once the driver task is spawned; use
    /// [`await_connected`](Self::await_connected) to wait for the handshake.
    ///
    /// # Errors
    ///
    /// - `AlreadyConnecting` / `AlreadyConnected` / `Closing` unless disconnected
    /// - `NoRuntime` outside a tokio runtime
    pub fn connect(&self) -> Result<()> {
        let runtime = Handle::try_current().map_err(|_| ClientError::NoRuntime)?;

        let mut link = self.inner.link.lock();
        match link.state {
            ConnectionState::Disconnected => {}
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                return Err(ClientError::AlreadyConnecting)
            }
            ConnectionState::Connected => return Err(ClientError::AlreadyConnected),
            ConnectionState::Closing => return Err(ClientError::Closing),
        }

        let shutdown = CancellationToken::new();
        link.shutdown = Some(shutdown.clone());
        self.inner
            .set_state_locked(&mut link, ConnectionState::Connecting);
        link.driver = Some(runtime.spawn(driver::run(Arc::clone(&self.inner), shutdown)));

        info!(identity = %self.inner.identity, "Session connecting");
        Ok(())
    }

    /// Closes the session and waits until it is disconnected.
    ///
    /// Sends `Close(NORMAL)` when connected, cancels every service
    /// registration and fails pending invocations. No-op when already
    /// disconnected.
    pub async fn close(&self) {
        let (shutdown, driver) = {
            let mut link = self.inner.link.lock();
            (link.shutdown.clone(), link.driver.take())
        };
        let Some(shutdown) = shutdown else {
            return;
        };

        shutdown.cancel();
        match driver {
            Some(driver) => {
                if let Err(e) = driver.await {
                    debug!(error = %e, "Session driver ended abnormally");
                }
            }
            None => {
                let mut changes = self.state_changes();
                let _ = changes
                    .wait_for(|state| *state == ConnectionState::Disconnected)
                    .await;
            }
        }
    }

    /// Waits until the session is connected.
    ///
    /// # Errors
    ///
    /// - `NotConnected` if the session is, or ends up, disconnected
    /// - `Timeout` if `timeout` elapses first
    pub async fn await_connected(&self, timeout: Duration) -> Result<()> {
        let mut changes = self.state_changes();
        let settled = changes.wait_for(|state| {
            matches!(
                state,
                ConnectionState::Connected | ConnectionState::Disconnected
            )
        });
        let state = match tokio::time::timeout(timeout, settled).await {
            Ok(Ok(state)) => *state,
            Ok(Err(_)) => ConnectionState::Disconnected,
            Err(_) => return Err(ClientError::Timeout(timeout)),
        };
        if state == ConnectionState::Connected {
            Ok(())
        } else {
            Err(ClientError::NotConnected { state })
        }
    }

    // ------------------------------------------------------------------------
    // Broadcasts
    // ------------------------------------------------------------------------

    /// Broadcasts with the configured default options.
    pub fn broadcast<T: BroadcastMessage>(&self, message: &T) -> Result<BroadcastHandle> {
        let options = self.inner.config.broadcast_defaults().clone();
        self.broadcast_with(message, options)
    }

    /// Broadcasts `message` on its channel.
    ///
    /// The channel comes from `T::CHANNEL`; the position from the supplier.
    pub fn broadcast_with<T: BroadcastMessage>(
        &self,
        message: &T,
        options: BroadcastOptions,
    ) -> Result<BroadcastHandle> {
        let channel = self.inner.registry().resolve::<T>()?;
        let payload = serde_json::to_value(message)?;
        let message_id = self.inner.next_id();

        let acks = if options.receiver_ack {
            let (ack_tx, ack_rx) = mpsc::unbounded_channel();
            self.inner.pending_acks.lock().insert(message_id, ack_tx);
            Some(ack_rx)
        } else {
            None
        };

        let frame = ClientMessage::broadcast(
            message_id,
            &*channel,
            self.inner.position(),
            options,
            payload,
        );
        if let Err(e) = self.inner.send(frame) {
            self.inner.pending_acks.lock().remove(&message_id);
            return Err(e);
        }

        debug!(message_id, channel = %channel, "Broadcast sent");
        Ok(BroadcastHandle {
            message_id,
            channel,
            acks,
            session: Arc::downgrade(&self.inner),
        })
    }

    /// Calls `callback` for every broadcast of type `T` received.
    ///
    /// Registers `T` so its channel can be resolved on receipt.
    pub fn listen<T, F>(&self, callback: F) -> Result<Subscription>
    where
        T: BroadcastMessage,
        F: Fn(BroadcastHeader, T) + Send + Sync + 'static,
    {
        let descriptor = self.inner.registry().register::<T>()?;
        let id = self.inner.next_id();

        let deliver: Deliver = Arc::new(move |header: &BroadcastHeader, payload: &Value| {
            let message = T::deserialize(payload)?;
            callback(header.clone(), message);
            Ok(())
        });

        self.inner
            .subscriptions
            .write()
            .entry(descriptor.type_id())
            .or_default()
            .push(Subscriber { id, deliver });

        debug!(channel = %descriptor.channel(), message_type = type_name::<T>(), "Broadcast listener added");
        Ok(Subscription {
            id,
            type_id: descriptor.type_id(),
            channel: Arc::clone(descriptor.channel()),
            session: Arc::downgrade(&self.inner),
        })
    }

    // ------------------------------------------------------------------------
    // Services
    // ------------------------------------------------------------------------

    /// Offers a service handled by a raw JSON handler.
    ///
    /// # Errors
    ///
    /// - `InvalidServiceType` for a malformed name
    /// - `ServiceAlreadyOffered` if the name is live on this session
    pub fn offer_service(
        &self,
        service: &str,
        handler: Arc<dyn ServiceHandler>,
    ) -> Result<ServiceRegistration> {
        validate_service_name(service, service)?;
        self.inner.register_service(Arc::from(service), handler)
    }

    /// Offers the service of `M`, handling it with a typed closure.
    pub fn offer<M, F, Fut>(&self, callback: F) -> Result<ServiceRegistration>
    where
        M: ServiceMessage,
        F: Fn(InvocationContext, M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<M::Reply, ServiceFault>> + Send + 'static,
    {
        let service = <M::Service as Service>::NAME;
        validate_service_name(service, type_name::<M::Service>())?;
        self.inner
            .register_service(Arc::from(service), Arc::new(ServiceFn::<M, F>::new(callback)))
    }

    /// Live registration for `service`, if offered.
    pub fn service(&self, service: &str) -> Option<ServiceRegistration> {
        self.inner.service(service)
    }

    /// Binds a client for invoking `M` on remote actors.
    pub fn service_client<M: ServiceMessage>(&self) -> Result<ServiceClient<M>> {
        ServiceClient::bind(self.clone())
    }

    /// Invokes `M` on `target` and waits for the reply.
    pub async fn invoke<M: ServiceMessage>(
        &self,
        target: &MaritimeId,
        message: &M,
        timeout: Duration,
    ) -> Result<M::Reply> {
        self.service_client::<M>()?
            .invoke(target, message, timeout)
            .await
    }
}

impl fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("identity", &self.inner.identity)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryRelay;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Ping;
    impl BroadcastMessage for Ping {
        const CHANNEL: &'static str = "test.session.ping";
    }

    struct Directory;
    impl Service for Directory {
        const NAME: &'static str = "test.session.directory";
    }

    #[derive(Serialize, Deserialize)]
    struct Lookup;
    impl ServiceMessage for Lookup {
        type Service = Directory;
        type Reply = u32;
        const MESSAGE_NAME: &'static str = "lookup";
    }

    async fn connected_session(relay: &MemoryRelay) -> ConnectionSession {
        let session = ClientConfiguration::create_with_id("mmsi:42")
            .set_auto_connect(false)
            .set_channel_registry(Arc::new(ChannelRegistry::new()))
            .build(Arc::new(relay.clone()))
            .unwrap();
        session.connect().unwrap();
        session
            .await_connected(Duration::from_secs(10))
            .await
            .unwrap();
        session
    }

    fn offline_session() -> ConnectionSession {
        ClientConfiguration::create_with_id("mmsi:42")
            .set_auto_connect(false)
            .set_channel_registry(Arc::new(ChannelRegistry::new()))
            .build(Arc::new(MemoryRelay::new()))
            .unwrap()
    }

    #[test]
    fn test_connect_outside_runtime_fails() {
        let session = offline_session();
        assert!(matches!(session.connect(), Err(ClientError::NoRuntime)));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_broadcast_while_disconnected_fails_fast() {
        let session = offline_session();
        let error = session.broadcast(&Ping).unwrap_err();
        assert!(matches!(
            error,
            ClientError::NotConnected {
                state: ConnectionState::Disconnected
            }
        ));
    }

    #[test]
    fn test_offer_same_service_twice_fails() {
        struct Noop;
        #[async_trait::async_trait]
        impl ServiceHandler for Noop {
            async fn handle(
                &self,
                _: crate::service::ServiceInvocation,
            ) -> std::result::Result<Value, ServiceFault> {
                Ok(Value::Null)
            }
        }

        let session = offline_session();
        let first = session.offer_service("test.noop", Arc::new(Noop)).unwrap();
        assert!(matches!(
            session.offer_service("test.noop", Arc::new(Noop)),
            Err(ClientError::ServiceAlreadyOffered(_))
        ));

        // A cancelled registration frees the name.
        first.cancel();
        assert!(session.service("test.noop").is_none());
        assert!(session.offer_service("test.noop", Arc::new(Noop)).is_ok());
        assert!(matches!(
            session.offer_service("bad name", Arc::new(Noop)),
            Err(ClientError::InvalidServiceType { .. })
        ));
    }

    #[tokio::test]
    async fn test_close_when_disconnected_is_noop() {
        let session = offline_session();
        session.close().await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_subscription_cancel_removes_listener() {
        let session = offline_session();
        let subscription = session.listen::<Ping, _>(|_, _| {}).unwrap();
        let type_id = TypeId::of::<Ping>();
        assert_eq!(session.inner.subscribers(type_id).len(), 1);
        assert_eq!(subscription.channel(), "test.session.ping");
        subscription.cancel();
        assert!(session.inner.subscribers(type_id).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_broadcast_handles_release_ack_slots() {
        let relay = MemoryRelay::new();
        let session = connected_session(&relay).await;

        let kept = session
            .broadcast_with(&Ping, BroadcastOptions::new().with_receiver_ack(true))
            .unwrap();
        for _ in 0..1000 {
            let handle = session
                .broadcast_with(&Ping, BroadcastOptions::new().with_receiver_ack(true))
                .unwrap();
            drop(handle);
        }
        assert_eq!(session.inner.pending_acks.lock().len(), 1);

        drop(kept);
        assert!(session.inner.pending_acks.lock().is_empty());
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_invocation_releases_reply_slot() {
        let relay = MemoryRelay::new();
        let session = connected_session(&relay).await;

        let caller = session.clone();
        let call = tokio::spawn(async move {
            caller
                .invoke(&MaritimeId::new("mmsi:7"), &Lookup, Duration::from_secs(60))
                .await
        });
        while session.inner.pending_invocations.lock().is_empty() {
            tokio::task::yield_now().await;
        }

        call.abort();
        assert!(call.await.unwrap_err().is_cancelled());
        assert!(session.inner.pending_invocations.lock().is_empty());
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_invocation_timeout_releases_reply_slot() {
        let relay = MemoryRelay::new();
        let session = connected_session(&relay).await;

        let result = session
            .invoke(&MaritimeId::new("mmsi:7"), &Lookup, Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(ClientError::Timeout(_))));
        assert!(session.inner.pending_invocations.lock().is_empty());
        session.close().await;
    }
}
