//! Client configuration.
//!
//! [`ClientConfiguration`] collects everything a session needs before it
//! starts: identity, relay endpoints, keep-alive interval, listeners, position
//! supplier and broadcast defaults. Setters consume and return the
//! configuration so it reads as a chain:
//!
//! ```
//! use std::time::Duration;
//! use mcc_client::ClientConfiguration;
//!
//! let config = ClientConfiguration::create_with_id("mmsi:219000123")
//!     .set_host("relay.example.org:43234")
//!     .set_keep_alive(Duration::from_secs(5))
//!     .set_auto_connect(false);
//! assert_eq!(config.endpoints(), vec!["relay.example.org:43234"]);
//! ```
//!
//! Building a session snapshots the configuration; later changes only affect
//! sessions built afterwards.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use mcc_core::{BroadcastOptions, MaritimeId, PositionTime};
use tracing::debug;

use crate::channel::{BroadcastManifest, ChannelRegistry};
use crate::error::{ClientError, Result};
use crate::listener::ConnectionListener;
use crate::session::ConnectionSession;
use crate::transport::TransportFactory;

/// Relay endpoint used when none is configured.
pub const DEFAULT_HOST: &str = "localhost:43234";

/// Supplies the actor's current position, stamped on outbound frames.
pub type PositionSupplier = Arc<dyn Fn() -> PositionTime + Send + Sync>;

// ============================================================================
// Reconnect Policy
// ============================================================================

/// Exponential backoff between connection attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,

    /// Upper bound on the delay.
    pub max_delay: Duration,

    /// Factor applied to the delay after each failed attempt.
    pub multiplier: f64,

    /// Attempts before giving up; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    /// Delay following `delay`.
    pub fn next_delay(&self, delay: Duration) -> Duration {
        let next_delay_ms = (delay.as_millis() as f64 * self.multiplier) as u64;
        Duration::from_millis(next_delay_ms).min(self.max_delay)
    }

    /// Returns true once `attempts` failed attempts exhaust the policy.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

// ============================================================================
// Client Configuration
// ============================================================================

/// Builder for [`ConnectionSession`]s.
#[derive(Clone)]
pub struct ClientConfiguration {
    id: Option<MaritimeId>,
    host: String,
    keep_alive: Duration,
    auto_connect: bool,
    listeners: Vec<Arc<dyn ConnectionListener>>,
    position_supplier: PositionSupplier,
    broadcast_defaults: BroadcastOptions,
    reconnect: ReconnectPolicy,
    connect_timeout: Duration,
    registry: Arc<ChannelRegistry>,
    manifest: BroadcastManifest,
}

impl ClientConfiguration {
    /// Configuration without an identity; supply one before or at build time.
    pub fn create() -> Self {
        Self {
            id: None,
            host: DEFAULT_HOST.to_string(),
            keep_alive: Duration::from_secs(2),
            auto_connect: true,
            listeners: Vec::new(),
            position_supplier: Arc::new(PositionTime::zero),
            broadcast_defaults: BroadcastOptions::default(),
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            registry: ChannelRegistry::shared(),
            manifest: BroadcastManifest::default(),
        }
    }

    pub fn create_with_id(id: impl Into<MaritimeId>) -> Self {
        Self::create().set_id(id)
    }

    // ------------------------------------------------------------------------
    // Setters
    // ------------------------------------------------------------------------

    #[must_use]
    pub fn set_id(mut self, id: impl Into<MaritimeId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Relay endpoint, or several joined with commas (tried round-robin).
    #[must_use]
    pub fn set_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub fn set_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.host = hosts
            .into_iter()
            .map(|h| h.as_ref().trim().to_string())
            .collect::<Vec<_>>()
            .join(",");
        self
    }

    #[must_use]
    pub fn set_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = interval;
        self
    }

    #[must_use]
    pub fn set_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    /// Appends a listener. Order is kept and duplicates are allowed.
    #[must_use]
    pub fn add_listener(mut self, listener: Arc<dyn ConnectionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    #[must_use]
    pub fn set_position_supplier<F>(mut self, supplier: F) -> Self
    where
        F: Fn() -> PositionTime + Send + Sync + 'static,
    {
        self.position_supplier = Arc::new(supplier);
        self
    }

    #[must_use]
    pub fn set_broadcast_defaults(mut self, options: BroadcastOptions) -> Self {
        self.broadcast_defaults = options;
        self
    }

    #[must_use]
    pub fn set_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    #[must_use]
    pub fn set_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Uses a private registry instead of the process-wide one.
    #[must_use]
    pub fn set_channel_registry(mut self, registry: Arc<ChannelRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Broadcast types registered when a session is built.
    #[must_use]
    pub fn set_broadcast_manifest(mut self, manifest: BroadcastManifest) -> Self {
        self.manifest = manifest;
        self
    }

    // ------------------------------------------------------------------------
    // Getters
    // ------------------------------------------------------------------------

    pub fn id(&self) -> Option<&MaritimeId> {
        self.id.as_ref()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Endpoints parsed from the host string, in order.
    pub fn endpoints(&self) -> Vec<String> {
        self.host
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    pub fn is_auto_connect(&self) -> bool {
        self.auto_connect
    }

    pub fn listeners(&self) -> &[Arc<dyn ConnectionListener>] {
        &self.listeners
    }

    pub fn position_supplier(&self) -> &PositionSupplier {
        &self.position_supplier
    }

    /// Current position from the supplier.
    pub fn position(&self) -> PositionTime {
        (self.position_supplier)()
    }

    pub fn broadcast_defaults(&self) -> &BroadcastOptions {
        &self.broadcast_defaults
    }

    pub fn reconnect_policy(&self) -> &ReconnectPolicy {
        &self.reconnect
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn channel_registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn broadcast_manifest(&self) -> &BroadcastManifest {
        &self.manifest
    }

    // ------------------------------------------------------------------------
    // Build
    // ------------------------------------------------------------------------

    /// Checks the values a session depends on.
    pub fn validate(&self) -> Result<()> {
        if self.endpoints().is_empty() {
            return Err(ClientError::InvalidConfiguration(
                "no relay endpoint configured".to_string(),
            ));
        }
        if self.keep_alive.is_zero() {
            return Err(ClientError::InvalidConfiguration(
                "keep-alive interval must be positive".to_string(),
            ));
        }
        if self.reconnect.multiplier.is_nan() || self.reconnect.multiplier < 1.0 {
            return Err(ClientError::InvalidConfiguration(format!(
                "reconnect multiplier must be at least 1.0, got {}",
                self.reconnect.multiplier
            )));
        }
        Ok(())
    }

    /// Builds a session with the configured identity.
    ///
    /// Registers the broadcast manifest, then connects when auto-connect is
    /// on. Connecting needs a running tokio runtime.
    ///
    /// # Errors
    ///
    /// - `ClientError::MissingIdentity` if no identity was set
    /// - configuration errors from validation or manifest discovery
    /// - `ClientError::NoRuntime` when auto-connecting outside a runtime
    pub fn build(&self, factory: Arc<dyn TransportFactory>) -> Result<ConnectionSession> {
        let id = self.id.clone().ok_or(ClientError::MissingIdentity)?;
        self.build_session(factory, id)
    }

    /// Builds a session for `id`, overriding any configured identity.
    pub fn build_with_id(
        &self,
        factory: Arc<dyn TransportFactory>,
        id: impl Into<MaritimeId>,
    ) -> Result<ConnectionSession> {
        self.build_session(factory, id.into())
    }

    fn build_session(
        &self,
        factory: Arc<dyn TransportFactory>,
        id: MaritimeId,
    ) -> Result<ConnectionSession> {
        self.validate()?;

        let discovered = self.registry.discover(&self.manifest)?;
        debug!(identity = %id, discovered, "Broadcast manifest registered");

        let session = ConnectionSession::new(self.clone(), id, factory);
        if self.auto_connect {
            session.connect()?;
        }
        Ok(session)
    }
}

impl Default for ClientConfiguration {
    fn default() -> Self {
        Self::create()
    }
}

impl fmt::Debug for ClientConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfiguration")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("keep_alive", &self.keep_alive)
            .field("auto_connect", &self.auto_connect)
            .field("listeners", &self.listeners.len())
            .field("broadcast_defaults", &self.broadcast_defaults)
            .field("reconnect", &self.reconnect)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}
