//! MCC Client - Session runtime for maritime cloud actors
//!
//! This crate connects one actor (vessel, shore station, service) to a
//! maritime cloud relay and provides:
//! - [`ConnectionSession`]: connection lifecycle, keep-alive, reconnection
//!   and inbound dispatch
//! - [`ChannelRegistry`]: broadcast message type to channel resolution
//! - [`ServiceRegistration`]: lifecycle of services offered to other actors
//! - [`ClientConfiguration`]: the builder sessions are created from
//!
//! Transports are injected through [`TransportFactory`]; the crate ships a
//! TCP transport and an in-memory relay.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use mcc_client::{ClientConfiguration, TcpTransportFactory};
//!
//! # async fn run() -> mcc_client::Result<()> {
//! let session = ClientConfiguration::create_with_id("mmsi:219000123")
//!     .set_host("relay.example.org:43234")
//!     .build(Arc::new(TcpTransportFactory::new()))?;
//! session.await_connected(Duration::from_secs(10)).await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod listener;
pub mod service;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use channel::{BroadcastManifest, BroadcastMessage, ChannelDescriptor, ChannelRegistry};
pub use config::{ClientConfiguration, PositionSupplier, ReconnectPolicy, DEFAULT_HOST};
pub use error::{ClientError, Result};
pub use listener::{
    listener_fn, ConnectionEvent, ConnectionListener, ConnectionLoss, DisconnectReason,
    RoutingFailure,
};
pub use service::{
    InvocationContext, RegistrationState, Service, ServiceClient, ServiceFn, ServiceHandler,
    ServiceInvocation, ServiceMessage, ServiceRegistration,
};
pub use session::{
    BroadcastAck, BroadcastHandle, BroadcastHeader, ConnectionSession, ConnectionState,
    Subscription,
};
pub use transport::{
    Connection, FrameSink, FrameStream, MemoryPeer, MemoryRelay, TcpTransportFactory,
    TransportError, TransportFactory,
};

pub use mcc_core::{BroadcastOptions, ClosingCode, GridCell, MaritimeId, PositionTime};
pub use mcc_protocol::{FaultCode, ServiceFault};
