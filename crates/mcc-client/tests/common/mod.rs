//! Helpers shared by the session integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use mcc_client::{
    listener_fn, BroadcastMessage, ChannelRegistry, ClientConfiguration, ConnectionEvent,
    ConnectionListener, MemoryPeer, MemoryRelay,
};
use mcc_protocol::{ClientMessage, MessageType};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Upper bound for any single wait in virtual time.
pub const WAIT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AisPosition {
    pub mmsi: u32,
    pub sog: f64,
}

impl BroadcastMessage for AisPosition {
    const CHANNEL: &'static str = "ais.position";
}

/// Listener that records every event into a channel.
pub struct Events {
    rx: mpsc::UnboundedReceiver<ConnectionEvent>,
}

pub fn recorder() -> (Arc<dyn ConnectionListener>, Events) {
    let (tx, rx) = mpsc::unbounded_channel();
    let listener = listener_fn(move |event| {
        let _ = tx.send(event);
    });
    (listener, Events { rx })
}

impl Events {
    pub async fn next(&mut self) -> ConnectionEvent {
        timeout(WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for a connection event")
            .expect("listener dropped")
    }

    /// Skips events until one matches.
    pub async fn wait_for<F>(&mut self, predicate: F) -> ConnectionEvent
    where
        F: Fn(&ConnectionEvent) -> bool,
    {
        loop {
            let event = self.next().await;
            if predicate(&event) {
                return event;
            }
        }
    }

    /// Events already delivered.
    pub fn drain(&mut self) -> Vec<ConnectionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Configuration with a private channel registry, so tests do not share
/// channel bindings.
pub fn configuration(id: &str) -> ClientConfiguration {
    ClientConfiguration::create_with_id(id)
        .set_host("relay-a:43234")
        .set_channel_registry(Arc::new(ChannelRegistry::new()))
}

pub async fn accept(relay: &MemoryRelay) -> MemoryPeer {
    timeout(WAIT, relay.accept())
        .await
        .expect("timed out waiting for a connection")
        .expect("relay gone")
}

/// Next client frame matching `predicate`, skipping keep-alives and others.
pub async fn expect_frame<F>(peer: &mut MemoryPeer, predicate: F) -> ClientMessage
where
    F: FnMut(&MessageType) -> bool,
{
    timeout(WAIT, peer.expect(predicate))
        .await
        .expect("timed out waiting for a client frame")
        .expect("client closed the connection")
}
