//! Channel resolution and startup discovery.

mod common;

use std::sync::Arc;
use std::thread;

use common::AisPosition;
use mcc_client::{
    BroadcastManifest, BroadcastMessage, ChannelRegistry, ClientConfiguration, ClientError,
    MemoryRelay,
};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct WeatherWarning {
    area: String,
}

impl BroadcastMessage for WeatherWarning {
    const CHANNEL: &'static str = "met.warning";
}

#[derive(Serialize, Deserialize)]
struct Blank;

impl BroadcastMessage for Blank {
    const CHANNEL: &'static str = "";
}

#[derive(Serialize, Deserialize)]
struct Spaced;

impl BroadcastMessage for Spaced {
    const CHANNEL: &'static str = "ais position";
}

#[derive(Serialize, Deserialize)]
struct Impostor;

impl BroadcastMessage for Impostor {
    const CHANNEL: &'static str = "ais.position";
}

#[test]
fn test_resolve_is_stable() {
    let registry = ChannelRegistry::new();
    let first = registry.resolve::<AisPosition>().unwrap();
    let second = registry.resolve::<AisPosition>().unwrap();

    assert_eq!(&*first, "ais.position");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_concurrent_resolution_agrees() {
    let registry = Arc::new(ChannelRegistry::new());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.resolve::<WeatherWarning>().unwrap())
        })
        .collect();

    let channels: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(channels.iter().all(|c| Arc::ptr_eq(c, &channels[0])));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_invalid_channels_are_rejected() {
    let registry = ChannelRegistry::new();

    assert!(matches!(
        registry.resolve::<Blank>(),
        Err(ClientError::InvalidMessageType { .. })
    ));
    let error = registry.resolve::<Spaced>().unwrap_err();
    match error {
        ClientError::InvalidMessageType { type_name, .. } => {
            assert!(type_name.ends_with("Spaced"));
        }
        other => panic!("Expected InvalidMessageType, got {other:?}"),
    }
    assert!(registry.is_empty());
}

#[test]
fn test_channel_conflict() {
    let registry = ChannelRegistry::new();
    registry.register::<AisPosition>().unwrap();

    let error = registry.register::<Impostor>().unwrap_err();
    assert!(matches!(error, ClientError::ChannelConflict { ref channel, .. } if channel == "ais.position"));

    // The original binding is untouched.
    let descriptor = registry.lookup("ais.position").unwrap();
    assert!(descriptor.is::<AisPosition>());
}

#[tokio::test]
async fn test_discovery_registers_before_first_send() {
    let registry = Arc::new(ChannelRegistry::new());
    let _session = ClientConfiguration::create_with_id("mmsi:1")
        .set_auto_connect(false)
        .set_channel_registry(Arc::clone(&registry))
        .set_broadcast_manifest(
            BroadcastManifest::new()
                .with::<AisPosition>()
                .with::<WeatherWarning>(),
        )
        .build(Arc::new(MemoryRelay::new()))
        .unwrap();

    let descriptor = registry.lookup("ais.position").unwrap();
    assert!(descriptor.is::<AisPosition>());
    assert_eq!(
        registry.channels(),
        vec![Arc::<str>::from("ais.position"), Arc::<str>::from("met.warning")]
    );
}

#[tokio::test]
async fn test_discovery_failure_fails_build() {
    let result = ClientConfiguration::create_with_id("mmsi:1")
        .set_auto_connect(false)
        .set_channel_registry(Arc::new(ChannelRegistry::new()))
        .set_broadcast_manifest(BroadcastManifest::new().with::<AisPosition>().with::<Impostor>())
        .build(Arc::new(MemoryRelay::new()));

    let error = result.unwrap_err();
    assert!(error.is_configuration_error());
    assert!(matches!(error, ClientError::ChannelConflict { .. }));
}

#[test]
fn test_build_requires_identity() {
    let result = ClientConfiguration::create()
        .set_channel_registry(Arc::new(ChannelRegistry::new()))
        .build(Arc::new(MemoryRelay::new()));
    assert!(matches!(result, Err(ClientError::MissingIdentity)));
}
