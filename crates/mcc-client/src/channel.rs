//! Broadcast channel registry.
//!
//! Maps broadcast message types to the channel they are published on, and
//! channel names back to the locally known type so inbound broadcasts can be
//! decoded.
//!
//! # Concurrency
//!
//! The mapping lives in an immutable [`Snapshot`] behind an [`ArcSwap`].
//! Lookups are lock-free loads; registrations build a new snapshot and swap
//! it in with read-copy-update, so a reader never observes a half-applied
//! registration. One registry is typically shared by every session in the
//! process ([`ChannelRegistry::shared`]).

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{ClientError, Result};

/// A message that can be broadcast.
///
/// Every implementation names the channel it is sent on:
///
/// ```
/// use mcc_client::BroadcastMessage;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct PositionReport {
///     sog: f64,
///     cog: f64,
/// }
///
/// impl BroadcastMessage for PositionReport {
///     const CHANNEL: &'static str = "ais.position";
/// }
/// ```
///
/// The identifier is validated when the type is registered (see
/// [`validate_identifier`]); a malformed channel is a configuration error,
/// never a send-time failure.
pub trait BroadcastMessage: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Channel the message is published on.
    const CHANNEL: &'static str;
}

/// Checks a channel or service identifier.
///
/// Identifiers are non-empty, contain no whitespace or control characters,
/// and have no empty dot-separated segment (`ais..position`, `.ais`).
pub fn validate_identifier(identifier: &str) -> std::result::Result<(), String> {
    if identifier.is_empty() {
        return Err("identifier is empty".to_string());
    }
    if identifier
        .chars()
        .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(format!(
            "identifier {identifier:?} contains whitespace or control characters"
        ));
    }
    if identifier.split('.').any(str::is_empty) {
        return Err(format!("identifier {identifier:?} has an empty segment"));
    }
    Ok(())
}

// ============================================================================
// Channel Descriptor
// ============================================================================

/// Binding between a channel name and a broadcast message type.
#[derive(Clone)]
pub struct ChannelDescriptor {
    channel: Arc<str>,
    type_id: TypeId,
    type_name: &'static str,
}

impl ChannelDescriptor {
    /// Builds the descriptor for `T`, validating its channel identifier.
    ///
    /// # Errors
    ///
    /// `ClientError::InvalidMessageType` if `T::CHANNEL` is malformed.
    pub fn of<T: BroadcastMessage>() -> Result<Self> {
        validate_identifier(T::CHANNEL).map_err(|reason| ClientError::InvalidMessageType {
            type_name: type_name::<T>().to_string(),
            reason,
        })?;

        Ok(Self {
            channel: Arc::from(T::CHANNEL),
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        })
    }

    pub fn channel(&self) -> &Arc<str> {
        &self.channel
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns true if this descriptor belongs to `T`.
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl fmt::Debug for ChannelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelDescriptor")
            .field("channel", &self.channel)
            .field("type_name", &self.type_name)
            .finish()
    }
}

// ============================================================================
// Broadcast Manifest
// ============================================================================

type DescriptorFn = fn() -> Result<ChannelDescriptor>;

/// Static list of the broadcast types known to the application.
///
/// Handed to the configuration so the registry is pre-populated when a
/// session starts; inbound broadcasts of a listed type can then be decoded
/// before this process ever sent one.
#[derive(Clone, Default)]
pub struct BroadcastManifest {
    entries: Vec<DescriptorFn>,
}

impl BroadcastManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a message type. Validation happens at discovery time.
    #[must_use]
    pub fn with<T: BroadcastMessage>(mut self) -> Self {
        self.entries.push(ChannelDescriptor::of::<T>);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for BroadcastManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastManifest")
            .field("entries", &self.entries.len())
            .finish()
    }
}

// ============================================================================
// Channel Registry
// ============================================================================

#[derive(Clone, Default)]
struct Snapshot {
    by_type: HashMap<TypeId, ChannelDescriptor>,
    by_channel: HashMap<Arc<str>, ChannelDescriptor>,
}

/// Process-wide registry of broadcast channels.
pub struct ChannelRegistry {
    snapshot: ArcSwap<Snapshot>,
}

impl ChannelRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
        }
    }

    /// Returns the registry shared by every session in this process.
    pub fn shared() -> Arc<ChannelRegistry> {
        static SHARED: OnceLock<Arc<ChannelRegistry>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(ChannelRegistry::new())))
    }

    /// Registers `T`. Registering the same type again is a no-op.
    ///
    /// # Errors
    ///
    /// - `ClientError::InvalidMessageType` if `T::CHANNEL` is malformed
    /// - `ClientError::ChannelConflict` if another type owns the channel
    pub fn register<T: BroadcastMessage>(&self) -> Result<ChannelDescriptor> {
        if let Some(existing) = self.snapshot.load().by_type.get(&TypeId::of::<T>()) {
            return Ok(existing.clone());
        }
        self.register_descriptor(ChannelDescriptor::of::<T>()?)
    }

    /// Registers an already validated descriptor.
    pub fn register_descriptor(&self, descriptor: ChannelDescriptor) -> Result<ChannelDescriptor> {
        let mut outcome: Result<ChannelDescriptor> = Ok(descriptor.clone());

        self.snapshot.rcu(|current| {
            if let Some(existing) = current.by_type.get(&descriptor.type_id) {
                outcome = Ok(existing.clone());
                return Arc::clone(current);
            }
            if let Some(existing) = current.by_channel.get(&descriptor.channel) {
                outcome = Err(ClientError::ChannelConflict {
                    channel: descriptor.channel.to_string(),
                    existing: existing.type_name.to_string(),
                });
                return Arc::clone(current);
            }

            let mut next = Snapshot::clone(current);
            next.by_type.insert(descriptor.type_id, descriptor.clone());
            next.by_channel
                .insert(Arc::clone(&descriptor.channel), descriptor.clone());
            outcome = Ok(descriptor.clone());
            Arc::new(next)
        });

        if let Ok(registered) = &outcome {
            debug!(
                channel = %registered.channel,
                message_type = registered.type_name,
                "Broadcast channel registered"
            );
        }
        outcome
    }

    /// Returns the channel of `T`, registering it on first use.
    ///
    /// Repeated calls return the same `Arc<str>`.
    pub fn resolve<T: BroadcastMessage>(&self) -> Result<Arc<str>> {
        self.register::<T>()
            .map(|descriptor| Arc::clone(&descriptor.channel))
    }

    /// Looks up the type registered for a channel.
    pub fn lookup(&self, channel: &str) -> Option<ChannelDescriptor> {
        self.snapshot.load().by_channel.get(channel).cloned()
    }

    /// Registers every type in the manifest; returns how many were new.
    ///
    /// Stops at the first invalid or conflicting entry.
    pub fn discover(&self, manifest: &BroadcastManifest) -> Result<usize> {
        let before = self.len();
        for entry in &manifest.entries {
            self.register_descriptor(entry()?)?;
        }
        Ok(self.len().saturating_sub(before))
    }

    /// Registered channel names, sorted.
    pub fn channels(&self) -> Vec<Arc<str>> {
        let mut channels: Vec<Arc<str>> = self
            .snapshot
            .load()
            .by_channel
            .keys()
            .cloned()
            .collect();
        channels.sort();
        channels
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.channels())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize)]
    struct Weather;
    impl BroadcastMessage for Weather {
        const CHANNEL: &'static str = "met.weather";
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("ais.position").is_ok());
        assert!(validate_identifier("imo-pilotage_v2").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("ais position").is_err());
        assert!(validate_identifier("ais..position").is_err());
        assert!(validate_identifier(".ais").is_err());
        assert!(validate_identifier("ais\u{7}").is_err());
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = ChannelRegistry::new();
        let first = registry.register::<Weather>().unwrap();
        let second = registry.register::<Weather>().unwrap();
        assert!(Arc::ptr_eq(first.channel(), second.channel()));
        assert_eq!(registry.len(), 1);
        assert!(first.is::<Weather>());
    }

    #[test]
    fn test_lookup_unknown_channel() {
        let registry = ChannelRegistry::new();
        assert!(registry.lookup("met.weather").is_none());
        registry.register::<Weather>().unwrap();
        assert!(registry.lookup("met.weather").is_some());
    }

    #[test]
    fn test_shared_registry_is_singleton() {
        assert!(Arc::ptr_eq(
            &ChannelRegistry::shared(),
            &ChannelRegistry::shared()
        ));
    }
}
