//! Protocol message types for relay communication.

use crate::version::ProtocolVersion;
use mcc_core::{BroadcastOptions, ClosingCode, MaritimeId, PositionTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message types that can be sent by clients to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// Opens the logical session
    Hello {
        /// Identity of the connecting actor
        identity: MaritimeId,
        /// Where the actor is right now
        position: PositionTime,
    },

    /// Liveness signal
    KeepAlive {
        /// Sequence number echoed by the relay's ack
        seq: u64,
        position: PositionTime,
    },

    /// Publish a broadcast on a channel
    Broadcast {
        /// Client-local id used to correlate acks
        message_id: u64,
        channel: String,
        position: PositionTime,
        options: BroadcastOptions,
        payload: serde_json::Value,
    },

    /// Acknowledge a received broadcast
    BroadcastAck {
        /// Id assigned by the sender
        message_id: u64,
        /// Actor that sent the broadcast
        sender: MaritimeId,
        position: PositionTime,
    },

    /// Offer a service to remote actors
    RegisterService {
        service: String,
    },

    /// Withdraw a previously offered service
    UnregisterService {
        service: String,
    },

    /// Invoke a service offered by another actor
    Invoke {
        invocation_id: u64,
        /// Actor offering the service
        target: MaritimeId,
        service: String,
        message_name: String,
        payload: serde_json::Value,
    },

    /// Successful reply to an invocation received from the relay
    InvocationResult {
        invocation_id: u64,
        /// Actor that issued the invocation
        caller: MaritimeId,
        payload: serde_json::Value,
    },

    /// Failed reply to an invocation received from the relay
    InvocationFault {
        invocation_id: u64,
        caller: MaritimeId,
        fault: ServiceFault,
    },

    /// Client is closing the session
    Close {
        code: ClosingCode,
    },
}

/// Messages sent from client to relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Protocol version
    pub protocol_version: ProtocolVersion,

    /// Message payload
    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    /// Creates a new client message with current protocol version.
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    /// Creates a hello message.
    pub fn hello(identity: MaritimeId, position: PositionTime) -> Self {
        Self::new(MessageType::Hello { identity, position })
    }

    /// Creates a keep-alive message.
    pub fn keep_alive(seq: u64, position: PositionTime) -> Self {
        Self::new(MessageType::KeepAlive { seq, position })
    }

    /// Creates a broadcast message.
    pub fn broadcast(
        message_id: u64,
        channel: impl Into<String>,
        position: PositionTime,
        options: BroadcastOptions,
        payload: serde_json::Value,
    ) -> Self {
        Self::new(MessageType::Broadcast {
            message_id,
            channel: channel.into(),
            position,
            options,
            payload,
        })
    }

    /// Creates a broadcast acknowledgment.
    pub fn broadcast_ack(message_id: u64, sender: MaritimeId, position: PositionTime) -> Self {
        Self::new(MessageType::BroadcastAck {
            message_id,
            sender,
            position,
        })
    }

    /// Creates a service registration request.
    pub fn register_service(service: impl Into<String>) -> Self {
        Self::new(MessageType::RegisterService {
            service: service.into(),
        })
    }

    /// Creates a service withdrawal.
    pub fn unregister_service(service: impl Into<String>) -> Self {
        Self::new(MessageType::UnregisterService {
            service: service.into(),
        })
    }

    /// Creates an outgoing invocation.
    pub fn invoke(
        invocation_id: u64,
        target: MaritimeId,
        service: impl Into<String>,
        message_name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self::new(MessageType::Invoke {
            invocation_id,
            target,
            service: service.into(),
            message_name: message_name.into(),
            payload,
        })
    }

    /// Creates a successful invocation reply.
    pub fn invocation_result(
        invocation_id: u64,
        caller: MaritimeId,
        payload: serde_json::Value,
    ) -> Self {
        Self::new(MessageType::InvocationResult {
            invocation_id,
            caller,
            payload,
        })
    }

    /// Creates a failed invocation reply.
    pub fn invocation_fault(invocation_id: u64, caller: MaritimeId, fault: ServiceFault) -> Self {
        Self::new(MessageType::InvocationFault {
            invocation_id,
            caller,
            fault,
        })
    }

    /// Creates a close message.
    pub fn close(code: ClosingCode) -> Self {
        Self::new(MessageType::Close { code })
    }
}

/// Messages sent from the relay to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    /// Session accepted
    Welcome {
        /// Relay's protocol version
        protocol_version: ProtocolVersion,
        /// Relay-assigned session id
        session_id: String,
    },

    /// Reply to a keep-alive
    KeepAliveAck {
        seq: u64,
    },

    /// A broadcast published by another actor
    Broadcast {
        message_id: u64,
        channel: String,
        sender: MaritimeId,
        position: PositionTime,
        /// Sender asked for an acknowledgment
        #[serde(default)]
        ack_requested: bool,
        payload: serde_json::Value,
    },

    /// A receiver acknowledged one of our broadcasts
    BroadcastAck {
        message_id: u64,
        receiver: MaritimeId,
        position: PositionTime,
    },

    /// The relay accepted a service registration
    ServiceRegistered {
        service: String,
    },

    /// The relay withdrew a service registration
    ServiceUnregistered {
        service: String,
    },

    /// A remote actor invokes one of our services
    Invoke {
        invocation_id: u64,
        caller: MaritimeId,
        service: String,
        message_name: String,
        payload: serde_json::Value,
    },

    /// Reply to one of our invocations
    InvocationResult {
        invocation_id: u64,
        payload: serde_json::Value,
    },

    /// Our invocation failed
    InvocationFault {
        invocation_id: u64,
        fault: ServiceFault,
    },

    /// The relay is closing the connection
    Closing {
        code: ClosingCode,
    },
}

impl RelayMessage {
    /// Creates a welcome message.
    pub fn welcome(session_id: impl Into<String>) -> Self {
        Self::Welcome {
            protocol_version: ProtocolVersion::CURRENT,
            session_id: session_id.into(),
        }
    }

    /// Creates a keep-alive ack.
    pub fn keep_alive_ack(seq: u64) -> Self {
        Self::KeepAliveAck { seq }
    }

    /// Creates a registration ack.
    pub fn service_registered(service: impl Into<String>) -> Self {
        Self::ServiceRegistered {
            service: service.into(),
        }
    }

    /// Creates a closing notice.
    pub fn closing(code: ClosingCode) -> Self {
        Self::Closing { code }
    }

    /// Short name of the message kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::KeepAliveAck { .. } => "keep_alive_ack",
            Self::Broadcast { .. } => "broadcast",
            Self::BroadcastAck { .. } => "broadcast_ack",
            Self::ServiceRegistered { .. } => "service_registered",
            Self::ServiceUnregistered { .. } => "service_unregistered",
            Self::Invoke { .. } => "invoke",
            Self::InvocationResult { .. } => "invocation_result",
            Self::InvocationFault { .. } => "invocation_fault",
            Self::Closing { .. } => "closing",
        }
    }
}

// ============================================================================
// Service Faults
// ============================================================================

/// Why an invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCode {
    /// The service is not offered (never registered, or cancelled)
    ServiceUnavailable,
    /// The request payload could not be decoded
    BadRequest,
    /// The handler ran and reported an error
    HandlerFailed,
}

/// Failure reply to an invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceFault {
    pub code: FaultCode,
    pub message: String,
}

impl ServiceFault {
    pub fn new(code: FaultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Fault for an invocation on a service that is not offered.
    pub fn service_unavailable(service: &str) -> Self {
        Self::new(
            FaultCode::ServiceUnavailable,
            format!("service {service} is not available"),
        )
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(FaultCode::BadRequest, message)
    }

    pub fn handler_failed(message: impl Into<String>) -> Self {
        Self::new(FaultCode::HandlerFailed, message)
    }

    pub fn is_service_unavailable(&self) -> bool {
        self.code == FaultCode::ServiceUnavailable
    }
}

impl fmt::Display for ServiceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for ServiceFault {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_serialization() {
        let msg = ClientMessage::keep_alive(42, PositionTime::zero());
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"keep_alive\""));
        assert!(json.contains("\"seq\":42"));
        assert!(json.contains("\"protocol_version\""));
    }

    #[test]
    fn test_relay_message_serialization() {
        let msg = RelayMessage::welcome("relay-7");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"welcome\""));
        assert!(json.contains("\"session_id\":\"relay-7\""));
    }

    #[test]
    fn test_broadcast_from_relay_defaults_ack_flag() {
        let json = serde_json::json!({
            "type": "broadcast",
            "message_id": 9,
            "channel": "ais.position",
            "sender": "mmsi:1",
            "position": PositionTime::zero(),
            "payload": {"sog": 12.5}
        });
        let parsed: RelayMessage = serde_json::from_value(json).unwrap();
        match parsed {
            RelayMessage::Broadcast {
                channel,
                ack_requested,
                ..
            } => {
                assert_eq!(channel, "ais.position");
                assert!(!ack_requested);
            }
            other => panic!("Expected Broadcast, got {other:?}"),
        }
    }

    #[test]
    fn test_closing_carries_code() {
        let json = serde_json::to_string(&RelayMessage::closing(ClosingCode::DUPLICATE_CONNECT))
            .unwrap();
        assert!(json.contains("\"id\":4012"));
        let parsed: RelayMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind(), "closing");
    }

    #[test]
    fn test_fault_display() {
        let fault = ServiceFault::service_unavailable("imo.pilotage");
        assert!(fault.is_service_unavailable());
        assert!(fault.to_string().contains("imo.pilotage"));
    }
}
