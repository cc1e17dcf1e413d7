//! MCC Protocol - Message model for relay communication
//!
//! This crate provides the messages exchanged between maritime cloud
//! clients and the relay, plus line framing used by stream transports.

pub mod message;
pub mod parse;
pub mod version;

pub use message::{ClientMessage, FaultCode, MessageType, RelayMessage, ServiceFault};
pub use parse::{decode_client_line, decode_relay_line, encode_line, FrameError, MAX_FRAME_SIZE};
pub use version::{ProtocolVersion, VersionError};
