//! Line framing for JSON-over-stream transports.
//!
//! One message per line, UTF-8 JSON, `\n` terminated. Lines longer than
//! [`MAX_FRAME_SIZE`] are rejected before parsing.

use crate::message::{ClientMessage, RelayMessage};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Largest accepted frame (1 MB), newline excluded.
pub const MAX_FRAME_SIZE: usize = 1_048_576;

/// Errors raised while encoding or decoding a frame.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("frame of {size} bytes exceeds limit of {max} bytes")]
    TooLarge { size: usize, max: usize },

    #[error("empty frame")]
    Empty,

    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serializes a message into a newline-terminated frame.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, FrameError> {
    let mut line = serde_json::to_string(message)?;
    if line.len() > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            size: line.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    line.push('\n');
    Ok(line)
}

fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, FrameError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(FrameError::Empty);
    }
    if trimmed.len() > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            size: trimmed.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(serde_json::from_str(trimmed)?)
}

/// Decodes a frame sent by the relay.
pub fn decode_relay_line(line: &str) -> Result<RelayMessage, FrameError> {
    decode_line(line)
}

/// Decodes a frame sent by a client (relay side and test harnesses).
pub fn decode_client_line(line: &str) -> Result<ClientMessage, FrameError> {
    decode_line(line)
}
