//! MCC Core - Shared value types for the maritime cloud client
//!
//! This crate provides the immutable inputs shared between the wire
//! protocol (mcc-protocol) and the client runtime (mcc-client).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod closing;
pub mod error;
pub mod grid;
pub mod identity;
pub mod position;

// Re-exports for convenience
pub use closing::ClosingCode;
pub use error::{DomainError, DomainResult};
pub use grid::{BroadcastOptions, GridCell};
pub use identity::MaritimeId;
pub use position::PositionTime;
