//! Spatial grid cells and broadcast scope.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Opaque identifier of a spatial grid cell.
///
/// The client never interprets the id; it only needs equality, hashing and
/// an ordering to keep cell sets deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GridCell(u64);

impl GridCell {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }

    /// The low 32 bits of the id, as used by legacy cell tables.
    pub fn cell_id(&self) -> i32 {
        self.0 as i32
    }
}

impl fmt::Display for GridCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell:{}", self.0)
    }
}

/// Delivery options for an outgoing broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastOptions {
    /// Receivers further away than this many metres are skipped.
    /// `None` delivers to every subscriber.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius_meters: Option<u32>,

    /// Restricts delivery to actors located in these cells. Empty = no restriction.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub cells: BTreeSet<GridCell>,

    /// Ask receivers to acknowledge the broadcast.
    #[serde(default)]
    pub receiver_ack: bool,
}

impl BroadcastOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_radius(mut self, meters: u32) -> Self {
        self.radius_meters = Some(meters);
        self
    }

    #[must_use]
    pub fn with_cell(mut self, cell: GridCell) -> Self {
        self.cells.insert(cell);
        self
    }

    #[must_use]
    pub fn with_receiver_ack(mut self, receiver_ack: bool) -> Self {
        self.receiver_ack = receiver_ack;
        self
    }

    /// Returns true if delivery is limited by radius or cells.
    pub fn is_scoped(&self) -> bool {
        self.radius_meters.is_some() || !self.cells.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cells_are_ordered_and_deduplicated() {
        let options = BroadcastOptions::new()
            .with_cell(GridCell::new(42))
            .with_cell(GridCell::new(7))
            .with_cell(GridCell::new(42));
        let ids: Vec<u64> = options.cells.iter().map(GridCell::id).collect();
        assert_eq!(ids, vec![7, 42]);
        assert!(options.is_scoped());
    }

    #[test]
    fn test_cell_id_truncates() {
        let cell = GridCell::new((1u64 << 32) + 5);
        assert_eq!(cell.cell_id(), 5);
        assert_ne!(cell, GridCell::new(5));
    }

    #[test]
    fn test_default_options_omit_scope() {
        let json = serde_json::to_value(BroadcastOptions::default()).unwrap();
        assert_eq!(json, serde_json::json!({"receiver_ack": false}));
        assert!(!BroadcastOptions::default().is_scoped());
    }
}
