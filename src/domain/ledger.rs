//! Open-position ledger keyed by ticket.
//!
//! Owned by whoever drives execution (the broker simulator in backtests) and
//! passed around explicitly. A position lives in exactly one ledger until it
//! is removed to be closed.

use std::collections::BTreeMap;

use super::position::Position;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionLedger {
    positions: BTreeMap<u64, Position>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, position: Position) {
        self.positions.insert(position.ticket, position);
    }

    pub fn get(&self, ticket: u64) -> Option<&Position> {
        self.positions.get(&ticket)
    }

    pub fn get_mut(&mut self, ticket: u64) -> Option<&mut Position> {
        self.positions.get_mut(&ticket)
    }

    pub fn contains(&self, ticket: u64) -> bool {
        self.positions.contains_key(&ticket)
    }

    pub fn remove(&mut self, ticket: u64) -> Option<Position> {
        self.positions.remove(&ticket)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Tickets in ascending (opening) order.
    pub fn tickets(&self) -> Vec<u64> {
        self.positions.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Position> {
        self.positions.values_mut()
    }

    pub fn count_for(&self, strategy: &str) -> usize {
        self.positions
            .values()
            .filter(|p| p.strategy == strategy)
            .count()
    }
}
