//! In-trade stop management: break-even and ATR trailing stops.

use serde::{Deserialize, Serialize};

use super::position::{Position, Side};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopManager {
    pub break_even: bool,
    pub trailing: bool,
    /// Profit, in ATR multiples, needed before the stop moves to entry.
    pub break_even_factor: f64,
    /// Distance, in ATR multiples, the trailing stop keeps from the price.
    pub trailing_factor: f64,
}

impl Default for StopManager {
    fn default() -> Self {
        StopManager {
            break_even: false,
            trailing: false,
            break_even_factor: 0.5,
            trailing_factor: 1.0,
        }
    }
}

impl StopManager {
    pub fn is_active(&self) -> bool {
        self.break_even || self.trailing
    }

    /// Suggested stop for a position at `price`. Never looser than `current`.
    pub fn update_stop(&self, side: Side, entry: f64, current: f64, price: f64, atr: f64) -> f64 {
        let gain = (price - entry) * side.direction();
        let mut stop = current;

        if self.break_even && gain >= self.break_even_factor * atr {
            let behind_entry = match side {
                Side::Long => stop < entry,
                Side::Short => stop > entry,
            };
            if behind_entry {
                stop = entry;
            }
        }

        if self.trailing {
            let distance = self.trailing_factor * atr;
            stop = match side {
                Side::Long => stop.max(price - distance),
                Side::Short => stop.min(price + distance),
            };
        }

        stop
    }

    /// Applies `update_stop` to a position in place. Returns true if it moved.
    pub fn apply(&self, position: &mut Position, price: f64, atr: f64) -> bool {
        let next = self.update_stop(position.side, position.entry_price, position.stop_loss, price, atr);
        let moved = next != position.stop_loss;
        position.stop_loss = next;
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn both() -> StopManager {
        StopManager {
            break_even: true,
            trailing: true,
            ..StopManager::default()
        }
    }

    #[test]
    fn disabled_by_default() {
        let m = StopManager::default();
        assert!(!m.is_active());
        assert_eq!(m.update_stop(Side::Long, 100.0, 95.0, 120.0, 2.0), 95.0);
    }

    #[test]
    fn break_even_moves_to_entry() {
        let m = StopManager {
            break_even: true,
            ..StopManager::default()
        };
        assert_eq!(m.update_stop(Side::Long, 100.0, 95.0, 101.0, 2.0), 100.0);
        // not enough profit yet
        assert_eq!(m.update_stop(Side::Long, 100.0, 95.0, 100.5, 2.0), 95.0);
        assert_eq!(m.update_stop(Side::Short, 100.0, 105.0, 99.0, 2.0), 100.0);
    }

    #[test]
    fn trailing_follows_price() {
        let m = both();
        assert_eq!(m.update_stop(Side::Long, 100.0, 95.0, 112.0, 2.0), 110.0);
        assert_eq!(m.update_stop(Side::Short, 100.0, 105.0, 90.0, 2.0), 92.0);
    }

    #[test]
    fn trailing_never_loosens() {
        let m = both();
        assert_eq!(m.update_stop(Side::Long, 100.0, 110.0, 105.0, 2.0), 110.0);
        assert_eq!(m.update_stop(Side::Short, 100.0, 92.0, 96.0, 2.0), 92.0);
    }
}
