//! Closed-trade history port, used to rebuild the risk state on startup.

use crate::domain::error::EvotraderError;
use crate::domain::risk::TradeRecord;

pub trait TradeLogPort {
    /// Every recorded trade. An absent log is an empty history.
    fn load_trades(&self) -> Result<Vec<TradeRecord>, EvotraderError>;

    fn append(&self, trades: &[TradeRecord]) -> Result<(), EvotraderError>;
}
