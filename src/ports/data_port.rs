//! Price data access port trait.

use crate::domain::error::EvotraderError;
use crate::domain::ohlcv::Bar;

pub trait DataPort {
    /// Bars ordered by time. Validation of the series is left to the caller.
    fn load_bars(&self) -> Result<Vec<Bar>, EvotraderError>;
}
