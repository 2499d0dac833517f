//! Price bar representation and series validation.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::error::EvotraderError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// |close - open|
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    /// max(high - low, |high - prev_close|, |low - prev_close|)
    pub fn true_range(&self, prev_close: Option<f64>) -> f64 {
        let hl = self.high - self.low;
        match prev_close {
            None => hl,
            Some(prev) => {
                let hc = (self.high - prev).abs();
                let lc = (self.low - prev).abs();
                hl.max(hc).max(lc)
            }
        }
    }
}

/// Rejects series the simulator cannot account for: non-finite prices,
/// inverted ranges, or timestamps that go backwards. Gaps are fine.
pub fn validate_series(bars: &[Bar]) -> Result<(), EvotraderError> {
    for (index, bar) in bars.iter().enumerate() {
        let prices = [bar.open, bar.high, bar.low, bar.close];
        if prices.iter().any(|p| !p.is_finite()) {
            return Err(EvotraderError::CorruptSeries {
                index,
                reason: "non-finite price".into(),
            });
        }
        if bar.high < bar.low {
            return Err(EvotraderError::CorruptSeries {
                index,
                reason: "high below low".into(),
            });
        }
        if index > 0 && bar.time < bars[index - 1].time {
            return Err(EvotraderError::CorruptSeries {
                index,
                reason: "timestamp earlier than previous bar".into(),
            });
        }
    }
    Ok(())
}
