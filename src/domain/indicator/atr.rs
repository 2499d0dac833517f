//! Average True Range: the EMA of the True Range.

use super::ema::calculate_ema;
use crate::domain::ohlcv::Bar;

/// True Range per bar. Bar 0 has no previous close and degrades to high - low.
pub fn true_range_series(bars: &[Bar]) -> Vec<f64> {
    bars.iter()
        .enumerate()
        .map(|(i, bar)| {
            let prev_close = if i == 0 { None } else { Some(bars[i - 1].close) };
            bar.true_range(prev_close)
        })
        .collect()
}

pub fn calculate_atr(bars: &[Bar], period: usize) -> Vec<f64> {
    calculate_ema(&true_range_series(bars), period)
}
