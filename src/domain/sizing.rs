//! Position sizing and ATR-derived protective levels.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::indicator::IndicatorFrame;
use super::position::Side;

/// System-wide lot ceiling.
pub const MAX_LOT: f64 = 0.1;
pub const MIN_LOT: f64 = 0.01;
/// ATR used for stop placement when the frame carries none.
pub const FALLBACK_ATR: f64 = 0.0002;
/// Take-profit distance as a multiple of the stop's ATR distance.
pub const REWARD_RISK: f64 = 2.0;

/// Tick economics of the traded instrument.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SymbolSpec {
    pub point: f64,
    pub tick_value: f64,
    pub volume_step: f64,
    pub volume_min: f64,
    pub volume_max: f64,
}

impl Default for SymbolSpec {
    fn default() -> Self {
        SymbolSpec {
            point: 0.00001,
            tick_value: 1.0,
            volume_step: 0.01,
            volume_min: 0.01,
            volume_max: 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LotLimits {
    pub min_lot: f64,
    pub max_lot: f64,
}

impl Default for LotLimits {
    fn default() -> Self {
        LotLimits {
            min_lot: MIN_LOT,
            max_lot: MAX_LOT,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LotSize {
    Sized(f64),
    /// The stop could not be measured; the configured minimum is used.
    MinimumFallback(f64),
    /// Instrument data is unusable; no order should be placed.
    CannotSize(String),
}

impl LotSize {
    pub fn lots(&self) -> Option<f64> {
        match self {
            LotSize::Sized(lot) | LotSize::MinimumFallback(lot) => Some(*lot),
            LotSize::CannotSize(_) => None,
        }
    }
}

/// Lot such that hitting `stop_loss` loses about `capital * risk_pct / 100`.
pub fn calculate_lot(
    capital: f64,
    risk_pct: f64,
    stop_loss: f64,
    entry: f64,
    spec: &SymbolSpec,
    limits: &LotLimits,
) -> LotSize {
    if !stop_loss.is_finite() || stop_loss == 0.0 || stop_loss == entry {
        warn!(stop_loss, entry, min_lot = limits.min_lot, "invalid stop loss, using minimum lot");
        return LotSize::MinimumFallback(limits.min_lot);
    }
    if !(spec.point > 0.0) {
        return LotSize::CannotSize(format!("invalid point size {}", spec.point));
    }

    let distance_points = (entry - stop_loss).abs() / spec.point;
    if !(distance_points > 0.0) {
        warn!(distance_points, min_lot = limits.min_lot, "stop distance not positive, using minimum lot");
        return LotSize::MinimumFallback(limits.min_lot);
    }

    if !(spec.tick_value > 0.0) {
        return LotSize::CannotSize(format!("invalid tick value {}", spec.tick_value));
    }
    if !(spec.volume_step > 0.0) {
        return LotSize::CannotSize(format!("invalid volume step {}", spec.volume_step));
    }

    let risk_money = capital * risk_pct / 100.0;
    let risk_per_lot = distance_points * spec.tick_value;

    LotSize::Sized(snap_lot(risk_money / risk_per_lot, spec, limits))
}

/// Rounds a raw lot to the volume step (two decimals) and clamps it between
/// the tighter of each pair of bounds: instrument volume range and configured
/// lot limits. The floor wins when the two ranges do not overlap.
pub fn snap_lot(raw: f64, spec: &SymbolSpec, limits: &LotLimits) -> f64 {
    let snapped = if spec.volume_step > 0.0 {
        (raw / spec.volume_step).round() * spec.volume_step
    } else {
        raw
    };
    let snapped = (snapped * 100.0).round() / 100.0;
    let ceiling = spec.volume_max.min(limits.max_lot);
    let floor = spec.volume_min.max(limits.min_lot);
    snapped.min(ceiling).max(floor)
}

/// Stop-loss and take-profit from the frame's last bar and ATR. Long stops sit
/// one ATR under the low, targets two ATR above the close; shorts mirror.
pub fn dynamic_stops(frame: &IndicatorFrame, side: Side) -> Option<(f64, f64)> {
    let bar = frame.last_bar()?;
    let atr = match frame.last_atr() {
        Some(atr) => atr,
        None => {
            warn!(fallback = FALLBACK_ATR, "ATR missing, using fallback for stops");
            FALLBACK_ATR
        }
    };

    Some(match side {
        Side::Long => (bar.low - atr, bar.close + atr * REWARD_RISK),
        Side::Short => (bar.high + atr, bar.close - atr * REWARD_RISK),
    })
}
