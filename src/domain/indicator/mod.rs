//! Technical indicators over a bar window.
//!
//! - `IndicatorColumn`: identity of a derived column (used in diagnostics)
//! - `IndicatorParams`: what to compute
//! - `IndicatorFrame`: the bar window plus its derived columns

pub mod atr;
pub mod ema;

use std::collections::BTreeMap;
use std::fmt;

use crate::domain::ohlcv::Bar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndicatorColumn {
    Ema(usize),
    Atr,
    Impulse,
}

impl fmt::Display for IndicatorColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorColumn::Ema(period) => write!(f, "EMA_{}", period),
            IndicatorColumn::Atr => write!(f, "ATR"),
            IndicatorColumn::Impulse => write!(f, "IMPULSE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorParams {
    pub ema_periods: Vec<usize>,
    pub atr_period: usize,
    pub impulse_multiplier: f64,
}

/// A bar window augmented with EMA columns, ATR and the impulse-candle flag.
/// Owns a copy of the window; the caller's bars are never touched.
#[derive(Debug, Clone)]
pub struct IndicatorFrame {
    bars: Vec<Bar>,
    emas: BTreeMap<usize, Vec<f64>>,
    atr: Option<Vec<f64>>,
    impulse: Vec<bool>,
}

impl IndicatorFrame {
    pub fn compute(bars: &[Bar], params: &IndicatorParams) -> Self {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

        let mut emas = BTreeMap::new();
        for &period in &params.ema_periods {
            let series = ema::calculate_ema(&closes, period);
            if !series.is_empty() {
                emas.insert(period, series);
            }
        }

        let atr = Some(atr::calculate_atr(bars, params.atr_period)).filter(|s| !s.is_empty());

        let impulse = match &atr {
            Some(atr) => bars
                .iter()
                .zip(atr)
                .map(|(bar, &a)| bar.body() > params.impulse_multiplier * a)
                .collect(),
            None => vec![false; bars.len()],
        };

        IndicatorFrame {
            bars: bars.to_vec(),
            emas,
            atr,
            impulse,
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn last_bar(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn ema(&self, period: usize) -> Option<&[f64]> {
        self.emas.get(&period).map(|v| v.as_slice())
    }

    pub fn atr(&self) -> Option<&[f64]> {
        self.atr.as_deref()
    }

    pub fn last_atr(&self) -> Option<f64> {
        self.atr.as_ref().and_then(|a| a.last().copied())
    }

    pub fn is_impulse(&self, index: usize) -> bool {
        self.impulse.get(index).copied().unwrap_or(false)
    }

    pub fn has(&self, column: IndicatorColumn) -> bool {
        match column {
            IndicatorColumn::Ema(period) => self.emas.contains_key(&period),
            IndicatorColumn::Atr => self.atr.is_some(),
            IndicatorColumn::Impulse => !self.impulse.is_empty(),
        }
    }
}
