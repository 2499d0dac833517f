//! Strategy configuration and its typed, resolved form.
//!
//! `StrategyConfig` is the loose record the search engines copy and mutate:
//! a name, a kind, scalar parameters and the optimizable ranges. Before a run
//! it is resolved into a `Strategy`, whose `StrategyRule` is a closed enum the
//! signal engine matches exhaustively.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::domain::error::EvotraderError;
use crate::domain::indicator::IndicatorParams;

pub const DEFAULT_ATR_PERIOD: usize = 14;
pub const DEFAULT_IMPULSE_MULTIPLIER: f64 = 2.0;

/// Decimal places kept when generating real-valued grid points.
const FLOAT_GRID_DECIMALS: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            ParamValue::Int(v) => Some(v as f64),
            ParamValue::Float(v) => Some(v),
            ParamValue::Bool(_) => None,
        }
    }

    /// Integer-valued parameters only; a float with a fractional part is rejected.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            ParamValue::Int(v) => Some(v),
            ParamValue::Float(v) if v.fract() == 0.0 => Some(v as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            ParamValue::Bool(b) => Some(b),
            ParamValue::Int(v) => Some(v != 0),
            ParamValue::Float(_) => None,
        }
    }

    /// Parses an INI scalar: bool words, then integer, then real.
    pub fn parse(raw: &str) -> Option<ParamValue> {
        let raw = raw.trim();
        match raw.to_lowercase().as_str() {
            "true" | "yes" => return Some(ParamValue::Bool(true)),
            "false" | "no" => return Some(ParamValue::Bool(false)),
            _ => {}
        }
        if let Ok(v) = raw.parse::<i64>() {
            return Some(ParamValue::Int(v));
        }
        raw.parse::<f64>().ok().map(ParamValue::Float)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
        }
    }
}

/// Declared search range of an optimizable parameter. The bound types decide
/// whether candidates come from an integer grid or a rounded real grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamRange {
    Int { min: i64, max: i64, step: i64 },
    Float { min: f64, max: f64, step: f64 },
}

impl ParamRange {
    pub fn is_valid(&self) -> bool {
        match *self {
            ParamRange::Int { min, max, step } => step > 0 && max >= min,
            ParamRange::Float { min, max, step } => {
                step > 0.0 && step.is_finite() && max >= min && min.is_finite() && max.is_finite()
            }
        }
    }

    /// Number of points on the grid, never less than one. Grids wider than
    /// `usize` saturate; their upper points are then unreachable by index.
    pub fn grid_len(&self) -> usize {
        match *self {
            ParamRange::Int { min, max, step } if step > 0 && max >= min => {
                let steps = (max as i128 - min as i128) / step as i128;
                usize::try_from(steps).map_or(usize::MAX, |n| n.saturating_add(1))
            }
            ParamRange::Float { min, max, step } if step > 0.0 && max >= min => {
                // float-to-int casts saturate, and NaN becomes 0
                let steps = ((max - min) / step + 1e-9).floor() as usize;
                steps.saturating_add(1)
            }
            _ => 1,
        }
    }

    pub fn value_at(&self, index: usize) -> ParamValue {
        let index = index.min(self.grid_len() - 1);
        match *self {
            _ if index == 0 => self.first(),
            ParamRange::Int { min, max, step } => {
                let v = min as i128 + index as i128 * step.max(1) as i128;
                ParamValue::Int(v.min(max as i128) as i64)
            }
            ParamRange::Float { min, max, step } => {
                let v = round_grid(min + index as f64 * step);
                ParamValue::Float(if v.is_finite() { v.clamp(min, max.max(min)) } else { max })
            }
        }
    }

    fn first(&self) -> ParamValue {
        match *self {
            ParamRange::Int { min, .. } => ParamValue::Int(min),
            ParamRange::Float { min, .. } => ParamValue::Float(min),
        }
    }

    pub fn min_value(&self) -> ParamValue {
        self.value_at(0)
    }

    pub fn random_value<R: Rng + ?Sized>(&self, rng: &mut R) -> ParamValue {
        self.value_at(rng.gen_range(0..self.grid_len()))
    }

    fn grid_index(&self, value: &ParamValue) -> usize {
        let Some(v) = value.as_f64() else {
            return 0;
        };
        let (min, step) = match *self {
            ParamRange::Int { min, step, .. } => (min as f64, step.max(1) as f64),
            ParamRange::Float { min, step, .. } => (min, step),
        };
        let raw = ((v - min) / step).round();
        if raw.is_nan() || raw <= 0.0 {
            0
        } else {
            (raw as usize).min(self.grid_len() - 1)
        }
    }

    /// Snaps a value onto the grid and inside [min, max].
    pub fn clamp(&self, value: &ParamValue) -> ParamValue {
        self.value_at(self.grid_index(value))
    }

    /// Moves one grid step in `direction` (-1 or +1), stopping at the bounds.
    pub fn step_from(&self, value: &ParamValue, direction: i64) -> ParamValue {
        let index = self.grid_index(value);
        let index = if direction < 0 {
            index.saturating_sub(1)
        } else if direction > 0 {
            index.saturating_add(1)
        } else {
            index
        };
        self.value_at(index)
    }

    pub fn contains(&self, value: &ParamValue) -> bool {
        *value == self.clamp(value)
    }
}

fn round_grid(v: f64) -> f64 {
    let scale = 10f64.powi(FLOAT_GRID_DECIMALS);
    let scaled = v * scale;
    if !scaled.is_finite() {
        return v;
    }
    scaled.round() / scale
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Dual EMA crossover confirmed by an impulse candle on the same bar.
    EmaCrossImpulse,
    /// Close breaks through a single EMA on an impulse candle.
    EmaBreakout,
    /// Close crosses back through an EMA, optionally with a trend filter.
    MeanReversion,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyKind::EmaCrossImpulse => "ema_cross_impulse",
            StrategyKind::EmaBreakout => "ema_breakout",
            StrategyKind::MeanReversion => "mean_reversion",
        };
        write!(f, "{s}")
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ema_cross_impulse" => Ok(StrategyKind::EmaCrossImpulse),
            "ema_breakout" => Ok(StrategyKind::EmaBreakout),
            "mean_reversion" => Ok(StrategyKind::MeanReversion),
            other => Err(format!("unknown strategy kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    pub kind: StrategyKind,
    pub params: BTreeMap<String, ParamValue>,
    pub optimizable_params: BTreeMap<String, ParamRange>,
}

impl StrategyConfig {
    pub fn new(name: impl Into<String>, kind: StrategyKind) -> Self {
        StrategyConfig {
            name: name.into(),
            kind,
            params: BTreeMap::new(),
            optimizable_params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: ParamValue) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }

    pub fn with_range(mut self, key: &str, range: ParamRange) -> Self {
        self.optimizable_params.insert(key.to_string(), range);
        self
    }

    pub fn get(&self, key: &str) -> Option<ParamValue> {
        self.params.get(key).copied()
    }

    /// A copy with `values` written over the matching parameters.
    pub fn merged(&self, values: &BTreeMap<String, ParamValue>) -> StrategyConfig {
        let mut merged = self.clone();
        for (key, value) in values {
            merged.params.insert(key.clone(), *value);
        }
        merged
    }

    /// Current values of the optimizable parameters, keyed like the ranges.
    pub fn optimizable_values(&self) -> BTreeMap<String, ParamValue> {
        self.optimizable_params
            .keys()
            .filter_map(|key| self.get(key).map(|v| (key.clone(), v)))
            .collect()
    }

    /// Gives every optimizable parameter that has no value its range minimum.
    pub fn seed_unset_params(&mut self) {
        for (key, range) in &self.optimizable_params {
            self.params
                .entry(key.clone())
                .or_insert_with(|| range.min_value());
        }
    }

    pub fn resolve(&self) -> Result<Strategy, EvotraderError> {
        let rule = match self.kind {
            StrategyKind::EmaCrossImpulse => StrategyRule::EmaCrossImpulse(EmaCrossParams {
                fast_period: self.period("ema_fast", 9)?,
                slow_period: self.period("ema_slow", 20)?,
            }),
            StrategyKind::EmaBreakout => StrategyRule::EmaBreakout(EmaBreakoutParams {
                period: self.period("ema_breakout", 20)?,
            }),
            StrategyKind::MeanReversion => {
                let use_trend = match self.get("use_trend_filter") {
                    None => false,
                    Some(v) => v.as_bool().ok_or_else(|| self.invalid("use_trend_filter", "expected a boolean"))?,
                };
                StrategyRule::MeanReversion(MeanReversionParams {
                    reversion_period: self.period("ema_reversion", 20)?,
                    trend_period: if use_trend {
                        Some(self.period("ema_trend", 200)?)
                    } else {
                        None
                    },
                })
            }
        };

        let impulse_multiplier = match self.get("impulse_multiplier") {
            None => DEFAULT_IMPULSE_MULTIPLIER,
            Some(v) => v
                .as_f64()
                .filter(|m| m.is_finite() && *m >= 0.0)
                .ok_or_else(|| self.invalid("impulse_multiplier", "expected a non-negative number"))?,
        };

        Ok(Strategy {
            name: self.name.clone(),
            rule,
            atr_period: self.period("atr_period", DEFAULT_ATR_PERIOD)?,
            impulse_multiplier,
        })
    }

    fn period(&self, key: &str, default: usize) -> Result<usize, EvotraderError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v
                .as_i64()
                .filter(|p| *p > 0)
                .map(|p| p as usize)
                .ok_or_else(|| self.invalid(key, "expected a positive integer period")),
        }
    }

    fn invalid(&self, key: &str, reason: &str) -> EvotraderError {
        EvotraderError::ConfigInvalid {
            section: "strategy".to_string(),
            key: key.to_string(),
            reason: format!("{} ({})", reason, self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmaCrossParams {
    pub fast_period: usize,
    pub slow_period: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmaBreakoutParams {
    pub period: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeanReversionParams {
    pub reversion_period: usize,
    pub trend_period: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyRule {
    EmaCrossImpulse(EmaCrossParams),
    EmaBreakout(EmaBreakoutParams),
    MeanReversion(MeanReversionParams),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
    pub name: String,
    pub rule: StrategyRule,
    pub atr_period: usize,
    pub impulse_multiplier: f64,
}

impl Strategy {
    pub fn ema_periods(&self) -> Vec<usize> {
        match self.rule {
            StrategyRule::EmaCrossImpulse(p) => vec![p.fast_period, p.slow_period],
            StrategyRule::EmaBreakout(p) => vec![p.period],
            StrategyRule::MeanReversion(p) => match p.trend_period {
                Some(trend) => vec![p.reversion_period, trend],
                None => vec![p.reversion_period],
            },
        }
    }

    /// Bars needed before the rule can be evaluated meaningfully.
    pub fn required_bars(&self) -> usize {
        self.ema_periods().into_iter().max().unwrap_or(20).max(2)
    }

    pub fn indicator_params(&self) -> IndicatorParams {
        IndicatorParams {
            ema_periods: self.ema_periods(),
            atr_period: self.atr_period,
            impulse_multiplier: self.impulse_multiplier,
        }
    }
}
