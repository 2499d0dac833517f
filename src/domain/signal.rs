//! Signal engine: indicator state + strategy rule -> trade decision.
//!
//! Total over its inputs. Missing columns and short history come back as
//! `Signal::None` with a reason, never as an error.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::indicator::{IndicatorColumn, IndicatorFrame};
use crate::domain::strategy::{
    EmaBreakoutParams, EmaCrossParams, MeanReversionParams, Strategy, StrategyRule,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Buy,
    Sell,
    None,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Buy => write!(f, "buy"),
            Signal::Sell => write!(f, "sell"),
            Signal::None => write!(f, "none"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalDecision {
    pub signal: Signal,
    pub reason: String,
}

impl SignalDecision {
    fn buy(reason: String) -> Self {
        SignalDecision {
            signal: Signal::Buy,
            reason,
        }
    }

    fn sell(reason: String) -> Self {
        SignalDecision {
            signal: Signal::Sell,
            reason,
        }
    }

    fn none(reason: impl Into<String>) -> Self {
        SignalDecision {
            signal: Signal::None,
            reason: reason.into(),
        }
    }
}

/// Direction in which series `a` crossed series `b` between the last two bars.
/// Strict on both sides: touching on either bar is not a cross.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cross {
    Up,
    Down,
    Neither,
}

fn cross(a_prev: f64, a_last: f64, b_prev: f64, b_last: f64) -> Cross {
    if a_prev < b_prev && a_last > b_last {
        Cross::Up
    } else if a_prev > b_prev && a_last < b_last {
        Cross::Down
    } else {
        Cross::Neither
    }
}

/// Last two values of a column, or a reason why they are unavailable.
fn last_two(frame: &IndicatorFrame, period: usize) -> Result<(f64, f64), SignalDecision> {
    match frame.ema(period) {
        Some(series) if series.len() >= 2 => Ok((series[series.len() - 2], series[series.len() - 1])),
        _ => Err(SignalDecision::none(format!(
            "missing indicator column {}",
            IndicatorColumn::Ema(period)
        ))),
    }
}

pub fn evaluate(frame: &IndicatorFrame, strategy: &Strategy) -> SignalDecision {
    if frame.len() < 2 {
        return SignalDecision::none("insufficient data (fewer than 2 bars)");
    }

    let result = match strategy.rule {
        StrategyRule::EmaCrossImpulse(p) => ema_cross_impulse(frame, p),
        StrategyRule::EmaBreakout(p) => ema_breakout(frame, p),
        StrategyRule::MeanReversion(p) => mean_reversion(frame, p),
    };
    result.unwrap_or_else(|reason| reason)
}

fn closes(frame: &IndicatorFrame) -> (f64, f64) {
    let bars = frame.bars();
    (bars[bars.len() - 2].close, bars[bars.len() - 1].close)
}

fn ema_cross_impulse(
    frame: &IndicatorFrame,
    p: EmaCrossParams,
) -> Result<SignalDecision, SignalDecision> {
    let (fast_prev, fast_last) = last_two(frame, p.fast_period)?;
    let (slow_prev, slow_last) = last_two(frame, p.slow_period)?;
    if !frame.has(IndicatorColumn::Atr) {
        return Err(SignalDecision::none(format!(
            "missing indicator column {}",
            IndicatorColumn::Atr
        )));
    }
    let impulse = frame.is_impulse(frame.len() - 1);

    Ok(
        match (cross(fast_prev, fast_last, slow_prev, slow_last), impulse) {
            (Cross::Up, true) => SignalDecision::buy(format!(
                "bullish EMA cross ({}/{}) on impulse candle",
                p.fast_period, p.slow_period
            )),
            (Cross::Down, true) => SignalDecision::sell(format!(
                "bearish EMA cross ({}/{}) on impulse candle",
                p.fast_period, p.slow_period
            )),
            _ => SignalDecision::none(format!("no cross or no impulse candle (impulse: {impulse})")),
        },
    )
}

fn ema_breakout(
    frame: &IndicatorFrame,
    p: EmaBreakoutParams,
) -> Result<SignalDecision, SignalDecision> {
    let (ema_prev, ema_last) = last_two(frame, p.period)?;
    if !frame.has(IndicatorColumn::Atr) {
        return Err(SignalDecision::none(format!(
            "missing indicator column {}",
            IndicatorColumn::Atr
        )));
    }
    if !frame.is_impulse(frame.len() - 1) {
        return Ok(SignalDecision::none("not an impulse candle"));
    }

    let (close_prev, close_last) = closes(frame);
    let column = IndicatorColumn::Ema(p.period);
    Ok(match cross(close_prev, close_last, ema_prev, ema_last) {
        Cross::Up => SignalDecision::buy(format!("bullish breakout of {column} on impulse candle")),
        Cross::Down => SignalDecision::sell(format!("bearish breakout of {column} on impulse candle")),
        Cross::Neither => SignalDecision::none(format!("impulse candle without breakout of {column}")),
    })
}

fn mean_reversion(
    frame: &IndicatorFrame,
    p: MeanReversionParams,
) -> Result<SignalDecision, SignalDecision> {
    let (ema_prev, ema_last) = last_two(frame, p.reversion_period)?;
    let (close_prev, close_last) = closes(frame);

    let (above_trend, below_trend) = match p.trend_period {
        Some(trend) => {
            let (_, trend_last) = last_two(frame, trend)?;
            (close_last > trend_last, close_last < trend_last)
        }
        None => (true, true),
    };

    let column = IndicatorColumn::Ema(p.reversion_period);
    Ok(match cross(close_prev, close_last, ema_prev, ema_last) {
        Cross::Up if above_trend => SignalDecision::buy(format!("bullish reversion to {column}")),
        Cross::Down if below_trend => SignalDecision::sell(format!("bearish reversion to {column}")),
        _ => SignalDecision::none("no cross or trend filter not satisfied"),
    })
}
