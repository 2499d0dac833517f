//! Open positions and their closed snapshots.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::signal::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn from_signal(signal: Signal) -> Option<Side> {
        match signal {
            Signal::Buy => Some(Side::Long),
            Signal::Sell => Some(Side::Short),
            Signal::None => None,
        }
    }

    /// +1 for long, -1 for short.
    pub fn direction(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticket: u64,
    pub instrument: String,
    pub side: Side,
    pub lots: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub opened_at: NaiveDateTime,
    pub strategy: String,
}

impl Position {
    pub fn is_long(&self) -> bool {
        self.side == Side::Long
    }

    /// Price distance in the position's favour.
    pub fn price_gain(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.side.direction()
    }

    pub fn should_stop_loss(&self, low: f64, high: f64) -> bool {
        match self.side {
            Side::Long => low <= self.stop_loss,
            Side::Short => high >= self.stop_loss,
        }
    }

    pub fn should_take_profit(&self, low: f64, high: f64) -> bool {
        match self.side {
            Side::Long => high >= self.take_profit,
            Side::Short => low <= self.take_profit,
        }
    }

    /// Exit triggered by a bar's range, if any. Stop-loss wins when both levels
    /// fall inside the same bar.
    pub fn exit_on(&self, low: f64, high: f64) -> Option<(f64, CloseReason)> {
        if self.should_stop_loss(low, high) {
            Some((self.stop_loss, CloseReason::StopLoss))
        } else if self.should_take_profit(low, high) {
            Some((self.take_profit, CloseReason::TakeProfit))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::StopLoss => write!(f, "stop loss"),
            CloseReason::TakeProfit => write!(f, "take profit"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    #[serde(flatten)]
    pub position: Position,
    pub close_price: f64,
    pub closed_at: NaiveDateTime,
    pub result: f64,
    pub reason: CloseReason,
}

impl ClosedTrade {
    pub fn is_win(&self) -> bool {
        self.result > 0.0
    }
}
