//! Risk governor: daily loss ceilings, loss-streak cooldowns and lot throttling.
//!
//! Pure state machine over [`RiskState`]. Time is always passed in by the
//! caller, so the same governor fronts a backtest (bar timestamps) or a live
//! loop (wall clock). Single writer: callers sharing one governor across
//! threads must serialize access themselves.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Daily loss limits, cooldowns and lot reduction.
///
/// Loss limits are positive magnitudes. They are account-currency amounts,
/// or with `percent_mode` set, percentages (0 to 100) of `capital`: a
/// `global_limit` of 2.0 on 10_000 capital blocks trading once the day's
/// loss reaches 200. The sign of a limit is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Daily loss ceiling across all strategies; `None` or zero disables it.
    pub global_limit: Option<f64>,
    /// Daily loss ceiling per strategy name, in the same unit as `global_limit`.
    pub strategy_limits: BTreeMap<String, f64>,
    /// Limits are percentages of `capital` instead of money amounts.
    pub percent_mode: bool,
    /// Account size in account currency; only read in `percent_mode`.
    pub capital: f64,
    /// Consecutive losses that open a cooldown; `None` disables cooldowns.
    pub cooldown_after_losses: Option<u32>,
    /// Cooldown length in minutes, counted from the losing trade's close.
    pub cooldown_minutes: i64,
    /// Consecutive losses after which lots are scaled by `reduction_factor`.
    pub reduce_after_losses: Option<u32>,
    /// Lot multiplier in (0, 1].
    pub reduction_factor: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        RiskLimits {
            global_limit: None,
            strategy_limits: BTreeMap::new(),
            percent_mode: false,
            capital: 10_000.0,
            cooldown_after_losses: None,
            cooldown_minutes: 60,
            reduce_after_losses: None,
            reduction_factor: 0.5,
        }
    }
}

impl RiskLimits {
    fn effective(&self, limit: f64) -> f64 {
        let money = if self.percent_mode {
            self.capital * limit / 100.0
        } else {
            limit
        };
        money.abs()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    pub day: NaiveDate,
    /// Net result of all trades closed today.
    pub global_pnl: f64,
    pub strategy_pnl: BTreeMap<String, f64>,
    pub consecutive_losses: BTreeMap<String, u32>,
    pub cooldowns: BTreeMap<String, NaiveDateTime>,
}

impl RiskState {
    fn new(day: NaiveDate, limits: &RiskLimits) -> Self {
        let mut state = RiskState {
            day,
            global_pnl: 0.0,
            strategy_pnl: BTreeMap::new(),
            consecutive_losses: BTreeMap::new(),
            cooldowns: BTreeMap::new(),
        };
        state.reset_counters(limits);
        state
    }

    /// Zeroes losses and streaks; cooldowns are left to expire on their own.
    fn reset_counters(&mut self, limits: &RiskLimits) {
        self.global_pnl = 0.0;
        self.strategy_pnl = limits.strategy_limits.keys().map(|k| (k.clone(), 0.0)).collect();
        self.consecutive_losses = limits.strategy_limits.keys().map(|k| (k.clone(), 0)).collect();
    }
}

/// One persisted closed trade, as needed for same-day replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub strategy: String,
    pub close_time: NaiveDateTime,
    pub result: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSummary {
    pub day: NaiveDate,
    pub global_pnl: f64,
    pub strategy_pnl: BTreeMap<String, f64>,
    pub consecutive_losses: BTreeMap<String, u32>,
    pub active_cooldowns: BTreeMap<String, NaiveDateTime>,
}

#[derive(Debug, Clone)]
pub struct RiskGovernor {
    limits: RiskLimits,
    state: RiskState,
}

impl RiskGovernor {
    pub fn new(limits: RiskLimits, today: NaiveDate) -> Self {
        let state = RiskState::new(today, &limits);
        RiskGovernor { limits, state }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    fn roll_over(&mut self, day: NaiveDate) {
        debug!(from = %self.state.day, to = %day, "risk day rollover");
        self.state.reset_counters(&self.limits);
        self.state.day = day;
    }

    /// Records a closed trade. `strategy = None` only touches the global bucket.
    pub fn register(&mut self, strategy: Option<&str>, result: f64, at: NaiveDateTime) {
        if at.date() > self.state.day {
            self.roll_over(at.date());
        }

        self.state.global_pnl += result;

        let Some(name) = strategy else {
            return;
        };
        *self.state.strategy_pnl.entry(name.to_string()).or_insert(0.0) += result;

        let streak = self
            .state
            .consecutive_losses
            .entry(name.to_string())
            .or_insert(0);
        if result < 0.0 {
            *streak += 1;
            if let Some(threshold) = self.limits.cooldown_after_losses {
                if *streak >= threshold {
                    let until = at + Duration::minutes(self.limits.cooldown_minutes);
                    warn!(
                        strategy = name,
                        losses = *streak,
                        until = %until,
                        "consecutive loss limit reached, strategy in cooldown"
                    );
                    self.state.cooldowns.insert(name.to_string(), until);
                }
            }
        } else {
            *streak = 0;
        }
    }

    pub fn in_cooldown(&self, strategy: &str, now: NaiveDateTime) -> bool {
        self.state
            .cooldowns
            .get(strategy)
            .is_some_and(|until| *until > now)
    }

    /// Whether a new position may be opened. `None` checks the global ceiling only.
    pub fn can_trade(&self, strategy: Option<&str>, now: NaiveDateTime) -> bool {
        if let Some(name) = strategy {
            if self.in_cooldown(name, now) {
                return false;
            }
        }

        if let Some(limit) = self.limits.global_limit.filter(|l| *l != 0.0) {
            if self.state.global_pnl <= -self.limits.effective(limit) {
                return false;
            }
        }

        if let Some(name) = strategy {
            if let Some(&limit) = self.limits.strategy_limits.get(name) {
                let pnl = self.state.strategy_pnl.get(name).copied().unwrap_or(0.0);
                if pnl <= -self.limits.effective(limit) {
                    return false;
                }
            }
        }

        true
    }

    /// Lot multiplier for `strategy`: `reduction_factor` once its loss streak
    /// reaches the reduction threshold, otherwise 1.
    pub fn position_factor(&self, strategy: &str) -> f64 {
        let streak = self.state.consecutive_losses.get(strategy).copied().unwrap_or(0);
        match self.limits.reduce_after_losses {
            Some(threshold) if streak >= threshold => self.limits.reduction_factor,
            _ => 1.0,
        }
    }

    /// Rebuilds today's state from a persisted trade log. Entries from other
    /// days are ignored. Daily totals are cleared first, so replaying the same
    /// log twice leaves the same state; cooldowns are kept. Returns how many
    /// trades were replayed.
    pub fn replay(&mut self, history: &[TradeRecord], today: NaiveDate) -> usize {
        self.roll_over(today);
        let mut replayed = 0;
        for record in history.iter().filter(|r| r.close_time.date() == today) {
            self.register(Some(&record.strategy), record.result, record.close_time);
            replayed += 1;
        }
        replayed
    }

    pub fn summary(&self, now: NaiveDateTime) -> RiskSummary {
        RiskSummary {
            day: self.state.day,
            global_pnl: self.state.global_pnl,
            strategy_pnl: self.state.strategy_pnl.clone(),
            consecutive_losses: self.state.consecutive_losses.clone(),
            active_cooldowns: self
                .state
                .cooldowns
                .iter()
                .filter(|(_, until)| **until > now)
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }
    }
}
