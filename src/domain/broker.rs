//! Bar-by-bar market replay.
//!
//! The simulator walks a borrowed bar slice, resolves open positions against
//! each new bar's range, and keeps the balance and equity curve. The equity
//! curve holds the initial capital plus one sample per processed bar, taken
//! after that bar's exits are settled.

use chrono::NaiveDateTime;
use tracing::debug;

use super::ledger::PositionLedger;
use super::ohlcv::Bar;
use super::position::{CloseReason, ClosedTrade, Position, Side};
use super::report::SimulationReport;

pub const DEFAULT_PIP_SIZE: f64 = 0.0001;
pub const DEFAULT_PIP_VALUE_PER_LOT: f64 = 10.0;

#[derive(Debug, Clone, PartialEq)]
pub struct BrokerConfig {
    pub initial_capital: f64,
    pub instrument: String,
    /// Price increment of one pip.
    pub pip_size: f64,
    /// Money per pip for one lot.
    pub pip_value_per_lot: f64,
    pub commission_per_lot: f64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            initial_capital: 10_000.0,
            instrument: "BACKTEST".to_string(),
            pip_size: DEFAULT_PIP_SIZE,
            pip_value_per_lot: DEFAULT_PIP_VALUE_PER_LOT,
            commission_per_lot: 0.0,
        }
    }
}

/// Order request; the fill price is always the current bar's close.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub side: Side,
    pub lots: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub strategy: String,
}

pub struct BrokerSimulator<'a> {
    bars: &'a [Bar],
    cursor: usize,
    config: BrokerConfig,
    balance: f64,
    ledger: PositionLedger,
    history: Vec<ClosedTrade>,
    equity_curve: Vec<f64>,
    next_ticket: u64,
}

impl<'a> BrokerSimulator<'a> {
    pub fn new(bars: &'a [Bar], config: BrokerConfig) -> Self {
        let balance = config.initial_capital;
        BrokerSimulator {
            bars,
            cursor: 0,
            config,
            balance,
            ledger: PositionLedger::new(),
            history: Vec::new(),
            equity_curve: vec![balance],
            next_ticket: 0,
        }
    }

    /// Moves to the next bar, settling stop-loss/take-profit fills on it.
    /// Returns `None` once the data is exhausted.
    pub fn tick(&mut self) -> Option<&'a Bar> {
        if self.cursor + 1 >= self.bars.len() {
            return None;
        }
        self.cursor += 1;
        let bars = self.bars;
        let bar = &bars[self.cursor];
        self.resolve_exits(bar);
        self.equity_curve.push(self.balance);
        Some(bar)
    }

    fn resolve_exits(&mut self, bar: &Bar) {
        let exits: Vec<(u64, f64, CloseReason)> = self
            .ledger
            .iter()
            .filter_map(|p| p.exit_on(bar.low, bar.high).map(|(price, reason)| (p.ticket, price, reason)))
            .collect();
        for (ticket, price, reason) in exits {
            self.close(ticket, price, reason);
        }
    }

    pub fn current_bar(&self) -> Option<&'a Bar> {
        let bars = self.bars;
        bars.get(self.cursor)
    }

    fn current_time(&self) -> Option<NaiveDateTime> {
        self.current_bar().map(|b| b.time)
    }

    /// The last `n` bars up to and including the current one.
    pub fn window(&self, n: usize) -> &'a [Bar] {
        let bars = self.bars;
        if bars.is_empty() {
            return &[];
        }
        let end = self.cursor + 1;
        let start = end.saturating_sub(n);
        &bars[start..end]
    }

    /// Opens a position at the current close. Returns the new ticket, or
    /// `None` when there is no bar to fill against or the lot is not positive.
    pub fn execute(&mut self, order: OrderRequest) -> Option<u64> {
        let bar = self.current_bar()?;
        if !(order.lots > 0.0) {
            return None;
        }
        self.next_ticket += 1;
        let position = Position {
            ticket: self.next_ticket,
            instrument: self.config.instrument.clone(),
            side: order.side,
            lots: order.lots,
            entry_price: bar.close,
            stop_loss: order.stop_loss,
            take_profit: order.take_profit,
            opened_at: bar.time,
            strategy: order.strategy,
        };
        debug!(
            ticket = position.ticket,
            side = %position.side,
            lots = position.lots,
            entry = position.entry_price,
            sl = position.stop_loss,
            tp = position.take_profit,
            "order opened"
        );
        self.ledger.insert(position);
        Some(self.next_ticket)
    }

    /// Money result of closing `position` at `price`, commission included.
    pub fn realized(&self, position: &Position, price: f64) -> f64 {
        let pips = position.price_gain(price) / self.config.pip_size;
        pips * position.lots * self.config.pip_value_per_lot
            - self.config.commission_per_lot * position.lots
    }

    /// Closes an open position. A ticket that is not open yields `None`, so a
    /// position can never produce two closed trades.
    pub fn close(&mut self, ticket: u64, price: f64, reason: CloseReason) -> Option<ClosedTrade> {
        let closed_at = self.current_time()?;
        let position = self.ledger.remove(ticket)?;
        let result = self.realized(&position, price);
        self.balance += result;

        debug!(ticket, price, result, reason = %reason, "position closed");

        let trade = ClosedTrade {
            position,
            close_price: price,
            closed_at,
            result,
            reason,
        };
        self.history.push(trade.clone());
        Some(trade)
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut PositionLedger {
        &mut self.ledger
    }

    pub fn history(&self) -> &[ClosedTrade] {
        &self.history
    }

    pub fn equity_curve(&self) -> &[f64] {
        &self.equity_curve
    }

    /// Number of bars advanced through `tick`.
    pub fn processed(&self) -> usize {
        self.equity_curve.len() - 1
    }

    pub fn report(&self) -> SimulationReport {
        SimulationReport::build(
            self.config.initial_capital,
            self.balance,
            self.equity_curve.clone(),
            self.history.clone(),
        )
    }

    pub fn into_report(self) -> SimulationReport {
        SimulationReport::build(
            self.config.initial_capital,
            self.balance,
            self.equity_curve,
            self.history,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, NaiveDate};

    fn bar(i: usize, low: f64, high: f64, close: f64) -> Bar {
        Bar {
            time: NaiveDate::from_ymd_opt(2024, 5, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
                + Duration::minutes(i as i64),
            open: close,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    fn order(side: Side, sl: f64, tp: f64) -> OrderRequest {
        OrderRequest {
            side,
            lots: 0.1,
            stop_loss: sl,
            take_profit: tp,
            strategy: "s".into(),
        }
    }

    #[test]
    fn tick_walks_to_the_end() {
        let bars: Vec<Bar> = (0..3).map(|i| bar(i, 1.0, 1.0, 1.0)).collect();
        let mut sim = BrokerSimulator::new(&bars, BrokerConfig::default());
        assert_eq!(sim.tick().map(|b| b.time), Some(bars[1].time));
        assert_eq!(sim.tick().map(|b| b.time), Some(bars[2].time));
        assert!(sim.tick().is_none());
        assert!(sim.tick().is_none());
        assert_eq!(sim.equity_curve().len(), sim.processed() + 1);
        assert_eq!(sim.processed(), 2);
    }

    #[test]
    fn empty_series_never_ticks() {
        let mut sim = BrokerSimulator::new(&[], BrokerConfig::default());
        assert!(sim.tick().is_none());
        assert!(sim.window(10).is_empty());
        assert!(sim.execute(order(Side::Long, 0.9, 1.1)).is_none());
        assert_eq!(sim.report().equity_curve, vec![10_000.0]);
    }

    #[test]
    fn window_is_bounded_by_history() {
        let bars: Vec<Bar> = (0..10).map(|i| bar(i, 1.0, 1.0, 1.0 + i as f64)).collect();
        let mut sim = BrokerSimulator::new(&bars, BrokerConfig::default());
        assert_eq!(sim.window(5).len(), 1);
        for _ in 0..6 {
            sim.tick();
        }
        let w = sim.window(4);
        assert_eq!(w.len(), 4);
        assert_eq!(w.last().unwrap().close, 7.0);
        assert_eq!(w.first().unwrap().close, 4.0);
    }

    #[test]
    fn tickets_are_monotonic() {
        let bars: Vec<Bar> = (0..2).map(|i| bar(i, 1.0, 1.0, 1.0)).collect();
        let mut sim = BrokerSimulator::new(&bars, BrokerConfig::default());
        let a = sim.execute(order(Side::Long, 0.5, 1.5)).unwrap();
        let b = sim.execute(order(Side::Short, 1.5, 0.5)).unwrap();
        assert!(b > a);
        assert_eq!(sim.ledger().len(), 2);
    }

    #[test]
    fn take_profit_realizes_pips() {
        let bars = vec![bar(0, 1.0990, 1.1010, 1.1000), bar(1, 1.1000, 1.1030, 1.1020)];
        let mut sim = BrokerSimulator::new(&bars, BrokerConfig::default());
        sim.execute(order(Side::Long, 1.0950, 1.1020)).unwrap();
        sim.tick();
        let report = sim.report();
        assert_eq!(report.total_trades, 1);
        // 20 pips * 0.1 lot * 10 per pip
        assert_relative_eq!(report.trades[0].result, 20.0, epsilon = 1e-6);
        assert_eq!(report.trades[0].reason, CloseReason::TakeProfit);
        assert_relative_eq!(report.final_capital, 10_020.0, epsilon = 1e-6);
        assert_relative_eq!(*report.equity_curve.last().unwrap(), 10_020.0, epsilon = 1e-6);
        assert!(sim.ledger().is_empty());
    }

    #[test]
    fn stop_loss_checked_first() {
        let bars = vec![bar(0, 1.0, 1.0, 1.1000), bar(1, 1.0900, 1.1200, 1.1000)];
        let mut sim = BrokerSimulator::new(&bars, BrokerConfig::default());
        sim.execute(order(Side::Short, 1.1050, 1.0950)).unwrap();
        sim.tick();
        let trade = &sim.history()[0];
        assert_eq!(trade.reason, CloseReason::StopLoss);
        assert_relative_eq!(trade.result, -50.0, epsilon = 1e-6);
    }

    #[test]
    fn commission_is_charged_per_lot() {
        let bars = vec![bar(0, 1.0, 1.0, 1.1000)];
        let config = BrokerConfig {
            commission_per_lot: 7.0,
            ..BrokerConfig::default()
        };
        let mut sim = BrokerSimulator::new(&bars, config);
        let ticket = sim
            .execute(OrderRequest {
                lots: 1.0,
                ..order(Side::Long, 1.0, 2.0)
            })
            .unwrap();
        let trade = sim.close(ticket, 1.1000, CloseReason::TakeProfit).unwrap();
        assert_relative_eq!(trade.result, -7.0);
    }

    #[test]
    fn closing_twice_is_rejected() {
        let bars = vec![bar(0, 1.0, 1.0, 1.0)];
        let mut sim = BrokerSimulator::new(&bars, BrokerConfig::default());
        let ticket = sim.execute(order(Side::Long, 0.5, 1.5)).unwrap();
        assert!(sim.close(ticket, 1.0, CloseReason::StopLoss).is_some());
        assert!(sim.close(ticket, 1.0, CloseReason::StopLoss).is_none());
        assert_eq!(sim.history().len(), 1);
    }

    #[test]
    fn zero_lot_is_refused() {
        let bars = vec![bar(0, 1.0, 1.0, 1.0)];
        let mut sim = BrokerSimulator::new(&bars, BrokerConfig::default());
        assert!(sim
            .execute(OrderRequest {
                lots: 0.0,
                ..order(Side::Long, 0.5, 1.5)
            })
            .is_none());
    }
}
