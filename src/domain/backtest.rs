//! Backtest driver: indicators -> signal -> sizing -> simulated execution.
//!
//! `BacktestConfig` carries the account and instrument settings shared by
//! every run; the strategy comes in separately so the search engines can
//! evaluate many parameter sets against the same config.

use tracing::{debug, warn};

use super::broker::{BrokerConfig, BrokerSimulator, OrderRequest};
use super::error::EvotraderError;
use super::indicator::IndicatorFrame;
use super::ohlcv::{Bar, validate_series};
use super::position::Side;
use super::report::SimulationReport;
use super::risk::RiskGovernor;
use super::signal;
use super::sizing::{LotLimits, LotSize, SymbolSpec, calculate_lot, dynamic_stops, snap_lot};
use super::stops::StopManager;
use super::strategy::{Strategy, StrategyConfig};
use super::timeframe::Timeframe;

/// Bars of lookback fetched beyond the longest EMA period.
pub const WINDOW_MARGIN: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub broker: BrokerConfig,
    /// Percent of the current balance risked per trade.
    pub risk_pct: f64,
    pub symbol: SymbolSpec,
    pub lot_limits: LotLimits,
    pub stops: StopManager,
    pub max_open_positions: usize,
    /// Bar granularity; inferred from the data when unset.
    pub timeframe: Option<Timeframe>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            broker: BrokerConfig::default(),
            risk_pct: 1.0,
            symbol: SymbolSpec::default(),
            lot_limits: LotLimits::default(),
            stops: StopManager::default(),
            max_open_positions: 1,
            timeframe: None,
        }
    }
}

impl BacktestConfig {
    /// Periods per year for annualizing ratios: the configured timeframe,
    /// else the one inferred from `bars`, else one-minute bars.
    pub fn periods_per_year(&self, bars: &[Bar]) -> f64 {
        self.timeframe
            .or_else(|| Timeframe::infer(bars))
            .unwrap_or(Timeframe::M1)
            .periods_per_year()
    }
}

/// Resolves `config`, checks the series and replays it.
pub fn run_backtest(
    bars: &[Bar],
    config: &StrategyConfig,
    bt: &BacktestConfig,
    governor: Option<&mut RiskGovernor>,
) -> Result<SimulationReport, EvotraderError> {
    validate_series(bars)?;
    let strategy = config.resolve()?;
    Ok(simulate(bars, &strategy, bt, governor))
}

/// Replays `bars` for a resolved strategy. Never fails: bars without enough
/// lookback, empty signals and unsizeable orders are skipped.
pub fn simulate(
    bars: &[Bar],
    strategy: &Strategy,
    bt: &BacktestConfig,
    mut governor: Option<&mut RiskGovernor>,
) -> SimulationReport {
    let required = strategy.required_bars();
    let lookback = required + WINDOW_MARGIN;
    let params = strategy.indicator_params();

    let mut sim = BrokerSimulator::new(bars, bt.broker.clone());
    let mut notified = 0;

    while let Some(bar) = sim.tick() {
        if let Some(g) = governor.as_deref_mut() {
            for trade in &sim.history()[notified..] {
                g.register(Some(&trade.position.strategy), trade.result, trade.closed_at);
            }
        }
        notified = sim.history().len();

        let window = sim.window(lookback);
        if window.len() < required {
            continue;
        }
        let frame = IndicatorFrame::compute(window, &params);

        if bt.stops.is_active() {
            if let Some(atr) = frame.last_atr() {
                for position in sim.ledger_mut().iter_mut() {
                    bt.stops.apply(position, bar.close, atr);
                }
            }
        }

        if sim.ledger().len() >= bt.max_open_positions {
            continue;
        }

        let decision = signal::evaluate(&frame, strategy);
        let Some(side) = Side::from_signal(decision.signal) else {
            continue;
        };
        debug!(time = %bar.time, signal = %decision.signal, reason = %decision.reason, "signal");

        let factor = match governor.as_deref() {
            Some(g) if !g.can_trade(Some(&strategy.name), bar.time) => {
                debug!(strategy = %strategy.name, time = %bar.time, "blocked by risk governor");
                continue;
            }
            Some(g) => g.position_factor(&strategy.name),
            None => 1.0,
        };

        let Some((stop_loss, take_profit)) = dynamic_stops(&frame, side) else {
            continue;
        };

        let lots = match calculate_lot(
            sim.balance(),
            bt.risk_pct,
            stop_loss,
            bar.close,
            &bt.symbol,
            &bt.lot_limits,
        ) {
            LotSize::CannotSize(reason) => {
                warn!(%reason, "cannot size order, skipping signal");
                continue;
            }
            LotSize::Sized(lots) | LotSize::MinimumFallback(lots) => lots,
        };
        let lots = if factor < 1.0 {
            snap_lot(lots * factor, &bt.symbol, &bt.lot_limits)
        } else {
            lots
        };

        sim.execute(OrderRequest {
            side,
            lots,
            stop_loss,
            take_profit,
            strategy: strategy.name.clone(),
        });
    }

    if let Some(g) = governor {
        for trade in &sim.history()[notified..] {
            g.register(Some(&trade.position.strategy), trade.result, trade.closed_at);
        }
    }

    sim.into_report()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::CloseReason;
    use crate::domain::risk::RiskLimits;
    use crate::domain::strategy::{ParamValue, StrategyKind};
    use chrono::{Duration, NaiveDate};

    fn bar(i: usize, open: f64, close: f64) -> Bar {
        Bar {
            time: NaiveDate::from_ymd_opt(2024, 4, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
                + Duration::minutes(i as i64),
            open,
            high: open.max(close) + 0.0001,
            low: open.min(close) - 0.0001,
            close,
            volume: 1.0,
        }
    }

    /// Flat, a small dip under the EMA, one impulse candle breaking back above
    /// it, then a steady climb.
    fn breakout_then_rally() -> Vec<Bar> {
        let mut bars: Vec<Bar> = (0..29).map(|i| bar(i, 1.1000, 1.1000)).collect();
        bars.push(bar(29, 1.1000, 1.0995));
        bars.push(bar(30, 1.1000, 1.1030));
        let mut price = 1.1030;
        for i in 31..80 {
            bars.push(bar(i, price, price + 0.0002));
            price += 0.0002;
        }
        bars
    }

    fn breakout_config() -> StrategyConfig {
        StrategyConfig::new("breakout", StrategyKind::EmaBreakout)
            .with_param("ema_breakout", ParamValue::Int(10))
            .with_param("atr_period", ParamValue::Int(10))
    }

    #[test]
    fn breakout_opens_and_hits_target() {
        let bars = breakout_then_rally();
        let report = run_backtest(&bars, &breakout_config(), &BacktestConfig::default(), None).unwrap();
        assert_eq!(report.total_trades, 1);
        let trade = &report.trades[0];
        assert_eq!(trade.position.side, Side::Long);
        assert_eq!(trade.reason, CloseReason::TakeProfit);
        assert!(trade.result > 0.0);
        assert_eq!(report.equity_curve.len(), bars.len());
    }

    #[test]
    fn corrupt_series_is_fatal() {
        let mut bars = breakout_then_rally();
        bars[5].high = bars[5].low - 1.0;
        let err = run_backtest(&bars, &breakout_config(), &BacktestConfig::default(), None).unwrap_err();
        assert!(matches!(err, EvotraderError::CorruptSeries { index: 5, .. }));
    }

    #[test]
    fn too_little_data_means_no_trades() {
        let bars: Vec<Bar> = (0..5).map(|i| bar(i, 1.1, 1.1)).collect();
        let report = run_backtest(&bars, &breakout_config(), &BacktestConfig::default(), None).unwrap();
        assert_eq!(report.total_trades, 0);
        assert_eq!(report.equity_curve, vec![10_000.0; 5]);
    }

    #[test]
    fn governor_can_block_entries() {
        let bars = breakout_then_rally();
        let limits = RiskLimits {
            global_limit: Some(1.0),
            ..RiskLimits::default()
        };
        let mut governor = RiskGovernor::new(limits, bars[0].time.date());
        governor.register(None, -5.0, bars[0].time);

        let report = run_backtest(
            &bars,
            &breakout_config(),
            &BacktestConfig::default(),
            Some(&mut governor),
        )
        .unwrap();
        assert_eq!(report.total_trades, 0);
    }

    #[test]
    fn closed_trades_reach_the_governor() {
        let bars = breakout_then_rally();
        let mut governor = RiskGovernor::new(RiskLimits::default(), bars[0].time.date());
        let report = run_backtest(
            &bars,
            &breakout_config(),
            &BacktestConfig::default(),
            Some(&mut governor),
        )
        .unwrap();
        let pnl = governor.state().strategy_pnl.get("breakout").copied().unwrap_or(0.0);
        assert!((pnl - report.net_profit).abs() < 1e-9);
    }

    #[test]
    fn periods_per_year_prefers_config() {
        let bars = breakout_then_rally();
        let bt = BacktestConfig {
            timeframe: Some(Timeframe::D1),
            ..BacktestConfig::default()
        };
        assert_eq!(bt.periods_per_year(&bars), 252.0);
        assert_eq!(
            BacktestConfig::default().periods_per_year(&bars),
            Timeframe::M1.periods_per_year()
        );
    }
}
