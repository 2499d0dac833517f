//! Simulation report: the accounting summary of one replay.

use serde::{Deserialize, Serialize};

use super::position::ClosedTrade;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub initial_capital: f64,
    pub final_capital: f64,
    pub net_profit: f64,
    pub total_trades: usize,
    pub won: usize,
    pub lost: usize,
    /// Percentage of winning trades, 0 when there are none.
    pub win_rate: f64,
    pub gross_profit: f64,
    /// Positive magnitude of the summed losing results.
    pub gross_loss: f64,
    /// `f64::INFINITY` when there is no gross loss.
    pub profit_factor: f64,
    /// Positive fraction of the running peak.
    pub max_drawdown: f64,
    pub equity_curve: Vec<f64>,
    pub trades: Vec<ClosedTrade>,
}

impl SimulationReport {
    pub fn build(initial_capital: f64, final_capital: f64, equity_curve: Vec<f64>, trades: Vec<ClosedTrade>) -> Self {
        let total_trades = trades.len();
        let won = trades.iter().filter(|t| t.result > 0.0).count();
        let lost = total_trades - won;

        let gross_profit: f64 = trades.iter().map(|t| t.result).filter(|r| *r > 0.0).sum();
        let gross_loss: f64 = trades
            .iter()
            .map(|t| t.result)
            .filter(|r| *r < 0.0)
            .sum::<f64>()
            .abs();

        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else {
            f64::INFINITY
        };

        let win_rate = if total_trades > 0 {
            won as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };

        SimulationReport {
            initial_capital,
            final_capital,
            net_profit: final_capital - initial_capital,
            total_trades,
            won,
            lost,
            win_rate,
            gross_profit,
            gross_loss,
            profit_factor,
            max_drawdown: compute_drawdown(&equity_curve),
            equity_curve,
            trades,
        }
    }
}

/// Largest peak-to-trough decline as a positive fraction of the running peak.
pub fn compute_drawdown(equity_curve: &[f64]) -> f64 {
    let Some(&first) = equity_curve.first() else {
        return 0.0;
    };

    let mut peak = first;
    let mut max_dd = 0.0_f64;
    for &equity in equity_curve {
        if equity > peak {
            peak = equity;
        } else if peak > 0.0 {
            max_dd = max_dd.max((peak - equity) / peak);
        }
    }
    max_dd
}
