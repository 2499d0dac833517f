//! Performance evaluation of a finished simulation.
//!
//! Pure and total: every degenerate input maps to a defined value
//! (0 or infinity), never a division fault.

use serde::Serialize;

use super::report::SimulationReport;

/// Sharpe above which a profitable result counts as viable.
pub const VIABLE_SHARPE: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    #[serde(flatten)]
    pub simulation: SimulationReport,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub win_loss_ratio: f64,
}

impl EvaluationReport {
    pub fn is_viable(&self) -> bool {
        self.simulation.net_profit > 0.0 && self.sharpe_ratio > VIABLE_SHARPE
    }
}

pub fn evaluate(report: &SimulationReport, periods_per_year: f64) -> EvaluationReport {
    let returns = period_returns(&report.equity_curve);
    let annualizer = periods_per_year.max(0.0).sqrt();

    EvaluationReport {
        simulation: report.clone(),
        sharpe_ratio: sharpe(&returns, annualizer),
        sortino_ratio: sortino(&returns, annualizer),
        calmar_ratio: calmar(report, returns.len(), periods_per_year),
        win_loss_ratio: win_loss(report),
    }
}

/// Simple percentage change between consecutive samples.
pub fn period_returns(equity_curve: &[f64]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .map(|w| {
            let prev = w[0];
            if prev > 0.0 { (w[1] - prev) / prev } else { 0.0 }
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1). Needs at least two values.
fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

/// Ratio of `mean` to a dispersion measure, with the zero/undefined
/// dispersion case mapped to infinity for positive means and 0 otherwise.
fn ratio(mean: f64, dispersion: Option<f64>, annualizer: f64) -> f64 {
    match dispersion {
        Some(d) if d > 0.0 => mean / d * annualizer,
        _ if mean > 0.0 => f64::INFINITY,
        _ => 0.0,
    }
}

fn sharpe(returns: &[f64], annualizer: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    ratio(mean(returns), sample_std(returns), annualizer)
}

fn sortino(returns: &[f64], annualizer: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    ratio(mean(returns), sample_std(&downside), annualizer)
}

fn calmar(report: &SimulationReport, n_returns: usize, periods_per_year: f64) -> f64 {
    if n_returns < 2 || report.max_drawdown == 0.0 || report.initial_capital <= 0.0 {
        return 0.0;
    }
    let growth = report.final_capital / report.initial_capital;
    let periods = report.equity_curve.len() as f64;
    let annualized = if growth > 0.0 {
        growth.powf(periods_per_year / periods) - 1.0
    } else {
        -1.0
    };
    annualized / report.max_drawdown
}

fn win_loss(report: &SimulationReport) -> f64 {
    if report.won == 0 || report.lost == 0 {
        return 0.0;
    }
    let avg_win = report.gross_profit / report.won as f64;
    let avg_loss = report.gross_loss / report.lost as f64;
    if avg_loss > 0.0 { avg_win / avg_loss } else { f64::INFINITY }
}
