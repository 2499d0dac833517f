//! Hill-climbing tuning loop: backtest, evaluate, keep the best by net
//! profit, let the adjuster propose the next neighbour.

use std::collections::BTreeSet;
use tracing::{info, warn};

use super::adjuster::LocalAdjuster;
use super::pool::CancellationToken;
use super::{Individual, SearchError, tuple_key};
use crate::domain::backtest::{BacktestConfig, simulate};
use crate::domain::metrics::{EvaluationReport, evaluate};
use crate::domain::ohlcv::{Bar, validate_series};
use crate::domain::strategy::StrategyConfig;

/// Proposals tried before a repeated tuple is forced to mutate.
pub const MAX_RETRIES: usize = 10;
/// Exploration probability while escaping an already tested tuple.
pub const RETRY_EXPLORATION: f64 = 0.9;

#[derive(Debug, Clone, PartialEq)]
pub struct CycleConfig {
    pub cycles: usize,
    pub exploration: f64,
    pub seed: Option<u64>,
}

impl Default for CycleConfig {
    fn default() -> Self {
        CycleConfig {
            cycles: 10,
            exploration: 0.5,
            seed: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CycleRecord {
    pub cycle: usize,
    pub params: Individual,
    /// `None` when the config failed to resolve.
    pub evaluation: Option<EvaluationReport>,
}

#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub best_config: Option<StrategyConfig>,
    pub best: Option<EvaluationReport>,
    pub history: Vec<CycleRecord>,
}

impl CycleOutcome {
    /// Best net profit seen so far, one sample per cycle.
    pub fn convergence(&self) -> Vec<f64> {
        let mut best = f64::NEG_INFINITY;
        self.history
            .iter()
            .map(|record| {
                if let Some(e) = &record.evaluation {
                    best = best.max(e.simulation.net_profit);
                }
                best
            })
            .collect()
    }
}

pub fn run_cycles(
    bars: &[Bar],
    base: &StrategyConfig,
    backtest: &BacktestConfig,
    config: &CycleConfig,
    token: &CancellationToken,
) -> Result<CycleOutcome, SearchError> {
    validate_series(bars)?;
    let periods_per_year = backtest.periods_per_year(bars);
    let mut adjuster = LocalAdjuster::seeded(config.seed);

    let mut current = base.clone();
    current.seed_unset_params();

    let mut tested = BTreeSet::new();
    let mut last: Option<EvaluationReport> = None;
    let mut outcome = CycleOutcome {
        best_config: None,
        best: None,
        history: Vec::with_capacity(config.cycles),
    };

    for cycle in 0..config.cycles {
        if token.is_cancelled() {
            warn!(cycle, "tuning interrupted");
            let best = outcome.best_config.as_ref().zip(outcome.best.as_ref()).map(|(c, e)| {
                (c.optimizable_values(), e.simulation.net_profit)
            });
            return Err(SearchError::Interrupted {
                completed: cycle,
                history: outcome.convergence(),
                best,
            });
        }

        let mut key = tuple_key(&current.optimizable_values());
        let mut retries = 0;
        while tested.contains(&key) {
            retries += 1;
            current = if retries > MAX_RETRIES {
                adjuster.random_mutation(&current)
            } else {
                adjuster.propose(&current, last.as_ref(), RETRY_EXPLORATION)
            };
            key = tuple_key(&current.optimizable_values());
            if retries > MAX_RETRIES {
                break;
            }
        }
        tested.insert(key);

        let params = current.optimizable_values();
        match current.resolve() {
            Ok(strategy) => {
                let report = simulate(bars, &strategy, backtest, None);
                let evaluation = evaluate(&report, periods_per_year);
                info!(
                    cycle,
                    net_profit = evaluation.simulation.net_profit,
                    sharpe = evaluation.sharpe_ratio,
                    trades = evaluation.simulation.total_trades,
                    "cycle evaluated"
                );

                let improves = outcome
                    .best
                    .as_ref()
                    .is_none_or(|b| evaluation.simulation.net_profit > b.simulation.net_profit);
                if improves {
                    outcome.best = Some(evaluation.clone());
                    outcome.best_config = Some(current.clone());
                }
                outcome.history.push(CycleRecord {
                    cycle,
                    params,
                    evaluation: Some(evaluation.clone()),
                });

                current = adjuster.propose(&current, Some(&evaluation), config.exploration);
                last = Some(evaluation);
            }
            Err(e) => {
                warn!(cycle, error = %e, "cycle failed, reverting to the original config");
                outcome.history.push(CycleRecord {
                    cycle,
                    params,
                    evaluation: None,
                });
                current = base.clone();
                current.seed_unset_params();
            }
        }
    }

    Ok(outcome)
}
