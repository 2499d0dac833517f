//! Parameter search: the local hill-climbing adjuster, the cycle loop built on
//! it, and the genetic optimizer with its worker pool.

pub mod adjuster;
pub mod cycles;
pub mod genetic;
pub mod pool;

use chrono::NaiveDateTime;
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;

use super::error::EvotraderError;
use super::metrics::EvaluationReport;
use super::strategy::{ParamRange, ParamValue};

/// One candidate parameter set, keyed and ordered by parameter name.
pub type Individual = BTreeMap<String, ParamValue>;

/// A value drawn uniformly from every range's grid.
pub fn random_individual<R: Rng + ?Sized>(
    ranges: &BTreeMap<String, ParamRange>,
    rng: &mut R,
) -> Individual {
    ranges
        .iter()
        .map(|(key, range)| (key.clone(), range.random_value(rng)))
        .collect()
}

/// Snaps every gene back onto its range grid; genes without a range are dropped.
pub fn clamp_individual(individual: &mut Individual, ranges: &BTreeMap<String, ParamRange>) {
    individual.retain(|key, _| ranges.contains_key(key));
    for (key, range) in ranges {
        let value = individual
            .get(key)
            .map(|v| range.clamp(v))
            .unwrap_or_else(|| range.min_value());
        individual.insert(key.clone(), value);
    }
}

/// Canonical text of a parameter tuple, for remembering what was tried.
pub(crate) fn tuple_key(values: &Individual) -> String {
    values
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMethod {
    Genetic,
    Cycles,
}

/// Final document of an optimization run.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationResult {
    pub strategy: String,
    pub method: SearchMethod,
    pub timestamp: NaiveDateTime,
    /// Net profit above zero and Sharpe above the viability threshold.
    pub viable: bool,
    pub interrupted: bool,
    pub optimal_params: Individual,
    pub best_metrics: Option<EvaluationReport>,
    /// Best-so-far fitness per generation or cycle.
    pub history: Vec<f64>,
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// Cancelled by the coordinator. Carries the best-so-far history and the
    /// best individual found before the interruption.
    #[error("search interrupted after {completed} round(s)")]
    Interrupted {
        completed: usize,
        history: Vec<f64>,
        best: Option<(Individual, f64)>,
    },

    #[error(transparent)]
    Config(#[from] EvotraderError),
}

impl From<SearchError> for EvotraderError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::Interrupted { completed, .. } => EvotraderError::Interrupted {
                generations: completed,
            },
            SearchError::Config(e) => e,
        }
    }
}
