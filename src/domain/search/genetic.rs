//! Genetic search over a strategy's optimizable parameters.
//!
//! The coordinator owns the population and the convergence history. Fitness
//! is evaluated per generation, on the worker pool when one is available and
//! sequentially otherwise.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, info, warn};

use super::pool::{CancellationToken, PoolError, WorkerPool, panic_message, worker_count};
use super::{Individual, SearchError, clamp_individual, random_individual};
use crate::domain::backtest::{BacktestConfig, simulate};
use crate::domain::metrics::evaluate;
use crate::domain::ohlcv::{Bar, validate_series};
use crate::domain::strategy::{ParamRange, StrategyConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct GeneticConfig {
    pub population_size: usize,
    pub generations: usize,
    pub mutation_rate: f64,
    pub crossover_rate: f64,
    pub tournament_size: usize,
    /// Fraction of the machine's cores given to the worker pool.
    pub cpu_core_usage: f64,
    pub seed: Option<u64>,
}

impl Default for GeneticConfig {
    fn default() -> Self {
        GeneticConfig {
            population_size: 50,
            generations: 20,
            mutation_rate: 0.1,
            crossover_rate: 0.8,
            tournament_size: 3,
            cpu_core_usage: 0.7,
            seed: None,
        }
    }
}

/// Scalar to maximize. Implemented for any `Fn(&Individual) -> f64`.
pub trait Fitness: Sync {
    fn fitness(&self, individual: &Individual) -> f64;
}

impl<F> Fitness for F
where
    F: Fn(&Individual) -> f64 + Sync,
{
    fn fitness(&self, individual: &Individual) -> f64 {
        self(individual)
    }
}

/// Sharpe ratio of a full backtest of `base` with the individual merged in.
/// Configs that fail to resolve or never trade score negative infinity.
pub struct BacktestFitness<'a> {
    bars: &'a [Bar],
    base: &'a StrategyConfig,
    backtest: &'a BacktestConfig,
    periods_per_year: f64,
}

impl<'a> BacktestFitness<'a> {
    /// Checks the series once up front; corrupt data is the one fatal case.
    pub fn new(
        bars: &'a [Bar],
        base: &'a StrategyConfig,
        backtest: &'a BacktestConfig,
    ) -> Result<Self, SearchError> {
        validate_series(bars)?;
        Ok(BacktestFitness {
            bars,
            base,
            backtest,
            periods_per_year: backtest.periods_per_year(bars),
        })
    }
}

impl Fitness for BacktestFitness<'_> {
    fn fitness(&self, individual: &Individual) -> f64 {
        let strategy = match self.base.merged(individual).resolve() {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, "individual does not resolve");
                return f64::NEG_INFINITY;
            }
        };
        let report = simulate(self.bars, &strategy, self.backtest, None);
        if report.total_trades < 1 {
            return f64::NEG_INFINITY;
        }
        let sharpe = evaluate(&report, self.periods_per_year).sharpe_ratio;
        if sharpe.is_nan() { f64::NEG_INFINITY } else { sharpe }
    }
}

/// One evaluated generation, as handed to observers.
#[derive(Debug, Clone)]
pub struct GenerationReport<'p> {
    pub generation: usize,
    pub population: &'p [Individual],
    pub scores: &'p [f64],
    pub best_fitness: f64,
    pub history: &'p [f64],
}

#[derive(Debug, Clone)]
pub struct GeneticOutcome {
    pub best: Individual,
    pub best_fitness: f64,
    /// Best fitness seen so far, one sample per generation.
    pub history: Vec<f64>,
    pub final_population: Vec<Individual>,
}

pub struct GeneticOptimizer<'r, F: Fitness> {
    ranges: &'r BTreeMap<String, ParamRange>,
    config: GeneticConfig,
    fitness: F,
    pool: Option<WorkerPool>,
    token: CancellationToken,
    rng: StdRng,
}

impl<'r, F: Fitness> GeneticOptimizer<'r, F> {
    /// Builds the optimizer and its worker pool. A pool that cannot be built
    /// leaves the optimizer sequential.
    pub fn new(
        ranges: &'r BTreeMap<String, ParamRange>,
        config: GeneticConfig,
        fitness: F,
        token: CancellationToken,
    ) -> Self {
        let threads = worker_count(config.cpu_core_usage);
        let pool = match WorkerPool::new(threads, token.clone()) {
            Ok(pool) => Some(pool),
            Err(e) => {
                warn!(error = %e, "worker pool unavailable, evaluating sequentially");
                None
            }
        };
        Self::with_pool(ranges, config, fitness, token, pool)
    }

    pub fn sequential(
        ranges: &'r BTreeMap<String, ParamRange>,
        config: GeneticConfig,
        fitness: F,
        token: CancellationToken,
    ) -> Self {
        Self::with_pool(ranges, config, fitness, token, None)
    }

    fn with_pool(
        ranges: &'r BTreeMap<String, ParamRange>,
        config: GeneticConfig,
        fitness: F,
        token: CancellationToken,
        pool: Option<WorkerPool>,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        GeneticOptimizer {
            ranges,
            config,
            fitness,
            pool,
            token,
            rng,
        }
    }

    pub fn run(&mut self) -> Result<GeneticOutcome, SearchError> {
        self.run_observed(|_| {})
    }

    /// Runs every generation, calling `observer` after each one is scored.
    pub fn run_observed<O>(&mut self, mut observer: O) -> Result<GeneticOutcome, SearchError>
    where
        O: FnMut(&GenerationReport<'_>),
    {
        let size = self.config.population_size.max(1);
        let mut population: Vec<Individual> = (0..size)
            .map(|_| random_individual(self.ranges, &mut self.rng))
            .collect();
        let mut best: Option<(Individual, f64)> = None;
        let mut history = Vec::with_capacity(self.config.generations);

        info!(
            population = size,
            generations = self.config.generations,
            workers = self.pool.as_ref().map(|p| p.threads()).unwrap_or(1),
            "genetic search started"
        );

        for generation in 0..self.config.generations {
            let scores = match self.score(&population) {
                Ok(scores) => scores,
                Err(_) => {
                    warn!(generation, "search interrupted");
                    return Err(SearchError::Interrupted {
                        completed: generation,
                        history,
                        best,
                    });
                }
            };

            for (individual, &score) in population.iter().zip(&scores) {
                let improves = match &best {
                    None => true,
                    Some((_, best_score)) => score > *best_score,
                };
                if improves {
                    best = Some((individual.clone(), score));
                }
            }
            let best_fitness = best.as_ref().map(|(_, s)| *s).unwrap_or(f64::NEG_INFINITY);
            history.push(best_fitness);

            let finite: Vec<f64> = scores.iter().copied().filter(|s| s.is_finite()).collect();
            let mean = if finite.is_empty() {
                f64::NAN
            } else {
                finite.iter().sum::<f64>() / finite.len() as f64
            };
            info!(generation, best_fitness, mean_fitness = mean, trading = finite.len(), "generation scored");

            observer(&GenerationReport {
                generation,
                population: &population,
                scores: &scores,
                best_fitness,
                history: &history,
            });

            if generation + 1 < self.config.generations {
                population = self.breed(&population, &scores, best.as_ref().map(|(ind, _)| ind));
            }
        }

        let (best, best_fitness) = best.unwrap_or_else(|| (population[0].clone(), f64::NEG_INFINITY));
        Ok(GeneticOutcome {
            best,
            best_fitness,
            history,
            final_population: population,
        })
    }

    /// Fitness per individual, in population order. Falls back to sequential
    /// evaluation when the pool fails for any reason but cancellation.
    fn score(&self, population: &[Individual]) -> Result<Vec<f64>, PoolError> {
        if let Some(pool) = &self.pool {
            let fitness = &self.fitness;
            match pool.map(population, |ind| fitness.fitness(ind)) {
                Ok(scores) => return Ok(scores),
                Err(PoolError::Cancelled) => return Err(PoolError::Cancelled),
                Err(e) => warn!(error = %e, "parallel evaluation failed, retrying sequentially"),
            }
        }
        self.score_sequential(population)
    }

    fn score_sequential(&self, population: &[Individual]) -> Result<Vec<f64>, PoolError> {
        let mut scores = Vec::with_capacity(population.len());
        for individual in population {
            if self.token.is_cancelled() {
                return Err(PoolError::Cancelled);
            }
            let score = panic::catch_unwind(AssertUnwindSafe(|| self.fitness.fitness(individual)))
                .unwrap_or_else(|payload| {
                    warn!(reason = %panic_message(payload.as_ref()), "fitness evaluation panicked");
                    f64::NEG_INFINITY
                });
            scores.push(score);
        }
        Ok(scores)
    }

    fn breed(&mut self, population: &[Individual], scores: &[f64], elite: Option<&Individual>) -> Vec<Individual> {
        let size = population.len();
        let mut next = Vec::with_capacity(size);
        if let Some(elite) = elite {
            next.push(elite.clone());
        }
        let crossover_rate = self.config.crossover_rate.clamp(0.0, 1.0);
        let mutation_rate = self.config.mutation_rate.clamp(0.0, 1.0);

        while next.len() < size {
            let a = self.tournament(scores);
            let b = self.tournament(scores);
            let mut child = if self.rng.gen_bool(crossover_rate) {
                self.crossover(&population[a], &population[b])
            } else {
                population[a].clone()
            };
            if self.rng.gen_bool(mutation_rate) {
                self.mutate(&mut child);
            }
            clamp_individual(&mut child, self.ranges);
            next.push(child);
        }
        next
    }

    /// Index of the fittest of `tournament_size` random draws.
    fn tournament(&mut self, scores: &[f64]) -> usize {
        let rounds = self.config.tournament_size.max(1);
        let mut winner = self.rng.gen_range(0..scores.len());
        for _ in 1..rounds {
            let challenger = self.rng.gen_range(0..scores.len());
            if scores[challenger] > scores[winner] {
                winner = challenger;
            }
        }
        winner
    }

    /// Single cut over the ordered parameter names: head from `a`, tail from `b`.
    fn crossover(&mut self, a: &Individual, b: &Individual) -> Individual {
        let n = a.len();
        if n < 2 {
            return a.clone();
        }
        let cut = self.rng.gen_range(1..n);
        a.iter()
            .enumerate()
            .map(|(i, (key, value))| {
                let gene = if i < cut {
                    *value
                } else {
                    b.get(key).copied().unwrap_or(*value)
                };
                (key.clone(), gene)
            })
            .collect()
    }

    fn mutate(&mut self, individual: &mut Individual) {
        if self.ranges.is_empty() {
            return;
        }
        let index = self.rng.gen_range(0..self.ranges.len());
        if let Some((key, range)) = self.ranges.iter().nth(index) {
            individual.insert(key.clone(), range.random_value(&mut self.rng));
        }
    }
}

/// Genetic search for `base` over `bars`, returning the outcome and the base
/// config with the winning parameters merged in.
pub fn optimize_strategy(
    bars: &[Bar],
    base: &StrategyConfig,
    backtest: &BacktestConfig,
    config: GeneticConfig,
    token: CancellationToken,
    observer: impl FnMut(&GenerationReport<'_>),
) -> Result<(GeneticOutcome, StrategyConfig), SearchError> {
    let fitness = BacktestFitness::new(bars, base, backtest)?;
    let mut optimizer = GeneticOptimizer::new(&base.optimizable_params, config, fitness, token);
    let outcome = optimizer.run_observed(observer)?;
    let best_config = base.merged(&outcome.best);
    Ok((outcome, best_config))
}
