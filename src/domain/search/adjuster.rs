//! Local neighbour proposals for the cycle optimizer.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::domain::metrics::EvaluationReport;
use crate::domain::strategy::{ParamRange, StrategyConfig};

/// Sharpe below which the last result is not trusted to point uphill.
pub const GUIDED_MIN_SHARPE: f64 = 0.5;

pub struct LocalAdjuster<R: Rng> {
    rng: R,
}

impl LocalAdjuster<StdRng> {
    pub fn seeded(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        LocalAdjuster { rng }
    }
}

impl<R: Rng> LocalAdjuster<R> {
    pub fn new(rng: R) -> Self {
        LocalAdjuster { rng }
    }

    /// A neighbouring config: one parameter changed, either rerolled on its
    /// grid (probability `exploration`) or stepped once.
    pub fn propose(
        &mut self,
        config: &StrategyConfig,
        last: Option<&EvaluationReport>,
        exploration: f64,
    ) -> StrategyConfig {
        if config.optimizable_params.is_empty() {
            warn!(strategy = %config.name, "no optimizable parameters to adjust");
            return config.clone();
        }
        if self.rng.gen_bool(exploration.clamp(0.0, 1.0)) {
            self.random_mutation(config)
        } else {
            self.guided_step(config, last)
        }
    }

    /// Rerolls one uniformly chosen optimizable parameter.
    pub fn random_mutation(&mut self, config: &StrategyConfig) -> StrategyConfig {
        let Some((key, range)) = self.pick(config) else {
            return config.clone();
        };
        let value = range.random_value(&mut self.rng);
        debug!(param = %key, %value, "explore");

        let mut next = config.clone();
        next.params.insert(key, value);
        next
    }

    fn guided_step(&mut self, config: &StrategyConfig, last: Option<&EvaluationReport>) -> StrategyConfig {
        let Some((key, range)) = self.pick(config) else {
            return config.clone();
        };
        let current = config.get(&key).unwrap_or_else(|| range.min_value());

        let direction = match last {
            Some(e) if e.simulation.net_profit >= 0.0 && e.sharpe_ratio >= GUIDED_MIN_SHARPE => 1,
            _ => {
                if self.rng.gen_bool(0.5) {
                    1
                } else {
                    -1
                }
            }
        };

        let value = range.step_from(&current, direction);
        if value == current && config.optimizable_params.len() > 1 {
            return self.random_mutation(config);
        }
        debug!(param = %key, from = %current, to = %value, "step");

        let mut next = config.clone();
        next.params.insert(key, value);
        next
    }

    fn pick(&mut self, config: &StrategyConfig) -> Option<(String, ParamRange)> {
        let n = config.optimizable_params.len();
        if n == 0 {
            return None;
        }
        let index = self.rng.gen_range(0..n);
        config
            .optimizable_params
            .iter()
            .nth(index)
            .map(|(k, r)| (k.clone(), *r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::metrics::evaluate;
    use crate::domain::report::SimulationReport;
    use crate::domain::strategy::{ParamValue, StrategyKind};

    fn config() -> StrategyConfig {
        StrategyConfig::new("cross", StrategyKind::EmaCrossImpulse)
            .with_param("ema_fast", ParamValue::Int(9))
            .with_param("ema_slow", ParamValue::Int(20))
            .with_range("ema_fast", ParamRange::Int { min: 5, max: 15, step: 1 })
            .with_range("ema_slow", ParamRange::Int { min: 20, max: 40, step: 5 })
    }

    fn changed_keys(a: &StrategyConfig, b: &StrategyConfig) -> usize {
        a.params.iter().filter(|(k, v)| b.params.get(*k) != Some(v)).count()
    }

    fn strong_report() -> EvaluationReport {
        let sim = SimulationReport::build(
            100.0,
            110.0,
            vec![100.0, 102.0, 103.0, 106.0, 108.0, 110.0],
            vec![],
        );
        evaluate(&sim, 252.0)
    }

    #[test]
    fn changes_at_most_one_param_and_stays_on_grid() {
        let mut adj = LocalAdjuster::seeded(Some(11));
        let base = config();
        for _ in 0..200 {
            let next = adj.propose(&base, None, 0.5);
            assert!(changed_keys(&base, &next) <= 1);
            for (k, r) in &next.optimizable_params {
                assert!(r.contains(&next.get(k).unwrap()));
            }
            assert_eq!(next.name, base.name);
        }
    }

    #[test]
    fn exploitation_of_good_result_only_increases() {
        let report = strong_report();
        assert!(report.sharpe_ratio >= GUIDED_MIN_SHARPE);
        let mut adj = LocalAdjuster::seeded(Some(3));
        let base = config();
        for _ in 0..100 {
            let next = adj.propose(&base, Some(&report), 0.0);
            for key in ["ema_fast", "ema_slow"] {
                let before = base.get(key).unwrap().as_i64().unwrap();
                let after = next.get(key).unwrap().as_i64().unwrap();
                assert!(after >= before);
            }
        }
    }

    #[test]
    fn step_at_bound_falls_back_to_exploration() {
        let report = strong_report();
        let base = config()
            .with_param("ema_fast", ParamValue::Int(15))
            .with_param("ema_slow", ParamValue::Int(40));
        let mut adj = LocalAdjuster::seeded(Some(5));
        let mut moved = 0;
        for _ in 0..50 {
            if adj.propose(&base, Some(&report), 0.0) != base {
                moved += 1;
            }
        }
        assert!(moved > 0);
    }

    #[test]
    fn single_param_at_bound_stays_put() {
        let report = strong_report();
        let base = StrategyConfig::new("b", StrategyKind::EmaBreakout)
            .with_param("ema_breakout", ParamValue::Int(30))
            .with_range("ema_breakout", ParamRange::Int { min: 10, max: 30, step: 5 });
        let mut adj = LocalAdjuster::seeded(Some(9));
        assert_eq!(adj.propose(&base, Some(&report), 0.0), base);
    }

    #[test]
    fn nothing_to_adjust() {
        let base = StrategyConfig::new("b", StrategyKind::EmaBreakout);
        let mut adj = LocalAdjuster::seeded(Some(1));
        assert_eq!(adj.propose(&base, None, 1.0), base);
    }
}
