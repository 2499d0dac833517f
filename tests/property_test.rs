mod common;

use chrono::Duration;
use common::*;
use evotrader::domain::risk::{RiskGovernor, RiskLimits};
use evotrader::domain::search::pool::CancellationToken;
use evotrader::domain::search::genetic::{GeneticConfig, GeneticOptimizer};
use evotrader::domain::search::{Individual, clamp_individual};
use evotrader::domain::strategy::{ParamRange, ParamValue};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn ranges() -> BTreeMap<String, ParamRange> {
    let mut r = BTreeMap::new();
    r.insert("x".to_string(), ParamRange::Int { min: -5, max: 5, step: 1 });
    r.insert("y".to_string(), ParamRange::Float { min: 0.0, max: 2.0, step: 0.25 });
    r
}

proptest! {
    #[test]
    fn cooldown_lasts_exactly_the_configured_minutes(
        threshold in 1u32..5,
        minutes in 1i64..240,
        extra in 0u32..3,
    ) {
        let limits = RiskLimits {
            cooldown_after_losses: Some(threshold),
            cooldown_minutes: minutes,
            ..RiskLimits::default()
        };
        let mut governor = RiskGovernor::new(limits, start().date());
        let losses = threshold + extra;
        for i in 0..losses {
            if i < threshold {
                prop_assert!(governor.can_trade(Some("s"), at(i as i64)));
            }
            governor.register(Some("s"), -1.0, at(i as i64));
        }

        let last = at(losses as i64 - 1);
        prop_assert!(governor.in_cooldown("s", last + Duration::minutes(minutes - 1)));
        prop_assert!(!governor.in_cooldown("s", last + Duration::minutes(minutes)));
    }

    #[test]
    fn winning_trade_resets_the_streak(threshold in 2u32..6) {
        let limits = RiskLimits {
            cooldown_after_losses: Some(threshold),
            ..RiskLimits::default()
        };
        let mut governor = RiskGovernor::new(limits, start().date());
        for i in 0..threshold - 1 {
            governor.register(Some("s"), -1.0, at(i as i64));
        }
        governor.register(Some("s"), 2.0, at(100));
        governor.register(Some("s"), -1.0, at(101));
        prop_assert!(governor.can_trade(Some("s"), at(102)));
    }

    #[test]
    fn genetic_history_never_decreases(
        seed in any::<u64>(),
        population_size in 2usize..10,
        generations in 1usize..6,
    ) {
        let ranges = ranges();
        let config = GeneticConfig {
            population_size,
            generations,
            seed: Some(seed),
            ..GeneticConfig::default()
        };
        let fitness = |ind: &Individual| {
            let x = ind["x"].as_f64().unwrap_or(0.0);
            let y = ind["y"].as_f64().unwrap_or(0.0);
            -(x * x) - (y - 1.0).powi(2)
        };
        let mut optimizer = GeneticOptimizer::sequential(&ranges, config, fitness, CancellationToken::new());
        let outcome = optimizer.run().unwrap();

        prop_assert_eq!(outcome.history.len(), generations);
        prop_assert!(outcome.history.windows(2).all(|w| w[1] >= w[0]));
        prop_assert_eq!(outcome.final_population.len(), population_size);
        for ind in &outcome.final_population {
            for (key, value) in ind {
                prop_assert!(ranges[key].contains(value));
            }
        }
    }

    #[test]
    fn clamped_genes_land_on_the_grid(x in -100i64..100, y in -10.0f64..10.0) {
        let ranges = ranges();
        let mut ind = Individual::new();
        ind.insert("x".into(), ParamValue::Int(x));
        ind.insert("y".into(), ParamValue::Float(y));
        clamp_individual(&mut ind, &ranges);
        prop_assert!(ranges["x"].contains(&ind["x"]));
        prop_assert!(ranges["y"].contains(&ind["y"]));
    }
}
