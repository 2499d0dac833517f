//! Configuration loading and validation.
//!
//! Each section is parsed into its typed config and checked before any run
//! starts. Failures name the offending section and key.

use std::collections::BTreeMap;

use crate::domain::backtest::BacktestConfig;
use crate::domain::broker::{BrokerConfig, DEFAULT_PIP_SIZE, DEFAULT_PIP_VALUE_PER_LOT};
use crate::domain::error::EvotraderError;
use crate::domain::risk::RiskLimits;
use crate::domain::search::cycles::CycleConfig;
use crate::domain::search::genetic::GeneticConfig;
use crate::domain::sizing::{LotLimits, SymbolSpec};
use crate::domain::stops::StopManager;
use crate::domain::strategy::{ParamRange, ParamValue, StrategyConfig, StrategyKind};
use crate::domain::timeframe::Timeframe;
use crate::ports::config_port::ConfigPort;

const BACKTEST: &str = "backtest";
const STRATEGY: &str = "strategy";
const OPTIMIZABLE: &str = "optimizable";
const GENETIC: &str = "genetic";
const CYCLES: &str = "cycles";
const RISK: &str = "risk";
const RISK_LIMITS: &str = "risk.limits";
const TRAILING: &str = "trailing";

/// Everything a run needs, loaded from one file.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_file: Option<String>,
    pub backtest: BacktestConfig,
    pub strategy: StrategyConfig,
    pub genetic: GeneticConfig,
    pub cycles: CycleConfig,
    /// Present only when the file has a `[risk]` section.
    pub risk: Option<RiskLimits>,
}

pub fn load_app_config(config: &dyn ConfigPort) -> Result<AppConfig, EvotraderError> {
    let backtest = load_backtest_config(config)?;
    let risk = if config.has_section(RISK) || config.has_section(RISK_LIMITS) {
        Some(load_risk_limits(config, backtest.broker.initial_capital)?)
    } else {
        None
    };
    Ok(AppConfig {
        data_file: config.get_string(BACKTEST, "data_file"),
        backtest,
        strategy: load_strategy_config(config)?,
        genetic: load_genetic_config(config)?,
        cycles: load_cycle_config(config)?,
        risk,
    })
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> EvotraderError {
    EvotraderError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn missing(section: &str, key: &str) -> EvotraderError {
    EvotraderError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    }
}

fn number(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<f64>, EvotraderError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Some)
            .ok_or_else(|| invalid(section, key, format!("expected a number, got '{raw}'"))),
    }
}

fn number_or(config: &dyn ConfigPort, section: &str, key: &str, default: f64) -> Result<f64, EvotraderError> {
    Ok(number(config, section, key)?.unwrap_or(default))
}

fn integer(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<i64>, EvotraderError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| invalid(section, key, format!("expected an integer, got '{raw}'"))),
    }
}

/// Integer of at least `min`.
fn count_or(config: &dyn ConfigPort, section: &str, key: &str, default: usize, min: usize) -> Result<usize, EvotraderError> {
    match integer(config, section, key)? {
        None => Ok(default),
        Some(v) if v >= min as i64 => Ok(v as usize),
        Some(_) => Err(invalid(section, key, format!("{key} must be at least {min}"))),
    }
}

fn flag_or(config: &dyn ConfigPort, section: &str, key: &str, default: bool) -> Result<bool, EvotraderError> {
    match config.get_string(section, key) {
        None => Ok(default),
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            _ => Err(invalid(section, key, format!("expected a boolean, got '{raw}'"))),
        },
    }
}

fn positive(section: &str, key: &str, value: f64) -> Result<f64, EvotraderError> {
    if value > 0.0 {
        Ok(value)
    } else {
        Err(invalid(section, key, format!("{key} must be positive")))
    }
}

fn non_negative(section: &str, key: &str, value: f64) -> Result<f64, EvotraderError> {
    if value >= 0.0 {
        Ok(value)
    } else {
        Err(invalid(section, key, format!("{key} must be non-negative")))
    }
}

fn probability(section: &str, key: &str, value: f64) -> Result<f64, EvotraderError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(invalid(section, key, format!("{key} must be between 0 and 1")))
    }
}

fn seed(config: &dyn ConfigPort, section: &str) -> Result<Option<u64>, EvotraderError> {
    match config.get_string(section, "seed") {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| invalid(section, "seed", format!("expected a non-negative integer, got '{raw}'"))),
    }
}

/// `[backtest] data_file`, required unless given on the command line.
pub fn data_file(config: &dyn ConfigPort) -> Result<String, EvotraderError> {
    match config.get_string(BACKTEST, "data_file") {
        Some(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => Err(missing(BACKTEST, "data_file")),
    }
}

pub fn load_backtest_config(config: &dyn ConfigPort) -> Result<BacktestConfig, EvotraderError> {
    let s = BACKTEST;
    let broker = BrokerConfig {
        initial_capital: positive(s, "initial_capital", number_or(config, s, "initial_capital", 10_000.0)?)?,
        instrument: config
            .get_string(s, "instrument")
            .map(|i| i.trim().to_string())
            .filter(|i| !i.is_empty())
            .unwrap_or_else(|| BrokerConfig::default().instrument),
        pip_size: positive(s, "pip_size", number_or(config, s, "pip_size", DEFAULT_PIP_SIZE)?)?,
        pip_value_per_lot: positive(
            s,
            "pip_value_per_lot",
            number_or(config, s, "pip_value_per_lot", DEFAULT_PIP_VALUE_PER_LOT)?,
        )?,
        commission_per_lot: non_negative(s, "commission_per_lot", number_or(config, s, "commission_per_lot", 0.0)?)?,
    };

    let risk_pct = number_or(config, s, "risk_pct", 1.0)?;
    if !(risk_pct > 0.0 && risk_pct <= 100.0) {
        return Err(invalid(s, "risk_pct", "risk_pct must be in (0, 100]"));
    }

    let defaults = SymbolSpec::default();
    let symbol = SymbolSpec {
        point: positive(s, "point", number_or(config, s, "point", defaults.point)?)?,
        tick_value: positive(s, "tick_value", number_or(config, s, "tick_value", defaults.tick_value)?)?,
        volume_step: positive(s, "volume_step", number_or(config, s, "volume_step", defaults.volume_step)?)?,
        volume_min: positive(s, "volume_min", number_or(config, s, "volume_min", defaults.volume_min)?)?,
        volume_max: number_or(config, s, "volume_max", defaults.volume_max)?,
    };
    if symbol.volume_max < symbol.volume_min {
        return Err(invalid(s, "volume_max", "volume_max must not be below volume_min"));
    }

    let default_limits = LotLimits::default();
    let lot_limits = LotLimits {
        min_lot: positive(s, "min_lot", number_or(config, s, "min_lot", default_limits.min_lot)?)?,
        max_lot: number_or(config, s, "max_lot", default_limits.max_lot)?,
    };
    if lot_limits.max_lot < lot_limits.min_lot {
        return Err(invalid(s, "max_lot", "max_lot must not be below min_lot"));
    }

    let timeframe = match config.get_string(s, "timeframe") {
        None => None,
        Some(raw) => Some(raw.parse::<Timeframe>().map_err(|reason| invalid(s, "timeframe", reason))?),
    };

    Ok(BacktestConfig {
        broker,
        risk_pct,
        symbol,
        lot_limits,
        stops: load_stop_manager(config)?,
        max_open_positions: count_or(config, s, "max_open_positions", 1, 1)?,
        timeframe,
    })
}

fn load_stop_manager(config: &dyn ConfigPort) -> Result<StopManager, EvotraderError> {
    let s = TRAILING;
    let defaults = StopManager::default();
    Ok(StopManager {
        break_even: flag_or(config, s, "break_even", defaults.break_even)?,
        trailing: flag_or(config, s, "trailing", defaults.trailing)?,
        break_even_factor: non_negative(
            s,
            "break_even_factor",
            number_or(config, s, "break_even_factor", defaults.break_even_factor)?,
        )?,
        trailing_factor: positive(
            s,
            "trailing_factor",
            number_or(config, s, "trailing_factor", defaults.trailing_factor)?,
        )?,
    })
}

/// Parses `min,max,step`. Any bound written with a decimal point or exponent
/// makes the whole range real-valued.
pub fn parse_range(raw: &str) -> Result<ParamRange, String> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    let [min, max, step] = parts.as_slice() else {
        return Err(format!("expected 'min,max,step', got '{raw}'"));
    };

    let is_real = parts.iter().any(|p| p.contains(['.', 'e', 'E']));
    let range = if is_real {
        let parse = |p: &str| p.parse::<f64>().map_err(|_| format!("'{p}' is not a number"));
        ParamRange::Float {
            min: parse(*min)?,
            max: parse(*max)?,
            step: parse(*step)?,
        }
    } else {
        let parse = |p: &str| p.parse::<i64>().map_err(|_| format!("'{p}' is not an integer"));
        ParamRange::Int {
            min: parse(*min)?,
            max: parse(*max)?,
            step: parse(*step)?,
        }
    };

    if range.is_valid() {
        Ok(range)
    } else {
        Err(format!("range '{raw}' needs max >= min and a positive step"))
    }
}

pub fn load_strategy_config(config: &dyn ConfigPort) -> Result<StrategyConfig, EvotraderError> {
    let name = match config.get_string(STRATEGY, "name") {
        Some(n) if !n.trim().is_empty() => n.trim().to_string(),
        _ => return Err(missing(STRATEGY, "name")),
    };
    let kind: StrategyKind = config
        .get_string(STRATEGY, "kind")
        .ok_or_else(|| missing(STRATEGY, "kind"))?
        .parse()
        .map_err(|reason: String| invalid(STRATEGY, "kind", reason))?;

    let mut strategy = StrategyConfig::new(name, kind);
    for key in config.keys(STRATEGY) {
        if key == "name" || key == "kind" {
            continue;
        }
        let raw = config.get_string(STRATEGY, &key).unwrap_or_default();
        let value = ParamValue::parse(&raw)
            .ok_or_else(|| invalid(STRATEGY, &key, format!("unparseable value '{raw}'")))?;
        strategy.params.insert(key, value);
    }

    for key in config.keys(OPTIMIZABLE) {
        let raw = config.get_string(OPTIMIZABLE, &key).unwrap_or_default();
        let range = parse_range(&raw).map_err(|reason| invalid(OPTIMIZABLE, &key, reason))?;
        strategy.optimizable_params.insert(key, range);
    }

    strategy.resolve()?;
    Ok(strategy)
}

pub fn load_genetic_config(config: &dyn ConfigPort) -> Result<GeneticConfig, EvotraderError> {
    let s = GENETIC;
    let d = GeneticConfig::default();

    let cpu_core_usage = number_or(config, s, "cpu_core_usage", d.cpu_core_usage)?;
    if !(cpu_core_usage > 0.0 && cpu_core_usage <= 1.0) {
        return Err(invalid(s, "cpu_core_usage", "cpu_core_usage must be in (0, 1]"));
    }

    Ok(GeneticConfig {
        population_size: count_or(config, s, "population_size", d.population_size, 2)?,
        generations: count_or(config, s, "generations", d.generations, 1)?,
        mutation_rate: probability(s, "mutation_rate", number_or(config, s, "mutation_rate", d.mutation_rate)?)?,
        crossover_rate: probability(s, "crossover_rate", number_or(config, s, "crossover_rate", d.crossover_rate)?)?,
        tournament_size: count_or(config, s, "tournament_size", d.tournament_size, 1)?,
        cpu_core_usage,
        seed: seed(config, s)?,
    })
}

pub fn load_cycle_config(config: &dyn ConfigPort) -> Result<CycleConfig, EvotraderError> {
    let s = CYCLES;
    let d = CycleConfig::default();
    Ok(CycleConfig {
        cycles: count_or(config, s, "cycles", d.cycles, 1)?,
        exploration: probability(s, "exploration", number_or(config, s, "exploration", d.exploration)?)?,
        seed: seed(config, s)?,
    })
}

/// `[risk]` and `[risk.limits]`. `capital` defaults to the backtest's initial
/// capital so percent-mode limits follow the account.
pub fn load_risk_limits(config: &dyn ConfigPort, default_capital: f64) -> Result<RiskLimits, EvotraderError> {
    let s = RISK;
    let d = RiskLimits::default();

    let global_limit = number(config, s, "global_limit")?
        .map(|v| non_negative(s, "global_limit", v))
        .transpose()?;

    let streak = |key: &str| -> Result<Option<u32>, EvotraderError> {
        match integer(config, s, key)? {
            None => Ok(None),
            Some(v) if v >= 1 && v <= u32::MAX as i64 => Ok(Some(v as u32)),
            Some(_) => Err(invalid(s, key, format!("{key} must be a positive integer"))),
        }
    };

    let cooldown_minutes = integer(config, s, "cooldown_minutes")?.unwrap_or(d.cooldown_minutes);
    if cooldown_minutes < 0 {
        return Err(invalid(s, "cooldown_minutes", "cooldown_minutes must be non-negative"));
    }

    let reduction_factor = number_or(config, s, "reduction_factor", d.reduction_factor)?;
    if !(reduction_factor > 0.0 && reduction_factor <= 1.0) {
        return Err(invalid(s, "reduction_factor", "reduction_factor must be in (0, 1]"));
    }

    let mut strategy_limits = BTreeMap::new();
    for key in config.keys(RISK_LIMITS) {
        let limit = number(config, RISK_LIMITS, &key)?.ok_or_else(|| missing(RISK_LIMITS, &key))?;
        strategy_limits.insert(key.clone(), non_negative(RISK_LIMITS, &key, limit)?);
    }

    Ok(RiskLimits {
        global_limit,
        strategy_limits,
        percent_mode: flag_or(config, s, "percent_mode", d.percent_mode)?,
        capital: positive(s, "capital", number_or(config, s, "capital", default_capital)?)?,
        cooldown_after_losses: streak("cooldown_after_losses")?,
        cooldown_minutes,
        reduce_after_losses: streak("reduce_after_losses")?,
        reduction_factor,
    })
}
