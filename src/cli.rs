//! CLI definition and dispatch.

use chrono::{Local, NaiveDateTime};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::adapters::csv_adapter::{CsvAdapter, CsvTradeLog, parse_time};
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::json_report_adapter::JsonReportAdapter;
use crate::domain::backtest::{BacktestConfig, run_backtest};
use crate::domain::config_validation::{AppConfig, load_app_config};
use crate::domain::error::EvotraderError;
use crate::domain::metrics::{EvaluationReport, evaluate};
use crate::domain::ohlcv::Bar;
use crate::domain::risk::{RiskGovernor, RiskLimits, TradeRecord};
use crate::domain::search::cycles::run_cycles;
use crate::domain::search::genetic::optimize_strategy;
use crate::domain::search::pool::CancellationToken;
use crate::domain::search::{Individual, OptimizationResult, SearchError, SearchMethod};
use crate::domain::strategy::StrategyConfig;
use crate::ports::data_port::DataPort;
use crate::ports::report_port::ReportPort;
use crate::ports::trade_log_port::TradeLogPort;

#[derive(Parser, Debug)]
#[command(name = "evotrader", about = "EMA/ATR strategy backtester and parameter optimizer")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a single backtest
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Bar CSV, overriding [backtest] data_file
        #[arg(short, long)]
        data: Option<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Append the closed trades to this CSV log
        #[arg(long)]
        trade_log: Option<PathBuf>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Genetic search over the optimizable parameters
    Optimize {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        data: Option<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        generations: Option<usize>,
        #[arg(long)]
        population: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Hill-climbing tuning cycles around the current parameters
    Tune {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        data: Option<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        cycles: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Replay today's trades from a log and print the risk state
    RiskStatus {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        trade_log: PathBuf,
        /// Evaluation time, defaults to now
        #[arg(long)]
        at: Option<String>,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

/// Installs the stderr subscriber. `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub fn run(cli: Cli) -> ExitCode {
    init_tracing();
    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

/// Dispatches one subcommand.
pub fn execute(cli: Cli) -> Result<(), EvotraderError> {
    match cli.command {
        Command::Backtest {
            config,
            data,
            output,
            trade_log,
            dry_run,
        } => run_backtest_command(&config, data.as_deref(), output.as_deref(), trade_log.as_deref(), dry_run),
        Command::Optimize {
            config,
            data,
            output,
            generations,
            population,
            seed,
        } => run_optimize(&config, data.as_deref(), output.as_deref(), generations, population, seed),
        Command::Tune {
            config,
            data,
            output,
            cycles,
            seed,
        } => run_tune(&config, data.as_deref(), output.as_deref(), cycles, seed),
        Command::RiskStatus { config, trade_log, at } => run_risk_status(&config, &trade_log, at.as_deref()),
        Command::Validate { config } => run_validate(&config),
    }
}

pub fn load_config(path: &Path) -> Result<AppConfig, EvotraderError> {
    eprintln!("Loading config from {}", path.display());
    let adapter = FileConfigAdapter::from_file(path)?;
    load_app_config(&adapter)
}

/// The bar file: the command-line override, else `[backtest] data_file`
/// resolved against the config file's directory.
fn data_path(config_path: &Path, app: &AppConfig, cli_override: Option<&Path>) -> Result<PathBuf, EvotraderError> {
    if let Some(path) = cli_override {
        return Ok(path.to_path_buf());
    }
    let raw = app
        .data_file
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| EvotraderError::ConfigMissing {
            section: "backtest".into(),
            key: "data_file".into(),
        })?;
    let path = PathBuf::from(raw);
    if path.is_relative() {
        if let Some(dir) = config_path.parent() {
            return Ok(dir.join(path));
        }
    }
    Ok(path)
}

fn load_bars(path: &Path) -> Result<Vec<Bar>, EvotraderError> {
    eprintln!("Loading bars from {}", path.display());
    let bars = CsvAdapter::new(path.to_path_buf()).load_bars()?;
    info!(bars = bars.len(), "price data loaded");
    Ok(bars)
}

/// Token cancelled on Ctrl-C. The handler belongs to the coordinator; pool
/// workers only observe the token.
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let handler_token = token.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        warn!(error = %e, "could not install Ctrl-C handler");
    }
    token
}

fn print_evaluation(e: &EvaluationReport) {
    let s = &e.simulation;
    println!("Initial capital:  {:.2}", s.initial_capital);
    println!("Final capital:    {:.2}", s.final_capital);
    println!("Net profit:       {:.2}", s.net_profit);
    println!("Trades:           {} ({} won, {} lost)", s.total_trades, s.won, s.lost);
    println!("Win rate:         {:.2}%", s.win_rate);
    println!("Profit factor:    {:.4}", s.profit_factor);
    println!("Max drawdown:     {:.2}%", s.max_drawdown * 100.0);
    println!("Sharpe:           {:.4}", e.sharpe_ratio);
    println!("Sortino:          {:.4}", e.sortino_ratio);
    println!("Calmar:           {:.4}", e.calmar_ratio);
    println!("Win/loss ratio:   {:.4}", e.win_loss_ratio);
    println!("Viable:           {}", if e.is_viable() { "yes" } else { "no" });
}

fn run_backtest_command(
    config_path: &Path,
    data_override: Option<&Path>,
    output: Option<&Path>,
    trade_log: Option<&Path>,
    dry_run: bool,
) -> Result<(), EvotraderError> {
    let app = load_config(config_path)?;
    let data = data_path(config_path, &app, data_override)?;
    if dry_run {
        eprintln!("Configuration valid; would backtest {} on {}", app.strategy.name, data.display());
        return Ok(());
    }

    let bars = load_bars(&data)?;
    let mut governor = match (&app.risk, bars.first()) {
        (Some(limits), Some(first)) => Some(RiskGovernor::new(limits.clone(), first.time.date())),
        _ => None,
    };

    eprintln!("Backtesting {} ({})", app.strategy.name, app.strategy.kind);
    let report = run_backtest(&bars, &app.strategy, &app.backtest, governor.as_mut())?;
    let evaluation = evaluate(&report, app.backtest.periods_per_year(&bars));
    print_evaluation(&evaluation);

    if let Some(path) = trade_log {
        let records: Vec<TradeRecord> = report
            .trades
            .iter()
            .map(|t| TradeRecord {
                strategy: t.position.strategy.clone(),
                close_time: t.closed_at,
                result: t.result,
            })
            .collect();
        CsvTradeLog::new(path.to_path_buf()).append(&records)?;
        eprintln!("Appended {} trade(s) to {}", records.len(), path.display());
    }

    if let Some(path) = output {
        JsonReportAdapter::new().write_evaluation(&app.strategy, &evaluation, &path.to_string_lossy())?;
        eprintln!("Report written to {}", path.display());
    }
    Ok(())
}

fn require_optimizable(strategy: &StrategyConfig) -> Result<(), EvotraderError> {
    if strategy.optimizable_params.is_empty() {
        return Err(EvotraderError::ConfigMissing {
            section: "optimizable".into(),
            key: "<any parameter range>".into(),
        });
    }
    Ok(())
}

/// Full backtest of `params` merged into `base`, for reporting.
fn best_metrics(
    bars: &[Bar],
    base: &StrategyConfig,
    params: &Individual,
    bt: &BacktestConfig,
) -> Result<EvaluationReport, EvotraderError> {
    let report = run_backtest(bars, &base.merged(params), bt, None)?;
    Ok(evaluate(&report, bt.periods_per_year(bars)))
}

fn optimization_result(
    strategy: &StrategyConfig,
    method: SearchMethod,
    params: Individual,
    metrics: Option<EvaluationReport>,
    history: Vec<f64>,
    interrupted: bool,
) -> OptimizationResult {
    OptimizationResult {
        strategy: strategy.name.clone(),
        method,
        timestamp: Local::now().naive_local(),
        viable: metrics.as_ref().is_some_and(EvaluationReport::is_viable),
        interrupted,
        optimal_params: params,
        best_metrics: metrics,
        history,
    }
}

fn finish_search(
    result: &OptimizationResult,
    output: Option<&Path>,
) -> Result<(), EvotraderError> {
    println!("Strategy:         {}", result.strategy);
    for (key, value) in &result.optimal_params {
        println!("  {key} = {value}");
    }
    if let Some(metrics) = &result.best_metrics {
        print_evaluation(metrics);
    }
    if let Some(path) = output {
        JsonReportAdapter::new().write_optimization(result, &path.to_string_lossy())?;
        eprintln!("Result written to {}", path.display());
    }
    Ok(())
}

/// Writes what an interrupted search found, then surfaces the interruption.
fn flush_interrupted(
    bars: &[Bar],
    app: &AppConfig,
    method: SearchMethod,
    err: SearchError,
    output: Option<&Path>,
) -> EvotraderError {
    let SearchError::Interrupted { history, best, .. } = &err else {
        return err.into();
    };
    let params = best.as_ref().map(|(ind, _)| ind.clone()).unwrap_or_default();
    let metrics = if params.is_empty() {
        None
    } else {
        best_metrics(bars, &app.strategy, &params, &app.backtest).ok()
    };
    let result = optimization_result(&app.strategy, method, params, metrics, history.clone(), true);
    if let Err(e) = finish_search(&result, output) {
        warn!(error = %e, "could not write partial result");
    }
    err.into()
}

fn run_optimize(
    config_path: &Path,
    data_override: Option<&Path>,
    output: Option<&Path>,
    generations: Option<usize>,
    population: Option<usize>,
    seed: Option<u64>,
) -> Result<(), EvotraderError> {
    let app = load_config(config_path)?;
    require_optimizable(&app.strategy)?;
    let bars = load_bars(&data_path(config_path, &app, data_override)?)?;

    let mut genetic = app.genetic.clone();
    if let Some(g) = generations {
        genetic.generations = g.max(1);
    }
    if let Some(p) = population {
        genetic.population_size = p.max(2);
    }
    if seed.is_some() {
        genetic.seed = seed;
    }

    eprintln!(
        "Optimizing {} over {} parameter(s): {} x {}",
        app.strategy.name,
        app.strategy.optimizable_params.len(),
        genetic.population_size,
        genetic.generations
    );
    let token = interrupt_token();
    let (outcome, best_config) =
        match optimize_strategy(&bars, &app.strategy, &app.backtest, genetic, token, |_| {}) {
            Ok(found) => found,
            Err(err) => return Err(flush_interrupted(&bars, &app, SearchMethod::Genetic, err, output)),
        };

    let report = run_backtest(&bars, &best_config, &app.backtest, None)?;
    let metrics = evaluate(&report, app.backtest.periods_per_year(&bars));
    let result = optimization_result(
        &app.strategy,
        SearchMethod::Genetic,
        outcome.best,
        Some(metrics),
        outcome.history,
        false,
    );
    finish_search(&result, output)
}

fn run_tune(
    config_path: &Path,
    data_override: Option<&Path>,
    output: Option<&Path>,
    cycles: Option<usize>,
    seed: Option<u64>,
) -> Result<(), EvotraderError> {
    let app = load_config(config_path)?;
    require_optimizable(&app.strategy)?;
    let bars = load_bars(&data_path(config_path, &app, data_override)?)?;

    let mut cycle_config = app.cycles.clone();
    if let Some(c) = cycles {
        cycle_config.cycles = c.max(1);
    }
    if seed.is_some() {
        cycle_config.seed = seed;
    }

    eprintln!("Tuning {} for {} cycle(s)", app.strategy.name, cycle_config.cycles);
    let token = interrupt_token();
    let outcome = match run_cycles(&bars, &app.strategy, &app.backtest, &cycle_config, &token) {
        Ok(outcome) => outcome,
        Err(err) => return Err(flush_interrupted(&bars, &app, SearchMethod::Cycles, err, output)),
    };

    let history = outcome.convergence();
    let params = outcome
        .best_config
        .as_ref()
        .map(StrategyConfig::optimizable_values)
        .unwrap_or_default();
    let result = optimization_result(&app.strategy, SearchMethod::Cycles, params, outcome.best, history, false);
    finish_search(&result, output)
}

fn run_risk_status(config_path: &Path, trade_log: &Path, at: Option<&str>) -> Result<(), EvotraderError> {
    let app = load_config(config_path)?;
    let now: NaiveDateTime = match at {
        Some(raw) => parse_time(raw).ok_or_else(|| EvotraderError::Data {
            reason: format!("invalid --at time '{raw}'"),
        })?,
        None => Local::now().naive_local(),
    };

    let limits = app.risk.unwrap_or_else(|| RiskLimits {
        capital: app.backtest.broker.initial_capital,
        ..RiskLimits::default()
    });
    let trades = CsvTradeLog::new(trade_log.to_path_buf()).load_trades()?;
    let mut governor = RiskGovernor::new(limits, now.date());
    let replayed = governor.replay(&trades, now.date());
    eprintln!("Replayed {replayed} of {} trade(s) from {}", trades.len(), trade_log.display());

    let summary = governor.summary(now);
    println!("{}", serde_json::to_string_pretty(&summary)?);
    println!(
        "can_trade({}): {}",
        app.strategy.name,
        governor.can_trade(Some(&app.strategy.name), now)
    );
    println!("can_trade(global): {}", governor.can_trade(None, now));
    Ok(())
}

fn run_validate(config_path: &Path) -> Result<(), EvotraderError> {
    let app = load_config(config_path)?;
    println!(
        "Configuration OK: strategy '{}' ({}), {} optimizable parameter(s)",
        app.strategy.name,
        app.strategy.kind,
        app.strategy.optimizable_params.len()
    );
    Ok(())
}
