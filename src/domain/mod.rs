//! Core domain types and logic: market data, indicators, strategies, the
//! simulated broker, risk governance, evaluation and parameter search.

pub mod ohlcv;
pub mod timeframe;
pub mod indicator;
pub mod strategy;
pub mod signal;
pub mod position;
pub mod ledger;
pub mod broker;
pub mod report;
pub mod sizing;
pub mod stops;
pub mod risk;
pub mod backtest;
pub mod metrics;
pub mod search;
pub mod config_validation;
pub mod error;
