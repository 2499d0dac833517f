//! JSON report writer.
//!
//! Non-finite metrics (an infinite profit factor, a negative-infinity
//! fitness) are written as `null`.

use crate::domain::error::EvotraderError;
use crate::domain::metrics::EvaluationReport;
use crate::domain::search::OptimizationResult;
use crate::domain::strategy::StrategyConfig;
use crate::ports::report_port::ReportPort;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Serialize)]
struct BacktestDocument<'a> {
    strategy: &'a StrategyConfig,
    viable: bool,
    evaluation: &'a EvaluationReport,
}

#[derive(Debug, Default)]
pub struct JsonReportAdapter;

impl JsonReportAdapter {
    pub fn new() -> Self {
        Self
    }

    fn write_json<T: Serialize>(&self, value: &T, output_path: &str) -> Result<(), EvotraderError> {
        let path = Path::new(output_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(path).map_err(|e| EvotraderError::Report {
            reason: format!("failed to create {}: {}", path.display(), e),
        })?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

impl ReportPort for JsonReportAdapter {
    fn write_evaluation(
        &self,
        strategy: &StrategyConfig,
        evaluation: &EvaluationReport,
        output_path: &str,
    ) -> Result<(), EvotraderError> {
        let doc = BacktestDocument {
            strategy,
            viable: evaluation.is_viable(),
            evaluation,
        };
        self.write_json(&doc, output_path)
    }

    fn write_optimization(
        &self,
        result: &OptimizationResult,
        output_path: &str,
    ) -> Result<(), EvotraderError> {
        self.write_json(result, output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::metrics::evaluate;
    use crate::domain::report::SimulationReport;
    use crate::domain::search::{Individual, SearchMethod};
    use crate::domain::strategy::{ParamValue, StrategyKind};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn evaluation() -> EvaluationReport {
        let sim = SimulationReport::build(100.0, 104.0, vec![100.0, 102.0, 101.0, 104.0], vec![]);
        evaluate(&sim, 252.0)
    }

    #[test]
    fn writes_optimization_document() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("nested/result.json");
        let mut params = Individual::new();
        params.insert("ema_breakout".into(), ParamValue::Int(15));

        let result = OptimizationResult {
            strategy: "Breakout".into(),
            method: SearchMethod::Genetic,
            timestamp: NaiveDate::from_ymd_opt(2024, 6, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
            viable: true,
            interrupted: false,
            optimal_params: params,
            best_metrics: Some(evaluation()),
            history: vec![f64::NEG_INFINITY, 0.4, 1.2],
        };
        JsonReportAdapter::new()
            .write_optimization(&result, out.to_str().unwrap())
            .unwrap();

        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(json["strategy"], "Breakout");
        assert_eq!(json["method"], "genetic");
        assert_eq!(json["viable"], true);
        assert_eq!(json["optimal_params"]["ema_breakout"], 15);
        assert!(json["history"][0].is_null());
        assert_eq!(json["history"][2], 1.2);
        assert_eq!(json["best_metrics"]["net_profit"], 4.0);
        assert!(json["best_metrics"]["sharpe_ratio"].is_number());
        // no losing trades: infinite profit factor
        assert!(json["best_metrics"]["profit_factor"].is_null());
    }

    #[test]
    fn writes_backtest_document() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("bt.json");
        let strategy = StrategyConfig::new("Breakout", StrategyKind::EmaBreakout)
            .with_param("ema_breakout", ParamValue::Int(20));
        let eval = evaluation();
        JsonReportAdapter::new()
            .write_evaluation(&strategy, &eval, out.to_str().unwrap())
            .unwrap();

        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(json["strategy"]["kind"], "ema_breakout");
        assert_eq!(json["viable"], eval.is_viable());
        assert_eq!(json["evaluation"]["total_trades"], 0);
    }
}
