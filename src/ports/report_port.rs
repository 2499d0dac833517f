//! Report output port trait.

use crate::domain::error::EvotraderError;
use crate::domain::metrics::EvaluationReport;
use crate::domain::search::OptimizationResult;
use crate::domain::strategy::StrategyConfig;

pub trait ReportPort {
    fn write_evaluation(
        &self,
        strategy: &StrategyConfig,
        evaluation: &EvaluationReport,
        output_path: &str,
    ) -> Result<(), EvotraderError>;

    fn write_optimization(
        &self,
        result: &OptimizationResult,
        output_path: &str,
    ) -> Result<(), EvotraderError>;
}
