//! Domain error types.

/// Top-level error type for evotrader.
#[derive(Debug, thiserror::Error)]
pub enum EvotraderError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error("corrupt price series at bar {index}: {reason}")]
    CorruptSeries { index: usize, reason: String },

    #[error("optimization interrupted after {generations} generation(s)")]
    Interrupted { generations: usize },

    #[error("report error: {reason}")]
    Report { reason: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&EvotraderError> for std::process::ExitCode {
    fn from(err: &EvotraderError) -> Self {
        let code: u8 = match err {
            EvotraderError::Io(_) | EvotraderError::Json(_) | EvotraderError::Report { .. } => 1,
            EvotraderError::ConfigParse { .. }
            | EvotraderError::ConfigMissing { .. }
            | EvotraderError::ConfigInvalid { .. } => 2,
            EvotraderError::Data { .. } | EvotraderError::CorruptSeries { .. } => 5,
            EvotraderError::Interrupted { .. } => 130,
        };
        std::process::ExitCode::from(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_invalid_message_names_section_and_key() {
        let err = EvotraderError::ConfigInvalid {
            section: "genetic".into(),
            key: "population_size".into(),
            reason: "must be at least 2".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid config value [genetic] population_size: must be at least 2"
        );
    }

    #[test]
    fn corrupt_series_message() {
        let err = EvotraderError::CorruptSeries {
            index: 7,
            reason: "high below low".into(),
        };
        assert_eq!(err.to_string(), "corrupt price series at bar 7: high below low");
    }
}
