//! INI file configuration adapter.

use crate::domain::error::EvotraderError;
use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::path::Path;

/// Case-sensitive INI reader; strategy names in `[risk.limits]` keep their case.
#[derive(Debug)]
pub struct FileConfigAdapter {
    config: Ini,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, EvotraderError> {
        let path = path.as_ref();
        let mut config = Ini::new_cs();
        config.load(path).map_err(|reason| EvotraderError::ConfigParse {
            file: path.display().to_string(),
            reason,
        })?;
        Ok(Self { config })
    }

    pub fn from_string(content: &str) -> Result<Self, EvotraderError> {
        let mut config = Ini::new_cs();
        config
            .read(content.to_string())
            .map_err(|reason| EvotraderError::ConfigParse {
                file: "<string>".to_string(),
                reason,
            })?;
        Ok(Self { config })
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.config.get(section, key)
    }

    fn keys(&self, section: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .config
            .get_map_ref()
            .get(section)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn from_string_parses_config() {
        let content = r#"
[backtest]
initial_capital = 10000.0
data_file = bars.csv

[strategy]
name = Breakout Fast
kind = ema_breakout
"#;
        let adapter = FileConfigAdapter::from_string(content).unwrap();
        assert_eq!(
            adapter.get_string("backtest", "data_file"),
            Some("bars.csv".to_string())
        );
        assert_eq!(
            adapter.get_string("strategy", "name"),
            Some("Breakout Fast".to_string())
        );
    }

    #[test]
    fn get_string_returns_none_for_missing_key() {
        let adapter = FileConfigAdapter::from_string("[backtest]\ninitial_capital = 100\n").unwrap();
        assert_eq!(adapter.get_string("backtest", "missing"), None);
        assert_eq!(adapter.get_string("missing_section", "key"), None);
    }

    #[test]
    fn keys_are_sorted_and_case_preserved() {
        let adapter =
            FileConfigAdapter::from_string("[risk.limits]\nTrend = 50\nBreakout = 20\n").unwrap();
        assert_eq!(adapter.keys("risk.limits"), vec!["Breakout", "Trend"]);
        assert!(adapter.has_section("risk.limits"));
        assert!(!adapter.has_section("risk"));
        assert_eq!(adapter.get_string("risk.limits", "trend"), None);
    }

    #[test]
    fn from_file_reads_config() {
        let file = create_temp_config("[genetic]\npopulation_size = 30\n");
        let adapter = FileConfigAdapter::from_file(file.path()).unwrap();
        assert_eq!(
            adapter.get_string("genetic", "population_size"),
            Some("30".to_string())
        );
    }

    #[test]
    fn from_file_returns_error_for_missing_file() {
        let err = FileConfigAdapter::from_file("/nonexistent/path/config.ini").unwrap_err();
        assert!(matches!(err, EvotraderError::ConfigParse { .. }));
    }
}
