//! CSV file adapters: price bars and the closed-trade log.

use crate::domain::error::EvotraderError;
use crate::domain::ohlcv::Bar;
use crate::domain::risk::TradeRecord;
use crate::ports::data_port::DataPort;
use crate::ports::trade_log_port::TradeLogPort;
use chrono::{NaiveDate, NaiveDateTime};
use std::fs::{self, OpenOptions};
use std::path::PathBuf;

const TIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y.%m.%d %H:%M",
];
const WRITE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn data_error(reason: String) -> EvotraderError {
    EvotraderError::Data { reason }
}

/// Accepts the common timestamp layouts; a bare date means midnight.
pub fn parse_time(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Column positions resolved from the header row, case-insensitively.
fn column(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
}

fn required_column(headers: &csv::StringRecord, names: &[&str]) -> Result<usize, EvotraderError> {
    column(headers, names).ok_or_else(|| data_error(format!("missing {} column", names[0])))
}

fn field<'r>(record: &'r csv::StringRecord, index: usize, name: &str, line: u64) -> Result<&'r str, EvotraderError> {
    record
        .get(index)
        .ok_or_else(|| data_error(format!("line {line}: missing {name} value")))
}

fn number(record: &csv::StringRecord, index: usize, name: &str, line: u64) -> Result<f64, EvotraderError> {
    let raw = field(record, index, name, line)?;
    raw.trim()
        .parse()
        .map_err(|e| data_error(format!("line {line}: invalid {name} value '{raw}': {e}")))
}

/// Bars from a CSV file with a `time,open,high,low,close[,volume]` header.
/// Rows are kept in file order.
pub struct CsvAdapter {
    path: PathBuf,
}

impl CsvAdapter {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl DataPort for CsvAdapter {
    fn load_bars(&self) -> Result<Vec<Bar>, EvotraderError> {
        let content = fs::read_to_string(&self.path)
            .map_err(|e| data_error(format!("failed to read {}: {}", self.path.display(), e)))?;

        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());
        let headers = rdr
            .headers()
            .map_err(|e| data_error(format!("CSV parse error: {}", e)))?
            .clone();

        let time_col = required_column(&headers, &["time", "date", "datetime", "timestamp"])?;
        let open_col = required_column(&headers, &["open"])?;
        let high_col = required_column(&headers, &["high"])?;
        let low_col = required_column(&headers, &["low"])?;
        let close_col = required_column(&headers, &["close"])?;
        let volume_col = column(&headers, &["volume", "tick_volume"]);

        let mut bars = Vec::new();
        for result in rdr.records() {
            let record = result.map_err(|e| data_error(format!("CSV parse error: {}", e)))?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);

            let raw_time = field(&record, time_col, "time", line)?;
            let time = parse_time(raw_time)
                .ok_or_else(|| data_error(format!("line {line}: invalid time '{raw_time}'")))?;

            bars.push(Bar {
                time,
                open: number(&record, open_col, "open", line)?,
                high: number(&record, high_col, "high", line)?,
                low: number(&record, low_col, "low", line)?,
                close: number(&record, close_col, "close", line)?,
                volume: match volume_col {
                    Some(col) => number(&record, col, "volume", line)?,
                    None => 0.0,
                },
            });
        }

        if bars.is_empty() {
            return Err(data_error(format!("{} contains no bars", self.path.display())));
        }
        Ok(bars)
    }
}

/// Closed-trade log with a `strategy,close_time,result` header.
pub struct CsvTradeLog {
    path: PathBuf,
}

impl CsvTradeLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl TradeLogPort for CsvTradeLog {
    fn load_trades(&self) -> Result<Vec<TradeRecord>, EvotraderError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)
            .map_err(|e| data_error(format!("failed to read {}: {}", self.path.display(), e)))?;

        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());
        let headers = rdr
            .headers()
            .map_err(|e| data_error(format!("CSV parse error: {}", e)))?
            .clone();
        let strategy_col = required_column(&headers, &["strategy"])?;
        let time_col = required_column(&headers, &["close_time", "time"])?;
        let result_col = required_column(&headers, &["result", "profit"])?;

        let mut trades = Vec::new();
        for result in rdr.records() {
            let record = result.map_err(|e| data_error(format!("CSV parse error: {}", e)))?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);

            let raw_time = field(&record, time_col, "close_time", line)?;
            trades.push(TradeRecord {
                strategy: field(&record, strategy_col, "strategy", line)?.to_string(),
                close_time: parse_time(raw_time)
                    .ok_or_else(|| data_error(format!("line {line}: invalid close_time '{raw_time}'")))?,
                result: number(&record, result_col, "result", line)?,
            });
        }
        Ok(trades)
    }

    fn append(&self, trades: &[TradeRecord]) -> Result<(), EvotraderError> {
        let is_new = !self.path.exists();
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut wtr = csv::Writer::from_writer(file);

        let io = |e: csv::Error| data_error(format!("failed to write {}: {}", self.path.display(), e));
        if is_new {
            wtr.write_record(["strategy", "close_time", "result"]).map_err(io)?;
        }
        for trade in trades {
            let time = trade.close_time.format(WRITE_TIME_FORMAT).to_string();
            let result = trade.result.to_string();
            wtr.write_record([trade.strategy.as_str(), time.as_str(), result.as_str()])
                .map_err(io)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn load_bars_reads_every_row() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "eurusd.csv",
            "time,open,high,low,close,volume\n\
             2024-01-15 10:00:00,1.1000,1.1010,1.0990,1.1005,120\n\
             2024-01-15 10:01:00,1.1005,1.1012,1.1001,1.1010,80\n",
        );
        let bars = CsvAdapter::new(path).load_bars().unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].time, parse_time("2024-01-15 10:00:00").unwrap());
        assert_eq!(bars[0].open, 1.1000);
        assert_eq!(bars[0].high, 1.1010);
        assert_eq!(bars[0].low, 1.0990);
        assert_eq!(bars[1].close, 1.1010);
        assert_eq!(bars[1].volume, 80.0);
    }

    #[test]
    fn header_order_and_case_do_not_matter() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "bars.csv",
            "Close,Open,Low,High,Date\n1.2,1.1,1.0,1.3,2024-03-01\n",
        );
        let bars = CsvAdapter::new(path).load_bars().unwrap();
        assert_eq!(bars[0].close, 1.2);
        assert_eq!(bars[0].high, 1.3);
        assert_eq!(bars[0].volume, 0.0);
        assert_eq!(bars[0].time, parse_time("2024-03-01 00:00:00").unwrap());
    }

    #[test]
    fn bad_number_reports_line() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "bars.csv", "time,open,high,low,close\n2024-03-01,1.1,x,1.0,1.2\n");
        let err = CsvAdapter::new(path).load_bars().unwrap_err();
        assert!(matches!(err, EvotraderError::Data { ref reason } if reason.contains("line 2") && reason.contains("high")));
    }

    #[test]
    fn missing_column_and_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.csv", "time,open,high,low\n2024-03-01,1,1,1\n");
        assert!(CsvAdapter::new(path).load_bars().is_err());
        let path = write(&dir, "b.csv", "time,open,high,low,close\n");
        assert!(CsvAdapter::new(path).load_bars().is_err());
        assert!(CsvAdapter::new(dir.path().join("absent.csv")).load_bars().is_err());
    }

    #[test]
    fn time_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 5, 2)
            .unwrap()
            .and_hms_opt(13, 45, 0)
            .unwrap();
        assert_eq!(parse_time("2024-05-02 13:45:00"), Some(expected));
        assert_eq!(parse_time("2024-05-02T13:45:00"), Some(expected));
        assert_eq!(parse_time("2024-05-02 13:45"), Some(expected));
        assert_eq!(parse_time("2024.05.02 13:45"), Some(expected));
        assert_eq!(parse_time("02/05/2024"), None);
    }

    #[test]
    fn missing_trade_log_is_empty() {
        let dir = TempDir::new().unwrap();
        let log = CsvTradeLog::new(dir.path().join("trades.csv"));
        assert!(log.load_trades().unwrap().is_empty());
    }

    #[test]
    fn trade_log_appends_and_reloads() {
        let dir = TempDir::new().unwrap();
        let log = CsvTradeLog::new(dir.path().join("trades.csv"));
        let at = parse_time("2024-05-02 13:45:00").unwrap();
        let first = vec![TradeRecord {
            strategy: "Breakout".into(),
            close_time: at,
            result: -12.5,
        }];
        let second = vec![TradeRecord {
            strategy: "Reversion".into(),
            close_time: at,
            result: 30.0,
        }];
        log.append(&first).unwrap();
        log.append(&second).unwrap();

        let loaded = log.load_trades().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], first[0]);
        assert_eq!(loaded[1], second[0]);
    }
}
