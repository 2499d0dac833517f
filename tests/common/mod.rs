#![allow(dead_code)]

use chrono::{Duration, NaiveDate, NaiveDateTime};
pub use evotrader::domain::ohlcv::Bar;
use evotrader::domain::error::EvotraderError;
use evotrader::ports::data_port::DataPort;
use std::fs;
use std::path::{Path, PathBuf};

/// Bars handed straight to code that takes a `DataPort`.
pub struct MockDataPort {
    pub bars: Vec<Bar>,
}

impl DataPort for MockDataPort {
    fn load_bars(&self) -> Result<Vec<Bar>, EvotraderError> {
        if self.bars.is_empty() {
            return Err(EvotraderError::Data {
                reason: "no bars".into(),
            });
        }
        Ok(self.bars.clone())
    }
}

pub fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 4, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

pub fn at(minutes: i64) -> NaiveDateTime {
    start() + Duration::minutes(minutes)
}

pub fn make_bar(i: usize, open: f64, close: f64) -> Bar {
    Bar {
        time: at(i as i64),
        open,
        high: open.max(close) + 0.0001,
        low: open.min(close) - 0.0001,
        close,
        volume: 1.0,
    }
}

/// `n` one-minute bars, each closing `delta` above the last.
pub fn ramp(n: usize, first: f64, delta: f64) -> Vec<Bar> {
    (0..n)
        .map(|i| {
            let open = first + delta * i as f64;
            make_bar(i, open, open + delta)
        })
        .collect()
}

/// Flat, a small dip, one impulse candle breaking back above the EMA, then a
/// steady climb. An `ema_breakout` of 10 opens exactly one long on it.
pub fn breakout_then_rally() -> Vec<Bar> {
    let mut bars: Vec<Bar> = (0..29).map(|i| make_bar(i, 1.1000, 1.1000)).collect();
    bars.push(make_bar(29, 1.1000, 1.0995));
    bars.push(make_bar(30, 1.1000, 1.1030));
    let mut price = 1.1030;
    for i in 31..80 {
        bars.push(make_bar(i, price, price + 0.0002));
        price += 0.0002;
    }
    bars
}

/// Flat long enough to fill a 9/20 EMA window, a dip that drags the fast EMA
/// under the slow one, an impulse candle that lifts it back over, then a climb.
/// The 9/20 cross fires once, on the impulse candle.
pub fn cross_then_rally() -> Vec<Bar> {
    let mut bars: Vec<Bar> = (0..39).map(|i| make_bar(i, 1.1000, 1.1000)).collect();
    bars.push(make_bar(39, 1.1000, 1.0995));
    bars.push(make_bar(40, 1.1000, 1.1040));
    let mut price = 1.1040;
    for i in 41..100 {
        bars.push(make_bar(i, price, price + 0.0002));
        price += 0.0002;
    }
    bars
}

pub fn write_bars_csv(path: &Path, bars: &[Bar]) {
    let mut out = String::from("time,open,high,low,close,volume\n");
    for b in bars {
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            b.time.format("%Y-%m-%d %H:%M:%S"),
            b.open,
            b.high,
            b.low,
            b.close,
            b.volume
        ));
    }
    fs::write(path, out).unwrap();
}

pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

/// A breakout config over `data_file` with a small, seeded search setup.
pub fn breakout_ini(data_file: &str) -> String {
    format!(
        r#"
[backtest]
data_file = {data_file}
initial_capital = 10000
instrument = EURUSD
risk_pct = 1.0

[strategy]
name = Breakout
kind = ema_breakout
ema_breakout = 10
atr_period = 10

[optimizable]
ema_breakout = 8,12,1

[genetic]
population_size = 6
generations = 3
cpu_core_usage = 0.5
seed = 7

[cycles]
cycles = 4
seed = 11
"#
    )
}
