//! Bar granularity and the annualization factor it implies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ohlcv::Bar;

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub fn minutes(self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
        }
    }

    /// 252 trading days times the number of bars in a 24h day.
    pub fn periods_per_year(self) -> f64 {
        TRADING_DAYS_PER_YEAR * (1440 / self.minutes()) as f64
    }

    /// Picks the closest timeframe to the median spacing between bars.
    /// Returns `None` for fewer than two bars or a zero median.
    pub fn infer(bars: &[Bar]) -> Option<Timeframe> {
        if bars.len() < 2 {
            return None;
        }
        let mut gaps: Vec<i64> = bars
            .windows(2)
            .map(|w| (w[1].time - w[0].time).num_minutes())
            .collect();
        gaps.sort_unstable();
        let median = gaps[gaps.len() / 2];
        if median <= 0 {
            return None;
        }
        ALL.iter()
            .copied()
            .min_by_key(|tf| (tf.minutes() - median).abs())
    }
}

const ALL: [Timeframe; 7] = [
    Timeframe::M1,
    Timeframe::M5,
    Timeframe::M15,
    Timeframe::M30,
    Timeframe::H1,
    Timeframe::H4,
    Timeframe::D1,
];

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Timeframe::M1 => "M1",
            Timeframe::M5 => "M5",
            Timeframe::M15 => "M15",
            Timeframe::M30 => "M30",
            Timeframe::H1 => "H1",
            Timeframe::H4 => "H4",
            Timeframe::D1 => "D1",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "M1" => Ok(Timeframe::M1),
            "M5" => Ok(Timeframe::M5),
            "M15" => Ok(Timeframe::M15),
            "M30" => Ok(Timeframe::M30),
            "H1" => Ok(Timeframe::H1),
            "H4" => Ok(Timeframe::H4),
            "D1" => Ok(Timeframe::D1),
            other => Err(format!("unknown timeframe '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn bars_every(minutes: i64, n: usize) -> Vec<Bar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        (0..n)
            .map(|i| Bar {
                time: start + Duration::minutes(minutes * i as i64),
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                volume: 0.0,
            })
            .collect()
    }

    #[test]
    fn periods_per_year() {
        assert_eq!(Timeframe::M1.periods_per_year(), 252.0 * 1440.0);
        assert_eq!(Timeframe::H1.periods_per_year(), 252.0 * 24.0);
        assert_eq!(Timeframe::D1.periods_per_year(), 252.0);
    }

    #[test]
    fn infer_from_spacing() {
        assert_eq!(Timeframe::infer(&bars_every(60, 10)), Some(Timeframe::H1));
        assert_eq!(Timeframe::infer(&bars_every(15, 10)), Some(Timeframe::M15));
        assert_eq!(Timeframe::infer(&bars_every(1440, 10)), Some(Timeframe::D1));
    }

    #[test]
    fn infer_needs_two_bars() {
        assert_eq!(Timeframe::infer(&bars_every(60, 1)), None);
    }

    #[test]
    fn parse_round_trip() {
        assert_eq!("h4".parse::<Timeframe>(), Ok(Timeframe::H4));
        assert_eq!(Timeframe::M30.to_string(), "M30");
        assert!("W1".parse::<Timeframe>().is_err());
    }
}
