//! Exponential Moving Average.
//!
//! k = 2/(n+1), seeded with the first value, then EMA[i] = EMA[i-1] + k*(x[i] - EMA[i-1]).
//! No warmup: every output point is valid.

/// EMA over an arbitrary value series. Empty for `period == 0` or empty input.
pub fn calculate_ema(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.is_empty() {
        return Vec::new();
    }

    let k = smoothing_factor(period);
    let mut out = Vec::with_capacity(values.len());
    let mut ema = values[0];
    out.push(ema);
    for &x in &values[1..] {
        ema += k * (x - ema);
        out.push(ema);
    }
    out
}

pub fn smoothing_factor(period: usize) -> f64 {
    2.0 / (period as f64 + 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn ema_seed_is_first_value() {
        let series = calculate_ema(&[10.0, 20.0, 30.0], 3);
        assert_relative_eq!(series[0], 10.0);
    }

    #[test]
    fn ema_recursive_calculation() {
        let series = calculate_ema(&[10.0, 20.0, 30.0, 40.0], 3);
        let k = 0.5;
        let e1 = 10.0 + k * (20.0 - 10.0);
        let e2 = e1 + k * (30.0 - e1);
        let e3 = e2 + k * (40.0 - e2);
        assert_relative_eq!(series[1], e1);
        assert_relative_eq!(series[2], e2);
        assert_relative_eq!(series[3], e3);
    }

    #[test]
    fn ema_period_1_tracks_input() {
        let series = calculate_ema(&[10.0, 20.0, 30.0], 1);
        assert_eq!(series, vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn ema_equal_prices() {
        let series = calculate_ema(&[100.0; 5], 3);
        for v in series {
            assert_relative_eq!(v, 100.0);
        }
    }

    #[test]
    fn ema_empty_and_period_0() {
        assert!(calculate_ema(&[], 3).is_empty());
        assert!(calculate_ema(&[1.0, 2.0], 0).is_empty());
    }

    #[test]
    fn ema_smoothing_factor() {
        assert_relative_eq!(smoothing_factor(10), 2.0 / 11.0);
    }

    proptest! {
        #[test]
        fn ema_follows_recursion(
            closes in prop::collection::vec(1.0f64..1000.0, 2..200),
            period in 1usize..60,
        ) {
            let ema = calculate_ema(&closes, period);
            let k = 2.0 / (period as f64 + 1.0);
            prop_assert_eq!(ema.len(), closes.len());
            prop_assert_eq!(ema[0], closes[0]);
            for i in 1..closes.len() {
                let expected = ema[i - 1] + k * (closes[i] - ema[i - 1]);
                prop_assert!((ema[i] - expected).abs() <= 1e-9 * expected.abs().max(1.0));
            }
        }
    }
}
