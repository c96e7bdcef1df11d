//! Exponential Moving Average.
//!
//! k = 2/(p+1) where p is the period clipped to the series length. The value
//! at index p-1 is the SMA of the first p closes; before that the running mean
//! is reported so the series always has one finite value per bar. After the
//! seed, EMA[i] = C[i]*k + EMA[i-1]*(1-k).

/// EMA over a close series. Empty input or period 0 yields an empty vector.
pub fn ema(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.is_empty() {
        return Vec::new();
    }

    let period = period.min(closes.len());
    let k = 2.0 / (period as f64 + 1.0);
    let mut values = Vec::with_capacity(closes.len());
    let mut sum = 0.0;
    let mut ema = 0.0;

    for (i, &close) in closes.iter().enumerate() {
        if i < period {
            sum += close;
            ema = sum / (i + 1) as f64;
        } else {
            ema = close * k + ema * (1.0 - k);
        }
        values.push(ema);
    }

    values
}

/// EMA value at `index` computed over `closes[..=index]` only.
pub fn ema_at(closes: &[f64], period: usize, index: usize) -> Option<f64> {
    if index >= closes.len() {
        return None;
    }
    ema(&closes[..=index], period).last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_seed_is_sma() {
        let series = ema(&[10.0, 20.0, 30.0], 3);
        let expected_sma = (10.0 + 20.0 + 30.0) / 3.0;
        assert!((series[2] - expected_sma).abs() < f64::EPSILON);
    }

    #[test]
    fn ema_warmup_reports_running_mean() {
        let series = ema(&[10.0, 20.0, 30.0, 40.0], 3);
        assert!((series[0] - 10.0).abs() < f64::EPSILON);
        assert!((series[1] - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ema_recursive_calculation() {
        let series = ema(&[10.0, 20.0, 30.0, 40.0, 50.0], 3);

        let k = 2.0 / 4.0;
        let sma = 20.0;
        let ema_3 = 40.0 * k + sma * (1.0 - k);
        let ema_4 = 50.0 * k + ema_3 * (1.0 - k);
        assert!((series[3] - ema_3).abs() < f64::EPSILON);
        assert!((series[4] - ema_4).abs() < f64::EPSILON);
    }

    #[test]
    fn ema_period_clipped_to_series_length() {
        let series = ema(&[10.0, 20.0], 50);
        assert_eq!(series.len(), 2);
        assert!((series[1] - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ema_period_1_tracks_closes() {
        let series = ema(&[10.0, 20.0, 30.0], 1);
        assert_eq!(series, vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn ema_equal_prices() {
        let series = ema(&[100.0; 5], 3);
        assert!(series.iter().all(|v| (v - 100.0).abs() < f64::EPSILON));
    }

    #[test]
    fn ema_empty_and_zero_period() {
        assert!(ema(&[], 3).is_empty());
        assert!(ema(&[10.0, 20.0], 0).is_empty());
    }

    #[test]
    fn ema_at_ignores_future_bars() {
        let closes = [10.0, 20.0, 30.0, 1000.0];
        let at_two = ema_at(&closes, 3, 2).unwrap();
        assert!((at_two - 20.0).abs() < f64::EPSILON);
        assert!(ema_at(&closes, 3, 9).is_none());
    }
}
