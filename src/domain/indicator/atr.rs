//! Volatility range (Wilder ATR).
//!
//! True range needs a previous close, so the first usable TR is at index 1.
//! ATR[period] = mean(TR[1..=period]); afterwards
//! ATR[i] = (ATR[i-1] * (period-1) + TR[i]) / period. Every index before
//! `period` is zero.

use crate::domain::bar::Bar;

pub fn volatility_range(bars: &[Bar], period: usize) -> Vec<f64> {
    let mut values = vec![0.0; bars.len()];
    if period == 0 || bars.len() <= period {
        return values;
    }

    let tr: Vec<f64> = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            if i == 0 {
                0.0
            } else {
                bar.true_range(bars[i - 1].close)
            }
        })
        .collect();

    let seed = tr[1..=period].iter().sum::<f64>() / period as f64;
    values[period] = seed;

    for i in (period + 1)..bars.len() {
        values[i] = (values[i - 1] * (period - 1) as f64 + tr[i]) / period as f64;
    }

    values
}

/// ATR at `index` using only bars up to and including `index`.
pub fn volatility_at(bars: &[Bar], period: usize, index: usize) -> f64 {
    if index >= bars.len() {
        return 0.0;
    }
    volatility_range(&bars[..=index], period)
        .last()
        .copied()
        .unwrap_or(0.0)
}
