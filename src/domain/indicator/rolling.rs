//! Rolling extremes over a trailing window.
//!
//! The window for index `i` is `bars[i-window..i]`: the current bar is
//! excluded so a breakout can be measured against the prior range. `None`
//! when fewer than `window` prior bars exist.

use crate::domain::bar::Bar;

pub fn rolling_high(bars: &[Bar], window: usize, index: usize) -> Option<f64> {
    if window == 0 || index < window || index > bars.len() {
        return None;
    }
    bars[index - window..index]
        .iter()
        .map(|b| b.high)
        .reduce(f64::max)
}

pub fn rolling_low(bars: &[Bar], window: usize, index: usize) -> Option<f64> {
    if window == 0 || index < window || index > bars.len() {
        return None;
    }
    bars[index - window..index]
        .iter()
        .map(|b| b.low)
        .reduce(f64::min)
}

pub fn rolling_high_series(bars: &[Bar], window: usize) -> Vec<Option<f64>> {
    (0..bars.len())
        .map(|i| rolling_high(bars, window, i))
        .collect()
}

pub fn rolling_low_series(bars: &[Bar], window: usize) -> Vec<Option<f64>> {
    (0..bars.len())
        .map(|i| rolling_low(bars, window, i))
        .collect()
}
