//! Technical indicator library.
//!
//! Pure functions over bar or close slices. Nothing here holds state, so
//! indicators for different instruments can be computed in parallel.

pub mod atr;
pub mod ema;
pub mod rolling;

pub use atr::{volatility_at, volatility_range};
pub use ema::{ema, ema_at};
pub use rolling::{rolling_high, rolling_high_series, rolling_low, rolling_low_series};

use crate::domain::bar::Bar;

/// Indicator series precomputed once per run so each bar evaluation is O(1).
#[derive(Debug, Clone, Default)]
pub struct IndicatorSet {
    pub ema_fast: Vec<f64>,
    pub ema_slow: Vec<f64>,
    pub atr: Vec<f64>,
}

impl IndicatorSet {
    pub fn compute(bars: &[Bar], fast: usize, slow: usize, atr_period: usize) -> Self {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        IndicatorSet {
            ema_fast: ema(&closes, fast),
            ema_slow: ema(&closes, slow),
            atr: volatility_range(bars, atr_period),
        }
    }

    pub fn len(&self) -> usize {
        self.atr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atr.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn indicator_set_lengths_match_bars() {
        let bars: Vec<Bar> = (0..30)
            .map(|i| Bar {
                timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                    + Duration::days(i),
                open: 100.0 + i as f64,
                high: 101.0 + i as f64,
                low: 99.0 + i as f64,
                close: 100.5 + i as f64,
                volume: 10.0,
            })
            .collect();
        let set = IndicatorSet::compute(&bars, 5, 20, 14);
        assert_eq!(set.len(), 30);
        assert_eq!(set.ema_fast.len(), 30);
        assert_eq!(set.ema_slow.len(), 30);
        assert!(set.ema_fast[29] > set.ema_slow[29]);
    }
}
