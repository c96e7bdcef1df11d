//! Rule evaluators: bars + indicators → ENTRY / NO_TRADE.
//!
//! Every evaluator is a pure function of its [`EvalContext`]; identical inputs
//! always produce identical decisions. Shared gates run in a fixed order:
//! style, bar count, freshness, spread, cooldown, volatility. Evaluator-specific
//! trigger logic runs only once all gates pass.

pub mod breakout;
pub mod no_trade;
pub mod reversion;

pub use breakout::BreakoutEvaluator;
pub use no_trade::NoTradeEvaluator;
pub use reversion::ReversionEvaluator;

use crate::domain::bar::Bar;
use crate::domain::decision::{Decision, EntrySignal, NoTradeReason, Side};
use crate::domain::indicator::{IndicatorSet, rolling_high, rolling_low};
use crate::domain::instrument::{Instrument, TradingStyle};
use chrono::{DateTime, Utc};

/// Everything a rule needs to decide at bar `index`. Only `bars[..=index]`
/// may influence the decision.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub instrument: &'a Instrument,
    pub bars: &'a [Bar],
    pub indicators: &'a IndicatorSet,
    pub index: usize,
    /// Wall-clock time for freshness checks; `None` in replay.
    pub now: Option<DateTime<Utc>>,
    /// Live bid/ask spread as a fraction of price, when known.
    pub spread_pct: Option<f64>,
    /// Bars elapsed since the last exit on this instrument.
    pub bars_since_exit: Option<usize>,
}

impl<'a> EvalContext<'a> {
    pub fn bar(&self) -> &'a Bar {
        &self.bars[self.index]
    }
}

pub trait RuleEvaluator: Send + Sync {
    fn id(&self) -> &str;

    /// Indicator series this evaluator reads, computed over the full slice.
    fn indicators(&self, bars: &[Bar]) -> IndicatorSet;

    fn evaluate(&self, ctx: &EvalContext<'_>) -> Decision;
}

/// Tunables shared by the threshold-based evaluators.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleParams {
    /// Restricts the evaluator to one style; `None` accepts any.
    pub style: Option<TradingStyle>,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub atr_period: usize,
    pub breakout_lookback: usize,
    pub swing_lookback: usize,
    pub min_body_ratio: f64,
    pub long_only: bool,
    pub atr_stop_mult: f64,
    /// Minimum stop distance as a fraction of entry.
    pub min_stop_pct: f64,
    pub target_r_multiples: Vec<f64>,
    /// Minimum ATR / close.
    pub min_atr_pct: f64,
    pub max_spread_pct: f64,
    pub cooldown_bars: usize,
    /// Overrides the style's freshness limit.
    pub max_bar_age_secs: Option<i64>,
    /// A market is flat when |fast EMA - slow EMA| is within this many ATRs.
    pub flat_band_atr: f64,
}

impl Default for RuleParams {
    fn default() -> Self {
        RuleParams {
            style: None,
            ema_fast: 20,
            ema_slow: 50,
            atr_period: 14,
            breakout_lookback: 20,
            swing_lookback: 10,
            min_body_ratio: 0.5,
            long_only: false,
            atr_stop_mult: 2.0,
            min_stop_pct: 0.005,
            target_r_multiples: vec![2.0, 3.0],
            min_atr_pct: 0.002,
            max_spread_pct: 0.005,
            cooldown_bars: 3,
            max_bar_age_secs: None,
            flat_band_atr: 0.5,
        }
    }
}

impl RuleParams {
    /// Bars required before the first decision can be made.
    pub fn required_bars(&self) -> usize {
        self.ema_slow
            .max(self.atr_period + 1)
            .max(self.breakout_lookback + 1)
            .max(self.swing_lookback + 1)
    }

    /// Tuning for persistent directional movers.
    pub fn trending() -> Self {
        RuleParams::default()
    }

    /// Tuning for mean-reverting instruments.
    pub fn range_bound() -> Self {
        RuleParams {
            breakout_lookback: 15,
            swing_lookback: 5,
            min_body_ratio: 0.4,
            atr_stop_mult: 1.5,
            target_r_multiples: vec![1.5],
            cooldown_bars: 2,
            ..RuleParams::default()
        }
    }

    /// Tuning for high-volatility instruments: stronger candles, wider stops.
    pub fn volatile() -> Self {
        RuleParams {
            min_body_ratio: 0.6,
            atr_stop_mult: 3.0,
            min_stop_pct: 0.01,
            min_atr_pct: 0.01,
            max_spread_pct: 0.01,
            target_r_multiples: vec![2.5, 4.0],
            cooldown_bars: 5,
            ..RuleParams::default()
        }
    }
}

/// Run-level overrides layered on top of an evaluator's own tuning.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleOverrides {
    pub long_only: Option<bool>,
    pub cooldown_bars: Option<usize>,
    pub max_spread_pct: Option<f64>,
    pub max_bar_age_secs: Option<i64>,
}

impl RuleParams {
    pub fn with_overrides(mut self, overrides: &RuleOverrides) -> Self {
        if let Some(v) = overrides.long_only {
            self.long_only = v;
        }
        if let Some(v) = overrides.cooldown_bars {
            self.cooldown_bars = v;
        }
        if let Some(v) = overrides.max_spread_pct {
            self.max_spread_pct = v;
        }
        if overrides.max_bar_age_secs.is_some() {
            self.max_bar_age_secs = overrides.max_bar_age_secs;
        }
        self
    }
}

/// Trend regime from close vs. the fast and slow EMA baselines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    Up,
    Down,
    Flat,
}

pub fn classify_regime(close: f64, ema_fast: f64, ema_slow: f64) -> Regime {
    if close > ema_fast && ema_fast > ema_slow {
        Regime::Up
    } else if close < ema_fast && ema_fast < ema_slow {
        Regime::Down
    } else {
        Regime::Flat
    }
}

/// Shared gates in their fixed order. `Some(reason)` means NO_TRADE.
pub fn check_gates(ctx: &EvalContext<'_>, params: &RuleParams) -> Option<NoTradeReason> {
    if let Some(style) = params.style
        && style != ctx.instrument.style
    {
        return Some(NoTradeReason::StyleMismatch);
    }
    if ctx.index >= ctx.bars.len()
        || ctx.index + 1 < params.required_bars()
        || ctx.indicators.len() <= ctx.index
    {
        return Some(NoTradeReason::InsufficientBars);
    }
    let bar = ctx.bar();
    if let Some(now) = ctx.now {
        let limit = params
            .max_bar_age_secs
            .unwrap_or_else(|| ctx.instrument.style.default_max_bar_age_secs());
        if (now - bar.timestamp).num_seconds() > limit {
            return Some(NoTradeReason::StaleBar);
        }
    }
    if let Some(spread) = ctx.spread_pct
        && spread > params.max_spread_pct
    {
        return Some(NoTradeReason::SpreadHigh);
    }
    if let Some(since) = ctx.bars_since_exit
        && since < params.cooldown_bars
    {
        return Some(NoTradeReason::Cooldown);
    }
    let atr = ctx.indicators.atr[ctx.index];
    if atr <= 0.0 || atr / bar.close < params.min_atr_pct {
        return Some(NoTradeReason::VolatilityLow);
    }
    None
}

/// Wider of the structural and volatility stops, then pushed out to the
/// minimum distance.
pub fn place_stop(side: Side, entry: f64, structural: f64, atr: f64, params: &RuleParams) -> f64 {
    let vol_distance = params.atr_stop_mult * atr;
    let structural_distance = match side {
        Side::Long => entry - structural,
        Side::Short => structural - entry,
    };
    let min_distance = params.min_stop_pct * entry;
    let distance = structural_distance.max(vol_distance).max(min_distance);
    entry - side.sign() * distance
}

pub fn place_targets(side: Side, entry: f64, stop: f64, r_multiples: &[f64]) -> Vec<f64> {
    let distance = (entry - stop).abs();
    r_multiples
        .iter()
        .map(|r| entry + side.sign() * r * distance)
        .collect()
}

/// Swing extreme over the last `lookback` bars including the current one.
pub fn swing_level(bars: &[Bar], index: usize, lookback: usize, side: Side) -> Option<f64> {
    match side {
        Side::Long => rolling_low(bars, lookback, index + 1),
        Side::Short => rolling_high(bars, lookback, index + 1),
    }
}

/// Deterministic confidence in [0, 1] from candle dominance and trend spread.
pub fn confidence(body_ratio: f64, ema_fast: f64, ema_slow: f64, atr: f64) -> f64 {
    let trend = if atr > 0.0 {
        ((ema_fast - ema_slow).abs() / atr).min(1.0)
    } else {
        0.0
    };
    (0.4 + 0.4 * body_ratio + 0.2 * trend).clamp(0.0, 1.0)
}

pub(crate) fn build_entry(
    ctx: &EvalContext<'_>,
    params: &RuleParams,
    side: Side,
    structural: f64,
) -> Decision {
    let bar = ctx.bar();
    let entry = bar.close;
    let atr = ctx.indicators.atr[ctx.index];
    let stop = place_stop(side, entry, structural, atr, params);
    let targets = place_targets(side, entry, stop, &params.target_r_multiples);
    Decision::Entry(EntrySignal {
        instrument: ctx.instrument.symbol.clone(),
        side,
        entry,
        stop,
        targets,
        confidence: confidence(
            bar.body_ratio(),
            ctx.indicators.ema_fast[ctx.index],
            ctx.indicators.ema_slow[ctx.index],
            atr,
        ),
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::{Duration, TimeZone};

    pub fn ts(i: usize) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(i as i64)
    }

    /// Gentle uptrend with a wide, strong breakout candle at the end.
    pub fn uptrend_with_breakout(n: usize) -> Vec<Bar> {
        let mut bars: Vec<Bar> = (0..n - 1)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.2 + if i % 2 == 0 { 0.3 } else { -0.3 };
                Bar {
                    timestamp: ts(i),
                    open: base - 0.1,
                    high: base + 1.0,
                    low: base - 1.0,
                    close: base + 0.1,
                    volume: 1000.0,
                }
            })
            .collect();
        let last_close = bars[n - 2].close;
        let prior_high = bars.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let close = prior_high + 1.5;
        bars.push(Bar {
            timestamp: ts(n - 1),
            open: last_close,
            high: close + 0.2,
            low: last_close - 0.2,
            close,
            volume: 5000.0,
        });
        bars
    }

    /// Mirror of `uptrend_with_breakout`.
    pub fn downtrend_with_breakdown(n: usize) -> Vec<Bar> {
        uptrend_with_breakout(n)
            .into_iter()
            .map(|b| Bar {
                timestamp: b.timestamp,
                open: 400.0 - b.open,
                high: 400.0 - b.low,
                low: 400.0 - b.high,
                close: 400.0 - b.close,
                volume: b.volume,
            })
            .collect()
    }

    /// Sideways oscillation.
    pub fn range_bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let base = 100.0 + if i % 4 < 2 { 1.0 } else { -1.0 };
                Bar {
                    timestamp: ts(i),
                    open: base,
                    high: base + 1.0,
                    low: base - 1.0,
                    close: base + 0.2,
                    volume: 1000.0,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regime_classification() {
        assert_eq!(classify_regime(110.0, 105.0, 100.0), Regime::Up);
        assert_eq!(classify_regime(90.0, 95.0, 100.0), Regime::Down);
        assert_eq!(classify_regime(101.0, 105.0, 100.0), Regime::Flat);
    }

    #[test]
    fn stop_takes_wider_of_structural_and_volatility() {
        let params = RuleParams {
            atr_stop_mult: 2.0,
            min_stop_pct: 0.0,
            ..RuleParams::default()
        };
        // structural distance 3, volatility distance 2 → 3
        let stop = place_stop(Side::Long, 100.0, 97.0, 1.0, &params);
        assert!((stop - 97.0).abs() < 1e-9);
        // structural distance 1, volatility distance 4 → 4
        let stop = place_stop(Side::Short, 100.0, 101.0, 2.0, &params);
        assert!((stop - 104.0).abs() < 1e-9);
    }

    #[test]
    fn stop_enforces_minimum_distance() {
        let params = RuleParams {
            atr_stop_mult: 0.1,
            min_stop_pct: 0.02,
            ..RuleParams::default()
        };
        let stop = place_stop(Side::Long, 100.0, 99.9, 0.1, &params);
        assert!((stop - 98.0).abs() < 1e-9);
    }

    #[test]
    fn targets_at_fixed_r_multiples() {
        let targets = place_targets(Side::Long, 100.0, 98.0, &[2.0, 3.0]);
        assert_eq!(targets, vec![104.0, 106.0]);
        let targets = place_targets(Side::Short, 100.0, 102.0, &[1.0]);
        assert_eq!(targets, vec![98.0]);
    }

    #[test]
    fn required_bars_is_max_of_windows() {
        let params = RuleParams::default();
        assert_eq!(params.required_bars(), 50);
    }

    #[test]
    fn overrides_only_touch_set_fields() {
        let overrides = RuleOverrides {
            long_only: Some(true),
            cooldown_bars: Some(7),
            ..RuleOverrides::default()
        };
        let params = RuleParams::volatile().with_overrides(&overrides);
        assert!(params.long_only);
        assert_eq!(params.cooldown_bars, 7);
        assert_eq!(params.atr_stop_mult, RuleParams::volatile().atr_stop_mult);
    }

    #[test]
    fn confidence_bounded() {
        assert!((0.0..=1.0).contains(&confidence(1.0, 110.0, 100.0, 1.0)));
        assert!((confidence(0.0, 100.0, 100.0, 0.0) - 0.4).abs() < 1e-12);
    }
}
