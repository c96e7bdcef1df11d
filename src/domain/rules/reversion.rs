//! Mean-reversion entries for range-bound instruments.

use super::{EvalContext, RuleEvaluator, RuleParams, build_entry, check_gates};
use crate::domain::bar::Bar;
use crate::domain::decision::{Decision, NoTradeReason, Side};
use crate::domain::indicator::{IndicatorSet, rolling_high, rolling_low};

/// Fades a failed probe of the range: the bar pierces the prior
/// `breakout_lookback` extreme and closes back inside it. Only fires while
/// the EMA spread sits inside `flat_band_atr` ATRs.
#[derive(Debug, Clone)]
pub struct ReversionEvaluator {
    id: String,
    params: RuleParams,
}

impl ReversionEvaluator {
    pub fn new(id: impl Into<String>, params: RuleParams) -> Self {
        ReversionEvaluator {
            id: id.into(),
            params,
        }
    }

    pub fn range_bound() -> Self {
        Self::new("reversion_range", RuleParams::range_bound())
    }

    pub fn params(&self) -> &RuleParams {
        &self.params
    }

    fn is_flat(&self, ctx: &EvalContext<'_>) -> bool {
        let spread = (ctx.indicators.ema_fast[ctx.index] - ctx.indicators.ema_slow[ctx.index]).abs();
        spread <= self.params.flat_band_atr * ctx.indicators.atr[ctx.index]
    }

    fn trigger(&self, ctx: &EvalContext<'_>) -> Option<(Side, f64)> {
        let p = &self.params;
        let bar = ctx.bar();
        if !self.is_flat(ctx) || bar.body_ratio() < p.min_body_ratio {
            return None;
        }
        let floor = rolling_low(ctx.bars, p.breakout_lookback, ctx.index)?;
        if bar.low < floor && bar.close > floor && bar.is_bullish() {
            return Some((Side::Long, bar.low));
        }
        if p.long_only {
            return None;
        }
        let ceiling = rolling_high(ctx.bars, p.breakout_lookback, ctx.index)?;
        if bar.high > ceiling && bar.close < ceiling && bar.is_bearish() {
            return Some((Side::Short, bar.high));
        }
        None
    }
}

impl RuleEvaluator for ReversionEvaluator {
    fn id(&self) -> &str {
        &self.id
    }

    fn indicators(&self, bars: &[Bar]) -> IndicatorSet {
        IndicatorSet::compute(
            bars,
            self.params.ema_fast,
            self.params.ema_slow,
            self.params.atr_period,
        )
    }

    fn evaluate(&self, ctx: &EvalContext<'_>) -> Decision {
        let symbol = &ctx.instrument.symbol;
        if let Some(reason) = check_gates(ctx, &self.params) {
            return Decision::no_trade(symbol, reason);
        }
        match self.trigger(ctx) {
            Some((side, probe_extreme)) => build_entry(ctx, &self.params, side, probe_extreme),
            None => Decision::no_trade(symbol, NoTradeReason::NoTrigger),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::instrument::{Instrument, TradingStyle};
    use crate::domain::rules::test_support::*;

    fn with_last(mut bars: Vec<Bar>, open: f64, high: f64, low: f64, close: f64) -> Vec<Bar> {
        let n = bars.len();
        bars.push(Bar {
            timestamp: ts(n),
            open,
            high,
            low,
            close,
            volume: 2000.0,
        });
        bars
    }

    fn eval_last(ev: &ReversionEvaluator, bars: &[Bar]) -> Decision {
        let inst = Instrument::new("WBC", TradingStyle::Swing).unwrap();
        let indicators = ev.indicators(bars);
        ev.evaluate(&EvalContext {
            instrument: &inst,
            bars,
            indicators: &indicators,
            index: bars.len() - 1,
            now: None,
            spread_pct: None,
            bars_since_exit: None,
        })
    }

    #[test]
    fn long_on_failed_probe_below_range() {
        let bars = with_last(range_bars(60), 98.3, 99.8, 97.4, 99.6);
        let ev = ReversionEvaluator::range_bound();
        let Decision::Entry(signal) = eval_last(&ev, &bars) else {
            panic!("expected entry");
        };
        assert_eq!(signal.side, Side::Long);
        assert!(signal.stop <= 97.4);
        assert_eq!(signal.targets.len(), 1);
        assert!(signal.targets[0] > signal.entry);
    }

    #[test]
    fn short_on_failed_probe_above_range() {
        let bars = with_last(range_bars(60), 101.7, 102.6, 100.2, 100.4);
        let ev = ReversionEvaluator::range_bound();
        let Decision::Entry(signal) = eval_last(&ev, &bars) else {
            panic!("expected entry");
        };
        assert_eq!(signal.side, Side::Short);
        assert!(signal.stop >= 102.6);
    }

    #[test]
    fn probe_outside_the_flat_band_is_ignored() {
        let bars = with_last(range_bars(60), 98.3, 99.8, 97.4, 99.6);
        let params = RuleParams {
            flat_band_atr: 0.0,
            ..RuleParams::range_bound()
        };
        let ev = ReversionEvaluator::new("reversion_range", params);
        assert_eq!(
            eval_last(&ev, &bars).reason(),
            Some(NoTradeReason::NoTrigger)
        );
    }

    #[test]
    fn close_outside_range_is_not_a_reversion() {
        let bars = with_last(range_bars(60), 98.3, 98.4, 96.0, 97.0);
        let ev = ReversionEvaluator::range_bound();
        assert_eq!(
            eval_last(&ev, &bars).reason(),
            Some(NoTradeReason::NoTrigger)
        );
    }

    #[test]
    fn trending_market_does_not_fire() {
        let bars = uptrend_with_breakout(80);
        let ev = ReversionEvaluator::range_bound();
        assert_eq!(
            eval_last(&ev, &bars).reason(),
            Some(NoTradeReason::NoTrigger)
        );
    }
}
