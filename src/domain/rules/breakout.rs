//! Trend-following breakout entries.

use super::{
    EvalContext, Regime, RuleEvaluator, RuleParams, build_entry, check_gates, classify_regime,
    swing_level,
};
use crate::domain::bar::Bar;
use crate::domain::decision::{Decision, NoTradeReason, Side};
use crate::domain::indicator::{IndicatorSet, rolling_high, rolling_low};

/// Enters when the close breaks the prior `breakout_lookback` extreme in the
/// direction of the EMA regime with a dominant candle body.
#[derive(Debug, Clone)]
pub struct BreakoutEvaluator {
    id: String,
    params: RuleParams,
}

impl BreakoutEvaluator {
    pub fn new(id: impl Into<String>, params: RuleParams) -> Self {
        BreakoutEvaluator {
            id: id.into(),
            params,
        }
    }

    pub fn trending() -> Self {
        Self::new("breakout_trending", RuleParams::trending())
    }

    pub fn volatile() -> Self {
        Self::new("breakout_volatile", RuleParams::volatile())
    }

    pub fn params(&self) -> &RuleParams {
        &self.params
    }

    fn trigger(&self, ctx: &EvalContext<'_>) -> Option<Side> {
        let p = &self.params;
        let bar = ctx.bar();
        let regime = classify_regime(
            bar.close,
            ctx.indicators.ema_fast[ctx.index],
            ctx.indicators.ema_slow[ctx.index],
        );
        if bar.body_ratio() < p.min_body_ratio {
            return None;
        }
        match regime {
            Regime::Up => {
                let prior_high = rolling_high(ctx.bars, p.breakout_lookback, ctx.index)?;
                (bar.close > prior_high && bar.is_bullish()).then_some(Side::Long)
            }
            Regime::Down if !p.long_only => {
                let prior_low = rolling_low(ctx.bars, p.breakout_lookback, ctx.index)?;
                (bar.close < prior_low && bar.is_bearish()).then_some(Side::Short)
            }
            _ => None,
        }
    }
}

impl RuleEvaluator for BreakoutEvaluator {
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
        let Some(side) = self.trigger(ctx) else {
            return Decision::no_trade(symbol, NoTradeReason::NoTrigger);
        };
        let Some(structural) = swing_level(ctx.bars, ctx.index, self.params.swing_lookback, side)
        else {
            return Decision::no_trade(symbol, NoTradeReason::InsufficientBars);
        };
        build_entry(ctx, &self.params, side, structural)
    }
}
