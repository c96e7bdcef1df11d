use super::{EvalContext, RuleEvaluator};
use crate::domain::bar::Bar;
use crate::domain::decision::{Decision, NoTradeReason};
use crate::domain::indicator::IndicatorSet;

/// Evaluator for excluded instruments. Never enters.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTradeEvaluator;

impl RuleEvaluator for NoTradeEvaluator {
    fn id(&self) -> &str {
        "no_trade"
    }

    fn indicators(&self, _bars: &[Bar]) -> IndicatorSet {
        IndicatorSet::default()
    }

    fn evaluate(&self, ctx: &EvalContext<'_>) -> Decision {
        Decision::no_trade(&ctx.instrument.symbol, NoTradeReason::Blacklisted)
    }
}
