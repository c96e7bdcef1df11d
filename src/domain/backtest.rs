//! Single-instrument replay loop.
//!
//! Per bar: advance the open position (if any), then evaluate the rule on the
//! closed bar while flat. The final bar only closes what is left at
//! `end_of_data`; no entry is taken on it.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::audit::DecisionRecord;
use super::bar::Bar;
use super::config::EngineConfig;
use super::decision::{Decision, EntrySignal};
use super::error::ShadowtraderError;
use super::execution::{EntryOrder, EntryResult, ProtectionConfig, open_position};
use super::instrument::{BehaviorClass, Instrument};
use super::metrics::Metrics;
use super::portfolio::{EquityPoint, Portfolio};
use super::position::{ExitReason, Trade};
use super::router::Engine;
use super::rules::{EvalContext, NoTradeEvaluator, RuleEvaluator};
use super::sanitizer::{Anomaly, SanitizerConfig, sanitize};
use super::sizing::{SizingRequest, admit, size_position};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub version: String,
    pub instrument: String,
    pub evaluator: String,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub stats: Metrics,
    pub anomalies: Vec<Anomaly>,
    pub decisions: Vec<DecisionRecord>,
}

impl RunResult {
    pub fn final_equity(&self) -> Option<f64> {
        self.equity_curve.last().map(|p| p.equity)
    }
}

/// Sizes, admits and fills an entry signal against `portfolio`.
///
/// Returns the audit record with sizing and admission attached; the record
/// is downgraded to a skip or rejection when any stage refuses.
pub(crate) fn enter(
    portfolio: &mut Portfolio,
    record: DecisionRecord,
    signal: &EntrySignal,
    atr: f64,
    timestamp: DateTime<Utc>,
    protection: &ProtectionConfig,
    config: &EngineConfig,
) -> DecisionRecord {
    let request = SizingRequest {
        instrument: &signal.instrument,
        equity: portfolio.equity(),
        side: signal.side,
        entry: signal.entry,
        stop: signal.stop,
        atr,
    };
    let sizing = match size_position(&request, &config.risk) {
        Ok(sizing) => sizing,
        Err(e) => return record.with_skip(&e),
    };

    let admission = admit(
        portfolio,
        &signal.instrument,
        sizing.risk_amount,
        timestamp.date_naive(),
        &config.risk,
    );
    let record = record.with_sizing(sizing.clone());
    if !admission.admitted {
        return record.with_admission(admission);
    }
    let record = record.with_admission(admission);

    let order = EntryOrder {
        instrument: signal.instrument.clone(),
        side: signal.side,
        market_price: signal.entry,
        stop: sizing.stop,
        targets: signal.targets.clone(),
        quantity: sizing.quantity,
        timestamp,
        atr,
    };
    let refused = |reason: &str| ShadowtraderError::InvalidRisk {
        instrument: signal.instrument.clone(),
        reason: reason.to_string(),
    };
    match open_position(&order, protection, &config.execution) {
        EntryResult::Entered(position) => {
            portfolio.add_position(position);
            record
        }
        EntryResult::ShortingDisabled => record.with_skip(&refused("shorting disabled")),
        EntryResult::StopBreached => record.with_skip(&refused("fill crossed the stop")),
    }
}

/// Replays `bars` through `engine` for one instrument.
pub fn run_engine<E: Engine + ?Sized>(
    engine: &E,
    config: &EngineConfig,
    instrument: &Instrument,
    bars: &[Bar],
) -> Result<RunResult, ShadowtraderError> {
    let symbol = instrument.symbol.as_str();
    let sanitized = sanitize(
        bars,
        &SanitizerConfig {
            min_bars: config.sanitizer.min_bars(instrument.style),
        },
    );
    let insufficient = || ShadowtraderError::InsufficientData {
        instrument: symbol.to_string(),
        bars: sanitized.bars.len(),
        minimum: sanitized.min_bars,
    };
    // an excluded instrument is blacklisted whatever its history
    let excluded = config.behavior.classify(symbol) == BehaviorClass::Excluded;
    if sanitized.insufficient && !excluded {
        return Err(insufficient());
    }

    let version = engine.id();
    let evaluator: Box<dyn RuleEvaluator> = if excluded {
        Box::new(NoTradeEvaluator)
    } else {
        engine.evaluator_for(instrument, config)
    };
    let protection = engine.protection(config);
    let bars = &sanitized.bars;
    let indicators = evaluator.indicators(bars);
    let Some(last) = bars.len().checked_sub(1) else {
        return Err(insufficient());
    };

    let mut portfolio = Portfolio::new(config.starting_equity);
    let mut decisions = Vec::new();
    let mut bars_since_exit: Option<usize> = None;

    for (index, bar) in bars.iter().enumerate() {
        if portfolio.has_position(symbol) {
            if let Some((_, Some(_))) =
                portfolio.advance(symbol, bar, &protection, &config.execution)
            {
                bars_since_exit = Some(0);
            }
        } else if let Some(since) = bars_since_exit.as_mut() {
            *since += 1;
        }

        if index < last && !portfolio.has_position(symbol) {
            let ctx = EvalContext {
                instrument,
                bars,
                indicators: &indicators,
                index,
                now: None,
                spread_pct: None,
                bars_since_exit,
            };
            let decision = evaluator.evaluate(&ctx);
            let record =
                DecisionRecord::from_decision(bar.timestamp, version, evaluator.id(), &decision);
            let record = match &decision {
                Decision::Entry(signal) => enter(
                    &mut portfolio,
                    record,
                    signal,
                    indicators.atr[index],
                    bar.timestamp,
                    &protection,
                    config,
                ),
                Decision::NoTrade { .. } => record,
            };
            decisions.push(record);
        }

        if index == last {
            portfolio.close_all(bar.timestamp, ExitReason::EndOfData, &config.execution);
        }
        portfolio.record_equity(bar.timestamp);
    }

    let stats = Metrics::compute(
        &portfolio.closed_trades,
        &portfolio.equity_curve,
        config.starting_equity,
        config.risk_free_rate,
    );

    Ok(RunResult {
        version: version.to_string(),
        instrument: symbol.to_string(),
        evaluator: evaluator.id().to_string(),
        trades: portfolio.closed_trades,
        equity_curve: portfolio.equity_curve,
        stats,
        anomalies: sanitized.anomalies,
        decisions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::audit::DecisionOutcome;
    use crate::domain::instrument::{BehaviorClass, TradingStyle};
    use crate::domain::router::EngineRegistry;
    use crate::domain::rules::test_support::{ts, uptrend_with_breakout};
    use approx::assert_relative_eq;

    /// Breakout at bar 79 followed by a steady, low-body advance.
    fn breakout_then_run() -> Vec<Bar> {
        let mut bars = uptrend_with_breakout(80);
        let start = bars[79].close;
        for k in 1..=20 {
            let base = start + k as f64 * 0.5;
            bars.push(Bar {
                timestamp: ts(79 + k),
                open: base - 0.2,
                high: base + 0.5,
                low: base - 0.5,
                close: base + 0.2,
                volume: 1000.0,
            });
        }
        bars
    }

    fn bhp() -> Instrument {
        Instrument::new("BHP", TradingStyle::Swing).unwrap()
    }

    #[test]
    fn breakout_produces_a_closed_trade() {
        let registry = EngineRegistry::builtin();
        let config = EngineConfig::default();
        let bars = breakout_then_run();
        let result = registry.run("v2", &config, &bhp(), &bars).unwrap();

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.opened_at, ts(79));
        assert!(trade.pnl > 0.0);
        assert_eq!(result.equity_curve.len(), bars.len());
        assert_relative_eq!(
            result.final_equity().unwrap(),
            config.starting_equity + trade.pnl,
            epsilon = 1e-6
        );
        assert_eq!(result.stats.trade_count, 1);

        let entered: Vec<_> = result
            .decisions
            .iter()
            .filter(|d| d.outcome == DecisionOutcome::Entered)
            .collect();
        assert_eq!(entered.len(), 1);
        let sizing = entered[0].sizing.as_ref().unwrap();
        assert!(
            sizing.quantity * sizing.stop_distance
                <= config.starting_equity * config.risk.max_risk_pct_per_trade + 1e-6
        );
    }

    #[test]
    fn open_position_closes_at_end_of_data() {
        let registry = EngineRegistry::builtin();
        let mut config = EngineConfig::default();
        config.protection = ProtectionConfig::fixed(None);
        let mut bars = uptrend_with_breakout(80);
        let close = bars[79].close;
        bars.push(Bar {
            timestamp: ts(80),
            open: close,
            high: close + 0.3,
            low: close - 0.3,
            close: close + 0.1,
            volume: 1000.0,
        });
        let result = registry.run("v1", &config, &bhp(), &bars).unwrap();
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].exit_reason, ExitReason::EndOfData);
    }

    #[test]
    fn insufficient_bars_fail() {
        let registry = EngineRegistry::builtin();
        let bars = uptrend_with_breakout(30);
        let err = registry
            .run("v2", &EngineConfig::default(), &bhp(), &bars)
            .unwrap_err();
        assert!(matches!(
            err,
            ShadowtraderError::InsufficientData { bars: 30, minimum: 60, .. }
        ));
    }

    #[test]
    fn repeated_runs_are_identical() {
        let registry = EngineRegistry::builtin();
        let config = EngineConfig::default();
        let bars = breakout_then_run();
        let a = registry.run("v2", &config, &bhp(), &bars).unwrap();
        let b = registry.run("v2", &config, &bhp(), &bars).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn excluded_instrument_never_trades() {
        let registry = EngineRegistry::builtin();
        let mut config = EngineConfig::default();
        config.behavior.insert("BHP", BehaviorClass::Excluded);
        let result = registry.run("v3", &config, &bhp(), &breakout_then_run()).unwrap();
        assert!(result.trades.is_empty());
        assert!(
            result
                .decisions
                .iter()
                .all(|d| d.reason.as_deref() == Some("blacklisted"))
        );
        assert_eq!(result.stats, Metrics::default());
    }

    #[test]
    fn exclusion_wins_over_short_history() {
        let registry = EngineRegistry::builtin();
        let mut config = EngineConfig::default();
        config.behavior.insert("BHP", BehaviorClass::Excluded);
        let bars = uptrend_with_breakout(30);
        for version in ["v1", "v2", "v3"] {
            let result = registry.run(version, &config, &bhp(), &bars).unwrap();
            assert_eq!(result.evaluator, "no_trade");
            assert!(result.trades.is_empty());
            assert_eq!(result.decisions.len(), 29);
        }
    }

    #[test]
    fn empty_history_fails_without_a_minimum() {
        let registry = EngineRegistry::builtin();
        let mut config = EngineConfig::default();
        config.sanitizer.swing_min_bars = 0;
        let err = registry.run("v2", &config, &bhp(), &[]).unwrap_err();
        assert!(matches!(
            err,
            ShadowtraderError::InsufficientData { bars: 0, .. }
        ));
    }
}
