//! Multi-instrument backtests.
//!
//! Each instrument runs independently over its own bar slice; a failure is
//! kept in that instrument's slot and never aborts the others.

use log::{info, warn};
use rayon::prelude::*;

use super::backtest::RunResult;
use super::bar::Bar;
use super::config::EngineConfig;
use super::error::ShadowtraderError;
use super::instrument::Instrument;
use super::metrics::Metrics;
use super::position::Trade;
use super::router::EngineRegistry;

#[derive(Debug, Clone)]
pub struct BatchInput {
    pub instrument: Instrument,
    pub bars: Vec<Bar>,
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub instrument: String,
    pub result: Result<RunResult, ShadowtraderError>,
}

/// Runs `version` over every input in parallel. Outcomes come back in input
/// order.
pub fn run_batch(
    registry: &EngineRegistry,
    version: &str,
    config: &EngineConfig,
    inputs: &[BatchInput],
) -> Result<Vec<BatchOutcome>, ShadowtraderError> {
    let engine = registry.get(version)?;
    info!("running {} on {} instruments", version, inputs.len());

    let outcomes: Vec<BatchOutcome> = inputs
        .par_iter()
        .map(|input| BatchOutcome {
            instrument: input.instrument.symbol.clone(),
            result: engine.run(config, &input.instrument, &input.bars),
        })
        .collect();

    for outcome in &outcomes {
        match &outcome.result {
            Ok(r) => info!(
                "{}: {} trades, return {:.2}%",
                outcome.instrument,
                r.stats.trade_count,
                r.stats.total_return * 100.0
            ),
            Err(e) => warn!("{}: skipped ({}): {}", outcome.instrument, e.reason_code(), e),
        }
    }
    Ok(outcomes)
}

/// Trade statistics pooled across every successful run.
pub fn pooled_stats(outcomes: &[BatchOutcome], risk_free_rate: f64) -> Metrics {
    let mut trades: Vec<Trade> = outcomes
        .iter()
        .filter_map(|o| o.result.as_ref().ok())
        .flat_map(|r| r.trades.iter().cloned())
        .collect();
    trades.sort_by(|a, b| {
        a.closed_at
            .cmp(&b.closed_at)
            .then_with(|| a.instrument.cmp(&b.instrument))
    });
    Metrics::compute(&trades, &[], 0.0, risk_free_rate)
}
