//! Shadow trading tick.
//!
//! One tick reloads the persisted portfolio for an engine version, walks the
//! universe once (advancing open positions over bars they have not seen yet,
//! then evaluating flat instruments on their latest bar), applies pending
//! external signals and commits everything back in one write. Signals are
//! marked consumed only once that write has landed. A wall-clock budget
//! bounds the walk; instruments left over are reported, not processed.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde::Serialize;

use super::audit::DecisionRecord;
use super::backtest::enter;
use super::bar::Bar;
use super::config::EngineConfig;
use super::decision::Decision;
use super::error::ShadowtraderError;
use super::execution::ProtectionConfig;
use super::instrument::{BehaviorClass, Instrument, TradingStyle};
use super::portfolio::{EquityPoint, Portfolio};
use super::position::{Position, Trade};
use super::router::Engine;
use super::rules::{EvalContext, NoTradeEvaluator, RuleEvaluator};
use super::sanitizer::{SanitizerConfig, sanitize};
use super::universe::parse_universe;
use crate::ports::bar_source::BarSource;
use crate::ports::config_port::ConfigPort;
use crate::ports::persistence_port::{PersistencePort, TickCommit};
use crate::ports::signal_source::{PendingSignal, SignalSource};

const SIGNAL_EVALUATOR: &str = "signal_source";

/// Converts a timeframe label such as `5m`, `1h`, `1d` or `1w`.
pub fn timeframe_duration(timeframe: &str) -> Option<Duration> {
    let tf = timeframe.trim().to_ascii_lowercase();
    let split = tf.find(|c: char| !c.is_ascii_digit())?;
    let (count, unit) = tf.split_at(split);
    let count: i64 = if count.is_empty() { 1 } else { count.parse().ok()? };
    if count <= 0 {
        return None;
    }
    match unit {
        "m" | "min" => Some(Duration::minutes(count)),
        "h" => Some(Duration::hours(count)),
        "d" => Some(Duration::days(count)),
        "w" => Some(Duration::weeks(count)),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShadowConfig {
    pub universe: Vec<Instrument>,
    pub style: TradingStyle,
    pub timeframe: String,
    pub budget_ms: u64,
    pub lookback_bars: usize,
    pub lease_secs: i64,
}

impl ShadowConfig {
    pub fn resolve(config: &dyn ConfigPort) -> Result<Self, ShadowtraderError> {
        let invalid = |key: &str, reason: String| ShadowtraderError::ConfigInvalid {
            section: "shadow".to_string(),
            key: key.to_string(),
            reason,
        };
        let style = match config.get_string("shadow", "style") {
            Some(s) => s.parse::<TradingStyle>().map_err(|e| invalid("style", e))?,
            None => TradingStyle::Swing,
        };
        let list = config
            .get_string("shadow", "universe")
            .ok_or_else(|| ShadowtraderError::ConfigMissing {
                section: "shadow".to_string(),
                key: "universe".to_string(),
            })?;
        let universe =
            parse_universe(&list, style).map_err(|e| invalid("universe", e.to_string()))?;

        let timeframe = config
            .get_string("shadow", "timeframe")
            .or_else(|| config.get_string("backtest", "timeframe"))
            .unwrap_or_else(|| "1d".to_string());
        if timeframe_duration(&timeframe).is_none() {
            return Err(invalid("timeframe", format!("unrecognised timeframe {timeframe:?}")));
        }

        let budget_ms = config.get_int("shadow", "budget_ms", 30_000);
        let lookback_bars = config.get_int("shadow", "lookback_bars", 250);
        if budget_ms <= 0 {
            return Err(invalid("budget_ms", "budget_ms must be positive".into()));
        }
        if lookback_bars <= 0 {
            return Err(invalid("lookback_bars", "lookback_bars must be positive".into()));
        }

        Ok(ShadowConfig {
            universe,
            style,
            timeframe,
            budget_ms: budget_ms as u64,
            lookback_bars: lookback_bars as usize,
            lease_secs: config.get_int("shadow", "lease_secs", 300),
        })
    }

    /// Calendar window wide enough to hold `lookback_bars` bars across
    /// weekends and holidays.
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let step = timeframe_duration(&self.timeframe).unwrap_or_else(|| Duration::days(1));
        now - step * (self.lookback_bars as i32).saturating_mul(2)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedInstrument {
    pub instrument: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub positions: Vec<Position>,
    pub new_trades: Vec<Trade>,
    pub decisions: Vec<DecisionRecord>,
    pub skipped: Vec<SkippedInstrument>,
    pub snapshot: EquityPoint,
    pub budget_exhausted: bool,
    /// Instruments not reached before the budget ran out.
    pub unprocessed: Vec<String>,
}

/// Latest view of an instrument gathered during the walk.
struct MarketView {
    last_bar: Bar,
    atr: f64,
}

pub struct ShadowEngine<'a> {
    engine: Arc<dyn Engine>,
    config: &'a EngineConfig,
    shadow: &'a ShadowConfig,
    bars: &'a dyn BarSource,
    store: &'a dyn PersistencePort,
    signals: Option<&'a dyn SignalSource>,
}

impl<'a> ShadowEngine<'a> {
    pub fn new(
        engine: Arc<dyn Engine>,
        config: &'a EngineConfig,
        shadow: &'a ShadowConfig,
        bars: &'a dyn BarSource,
        store: &'a dyn PersistencePort,
    ) -> Self {
        ShadowEngine {
            engine,
            config,
            shadow,
            bars,
            store,
            signals: None,
        }
    }

    pub fn with_signals(mut self, signals: &'a dyn SignalSource) -> Self {
        self.signals = Some(signals);
        self
    }

    pub fn lease_key(&self) -> String {
        format!("tick:{}", self.engine.id())
    }

    /// Runs one tick while holding the version's tick lease.
    pub fn tick_with_lease(&self, now: DateTime<Utc>) -> Result<TickReport, ShadowtraderError> {
        let key = self.lease_key();
        if !self
            .store
            .try_acquire_tick_lock(&key, now, self.shadow.lease_secs)?
        {
            return Err(ShadowtraderError::TickInProgress { key });
        }
        let report = self.tick(now);
        let released = self.store.release_tick_lock(&key);
        let report = report?;
        released?;
        Ok(report)
    }

    pub fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, ShadowtraderError> {
        let deadline = Instant::now() + StdDuration::from_millis(self.shadow.budget_ms);
        let version = self.engine.id().to_string();
        let protection = self.engine.protection(self.config);
        let window_start = self.shadow.window_start(now);

        let snapshot = self.store.latest_snapshot(&version)?;
        let positions = self.store.load_positions(&version)?;
        let recent_trades = self.store.load_trades_since(&version, window_start)?;
        let mut portfolio =
            Portfolio::restore(self.config.starting_equity, snapshot.as_ref(), positions);
        portfolio.seed_daily_realized(&recent_trades);

        let mut last_exit: HashMap<String, DateTime<Utc>> = HashMap::new();
        for trade in &recent_trades {
            let at = last_exit.entry(trade.instrument.clone()).or_insert(trade.closed_at);
            *at = (*at).max(trade.closed_at);
        }

        let mut instruments = self.shadow.universe.clone();
        for symbol in portfolio.positions.keys() {
            if !instruments.iter().any(|i| &i.symbol == symbol) {
                instruments.push(Instrument {
                    symbol: symbol.clone(),
                    style: self.shadow.style,
                });
            }
        }

        info!(
            "tick {} at {}: {} instruments, {} open positions",
            version,
            now,
            instruments.len(),
            portfolio.position_count()
        );

        let mut decisions = Vec::new();
        let mut skipped = Vec::new();
        let mut new_trades = Vec::new();
        let mut unprocessed = Vec::new();
        let mut views: BTreeMap<String, MarketView> = BTreeMap::new();

        for (n, instrument) in instruments.iter().enumerate() {
            if Instant::now() >= deadline {
                unprocessed.extend(instruments[n..].iter().map(|i| i.symbol.clone()));
                break;
            }
            let symbol = instrument.symbol.as_str();
            let outcome = self
                .process_instrument(
                    &mut portfolio,
                    instrument,
                    now,
                    window_start,
                    &protection,
                    last_exit.get(symbol).copied(),
                )
                .unwrap_or_else(InstrumentOutcome::skipped);
            new_trades.extend(outcome.trades);
            decisions.extend(outcome.record);
            if let Some(view) = outcome.view {
                views.insert(symbol.to_string(), view);
            }
            if let Some(e) = outcome.skip {
                warn!("{}: skipped ({}): {}", symbol, e.reason_code(), e);
                decisions.push(DecisionRecord::skipped(now, &version, symbol, "-", &e));
                skipped.push(SkippedInstrument {
                    instrument: symbol.to_string(),
                    reason: e.reason_code().to_string(),
                });
            }
        }

        let mut budget_exhausted = !unprocessed.is_empty();
        let mut consumed = Vec::new();
        if !budget_exhausted && let Some(source) = self.signals {
            match source.pending(&version) {
                Ok(pending) => {
                    budget_exhausted = self.apply_signals(
                        pending,
                        &mut portfolio,
                        &views,
                        now,
                        &protection,
                        deadline,
                        &mut decisions,
                        &mut consumed,
                    );
                }
                Err(e) => {
                    warn!("{}: pending signals unavailable ({}): {}", version, e.reason_code(), e);
                    decisions.push(DecisionRecord::skipped(
                        now,
                        &version,
                        SIGNAL_EVALUATOR,
                        SIGNAL_EVALUATOR,
                        &e,
                    ));
                    skipped.push(SkippedInstrument {
                        instrument: SIGNAL_EVALUATOR.to_string(),
                        reason: e.reason_code().to_string(),
                    });
                }
            }
        }
        if budget_exhausted {
            warn!(
                "tick {} budget of {}ms exhausted, {} instruments unprocessed",
                version,
                self.shadow.budget_ms,
                unprocessed.len()
            );
        }

        let snapshot = portfolio.record_equity(now).clone();
        let positions: Vec<Position> = portfolio.positions.values().cloned().collect();
        self.store.commit_tick(
            &version,
            &TickCommit {
                decisions: &decisions,
                trades: &new_trades,
                positions: &positions,
                snapshot: &snapshot,
            },
        )?;

        // an unmarked signal is offered again next tick and refused as a
        // duplicate while its position is open
        if let Some(source) = self.signals {
            for id in consumed {
                if let Err(e) = source.mark_consumed(id) {
                    warn!("signal {} applied but not marked consumed: {}", id, e);
                    skipped.push(SkippedInstrument {
                        instrument: SIGNAL_EVALUATOR.to_string(),
                        reason: e.reason_code().to_string(),
                    });
                }
            }
        }

        info!(
            "tick {} done: {} decisions, {} new trades, {} skipped, equity {:.2}",
            version,
            decisions.len(),
            new_trades.len(),
            skipped.len(),
            snapshot.equity
        );

        Ok(TickReport {
            version,
            timestamp: now,
            positions,
            new_trades,
            decisions,
            skipped,
            snapshot,
            budget_exhausted,
            unprocessed,
        })
    }

    fn process_instrument(
        &self,
        portfolio: &mut Portfolio,
        instrument: &Instrument,
        now: DateTime<Utc>,
        window_start: DateTime<Utc>,
        protection: &ProtectionConfig,
        last_exit: Option<DateTime<Utc>>,
    ) -> Result<InstrumentOutcome, ShadowtraderError> {
        let symbol = instrument.symbol.as_str();
        let raw = self
            .bars
            .fetch_bars(symbol, &self.shadow.timeframe, window_start, now)
            .map_err(|e| match e {
                ShadowtraderError::UpstreamIo { .. } => e,
                other => ShadowtraderError::UpstreamIo {
                    instrument: symbol.to_string(),
                    reason: other.to_string(),
                },
            })?;
        let keep = raw.len().saturating_sub(self.shadow.lookback_bars);
        let sanitized = sanitize(
            &raw[keep..],
            &SanitizerConfig {
                min_bars: self.config.sanitizer.min_bars(instrument.style),
            },
        );
        for anomaly in &sanitized.anomalies {
            debug!("{}: {:?} at {} ({:?})", symbol, anomaly.kind, anomaly.timestamp, anomaly.action);
        }

        let bars = &sanitized.bars;
        let mut outcome = InstrumentOutcome::default();
        let mut last_exit = last_exit;
        let excluded = self.config.behavior.classify(symbol) == BehaviorClass::Excluded;

        if let Some(position) = portfolio.get_position(symbol) {
            let unseen = unseen_bars(bars, position.opened_at, position.bars_held);
            for bar in unseen {
                if let Some((_, Some(trade))) =
                    portfolio.advance(symbol, bar, protection, &self.config.execution)
                {
                    info!(
                        "{}: closed {} ({}) pnl {:.2}",
                        symbol, trade.side, trade.exit_reason, trade.pnl
                    );
                    last_exit = Some(trade.closed_at);
                    outcome.trades.push(trade);
                    break;
                }
            }
        }

        // still open: value it at the latest close, seen before or not
        if let Some(last) = bars.last()
            && let Some(position) = portfolio.get_position(symbol)
            && last.timestamp >= position.opened_at
        {
            portfolio.mark(symbol, last.close);
            let age_secs = (now - last.timestamp).num_seconds();
            let limit_secs = self
                .config
                .rules
                .max_bar_age_secs
                .unwrap_or_else(|| instrument.style.default_max_bar_age_secs());
            if age_secs > limit_secs {
                outcome.skip = Some(ShadowtraderError::StaleData {
                    instrument: symbol.to_string(),
                    age_secs,
                    limit_secs,
                });
            }
        }

        if sanitized.insufficient && !excluded {
            outcome.skip = Some(ShadowtraderError::InsufficientData {
                instrument: symbol.to_string(),
                bars: bars.len(),
                minimum: sanitized.min_bars,
            });
            return Ok(outcome);
        }
        let Some(index) = bars.len().checked_sub(1) else {
            return Ok(outcome);
        };
        let evaluator: Box<dyn RuleEvaluator> = if excluded {
            Box::new(NoTradeEvaluator)
        } else {
            self.engine.evaluator_for(instrument, self.config)
        };
        let indicators = evaluator.indicators(bars);
        outcome.view = Some(MarketView {
            last_bar: bars[index].clone(),
            atr: indicators.atr.get(index).copied().unwrap_or(0.0),
        });
        if portfolio.has_position(symbol) {
            return Ok(outcome);
        }

        let bars_since_exit =
            last_exit.map(|at| bars.iter().filter(|b| b.timestamp > at).count());
        let ctx = EvalContext {
            instrument,
            bars,
            indicators: &indicators,
            index,
            now: Some(now),
            spread_pct: None,
            bars_since_exit,
        };
        let decision = evaluator.evaluate(&ctx);
        let record = DecisionRecord::from_decision(now, self.engine.id(), evaluator.id(), &decision);
        let record = match &decision {
            Decision::Entry(signal) => enter(
                portfolio,
                record,
                signal,
                indicators.atr[index],
                bars[index].timestamp,
                protection,
                self.config,
            ),
            Decision::NoTrade { .. } => record,
        };
        outcome.record = Some(record);
        Ok(outcome)
    }

    /// Returns true when the budget ran out before every signal was applied.
    /// Ids of applied signals are pushed to `consumed`.
    #[allow(clippy::too_many_arguments)]
    fn apply_signals(
        &self,
        pending: Vec<PendingSignal>,
        portfolio: &mut Portfolio,
        views: &BTreeMap<String, MarketView>,
        now: DateTime<Utc>,
        protection: &ProtectionConfig,
        deadline: Instant,
        decisions: &mut Vec<DecisionRecord>,
        consumed: &mut Vec<i64>,
    ) -> bool {
        let version = self.engine.id();
        for pending in pending {
            if Instant::now() >= deadline {
                return true;
            }
            let signal = pending.to_entry();
            let decision = Decision::Entry(signal.clone());
            let record = DecisionRecord::from_decision(now, version, SIGNAL_EVALUATOR, &decision);
            let (timestamp, atr) = views
                .get(&signal.instrument)
                .map(|v| (v.last_bar.timestamp, v.atr))
                .unwrap_or((pending.created_at, 0.0));
            let record = enter(
                portfolio,
                record,
                &signal,
                atr,
                timestamp,
                protection,
                self.config,
            );
            debug!(
                "signal {} for {}: {:?}",
                pending.id, signal.instrument, record.outcome
            );
            decisions.push(record);
            consumed.push(pending.id);
        }
        false
    }
}

#[derive(Default)]
struct InstrumentOutcome {
    trades: Vec<Trade>,
    record: Option<DecisionRecord>,
    view: Option<MarketView>,
    skip: Option<ShadowtraderError>,
}

impl InstrumentOutcome {
    fn skipped(error: ShadowtraderError) -> Self {
        InstrumentOutcome {
            skip: Some(error),
            ..Default::default()
        }
    }
}

/// Bars after `opened_at` that earlier ticks have not yet applied.
fn unseen_bars(bars: &[Bar], opened_at: DateTime<Utc>, applied: usize) -> &[Bar] {
    let first = bars.partition_point(|b| b.timestamp <= opened_at);
    let start = (first + applied).min(bars.len());
    &bars[start..]
}
