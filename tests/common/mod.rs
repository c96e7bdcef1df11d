#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use shadowtrader::domain::bar::Bar;
use shadowtrader::domain::decision::{EntrySignal, Side};
use shadowtrader::domain::error::ShadowtraderError;
use shadowtrader::domain::instrument::{Instrument, TradingStyle};
use shadowtrader::ports::bar_source::BarSource;
use shadowtrader::ports::signal_source::{PendingSignal, SignalSource};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

pub struct MockBarSource {
    pub data: HashMap<String, Vec<Bar>>,
    pub errors: HashMap<String, String>,
}

impl MockBarSource {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<Bar>) -> Self {
        self.data.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }
}

impl BarSource for MockBarSource {
    fn fetch_bars(
        &self,
        symbol: &str,
        _timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, ShadowtraderError> {
        if let Some(reason) = self.errors.get(symbol) {
            return Err(ShadowtraderError::UpstreamIo {
                instrument: symbol.to_string(),
                reason: reason.clone(),
            });
        }
        Ok(self
            .data
            .get(symbol)
            .map(|bars| {
                bars.iter()
                    .filter(|b| b.timestamp >= start && b.timestamp <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn list_symbols(&self) -> Result<Vec<String>, ShadowtraderError> {
        let mut symbols: Vec<String> = self.data.keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }
}

pub struct MockSignals {
    pub pending: Vec<PendingSignal>,
    pub consumed: RefCell<HashSet<i64>>,
    pub fail_pending: bool,
    pub fail_consume: bool,
}

impl MockSignals {
    pub fn new(signals: Vec<EntrySignal>, created_at: DateTime<Utc>) -> Self {
        let pending = signals
            .into_iter()
            .enumerate()
            .map(|(i, s)| PendingSignal {
                id: i as i64 + 1,
                instrument: s.instrument,
                side: s.side,
                entry: s.entry,
                stop: s.stop,
                targets: s.targets,
                confidence: s.confidence,
                created_at,
            })
            .collect();
        Self {
            pending,
            consumed: RefCell::new(HashSet::new()),
            fail_pending: false,
            fail_consume: false,
        }
    }

    pub fn failing_pending(mut self) -> Self {
        self.fail_pending = true;
        self
    }

    pub fn failing_consume(mut self) -> Self {
        self.fail_consume = true;
        self
    }
}

fn queue_down() -> ShadowtraderError {
    ShadowtraderError::UpstreamIo {
        instrument: "signal_source".to_string(),
        reason: "signal queue unavailable".to_string(),
    }
}

impl SignalSource for MockSignals {
    fn pending(&self, _version: &str) -> Result<Vec<PendingSignal>, ShadowtraderError> {
        if self.fail_pending {
            return Err(queue_down());
        }
        let consumed = self.consumed.borrow();
        Ok(self
            .pending
            .iter()
            .filter(|p| !consumed.contains(&p.id))
            .cloned()
            .collect())
    }

    fn mark_consumed(&self, id: i64) -> Result<(), ShadowtraderError> {
        if self.fail_consume {
            return Err(queue_down());
        }
        self.consumed.borrow_mut().insert(id);
        Ok(())
    }
}

pub fn ts(i: usize) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(i as i64)
}

pub fn swing(symbol: &str) -> Instrument {
    Instrument::new(symbol, TradingStyle::Swing).unwrap()
}

pub fn long_signal(symbol: &str, entry: f64, stop: f64) -> EntrySignal {
    EntrySignal {
        instrument: symbol.to_string(),
        side: Side::Long,
        entry,
        stop,
        targets: vec![entry + 2.0 * (entry - stop)],
        confidence: 0.6,
    }
}

/// Gentle uptrend whose last bar breaks well above every prior high.
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

/// `uptrend_with_breakout(80)` followed by `extra` steady, small-bodied
/// advancing bars.
pub fn breakout_then_run(extra: usize) -> Vec<Bar> {
    let mut bars = uptrend_with_breakout(80);
    let start = bars[79].close;
    for k in 1..=extra {
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

/// Sideways oscillation that never breaks its own range.
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

pub fn bars_to_csv(bars: &[Bar]) -> String {
    let mut out = String::from("timestamp,open,high,low,close,volume\n");
    for b in bars {
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            b.timestamp.to_rfc3339(),
            b.open,
            b.high,
            b.low,
            b.close,
            b.volume
        ));
    }
    out
}
