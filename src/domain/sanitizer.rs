//! Bar sanitizer.
//!
//! Cleans a raw bar sequence before any indicator or rule sees it. Bars that
//! cannot be trusted are dropped, bars with repairable OHLC inconsistencies
//! are widened to their body, and every change is reported as an anomaly.

use crate::domain::bar::Bar;
use crate::domain::instrument::TradingStyle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    NonFinitePrice,
    NonPositivePrice,
    OutOfOrder,
    DuplicateTimestamp,
    HighBelowBody,
    LowAboveBody,
    NegativeVolume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyAction {
    Dropped,
    Repaired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    /// Position in the raw input.
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub kind: AnomalyKind,
    pub action: AnomalyAction,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SanitizerConfig {
    pub min_bars: usize,
}

impl SanitizerConfig {
    pub fn for_style(style: TradingStyle) -> Self {
        SanitizerConfig {
            min_bars: style.default_min_bars(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedBars {
    pub bars: Vec<Bar>,
    pub anomalies: Vec<Anomaly>,
    pub insufficient: bool,
    pub min_bars: usize,
}

pub fn sanitize(raw: &[Bar], config: &SanitizerConfig) -> SanitizedBars {
    let mut bars: Vec<Bar> = Vec::with_capacity(raw.len());
    let mut anomalies = Vec::new();

    for (index, bar) in raw.iter().enumerate() {
        let mut record = |kind, action| {
            anomalies.push(Anomaly {
                index,
                timestamp: bar.timestamp,
                kind,
                action,
            })
        };

        if !bar.prices_finite() || !bar.volume.is_finite() {
            record(AnomalyKind::NonFinitePrice, AnomalyAction::Dropped);
            continue;
        }
        if bar.open <= 0.0 || bar.high <= 0.0 || bar.low <= 0.0 || bar.close <= 0.0 {
            record(AnomalyKind::NonPositivePrice, AnomalyAction::Dropped);
            continue;
        }
        if let Some(prev) = bars.last() {
            if bar.timestamp == prev.timestamp {
                record(AnomalyKind::DuplicateTimestamp, AnomalyAction::Dropped);
                continue;
            }
            if bar.timestamp < prev.timestamp {
                record(AnomalyKind::OutOfOrder, AnomalyAction::Dropped);
                continue;
            }
        }

        let mut cleaned = bar.clone();
        let body_high = cleaned.open.max(cleaned.close);
        let body_low = cleaned.open.min(cleaned.close);
        if cleaned.high < body_high {
            cleaned.high = body_high;
            record(AnomalyKind::HighBelowBody, AnomalyAction::Repaired);
        }
        if cleaned.low > body_low {
            cleaned.low = body_low;
            record(AnomalyKind::LowAboveBody, AnomalyAction::Repaired);
        }
        if cleaned.volume < 0.0 {
            cleaned.volume = 0.0;
            record(AnomalyKind::NegativeVolume, AnomalyAction::Repaired);
        }
        bars.push(cleaned);
    }

    let insufficient = bars.is_empty() || bars.len() < config.min_bars;
    SanitizedBars {
        bars,
        anomalies,
        insufficient,
        min_bars: config.min_bars,
    }
}
