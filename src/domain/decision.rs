//! Entry decisions produced by rule evaluators.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoTradeReason {
    InsufficientBars,
    StaleBar,
    SpreadHigh,
    VolatilityLow,
    NoTrigger,
    Cooldown,
    Blacklisted,
    StyleMismatch,
}

impl NoTradeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoTradeReason::InsufficientBars => "insufficient_bars",
            NoTradeReason::StaleBar => "stale_bar",
            NoTradeReason::SpreadHigh => "spread_high",
            NoTradeReason::VolatilityLow => "volatility_low",
            NoTradeReason::NoTrigger => "no_trigger",
            NoTradeReason::Cooldown => "cooldown",
            NoTradeReason::Blacklisted => "blacklisted",
            NoTradeReason::StyleMismatch => "style_mismatch",
        }
    }
}

impl fmt::Display for NoTradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A proposed entry. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySignal {
    pub instrument: String,
    pub side: Side,
    pub entry: f64,
    pub stop: f64,
    pub targets: Vec<f64>,
    pub confidence: f64,
}

impl EntrySignal {
    pub fn stop_distance(&self) -> f64 {
        (self.entry - self.stop).abs()
    }

    /// First target, if any.
    pub fn primary_target(&self) -> Option<f64> {
        self.targets.first().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    Entry(EntrySignal),
    NoTrade {
        instrument: String,
        reason: NoTradeReason,
    },
}

impl Decision {
    pub fn no_trade(instrument: &str, reason: NoTradeReason) -> Self {
        Decision::NoTrade {
            instrument: instrument.to_string(),
            reason,
        }
    }

    pub fn instrument(&self) -> &str {
        match self {
            Decision::Entry(signal) => &signal.instrument,
            Decision::NoTrade { instrument, .. } => instrument,
        }
    }

    pub fn is_entry(&self) -> bool {
        matches!(self, Decision::Entry(_))
    }

    pub fn reason(&self) -> Option<NoTradeReason> {
        match self {
            Decision::NoTrade { reason, .. } => Some(*reason),
            Decision::Entry(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_sign() {
        assert_eq!(Side::Long.sign(), 1.0);
        assert_eq!(Side::Short.sign(), -1.0);
    }

    #[test]
    fn stop_distance_is_absolute() {
        let long = EntrySignal {
            instrument: "BHP".into(),
            side: Side::Long,
            entry: 50.0,
            stop: 49.5,
            targets: vec![51.0],
            confidence: 0.5,
        };
        assert!((long.stop_distance() - 0.5).abs() < 1e-12);
        let short = EntrySignal {
            side: Side::Short,
            stop: 50.5,
            ..long
        };
        assert!((short.stop_distance() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn decision_serializes_with_kind_tag() {
        let d = Decision::no_trade("BHP", NoTradeReason::Blacklisted);
        let json = serde_json::to_string(&d).unwrap();
        assert!(json.contains("\"kind\":\"no_trade\""));
        assert!(json.contains("\"reason\":\"blacklisted\""));
        assert_eq!(d.reason(), Some(NoTradeReason::Blacklisted));
        assert_eq!(d.instrument(), "BHP");
    }
}
