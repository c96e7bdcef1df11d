//! Externally produced entry signals awaiting the shadow tick.

use crate::domain::decision::{EntrySignal, Side};
use crate::domain::error::ShadowtraderError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSignal {
    pub id: i64,
    pub instrument: String,
    pub side: Side,
    pub entry: f64,
    pub stop: f64,
    pub targets: Vec<f64>,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

impl PendingSignal {
    pub fn to_entry(&self) -> EntrySignal {
        EntrySignal {
            instrument: self.instrument.clone(),
            side: self.side,
            entry: self.entry,
            stop: self.stop,
            targets: self.targets.clone(),
            confidence: self.confidence,
        }
    }
}

pub trait SignalSource {
    /// Unconsumed signals for `version`, oldest first.
    fn pending(&self, version: &str) -> Result<Vec<PendingSignal>, ShadowtraderError>;

    fn mark_consumed(&self, id: i64) -> Result<(), ShadowtraderError>;
}
