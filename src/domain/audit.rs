//! Decision log records.
//!
//! Every evaluated bar and every skip or rejection produces one record with
//! a machine-readable reason, so nothing the engine declines to do is silent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::decision::Decision;
use super::error::ShadowtraderError;
use super::sizing::{Admission, SizingResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Entered,
    NoTrade,
    /// Sizing or data failure for this instrument.
    Skipped,
    /// Admission control refused the trade.
    Rejected,
}

impl DecisionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionOutcome::Entered => "entered",
            DecisionOutcome::NoTrade => "no_trade",
            DecisionOutcome::Skipped => "skipped",
            DecisionOutcome::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub timestamp: DateTime<Utc>,
    pub engine_version: String,
    pub instrument: String,
    pub evaluator: String,
    pub outcome: DecisionOutcome,
    pub reason: Option<String>,
    pub decision: Option<Decision>,
    pub sizing: Option<SizingResult>,
    pub admission: Option<Admission>,
}

impl DecisionRecord {
    fn base(
        timestamp: DateTime<Utc>,
        engine_version: &str,
        instrument: &str,
        evaluator: &str,
        outcome: DecisionOutcome,
    ) -> Self {
        DecisionRecord {
            timestamp,
            engine_version: engine_version.to_string(),
            instrument: instrument.to_string(),
            evaluator: evaluator.to_string(),
            outcome,
            reason: None,
            decision: None,
            sizing: None,
            admission: None,
        }
    }

    /// Record for a rule decision. Entries still need sizing and admission
    /// attached by the caller.
    pub fn from_decision(
        timestamp: DateTime<Utc>,
        engine_version: &str,
        evaluator: &str,
        decision: &Decision,
    ) -> Self {
        let outcome = if decision.is_entry() {
            DecisionOutcome::Entered
        } else {
            DecisionOutcome::NoTrade
        };
        let mut record = Self::base(
            timestamp,
            engine_version,
            decision.instrument(),
            evaluator,
            outcome,
        );
        record.reason = decision.reason().map(|r| r.as_str().to_string());
        record.decision = Some(decision.clone());
        record
    }

    pub fn skipped(
        timestamp: DateTime<Utc>,
        engine_version: &str,
        instrument: &str,
        evaluator: &str,
        error: &ShadowtraderError,
    ) -> Self {
        let mut record = Self::base(
            timestamp,
            engine_version,
            instrument,
            evaluator,
            DecisionOutcome::Skipped,
        );
        record.reason = Some(error.reason_code().as_str().to_string());
        record
    }

    pub fn with_sizing(mut self, sizing: SizingResult) -> Self {
        self.sizing = Some(sizing);
        self
    }

    /// Attaches the admission audit trail; a refused admission turns the
    /// record into a rejection named after the first failed check.
    pub fn with_admission(mut self, admission: Admission) -> Self {
        if let Some(check) = admission.rejection() {
            self.outcome = DecisionOutcome::Rejected;
            self.reason = Some(check.name.clone());
        }
        self.admission = Some(admission);
        self
    }

    pub fn with_skip(mut self, error: &ShadowtraderError) -> Self {
        self.outcome = DecisionOutcome::Skipped;
        self.reason = Some(error.reason_code().as_str().to_string());
        self
    }
}
