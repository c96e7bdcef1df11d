//! Domain error types and machine-readable reason codes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable reason attached to every skip, reject and failure path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    InsufficientData,
    InvalidRisk,
    ExposureRejected,
    StaleData,
    UpstreamIoFailure,
    InvalidSymbol,
    UnknownVersion,
    BudgetExhausted,
    Config,
    Internal,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::InsufficientData => "insufficient_data",
            ReasonCode::InvalidRisk => "invalid_risk",
            ReasonCode::ExposureRejected => "exposure_rejected",
            ReasonCode::StaleData => "stale_data",
            ReasonCode::UpstreamIoFailure => "upstream_io_failure",
            ReasonCode::InvalidSymbol => "invalid_symbol",
            ReasonCode::UnknownVersion => "unknown_version",
            ReasonCode::BudgetExhausted => "budget_exhausted",
            ReasonCode::Config => "config",
            ReasonCode::Internal => "internal",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error type for shadowtrader.
#[derive(Debug, thiserror::Error)]
pub enum ShadowtraderError {
    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("insufficient data for {instrument}: have {bars} bars, need {minimum}")]
    InsufficientData {
        instrument: String,
        bars: usize,
        minimum: usize,
    },

    #[error("invalid risk for {instrument}: {reason}")]
    InvalidRisk { instrument: String, reason: String },

    #[error("exposure rejected for {instrument}: {reason}")]
    ExposureRejected { instrument: String, reason: String },

    #[error("stale data for {instrument}: last bar {age_secs}s old, limit {limit_secs}s")]
    StaleData {
        instrument: String,
        age_secs: i64,
        limit_secs: i64,
    },

    #[error("upstream I/O failure for {instrument}: {reason}")]
    UpstreamIo { instrument: String, reason: String },

    #[error("invalid symbol {symbol:?}: {reason}")]
    InvalidSymbol { symbol: String, reason: String },

    #[error("unknown engine version {0:?}")]
    UnknownVersion(String),

    #[error("tick already in progress for {key}")]
    TickInProgress { key: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ShadowtraderError {
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            ShadowtraderError::InsufficientData { .. } => ReasonCode::InsufficientData,
            ShadowtraderError::InvalidRisk { .. } => ReasonCode::InvalidRisk,
            ShadowtraderError::ExposureRejected { .. } => ReasonCode::ExposureRejected,
            ShadowtraderError::StaleData { .. } => ReasonCode::StaleData,
            ShadowtraderError::UpstreamIo { .. }
            | ShadowtraderError::Database { .. }
            | ShadowtraderError::DatabaseQuery { .. }
            | ShadowtraderError::Io(_) => ReasonCode::UpstreamIoFailure,
            ShadowtraderError::InvalidSymbol { .. } => ReasonCode::InvalidSymbol,
            ShadowtraderError::UnknownVersion(_) => ReasonCode::UnknownVersion,
            ShadowtraderError::ConfigParse { .. }
            | ShadowtraderError::ConfigMissing { .. }
            | ShadowtraderError::ConfigInvalid { .. } => ReasonCode::Config,
            ShadowtraderError::TickInProgress { .. } | ShadowtraderError::Serialization(_) => {
                ReasonCode::Internal
            }
        }
    }
}

impl From<&ShadowtraderError> for std::process::ExitCode {
    fn from(err: &ShadowtraderError) -> Self {
        let code: u8 = match err {
            ShadowtraderError::Io(_) | ShadowtraderError::Serialization(_) => 1,
            ShadowtraderError::ConfigParse { .. }
            | ShadowtraderError::ConfigMissing { .. }
            | ShadowtraderError::ConfigInvalid { .. }
            | ShadowtraderError::UnknownVersion(_)
            | ShadowtraderError::InvalidSymbol { .. } => 2,
            ShadowtraderError::Database { .. }
            | ShadowtraderError::DatabaseQuery { .. }
            | ShadowtraderError::UpstreamIo { .. } => 3,
            ShadowtraderError::InvalidRisk { .. } | ShadowtraderError::ExposureRejected { .. } => 4,
            ShadowtraderError::InsufficientData { .. } | ShadowtraderError::StaleData { .. } => 5,
            ShadowtraderError::TickInProgress { .. } => 6,
        };
        std::process::ExitCode::from(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_are_snake_case() {
        assert_eq!(ReasonCode::InsufficientData.as_str(), "insufficient_data");
        assert_eq!(ReasonCode::UpstreamIoFailure.to_string(), "upstream_io_failure");
        let json = serde_json::to_string(&ReasonCode::ExposureRejected).unwrap();
        assert_eq!(json, "\"exposure_rejected\"");
    }

    #[test]
    fn database_failures_map_to_upstream_io() {
        let err = ShadowtraderError::DatabaseQuery {
            reason: "locked".into(),
        };
        assert_eq!(err.reason_code(), ReasonCode::UpstreamIoFailure);
    }

    #[test]
    fn insufficient_data_message() {
        let err = ShadowtraderError::InsufficientData {
            instrument: "BHP".into(),
            bars: 12,
            minimum: 60,
        };
        assert_eq!(
            err.to_string(),
            "insufficient data for BHP: have 12 bars, need 60"
        );
        assert_eq!(err.reason_code(), ReasonCode::InsufficientData);
    }
}
