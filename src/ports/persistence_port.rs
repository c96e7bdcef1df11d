//! Durable state for shadow trading.
//!
//! Everything is keyed by engine version so generations running side by side
//! never see each other's positions or history.

use crate::domain::audit::DecisionRecord;
use crate::domain::error::ShadowtraderError;
use crate::domain::portfolio::EquityPoint;
use crate::domain::position::{Position, Trade};
use chrono::{DateTime, Utc};

/// Everything one shadow tick writes, committed together.
pub struct TickCommit<'a> {
    pub decisions: &'a [DecisionRecord],
    pub trades: &'a [Trade],
    pub positions: &'a [Position],
    pub snapshot: &'a EquityPoint,
}

pub trait PersistencePort {
    fn load_positions(&self, version: &str) -> Result<Vec<Position>, ShadowtraderError>;

    /// Replaces the stored open positions for `version`.
    fn save_positions(&self, version: &str, positions: &[Position])
    -> Result<(), ShadowtraderError>;

    fn append_trades(&self, version: &str, trades: &[Trade]) -> Result<(), ShadowtraderError>;

    /// Trades closed at or after `since`.
    fn load_trades_since(
        &self,
        version: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Trade>, ShadowtraderError>;

    fn append_snapshot(&self, version: &str, point: &EquityPoint)
    -> Result<(), ShadowtraderError>;

    fn latest_snapshot(&self, version: &str) -> Result<Option<EquityPoint>, ShadowtraderError>;

    /// Append-only; records are never rewritten.
    fn append_decisions(&self, records: &[DecisionRecord]) -> Result<(), ShadowtraderError>;

    /// Writes a tick's decisions, closed trades, open positions and snapshot
    /// atomically: either all of it lands or none of it does.
    fn commit_tick(&self, version: &str, commit: &TickCommit<'_>) -> Result<(), ShadowtraderError>;

    /// Takes the tick lease for `key` unless another holder's lease is still
    /// live at `now`.
    fn try_acquire_tick_lock(
        &self,
        key: &str,
        now: DateTime<Utc>,
        lease_secs: i64,
    ) -> Result<bool, ShadowtraderError>;

    fn release_tick_lock(&self, key: &str) -> Result<(), ShadowtraderError>;
}
