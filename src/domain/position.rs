//! Open positions, exit legs and closed trades.

use crate::domain::decision::Side;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a position. Declaration order is the only permitted
/// direction of travel; stages may be skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionState {
    Open,
    BreakevenActive,
    PartialTaken,
    TrailingActive,
    Closed,
}

impl PositionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionState::Open => "open",
            PositionState::BreakevenActive => "breakeven_active",
            PositionState::PartialTaken => "partial_taken",
            PositionState::TrailingActive => "trailing_active",
            PositionState::Closed => "closed",
        }
    }
}

impl fmt::Display for PositionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    BreakevenStop,
    TakeProfit,
    TrailingStop,
    /// Scale-out at market while the position stays open.
    Partial,
    TimeExit,
    Administrative,
    EndOfData,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::BreakevenStop => "breakeven_stop",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::Partial => "partial",
            ExitReason::TimeExit => "time_exit",
            ExitReason::Administrative => "administrative",
            ExitReason::EndOfData => "end_of_data",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fill that reduced the position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitLeg {
    pub timestamp: DateTime<Utc>,
    pub quantity: f64,
    pub price: f64,
    /// Exit commission plus this leg's share of the entry commission.
    pub fees: f64,
    pub pnl: f64,
    pub reason: ExitReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument: String,
    pub side: Side,
    pub initial_quantity: f64,
    /// Remaining open quantity.
    pub quantity: f64,
    pub entry_price: f64,
    pub initial_stop: f64,
    /// Current protective stop. Only ever tightens.
    pub stop: f64,
    pub targets: Vec<f64>,
    pub state: PositionState,
    pub opened_at: DateTime<Utc>,
    pub bars_held: usize,
    pub entry_fees: f64,
    /// ATR at entry; breakeven buffer and trail distance scale from it.
    pub entry_atr: f64,
    pub trail_distance: f64,
    pub legs: Vec<ExitLeg>,
}

impl Position {
    pub fn is_long(&self) -> bool {
        self.side == Side::Long
    }

    pub fn is_closed(&self) -> bool {
        self.state == PositionState::Closed
    }

    /// Price distance of one R, fixed at entry.
    pub fn risk_per_unit(&self) -> f64 {
        (self.entry_price - self.initial_stop).abs()
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.quantity * self.side.sign()
    }

    /// Unrealized PnL net of the entry commission still attached to the
    /// open quantity.
    pub fn net_unrealized_pnl(&self, price: f64) -> f64 {
        self.unrealized_pnl(price) - self.entry_fee_share(self.quantity)
    }

    /// Favourable excursion at `price` expressed in R.
    pub fn gain_r(&self, price: f64) -> f64 {
        let r = self.risk_per_unit();
        if r <= 0.0 {
            return 0.0;
        }
        (price - self.entry_price) * self.side.sign() / r
    }

    /// Money still at risk if the current stop fills. Zero once the stop is
    /// at or beyond entry.
    pub fn open_risk(&self) -> f64 {
        ((self.entry_price - self.stop) * self.side.sign()).max(0.0) * self.quantity
    }

    /// Moves the stop only if it tightens. Returns whether it moved.
    pub fn tighten_stop(&mut self, candidate: f64) -> bool {
        if !candidate.is_finite() {
            return false;
        }
        let tighter = match self.side {
            Side::Long => candidate > self.stop,
            Side::Short => candidate < self.stop,
        };
        if tighter {
            self.stop = candidate;
        }
        tighter
    }

    /// Advances the lifecycle. Refuses to move backwards or stay put.
    pub fn advance(&mut self, next: PositionState) -> bool {
        if next > self.state {
            self.state = next;
            true
        } else {
            false
        }
    }

    /// Entry commission attributable to `quantity` units.
    pub fn entry_fee_share(&self, quantity: f64) -> f64 {
        if self.initial_quantity <= 0.0 {
            return 0.0;
        }
        self.entry_fees * quantity / self.initial_quantity
    }

    pub fn realized_pnl(&self) -> f64 {
        self.legs.iter().map(|l| l.pnl).sum()
    }

    pub fn stop_hit(&self, low: f64, high: f64) -> bool {
        match self.side {
            Side::Long => low <= self.stop,
            Side::Short => high >= self.stop,
        }
    }

    /// Hit check against the first target, if any.
    pub fn target_hit(&self, low: f64, high: f64) -> Option<f64> {
        let target = *self.targets.first()?;
        let hit = match self.side {
            Side::Long => high >= target,
            Side::Short => low <= target,
        };
        hit.then_some(target)
    }

    /// Seals a closed position into its trade record.
    pub fn to_trade(&self) -> Option<Trade> {
        let last = self.legs.last()?;
        if !self.is_closed() {
            return None;
        }
        let pnl = self.realized_pnl();
        let initial_risk = self.risk_per_unit() * self.initial_quantity;
        let r_multiple = if initial_risk > 0.0 {
            pnl / initial_risk
        } else {
            0.0
        };
        Some(Trade {
            instrument: self.instrument.clone(),
            side: self.side,
            quantity: self.initial_quantity,
            entry_price: self.entry_price,
            initial_stop: self.initial_stop,
            opened_at: self.opened_at,
            closed_at: last.timestamp,
            bars_held: self.bars_held,
            exit_reason: last.reason,
            legs: self.legs.clone(),
            pnl,
            r_multiple,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub instrument: String,
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
    pub initial_stop: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub bars_held: usize,
    pub exit_reason: ExitReason,
    pub legs: Vec<ExitLeg>,
    pub pnl: f64,
    pub r_multiple: f64,
}
