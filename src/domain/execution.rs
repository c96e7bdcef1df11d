//! Fill simulation and the per-bar position state machine.
//!
//! Each bar runs the same four stages in order: breakeven, partial, trailing
//! update, exit. Stages that are disabled are skipped, and the position's
//! lifecycle only ever moves forward (see [`PositionState`]).
//!
//! Intrabar exits are judged against the stop in force when the bar opened.
//! Protection stages mark at the close, so a bar that traded through the
//! opening stop does not arm any protection.

use chrono::{DateTime, Utc};

use super::bar::Bar;
use super::decision::Side;
use super::position::{ExitLeg, ExitReason, Position, PositionState};

const QTY_EPSILON: f64 = 1e-9;

/// Costs applied to every simulated fill.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    pub commission_per_trade: f64,
    pub commission_pct: f64,
    pub slippage_pct: f64,
    pub allow_shorting: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            commission_per_trade: 0.0,
            commission_pct: 0.0,
            slippage_pct: 0.0,
            allow_shorting: true,
        }
    }
}

/// Profit-protection stages. `None` disables a stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtectionConfig {
    /// Gain in R (marked at close) that arms breakeven.
    pub breakeven_trigger_r: Option<f64>,
    /// Breakeven stop sits this many entry ATRs past entry.
    pub breakeven_buffer_atr: f64,
    pub partial_trigger_r: Option<f64>,
    /// Fraction of the remaining quantity closed by the partial stage.
    pub partial_fraction: f64,
    pub trail_trigger_r: Option<f64>,
    pub trail_atr_mult: f64,
    pub max_hold_bars: Option<usize>,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        ProtectionConfig {
            breakeven_trigger_r: Some(1.0),
            breakeven_buffer_atr: 0.1,
            partial_trigger_r: Some(1.5),
            partial_fraction: 0.5,
            trail_trigger_r: Some(2.0),
            trail_atr_mult: 2.0,
            max_hold_bars: Some(60),
        }
    }
}

impl ProtectionConfig {
    /// Fixed stop and target only.
    pub fn fixed(max_hold_bars: Option<usize>) -> Self {
        ProtectionConfig {
            breakeven_trigger_r: None,
            breakeven_buffer_atr: 0.0,
            partial_trigger_r: None,
            partial_fraction: 0.0,
            trail_trigger_r: None,
            trail_atr_mult: 0.0,
            max_hold_bars,
        }
    }
}

/// Calculate commission: flat_fee + (trade_value * pct / 100).
pub fn calculate_commission(trade_value: f64, config: &ExecutionConfig) -> f64 {
    config.commission_per_trade + (trade_value * config.commission_pct / 100.0)
}

/// Long entry (buy): market_price * (1 + slippage_pct / 100)
pub fn apply_slippage_long_entry(market_price: f64, slippage_pct: f64) -> f64 {
    market_price * (1.0 + slippage_pct / 100.0)
}

/// Short entry (sell short): market_price * (1 - slippage_pct / 100)
pub fn apply_slippage_short_entry(market_price: f64, slippage_pct: f64) -> f64 {
    market_price * (1.0 - slippage_pct / 100.0)
}

/// Long exit (sell): market_price * (1 - slippage_pct / 100)
pub fn apply_slippage_long_exit(market_price: f64, slippage_pct: f64) -> f64 {
    market_price * (1.0 - slippage_pct / 100.0)
}

/// Short exit (buy to cover): market_price * (1 + slippage_pct / 100)
pub fn apply_slippage_short_exit(market_price: f64, slippage_pct: f64) -> f64 {
    market_price * (1.0 + slippage_pct / 100.0)
}

pub fn entry_fill(side: Side, market_price: f64, slippage_pct: f64) -> f64 {
    match side {
        Side::Long => apply_slippage_long_entry(market_price, slippage_pct),
        Side::Short => apply_slippage_short_entry(market_price, slippage_pct),
    }
}

pub fn exit_fill(side: Side, market_price: f64, slippage_pct: f64) -> f64 {
    match side {
        Side::Long => apply_slippage_long_exit(market_price, slippage_pct),
        Side::Short => apply_slippage_short_exit(market_price, slippage_pct),
    }
}

/// A sized, admitted entry ready to be filled.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryOrder {
    pub instrument: String,
    pub side: Side,
    pub market_price: f64,
    pub stop: f64,
    pub targets: Vec<f64>,
    pub quantity: f64,
    pub timestamp: DateTime<Utc>,
    /// ATR at the signal bar.
    pub atr: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryResult {
    Entered(Position),
    ShortingDisabled,
    /// The slipped fill landed on the wrong side of the stop.
    StopBreached,
}

pub fn open_position(
    order: &EntryOrder,
    protection: &ProtectionConfig,
    config: &ExecutionConfig,
) -> EntryResult {
    if order.side == Side::Short && !config.allow_shorting {
        return EntryResult::ShortingDisabled;
    }
    let execution_price = entry_fill(order.side, order.market_price, config.slippage_pct);
    if (execution_price - order.stop) * order.side.sign() <= 0.0 {
        return EntryResult::StopBreached;
    }
    let commission = calculate_commission(order.quantity * execution_price, config);

    EntryResult::Entered(Position {
        instrument: order.instrument.clone(),
        side: order.side,
        initial_quantity: order.quantity,
        quantity: order.quantity,
        entry_price: execution_price,
        initial_stop: order.stop,
        stop: order.stop,
        targets: order.targets.clone(),
        state: PositionState::Open,
        opened_at: order.timestamp,
        bars_held: 0,
        entry_fees: commission,
        entry_atr: order.atr,
        trail_distance: protection.trail_atr_mult * order.atr,
        legs: Vec::new(),
    })
}

/// Closes `quantity` units at `market_price` (before slippage).
///
/// PnL for the leg is `(exit - entry) * qty * side_sign - entry fee share -
/// exit commission`. Marks the position closed when nothing remains.
pub fn close_leg(
    position: &mut Position,
    quantity: f64,
    market_price: f64,
    timestamp: DateTime<Utc>,
    reason: ExitReason,
    config: &ExecutionConfig,
) -> ExitLeg {
    let quantity = quantity.min(position.quantity);
    let price = exit_fill(position.side, market_price, config.slippage_pct);
    let exit_commission = calculate_commission(quantity * price, config);
    let fees = exit_commission + position.entry_fee_share(quantity);
    let pnl = (price - position.entry_price) * quantity * position.side.sign() - fees;

    let leg = ExitLeg {
        timestamp,
        quantity,
        price,
        fees,
        pnl,
        reason,
    };
    position.quantity -= quantity;
    if position.quantity <= QTY_EPSILON {
        position.quantity = 0.0;
        position.advance(PositionState::Closed);
    }
    position.legs.push(leg.clone());
    leg
}

/// Closes whatever remains. Used for administrative and end-of-data closes.
pub fn close_remaining(
    position: &mut Position,
    market_price: f64,
    timestamp: DateTime<Utc>,
    reason: ExitReason,
    config: &ExecutionConfig,
) -> Option<ExitLeg> {
    if position.is_closed() || position.quantity <= 0.0 {
        return None;
    }
    let qty = position.quantity;
    Some(close_leg(position, qty, market_price, timestamp, reason, config))
}

/// What happened to a position during one bar.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BarStep {
    pub legs: Vec<ExitLeg>,
    pub transitions: Vec<PositionState>,
    pub stop_before: f64,
    pub stop_after: f64,
}

impl BarStep {
    pub fn closed(&self) -> bool {
        self.transitions.contains(&PositionState::Closed)
    }
}

/// A stop that never moved off `initial_stop` is a plain stop loss whatever
/// the state.
fn stop_reason(position: &Position, state: PositionState, stop: f64) -> ExitReason {
    let moved = (stop - position.initial_stop) * position.side.sign() > QTY_EPSILON;
    match state {
        _ if !moved => ExitReason::StopLoss,
        PositionState::TrailingActive | PositionState::Closed => ExitReason::TrailingStop,
        _ => ExitReason::BreakevenStop,
    }
}

/// Advance an open position through one bar.
pub fn on_bar(
    position: &mut Position,
    bar: &Bar,
    protection: &ProtectionConfig,
    config: &ExecutionConfig,
) -> BarStep {
    let mut step = BarStep {
        stop_before: position.stop,
        stop_after: position.stop,
        ..BarStep::default()
    };
    if position.is_closed() {
        return step;
    }
    position.bars_held += 1;

    let opening_stop = position.stop;
    let opening_state = position.state;
    let breached = position.stop_hit(bar.low, bar.high);
    let sign = position.side.sign();

    if !breached {
        let gain = position.gain_r(bar.close);

        if let Some(trigger) = protection.breakeven_trigger_r
            && position.state < PositionState::BreakevenActive
            && gain >= trigger
        {
            let level =
                position.entry_price + sign * protection.breakeven_buffer_atr * position.entry_atr;
            position.tighten_stop(level);
            if position.advance(PositionState::BreakevenActive) {
                step.transitions.push(PositionState::BreakevenActive);
            }
        }

        if let Some(trigger) = protection.partial_trigger_r
            && position.state < PositionState::PartialTaken
            && gain >= trigger
        {
            let qty = position.quantity * protection.partial_fraction;
            if qty > QTY_EPSILON && position.quantity - qty > QTY_EPSILON {
                step.legs.push(close_leg(
                    position,
                    qty,
                    bar.close,
                    bar.timestamp,
                    ExitReason::Partial,
                    config,
                ));
                if position.advance(PositionState::PartialTaken) {
                    step.transitions.push(PositionState::PartialTaken);
                }
            }
        }

        if let Some(trigger) = protection.trail_trigger_r
            && position.trail_distance > 0.0
        {
            let armed = protection.breakeven_trigger_r.is_none()
                || position.state >= PositionState::BreakevenActive;
            if position.state == PositionState::TrailingActive || (armed && gain >= trigger) {
                position.tighten_stop(bar.close - sign * position.trail_distance);
                if position.advance(PositionState::TrailingActive) {
                    step.transitions.push(PositionState::TrailingActive);
                }
            }
        }
    }

    let exit = if breached {
        let gapped = (bar.open - opening_stop) * sign <= 0.0;
        let price = if gapped { bar.open } else { opening_stop };
        Some((price, stop_reason(position, opening_state, opening_stop)))
    } else if let Some(target) = position.target_hit(bar.low, bar.high) {
        let gapped = (bar.open - target) * sign >= 0.0;
        let price = if gapped { bar.open } else { target };
        Some((price, ExitReason::TakeProfit))
    } else if protection
        .max_hold_bars
        .is_some_and(|max| position.bars_held >= max)
    {
        Some((bar.close, ExitReason::TimeExit))
    } else {
        None
    };

    if let Some((price, reason)) = exit
        && let Some(leg) = close_remaining(position, price, bar.timestamp, reason, config)
    {
        step.legs.push(leg);
        step.transitions.push(PositionState::Closed);
    }
    step.stop_after = position.stop;
    step
}
