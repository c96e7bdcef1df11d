//! Portfolio accounting: realized and unrealized PnL, equity curve and
//! drawdown.
//!
//! Realized PnL only ever grows from exit legs, and it is booked in the same
//! call that removes the leg's quantity from the open position. That keeps
//! `starting + realized + unrealized` continuous across a close.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::bar::Bar;
use super::execution::{BarStep, ExecutionConfig, ProtectionConfig, close_remaining, on_bar};
use super::position::{ExitLeg, ExitReason, Position, Trade};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
    pub realized: f64,
    pub unrealized: f64,
    pub peak: f64,
    /// Fractional decline from `peak`.
    pub drawdown: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub starting_equity: f64,
    pub realized_pnl: f64,
    pub positions: BTreeMap<String, Position>,
    pub closed_trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub peak_equity: f64,
    pub daily_realized: BTreeMap<NaiveDate, f64>,
    pub last_prices: BTreeMap<String, f64>,
}

impl Portfolio {
    pub fn new(starting_equity: f64) -> Self {
        Portfolio {
            starting_equity,
            realized_pnl: 0.0,
            positions: BTreeMap::new(),
            closed_trades: Vec::new(),
            equity_curve: Vec::new(),
            peak_equity: starting_equity,
            daily_realized: BTreeMap::new(),
            last_prices: BTreeMap::new(),
        }
    }

    /// Rebuilds a portfolio from persisted state.
    pub fn restore(
        starting_equity: f64,
        last_snapshot: Option<&EquityPoint>,
        positions: Vec<Position>,
    ) -> Self {
        let mut portfolio = Portfolio::new(starting_equity);
        if let Some(snapshot) = last_snapshot {
            portfolio.realized_pnl = snapshot.realized;
            portfolio.peak_equity = snapshot.peak.max(starting_equity);
        }
        for position in positions {
            portfolio
                .last_prices
                .insert(position.instrument.clone(), position.entry_price);
            portfolio.positions.insert(position.instrument.clone(), position);
        }
        portfolio
    }

    /// Re-seeds per-day realized PnL from already-booked trades so the daily
    /// kill switch survives a restart. Does not touch `realized_pnl`.
    pub fn seed_daily_realized(&mut self, trades: &[Trade]) {
        for leg in trades.iter().flat_map(|t| t.legs.iter()) {
            *self
                .daily_realized
                .entry(leg.timestamp.date_naive())
                .or_insert(0.0) += leg.pnl;
        }
    }

    /// Adds a position. Returns false if the instrument already has one.
    pub fn add_position(&mut self, position: Position) -> bool {
        if self.positions.contains_key(&position.instrument) {
            return false;
        }
        self.last_prices
            .insert(position.instrument.clone(), position.entry_price);
        self.positions.insert(position.instrument.clone(), position);
        true
    }

    pub fn get_position(&self, instrument: &str) -> Option<&Position> {
        self.positions.get(instrument)
    }

    pub fn has_position(&self, instrument: &str) -> bool {
        self.positions.contains_key(instrument)
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn mark(&mut self, instrument: &str, price: f64) {
        if price.is_finite() {
            self.last_prices.insert(instrument.to_string(), price);
        }
    }

    fn book(&mut self, leg: &ExitLeg) {
        self.realized_pnl += leg.pnl;
        *self
            .daily_realized
            .entry(leg.timestamp.date_naive())
            .or_insert(0.0) += leg.pnl;
    }

    fn settle(&mut self, instrument: &str, legs: &[ExitLeg]) -> Option<Trade> {
        for leg in legs {
            self.book(leg);
        }
        if !self.positions.get(instrument)?.is_closed() {
            return None;
        }
        let trade = self.positions.remove(instrument)?.to_trade()?;
        self.closed_trades.push(trade.clone());
        Some(trade)
    }

    /// Runs one bar of the state machine for `instrument` and books any
    /// resulting legs. `None` when no position is open there.
    pub fn advance(
        &mut self,
        instrument: &str,
        bar: &Bar,
        protection: &ProtectionConfig,
        config: &ExecutionConfig,
    ) -> Option<(BarStep, Option<Trade>)> {
        let step = {
            let position = self.positions.get_mut(instrument)?;
            on_bar(position, bar, protection, config)
        };
        self.mark(instrument, bar.close);
        let trade = self.settle(instrument, &step.legs);
        Some((step, trade))
    }

    /// Administrative or end-of-data close at `price`.
    pub fn close(
        &mut self,
        instrument: &str,
        price: f64,
        timestamp: DateTime<Utc>,
        reason: ExitReason,
        config: &ExecutionConfig,
    ) -> Option<Trade> {
        let leg = {
            let position = self.positions.get_mut(instrument)?;
            close_remaining(position, price, timestamp, reason, config)?
        };
        self.mark(instrument, price);
        self.settle(instrument, std::slice::from_ref(&leg))
    }

    /// Closes every open position at its last known price.
    pub fn close_all(
        &mut self,
        timestamp: DateTime<Utc>,
        reason: ExitReason,
        config: &ExecutionConfig,
    ) -> Vec<Trade> {
        let instruments: Vec<String> = self.positions.keys().cloned().collect();
        instruments
            .iter()
            .filter_map(|inst| {
                let price = self.price_of(inst)?;
                self.close(inst, price, timestamp, reason, config)
            })
            .collect()
    }

    fn price_of(&self, instrument: &str) -> Option<f64> {
        self.last_prices
            .get(instrument)
            .copied()
            .or_else(|| self.positions.get(instrument).map(|p| p.entry_price))
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.positions
            .values()
            .map(|pos| {
                let price = self
                    .last_prices
                    .get(&pos.instrument)
                    .copied()
                    .unwrap_or(pos.entry_price);
                pos.net_unrealized_pnl(price)
            })
            .sum()
    }

    pub fn equity(&self) -> f64 {
        self.starting_equity + self.realized_pnl + self.unrealized_pnl()
    }

    /// Money lost if every open stop filled.
    pub fn open_risk(&self) -> f64 {
        self.positions.values().map(Position::open_risk).sum()
    }

    pub fn open_risk_pct(&self) -> f64 {
        let equity = self.equity();
        if equity > 0.0 {
            self.open_risk() / equity
        } else {
            0.0
        }
    }

    pub fn daily_realized_pnl(&self, date: NaiveDate) -> f64 {
        self.daily_realized.get(&date).copied().unwrap_or(0.0)
    }

    pub fn record_equity(&mut self, timestamp: DateTime<Utc>) -> &EquityPoint {
        let unrealized = self.unrealized_pnl();
        let equity = self.starting_equity + self.realized_pnl + unrealized;
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        let drawdown = if self.peak_equity > 0.0 {
            (self.peak_equity - equity) / self.peak_equity
        } else {
            0.0
        };
        self.equity_curve.push(EquityPoint {
            timestamp,
            equity,
            realized: self.realized_pnl,
            unrealized,
            peak: self.peak_equity,
            drawdown,
        });
        &self.equity_curve[self.equity_curve.len() - 1]
    }
}
