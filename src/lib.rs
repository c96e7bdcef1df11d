//! shadowtrader — deterministic, versioned trade execution and risk sizing
//! for backtests and shadow trading.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`].

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod ports;
