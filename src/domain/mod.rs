//! Core domain types and logic.

pub mod audit;
pub mod backtest;
pub mod bar;
pub mod batch;
pub mod config;
pub mod config_validation;
pub mod decision;
pub mod error;
pub mod execution;
pub mod indicator;
pub mod instrument;
pub mod metrics;
pub mod portfolio;
pub mod position;
pub mod router;
pub mod rules;
pub mod sanitizer;
pub mod shadow;
pub mod sizing;
pub mod universe;
