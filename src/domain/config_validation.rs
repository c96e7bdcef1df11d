//! Configuration validation.
//!
//! Checks every tunable before a run so a bad value fails fast with its
//! section and key instead of surfacing as a strange trade.

use crate::domain::config::layered_string;
use crate::domain::error::ShadowtraderError;
use crate::domain::instrument::TradingStyle;
use crate::domain::universe::parse_symbols;
use crate::ports::config_port::ConfigPort;

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> ShadowtraderError {
    ShadowtraderError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

pub fn validate_engine_config(
    config: &dyn ConfigPort,
    version: &str,
) -> Result<(), ShadowtraderError> {
    validate_backtest(config)?;
    validate_execution(config)?;
    validate_risk(config)?;
    validate_protection(config, version)?;
    validate_sanitizer(config)?;
    Ok(())
}

/// Checks the keys the shadow tick needs on top of the engine keys.
pub fn validate_shadow_config(config: &dyn ConfigPort) -> Result<(), ShadowtraderError> {
    match config.get_string("shadow", "universe") {
        Some(list) if !list.trim().is_empty() => {
            parse_symbols(&list).map_err(|e| invalid("shadow", "universe", e.to_string()))?;
        }
        _ => {
            return Err(ShadowtraderError::ConfigMissing {
                section: "shadow".to_string(),
                key: "universe".to_string(),
            });
        }
    }
    if let Some(style) = config.get_string("shadow", "style") {
        style
            .parse::<TradingStyle>()
            .map_err(|e| invalid("shadow", "style", e))?;
    }
    if config.get_int("shadow", "budget_ms", 1) <= 0 {
        return Err(invalid("shadow", "budget_ms", "budget_ms must be positive"));
    }
    if config.get_int("shadow", "lookback_bars", 1) <= 0 {
        return Err(invalid("shadow", "lookback_bars", "lookback_bars must be positive"));
    }
    Ok(())
}

fn validate_backtest(config: &dyn ConfigPort) -> Result<(), ShadowtraderError> {
    for key in ["starting_equity", "initial_capital"] {
        if let Some(raw) = config.get_string("backtest", key) {
            let value: f64 = raw
                .trim()
                .parse()
                .map_err(|_| invalid("backtest", key, format!("{key} must be a number")))?;
            if value <= 0.0 {
                return Err(invalid("backtest", key, format!("{key} must be positive")));
            }
        }
    }
    let rf = config.get_double("backtest", "risk_free_rate", 0.0);
    if !(0.0..1.0).contains(&rf) {
        return Err(invalid(
            "backtest",
            "risk_free_rate",
            "risk_free_rate must be between 0 and 1",
        ));
    }
    if let Some(style) = config.get_string("backtest", "style") {
        style
            .parse::<TradingStyle>()
            .map_err(|e| invalid("backtest", "style", e))?;
    }
    Ok(())
}

fn validate_execution(config: &dyn ConfigPort) -> Result<(), ShadowtraderError> {
    for key in ["commission_per_trade", "commission_pct", "slippage_pct"] {
        if config.get_double("execution", key, 0.0) < 0.0 {
            return Err(invalid(
                "execution",
                key,
                format!("{key} must be non-negative"),
            ));
        }
    }
    Ok(())
}

fn validate_sanitizer(config: &dyn ConfigPort) -> Result<(), ShadowtraderError> {
    for key in ["intraday_min_bars", "swing_min_bars", "position_min_bars"] {
        if config.get_int("sanitizer", key, 1) < 1 {
            return Err(invalid("sanitizer", key, format!("{key} must be at least 1")));
        }
    }
    Ok(())
}

fn validate_risk(config: &dyn ConfigPort) -> Result<(), ShadowtraderError> {
    for key in [
        "risk_pct_per_trade",
        "max_risk_pct_per_trade",
        "max_notional_pct",
        "max_open_risk_pct",
        "daily_loss_stop_pct",
    ] {
        let value = config.get_double("risk", key, 0.01);
        if value <= 0.0 || value > 1.0 {
            return Err(invalid("risk", key, format!("{key} must be in (0, 1]")));
        }
    }
    let risk = config.get_double("risk", "risk_pct_per_trade", 0.0015);
    let cap = config.get_double("risk", "max_risk_pct_per_trade", 0.002);
    if risk > cap {
        return Err(invalid(
            "risk",
            "risk_pct_per_trade",
            "risk_pct_per_trade must not exceed max_risk_pct_per_trade",
        ));
    }
    for key in ["min_stop_r", "vol_multiple", "r_unit_pct"] {
        if config.get_double("risk", key, 0.0) < 0.0 {
            return Err(invalid("risk", key, format!("{key} must be non-negative")));
        }
    }
    if config.get_double("risk", "quantity_step", 1.0) <= 0.0 {
        return Err(invalid("risk", "quantity_step", "quantity_step must be positive"));
    }
    if config.get_int("risk", "max_concurrent", 1) <= 0 {
        return Err(invalid("risk", "max_concurrent", "max_concurrent must be positive"));
    }
    Ok(())
}

fn validate_protection(config: &dyn ConfigPort, version: &str) -> Result<(), ShadowtraderError> {
    let section = format!("engine.{version}");
    if let Some(raw) = layered_string(config, version, "partial_fraction") {
        let fraction: f64 = raw
            .parse()
            .map_err(|_| invalid(&section, "partial_fraction", "partial_fraction must be a number"))?;
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(invalid(
                &section,
                "partial_fraction",
                "partial_fraction must be in (0, 1)",
            ));
        }
    }
    for key in ["breakeven_buffer_atr", "trail_atr_mult"] {
        if let Some(raw) = layered_string(config, version, key) {
            let value: f64 = raw
                .parse()
                .map_err(|_| invalid(&section, key, format!("{key} must be a number")))?;
            if value < 0.0 {
                return Err(invalid(&section, key, format!("{key} must be non-negative")));
            }
        }
    }
    Ok(())
}
