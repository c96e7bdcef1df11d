//! Engine configuration resolved once per invocation.
//!
//! Rule and protection keys live in `[engine]`, with `[engine.<version>]`
//! taking precedence for that version. Costs come from `[execution]`, sizing
//! from `[risk]`, run framing from `[backtest]`.

use super::config_validation::validate_engine_config;
use super::error::ShadowtraderError;
use super::execution::{ExecutionConfig, ProtectionConfig};
use super::instrument::{BehaviorClass, TradingStyle};
use super::router::BehaviorTable;
use super::rules::RuleOverrides;
use super::sizing::RiskConfig;
use super::universe::parse_symbols;
use crate::ports::config_port::ConfigPort;

/// Per-style sanitized-bar minimums.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SanitizerSettings {
    pub intraday_min_bars: usize,
    pub swing_min_bars: usize,
    pub position_min_bars: usize,
}

impl Default for SanitizerSettings {
    fn default() -> Self {
        SanitizerSettings {
            intraday_min_bars: TradingStyle::Intraday.default_min_bars(),
            swing_min_bars: TradingStyle::Swing.default_min_bars(),
            position_min_bars: TradingStyle::Position.default_min_bars(),
        }
    }
}

impl SanitizerSettings {
    pub fn min_bars(&self, style: TradingStyle) -> usize {
        match style {
            TradingStyle::Intraday => self.intraday_min_bars,
            TradingStyle::Swing => self.swing_min_bars,
            TradingStyle::Position => self.position_min_bars,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub version: String,
    pub starting_equity: f64,
    pub risk_free_rate: f64,
    pub timeframe: String,
    pub rules: RuleOverrides,
    pub protection: ProtectionConfig,
    pub risk: RiskConfig,
    pub execution: ExecutionConfig,
    pub sanitizer: SanitizerSettings,
    pub behavior: BehaviorTable,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            version: "v2".to_string(),
            starting_equity: 100_000.0,
            risk_free_rate: 0.0,
            timeframe: "1d".to_string(),
            rules: RuleOverrides::default(),
            protection: ProtectionConfig::default(),
            risk: RiskConfig::default(),
            execution: ExecutionConfig::default(),
            sanitizer: SanitizerSettings::default(),
            behavior: BehaviorTable::default(),
        }
    }
}

/// Reads `key` from `[engine.<version>]`, falling back to `[engine]`.
pub fn layered_string(config: &dyn ConfigPort, version: &str, key: &str) -> Option<String> {
    config
        .get_string(&format!("engine.{version}"), key)
        .or_else(|| config.get_string("engine", key))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn layered_f64(config: &dyn ConfigPort, version: &str, key: &str) -> Option<f64> {
    layered_string(config, version, key).and_then(|v| v.parse().ok())
}

/// A stage trigger; `off`, `none` or a non-positive value disables it.
fn layered_trigger(
    config: &dyn ConfigPort,
    version: &str,
    key: &str,
    default: Option<f64>,
) -> Option<f64> {
    match layered_string(config, version, key) {
        None => default,
        Some(v) if matches!(v.to_lowercase().as_str(), "off" | "none") => None,
        Some(v) => v.parse::<f64>().ok().filter(|t| *t > 0.0).or(default),
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

fn resolve_rules(config: &dyn ConfigPort, version: &str) -> RuleOverrides {
    RuleOverrides {
        long_only: layered_string(config, version, "long_only").and_then(|v| parse_flag(&v)),
        cooldown_bars: layered_f64(config, version, "cooldown_bars").map(|v| v.max(0.0) as usize),
        max_spread_pct: layered_f64(config, version, "max_spread_pct"),
        max_bar_age_secs: layered_f64(config, version, "max_bar_age_secs").map(|v| v as i64),
    }
}

fn resolve_protection(config: &dyn ConfigPort, version: &str) -> ProtectionConfig {
    let d = ProtectionConfig::default();
    let max_hold = match layered_string(config, version, "max_hold_bars") {
        None => d.max_hold_bars,
        Some(v) => v.parse::<usize>().ok().filter(|n| *n > 0),
    };
    ProtectionConfig {
        breakeven_trigger_r: layered_trigger(config, version, "breakeven_trigger_r", d.breakeven_trigger_r),
        breakeven_buffer_atr: layered_f64(config, version, "breakeven_buffer_atr")
            .unwrap_or(d.breakeven_buffer_atr),
        partial_trigger_r: layered_trigger(config, version, "partial_trigger_r", d.partial_trigger_r),
        partial_fraction: layered_f64(config, version, "partial_fraction").unwrap_or(d.partial_fraction),
        trail_trigger_r: layered_trigger(config, version, "trail_trigger_r", d.trail_trigger_r),
        trail_atr_mult: layered_f64(config, version, "trail_atr_mult").unwrap_or(d.trail_atr_mult),
        max_hold_bars: max_hold,
    }
}

fn resolve_risk(config: &dyn ConfigPort) -> RiskConfig {
    let d = RiskConfig::default();
    RiskConfig {
        risk_pct_per_trade: config.get_double("risk", "risk_pct_per_trade", d.risk_pct_per_trade),
        max_risk_pct_per_trade: config.get_double(
            "risk",
            "max_risk_pct_per_trade",
            d.max_risk_pct_per_trade,
        ),
        max_notional_pct: config.get_double("risk", "max_notional_pct", d.max_notional_pct),
        min_stop_r: config.get_double("risk", "min_stop_r", d.min_stop_r),
        r_unit_pct: config.get_double("risk", "r_unit_pct", d.r_unit_pct),
        vol_multiple: config.get_double("risk", "vol_multiple", d.vol_multiple),
        quantity_step: config.get_double("risk", "quantity_step", d.quantity_step),
        max_concurrent: config.get_int("risk", "max_concurrent", d.max_concurrent as i64).max(0)
            as usize,
        max_open_risk_pct: config.get_double("risk", "max_open_risk_pct", d.max_open_risk_pct),
        daily_loss_stop_pct: config.get_double(
            "risk",
            "daily_loss_stop_pct",
            d.daily_loss_stop_pct,
        ),
    }
}

fn resolve_execution(config: &dyn ConfigPort) -> ExecutionConfig {
    let d = ExecutionConfig::default();
    ExecutionConfig {
        commission_per_trade: config.get_double(
            "execution",
            "commission_per_trade",
            d.commission_per_trade,
        ),
        commission_pct: config.get_double("execution", "commission_pct", d.commission_pct),
        slippage_pct: config.get_double("execution", "slippage_pct", d.slippage_pct),
        allow_shorting: config.get_bool("execution", "allow_shorting", d.allow_shorting),
    }
}

fn resolve_sanitizer(config: &dyn ConfigPort) -> SanitizerSettings {
    let d = SanitizerSettings::default();
    let read = |key: &str, default: usize| config.get_int("sanitizer", key, default as i64).max(0) as usize;
    SanitizerSettings {
        intraday_min_bars: read("intraday_min_bars", d.intraday_min_bars),
        swing_min_bars: read("swing_min_bars", d.swing_min_bars),
        position_min_bars: read("position_min_bars", d.position_min_bars),
    }
}

/// Builds the behaviour table from `[behavior]`: one comma-separated symbol
/// list per class plus a `default` class.
pub fn resolve_behavior(config: &dyn ConfigPort) -> Result<BehaviorTable, ShadowtraderError> {
    let invalid = |key: &str, reason: String| ShadowtraderError::ConfigInvalid {
        section: "behavior".to_string(),
        key: key.to_string(),
        reason,
    };
    let default = match config.get_string("behavior", "default") {
        Some(v) => v
            .parse::<BehaviorClass>()
            .map_err(|e| invalid("default", e))?,
        None => BehaviorClass::Trending,
    };
    let mut table = BehaviorTable::new(default);
    for class in [
        BehaviorClass::Trending,
        BehaviorClass::RangeBound,
        BehaviorClass::Volatile,
        BehaviorClass::Excluded,
    ] {
        let key = class.as_str();
        if let Some(list) = config.get_string("behavior", key)
            && !list.trim().is_empty()
        {
            let symbols = parse_symbols(&list).map_err(|e| invalid(key, e.to_string()))?;
            for symbol in symbols {
                if let Some(previous) = table.insert(&symbol, class)
                    && previous != class
                {
                    return Err(invalid(
                        key,
                        format!("{symbol} already classified as {previous}"),
                    ));
                }
            }
        }
    }
    Ok(table)
}

impl EngineConfig {
    /// Validates and resolves the configuration for `version`.
    pub fn resolve(config: &dyn ConfigPort, version: &str) -> Result<Self, ShadowtraderError> {
        validate_engine_config(config, version)?;
        let d = EngineConfig::default();
        let starting_equity = config
            .get_string("backtest", "starting_equity")
            .or_else(|| config.get_string("backtest", "initial_capital"))
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(d.starting_equity);

        Ok(EngineConfig {
            version: version.to_string(),
            starting_equity,
            risk_free_rate: config.get_double("backtest", "risk_free_rate", d.risk_free_rate),
            timeframe: config
                .get_string("backtest", "timeframe")
                .unwrap_or(d.timeframe),
            rules: resolve_rules(config, version),
            protection: resolve_protection(config, version),
            risk: resolve_risk(config),
            execution: resolve_execution(config),
            sanitizer: resolve_sanitizer(config),
            behavior: resolve_behavior(config)?,
        })
    }
}
