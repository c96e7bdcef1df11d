//! Risk-based position sizing and portfolio admission control.
//!
//! Sizing turns an entry/stop pair into a quantity whose loss at the stop is
//! bounded by the per-trade risk budget. Admission decides whether the
//! portfolio can take the trade at all, and records every check it ran.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::decision::Side;
use super::error::ShadowtraderError;
use super::portfolio::Portfolio;

const FLOOR_EPSILON: f64 = 1e-9;

/// All percentages are fractions of equity (0.0015 = 0.15%).
#[derive(Debug, Clone, PartialEq)]
pub struct RiskConfig {
    pub risk_pct_per_trade: f64,
    pub max_risk_pct_per_trade: f64,
    pub max_notional_pct: f64,
    /// Minimum stop distance in units of the implied R.
    pub min_stop_r: f64,
    /// Implied R as a fraction of entry price.
    pub r_unit_pct: f64,
    /// Minimum stop distance in ATRs.
    pub vol_multiple: f64,
    pub quantity_step: f64,
    pub max_concurrent: usize,
    /// Ceiling on open risk plus the new trade's risk.
    pub max_open_risk_pct: f64,
    /// Kill switch once the day's realized loss reaches this fraction.
    pub daily_loss_stop_pct: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        RiskConfig {
            risk_pct_per_trade: 0.0015,
            max_risk_pct_per_trade: 0.002,
            max_notional_pct: 0.25,
            min_stop_r: 0.08,
            r_unit_pct: 0.01,
            vol_multiple: 0.5,
            quantity_step: 1.0,
            max_concurrent: 5,
            max_open_risk_pct: 0.01,
            daily_loss_stop_pct: 0.02,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SizingRequest<'a> {
    pub instrument: &'a str,
    pub equity: f64,
    pub side: Side,
    pub entry: f64,
    pub stop: f64,
    pub atr: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingResult {
    pub quantity: f64,
    /// Final stop; wider than requested when the minimum applied.
    pub stop: f64,
    pub stop_distance: f64,
    pub raw_quantity: f64,
    pub min_stop: f64,
    pub min_stop_applied: bool,
    pub risk_capped: bool,
    pub notional_capped: bool,
    /// quantity × stop_distance
    pub risk_amount: f64,
}

fn invalid(instrument: &str, reason: impl Into<String>) -> ShadowtraderError {
    ShadowtraderError::InvalidRisk {
        instrument: instrument.to_string(),
        reason: reason.into(),
    }
}

pub fn size_position(
    req: &SizingRequest<'_>,
    config: &RiskConfig,
) -> Result<SizingResult, ShadowtraderError> {
    let inputs = [req.equity, req.entry, req.stop, req.atr];
    if inputs.iter().any(|v| !v.is_finite()) {
        return Err(invalid(req.instrument, "non-finite input"));
    }
    if req.equity <= 0.0 {
        return Err(invalid(req.instrument, "equity must be positive"));
    }
    if req.entry <= 0.0 {
        return Err(invalid(req.instrument, "entry must be positive"));
    }
    if config.quantity_step <= 0.0 || config.risk_pct_per_trade <= 0.0 {
        return Err(invalid(req.instrument, "risk configuration must be positive"));
    }
    let requested_distance = (req.entry - req.stop) * req.side.sign();
    if requested_distance <= 0.0 {
        return Err(invalid(req.instrument, "stop on the wrong side of entry"));
    }

    let implied_r = req.entry * config.r_unit_pct;
    let min_stop = (config.min_stop_r * implied_r).max(config.vol_multiple * req.atr.max(0.0));
    let min_stop_applied = requested_distance < min_stop;
    let stop_distance = requested_distance.max(min_stop);
    let stop = req.entry - req.side.sign() * stop_distance;

    let raw_quantity = req.equity * config.risk_pct_per_trade / stop_distance;
    let risk_limit = req.equity * config.max_risk_pct_per_trade / stop_distance;
    let notional_limit = req.equity * config.max_notional_pct / req.entry;

    let risk_capped = raw_quantity > risk_limit;
    let notional_capped = raw_quantity.min(risk_limit) > notional_limit;
    let capped = raw_quantity.min(risk_limit).min(notional_limit);
    let quantity = ((capped / config.quantity_step) + FLOOR_EPSILON).floor() * config.quantity_step;

    if quantity <= 0.0 {
        return Err(invalid(req.instrument, "size rounds to zero"));
    }

    Ok(SizingResult {
        quantity,
        stop,
        stop_distance,
        raw_quantity,
        min_stop,
        min_stop_applied,
        risk_capped,
        notional_capped,
        risk_amount: quantity * stop_distance,
    })
}

/// One admission rule as evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionCheck {
    pub name: String,
    pub passed: bool,
    pub observed: f64,
    pub limit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Admission {
    pub admitted: bool,
    pub checks: Vec<AdmissionCheck>,
}

impl Admission {
    /// First failed check, which names the rejection.
    pub fn rejection(&self) -> Option<&AdmissionCheck> {
        self.checks.iter().find(|c| !c.passed)
    }

    pub fn into_result(self, instrument: &str) -> Result<Admission, ShadowtraderError> {
        match self.rejection() {
            Some(check) => Err(ShadowtraderError::ExposureRejected {
                instrument: instrument.to_string(),
                reason: check.name.clone(),
            }),
            None => Ok(self),
        }
    }
}

pub const MAX_CONCURRENT_REACHED: &str = "max_concurrent_reached";
pub const DUPLICATE_OPEN_FOR_INSTRUMENT: &str = "duplicate_open_for_instrument";
pub const EXPOSURE_CEILING: &str = "exposure_ceiling";
pub const DAILY_LOSS_KILL_SWITCH: &str = "daily_loss_kill_switch";

/// Runs every admission rule against the portfolio for a new trade risking
/// `new_risk` money on `date`.
pub fn admit(
    portfolio: &Portfolio,
    instrument: &str,
    new_risk: f64,
    date: NaiveDate,
    config: &RiskConfig,
) -> Admission {
    let equity = portfolio.equity();
    let open = portfolio.position_count();
    let duplicate = portfolio.has_position(instrument);
    let exposure = if equity > 0.0 {
        portfolio.open_risk_pct() + new_risk / equity
    } else {
        f64::INFINITY
    };
    let daily_pct = if equity > 0.0 {
        portfolio.daily_realized_pnl(date) / equity
    } else {
        0.0
    };

    let checks = vec![
        AdmissionCheck {
            name: MAX_CONCURRENT_REACHED.into(),
            passed: open < config.max_concurrent,
            observed: open as f64,
            limit: config.max_concurrent as f64,
        },
        AdmissionCheck {
            name: DUPLICATE_OPEN_FOR_INSTRUMENT.into(),
            passed: !duplicate,
            observed: if duplicate { 1.0 } else { 0.0 },
            limit: 0.0,
        },
        AdmissionCheck {
            name: EXPOSURE_CEILING.into(),
            passed: exposure <= config.max_open_risk_pct,
            observed: exposure,
            limit: config.max_open_risk_pct,
        },
        AdmissionCheck {
            name: DAILY_LOSS_KILL_SWITCH.into(),
            passed: daily_pct > -config.daily_loss_stop_pct,
            observed: daily_pct,
            limit: -config.daily_loss_stop_pct,
        },
    ];
    Admission {
        admitted: checks.iter().all(|c| c.passed),
        checks,
    }
}
