//! Instrument identity, trading style and behaviour classification.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MAX_SYMBOL_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    #[error("symbol is empty")]
    Empty,
    #[error("symbol longer than {MAX_SYMBOL_LEN} characters")]
    TooLong,
    #[error("symbol contains invalid character {0:?}")]
    InvalidChar(char),
}

/// Validate and normalise a ticker symbol to upper case.
///
/// Accepts alphanumerics plus `-`, `.`, `_` and `^` (index prefixes such as
/// `^GSPC`, crypto pairs such as `BTC-USD`).
pub fn normalize_symbol(raw: &str) -> Result<String, SymbolError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SymbolError::Empty);
    }
    if trimmed.chars().count() > MAX_SYMBOL_LEN {
        return Err(SymbolError::TooLong);
    }
    let upper = trimmed.to_uppercase();
    if let Some(bad) = upper
        .chars()
        .find(|c| !(c.is_ascii_uppercase() || c.is_ascii_digit() || "-._^".contains(*c)))
    {
        return Err(SymbolError::InvalidChar(bad));
    }
    Ok(upper)
}

/// Holding horizon of an instrument; drives data sufficiency and freshness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingStyle {
    Intraday,
    Swing,
    Position,
}

impl TradingStyle {
    /// Default minimum number of sanitized bars for a meaningful run.
    pub fn default_min_bars(&self) -> usize {
        match self {
            TradingStyle::Intraday => 120,
            TradingStyle::Swing => 60,
            TradingStyle::Position => 200,
        }
    }

    /// Default maximum age of the latest bar before it counts as stale.
    pub fn default_max_bar_age_secs(&self) -> i64 {
        match self {
            TradingStyle::Intraday => 2 * 3600,
            TradingStyle::Swing => 4 * 86_400,
            TradingStyle::Position => 10 * 86_400,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradingStyle::Intraday => "intraday",
            TradingStyle::Swing => "swing",
            TradingStyle::Position => "position",
        }
    }
}

impl fmt::Display for TradingStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradingStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "intraday" => Ok(TradingStyle::Intraday),
            "swing" => Ok(TradingStyle::Swing),
            "position" => Ok(TradingStyle::Position),
            other => Err(format!("unknown trading style {other:?}")),
        }
    }
}

/// Static behaviour bucket used by the multi-engine router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorClass {
    Trending,
    RangeBound,
    Volatile,
    Excluded,
}

impl BehaviorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            BehaviorClass::Trending => "trending",
            BehaviorClass::RangeBound => "range_bound",
            BehaviorClass::Volatile => "volatile",
            BehaviorClass::Excluded => "excluded",
        }
    }
}

impl fmt::Display for BehaviorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BehaviorClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "trending" => Ok(BehaviorClass::Trending),
            "range_bound" | "range" => Ok(BehaviorClass::RangeBound),
            "volatile" => Ok(BehaviorClass::Volatile),
            "excluded" | "blacklisted" => Ok(BehaviorClass::Excluded),
            other => Err(format!("unknown behavior class {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub style: TradingStyle,
}

impl Instrument {
    pub fn new(symbol: &str, style: TradingStyle) -> Result<Self, SymbolError> {
        Ok(Instrument {
            symbol: normalize_symbol(symbol)?,
            style,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_to_upper_case() {
        assert_eq!(normalize_symbol(" aapl ").unwrap(), "AAPL");
        assert_eq!(normalize_symbol("btc-usd").unwrap(), "BTC-USD");
        assert_eq!(normalize_symbol("^gspc").unwrap(), "^GSPC");
    }

    #[test]
    fn rejects_bad_symbols() {
        assert_eq!(normalize_symbol(""), Err(SymbolError::Empty));
        assert_eq!(normalize_symbol("ABCDEFGHIJK"), Err(SymbolError::TooLong));
        assert_eq!(normalize_symbol("AB$"), Err(SymbolError::InvalidChar('$')));
    }

    #[test]
    fn style_round_trips_through_str() {
        for style in [
            TradingStyle::Intraday,
            TradingStyle::Swing,
            TradingStyle::Position,
        ] {
            assert_eq!(style.as_str().parse::<TradingStyle>().unwrap(), style);
        }
        assert!("weekly".parse::<TradingStyle>().is_err());
    }

    #[test]
    fn behavior_aliases() {
        assert_eq!(
            "range-bound".parse::<BehaviorClass>().unwrap(),
            BehaviorClass::RangeBound
        );
        assert_eq!(
            "blacklisted".parse::<BehaviorClass>().unwrap(),
            BehaviorClass::Excluded
        );
    }

    #[test]
    fn instrument_new_validates() {
        let inst = Instrument::new("bhp.ax", TradingStyle::Swing).unwrap();
        assert_eq!(inst.symbol, "BHP.AX");
        assert!(Instrument::new("a b", TradingStyle::Swing).is_err());
    }
}
