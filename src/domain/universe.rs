//! Instrument universe parsing.
//!
//! Parses comma-separated symbol lists from configuration into validated,
//! de-duplicated instruments.

use crate::domain::instrument::{Instrument, SymbolError, TradingStyle, normalize_symbol};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UniverseError {
    #[error("empty token in symbol list")]
    EmptyToken,

    #[error("duplicate symbol: {0}")]
    DuplicateSymbol(String),

    #[error("invalid symbol {symbol:?}: {source}")]
    InvalidSymbol { symbol: String, source: SymbolError },
}

pub fn parse_symbols(input: &str) -> Result<Vec<String>, UniverseError> {
    let mut symbols = Vec::new();
    let mut seen = HashSet::new();

    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(UniverseError::EmptyToken);
        }
        let symbol = normalize_symbol(trimmed).map_err(|source| UniverseError::InvalidSymbol {
            symbol: trimmed.to_string(),
            source,
        })?;
        if !seen.insert(symbol.clone()) {
            return Err(UniverseError::DuplicateSymbol(symbol));
        }
        symbols.push(symbol);
    }

    Ok(symbols)
}

pub fn parse_universe(input: &str, style: TradingStyle) -> Result<Vec<Instrument>, UniverseError> {
    Ok(parse_symbols(input)?
        .into_iter()
        .map(|symbol| Instrument { symbol, style })
        .collect())
}
