//! Market data port.

use crate::domain::bar::Bar;
use crate::domain::error::ShadowtraderError;
use chrono::{DateTime, Utc};

pub trait BarSource {
    /// Bars for `symbol` with `start <= timestamp <= end`, ascending, unique
    /// timestamps.
    fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, ShadowtraderError>;

    fn list_symbols(&self) -> Result<Vec<String>, ShadowtraderError>;
}

impl<T: BarSource + ?Sized> BarSource for &T {
    fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, ShadowtraderError> {
        (**self).fetch_bars(symbol, timeframe, start, end)
    }

    fn list_symbols(&self) -> Result<Vec<String>, ShadowtraderError> {
        (**self).list_symbols()
    }
}
