//! CSV directory bar source.
//!
//! One file per symbol and timeframe, named `{SYMBOL}_{timeframe}.csv`, with
//! a header row and columns `timestamp,open,high,low,close,volume`. The
//! timestamp is RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) or a bare date.

use crate::domain::bar::Bar;
use crate::domain::error::ShadowtraderError;
use crate::ports::bar_source::BarSource;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str, timeframe: &str) -> PathBuf {
        self.base_path.join(format!("{}_{}.csv", symbol, timeframe))
    }
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(ts.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
}

impl BarSource for CsvAdapter {
    fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, ShadowtraderError> {
        let upstream = |reason: String| ShadowtraderError::UpstreamIo {
            instrument: symbol.to_string(),
            reason,
        };
        let path = self.csv_path(symbol, timeframe);
        let content = fs::read_to_string(&path)
            .map_err(|e| upstream(format!("failed to read {}: {}", path.display(), e)))?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut bars = Vec::new();

        for result in rdr.records() {
            let record = result.map_err(|e| upstream(format!("CSV parse error: {}", e)))?;

            let raw_ts = record
                .get(0)
                .ok_or_else(|| upstream("missing timestamp column".into()))?;
            let timestamp = parse_timestamp(raw_ts)
                .ok_or_else(|| upstream(format!("invalid timestamp {raw_ts:?}")))?;
            if timestamp < start || timestamp > end {
                continue;
            }

            let number = |idx: usize, name: &str| -> Result<f64, ShadowtraderError> {
                record
                    .get(idx)
                    .ok_or_else(|| upstream(format!("missing {name} column")))?
                    .trim()
                    .parse()
                    .map_err(|e| upstream(format!("invalid {name} value: {e}")))
            };

            bars.push(Bar {
                timestamp,
                open: number(1, "open")?,
                high: number(2, "high")?,
                low: number(3, "low")?,
                close: number(4, "close")?,
                volume: number(5, "volume")?,
            });
        }

        // stable: duplicates keep file order for the sanitizer to resolve
        bars.sort_by_key(|b| b.timestamp);
        Ok(bars)
    }

    fn list_symbols(&self) -> Result<Vec<String>, ShadowtraderError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| ShadowtraderError::Database {
            reason: format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ),
        })?;

        let mut symbols = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| ShadowtraderError::Database {
                reason: format!("directory entry error: {}", e),
            })?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".csv")
                && let Some((symbol, _)) = stem.rsplit_once('_')
            {
                symbols.insert(symbol.to_string());
            }
        }

        Ok(symbols.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    fn setup_test_data() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();

        let csv_content = "timestamp,open,high,low,close,volume\n\
            2024-01-16,105.0,115.0,100.0,110.0,60000\n\
            2024-01-15,100.0,110.0,90.0,105.0,50000\n\
            2024-01-17T00:00:00Z,110.0,120.0,105.0,115.0,55000\n";

        fs::write(path.join("BHP_1d.csv"), csv_content).unwrap();
        fs::write(path.join("BHP_1h.csv"), "timestamp,open,high,low,close,volume\n").unwrap();
        fs::write(path.join("CBA_1d.csv"), "timestamp,open,high,low,close,volume\n").unwrap();
        fs::write(path.join("notes.txt"), "ignore me").unwrap();

        (dir, path)
    }

    #[test]
    fn fetch_bars_sorted_and_parsed() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let bars = adapter.fetch_bars("BHP", "1d", day(15), day(17)).unwrap();

        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].timestamp, day(15));
        assert_eq!(bars[0].open, 100.0);
        assert_eq!(bars[0].high, 110.0);
        assert_eq!(bars[0].low, 90.0);
        assert_eq!(bars[0].close, 105.0);
        assert_eq!(bars[0].volume, 50000.0);
        assert_eq!(bars[2].timestamp, day(17));
    }

    #[test]
    fn fetch_bars_filters_by_window() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let bars = adapter.fetch_bars("BHP", "1d", day(16), day(16)).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].timestamp, day(16));
    }

    #[test]
    fn missing_file_is_upstream_failure() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let err = adapter.fetch_bars("XYZ", "1d", day(1), day(31)).unwrap_err();
        assert!(matches!(err, ShadowtraderError::UpstreamIo { instrument, .. } if instrument == "XYZ"));
    }

    #[test]
    fn bad_number_is_upstream_failure() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("BHP_1d.csv"),
            "timestamp,open,high,low,close,volume\n2024-01-15,abc,1,1,1,1\n",
        )
        .unwrap();
        let adapter = CsvAdapter::new(dir.path().to_path_buf());
        assert!(adapter.fetch_bars("BHP", "1d", day(1), day(31)).is_err());
    }

    #[test]
    fn list_symbols_dedupes_timeframes() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        assert_eq!(adapter.list_symbols().unwrap(), vec!["BHP", "CBA"]);
    }

    #[test]
    fn timestamp_formats() {
        assert_eq!(parse_timestamp("2024-01-15"), Some(day(15)));
        assert_eq!(
            parse_timestamp("2024-01-15 09:30:00"),
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap())
        );
        assert_eq!(
            parse_timestamp("2024-01-15T10:00:00+01:00"),
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap())
        );
        assert_eq!(parse_timestamp("15/01/2024"), None);
    }
}
