//! TTL cache in front of another bar source.
//!
//! Entries are keyed `SYMBOL:timeframe:start:end` with both bounds floored to
//! the timeframe, so successive ticks inside one bar period share an entry.
//! The entry store is pluggable: [`MemoryBarCache`] lives for one process,
//! the SQLite adapter's `market_cache` table survives between invocations.
//! Failed fetches are never cached and a failing store only costs a refetch.

use crate::domain::bar::Bar;
use crate::domain::error::ShadowtraderError;
use crate::domain::shadow::timeframe_duration;
use crate::ports::bar_cache::BarCache;
use crate::ports::bar_source::BarSource;
use crate::ports::config_port::ConfigPort;
use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

pub const DEFAULT_TTL_SECS: i64 = 600;
pub const DEFAULT_HIGH_VOLUME_TTL_SECS: i64 = 300;

/// Heavily traded tickers, indices and coins that refresh on the short TTL
/// unless `[cache] high_volume_symbols` says otherwise.
pub const DEFAULT_HIGH_VOLUME_SYMBOLS: [&str; 12] = [
    "AAPL", "MSFT", "GOOGL", "AMZN", "META", "TSLA", "NVDA", "BTC-USD", "ETH-USD", "^GSPC",
    "^IXIC", "^DJI",
];

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

struct CacheEntry {
    bars: Vec<Bar>,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryBarCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryBarCache {
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn locked(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, CacheEntry>>, ShadowtraderError> {
        self.entries.lock().map_err(|_| ShadowtraderError::Database {
            reason: "bar cache lock poisoned".to_string(),
        })
    }
}

impl BarCache for MemoryBarCache {
    fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<Vec<Bar>>, ShadowtraderError> {
        Ok(self
            .locked()?
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.bars.clone()))
    }

    fn put(
        &self,
        key: &str,
        bars: &[Bar],
        expires_at: DateTime<Utc>,
    ) -> Result<(), ShadowtraderError> {
        self.locked()?.insert(
            key.to_string(),
            CacheEntry {
                bars: bars.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, ShadowtraderError> {
        let mut entries = self.locked()?;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        Ok(before - entries.len())
    }
}

fn floor_to(ts: DateTime<Utc>, step: Option<Duration>) -> i64 {
    let secs = ts.timestamp();
    match step.map(|s| s.num_seconds()) {
        Some(step) if step > 0 => secs.div_euclid(step) * step,
        _ => secs,
    }
}

/// `SYMBOL:timeframe:start:end`, bounds in epoch seconds floored to the
/// timeframe. Unknown timeframes are not floored.
pub fn cache_key(symbol: &str, timeframe: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let step = timeframe_duration(timeframe);
    format!(
        "{}:{}:{}:{}",
        symbol.to_uppercase(),
        timeframe.trim().to_ascii_lowercase(),
        floor_to(start, step),
        floor_to(end, step)
    )
}

pub struct CachedBarSource<S, C = MemoryBarCache> {
    inner: S,
    cache: C,
    ttl: Duration,
    high_volume_ttl: Duration,
    high_volume: HashSet<String>,
    clock: Clock,
}

impl<S: BarSource> CachedBarSource<S> {
    /// Process-local cache.
    pub fn new(inner: S) -> Self {
        Self::with_cache(inner, MemoryBarCache::default())
    }
}

impl<S: BarSource, C: BarCache> CachedBarSource<S, C> {
    pub fn with_cache(inner: S, cache: C) -> Self {
        Self {
            inner,
            cache,
            ttl: Duration::seconds(DEFAULT_TTL_SECS),
            high_volume_ttl: Duration::seconds(DEFAULT_HIGH_VOLUME_TTL_SECS),
            high_volume: DEFAULT_HIGH_VOLUME_SYMBOLS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            clock: Box::new(Utc::now),
        }
    }

    /// Applies `ttl_secs`, `high_volume_ttl_secs` and the comma-separated
    /// `high_volume_symbols` from `[cache]`.
    pub fn configure(mut self, config: &dyn ConfigPort) -> Self {
        self.ttl = Duration::seconds(config.get_int("cache", "ttl_secs", DEFAULT_TTL_SECS));
        self.high_volume_ttl = Duration::seconds(config.get_int(
            "cache",
            "high_volume_ttl_secs",
            DEFAULT_HIGH_VOLUME_TTL_SECS,
        ));
        if let Some(list) = config.get_string("cache", "high_volume_symbols") {
            self.high_volume = list
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
        self
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn ttl_for(&self, symbol: &str) -> Duration {
        if self.high_volume.contains(&symbol.to_uppercase()) {
            self.high_volume_ttl
        } else {
            self.ttl
        }
    }
}

impl<S: BarSource, C: BarCache> BarSource for CachedBarSource<S, C> {
    fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, ShadowtraderError> {
        let key = cache_key(symbol, timeframe, start, end);
        let now = (self.clock)();

        match self.cache.get(&key, now) {
            Ok(Some(bars)) => {
                debug!("bar cache hit {key}");
                return Ok(bars);
            }
            Ok(None) => {}
            Err(e) => warn!("bar cache read failed for {key}: {e}"),
        }

        let bars = self.inner.fetch_bars(symbol, timeframe, start, end)?;
        let stored = self
            .cache
            .evict_expired(now)
            .and_then(|_| self.cache.put(&key, &bars, now + self.ttl_for(symbol)));
        if let Err(e) = stored {
            warn!("bar cache write failed for {key}: {e}");
        }
        Ok(bars)
    }

    fn list_symbols(&self) -> Result<Vec<String>, ShadowtraderError> {
        self.inner.list_symbols()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;
    use chrono::TimeZone;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    struct CountingSource {
        calls: Arc<AtomicUsize>,
    }

    impl BarSource for CountingSource {
        fn fetch_bars(
            &self,
            symbol: &str,
            _timeframe: &str,
            start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<Bar>, ShadowtraderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if symbol == "FAIL" {
                return Err(ShadowtraderError::UpstreamIo {
                    instrument: symbol.into(),
                    reason: "timeout".into(),
                });
            }
            Ok(vec![Bar {
                timestamp: start,
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                volume: 1.0,
            }])
        }

        fn list_symbols(&self) -> Result<Vec<String>, ShadowtraderError> {
            Ok(vec!["BHP".into()])
        }
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
    }

    fn cached(config: &str) -> (CachedBarSource<CountingSource>, Arc<AtomicUsize>, Arc<AtomicI64>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let offset = Arc::new(AtomicI64::new(0));
        let clock_offset = Arc::clone(&offset);
        let config = FileConfigAdapter::from_string(config).unwrap();
        let source = CachedBarSource::new(CountingSource {
            calls: Arc::clone(&calls),
        })
        .configure(&config)
        .with_clock(move || base() + Duration::seconds(clock_offset.load(Ordering::SeqCst)));
        (source, calls, offset)
    }

    #[test]
    fn repeat_fetch_served_from_cache_until_expiry() {
        let (source, calls, offset) = cached("[cache]\n");
        let end = base() + Duration::days(1);

        source.fetch_bars("BHP", "1d", base(), end).unwrap();
        source.fetch_bars("bhp", "1d", base(), end).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        offset.store(DEFAULT_TTL_SECS - 1, Ordering::SeqCst);
        source.fetch_bars("BHP", "1d", base(), end).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        offset.store(DEFAULT_TTL_SECS, Ordering::SeqCst);
        source.fetch_bars("BHP", "1d", base(), end).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn windows_within_one_bar_period_share_an_entry() {
        let (source, calls, _) = cached("[cache]\n");
        // two ticks a few minutes apart, each asking for "up to now"
        let first_now = base() + Duration::hours(10);
        let second_now = first_now + Duration::minutes(5);
        source
            .fetch_bars("BHP", "1d", first_now - Duration::days(500), first_now)
            .unwrap();
        source
            .fetch_bars("BHP", "1d", second_now - Duration::days(500), second_now)
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            cache_key("bhp", "1D", first_now, first_now),
            format!("BHP:1d:{0}:{0}", base().timestamp())
        );

        source
            .fetch_bars("BHP", "1h", first_now - Duration::days(500), first_now)
            .unwrap();
        source
            .fetch_bars("BHP", "1d", base(), base() + Duration::days(2))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(source.cache().len(), 3);
    }

    #[test]
    fn expired_entries_evicted_on_insert() {
        let (source, _, offset) = cached("[cache]\n");
        source.fetch_bars("BHP", "1d", base(), base()).unwrap();
        source.fetch_bars("CBA", "1d", base(), base()).unwrap();
        assert_eq!(source.cache().len(), 2);

        offset.store(DEFAULT_TTL_SECS + 1, Ordering::SeqCst);
        source.fetch_bars("NAB", "1d", base(), base()).unwrap();
        assert_eq!(source.cache().len(), 1);
    }

    #[test]
    fn high_volume_symbols_expire_sooner() {
        let (source, calls, offset) = cached("[cache]\n");
        assert_eq!(source.ttl_for("AAPL"), Duration::seconds(DEFAULT_HIGH_VOLUME_TTL_SECS));
        assert_eq!(source.ttl_for("^gspc"), Duration::seconds(DEFAULT_HIGH_VOLUME_TTL_SECS));
        assert_eq!(source.ttl_for("BHP"), Duration::seconds(DEFAULT_TTL_SECS));

        source.fetch_bars("AAPL", "1d", base(), base()).unwrap();
        offset.store(DEFAULT_HIGH_VOLUME_TTL_SECS, Ordering::SeqCst);
        source.fetch_bars("AAPL", "1d", base(), base()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn configured_high_volume_list_replaces_defaults() {
        let (source, _, _) =
            cached("[cache]\nhigh_volume_symbols = btc-usd, BHP\nhigh_volume_ttl_secs = 60\n");
        assert_eq!(source.ttl_for("BHP"), Duration::seconds(60));
        assert_eq!(source.ttl_for("BTC-USD"), Duration::seconds(60));
        assert_eq!(source.ttl_for("AAPL"), Duration::seconds(DEFAULT_TTL_SECS));
    }

    #[test]
    fn failures_are_not_cached() {
        let (source, calls, _) = cached("[cache]\n");
        assert!(source.fetch_bars("FAIL", "1d", base(), base()).is_err());
        assert!(source.fetch_bars("FAIL", "1d", base(), base()).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(source.cache().is_empty());
    }
}
