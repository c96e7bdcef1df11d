//! Storage behind the bar cache.
//!
//! Entries carry their own expiry; a store never hands back an entry whose
//! `expires_at` is at or before the `now` it is asked with.

use crate::domain::bar::Bar;
use crate::domain::error::ShadowtraderError;
use chrono::{DateTime, Utc};

pub trait BarCache {
    fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<Vec<Bar>>, ShadowtraderError>;

    /// Inserts or replaces the entry for `key`.
    fn put(
        &self,
        key: &str,
        bars: &[Bar],
        expires_at: DateTime<Utc>,
    ) -> Result<(), ShadowtraderError>;

    /// Drops every entry expired at `now`. Returns how many went.
    fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, ShadowtraderError>;
}

impl<T: BarCache + ?Sized> BarCache for &T {
    fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<Vec<Bar>>, ShadowtraderError> {
        (**self).get(key, now)
    }

    fn put(
        &self,
        key: &str,
        bars: &[Bar],
        expires_at: DateTime<Utc>,
    ) -> Result<(), ShadowtraderError> {
        (**self).put(key, bars, expires_at)
    }

    fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, ShadowtraderError> {
        (**self).evict_expired(now)
    }
}
