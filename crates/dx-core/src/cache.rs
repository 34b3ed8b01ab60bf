//! Last-known-good reading and the fallback policy built on it.
//!
//! The cache is owned by the scheduler and updated once per cycle: a success
//! overwrites the stored reading and clears the error, a failure keeps the
//! reading and records the error. Freshness is derived from that pair rather
//! than stored, so it is always a judgment about the latest cycle.

use crate::types::{Freshness, Reading};

/// Cached state carried across cycles.
#[derive(Debug, Clone, Default)]
pub struct ReadingCache {
    last_good: Option<Reading>,
    last_error: Option<String>,
}

impl ReadingCache {
    /// Create an empty cache (nothing observed yet).
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a freshly estimated reading.
    pub fn record_success(&mut self, reading: Reading) {
        self.last_good = Some(reading);
        self.last_error = None;
    }

    /// Record a failed cycle. The stored reading, if any, is kept.
    pub fn record_failure(&mut self, error: impl ToString) {
        self.last_error = Some(error.to_string());
    }

    /// Reading to display for the current cycle.
    ///
    /// `None` when no reading was ever observed; callers must then render the
    /// "unavailable" payload instead of a number.
    pub fn current_display(&self) -> Option<(&Reading, Freshness)> {
        let reading = self.last_good.as_ref()?;
        let freshness = if self.last_error.is_some() {
            Freshness::Stale
        } else {
            Freshness::Fresh
        };
        Some((reading, freshness))
    }

    pub fn last_good(&self) -> Option<&Reading> {
        self.last_good.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(value: f64) -> Reading {
        Reading {
            value,
            change: 0.25,
            observed_at_ms: 42,
        }
    }

    #[test]
    fn empty_cache_has_nothing_to_display() {
        let cache = ReadingCache::new();
        assert!(cache.current_display().is_none());
        assert!(cache.last_error().is_none());
    }

    #[test]
    fn success_is_fresh() {
        let mut cache = ReadingCache::new();
        cache.record_success(reading(52.0));
        let (r, freshness) = cache.current_display().unwrap();
        assert_eq!(r.value, 52.0);
        assert_eq!(freshness, Freshness::Fresh);
    }

    #[test]
    fn failure_after_success_is_stale() {
        let mut cache = ReadingCache::new();
        cache.record_success(reading(52.0));
        cache.record_failure("HTTP 503");
        let (r, freshness) = cache.current_display().unwrap();
        assert_eq!(r.value, 52.0);
        assert_eq!(freshness, Freshness::Stale);
        assert_eq!(cache.last_error(), Some("HTTP 503"));
    }

    #[test]
    fn failure_before_any_success_is_absent() {
        let mut cache = ReadingCache::new();
        cache.record_failure("timeout");
        assert!(cache.current_display().is_none());
        assert!(cache.last_good().is_none());
    }

    #[test]
    fn new_success_overwrites_and_clears_error() {
        let mut cache = ReadingCache::new();
        cache.record_success(reading(52.0));
        cache.record_failure("timeout");
        cache.record_success(reading(53.5));
        let (r, freshness) = cache.current_display().unwrap();
        assert_eq!(r.value, 53.5);
        assert_eq!(freshness, Freshness::Fresh);
        assert!(cache.last_error().is_none());
    }
}
