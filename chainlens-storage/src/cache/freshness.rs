//! Freshness contracts for polled reads.
//!
//! Push-driven sources are always as fresh as their last notification.
//! Polled sources are not, so callers state how much staleness they accept
//! and get the age of what they were served back.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Freshness requirement for a polled read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// Serve the cached snapshot if it is not older than `max_staleness`,
    /// otherwise refetch.
    BestEffort {
        /// Maximum acceptable age of the cached snapshot.
        max_staleness: Duration,
    },

    /// Always refetch from the source.
    Consistent,
}

impl Freshness {
    /// Create a BestEffort freshness with the given max staleness.
    pub fn best_effort(max_staleness: Duration) -> Self {
        Self::BestEffort { max_staleness }
    }

    /// Create a Consistent freshness requirement.
    pub fn consistent() -> Self {
        Self::Consistent
    }

    pub fn is_consistent(&self) -> bool {
        matches!(self, Self::Consistent)
    }

    /// Get the max staleness for BestEffort, or zero for Consistent.
    pub fn max_staleness(&self) -> Duration {
        match self {
            Self::BestEffort { max_staleness } => *max_staleness,
            Self::Consistent => Duration::ZERO,
        }
    }

    /// Whether a snapshot taken at `fetched_at` may still be served.
    pub fn accepts(&self, fetched_at: DateTime<Utc>) -> bool {
        match self {
            Self::Consistent => false,
            Self::BestEffort { max_staleness } => age_of(fetched_at) <= *max_staleness,
        }
    }
}

fn age_of(at: DateTime<Utc>) -> Duration {
    Utc::now()
        .signed_duration_since(at)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// Result of a polled read, carrying staleness metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRead<T> {
    value: T,
    fetched_at: DateTime<Utc>,
    was_cache_hit: bool,
}

impl<T> CacheRead<T> {
    /// A read served from the cached snapshot.
    pub fn from_cache(value: T, fetched_at: DateTime<Utc>) -> Self {
        Self {
            value,
            fetched_at,
            was_cache_hit: true,
        }
    }

    /// A read served by a fresh fetch.
    pub fn from_source(value: T, fetched_at: DateTime<Utc>) -> Self {
        Self {
            value,
            fetched_at,
            was_cache_hit: false,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// When the underlying snapshot was fetched.
    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// How long ago the underlying snapshot was fetched.
    pub fn staleness(&self) -> Duration {
        age_of(self.fetched_at)
    }

    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            fetched_at: self.fetched_at,
            was_cache_hit: self.was_cache_hit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_freshness_best_effort() {
        let freshness = Freshness::best_effort(Duration::from_secs(60));
        assert!(!freshness.is_consistent());
        assert_eq!(freshness.max_staleness(), Duration::from_secs(60));
        assert!(freshness.accepts(Utc::now()));
        assert!(!freshness.accepts(Utc::now() - chrono::Duration::seconds(120)));
    }

    #[test]
    fn test_consistent_never_accepts_cached() {
        let freshness = Freshness::consistent();
        assert!(freshness.is_consistent());
        assert_eq!(freshness.max_staleness(), Duration::ZERO);
        assert!(!freshness.accepts(Utc::now()));
    }

    #[test]
    fn test_future_timestamp_counts_as_fresh() {
        let freshness = Freshness::best_effort(Duration::ZERO);
        assert!(freshness.accepts(Utc::now() + chrono::Duration::seconds(5)));
    }

    #[test]
    fn test_cache_read_staleness() {
        let past = Utc::now() - chrono::Duration::seconds(5);
        let read = CacheRead::from_cache("test", past);

        assert!(read.was_cache_hit());
        let staleness = read.staleness();
        assert!(staleness >= Duration::from_secs(4));
        assert!(staleness <= Duration::from_secs(10));
    }

    #[test]
    fn test_cache_read_map() {
        let read = CacheRead::from_source(42i32, Utc::now());
        let mapped = read.map(|v| v.to_string());

        assert!(!mapped.was_cache_hit());
        assert_eq!(mapped.into_value(), "42");
    }
}
