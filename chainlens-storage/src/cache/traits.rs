//! Cache repository trait and statistics.
//!
//! This module defines the contract a keyed cache substrate must satisfy.
//! The in-memory [`KeyedCacheStore`](super::KeyedCacheStore) is the only
//! implementation in this crate; a persistent store can implement the same
//! trait without the providers noticing.

use chainlens_core::{Identifiable, Identifier};

use crate::operation::Operation;

/// Paged/filtered fetch parameters.
///
/// Keyed caches are unordered, so implementations in this crate reject
/// slice requests outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SliceRequest {
    pub offset: usize,
    pub count: usize,
    pub reversed: bool,
}

/// Repository of identifiable values.
///
/// Every method returns an [`Operation`]: nothing happens until the
/// operation runs, and an operation cancelled before it runs has no effect.
pub trait CacheRepository<T>: Send + Sync
where
    T: Identifiable + Clone + Send + Sync + 'static,
{
    /// The entry for `identifier`, if any.
    fn fetch_one(&self, identifier: &Identifier) -> Operation<Option<T>>;

    /// Every entry, as a snapshot taken when the operation runs.
    fn fetch_all(&self) -> Operation<Vec<T>>;

    /// Paged/filtered fetch.
    fn fetch_slice(&self, request: SliceRequest) -> Operation<Vec<T>>;

    /// Upsert `updates`, then remove `deletions`, atomically.
    ///
    /// Later writes in the same batch win on identifier collisions.
    fn save_batch(&self, updates: Vec<T>, deletions: Vec<Identifier>) -> Operation<()>;

    /// Number of entries.
    fn count(&self) -> Operation<usize>;

    /// Remove every entry atomically.
    fn delete_all(&self) -> Operation<()>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of `fetch_one` calls that found an entry.
    pub hits: u64,
    /// Number of `fetch_one` calls that found nothing.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }
}
