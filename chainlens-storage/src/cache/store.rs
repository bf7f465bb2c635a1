//! In-memory keyed cache store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chainlens_core::{CacheError, ChainlensResult, Identifiable, Identifier};
use tracing::trace;

use super::traits::{CacheRepository, CacheStats, SliceRequest};
use crate::operation::Operation;

/// Thread-safe map from [`Identifier`] to value.
///
/// All reads and writes take one mutex for the whole read-modify-write, so
/// a concurrent `fetch_all` never observes half of a `save_batch`. Clones
/// share the same backing map.
///
/// Writers that know the source revision of their value use
/// [`KeyedCacheStore::save_revision`], which refuses writes older than the
/// last one recorded for the identifier.
#[derive(Debug)]
pub struct KeyedCacheStore<T> {
    inner: Arc<StoreInner<T>>,
}

#[derive(Debug)]
struct StoreInner<T> {
    entries: Mutex<HashMap<Identifier, T>>,
    // Only locked while `entries` is held.
    revisions: Mutex<HashMap<Identifier, u64>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T> Clone for KeyedCacheStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for KeyedCacheStore<T> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl<T> StoreInner<T> {
    fn entries(&self) -> ChainlensResult<MutexGuard<'_, HashMap<Identifier, T>>> {
        self.entries
            .lock()
            .map_err(|_| CacheError::LockPoisoned.into())
    }

    fn revisions(&self) -> ChainlensResult<MutexGuard<'_, HashMap<Identifier, u64>>> {
        self.revisions
            .lock()
            .map_err(|_| CacheError::LockPoisoned.into())
    }
}

impl<T> KeyedCacheStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                entries: Mutex::new(HashMap::with_capacity(capacity)),
                revisions: Mutex::new(HashMap::with_capacity(capacity)),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
        }
    }

    /// Current statistics. Reads the entry count under the lock.
    pub fn stats(&self) -> ChainlensResult<CacheStats> {
        let entry_count = self.inner.entries()?.len() as u64;
        Ok(CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            entry_count,
        })
    }
}

impl<T> KeyedCacheStore<T>
where
    T: Identifiable + Clone + Send + Sync + 'static,
{
    /// Remove the entry for `identifier`.
    pub fn delete(&self, identifier: &Identifier) -> Operation<()> {
        self.save_batch(Vec::new(), vec![identifier.clone()])
    }

    /// Store `value` for `identifier` (or remove the entry on `None`) unless a
    /// newer revision was already written for it.
    ///
    /// Yields whether the write was applied. Equal revisions are applied.
    /// Recorded revisions survive `delete_all`, so an in-flight write from
    /// before the clear cannot overtake a later one.
    pub fn save_revision(
        &self,
        identifier: &Identifier,
        value: Option<T>,
        revision: u64,
    ) -> Operation<bool> {
        let inner = Arc::clone(&self.inner);
        let identifier = identifier.clone();
        Operation::new("cache save_revision", async move {
            apply_revision(&inner, identifier, value, revision)
        })
    }
}

fn fetch_one<T: Clone>(inner: &StoreInner<T>, identifier: &Identifier) -> ChainlensResult<Option<T>> {
    let found = inner.entries()?.get(identifier).cloned();
    let counter = if found.is_some() {
        &inner.hits
    } else {
        &inner.misses
    };
    counter.fetch_add(1, Ordering::Relaxed);
    Ok(found)
}

fn apply_batch<T: Identifiable>(
    inner: &StoreInner<T>,
    updates: Vec<T>,
    deletions: Vec<Identifier>,
) -> ChainlensResult<()> {
    let mut entries = inner.entries()?;
    let (upserted, removed) = (updates.len(), deletions.len());

    for value in updates {
        entries.insert(value.identifier().clone(), value);
    }
    for identifier in &deletions {
        entries.remove(identifier);
    }

    trace!(upserted, removed, entries = entries.len(), "cache batch applied");
    Ok(())
}

fn apply_revision<T>(
    inner: &StoreInner<T>,
    identifier: Identifier,
    value: Option<T>,
    revision: u64,
) -> ChainlensResult<bool> {
    let mut entries = inner.entries()?;
    let mut revisions = inner.revisions()?;

    if let Some(&written) = revisions.get(&identifier) {
        if written > revision {
            trace!(%identifier, revision, written, "skipping write from older revision");
            return Ok(false);
        }
    }

    revisions.insert(identifier.clone(), revision);
    match value {
        Some(value) => {
            entries.insert(identifier, value);
        }
        None => {
            entries.remove(&identifier);
        }
    }
    Ok(true)
}

impl<T> CacheRepository<T> for KeyedCacheStore<T>
where
    T: Identifiable + Clone + Send + Sync + 'static,
{
    fn fetch_one(&self, identifier: &Identifier) -> Operation<Option<T>> {
        let inner = Arc::clone(&self.inner);
        let identifier = identifier.clone();
        Operation::new("cache fetch_one", async move { fetch_one(&inner, &identifier) })
    }

    fn fetch_all(&self) -> Operation<Vec<T>> {
        let inner = Arc::clone(&self.inner);
        Operation::new("cache fetch_all", async move {
            Ok(inner.entries()?.values().cloned().collect())
        })
    }

    fn fetch_slice(&self, request: SliceRequest) -> Operation<Vec<T>> {
        trace!(?request, "rejecting slice request on keyed cache");
        Operation::ready(
            "cache fetch_slice",
            Err(CacheError::UnsupportedOperation {
                operation: "fetch_slice".to_string(),
            }
            .into()),
        )
    }

    fn save_batch(&self, updates: Vec<T>, deletions: Vec<Identifier>) -> Operation<()> {
        let inner = Arc::clone(&self.inner);
        Operation::new("cache save_batch", async move {
            apply_batch(&inner, updates, deletions)
        })
    }

    fn count(&self) -> Operation<usize> {
        let inner = Arc::clone(&self.inner);
        Operation::new("cache count", async move { Ok(inner.entries()?.len()) })
    }

    fn delete_all(&self) -> Operation<()> {
        let inner = Arc::clone(&self.inner);
        Operation::new("cache delete_all", async move {
            inner.entries()?.clear();
            trace!("cache cleared");
            Ok(())
        })
    }
}
