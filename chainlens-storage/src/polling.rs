//! Polled single-value providers.
//!
//! Some values (fiat prices, exchange rates) are not chain storage and have
//! no change stream. A [`PollingProvider`] caches the last snapshot it
//! fetched and serves it while it is inside the freshness window; past that
//! it refetches. [`PollingRegistry`] shares providers per identifier under
//! the same weak-ownership rule as the storage registry.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chainlens_core::{
    ChainlensResult, ChangeTrigger, Identifier, ProviderConfig, SnapshotFetcher,
};
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::cache::{CacheRead, Freshness};
use crate::operation::Operation;
use crate::registry::WeakRegistry;
use crate::source::DataProviderSource;
use crate::trigger::WatchTrigger;

#[derive(Debug, Clone)]
struct Snapshot<T> {
    value: Option<T>,
    fetched_at: DateTime<Utc>,
}

struct PollingState<T> {
    identifier: Identifier,
    fetcher: Arc<dyn SnapshotFetcher<T>>,
    freshness: Freshness,
    latest: Mutex<Option<Snapshot<T>>>,
    trigger: WatchTrigger,
}

impl<T> PollingState<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn latest(&self) -> MutexGuard<'_, Option<Snapshot<T>>> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cached(&self, freshness: &Freshness) -> Option<CacheRead<Option<T>>> {
        let latest = self.latest();
        let snapshot = latest.as_ref()?;
        freshness
            .accepts(snapshot.fetched_at)
            .then(|| CacheRead::from_cache(snapshot.value.clone(), snapshot.fetched_at))
    }

    /// Record a snapshot requested at `fetched_at`.
    ///
    /// Returns the stored snapshot instead when it is newer than this one.
    fn store(&self, value: Option<T>, fetched_at: DateTime<Utc>) -> Option<Snapshot<T>> {
        let changed = {
            let mut latest = self.latest();
            if let Some(newer) = latest.as_ref().filter(|s| s.fetched_at > fetched_at) {
                trace!(identifier = %self.identifier, "dropping snapshot older than cached one");
                return Some(newer.clone());
            }
            let previous = latest.as_ref().and_then(|snapshot| snapshot.value.as_ref());
            let changed = previous != value.as_ref();
            *latest = Some(Snapshot { value, fetched_at });
            changed
        };

        if changed {
            trace!(identifier = %self.identifier, "polled value changed");
            self.trigger.fire();
        }
        None
    }
}

/// Cached single value refreshed from a [`SnapshotFetcher`].
pub struct PollingProvider<T> {
    state: Arc<PollingState<T>>,
}

impl<T> std::fmt::Debug for PollingProvider<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingProvider")
            .field("identifier", &self.state.identifier)
            .field("freshness", &self.state.freshness)
            .finish_non_exhaustive()
    }
}

impl<T> PollingProvider<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(
        identifier: Identifier,
        fetcher: Arc<dyn SnapshotFetcher<T>>,
        freshness: Freshness,
    ) -> Self {
        Self {
            state: Arc::new(PollingState {
                identifier,
                fetcher,
                freshness,
                latest: Mutex::new(None),
                trigger: WatchTrigger::new(),
            }),
        }
    }

    pub fn identifier(&self) -> &Identifier {
        &self.state.identifier
    }

    /// Freshness applied by [`PollingProvider::fetch`].
    pub fn freshness(&self) -> &Freshness {
        &self.state.freshness
    }

    /// Receiver that observes a new version whenever a fetch changes the value.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.state.trigger.subscribe()
    }

    /// Read with the provider's own freshness window.
    pub fn fetch(&self) -> Operation<CacheRead<Option<T>>> {
        self.fetch_with(self.state.freshness.clone())
    }

    /// Read with an explicit freshness requirement.
    ///
    /// A snapshot is stamped with the time its request started. When a
    /// later request already stored its result, the older one is discarded
    /// and the read returns the stored snapshot. A failed refetch leaves the
    /// cached snapshot in place.
    pub fn fetch_with(&self, freshness: Freshness) -> Operation<CacheRead<Option<T>>> {
        let state = Arc::clone(&self.state);
        Operation::new("poll snapshot", async move {
            if let Some(read) = state.cached(&freshness) {
                trace!(identifier = %state.identifier, "serving cached snapshot");
                return Ok(read);
            }

            let requested_at = Utc::now();
            let value = state.fetcher.fetch_snapshot(&state.identifier).await?;
            if let Some(newer) = state.store(value.clone(), requested_at) {
                return Ok(CacheRead::from_cache(newer.value, newer.fetched_at));
            }
            debug!(
                identifier = %state.identifier,
                present = value.is_some(),
                "refreshed snapshot from source"
            );
            Ok(CacheRead::from_source(value, requested_at))
        })
    }

    /// The cached snapshot regardless of age, without fetching.
    pub fn peek(&self) -> Option<CacheRead<Option<T>>> {
        self.state
            .latest()
            .as_ref()
            .map(|snapshot| CacheRead::from_cache(snapshot.value.clone(), snapshot.fetched_at))
    }
}

impl<T> DataProviderSource<T> for PollingProvider<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn fetch_operation_by_id(&self, model_id: &Identifier) -> Operation<Option<T>> {
        if model_id != self.identifier() {
            return Operation::ready("read foreign identifier", Ok(None));
        }
        self.fetch().map("unwrap snapshot", |read| Ok(read.into_value()))
    }

    fn fetch_operation_page(&self, _page: usize) -> Operation<Vec<T>> {
        self.fetch()
            .map("wrap page", |read| Ok(read.into_value().into_iter().collect()))
    }
}

/// Shares one [`PollingProvider`] per identifier among all consumers.
#[derive(Debug)]
pub struct PollingRegistry {
    config: ProviderConfig,
    providers: WeakRegistry,
}

impl PollingRegistry {
    pub fn new(config: ProviderConfig) -> ChainlensResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            providers: WeakRegistry::default(),
        })
    }

    /// The live provider for `identifier`, or a new one backed by `fetcher`.
    ///
    /// `fetcher` is only used when a provider is built.
    pub fn get_provider<T>(
        &self,
        identifier: impl Into<Identifier>,
        fetcher: Arc<dyn SnapshotFetcher<T>>,
    ) -> ChainlensResult<Arc<PollingProvider<T>>>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        let identifier = identifier.into();
        let freshness = Freshness::best_effort(self.config.polling_freshness);
        self.providers.get_or_insert_with(&identifier, || {
            Ok(Arc::new(PollingProvider::new(
                identifier.clone(),
                fetcher,
                freshness,
            )))
        })
    }

    pub fn prune(&self) -> ChainlensResult<usize> {
        self.providers.prune()
    }

    pub fn live_count(&self) -> ChainlensResult<usize> {
        self.providers.live_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainlens_core::{ChainlensError, FetchError};
    use chainlens_test_utils::MockSnapshotFetcher;
    use std::time::Duration;

    fn price_provider(
        fetcher: &Arc<MockSnapshotFetcher<u64>>,
        freshness: Freshness,
    ) -> PollingProvider<u64> {
        let fetcher: Arc<dyn SnapshotFetcher<u64>> = fetcher.clone();
        PollingProvider::new(Identifier::from("dot-usd"), fetcher, freshness)
    }

    #[tokio::test]
    async fn test_fresh_snapshot_is_served_from_cache() {
        let fetcher = Arc::new(MockSnapshotFetcher::new());
        fetcher.set("dot-usd", 712);
        let provider = price_provider(&fetcher, Freshness::best_effort(Duration::from_secs(60)));

        let first = provider.fetch().run().await.unwrap();
        assert!(!first.was_cache_hit());
        assert_eq!(first.value(), &Some(712));

        let second = provider.fetch().run().await.unwrap();
        assert!(second.was_cache_hit());
        assert_eq!(second.fetched_at(), first.fetched_at());
        assert_eq!(fetcher.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_snapshot_is_refetched() {
        let fetcher = Arc::new(MockSnapshotFetcher::new());
        fetcher.set("dot-usd", 712);
        let provider = price_provider(&fetcher, Freshness::best_effort(Duration::from_millis(1)));

        provider.fetch().run().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        fetcher.set("dot-usd", 730);

        let read = provider.fetch().run().await.unwrap();
        assert!(!read.was_cache_hit());
        assert_eq!(read.into_value(), Some(730));
        assert_eq!(fetcher.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_consistent_read_always_fetches() {
        let fetcher = Arc::new(MockSnapshotFetcher::new());
        fetcher.set("dot-usd", 712);
        let provider = price_provider(&fetcher, Freshness::best_effort(Duration::from_secs(60)));

        provider.fetch().run().await.unwrap();
        let read = provider.fetch_with(Freshness::consistent()).run().await.unwrap();

        assert!(!read.was_cache_hit());
        assert_eq!(fetcher.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_trigger_fires_only_on_value_change() {
        let fetcher = Arc::new(MockSnapshotFetcher::new());
        fetcher.set("dot-usd", 712);
        let provider = price_provider(&fetcher, Freshness::consistent());
        let versions = provider.subscribe();

        provider.fetch().run().await.unwrap();
        provider.fetch().run().await.unwrap();
        assert_eq!(*versions.borrow(), 1);

        fetcher.set("dot-usd", 715);
        provider.fetch().run().await.unwrap();
        assert_eq!(*versions.borrow(), 2);
    }

    #[tokio::test]
    async fn test_failed_refetch_keeps_snapshot() {
        let fetcher = Arc::new(MockSnapshotFetcher::new());
        fetcher.set("dot-usd", 712);
        let provider = price_provider(&fetcher, Freshness::consistent());

        provider.fetch().run().await.unwrap();
        fetcher.fail_with("rate limited");

        let err = provider.fetch().run().await.unwrap_err();
        assert!(matches!(err, ChainlensError::Fetch(FetchError::SourceFailed { .. })));
        assert_eq!(provider.peek().unwrap().into_value(), Some(712));
    }

    #[test]
    fn test_older_snapshot_does_not_replace_newer() {
        let fetcher = Arc::new(MockSnapshotFetcher::new());
        let provider = price_provider(&fetcher, Freshness::consistent());
        let versions = provider.subscribe();
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::seconds(5);

        assert!(provider.state.store(Some(730), later).is_none());
        assert_eq!(*versions.borrow(), 1);

        let newer = provider.state.store(Some(712), earlier).unwrap();
        assert_eq!(newer.value, Some(730));
        assert_eq!(newer.fetched_at, later);

        let peeked = provider.peek().unwrap();
        assert_eq!(peeked.fetched_at(), later);
        assert_eq!(peeked.into_value(), Some(730));
        assert_eq!(*versions.borrow(), 1);
    }

    #[tokio::test]
    async fn test_source_reads_guard_identifier() {
        let fetcher = Arc::new(MockSnapshotFetcher::new());
        fetcher.set("dot-usd", 712);
        let provider = price_provider(&fetcher, Freshness::consistent());

        let foreign = provider
            .fetch_operation_by_id(&Identifier::from("ksm-usd"))
            .run()
            .await
            .unwrap();
        assert_eq!(foreign, None);
        assert_eq!(fetcher.fetch_count(), 0);

        let page = provider.fetch_operation_page(3).run().await.unwrap();
        assert_eq!(page, vec![712]);
    }

    #[tokio::test]
    async fn test_registry_shares_and_rebuilds() {
        let registry = PollingRegistry::new(ProviderConfig::default()).unwrap();
        let fetcher: Arc<dyn SnapshotFetcher<u64>> = Arc::new(MockSnapshotFetcher::new());

        let first = registry
            .get_provider("dot-usd", Arc::clone(&fetcher))
            .unwrap();
        let second = registry
            .get_provider("dot-usd", Arc::clone(&fetcher))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(
            first.freshness(),
            &Freshness::best_effort(Duration::from_secs(60))
        );

        drop((first, second));
        assert_eq!(registry.live_count().unwrap(), 0);
        assert_eq!(registry.prune().unwrap(), 1);

        let rebuilt = registry.get_provider("dot-usd", fetcher).unwrap();
        assert!(rebuilt.peek().is_none());
    }
}
