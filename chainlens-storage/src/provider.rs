//! Data provider: a subscription source wired to its cache and trigger.

use std::sync::Arc;

use chainlens_core::{
    ChainlensError, ChainlensResult, CodingPath, DecodedValue, Identifier, RawItem,
    StorageChangeStream, SubscriptionOptions,
};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::trace;

use crate::cache::{CacheRepository, KeyedCacheStore};
use crate::operation::{Operation, OperationHandle, OperationQueue};
use crate::pipeline::DecodePipeline;
use crate::source::{DataProviderSource, StorageSubscriptionSource};
use crate::trigger::WatchTrigger;

/// Reactive provider for one chain value.
///
/// Consumers watch [`DataProvider::subscribe`] for change notifications and
/// call [`DataProvider::fetch`] to decode the latest raw value. Every
/// successful fetch is written through to the provider's cache store, so
/// [`DataProvider::cached`] serves the last decoded value without decoding.
pub struct DataProvider<T> {
    source: StorageSubscriptionSource<T>,
    store: KeyedCacheStore<DecodedValue<T>>,
    trigger: Arc<WatchTrigger>,
    queue: OperationQueue,
}

impl<T> std::fmt::Debug for DataProvider<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataProvider")
            .field("source", &self.source)
            .field("version", &self.trigger.version())
            .finish_non_exhaustive()
    }
}

impl<T> DataProvider<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Subscribe to `identifier` on `stream` and build the provider around it.
    pub fn new(
        identifier: Identifier,
        pipeline: DecodePipeline<T>,
        stream: &dyn StorageChangeStream,
        options: SubscriptionOptions,
        queue: OperationQueue,
        cache_capacity: usize,
    ) -> ChainlensResult<Self> {
        let trigger = Arc::new(WatchTrigger::new());
        let source = StorageSubscriptionSource::subscribe(
            identifier,
            pipeline,
            stream,
            trigger.clone(),
            options,
            &queue,
        )?;

        Ok(Self {
            source,
            store: KeyedCacheStore::with_capacity(cache_capacity),
            trigger,
            queue,
        })
    }

    pub fn identifier(&self) -> &Identifier {
        self.source.identifier()
    }

    pub fn coding_path(&self) -> &CodingPath {
        self.source.coding_path()
    }

    pub fn source(&self) -> &StorageSubscriptionSource<T> {
        &self.source
    }

    pub fn repository(&self) -> &KeyedCacheStore<DecodedValue<T>> {
        &self.store
    }

    /// Receiver that observes a new version on every raw change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.trigger.subscribe()
    }

    pub fn version(&self) -> u64 {
        self.trigger.version()
    }

    /// Decode the latest raw value and write the result into the cache.
    ///
    /// A value is upserted; "no value" and stream failures remove the cached
    /// entry. Codec and decode failures leave the cache untouched. A write
    /// from an older raw snapshot never replaces one from a newer snapshot.
    pub fn fetch_operation(&self) -> Operation<Option<DecodedValue<T>>> {
        let (revision, read) = self.source.prepare_revision_operation();
        write_through(read, revision, self.store.clone(), self.identifier().clone())
    }

    /// Schedule [`DataProvider::fetch_operation`] on the provider's queue.
    pub fn fetch(&self) -> OperationHandle<Option<DecodedValue<T>>> {
        self.queue.enqueue(self.fetch_operation())
    }

    /// The last value written by a fetch, without decoding.
    ///
    /// While the source holds a stream failure this yields that failure
    /// instead of the cached value.
    pub fn cached(&self) -> Operation<Option<DecodedValue<T>>> {
        if let RawItem::Failed(error) = self.source.raw_snapshot() {
            return Operation::ready("read failed cache", Err(error.into()));
        }
        self.store.fetch_one(self.identifier())
    }
}

fn write_through<T>(
    read: Operation<Option<DecodedValue<T>>>,
    revision: u64,
    store: KeyedCacheStore<DecodedValue<T>>,
    identifier: Identifier,
) -> Operation<Option<DecodedValue<T>>>
where
    T: Clone + Send + Sync + 'static,
{
    Operation::new("write decoded value to cache", async move {
        let result = read.run().await;
        let write = match &result {
            Ok(value) => Some(value.clone()),
            Err(ChainlensError::Stream(_)) => Some(None),
            Err(_) => None,
        };

        if let Some(value) = write {
            let present = value.is_some();
            let applied = store
                .save_revision(&identifier, value, revision)
                .run()
                .await?;
            trace!(%identifier, revision, present, applied, "cache refreshed from source");
        }
        result
    })
}

impl<T> DataProviderSource<DecodedValue<T>> for DataProvider<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn fetch_operation_by_id(&self, model_id: &Identifier) -> Operation<Option<DecodedValue<T>>> {
        if model_id != self.identifier() {
            return self.source.fetch_operation_by_id(model_id);
        }
        self.fetch_operation()
    }

    fn fetch_operation_page(&self, _page: usize) -> Operation<Vec<DecodedValue<T>>> {
        self.fetch_operation()
            .map("wrap page", |value| Ok(value.into_iter().collect()))
    }
}
