//! Provider registry.
//!
//! The registry hands out shared providers keyed by [`Identifier`]. It only
//! keeps weak references: a provider lives exactly as long as some consumer
//! holds it, and the next request after the last consumer let go builds a
//! fresh one.
//!
//! Lookups and construction happen under one mutex, so two concurrent
//! requests for the same identifier can never both build a provider.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chainlens_core::{
    CacheError, ChainlensResult, CodecFactoryProvider, CodingPath, Identifier, ProviderConfig,
    StorageChangeStream,
};
use serde::de::DeserializeOwned;
use tracing::{debug, trace, warn};

use crate::operation::OperationQueue;
use crate::pipeline::DecodePipeline;
use crate::provider::DataProvider;

type ErasedProvider = Weak<dyn Any + Send + Sync>;

/// Identifier to weakly held, type-erased provider.
#[derive(Debug, Default)]
pub(crate) struct WeakRegistry {
    entries: Mutex<HashMap<Identifier, ErasedProvider>>,
}

fn prune_stale(entries: &mut HashMap<Identifier, ErasedProvider>) -> usize {
    let before = entries.len();
    entries.retain(|_, provider| provider.strong_count() > 0);
    let pruned = before - entries.len();
    if pruned > 0 {
        trace!(pruned, live = entries.len(), "pruned stale providers");
    }
    pruned
}

impl WeakRegistry {
    fn entries(&self) -> ChainlensResult<MutexGuard<'_, HashMap<Identifier, ErasedProvider>>> {
        self.entries
            .lock()
            .map_err(|_| CacheError::LockPoisoned.into())
    }

    /// The live provider for `identifier` if it has type `P`, otherwise the
    /// one `build` returns, registered in its place.
    ///
    /// A live provider of a different type is replaced in the registry;
    /// consumers that already hold it keep using it.
    pub(crate) fn get_or_insert_with<P, F>(
        &self,
        identifier: &Identifier,
        build: F,
    ) -> ChainlensResult<Arc<P>>
    where
        P: Any + Send + Sync,
        F: FnOnce() -> ChainlensResult<Arc<P>>,
    {
        let mut entries = self.entries()?;
        prune_stale(&mut entries);

        if let Some(live) = entries.get(identifier).and_then(Weak::upgrade) {
            match live.downcast::<P>() {
                Ok(provider) => {
                    trace!(%identifier, "reusing live provider");
                    return Ok(provider);
                }
                Err(_) => warn!(
                    %identifier,
                    requested = type_name::<P>(),
                    "live provider has a different type, replacing"
                ),
            }
        }

        let provider = build()?;
        let erased: Arc<dyn Any + Send + Sync> = provider.clone();
        entries.insert(identifier.clone(), Arc::downgrade(&erased));
        debug!(%identifier, provider = type_name::<P>(), "registered provider");
        Ok(provider)
    }

    pub(crate) fn prune(&self) -> ChainlensResult<usize> {
        let mut entries = self.entries()?;
        Ok(prune_stale(&mut entries))
    }

    pub(crate) fn live_count(&self) -> ChainlensResult<usize> {
        Ok(self
            .entries()?
            .values()
            .filter(|provider| provider.strong_count() > 0)
            .count())
    }
}

/// Shares one [`DataProvider`] per storage key among all consumers.
pub struct ProviderRegistry {
    stream: Arc<dyn StorageChangeStream>,
    codec_provider: Arc<dyn CodecFactoryProvider>,
    config: ProviderConfig,
    queue: OperationQueue,
    providers: WeakRegistry,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("config", &self.config)
            .field("providers", &self.providers)
            .finish_non_exhaustive()
    }
}

impl ProviderRegistry {
    pub fn new(
        stream: Arc<dyn StorageChangeStream>,
        codec_provider: Arc<dyn CodecFactoryProvider>,
        config: ProviderConfig,
        queue: OperationQueue,
    ) -> ChainlensResult<Self> {
        config.validate()?;
        Ok(Self {
            stream,
            codec_provider,
            config,
            queue,
            providers: WeakRegistry::default(),
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// The live provider for `identifier`, or a newly subscribed one.
    ///
    /// `coding_path` only applies when a provider is built; a live provider
    /// of the same value type is returned as is.
    pub fn get_provider<T>(
        &self,
        identifier: impl Into<Identifier>,
        coding_path: CodingPath,
    ) -> ChainlensResult<Arc<DataProvider<T>>>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let identifier = identifier.into();
        self.providers.get_or_insert_with(&identifier, || {
            let pipeline = DecodePipeline::new(coding_path, Arc::clone(&self.codec_provider));
            DataProvider::new(
                identifier.clone(),
                pipeline,
                self.stream.as_ref(),
                self.config.subscription,
                self.queue.clone(),
                self.config.cache_capacity,
            )
            .map(Arc::new)
        })
    }

    /// Drop registry entries whose provider is gone. Returns how many.
    pub fn prune(&self) -> ChainlensResult<usize> {
        self.providers.prune()
    }

    /// Number of providers some consumer still holds.
    pub fn live_count(&self) -> ChainlensResult<usize> {
        self.providers.live_count()
    }
}
