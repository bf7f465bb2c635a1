//! chainlens Storage - Reactive Chain-Storage Data Providers
//!
//! Caches decoded chain values, subscribes to raw storage changes and
//! shares one live subscription per storage key.
//!
//! ```text
//! ProviderRegistry ──▶ DataProvider ──▶ StorageSubscriptionSource ──▶ change stream
//!                          │                   │
//!                          ▼                   ▼
//!                   KeyedCacheStore      DecodePipeline ──▶ codec factory
//! ```
//!
//! All work is expressed as [`Operation`]s that run on an
//! [`OperationQueue`] and can be cancelled before or while they run.

pub mod cache;
pub mod operation;
pub mod pipeline;
pub mod polling;
pub mod provider;
pub mod registry;
pub mod source;
pub mod trigger;

pub use cache::{CacheRead, CacheRepository, CacheStats, Freshness, KeyedCacheStore, SliceRequest};
pub use operation::{Operation, OperationHandle, OperationQueue};
pub use pipeline::DecodePipeline;
pub use polling::{PollingProvider, PollingRegistry};
pub use provider::DataProvider;
pub use registry::ProviderRegistry;
pub use source::{DataProviderSource, StorageSubscriptionSource};
pub use trigger::WatchTrigger;
