//! chainlens Core - Data Types and Collaborator Contracts
//!
//! Identifiers, raw and decoded chain values, the error taxonomy, and the
//! traits through which the data-provider layer talks to its external
//! collaborators (change stream, codec factory provider, change trigger).
//! This crate contains no caching or subscription logic.

pub mod codec;
pub mod config;
pub mod error;
pub mod feed;
pub mod identity;
pub mod stream;
pub mod telemetry;
pub mod value;

pub use codec::{CodecFactory, CodecFactoryProvider, CodingPath};
pub use config::ProviderConfig;
pub use error::{
    CacheError, ChainlensError, ChainlensResult, CodecError, ConfigError, DecodeError,
    FetchError, OperationError, StreamError,
};
pub use feed::SnapshotFetcher;
pub use identity::{Identifiable, Identifier};
pub use stream::{ChangeTrigger, StorageChangeStream, StreamEvent, SubscriptionOptions};
pub use telemetry::init_tracing;
pub use value::{fold_changes, ChainStorageItem, DataProviderChange, DecodedValue, RawItem};
