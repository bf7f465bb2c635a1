//! Codec factory contracts.
//!
//! Building a codec factory (runtime metadata, type registries) is outside
//! this workspace. Providers only need to fetch one asynchronously and ask it
//! to decode bytes at a [`CodingPath`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::ChainlensResult;

/// Describes the shape raw bytes should be decoded as.
///
/// Storage entries are addressed by pallet/module name plus item name,
/// e.g. `System.Account`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodingPath {
    pub module: String,
    pub item: String,
}

impl CodingPath {
    pub fn new(module: impl Into<String>, item: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            item: item.into(),
        }
    }
}

impl fmt::Display for CodingPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.item)
    }
}

/// A versioned decoder produced from chain runtime metadata.
///
/// Decoding yields a self-describing JSON value; mapping that value onto a
/// concrete Rust type is done by the caller with serde.
pub trait CodecFactory: Send + Sync + fmt::Debug {
    /// Runtime version the factory was built from.
    fn version(&self) -> u32;

    /// Decode `data` as the type found at `path`.
    ///
    /// Fails with a codec error for unknown paths and a decode error when
    /// the bytes do not match the expected shape.
    fn decode(&self, path: &CodingPath, data: &[u8]) -> ChainlensResult<serde_json::Value>;
}

/// Asynchronous source of codec factories.
///
/// A fetch may fail, e.g. while runtime metadata is still syncing. Results
/// are never cached by the data-provider layer beyond one read.
#[async_trait]
pub trait CodecFactoryProvider: Send + Sync {
    async fn fetch_codec_factory(&self) -> ChainlensResult<Arc<dyn CodecFactory>>;
}
