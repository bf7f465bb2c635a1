//! Decode pipeline: raw bytes to typed values.
//!
//! A decode is a three-node operation graph:
//!
//! ```text
//! fetch codec factory ──▶ decode bytes at coding path ──▶ map into DecodedValue<T>
//! ```
//!
//! Each node only runs once the previous one succeeded. A codec fetch failure
//! reaches the caller unchanged and no decode is attempted.

use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use chainlens_core::{
    ChainStorageItem, CodecFactory, CodecFactoryProvider, CodingPath, DecodeError, DecodedValue,
};
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::operation::Operation;

/// Decodes raw storage items for one coding path into `T`.
pub struct DecodePipeline<T> {
    coding_path: CodingPath,
    codec_provider: Arc<dyn CodecFactoryProvider>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for DecodePipeline<T> {
    fn clone(&self) -> Self {
        Self {
            coding_path: self.coding_path.clone(),
            codec_provider: Arc::clone(&self.codec_provider),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for DecodePipeline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodePipeline")
            .field("coding_path", &self.coding_path)
            .field("target", &type_name::<T>())
            .finish_non_exhaustive()
    }
}

impl<T> DecodePipeline<T>
where
    T: DeserializeOwned + Send + 'static,
{
    pub fn new(coding_path: CodingPath, codec_provider: Arc<dyn CodecFactoryProvider>) -> Self {
        Self {
            coding_path,
            codec_provider,
            _marker: PhantomData,
        }
    }

    pub fn coding_path(&self) -> &CodingPath {
        &self.coding_path
    }

    /// Fetch a codec factory. Valid for this one read only.
    pub fn codec_fetch_operation(&self) -> Operation<Arc<dyn CodecFactory>> {
        let provider = Arc::clone(&self.codec_provider);
        Operation::new("fetch codec factory", async move {
            provider.fetch_codec_factory().await
        })
    }

    /// Build the full decode graph for `item`.
    ///
    /// The item is moved into the graph, so the value decoded is exactly
    /// the snapshot passed in, whatever happens to the source afterwards.
    pub fn operation(&self, item: ChainStorageItem) -> Operation<DecodedValue<T>> {
        let ChainStorageItem { identifier, data } = item;
        let path = self.coding_path.clone();
        let decode_identifier = identifier.clone();

        self.codec_fetch_operation()
            .and_then("decode storage item", move |factory| async move {
                trace!(
                    identifier = %decode_identifier,
                    path = %path,
                    codec_version = factory.version(),
                    bytes = data.len(),
                    "decoding storage item"
                );
                factory.decode(&path, &data)
            })
            .map("map decoded value", move |json| {
                serde_json::from_value::<T>(json)
                    .map(|item| DecodedValue::new(identifier.clone(), item))
                    .map_err(|e| {
                        DecodeError::TypeMismatch {
                            identifier,
                            type_name: type_name::<T>(),
                            reason: e.to_string(),
                        }
                        .into()
                    })
            })
    }
}
