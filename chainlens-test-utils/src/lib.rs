//! chainlens Test Utilities
//!
//! Centralized test infrastructure for the chainlens workspace:
//! - Mock collaborators (change stream, codec provider, snapshot fetcher, trigger)
//! - Fixtures for common chain values
//! - Proptest generators

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};

// Re-export core types for convenience
pub use chainlens_core::{
    ChainStorageItem, ChainlensError, ChainlensResult, ChangeTrigger, CodecError, CodecFactory,
    CodecFactoryProvider, CodingPath, DataProviderChange, DecodeError, DecodedValue, FetchError,
    Identifier, SnapshotFetcher, StorageChangeStream, StreamError, StreamEvent,
    SubscriptionOptions,
};

// ============================================================================
// MOCK CHANGE STREAM
// ============================================================================

/// In-memory storage-change transport.
///
/// Tests push batches or failures for an identifier; every open
/// subscription for that identifier receives them in order.
#[derive(Debug, Default)]
pub struct MockChangeStream {
    senders: Mutex<HashMap<Identifier, Vec<mpsc::UnboundedSender<StreamEvent>>>>,
    subscriptions: Mutex<Vec<(Identifier, SubscriptionOptions)>>,
    rejection: Mutex<Option<String>>,
}

impl MockChangeStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `subscribe` call fail.
    pub fn reject_subscriptions(&self, reason: impl Into<String>) {
        *self.rejection.lock().expect("mock stream lock poisoned") = Some(reason.into());
    }

    /// Deliver `event` to every open subscription for `identifier`.
    ///
    /// Returns the number of subscriptions that received it.
    pub fn push(&self, identifier: &Identifier, event: StreamEvent) -> usize {
        let mut senders = self.senders.lock().expect("mock stream lock poisoned");
        let Some(list) = senders.get_mut(identifier) else {
            return 0;
        };
        list.retain(|sender| sender.send(event.clone()).is_ok());
        list.len()
    }

    pub fn push_changes(
        &self,
        identifier: &Identifier,
        changes: Vec<DataProviderChange<ChainStorageItem>>,
    ) -> usize {
        self.push(identifier, StreamEvent::Changes(changes))
    }

    pub fn push_failure(&self, identifier: &Identifier, reason: impl Into<String>) -> usize {
        self.push(
            identifier,
            StreamEvent::Failure(StreamError::TransportFailed {
                identifier: identifier.clone(),
                reason: reason.into(),
            }),
        )
    }

    /// Subscriptions for `identifier` whose receiver is still alive.
    pub fn open_subscriptions(&self, identifier: &Identifier) -> usize {
        self.senders
            .lock()
            .expect("mock stream lock poisoned")
            .get(identifier)
            .map(|list| list.iter().filter(|sender| !sender.is_closed()).count())
            .unwrap_or(0)
    }

    /// Every `subscribe` call accepted so far, with its options.
    pub fn recorded_subscriptions(&self) -> Vec<(Identifier, SubscriptionOptions)> {
        self.subscriptions
            .lock()
            .expect("mock stream lock poisoned")
            .clone()
    }
}

impl StorageChangeStream for MockChangeStream {
    fn subscribe(
        &self,
        identifier: &Identifier,
        options: SubscriptionOptions,
    ) -> ChainlensResult<mpsc::UnboundedReceiver<StreamEvent>> {
        if let Some(reason) = self
            .rejection
            .lock()
            .expect("mock stream lock poisoned")
            .clone()
        {
            return Err(StreamError::SubscribeFailed {
                identifier: identifier.clone(),
                reason,
            }
            .into());
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        self.senders
            .lock()
            .expect("mock stream lock poisoned")
            .entry(identifier.clone())
            .or_default()
            .push(sender);
        self.subscriptions
            .lock()
            .expect("mock stream lock poisoned")
            .push((identifier.clone(), options));

        Ok(receiver)
    }
}

// ============================================================================
// MOCK CODEC
// ============================================================================

/// Codec factory that treats payloads as JSON.
#[derive(Debug, Clone)]
pub struct JsonCodecFactory {
    version: u32,
    known_paths: Option<Vec<CodingPath>>,
}

impl JsonCodecFactory {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            known_paths: None,
        }
    }

    /// Restrict the factory to `paths`; other paths fail with
    /// `CodecError::UnknownCodingPath`.
    pub fn with_known_paths(mut self, paths: Vec<CodingPath>) -> Self {
        self.known_paths = Some(paths);
        self
    }
}

impl CodecFactory for JsonCodecFactory {
    fn version(&self) -> u32 {
        self.version
    }

    fn decode(&self, path: &CodingPath, data: &[u8]) -> ChainlensResult<serde_json::Value> {
        if let Some(known) = &self.known_paths {
            if !known.contains(path) {
                return Err(CodecError::UnknownCodingPath {
                    path: path.to_string(),
                    version: self.version,
                }
                .into());
            }
        }

        serde_json::from_slice(data).map_err(|e| {
            DecodeError::ShapeMismatch {
                path: path.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}

/// Codec factory provider with failure injection and a fetch counter.
#[derive(Debug)]
pub struct MockCodecProvider {
    factory: Mutex<Arc<JsonCodecFactory>>,
    failure: Mutex<Option<String>>,
    gate: Option<Arc<Notify>>,
    fetches: AtomicUsize,
}

impl Default for MockCodecProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCodecProvider {
    pub fn new() -> Self {
        Self::with_factory(JsonCodecFactory::new(1))
    }

    pub fn with_factory(factory: JsonCodecFactory) -> Self {
        Self {
            factory: Mutex::new(Arc::new(factory)),
            failure: Mutex::new(None),
            gate: None,
            fetches: AtomicUsize::new(0),
        }
    }

    /// Every fetch waits for a permit on `gate` before completing.
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new()
        }
    }

    /// Make fetches fail until [`MockCodecProvider::recover`] is called.
    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.failure.lock().expect("mock codec lock poisoned") = Some(reason.into());
    }

    pub fn recover(&self) {
        *self.failure.lock().expect("mock codec lock poisoned") = None;
    }

    pub fn set_factory(&self, factory: JsonCodecFactory) {
        *self.factory.lock().expect("mock codec lock poisoned") = Arc::new(factory);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CodecFactoryProvider for MockCodecProvider {
    async fn fetch_codec_factory(&self) -> ChainlensResult<Arc<dyn CodecFactory>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        if let Some(reason) = self.failure.lock().expect("mock codec lock poisoned").clone() {
            return Err(CodecError::FactoryUnavailable { reason }.into());
        }

        let factory: Arc<JsonCodecFactory> =
            Arc::clone(&self.factory.lock().expect("mock codec lock poisoned"));
        Ok(factory as Arc<dyn CodecFactory>)
    }
}

// ============================================================================
// MOCK TRIGGER AND SNAPSHOT FETCHER
// ============================================================================

/// Change trigger that only counts how often it fired.
#[derive(Debug, Default)]
pub struct CountingTrigger {
    fires: AtomicUsize,
}

impl CountingTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.fires.load(Ordering::SeqCst)
    }
}

impl ChangeTrigger for CountingTrigger {
    fn fire(&self) {
        self.fires.fetch_add(1, Ordering::SeqCst);
    }
}

/// Snapshot fetcher backed by a map, with a fetch counter.
#[derive(Debug)]
pub struct MockSnapshotFetcher<T> {
    values: Mutex<HashMap<Identifier, T>>,
    failure: Mutex<Option<String>>,
    fetches: AtomicUsize,
}

impl<T> Default for MockSnapshotFetcher<T> {
    fn default() -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            failure: Mutex::new(None),
            fetches: AtomicUsize::new(0),
        }
    }
}

impl<T> MockSnapshotFetcher<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, identifier: impl Into<Identifier>, value: T) {
        self.values
            .lock()
            .expect("mock fetcher lock poisoned")
            .insert(identifier.into(), value);
    }

    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.failure.lock().expect("mock fetcher lock poisoned") = Some(reason.into());
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T> SnapshotFetcher<T> for MockSnapshotFetcher<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn fetch_snapshot(&self, identifier: &Identifier) -> ChainlensResult<Option<T>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        if let Some(reason) = self.failure.lock().expect("mock fetcher lock poisoned").clone() {
            return Err(FetchError::SourceFailed {
                identifier: identifier.clone(),
                reason,
            }
            .into());
        }

        Ok(self
            .values
            .lock()
            .expect("mock fetcher lock poisoned")
            .get(identifier)
            .cloned())
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

/// Account record used as the decoded type in most tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub nonce: u32,
    pub free: u64,
    pub reserved: u64,
}

impl AccountInfo {
    pub fn new(nonce: u32, free: u64) -> Self {
        Self {
            nonce,
            free,
            reserved: 0,
        }
    }
}

/// Coding path the JSON codec uses for [`AccountInfo`].
pub fn account_path() -> CodingPath {
    CodingPath::new("System", "Account")
}

/// Encode a value the way [`JsonCodecFactory`] expects it.
pub fn encode<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).expect("fixture values always serialize")
}

pub fn storage_item<T: Serialize>(identifier: &str, value: &T) -> ChainStorageItem {
    ChainStorageItem::new(identifier, encode(value))
}

pub fn insert<T: Serialize>(identifier: &str, value: &T) -> DataProviderChange<ChainStorageItem> {
    DataProviderChange::Insert(storage_item(identifier, value))
}

pub fn update<T: Serialize>(identifier: &str, value: &T) -> DataProviderChange<ChainStorageItem> {
    DataProviderChange::Update(storage_item(identifier, value))
}

pub fn delete(identifier: &str) -> DataProviderChange<ChainStorageItem> {
    DataProviderChange::Delete(Identifier::from(identifier))
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    pub fn arb_identifier() -> impl Strategy<Value = Identifier> {
        prop_oneof![
            "[a-z]{1,8}(\\.[a-z]{1,8})?".prop_map(Identifier::from),
            prop::collection::vec(any::<u8>(), 4..16)
                .prop_map(|key| Identifier::from_storage_key(&key)),
        ]
    }

    pub fn arb_account_info() -> impl Strategy<Value = AccountInfo> {
        (any::<u32>(), any::<u64>(), any::<u64>()).prop_map(|(nonce, free, reserved)| {
            AccountInfo {
                nonce,
                free,
                reserved,
            }
        })
    }

    /// Raw changes for one identifier drawn from a small value pool, so
    /// consecutive equal payloads are common.
    pub fn arb_account_change(
        identifier: &'static str,
    ) -> impl Strategy<Value = DataProviderChange<ChainStorageItem>> {
        prop_oneof![
            4 => (0u32..3).prop_map(move |nonce| insert(identifier, &AccountInfo::new(nonce, 100))),
            4 => (0u32..3).prop_map(move |nonce| update(identifier, &AccountInfo::new(nonce, 100))),
            1 => Just(delete(identifier)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_codec_decodes_fixture() {
        let factory = JsonCodecFactory::new(3);
        let bytes = encode(&AccountInfo::new(1, 50));
        let value = factory.decode(&account_path(), &bytes).unwrap();
        assert_eq!(value["nonce"], 1);
        assert_eq!(factory.version(), 3);
    }

    #[test]
    fn test_json_codec_rejects_unknown_path() {
        let factory = JsonCodecFactory::new(3).with_known_paths(vec![account_path()]);
        let err = factory
            .decode(&CodingPath::new("Balances", "Locks"), b"{}")
            .unwrap_err();
        assert!(matches!(err, ChainlensError::Codec(CodecError::UnknownCodingPath { .. })));
    }

    #[test]
    fn test_json_codec_shape_mismatch() {
        let err = JsonCodecFactory::new(1)
            .decode(&account_path(), b"\x00\x01")
            .unwrap_err();
        assert!(matches!(err, ChainlensError::Decode(_)));
    }

    #[test]
    fn test_mock_stream_delivers_to_open_subscriptions() {
        let stream = MockChangeStream::new();
        let id = Identifier::from("X");
        let mut receiver = stream
            .subscribe(&id, SubscriptionOptions::storage_source())
            .unwrap();

        assert_eq!(stream.push_changes(&id, vec![delete("X")]), 1);
        assert_eq!(
            receiver.try_recv().unwrap(),
            StreamEvent::Changes(vec![delete("X")])
        );

        drop(receiver);
        assert_eq!(stream.open_subscriptions(&id), 0);
        assert_eq!(stream.push_failure(&id, "gone"), 0);
    }

    #[test]
    fn test_mock_stream_rejection() {
        let stream = MockChangeStream::new();
        stream.reject_subscriptions("offline");
        let err = stream
            .subscribe(&Identifier::from("X"), SubscriptionOptions::default())
            .unwrap_err();
        assert!(matches!(err, ChainlensError::Stream(StreamError::SubscribeFailed { .. })));
    }

    #[tokio::test]
    async fn test_mock_codec_provider_failure_and_recovery() {
        let provider = MockCodecProvider::new();
        provider.fail_with("metadata syncing");
        assert!(provider.fetch_codec_factory().await.is_err());

        provider.recover();
        assert!(provider.fetch_codec_factory().await.is_ok());
        assert_eq!(provider.fetch_count(), 2);
    }
}
