//! Storage subscription source.
//!
//! A [`StorageSubscriptionSource`] owns one storage key. It subscribes to the
//! raw change stream for that key, keeps the latest raw item (or the latest
//! stream error) behind a mutex, and fires its trigger whenever that state
//! changes observably. Reads snapshot the raw state and run the decode
//! pipeline against the snapshot.
//!
//! # State transitions
//!
//! | Incoming                     | Stored before        | Stored after | Trigger |
//! |------------------------------|----------------------|--------------|---------|
//! | payload equal to stored one  | same payload/absent  | unchanged    | no      |
//! | any payload or deletion      | anything else        | new payload  | yes     |
//! | stream failure               | anything             | failure      | yes     |

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chainlens_core::{
    fold_changes, ChainStorageItem, ChainlensResult, ChangeTrigger, CodingPath,
    DataProviderChange, DecodedValue, Identifier, RawItem, StorageChangeStream, StreamError,
    StreamEvent, SubscriptionOptions,
};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::operation::{Operation, OperationQueue};
use crate::pipeline::DecodePipeline;

/// Read entry points shared by every provider source.
pub trait DataProviderSource<M>: Send + Sync {
    /// The value for `model_id`, or `None` if this source does not own it.
    fn fetch_operation_by_id(&self, model_id: &Identifier) -> Operation<Option<M>>;

    /// All values on `page`. Single-value sources ignore the page index.
    fn fetch_operation_page(&self, page: usize) -> Operation<Vec<M>>;
}

/// Latest raw item and the revision it was stored at.
#[derive(Debug, Default)]
struct Latest {
    item: RawItem,
    revision: u64,
}

impl Latest {
    fn replace(&mut self, item: RawItem) {
        self.item = item;
        self.revision += 1;
    }
}

/// Raw state plus trigger, shared with the stream listener task.
struct SourceState {
    identifier: Identifier,
    latest: Mutex<Latest>,
    trigger: Arc<dyn ChangeTrigger>,
}

impl SourceState {
    fn latest(&self) -> MutexGuard<'_, Latest> {
        // A panic while holding the lock cannot leave Latest half-written.
        self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> (RawItem, u64) {
        let latest = self.latest();
        (latest.item.clone(), latest.revision)
    }

    fn replace_and_notify_if_needed(&self, item: Option<ChainStorageItem>) -> bool {
        let changed = {
            let mut latest = self.latest();
            // `holds` is false for a stored failure, so errors always clear.
            if latest.item.holds(item.as_ref()) {
                false
            } else {
                latest.replace(RawItem::from_option(item));
                true
            }
        };

        if changed {
            trace!(identifier = %self.identifier, "raw item changed");
            self.trigger.fire();
        }
        changed
    }

    fn replace_and_notify_error(&self, error: StreamError) {
        warn!(identifier = %self.identifier, %error, "storage change stream failed");
        self.latest().replace(RawItem::Failed(error));
        self.trigger.fire();
    }

    fn apply_changes(&self, changes: Vec<DataProviderChange<ChainStorageItem>>) -> bool {
        match fold_changes(changes) {
            Some(item) => self.replace_and_notify_if_needed(item),
            None => false,
        }
    }

    fn apply(&self, event: StreamEvent) {
        match event {
            StreamEvent::Changes(changes) => {
                self.apply_changes(changes);
            }
            StreamEvent::Failure(error) => self.replace_and_notify_error(error),
        }
    }
}

async fn listen(
    identifier: Identifier,
    state: Weak<SourceState>,
    mut events: mpsc::UnboundedReceiver<StreamEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(state) = state.upgrade() else {
            break;
        };
        state.apply(event);
    }
    debug!(%identifier, "storage change listener stopped");
}

/// Live subscription to one storage key with an on-demand decode pipeline.
///
/// Dropping the source stops its stream listener and ends the subscription.
pub struct StorageSubscriptionSource<T> {
    state: Arc<SourceState>,
    pipeline: DecodePipeline<T>,
    listener: Option<JoinHandle<()>>,
}

impl<T> std::fmt::Debug for StorageSubscriptionSource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageSubscriptionSource")
            .field("identifier", &self.state.identifier)
            .field("pipeline", &self.pipeline)
            .field("listening", &self.listener.is_some())
            .finish()
    }
}

impl<T> StorageSubscriptionSource<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// A source that is not attached to any stream.
    ///
    /// Its raw state only changes through the `replace_*` and
    /// `apply_changes` methods.
    pub fn detached(
        identifier: Identifier,
        pipeline: DecodePipeline<T>,
        trigger: Arc<dyn ChangeTrigger>,
    ) -> Self {
        Self {
            state: Arc::new(SourceState {
                identifier,
                latest: Mutex::new(Latest::default()),
                trigger,
            }),
            pipeline,
            listener: None,
        }
    }

    /// Subscribe to `stream` for `identifier`.
    ///
    /// Stream events are consumed on a task spawned on `queue`, never on the
    /// caller's thread.
    pub fn subscribe(
        identifier: Identifier,
        pipeline: DecodePipeline<T>,
        stream: &dyn StorageChangeStream,
        trigger: Arc<dyn ChangeTrigger>,
        options: SubscriptionOptions,
        queue: &OperationQueue,
    ) -> ChainlensResult<Self> {
        let events = stream.subscribe(&identifier, options)?;
        let mut source = Self::detached(identifier.clone(), pipeline, trigger);

        let state = Arc::downgrade(&source.state);
        source.listener = Some(queue.handle().spawn(listen(identifier.clone(), state, events)));

        debug!(
            %identifier,
            path = %source.pipeline.coding_path(),
            "subscribed to storage changes"
        );
        Ok(source)
    }

    pub fn identifier(&self) -> &Identifier {
        &self.state.identifier
    }

    pub fn coding_path(&self) -> &CodingPath {
        self.pipeline.coding_path()
    }

    /// Current raw state.
    pub fn raw_snapshot(&self) -> RawItem {
        self.state.snapshot().0
    }

    /// Number of raw state changes applied so far.
    pub fn revision(&self) -> u64 {
        self.state.latest().revision
    }

    /// Whether the stream listener task is still running.
    pub fn is_listening(&self) -> bool {
        self.listener
            .as_ref()
            .is_some_and(|listener| !listener.is_finished())
    }

    /// Store `item` and fire the trigger, unless it equals the stored payload
    /// and no error is set. Returns whether the trigger fired.
    pub fn replace_and_notify_if_needed(&self, item: Option<ChainStorageItem>) -> bool {
        self.state.replace_and_notify_if_needed(item)
    }

    /// Replace the stored payload with `error` and fire the trigger.
    pub fn replace_and_notify_error(&self, error: StreamError) {
        self.state.replace_and_notify_error(error);
    }

    /// Fold a delivered batch and apply its final value.
    ///
    /// Empty batches are ignored. Returns whether the trigger fired.
    pub fn apply_changes(&self, changes: Vec<DataProviderChange<ChainStorageItem>>) -> bool {
        self.state.apply_changes(changes)
    }

    /// Decode the current raw state.
    ///
    /// The raw state is read now, when the operation is built; later raw
    /// updates do not affect it.
    pub fn prepare_base_operation(&self) -> Operation<Option<DecodedValue<T>>> {
        self.prepare_revision_operation().1
    }

    /// [`prepare_base_operation`](Self::prepare_base_operation) plus the
    /// revision of the raw state it decodes.
    pub fn prepare_revision_operation(&self) -> (u64, Operation<Option<DecodedValue<T>>>) {
        let (item, revision) = self.state.snapshot();
        let operation = match item {
            RawItem::Failed(error) => Operation::ready("read failed source", Err(error.into())),
            RawItem::Absent => Operation::ready("read empty source", Ok(None)),
            RawItem::Present(item) => self
                .pipeline
                .operation(item)
                .map("wrap decoded value", |value| Ok(Some(value))),
        };
        (revision, operation)
    }
}

impl<T> DataProviderSource<DecodedValue<T>> for StorageSubscriptionSource<T>
where
    T: DeserializeOwned + Send + 'static,
{
    fn fetch_operation_by_id(&self, model_id: &Identifier) -> Operation<Option<DecodedValue<T>>> {
        if model_id != self.identifier() {
            trace!(
                identifier = %self.identifier(),
                requested = %model_id,
                "ignoring read for foreign identifier"
            );
            return Operation::ready("read foreign identifier", Ok(None));
        }
        self.prepare_base_operation()
    }

    fn fetch_operation_page(&self, _page: usize) -> Operation<Vec<DecodedValue<T>>> {
        self.prepare_base_operation()
            .map("wrap page", |value| Ok(value.into_iter().collect()))
    }
}

impl<T> Drop for StorageSubscriptionSource<T> {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
            debug!(identifier = %self.state.identifier, "storage subscription dropped");
        }
    }
}
