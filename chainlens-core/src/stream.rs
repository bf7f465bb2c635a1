//! Raw storage-change stream and change-trigger contracts.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{ChainlensResult, StreamError};
use crate::identity::Identifier;
use crate::value::{ChainStorageItem, DataProviderChange};

/// Options passed to the transport when registering an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionOptions {
    /// Deliver a notification on subscribe even if nothing changed.
    pub always_notify_on_refresh: bool,
    /// Hold delivery until any in-flight sync finishes.
    pub wait_until_synced: bool,
    /// Number of historical changes to replay on subscribe.
    pub initial_size: usize,
    /// Deliver a batch even when a refresh produced no changes.
    pub refresh_when_empty: bool,
}

impl SubscriptionOptions {
    /// Options used by storage subscription sources: no forced refresh,
    /// no sync wait, no backlog, no empty refreshes.
    pub const fn storage_source() -> Self {
        Self {
            always_notify_on_refresh: false,
            wait_until_synced: false,
            initial_size: 0,
            refresh_when_empty: false,
        }
    }
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self::storage_source()
    }
}

/// One delivery from a storage-change stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// An ordered batch of changes for the subscribed key.
    Changes(Vec<DataProviderChange<ChainStorageItem>>),
    Failure(StreamError),
}

/// Transport delivering raw storage changes per identifier.
///
/// Events are delivered on the returned channel, off the subscribing
/// thread. Dropping the receiver ends the subscription.
pub trait StorageChangeStream: Send + Sync {
    fn subscribe(
        &self,
        identifier: &Identifier,
        options: SubscriptionOptions,
    ) -> ChainlensResult<mpsc::UnboundedReceiver<StreamEvent>>;
}

/// Change notification fired when a source's raw state changes observably.
pub trait ChangeTrigger: Send + Sync {
    fn fire(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_source_options() {
        let options = SubscriptionOptions::default();
        assert!(!options.always_notify_on_refresh);
        assert!(!options.wait_until_synced);
        assert_eq!(options.initial_size, 0);
        assert!(!options.refresh_when_empty);
    }
}
