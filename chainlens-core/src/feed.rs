//! Single-value snapshot sources (price feeds and similar polled values).

use async_trait::async_trait;

use crate::error::ChainlensResult;
use crate::identity::Identifier;

/// Fetches the current value for an identifier on demand.
///
/// Unlike storage sources these are not push-notified; the polling registry
/// decides when a cached snapshot is too old and calls this again.
#[async_trait]
pub trait SnapshotFetcher<T: Send + 'static>: Send + Sync {
    async fn fetch_snapshot(&self, identifier: &Identifier) -> ChainlensResult<Option<T>>;
}
