//! Keyed cache layer.
//!
//! [`KeyedCacheStore`] is the in-memory repository every data provider
//! writes its decoded values into. It is an unordered cache, not a
//! queryable database: slice queries are rejected.
//!
//! [`Freshness`] and [`CacheRead`] make staleness explicit for polled
//! single-value providers, which are not push-notified.

pub mod freshness;
pub mod store;
pub mod traits;

pub use freshness::{CacheRead, Freshness};
pub use store::KeyedCacheStore;
pub use traits::{CacheRepository, CacheStats, SliceRequest};
