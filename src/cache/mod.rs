//! Cached views and the store that owns them.
//!
//! This module provides the storage half of the engine:
//! - Named views (denormalized query results) behind copy-on-write `Arc`s
//! - Per-view freshness state and monotonic sequence counters
//! - Lazy creation on subscription and idle eviction after a retention window

mod store;
mod traits;
mod view;

pub use store::CacheStore;
pub use traits::Record;
pub use view::{Freshness, Invalidation, ViewKey, ViewSlot};
