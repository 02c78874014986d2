//! Versioned response cache.
//!
//! This module provides:
//! - A storage contract for named stores of request key -> response snapshot
//! - A SQLite backend where batch writes are transactional
//! - `CacheStore`, the view of the one store owned by the running version

mod storage;
mod store;
mod traits;

pub use storage::SqliteStorage;
pub use store::CacheStore;
pub use traits::CacheStorage;
