//! Storage contract for named cache stores.

use color_eyre::Result;

use crate::net::{RequestKey, ResponseSnapshot};

/// Backend for versioned cache stores.
///
/// Every write is atomic per entry; `put_all` is atomic across the whole batch.
pub trait CacheStorage: Send + Sync {
  /// Names of every store that currently exists.
  fn store_names(&self) -> Result<Vec<String>>;

  /// Whether a store with this name exists.
  fn has_store(&self, store: &str) -> Result<bool>;

  /// Delete a store and all its entries. Returns false if it did not exist.
  fn delete_store(&self, store: &str) -> Result<bool>;

  /// Store recorded by the last completed activation, if any.
  fn active_store(&self) -> Result<Option<String>>;

  fn set_active_store(&self, store: &str) -> Result<()>;

  /// Look up a single entry.
  fn get(&self, store: &str, key: &RequestKey) -> Result<Option<ResponseSnapshot>>;

  /// Insert or overwrite a single entry, creating the store if needed.
  fn put(&self, store: &str, key: &RequestKey, response: &ResponseSnapshot) -> Result<()>;

  /// Write a batch of entries in one transaction, creating the store if needed.
  /// Either every entry lands or none do.
  fn put_all(&self, store: &str, entries: &[(RequestKey, ResponseSnapshot)]) -> Result<()>;

  /// Number of entries in a store.
  fn entry_count(&self, store: &str) -> Result<usize>;
}
