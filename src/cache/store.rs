//! Versioned cache store: precache, stale purge, lookup and write-back.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use super::traits::CacheStorage;
use crate::net::{Fetcher, Request, RequestKey, ResponseSnapshot};

/// The store owned by one version of the worker.
///
/// Only the store whose name matches the current version is ever read or written
/// through this type; every other store is stale and removed by `purge_stale`.
pub struct CacheStore<S: CacheStorage> {
  storage: Arc<S>,
  name: String,
}

impl<S: CacheStorage> CacheStore<S> {
  pub fn new(storage: Arc<S>, name: impl Into<String>) -> Self {
    Self {
      storage,
      name: name.into(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Whether this version's store has been created (i.e. install succeeded).
  pub fn exists(&self) -> Result<bool> {
    self.storage.has_store(&self.name)
  }

  /// Fetch every URL and store them together.
  ///
  /// Any transport failure or non-2xx response aborts the whole precache and
  /// nothing is written, so the store never exists with a partial shell.
  pub async fn precache<F: Fetcher + ?Sized>(&self, fetcher: &F, urls: &[Url]) -> Result<usize> {
    let fetches = urls.iter().map(|url| async move {
      let request = Request::get(url.clone());
      let response = fetcher
        .fetch(&request)
        .await
        .map_err(|e| eyre!("Precache of {} failed: {}", url, e))?;
      if !response.is_success() {
        return Err(eyre!(
          "Precache of {} failed: HTTP {}",
          url,
          response.status
        ));
      }
      Ok::<_, color_eyre::Report>((request.key(), response))
    });

    let entries = try_join_all(fetches).await?;
    self.storage.put_all(&self.name, &entries)?;

    info!(store = %self.name, entries = entries.len(), "precache complete");
    Ok(entries.len())
  }

  /// Delete every store other than this one. Returns the names removed.
  pub fn purge_stale(&self) -> Result<Vec<String>> {
    let mut purged = Vec::new();
    for store in self.storage.store_names()? {
      if store != self.name && self.storage.delete_store(&store)? {
        info!(store = %store, "purged stale cache store");
        purged.push(store);
      }
    }
    Ok(purged)
  }

  /// Record this store as the one serving requests until a newer version activates.
  pub fn mark_active(&self) -> Result<()> {
    self.storage.set_active_store(&self.name)?;
    info!(store = %self.name, "cache store active");
    Ok(())
  }

  /// A miss is `Ok(None)`, never an error.
  pub fn get(&self, key: &RequestKey) -> Result<Option<ResponseSnapshot>> {
    let hit = self.storage.get(&self.name, key)?;
    debug!(key = %key.digest(), hit = hit.is_some(), "cache lookup");
    Ok(hit)
  }

  pub fn put(&self, key: &RequestKey, response: &ResponseSnapshot) -> Result<()> {
    self.storage.put(&self.name, key, response)?;
    debug!(key = %key.digest(), status = response.status, "cache write");
    Ok(())
  }

  pub fn len(&self) -> Result<usize> {
    self.storage.entry_count(&self.name)
  }
}
