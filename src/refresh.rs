//! Periodic refresh of the app shell and the registry of periodic tasks.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{CacheStorage, CacheStore};
use crate::config::CONTENT_SYNC_TAG;
use crate::db::{schema::parse_datetime, Database};
use crate::net::{Fetcher, Request};
use crate::platform::{Capability, PermissionState, Platform};

/// What a periodic trigger did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
  /// Tag is not the content refresh tag
  Ignored,
  Refreshed,
  /// Logged and swallowed; the next trigger retries
  Failed,
}

/// Revalidates the app shell entry on each `content-sync` trigger.
pub struct Refresher<S: CacheStorage> {
  cache: Arc<CacheStore<S>>,
  fetcher: Arc<dyn Fetcher>,
  target: Url,
}

impl<S: CacheStorage> Refresher<S> {
  pub fn new(cache: Arc<CacheStore<S>>, fetcher: Arc<dyn Fetcher>, target: Url) -> Self {
    Self {
      cache,
      fetcher,
      target,
    }
  }

  /// Handle a periodic trigger. Never fails; re-running just overwrites the entry.
  pub async fn on_periodic(&self, tag: &str) -> RefreshOutcome {
    if tag != CONTENT_SYNC_TAG {
      debug!(tag, "ignoring unrecognized periodic tag");
      return RefreshOutcome::Ignored;
    }

    match self.refresh().await {
      Ok(()) => {
        info!(tag, url = %self.target, "content refresh completed");
        RefreshOutcome::Refreshed
      }
      Err(e) => {
        error!(tag, url = %self.target, "content refresh failed: {}", e);
        RefreshOutcome::Failed
      }
    }
  }

  async fn refresh(&self) -> Result<()> {
    let request = Request::get(self.target.clone());
    let response = self.fetcher.fetch(&request).await?;
    if !response.is_success() {
      return Err(eyre!("HTTP {}", response.status));
    }
    self.cache.put(&request.key(), &response)
  }
}

/// A periodic registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodicTask {
  pub tag: String,
  pub min_interval: Duration,
  pub registered_at: DateTime<Utc>,
  pub last_run: Option<DateTime<Utc>>,
}

impl PeriodicTask {
  pub fn is_due(&self, now: DateTime<Utc>) -> bool {
    match self.last_run {
      None => true,
      Some(last) => (now - last).to_std().map_or(false, |elapsed| elapsed >= self.min_interval),
    }
  }
}

/// Persisted periodic registrations.
///
/// A task only exists while its permission is granted: `due_tasks` drops any
/// registration whose permission has been lost.
#[derive(Clone)]
pub struct PeriodicRegistry {
  db: Arc<Database>,
}

type TaskRow = (String, i64, String, Option<String>);

impl PeriodicRegistry {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }

  /// Register or update a task. Keeps the last run time of an existing one.
  pub fn register(&self, tag: &str, min_interval: Duration) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "INSERT INTO periodic_tasks (tag, min_interval_secs, registered_at) VALUES (?, ?, ?)
         ON CONFLICT(tag) DO UPDATE SET min_interval_secs = excluded.min_interval_secs",
        params![tag, min_interval.as_secs() as i64, Utc::now().to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to register periodic task {}: {}", tag, e))?;
    info!(tag, interval_secs = min_interval.as_secs(), "periodic task registered");
    Ok(())
  }

  pub fn unregister(&self, tag: &str) -> Result<bool> {
    let removed = self
      .db
      .conn()?
      .execute("DELETE FROM periodic_tasks WHERE tag = ?", params![tag])
      .map_err(|e| eyre!("Failed to unregister periodic task {}: {}", tag, e))?;
    Ok(removed > 0)
  }

  pub fn tasks(&self) -> Result<Vec<PeriodicTask>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT tag, min_interval_secs, registered_at, last_run FROM periodic_tasks ORDER BY tag")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<TaskRow> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))
      .map_err(|e| eyre!("Failed to list periodic tasks: {}", e))?
      .collect::<Result<Vec<TaskRow>, _>>()
      .map_err(|e| eyre!("Failed to read periodic task: {}", e))?;

    rows
      .into_iter()
      .map(|(tag, secs, registered_at, last_run)| -> Result<PeriodicTask> {
        Ok(PeriodicTask {
          tag,
          min_interval: Duration::from_secs(secs.max(0) as u64),
          registered_at: parse_datetime(&registered_at)?,
          last_run: last_run.as_deref().map(parse_datetime).transpose()?,
        })
      })
      .collect()
  }

  pub fn mark_run(&self, tag: &str, at: DateTime<Utc>) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "UPDATE periodic_tasks SET last_run = ? WHERE tag = ?",
        params![at.to_rfc3339(), tag],
      )
      .map_err(|e| eyre!("Failed to record periodic run of {}: {}", tag, e))?;
    Ok(())
  }

  /// Tasks whose interval has elapsed. Losing the permission deregisters every task.
  pub async fn due_tasks(
    &self,
    platform: &dyn Platform,
    now: DateTime<Utc>,
  ) -> Result<Vec<PeriodicTask>> {
    let tasks = self.tasks()?;
    if tasks.is_empty() {
      return Ok(tasks);
    }

    if platform.permission(Capability::PeriodicSync).await != PermissionState::Granted {
      for task in &tasks {
        self.unregister(&task.tag)?;
        warn!(tag = %task.tag, "periodic sync permission lost, task deregistered");
      }
      return Ok(Vec::new());
    }

    Ok(tasks.into_iter().filter(|t| t.is_due(now)).collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::config::{PermissionSetting, PermissionsConfig};
  use crate::net::testing::ScriptedFetcher;
  use crate::net::RequestKey;
  use crate::platform::LocalPlatform;

  const SHELL: &str = "https://qr.example.com/";

  fn refresher() -> (Refresher<SqliteStorage>, Arc<CacheStore<SqliteStorage>>, Arc<ScriptedFetcher>) {
    let storage = Arc::new(SqliteStorage::new(Arc::new(Database::open_in_memory().unwrap())));
    let cache = Arc::new(CacheStore::new(storage, "qr-app-cache-v1"));
    let fetcher = Arc::new(ScriptedFetcher::new());
    let refresher = Refresher::new(cache.clone(), fetcher.clone(), Url::parse(SHELL).unwrap());
    (refresher, cache, fetcher)
  }

  fn shell_key() -> RequestKey {
    RequestKey::get(&Url::parse(SHELL).unwrap())
  }

  #[tokio::test]
  async fn test_refresh_overwrites_shell() {
    let (refresher, cache, fetcher) = refresher();

    fetcher.serve(SHELL, "first");
    assert_eq!(refresher.on_periodic("content-sync").await, RefreshOutcome::Refreshed);
    fetcher.serve(SHELL, "second");
    assert_eq!(refresher.on_periodic("content-sync").await, RefreshOutcome::Refreshed);

    assert_eq!(cache.get(&shell_key()).unwrap().unwrap().body, b"second");
    assert_eq!(cache.len().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_refresh_failure_is_swallowed() {
    let (refresher, cache, fetcher) = refresher();
    fetcher.serve(SHELL, "cached");
    refresher.on_periodic("content-sync").await;

    fetcher.set_offline(true);
    assert_eq!(refresher.on_periodic("content-sync").await, RefreshOutcome::Failed);
    assert_eq!(cache.get(&shell_key()).unwrap().unwrap().body, b"cached");
  }

  #[tokio::test]
  async fn test_unknown_tag_ignored() {
    let (refresher, _, fetcher) = refresher();
    assert_eq!(refresher.on_periodic("news-sync").await, RefreshOutcome::Ignored);
    assert!(fetcher.calls().is_empty());
  }

  #[tokio::test]
  async fn test_due_tasks_respect_interval() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let registry = PeriodicRegistry::new(db.clone());
    let platform = LocalPlatform::new(
      db,
      &PermissionsConfig {
        periodic_sync: PermissionSetting::Granted,
        push: PermissionSetting::Prompt,
      },
      SHELL,
    );
    let day = Duration::from_secs(86_400);
    registry.register("content-sync", day).unwrap();

    let now = Utc::now();
    assert_eq!(registry.due_tasks(&platform, now).await.unwrap().len(), 1);

    registry.mark_run("content-sync", now).unwrap();
    assert!(registry.due_tasks(&platform, now).await.unwrap().is_empty());

    let later = now + chrono::Duration::hours(25);
    assert_eq!(registry.due_tasks(&platform, later).await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_permission_loss_deregisters() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let registry = PeriodicRegistry::new(db.clone());
    let platform = LocalPlatform::new(
      db,
      &PermissionsConfig {
        periodic_sync: PermissionSetting::Granted,
        push: PermissionSetting::Prompt,
      },
      SHELL,
    );
    registry.register("content-sync", Duration::from_secs(60)).unwrap();

    platform
      .set_permission(Capability::PeriodicSync, PermissionState::Denied)
      .unwrap();

    assert!(registry.due_tasks(&platform, Utc::now()).await.unwrap().is_empty());
    assert!(registry.tasks().unwrap().is_empty());
  }
}
