//! Permission and subscription collaborator.

use async_trait::async_trait;
use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

use crate::config::{PermissionSetting, PermissionsConfig};
use crate::db::Database;
use crate::refresh::PeriodicRegistry;

/// Capabilities gated behind a host permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
  PeriodicSync,
  Push,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
  Granted,
  Denied,
  Prompt,
}

impl From<PermissionSetting> for PermissionState {
  fn from(setting: PermissionSetting) -> Self {
    match setting {
      PermissionSetting::Granted => PermissionState::Granted,
      PermissionSetting::Denied => PermissionState::Denied,
      PermissionSetting::Prompt => PermissionState::Prompt,
    }
  }
}

/// Push endpoint handed back by a successful subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushSubscription {
  pub endpoint: String,
}

#[async_trait]
pub trait Platform: Send + Sync {
  /// Current permission without prompting.
  async fn permission(&self, capability: Capability) -> PermissionState;

  /// Ask for a permission; a prompt may be resolved either way.
  async fn request_permission(&self, capability: Capability) -> Result<PermissionState>;

  /// Register a one-off sync fired when connectivity returns.
  async fn register_sync(&self, tag: &str) -> Result<()>;

  async fn register_periodic_sync(&self, tag: &str, min_interval: Duration) -> Result<()>;

  async fn subscribe_push(&self) -> Result<PushSubscription>;
}

/// Platform for a locally hosted worker: permissions come from configuration
/// and registrations are persisted in the worker database.
pub struct LocalPlatform {
  db: Arc<Database>,
  periodic: PeriodicRegistry,
  origin: String,
  periodic_sync: Mutex<PermissionState>,
  push: Mutex<PermissionState>,
}

impl LocalPlatform {
  pub fn new(db: Arc<Database>, permissions: &PermissionsConfig, origin: &str) -> Self {
    Self {
      periodic: PeriodicRegistry::new(db.clone()),
      db,
      origin: origin.trim_end_matches('/').to_string(),
      periodic_sync: Mutex::new(permissions.periodic_sync.into()),
      push: Mutex::new(permissions.push.into()),
    }
  }

  fn slot(&self, capability: Capability) -> &Mutex<PermissionState> {
    match capability {
      Capability::PeriodicSync => &self.periodic_sync,
      Capability::Push => &self.push,
    }
  }

  /// Change a permission, e.g. when the user revokes it.
  #[allow(dead_code)]
  pub fn set_permission(&self, capability: Capability, state: PermissionState) -> Result<()> {
    *self
      .slot(capability)
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))? = state;
    Ok(())
  }

  /// Tags registered for one-off sync.
  pub fn sync_tags(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT tag FROM sync_registrations ORDER BY registered_at")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;
    let tags = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list sync registrations: {}", e))?
      .collect::<Result<Vec<String>, _>>()
      .map_err(|e| eyre!("Failed to read sync registration: {}", e))?;
    Ok(tags)
  }
}

#[async_trait]
impl Platform for LocalPlatform {
  async fn permission(&self, capability: Capability) -> PermissionState {
    self
      .slot(capability)
      .lock()
      .map(|state| *state)
      .unwrap_or(PermissionState::Denied)
  }

  async fn request_permission(&self, capability: Capability) -> Result<PermissionState> {
    let mut state = self
      .slot(capability)
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    if *state == PermissionState::Prompt {
      *state = PermissionState::Granted;
    }
    Ok(*state)
  }

  async fn register_sync(&self, tag: &str) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "INSERT OR IGNORE INTO sync_registrations (tag, registered_at) VALUES (?, ?)",
        params![tag, Utc::now().to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to register sync {}: {}", tag, e))?;
    info!(tag, "sync registered");
    Ok(())
  }

  async fn register_periodic_sync(&self, tag: &str, min_interval: Duration) -> Result<()> {
    if self.permission(Capability::PeriodicSync).await != PermissionState::Granted {
      return Err(eyre!("Periodic sync permission not granted"));
    }
    self.periodic.register(tag, min_interval)
  }

  async fn subscribe_push(&self) -> Result<PushSubscription> {
    if self.permission(Capability::Push).await != PermissionState::Granted {
      return Err(eyre!("Push permission not granted"));
    }

    let mut hasher = Sha256::new();
    hasher.update(self.origin.as_bytes());
    hasher.update(Utc::now().to_rfc3339().as_bytes());
    let endpoint = format!("{}/push/{}", self.origin, hex::encode(hasher.finalize()));

    info!(endpoint = %endpoint, "push subscription created");
    Ok(PushSubscription { endpoint })
  }
}
