use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Tag that triggers replay of the deferred request queue.
pub const SYNC_REQUESTS_TAG: &str = "sync-requests";

/// Tag that triggers the periodic app shell refresh.
pub const CONTENT_SYNC_TAG: &str = "content-sync";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Base URL every configured path is resolved against
  pub origin: String,
  #[serde(default = "default_cache_prefix")]
  pub cache_prefix: String,
  /// Bumping this invalidates every previously cached entry
  #[serde(default = "default_version_tag")]
  pub version_tag: String,
  #[serde(default = "default_precache")]
  pub precache: Vec<String>,
  #[serde(default = "default_fallback_path")]
  pub fallback_path: String,
  /// Path revalidated by the periodic refresh
  #[serde(default = "default_refresh_path")]
  pub refresh_path: String,
  #[serde(default = "default_icon")]
  pub icon: String,
  #[serde(default = "default_icon")]
  pub badge: String,
  #[serde(default = "default_periodic_hours")]
  pub periodic_min_interval_hours: u64,
  /// Network timeout in seconds. Unset means requests wait on the transport.
  pub fetch_timeout_secs: Option<u64>,
  /// Database path (defaults to $XDG_DATA_HOME/shellkeeper/worker.db)
  pub database: Option<PathBuf>,
  /// Directory for rolling log files (logs go to stderr if unset)
  pub log_dir: Option<PathBuf>,
  #[serde(default)]
  pub permissions: PermissionsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PermissionsConfig {
  #[serde(default)]
  pub periodic_sync: PermissionSetting,
  #[serde(default)]
  pub push: PermissionSetting,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PermissionSetting {
  Granted,
  Denied,
  /// Not decided yet; a request for it is answered with a grant
  #[default]
  Prompt,
}

fn default_cache_prefix() -> String {
  "qr-app-cache".to_string()
}

fn default_version_tag() -> String {
  "v1".to_string()
}

fn default_precache() -> Vec<String> {
  vec![
    "/".to_string(),
    "/offline.html".to_string(),
    "/favicon.ico".to_string(),
  ]
}

fn default_fallback_path() -> String {
  "/offline.html".to_string()
}

fn default_refresh_path() -> String {
  "/".to_string()
}

fn default_icon() -> String {
  "/icons/icon-192.png".to_string()
}

fn default_periodic_hours() -> u64 {
  24
}

impl Config {
  /// Configuration with every default applied for the given origin.
  pub fn for_origin(origin: &str) -> Self {
    Self {
      origin: origin.to_string(),
      cache_prefix: default_cache_prefix(),
      version_tag: default_version_tag(),
      precache: default_precache(),
      fallback_path: default_fallback_path(),
      refresh_path: default_refresh_path(),
      icon: default_icon(),
      badge: default_icon(),
      periodic_min_interval_hours: default_periodic_hours(),
      fetch_timeout_secs: None,
      database: None,
      log_dir: None,
      permissions: PermissionsConfig::default(),
    }
  }

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shellkeeper.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shellkeeper/config.yaml
  ///
  /// With no file found, an origin override alone is enough to run on defaults.
  pub fn load(explicit_path: Option<&Path>, origin: Option<&str>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match (path, origin) {
      (Some(p), _) => Self::load_from_path(&p)?,
      (None, Some(o)) => Self::for_origin(o),
      (None, None) => {
        return Err(eyre!(
          "No configuration file found. Create one at ~/.config/shellkeeper/config.yaml\n\
                 or pass --origin."
        ))
      }
    };

    Ok(match origin {
      Some(o) => Config {
        origin: o.to_string(),
        ..config
      },
      None => config,
    })
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("shellkeeper.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shellkeeper").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// Resolve every path against the origin into the immutable worker configuration.
  pub fn worker_config(&self) -> Result<WorkerConfig> {
    let origin =
      Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))?;

    let resolve = |path: &str| {
      origin
        .join(path)
        .map_err(|e| eyre!("Invalid path '{}': {}", path, e))
    };

    let mut precache_list = self
      .precache
      .iter()
      .map(|p| resolve(p))
      .collect::<Result<Vec<_>>>()?;

    // The offline page must be part of the install set
    let fallback_url = resolve(&self.fallback_path)?;
    if !precache_list.contains(&fallback_url) {
      precache_list.push(fallback_url.clone());
    }

    Ok(WorkerConfig {
      store_name: format!("{}-{}", self.cache_prefix, self.version_tag),
      version_tag: self.version_tag.clone(),
      refresh_url: resolve(&self.refresh_path)?,
      icon: self.icon.clone(),
      badge: self.badge.clone(),
      periodic_min_interval: Duration::from_secs(self.periodic_min_interval_hours * 60 * 60),
      fetch_timeout: self.fetch_timeout_secs.map(Duration::from_secs),
      origin,
      precache_list,
      fallback_url,
    })
  }

  /// Database location, falling back to the platform data directory.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.database {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("shellkeeper").join("worker.db"))
  }
}

/// Immutable settings shared by every worker component.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
  pub version_tag: String,
  /// Name of the cache store owned by this version
  pub store_name: String,
  pub origin: Url,
  pub precache_list: Vec<Url>,
  pub fallback_url: Url,
  pub refresh_url: Url,
  pub icon: String,
  pub badge: String,
  pub periodic_min_interval: Duration,
  pub fetch_timeout: Option<Duration>,
}
