//! The worker: owns the components and runs the install/activate lifecycle.

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

use crate::cache::{CacheStorage, CacheStore};
use crate::config::{WorkerConfig, SYNC_REQUESTS_TAG};
use crate::lifecycle::{Lifetime, WorkerState};
use crate::net::{Fetcher, Request, RequestKey};
use crate::push::{ClickAction, NotificationRecord, NotificationSink, PushDispatcher, WindowRegistry};
use crate::queue::{QueueStorage, ReplayQueue, ReplayReport};
use crate::refresh::{RefreshOutcome, Refresher};
use crate::router::{FetchRouter, RouteOutcome};

/// External collaborators the worker is built from.
pub struct Collaborators<S: CacheStorage> {
  pub storage: Arc<S>,
  pub queue: Arc<dyn QueueStorage>,
  pub fetcher: Arc<dyn Fetcher>,
  pub notifications: Arc<dyn NotificationSink>,
  pub windows: Arc<dyn WindowRegistry>,
}

pub struct Worker<S: CacheStorage> {
  config: Arc<WorkerConfig>,
  state: RwLock<WorkerState>,
  storage: Arc<S>,
  cache: Arc<CacheStore<S>>,
  fetcher: Arc<dyn Fetcher>,
  windows: Arc<dyn WindowRegistry>,
  router: FetchRouter<S>,
  queue: ReplayQueue,
  refresher: Refresher<S>,
  push: PushDispatcher,
}

impl<S: CacheStorage + 'static> Worker<S> {
  pub fn new(config: WorkerConfig, collaborators: Collaborators<S>) -> Self {
    let Collaborators {
      storage,
      queue,
      fetcher,
      notifications,
      windows,
    } = collaborators;

    let cache = Arc::new(CacheStore::new(storage.clone(), config.store_name.clone()));
    let queue = ReplayQueue::new(queue, fetcher.clone());
    let router = FetchRouter::new(
      cache.clone(),
      fetcher.clone(),
      queue.clone(),
      RequestKey::get(&config.fallback_url),
    );
    let refresher = Refresher::new(cache.clone(), fetcher.clone(), config.refresh_url.clone());
    let push = PushDispatcher::new(
      notifications,
      windows.clone(),
      config.origin.clone(),
      config.icon.clone(),
      config.badge.clone(),
    );

    Self {
      config: Arc::new(config),
      state: RwLock::new(WorkerState::Parsed),
      storage,
      cache,
      fetcher,
      windows,
      router,
      queue,
      refresher,
      push,
    }
  }

  pub fn config(&self) -> &WorkerConfig {
    &self.config
  }

  pub fn state(&self) -> WorkerState {
    self
      .state
      .read()
      .map(|s| *s)
      .unwrap_or(WorkerState::Redundant)
  }

  fn set_state(&self, state: WorkerState) -> Result<()> {
    *self
      .state
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))? = state;
    info!(version = %self.config.version_tag, ?state, "worker state changed");
    Ok(())
  }

  pub fn cache(&self) -> &CacheStore<S> {
    &self.cache
  }

  pub fn queue(&self) -> &ReplayQueue {
    &self.queue
  }

  pub fn fetcher(&self) -> &dyn Fetcher {
    self.fetcher.as_ref()
  }

  /// Precache the install set. On failure the worker becomes redundant and the
  /// previously active version, if any, keeps serving.
  pub async fn install(&self) -> Result<usize> {
    self.set_state(WorkerState::Installing)?;

    match self
      .cache
      .precache(self.fetcher.as_ref(), &self.config.precache_list)
      .await
    {
      Ok(count) => {
        self.set_state(WorkerState::Installed)?;
        Ok(count)
      }
      Err(e) => {
        error!(version = %self.config.version_tag, "install failed: {}", e);
        self.set_state(WorkerState::Redundant)?;
        Err(e)
      }
    }
  }

  /// Purge every stale store, record this one as active, then claim open windows.
  pub async fn activate(&self) -> Result<Vec<String>> {
    match self.state() {
      WorkerState::Installed | WorkerState::Activated => {}
      other => return Err(eyre!("Cannot activate a worker in state {:?}", other)),
    }
    self.set_state(WorkerState::Activating)?;

    let purged = match self.cache.purge_stale().and_then(|purged| {
      self.cache.mark_active()?;
      Ok(purged)
    }) {
      Ok(purged) => purged,
      Err(e) => {
        // Stay installed so activation can be retried
        self.set_state(WorkerState::Installed)?;
        return Err(e);
      }
    };

    match self.windows.claim().await {
      Ok(claimed) => info!(claimed, "claimed open windows"),
      Err(e) => warn!("failed to claim windows: {}", e),
    }

    self.set_state(WorkerState::Activated)?;
    Ok(purged)
  }

  /// Install then activate straight away (the new version does not wait).
  pub async fn start(&self) -> Result<Vec<String>> {
    self.install().await?;
    self.activate().await
  }

  /// Pick up a version installed by an earlier process, leaving it ready to
  /// activate. Returns false if the current version was never installed.
  pub fn restore(&self) -> Result<bool> {
    match self.state() {
      WorkerState::Installed | WorkerState::Activated => Ok(true),
      WorkerState::Parsed if self.cache.exists()? => {
        self.set_state(WorkerState::Installed)?;
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  /// Activate a restored install. Returns false if there was nothing to activate.
  pub async fn resume(&self) -> Result<bool> {
    if !self.restore()? {
      return Ok(false);
    }
    if !self.state().is_active() {
      self.activate().await?;
    }
    Ok(true)
  }

  /// Intercept a request.
  ///
  /// Until this version activates, the last activated version keeps serving
  /// from its store. With no such version requests go straight to the network.
  pub async fn handle_fetch(&self, request: &Request, lifetime: &Lifetime) -> RouteOutcome {
    if self.state().is_active() {
      return self.router.route(request, lifetime).await;
    }

    match self.previous_router() {
      Ok(Some(router)) => return router.route(request, lifetime).await,
      Ok(None) => {}
      Err(e) => warn!(url = %request.url, "failed to look up the active store: {}", e),
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => RouteOutcome::Network(response),
      Err(e) => {
        warn!(url = %request.url, "uncontrolled fetch failed: {}", e);
        RouteOutcome::Unavailable
      }
    }
  }

  /// Router over the store recorded by the last completed activation, if it is
  /// still on disk.
  fn previous_router(&self) -> Result<Option<FetchRouter<S>>> {
    let Some(name) = self.storage.active_store()? else {
      return Ok(None);
    };
    if !self.storage.has_store(&name)? {
      return Ok(None);
    }

    debug!(store = %name, state = ?self.state(), "serving from previously activated store");
    let cache = Arc::new(CacheStore::new(self.storage.clone(), name));
    Ok(Some(FetchRouter::new(
      cache,
      self.fetcher.clone(),
      self.queue.clone(),
      RequestKey::get(&self.config.fallback_url),
    )))
  }

  /// One-off sync trigger. Unrecognized tags are ignored.
  pub async fn handle_sync(&self, tag: &str) -> Result<Option<ReplayReport>> {
    if tag != SYNC_REQUESTS_TAG {
      info!(tag, "ignoring unrecognized sync tag");
      return Ok(None);
    }
    self.queue.replay(tag).await.map(Some)
  }

  pub async fn handle_periodic(&self, tag: &str) -> RefreshOutcome {
    self.refresher.on_periodic(tag).await
  }

  pub async fn handle_push(&self, payload: Option<&[u8]>) -> Result<NotificationRecord> {
    self.push.on_push(payload).await
  }

  pub async fn handle_click(&self, record: NotificationRecord) -> Result<ClickAction> {
    self.push.on_click(record).await
  }
}


#[cfg(test)]
mod tests {
  use super::testing::*;
  use super::*;
  use crate::config::Config;
  use url::Url;

  fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
  }

  #[tokio::test]
  async fn test_install_and_activate_default_shell() {
    let t = worker();

    assert_eq!(t.worker.install().await.unwrap(), 3);
    assert_eq!(t.worker.state(), WorkerState::Installed);
    assert_eq!(t.worker.cache().len().unwrap(), 3);

    let purged = t.worker.activate().await.unwrap();
    assert!(purged.is_empty());
    assert_eq!(t.worker.state(), WorkerState::Activated);
    assert_eq!(t.storage.store_names().unwrap(), vec!["qr-app-cache-v1"]);
  }

  #[tokio::test]
  async fn test_failed_install_is_redundant_and_cannot_activate() {
    let t = worker_with(Config {
      precache: vec!["/".into(), "/offline.html".into(), "/missing.png".into()],
      ..Config::for_origin(ORIGIN)
    });

    assert!(t.worker.install().await.is_err());
    assert_eq!(t.worker.state(), WorkerState::Redundant);
    assert!(t.storage.store_names().unwrap().is_empty());
    assert!(t.worker.activate().await.is_err());
  }

  #[tokio::test]
  async fn test_new_version_purges_previous_and_keeps_marker() {
    let t = worker();
    let marker = RequestKey::get(&url("/marker"));
    let snapshot = crate::net::ResponseSnapshot::new(200, vec![], b"marker".to_vec());
    t.storage.put("qr-app-cache-v0", &marker, &snapshot).unwrap();
    t.storage.put("qr-app-cache-v1", &marker, &snapshot).unwrap();

    t.worker.start().await.unwrap();

    assert_eq!(t.storage.store_names().unwrap(), vec!["qr-app-cache-v1"]);
    assert_eq!(t.worker.cache().get(&marker).unwrap().unwrap().body, b"marker");
  }

  #[tokio::test]
  async fn test_activate_claims_open_windows() {
    let t = worker();
    t.windows.open("https://qr.example.com/").await.unwrap();

    t.worker.start().await.unwrap();
    assert_eq!(t.windows.claimed(), 1);
  }

  #[tokio::test]
  async fn test_resume_activates_existing_install() {
    let t = worker();
    assert!(!t.worker.resume().await.unwrap());

    t.worker.install().await.unwrap();
    // Same database, new process
    let resumed = t.sibling(Config::for_origin(ORIGIN));
    assert!(resumed.resume().await.unwrap());
    assert!(resumed.state().is_active());
  }

  #[tokio::test]
  async fn test_failed_upgrade_keeps_previous_version_serving() {
    let t = worker();
    t.worker.start().await.unwrap();
    assert_eq!(t.storage.active_store().unwrap().as_deref(), Some("qr-app-cache-v1"));

    let v2_config = Config {
      version_tag: "v2".into(),
      precache: vec!["/".into(), "/offline.html".into(), "/gone.png".into()],
      ..Config::for_origin(ORIGIN)
    };
    let v2 = t.sibling(v2_config.clone());
    assert!(v2.start().await.is_err());
    assert_eq!(v2.state(), WorkerState::Redundant);
    assert_eq!(t.storage.store_names().unwrap(), vec!["qr-app-cache-v1"]);

    t.fetcher.set_offline(true);
    let outcome = v2
      .handle_fetch(&Request::navigate(url("/news")), &Lifetime::new())
      .await;
    assert_eq!(outcome.source(), "fallback");
    assert_eq!(outcome.response().unwrap().body, b"<html>offline</html>");

    // A later process that never installed v2 still serves v1
    let later = t.sibling(v2_config);
    assert!(!later.resume().await.unwrap());
    let root = later
      .handle_fetch(&Request::get(url("/")), &Lifetime::new())
      .await;
    assert_eq!(root.source(), "cache");
  }

  #[tokio::test]
  async fn test_successful_upgrade_becomes_active_store() {
    let t = worker();
    t.worker.start().await.unwrap();

    let v2 = t.sibling(Config {
      version_tag: "v2".into(),
      ..Config::for_origin(ORIGIN)
    });
    assert_eq!(v2.start().await.unwrap(), vec!["qr-app-cache-v1"]);
    assert_eq!(t.storage.active_store().unwrap().as_deref(), Some("qr-app-cache-v2"));
    assert_eq!(t.storage.store_names().unwrap(), vec!["qr-app-cache-v2"]);
  }

  #[tokio::test]
  async fn test_uncontrolled_fetch_passes_through() {
    let t = worker();
    t.fetcher.set_offline(true);

    let outcome = t
      .worker
      .handle_fetch(&Request::navigate(url("/")), &Lifetime::new())
      .await;
    assert_eq!(outcome, RouteOutcome::Unavailable);
  }

  #[tokio::test]
  async fn test_shell_scenario() {
    let t = worker();
    t.worker.start().await.unwrap();
    t.fetcher.set_offline(true);

    // Root is cached, so a sub-resource fetch of it is answered from cache
    let root = t
      .worker
      .handle_fetch(&Request::get(url("/")), &Lifetime::new())
      .await;
    assert_eq!(root.source(), "cache");
    assert_eq!(root.response().unwrap().body, b"<html>shell</html>");

    let missing = t
      .worker
      .handle_fetch(
        &Request::get(url("/missing.js")).with_header("accept", "*/*"),
        &Lifetime::new(),
      )
      .await;
    assert_eq!(missing, RouteOutcome::Unavailable);
  }

  #[tokio::test]
  async fn test_sync_tags() {
    let t = worker();
    assert!(t.worker.handle_sync("unknown").await.unwrap().is_none());

    let report = t.worker.handle_sync("sync-requests").await.unwrap().unwrap();
    assert!(report.is_complete());
  }
}
