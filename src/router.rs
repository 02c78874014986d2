//! Per-request routing between network, cache and the offline fallback.

use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::cache::{CacheStorage, CacheStore};
use crate::config::SYNC_REQUESTS_TAG;
use crate::lifecycle::Lifetime;
use crate::net::{Fetcher, Request, RequestKey, ResponseSnapshot};
use crate::queue::ReplayQueue;

/// Where the answer to an intercepted request came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
  /// Live network response
  Network(ResponseSnapshot),
  /// Served from the current cache store without touching the network
  Cache(ResponseSnapshot),
  /// The precached offline document
  Fallback(ResponseSnapshot),
  /// Network failed and nothing suitable is cached
  Unavailable,
  /// Network failed; the request was queued for replay
  Deferred,
}

impl RouteOutcome {
  pub fn response(&self) -> Option<&ResponseSnapshot> {
    match self {
      RouteOutcome::Network(r) | RouteOutcome::Cache(r) | RouteOutcome::Fallback(r) => Some(r),
      RouteOutcome::Unavailable | RouteOutcome::Deferred => None,
    }
  }

  pub fn source(&self) -> &'static str {
    match self {
      RouteOutcome::Network(_) => "network",
      RouteOutcome::Cache(_) => "cache",
      RouteOutcome::Fallback(_) => "fallback",
      RouteOutcome::Unavailable => "unavailable",
      RouteOutcome::Deferred => "deferred",
    }
  }
}

/// Applies network-first to navigations and cache-first to everything else.
pub struct FetchRouter<S: CacheStorage> {
  cache: Arc<CacheStore<S>>,
  fetcher: Arc<dyn Fetcher>,
  queue: ReplayQueue,
  fallback_key: RequestKey,
}

impl<S: CacheStorage + 'static> FetchRouter<S> {
  pub fn new(
    cache: Arc<CacheStore<S>>,
    fetcher: Arc<dyn Fetcher>,
    queue: ReplayQueue,
    fallback_key: RequestKey,
  ) -> Self {
    Self {
      cache,
      fetcher,
      queue,
      fallback_key,
    }
  }

  /// Answer an intercepted request. Never fails; every failure maps to an outcome.
  pub async fn route(&self, request: &Request, lifetime: &Lifetime) -> RouteOutcome {
    if request.is_navigation() {
      self.network_first(request, lifetime).await
    } else {
      self.cache_first(request).await
    }
  }

  async fn network_first(&self, request: &Request, lifetime: &Lifetime) -> RouteOutcome {
    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if request.is_idempotent() {
          // Write-back runs beside the response, not before it
          let cache = self.cache.clone();
          let key = request.key();
          let copy = response.clone();
          lifetime.wait_until("navigation write-back", async move { cache.put(&key, &copy) });
        }
        RouteOutcome::Network(response)
      }
      Err(e) => {
        warn!(url = %request.url, "navigation failed, serving offline page: {}", e);
        self.defer_if_unsafe(request);
        self.fallback()
      }
    }
  }

  async fn cache_first(&self, request: &Request) -> RouteOutcome {
    if request.is_idempotent() {
      match self.cache.get(&request.key()) {
        Ok(Some(hit)) => return RouteOutcome::Cache(hit),
        Ok(None) => {}
        Err(e) => warn!(url = %request.url, "cache lookup failed, going to network: {}", e),
      }
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => RouteOutcome::Network(response),
      Err(e) => {
        debug!(url = %request.url, "subresource fetch failed: {}", e);
        if self.defer_if_unsafe(request) {
          RouteOutcome::Deferred
        } else if request.accepts_html() {
          self.fallback()
        } else {
          RouteOutcome::Unavailable
        }
      }
    }
  }

  /// Queue non-idempotent requests for replay. Returns true if queued.
  fn defer_if_unsafe(&self, request: &Request) -> bool {
    if request.is_idempotent() {
      return false;
    }
    match self.queue.enqueue(SYNC_REQUESTS_TAG, request) {
      Ok(()) => true,
      Err(e) => {
        error!(url = %request.url, "failed to defer request: {}", e);
        false
      }
    }
  }

  fn fallback(&self) -> RouteOutcome {
    match self.cache.get(&self.fallback_key) {
      Ok(Some(doc)) => RouteOutcome::Fallback(doc),
      Ok(None) => {
        error!(key = %self.fallback_key, "offline page missing from cache");
        RouteOutcome::Unavailable
      }
      Err(e) => {
        error!(key = %self.fallback_key, "offline page lookup failed: {}", e);
        RouteOutcome::Unavailable
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::db::Database;
  use crate::net::testing::ScriptedFetcher;
  use crate::queue::SqliteQueue;
  use url::Url;

  const ORIGIN: &str = "https://qr.example.com";

  struct Harness {
    router: FetchRouter<SqliteStorage>,
    cache: Arc<CacheStore<SqliteStorage>>,
    fetcher: Arc<ScriptedFetcher>,
    queue: ReplayQueue,
  }

  fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
  }

  async fn harness() -> Harness {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let cache = Arc::new(CacheStore::new(
      Arc::new(SqliteStorage::new(db.clone())),
      "qr-app-cache-v1",
    ));
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.serve(url("/").as_str(), "<html>shell</html>");
    fetcher.serve(url("/offline.html").as_str(), "<html>offline</html>");
    cache
      .precache(fetcher.as_ref(), &[url("/"), url("/offline.html")])
      .await
      .unwrap();

    let queue = ReplayQueue::new(Arc::new(SqliteQueue::new(db)), fetcher.clone());
    let router = FetchRouter::new(
      cache.clone(),
      fetcher.clone(),
      queue.clone(),
      RequestKey::get(&url("/offline.html")),
    );
    Harness {
      router,
      cache,
      fetcher,
      queue,
    }
  }

  #[tokio::test]
  async fn test_navigation_prefers_live_response_and_writes_back() {
    let h = harness().await;
    h.fetcher.serve(url("/about").as_str(), "<html>fresh</html>");
    let lifetime = Lifetime::new();

    let outcome = h
      .router
      .route(&Request::navigate(url("/about")), &lifetime)
      .await;
    assert_eq!(outcome.response().unwrap().body, b"<html>fresh</html>");
    assert_eq!(outcome.source(), "network");

    assert_eq!(lifetime.settle().await, 0);
    let cached = h.cache.get(&RequestKey::get(&url("/about"))).unwrap().unwrap();
    assert_eq!(cached.body, b"<html>fresh</html>");
  }

  #[tokio::test]
  async fn test_navigation_ignores_stale_cache_when_online() {
    let h = harness().await;
    h.fetcher.serve(url("/").as_str(), "<html>new shell</html>");

    let outcome = h
      .router
      .route(&Request::navigate(url("/")), &Lifetime::new())
      .await;
    assert!(matches!(outcome, RouteOutcome::Network(ref r) if r.body == b"<html>new shell</html>"));
  }

  #[tokio::test]
  async fn test_navigation_offline_serves_fallback() {
    let h = harness().await;
    h.fetcher.set_offline(true);

    let outcome = h
      .router
      .route(&Request::navigate(url("/about")), &Lifetime::new())
      .await;
    assert!(matches!(outcome, RouteOutcome::Fallback(ref r) if r.body == b"<html>offline</html>"));
  }

  #[tokio::test]
  async fn test_subresource_hit_skips_network() {
    let h = harness().await;
    let calls_before = h.fetcher.calls().len();

    let outcome = h
      .router
      .route(&Request::get(url("/")), &Lifetime::new())
      .await;
    assert_eq!(outcome.source(), "cache");
    assert_eq!(h.fetcher.calls().len(), calls_before);
  }

  #[tokio::test]
  async fn test_subresource_miss_uses_network_without_caching() {
    let h = harness().await;
    h.fetcher.serve(url("/app.js").as_str(), "console.log(1)");

    let outcome = h
      .router
      .route(&Request::get(url("/app.js")), &Lifetime::new())
      .await;
    assert_eq!(outcome.source(), "network");
    assert!(h.cache.get(&RequestKey::get(&url("/app.js"))).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_offline_miss_html_gets_fallback_others_unavailable() {
    let h = harness().await;
    h.fetcher.set_offline(true);

    let page = Request::get(url("/help")).with_header("accept", "text/html");
    let script = Request::get(url("/missing.js")).with_header("accept", "*/*");

    let page_outcome = h.router.route(&page, &Lifetime::new()).await;
    let script_outcome = h.router.route(&script, &Lifetime::new()).await;

    assert_eq!(page_outcome.source(), "fallback");
    assert_eq!(script_outcome, RouteOutcome::Unavailable);
  }

  #[tokio::test]
  async fn test_offline_post_is_deferred() {
    let h = harness().await;
    h.fetcher.set_offline(true);

    let post = Request::new("POST", url("/api/scans")).with_body(b"{}".to_vec());
    let outcome = h.router.route(&post, &Lifetime::new()).await;

    assert_eq!(outcome, RouteOutcome::Deferred);
    assert_eq!(h.queue.len(SYNC_REQUESTS_TAG).unwrap(), 1);
  }
}
