//! Deferred replay queue for requests that failed while offline.
//!
//! Delivery is at-least-once: an action leaves the queue only after a
//! replay confirmed by a 2xx/3xx response.

mod storage;

pub use storage::{QueueStorage, SqliteQueue};

use color_eyre::Result;
use std::sync::Arc;
use tracing::{info, warn};

use crate::net::{Fetcher, Request};

/// Outcome of one replay run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplayReport {
  pub attempted: usize,
  pub replayed: usize,
  pub remaining: usize,
}

impl ReplayReport {
  /// True only when every attempted item was delivered.
  pub fn is_complete(&self) -> bool {
    self.replayed == self.attempted
  }
}

#[derive(Clone)]
pub struct ReplayQueue {
  storage: Arc<dyn QueueStorage>,
  fetcher: Arc<dyn Fetcher>,
}

impl ReplayQueue {
  pub fn new(storage: Arc<dyn QueueStorage>, fetcher: Arc<dyn Fetcher>) -> Self {
    Self { storage, fetcher }
  }

  pub fn enqueue(&self, tag: &str, request: &Request) -> Result<()> {
    let id = self.storage.push(tag, request)?;
    info!(tag, id, url = %request.url, "request deferred for replay");
    Ok(())
  }

  pub fn len(&self, tag: &str) -> Result<usize> {
    self.storage.len(tag)
  }

  /// Re-issue every queued request for `tag`, oldest first.
  ///
  /// Delivered items are removed; failed ones stay for the next trigger.
  /// Partial delivery is a normal outcome, not an error.
  pub async fn replay(&self, tag: &str) -> Result<ReplayReport> {
    let pending = self.storage.pending(tag)?;
    let mut report = ReplayReport {
      attempted: pending.len(),
      ..Default::default()
    };

    for action in pending {
      match self.fetcher.fetch(&action.request).await {
        Ok(response) if response.is_success() || (300..400).contains(&response.status) => {
          self.storage.remove(action.id)?;
          report.replayed += 1;
        }
        Ok(response) => {
          warn!(
            tag = %action.tag,
            id = action.id,
            status = response.status,
            "replay rejected, keeping queued"
          );
        }
        Err(e) => {
          warn!(
            tag,
            id = action.id,
            enqueued_at = %action.enqueued_at,
            "replay failed, keeping queued: {}",
            e
          );
        }
      }
    }

    report.remaining = self.storage.len(tag)?;
    info!(
      tag,
      attempted = report.attempted,
      replayed = report.replayed,
      remaining = report.remaining,
      "replay finished"
    );
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::net::testing::ScriptedFetcher;
  use url::Url;

  const TAG: &str = "sync-requests";

  fn setup() -> (ReplayQueue, Arc<SqliteQueue>, Arc<ScriptedFetcher>) {
    let storage = Arc::new(SqliteQueue::new(Arc::new(Database::open_in_memory().unwrap())));
    let fetcher = Arc::new(ScriptedFetcher::new());
    let queue = ReplayQueue::new(storage.clone(), fetcher.clone());
    (queue, storage, fetcher)
  }

  fn post(path: &str) -> Request {
    let url = Url::parse("https://qr.example.com").unwrap().join(path).unwrap();
    Request::new("POST", url)
      .with_header("content-type", "application/json")
      .with_body(br#"{"text":"hello"}"#.to_vec())
  }

  #[tokio::test]
  async fn test_replay_empty_queue_is_noop() {
    let (queue, _, fetcher) = setup();

    for _ in 0..2 {
      let report = queue.replay(TAG).await.unwrap();
      assert_eq!(report, ReplayReport::default());
      assert!(report.is_complete());
    }
    assert!(fetcher.calls().is_empty());
  }

  #[tokio::test]
  async fn test_partial_replay_keeps_failures() {
    let (queue, storage, fetcher) = setup();
    fetcher.serve("https://qr.example.com/api/a", "ok");
    fetcher.serve("https://qr.example.com/api/c", "ok");
    fetcher.serve_status("https://qr.example.com/api/d", 503, "busy");

    for path in ["/api/a", "/api/b", "/api/c", "/api/d"] {
      queue.enqueue(TAG, &post(path)).unwrap();
    }

    let report = queue.replay(TAG).await.unwrap();
    assert_eq!(report.attempted, 4);
    assert_eq!(report.replayed, 2);
    assert_eq!(report.remaining, 2);
    assert!(!report.is_complete());

    // FIFO order is kept for what remains
    let left: Vec<String> = storage
      .pending(TAG)
      .unwrap()
      .into_iter()
      .map(|a| a.request.url.path().to_string())
      .collect();
    assert_eq!(left, vec!["/api/b", "/api/d"]);

    // Items were attempted in enqueue order
    assert_eq!(
      fetcher.calls(),
      vec![
        "https://qr.example.com/api/a",
        "https://qr.example.com/api/b",
        "https://qr.example.com/api/c",
        "https://qr.example.com/api/d",
      ]
    );
  }

  #[tokio::test]
  async fn test_queued_request_round_trips_through_storage() {
    let (queue, storage, _) = setup();
    queue.enqueue(TAG, &post("/api/a")).unwrap();

    let pending = storage.pending(TAG).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].request, post("/api/a"));
    assert_eq!(pending[0].tag, TAG);
  }

  #[tokio::test]
  async fn test_queues_are_scoped_by_tag() {
    let (queue, _, fetcher) = setup();
    fetcher.set_offline(true);
    queue.enqueue(TAG, &post("/api/a")).unwrap();
    queue.enqueue("other", &post("/api/b")).unwrap();

    let report = queue.replay("other").await.unwrap();
    assert_eq!(report.attempted, 1);
    assert_eq!(queue.len(TAG).unwrap(), 1);
    assert_eq!(queue.len("other").unwrap(), 1);
  }
}
