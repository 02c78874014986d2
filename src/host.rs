//! Host-side triggers for a long-running worker.
//!
//! Each tick turns elapsed periodic tasks into `PeriodicSync` events and, while
//! the origin is reachable, raises `Sync` for queues that still hold work.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::cache::CacheStorage;
use crate::config::SYNC_REQUESTS_TAG;
use crate::event::Event;
use crate::net::Request;
use crate::platform::LocalPlatform;
use crate::refresh::{PeriodicRegistry, PeriodicTask};
use crate::worker::Worker;

pub struct Host<S: CacheStorage> {
  worker: Arc<Worker<S>>,
  platform: Arc<LocalPlatform>,
  periodic: PeriodicRegistry,
  /// Reachability at the previous tick; unknown before the first one
  online: Option<bool>,
}

impl<S: CacheStorage + 'static> Host<S> {
  pub fn new(worker: Arc<Worker<S>>, platform: Arc<LocalPlatform>, periodic: PeriodicRegistry) -> Self {
    Self {
      worker,
      platform,
      periodic,
      online: None,
    }
  }

  pub fn worker(&self) -> &Arc<Worker<S>> {
    &self.worker
  }

  pub fn periodic_tasks(&self) -> color_eyre::Result<Vec<PeriodicTask>> {
    self.periodic.tasks()
  }

  /// Events to raise for one tick.
  ///
  /// Sync tags fire on the first reachable tick (including the first tick after
  /// startup) and again on every later tick while their queue is not empty.
  /// Storage errors are logged and the tick carries on.
  pub async fn on_tick(&mut self, now: DateTime<Utc>) -> Vec<Event> {
    let mut events = Vec::new();

    match self.periodic.due_tasks(self.platform.as_ref(), now).await {
      Ok(due) => {
        for task in due {
          if let Err(e) = self.periodic.mark_run(&task.tag, now) {
            error!(tag = %task.tag, "failed to record periodic run: {}", e);
            continue;
          }
          events.push(Event::PeriodicSync { tag: task.tag });
        }
      }
      Err(e) => error!("failed to check periodic tasks: {}", e),
    }

    let reachable = self.probe().await;
    let restored = reachable && self.online != Some(true);
    if restored {
      info!(startup = self.online.is_none(), "origin reachable");
    } else if !reachable && self.online == Some(true) {
      warn!("origin unreachable");
    }
    self.online = Some(reachable);

    if reachable {
      for tag in self.sync_tags() {
        let pending = self.worker.queue().len(&tag).unwrap_or_else(|e| {
          error!(tag = %tag, "failed to read queue length: {}", e);
          0
        });
        if restored || pending > 0 {
          events.push(Event::Sync { tag });
        }
      }
    }

    events
  }

  /// Registered one-off sync tags. Deferred requests are always covered, even
  /// if the app never registered for them.
  fn sync_tags(&self) -> Vec<String> {
    let mut tags = self.platform.sync_tags().unwrap_or_else(|e| {
      error!("failed to list sync registrations: {}", e);
      Vec::new()
    });
    if !tags.iter().any(|t| t == SYNC_REQUESTS_TAG) {
      tags.push(SYNC_REQUESTS_TAG.to_string());
    }
    tags
  }

  /// The origin counts as reachable if it answers at all.
  async fn probe(&self) -> bool {
    let request = Request::new("HEAD", self.worker.config().origin.clone());
    self.worker.fetcher().fetch(&request).await.is_ok()
  }
}
