//! Worker events and their dispatch.
//!
//! Every event gets its own `Lifetime`; the event only counts as finished
//! once the background work its handler registered has settled.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::cache::CacheStorage;
use crate::lifecycle::Lifetime;
use crate::net::Request;
use crate::push::NotificationRecord;
use crate::router::RouteOutcome;
use crate::worker::Worker;

/// Events delivered to the worker
#[derive(Debug)]
pub enum Event {
  Install,
  Activate,
  /// Intercepted request; the outcome is sent back as soon as it is known
  Fetch {
    request: Request,
    reply: oneshot::Sender<RouteOutcome>,
  },
  /// Connectivity restored for a one-off sync registration
  Sync { tag: String },
  /// Platform-scheduled periodic trigger
  PeriodicSync { tag: String },
  Push { payload: Option<Vec<u8>> },
  NotificationClick(NotificationRecord),
  /// Host timer tick
  Tick,
}

impl Event {
  pub fn name(&self) -> &'static str {
    match self {
      Event::Install => "install",
      Event::Activate => "activate",
      Event::Fetch { .. } => "fetch",
      Event::Sync { .. } => "sync",
      Event::PeriodicSync { .. } => "periodicsync",
      Event::Push { .. } => "push",
      Event::NotificationClick(_) => "notificationclick",
      Event::Tick => "tick",
    }
  }
}

/// Event queue fed by the host and a tick timer
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate
  pub fn new(tick_rate: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    let tick_tx = tx.clone();
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(tick_rate);
      loop {
        interval.tick().await;
        if tick_tx.send(Event::Tick).is_err() {
          break;
        }
      }
    });

    Self { tx, rx }
  }

  /// Sender for posting events from other tasks
  pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
    self.tx.clone()
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}

/// Run one event to completion, including its extended lifetime.
///
/// Nothing escapes: handler failures are logged here.
pub async fn dispatch<S: CacheStorage + 'static>(worker: &Worker<S>, event: Event) {
  let name = event.name();
  let lifetime = Lifetime::new();

  match event {
    Event::Install => {
      if let Err(e) = worker.start().await {
        error!(event = name, "{}", e);
      }
    }
    Event::Activate => {
      if let Err(e) = worker.activate().await {
        error!(event = name, "{}", e);
      }
    }
    Event::Fetch { request, reply } => {
      let outcome = worker.handle_fetch(&request, &lifetime).await;
      if reply.send(outcome).is_err() {
        warn!(url = %request.url, "fetch caller went away before the response");
      }
    }
    Event::Sync { tag } => match worker.handle_sync(&tag).await {
      Ok(Some(report)) if !report.is_complete() => {
        info!(tag = %tag, remaining = report.remaining, "sync left items for the next trigger")
      }
      Ok(_) => {}
      Err(e) => error!(event = name, tag = %tag, "{}", e),
    },
    Event::PeriodicSync { tag } => {
      worker.handle_periodic(&tag).await;
    }
    Event::Push { payload } => {
      if let Err(e) = worker.handle_push(payload.as_deref()).await {
        error!(event = name, "{}", e);
      }
    }
    Event::NotificationClick(record) => match worker.handle_click(record).await {
      Ok(action) => info!(?action, "notification click routed"),
      Err(e) => error!(event = name, "{}", e),
    },
    Event::Tick => {}
  }

  let failed = lifetime.settle().await;
  if failed > 0 {
    warn!(event = name, failed, "event finished with failed background work");
  }
}

/// Dispatch on its own task so concurrent fetches do not wait on each other.
pub fn spawn_dispatch<S: CacheStorage + 'static>(worker: Arc<Worker<S>>, event: Event) {
  tokio::spawn(async move { dispatch(&worker, event).await });
}
