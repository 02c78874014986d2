//! Worker lifecycle states and the extendable-event lifetime primitive.

use color_eyre::Result;
use std::future::Future;
use std::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{error, warn};

/// Worker lifecycle.
///
/// `Parsed -> Installing -> Installed -> Activating -> Activated`, with
/// `Redundant` when installation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
  #[default]
  Parsed,
  Installing,
  Installed,
  Activating,
  Activated,
  Redundant,
}

impl WorkerState {
  /// Only an activated worker intercepts requests.
  pub fn is_active(&self) -> bool {
    matches!(self, WorkerState::Activated)
  }
}

/// Keeps an event alive until the work registered against it completes.
///
/// Handlers hand background sub-operations to `wait_until`; the dispatcher
/// awaits `settle` before considering the event finished. Failures of those
/// sub-operations are logged and counted, never propagated.
#[derive(Default)]
pub struct Lifetime {
  tasks: Mutex<JoinSet<(&'static str, Result<()>)>>,
}

impl Lifetime {
  pub fn new() -> Self {
    Self::default()
  }

  /// Run `future` in the background and extend the event until it finishes.
  pub fn wait_until<F>(&self, label: &'static str, future: F)
  where
    F: Future<Output = Result<()>> + Send + 'static,
  {
    match self.tasks.lock() {
      Ok(mut tasks) => {
        tasks.spawn(async move { (label, future.await) });
      }
      Err(e) => error!(task = label, "lifetime lock poisoned: {}", e),
    }
  }

  /// Wait for every registered sub-operation, including ones registered
  /// while waiting. Returns how many failed.
  pub async fn settle(&self) -> usize {
    let mut failed = 0;
    loop {
      let mut tasks = match self.tasks.lock() {
        Ok(mut tasks) => std::mem::take(&mut *tasks),
        Err(e) => {
          error!("lifetime lock poisoned: {}", e);
          return failed;
        }
      };
      if tasks.is_empty() {
        return failed;
      }

      while let Some(joined) = tasks.join_next().await {
        match joined {
          Ok((_, Ok(()))) => {}
          Ok((label, Err(e))) => {
            warn!(task = label, "background task failed: {}", e);
            failed += 1;
          }
          Err(e) => {
            warn!("background task aborted: {}", e);
            failed += 1;
          }
        }
      }
    }
  }
}
