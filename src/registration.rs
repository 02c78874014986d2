//! The application's single "install this worker" call.

use color_eyre::Result;
use tracing::{info, warn};

use crate::cache::CacheStorage;
use crate::config::{CONTENT_SYNC_TAG, SYNC_REQUESTS_TAG};
use crate::platform::{Capability, PermissionState, Platform};
use crate::worker::Worker;

/// Optional setup performed after a successful install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
  OneOffSync,
  PeriodicSync,
  Push,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
  Done,
  /// Preconditions not met (e.g. permission not granted)
  Skipped(String),
  Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationReport {
  /// False when the worker was already active and install was skipped
  pub installed: bool,
  pub steps: Vec<(SetupStep, StepOutcome)>,
}

impl RegistrationReport {
  #[allow(dead_code)]
  pub fn outcome(&self, step: SetupStep) -> Option<&StepOutcome> {
    self.steps.iter().find(|(s, _)| *s == step).map(|(_, o)| o)
  }
}

/// Install and activate the worker (a no-op if it already is), then attempt
/// each optional sub-registration independently.
///
/// Only install/activate failures are returned; sub-registration failures are
/// logged and recorded in the report.
pub async fn register<S: CacheStorage + 'static>(
  worker: &Worker<S>,
  platform: &dyn Platform,
) -> Result<RegistrationReport> {
  let installed = if worker.resume().await? {
    false
  } else {
    worker.start().await?;
    true
  };

  let steps = vec![
    (SetupStep::OneOffSync, one_off_sync(platform).await),
    (
      SetupStep::PeriodicSync,
      periodic_sync(platform, worker.config().periodic_min_interval).await,
    ),
    (SetupStep::Push, push(platform).await),
  ];

  for (step, outcome) in &steps {
    match outcome {
      StepOutcome::Done => info!(?step, "registration step done"),
      StepOutcome::Skipped(reason) => info!(?step, reason = %reason, "registration step skipped"),
      StepOutcome::Failed(reason) => warn!(?step, reason = %reason, "registration step failed"),
    }
  }

  Ok(RegistrationReport { installed, steps })
}

async fn one_off_sync(platform: &dyn Platform) -> StepOutcome {
  match platform.register_sync(SYNC_REQUESTS_TAG).await {
    Ok(()) => StepOutcome::Done,
    Err(e) => StepOutcome::Failed(e.to_string()),
  }
}

/// Only registers when permission was already granted; never prompts.
async fn periodic_sync(platform: &dyn Platform, min_interval: std::time::Duration) -> StepOutcome {
  if platform.permission(Capability::PeriodicSync).await != PermissionState::Granted {
    return StepOutcome::Skipped("periodic sync permission not granted".to_string());
  }
  match platform
    .register_periodic_sync(CONTENT_SYNC_TAG, min_interval)
    .await
  {
    Ok(()) => StepOutcome::Done,
    Err(e) => StepOutcome::Failed(e.to_string()),
  }
}

async fn push(platform: &dyn Platform) -> StepOutcome {
  match platform.request_permission(Capability::Push).await {
    Ok(PermissionState::Granted) => match platform.subscribe_push().await {
      Ok(subscription) => {
        info!(endpoint = %subscription.endpoint, "push subscribed");
        StepOutcome::Done
      }
      Err(e) => StepOutcome::Failed(e.to_string()),
    },
    Ok(state) => StepOutcome::Skipped(format!("push permission {:?}", state)),
    Err(e) => StepOutcome::Failed(e.to_string()),
  }
}
