mod cache;
mod config;
mod db;
mod event;
mod host;
mod lifecycle;
mod net;
mod platform;
mod push;
mod queue;
mod refresh;
mod registration;
mod router;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cache::SqliteStorage;
use crate::config::{Config, SYNC_REQUESTS_TAG};
use crate::db::Database;
use crate::event::{dispatch, spawn_dispatch, Event, EventHandler};
use crate::host::Host;
use crate::net::{HttpFetcher, Request};
use crate::platform::LocalPlatform;
use crate::push::{NotificationRecord, TerminalSink, WindowList};
use crate::queue::SqliteQueue;
use crate::refresh::PeriodicRegistry;
use crate::router::RouteOutcome;
use crate::worker::{Collaborators, Worker};

#[derive(Parser, Debug)]
#[command(name = "shellkeeper")]
#[command(about = "An offline-capable request cache and sync worker for web app shells")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/shellkeeper/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Origin to serve, overriding the config file
  #[arg(short, long)]
  origin: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the app shell and activate this version
  Install,
  /// Purge stale cache versions
  Activate,
  /// Install if needed and set up sync, periodic sync and push
  Register,
  /// Route a request through the worker
  Fetch {
    /// Path or URL, resolved against the origin
    path: String,
    /// Treat as a top-level navigation
    #[arg(long)]
    navigate: bool,
    /// Accept header to send
    #[arg(long)]
    accept: Option<String>,
    /// HTTP method
    #[arg(long, default_value = "GET")]
    method: String,
    /// Request body
    #[arg(long)]
    body: Option<String>,
  },
  /// Fire a one-off sync trigger
  Sync { tag: String },
  /// Fire a periodic sync trigger
  Periodic { tag: String },
  /// Deliver a push payload (empty means no payload)
  Push { payload: Option<String> },
  /// Simulate a click on a notification targeting the given URL
  Click { target: String },
  /// Host the worker: run periodic triggers and replay when back online
  Run {
    /// Seconds between host ticks
    #[arg(long, default_value_t = 60)]
    tick: u64,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref(), args.origin.as_deref())?;
  let _guard = init_tracing(config.log_dir.as_deref());

  let worker_config = config.worker_config()?;
  let db = Arc::new(Database::open(&config.database_path()?)?);
  let fetcher = Arc::new(HttpFetcher::new(worker_config.fetch_timeout)?);
  let platform = Arc::new(LocalPlatform::new(
    db.clone(),
    &config.permissions,
    &config.origin,
  ));

  let worker = Arc::new(Worker::new(
    worker_config,
    Collaborators {
      storage: Arc::new(SqliteStorage::new(db.clone())),
      queue: Arc::new(SqliteQueue::new(db.clone())),
      fetcher,
      notifications: Arc::new(TerminalSink),
      windows: Arc::new(WindowList::new()),
    },
  ));

  match args.command {
    Command::Install => {
      let purged = worker.start().await?;
      println!(
        "installed {} ({} entries), purged {} stale store(s)",
        worker.cache().name(),
        worker.cache().len()?,
        purged.len()
      );
    }
    Command::Activate => {
      if !worker.restore()? {
        return Err(eyre!("{} is not installed", worker.cache().name()));
      }
      dispatch(&worker, Event::Activate).await;
      if !worker.state().is_active() {
        return Err(eyre!("{} failed to activate", worker.cache().name()));
      }
      println!("{} active", worker.cache().name());
    }
    Command::Register => {
      let report = registration::register(&worker, platform.as_ref()).await?;
      for (step, outcome) in &report.steps {
        println!("{:?}: {:?}", step, outcome);
      }
    }
    Command::Fetch {
      path,
      navigate,
      accept,
      method,
      body,
    } => {
      resume_or_warn(&worker).await?;
      let url = worker
        .config()
        .origin
        .join(&path)
        .map_err(|e| eyre!("Invalid path '{}': {}", path, e))?;

      let mut request = if navigate {
        Request::navigate(url)
      } else {
        Request::new(&method, url)
      };
      if let Some(accept) = accept {
        request = request.with_header("accept", &accept);
      }
      if let Some(body) = body {
        request = request.with_body(body.into_bytes());
      }

      let (reply, rx) = oneshot::channel();
      dispatch(&worker, Event::Fetch { request, reply }).await;
      let outcome = rx.await.map_err(|e| eyre!("No response: {}", e))?;

      match outcome.response() {
        Some(response) => {
          eprintln!(
            "{} {} ({})",
            response.status,
            response.header("content-type").unwrap_or("-"),
            outcome.source()
          );
          println!("{}", String::from_utf8_lossy(&response.body));
        }
        None if outcome == RouteOutcome::Deferred => println!(
          "deferred ({} queued for replay)",
          worker.queue().len(SYNC_REQUESTS_TAG)?
        ),
        None => println!("{}", outcome.source()),
      }
    }
    Command::Sync { tag } => {
      resume_or_warn(&worker).await?;
      match worker.handle_sync(&tag).await? {
        Some(report) => println!(
          "replayed {}/{} ({} remaining)",
          report.replayed, report.attempted, report.remaining
        ),
        None => println!("ignored unrecognized tag {}", tag),
      }
    }
    Command::Periodic { tag } => {
      resume_or_warn(&worker).await?;
      println!("{:?}", worker.handle_periodic(&tag).await);
    }
    Command::Push { payload } => {
      let payload = payload.map(String::into_bytes);
      dispatch(&worker, Event::Push { payload }).await;
    }
    Command::Click { target } => {
      let record = NotificationRecord::new("Notification", target);
      dispatch(&worker, Event::NotificationClick(record)).await;
    }
    Command::Run { tick } => {
      let host = Host::new(worker, platform, PeriodicRegistry::new(db));
      run(host, Duration::from_secs(tick)).await?;
    }
  }

  Ok(())
}

async fn resume_or_warn(worker: &Worker<SqliteStorage>) -> Result<()> {
  if !worker.resume().await? {
    warn!(
      store = %worker.cache().name(),
      "current version not installed, the last activated version serves if present"
    );
  }
  Ok(())
}

/// Host loop: every tick raises periodic and sync triggers, everything else is
/// dispatched on its own task.
async fn run(mut host: Host<SqliteStorage>, tick_rate: Duration) -> Result<()> {
  let worker = host.worker().clone();
  if !worker.resume().await? {
    dispatch(&worker, Event::Install).await;
    if !worker.state().is_active() {
      return Err(eyre!("{} failed to install", worker.cache().name()));
    }
  }

  let mut events = EventHandler::new(tick_rate);
  let tx = events.sender();
  for task in host.periodic_tasks()? {
    info!(
      tag = %task.tag,
      registered_at = %task.registered_at,
      interval_secs = task.min_interval.as_secs(),
      "periodic task"
    );
  }
  info!(store = %worker.cache().name(), "worker running");

  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => {
        info!("shutting down");
        return Ok(());
      }
      event = events.next() => {
        let Some(event) = event else { return Ok(()) };
        match event {
          Event::Tick => {
            for triggered in host.on_tick(chrono::Utc::now()).await {
              let _ = tx.send(triggered);
            }
          }
          other => spawn_dispatch(worker.clone(), other),
        }
      }
    }
  }
}

/// Log to a daily file when a directory is configured, stderr otherwise.
fn init_tracing(log_dir: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shellkeeper=info"));

  match log_dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "shellkeeper.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Some(guard)
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
      None
    }
  }
}
