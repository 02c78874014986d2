use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(pub u64);

/// An open application window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowClient {
  pub id: WindowId,
  pub url: String,
  pub focused: bool,
}

/// Registry of open windows, queried but never owned by the worker.
#[async_trait]
pub trait WindowRegistry: Send + Sync {
  /// Open windows in registry order.
  async fn windows(&self) -> Result<Vec<WindowClient>>;

  async fn focus(&self, id: WindowId) -> Result<()>;

  async fn open(&self, url: &str) -> Result<WindowId>;

  /// Take control of every open window. Returns how many were claimed.
  async fn claim(&self) -> Result<usize>;
}

#[derive(Default)]
struct WindowListState {
  windows: Vec<WindowClient>,
  next_id: u64,
  claimed: usize,
}

/// In-process window registry.
#[derive(Default)]
pub struct WindowList {
  state: Mutex<WindowListState>,
}

impl WindowList {
  pub fn new() -> Self {
    Self::default()
  }

  /// Start with windows already open at the given URLs.
  #[allow(dead_code)]
  pub fn with_windows<I, U>(urls: I) -> Self
  where
    I: IntoIterator<Item = U>,
    U: Into<String>,
  {
    let list = Self::new();
    if let Ok(mut state) = list.state.lock() {
      for url in urls {
        let id = WindowId(state.next_id);
        state.next_id += 1;
        state.windows.push(WindowClient {
          id,
          url: url.into(),
          focused: false,
        });
      }
    }
    list
  }

  /// Number of windows currently claimed.
  #[allow(dead_code)]
  pub fn claimed(&self) -> usize {
    self.state.lock().map(|s| s.claimed).unwrap_or(0)
  }
}

#[async_trait]
impl WindowRegistry for WindowList {
  async fn windows(&self) -> Result<Vec<WindowClient>> {
    let state = self.state.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(state.windows.clone())
  }

  async fn focus(&self, id: WindowId) -> Result<()> {
    let mut state = self.state.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    if !state.windows.iter().any(|w| w.id == id) {
      return Err(eyre!("No window with id {}", id.0));
    }
    for window in state.windows.iter_mut() {
      window.focused = window.id == id;
    }
    info!(window = id.0, "window focused");
    Ok(())
  }

  async fn open(&self, url: &str) -> Result<WindowId> {
    let mut state = self.state.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let id = WindowId(state.next_id);
    state.next_id += 1;
    for window in state.windows.iter_mut() {
      window.focused = false;
    }
    state.windows.push(WindowClient {
      id,
      url: url.to_string(),
      focused: true,
    });
    info!(window = id.0, url, "window opened");
    Ok(id)
  }

  async fn claim(&self) -> Result<usize> {
    let mut state = self.state.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    state.claimed = state.windows.len();
    Ok(state.claimed)
  }
}
