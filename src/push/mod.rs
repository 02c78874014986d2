//! Push decoding, notification display and click routing.

mod notify;
mod windows;

pub use notify::{NotificationOptions, NotificationRecord, NotificationSink, TerminalSink};
pub use windows::{WindowId, WindowList, WindowRegistry};

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

const DEFAULT_TITLE: &str = "Notification";
const DEFAULT_BODY: &str = "You have a new message";
const DEFAULT_URL: &str = "/";
const DEFAULT_ICON: &str = "/icons/icon-192.png";

/// Wire shape of a push payload; every field is optional.
#[derive(Debug, Default, Deserialize)]
struct PushPayload {
  title: Option<String>,
  body: Option<String>,
  url: Option<String>,
}

/// A decoded push, alive only while its event is handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
  pub title: String,
  pub body: String,
  /// Icon reference; payloads never carry one, the configured icon replaces it
  pub icon: String,
  pub target_url: String,
}

impl Default for PushMessage {
  fn default() -> Self {
    Self {
      title: DEFAULT_TITLE.to_string(),
      body: DEFAULT_BODY.to_string(),
      icon: DEFAULT_ICON.to_string(),
      target_url: DEFAULT_URL.to_string(),
    }
  }
}

impl PushMessage {
  /// Decode a payload. Never fails: missing fields take defaults and a
  /// payload that is not a JSON object becomes the body text.
  pub fn decode(payload: Option<&[u8]>) -> Self {
    let Some(bytes) = payload else {
      return Self::default();
    };

    match serde_json::from_slice::<PushPayload>(bytes) {
      Ok(parsed) => Self {
        title: parsed.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        body: parsed.body.unwrap_or_else(|| DEFAULT_BODY.to_string()),
        icon: DEFAULT_ICON.to_string(),
        target_url: parsed.url.unwrap_or_else(|| DEFAULT_URL.to_string()),
      },
      Err(e) => {
        warn!("push payload is not JSON, using it as text: {}", e);
        let text = String::from_utf8_lossy(bytes).into_owned();
        Self {
          body: if text.is_empty() {
            DEFAULT_BODY.to_string()
          } else {
            text
          },
          ..Self::default()
        }
      }
    }
  }
}

/// What a notification click did. Exactly one per click.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickAction {
  Focused(WindowId),
  Opened(WindowId),
}

pub struct PushDispatcher {
  sink: Arc<dyn NotificationSink>,
  windows: Arc<dyn WindowRegistry>,
  origin: Url,
  icon: String,
  badge: String,
}

impl PushDispatcher {
  pub fn new(
    sink: Arc<dyn NotificationSink>,
    windows: Arc<dyn WindowRegistry>,
    origin: Url,
    icon: impl Into<String>,
    badge: impl Into<String>,
  ) -> Self {
    Self {
      sink,
      windows,
      origin,
      icon: icon.into(),
      badge: badge.into(),
    }
  }

  /// Show a notification for an incoming push.
  ///
  /// A display failure (e.g. revoked permission) is returned to the caller.
  pub async fn on_push(&self, payload: Option<&[u8]>) -> Result<NotificationRecord> {
    let message = PushMessage {
      icon: self.icon.clone(),
      ..PushMessage::decode(payload)
    };
    info!(title = %message.title, target = %message.target_url, "push received");

    let options = NotificationOptions {
      body: message.body,
      icon: message.icon,
      badge: self.badge.clone(),
      data: message.target_url,
    };

    self
      .sink
      .show(&message.title, &options)
      .await
      .map_err(|e| eyre!("Failed to show notification '{}': {}", message.title, e))
  }

  /// Route a click: focus the first window already at the target, else open one.
  pub async fn on_click(&self, record: NotificationRecord) -> Result<ClickAction> {
    info!(title = %record.title, "notification clicked");
    let target = record.close();
    let url = self.resolve(&target);

    let existing = self
      .windows
      .windows()
      .await?
      .into_iter()
      .find(|w| w.url == url);

    match existing {
      Some(window) => {
        info!(window = window.id.0, was_focused = window.focused, "focusing existing window");
        self.windows.focus(window.id).await?;
        Ok(ClickAction::Focused(window.id))
      }
      None => {
        let id = self.windows.open(&url).await?;
        Ok(ClickAction::Opened(id))
      }
    }
  }

  /// Targets are stored as given and compared as absolute URLs.
  fn resolve(&self, target: &str) -> String {
    self
      .origin
      .join(target)
      .map(|u| u.to_string())
      .unwrap_or_else(|_| target.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use std::sync::Mutex;

  #[derive(Default)]
  struct RecordingSink {
    shown: Mutex<Vec<(String, NotificationOptions)>>,
    revoked: bool,
  }

  #[async_trait]
  impl NotificationSink for RecordingSink {
    async fn show(&self, title: &str, options: &NotificationOptions) -> Result<NotificationRecord> {
      if self.revoked {
        return Err(eyre!("permission revoked"));
      }
      self
        .shown
        .lock()
        .unwrap()
        .push((title.to_string(), options.clone()));
      Ok(NotificationRecord::new(title, options.data.clone()))
    }
  }

  fn dispatcher(sink: Arc<RecordingSink>, windows: Arc<WindowList>) -> PushDispatcher {
    PushDispatcher::new(
      sink,
      windows,
      Url::parse("https://qr.example.com").unwrap(),
      "/icons/icon-192.png",
      "/icons/icon-192.png",
    )
  }

  #[test]
  fn test_decode_empty_object_uses_defaults() {
    let message = PushMessage::decode(Some(b"{}".as_slice()));
    assert_eq!(message, PushMessage::default());
    assert_eq!(message.title, "Notification");
    assert_eq!(message.body, "You have a new message");
    assert_eq!(message.target_url, "/");
    assert_eq!(message.icon, "/icons/icon-192.png");
  }

  #[test]
  fn test_decode_full_payload() {
    let message =
      PushMessage::decode(Some(br#"{"title":"Scan ready","body":"Open it","url":"/scan/42"}"#.as_slice()));
    assert_eq!(message.title, "Scan ready");
    assert_eq!(message.body, "Open it");
    assert_eq!(message.target_url, "/scan/42");
  }

  #[test]
  fn test_decode_malformed_uses_text_body() {
    let message = PushMessage::decode(Some(b"server says hi".as_slice()));
    assert_eq!(message.title, "Notification");
    assert_eq!(message.body, "server says hi");
    assert_eq!(message.target_url, "/");

    assert_eq!(PushMessage::decode(None), PushMessage::default());
    assert_eq!(PushMessage::decode(Some(b"".as_slice())).body, "You have a new message");
  }

  #[tokio::test]
  async fn test_push_displays_with_options() {
    let sink = Arc::new(RecordingSink::default());
    let dispatcher = dispatcher(sink.clone(), Arc::new(WindowList::new()));

    let record = dispatcher.on_push(Some(b"{}".as_slice())).await.unwrap();
    assert_eq!(record.title, "Notification");

    let shown = sink.shown.lock().unwrap();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].1.body, "You have a new message");
    assert_eq!(shown[0].1.icon, "/icons/icon-192.png");
    assert_eq!(shown[0].1.badge, "/icons/icon-192.png");
    assert_eq!(shown[0].1.data, "/");
  }

  #[tokio::test]
  async fn test_configured_icon_replaces_default() {
    let sink = Arc::new(RecordingSink::default());
    let dispatcher = PushDispatcher::new(
      sink.clone(),
      Arc::new(WindowList::new()),
      Url::parse("https://qr.example.com").unwrap(),
      "/icons/scan.png",
      "/icons/badge.png",
    );

    dispatcher
      .on_push(Some(br#"{"title":"Scan ready"}"#.as_slice()))
      .await
      .unwrap();

    let shown = sink.shown.lock().unwrap();
    assert_eq!(shown[0].0, "Scan ready");
    assert_eq!(shown[0].1.icon, "/icons/scan.png");
    assert_eq!(shown[0].1.badge, "/icons/badge.png");
  }

  #[tokio::test]
  async fn test_display_failure_is_reported() {
    let sink = Arc::new(RecordingSink {
      revoked: true,
      ..Default::default()
    });
    let dispatcher = dispatcher(sink, Arc::new(WindowList::new()));
    assert!(dispatcher.on_push(Some(b"{}".as_slice())).await.is_err());
  }

  #[tokio::test]
  async fn test_click_focuses_matching_window() {
    let windows = Arc::new(WindowList::with_windows([
      "https://qr.example.com/about",
      "https://qr.example.com/scan/42",
      "https://qr.example.com/scan/42",
    ]));
    let dispatcher = dispatcher(Arc::new(RecordingSink::default()), windows.clone());

    let action = dispatcher
      .on_click(NotificationRecord::new("Scan ready", "/scan/42"))
      .await
      .unwrap();

    assert_eq!(action, ClickAction::Focused(WindowId(1)));
    let open = windows.windows().await.unwrap();
    assert_eq!(open.len(), 3);
    assert!(open[1].focused);
    assert!(!open[2].focused);
  }

  #[tokio::test]
  async fn test_click_opens_window_when_none_match() {
    let windows = Arc::new(WindowList::with_windows(["https://qr.example.com/about"]));
    let dispatcher = dispatcher(Arc::new(RecordingSink::default()), windows.clone());

    let action = dispatcher
      .on_click(NotificationRecord::new("Notification", "/"))
      .await
      .unwrap();

    assert!(matches!(action, ClickAction::Opened(_)));
    let open = windows.windows().await.unwrap();
    assert_eq!(open.len(), 2);
    assert_eq!(open[1].url, "https://qr.example.com/");
  }
}
