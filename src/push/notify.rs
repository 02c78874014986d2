use async_trait::async_trait;
use color_eyre::Result;
use tracing::info;

/// Display options for a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationOptions {
  pub body: String,
  pub icon: String,
  pub badge: String,
  /// URL to route the user to on click
  pub data: String,
}

/// A displayed notification. Consumed exactly once by the click handler.
#[derive(Debug, PartialEq, Eq)]
pub struct NotificationRecord {
  pub title: String,
  target_url: String,
}

impl NotificationRecord {
  pub fn new(title: impl Into<String>, target_url: impl Into<String>) -> Self {
    Self {
      title: title.into(),
      target_url: target_url.into(),
    }
  }

  /// Close the notification, yielding its target URL.
  pub fn close(self) -> String {
    self.target_url
  }
}

/// Host capability that shows notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
  async fn show(&self, title: &str, options: &NotificationOptions) -> Result<NotificationRecord>;
}

/// Sink that writes notifications to the terminal.
pub struct TerminalSink;

#[async_trait]
impl NotificationSink for TerminalSink {
  async fn show(&self, title: &str, options: &NotificationOptions) -> Result<NotificationRecord> {
    info!(title, target = %options.data, badge = %options.badge, "notification shown");
    println!("[{}] {}\n  {}", options.icon, title, options.body);
    Ok(NotificationRecord::new(title, options.data.clone()))
  }
}
