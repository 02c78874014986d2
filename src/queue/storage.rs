//! Durable queue storage.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use std::sync::Arc;
use url::Url;

use crate::db::{schema::parse_datetime, Database};
use crate::net::{Request, RequestMode};

/// A request waiting to be replayed.
#[derive(Debug, Clone)]
pub struct QueuedAction {
  pub id: i64,
  pub tag: String,
  pub request: Request,
  pub enqueued_at: DateTime<Utc>,
}

/// Durable, tag-scoped FIFO storage.
pub trait QueueStorage: Send + Sync {
  /// Append to the end of the tag's queue.
  fn push(&self, tag: &str, request: &Request) -> Result<i64>;

  /// Every pending action for the tag, oldest first.
  fn pending(&self, tag: &str) -> Result<Vec<QueuedAction>>;

  /// Remove an action after it was confirmed delivered.
  fn remove(&self, id: i64) -> Result<()>;

  fn len(&self, tag: &str) -> Result<usize>;
}

/// SQLite-backed queue; survives process restarts.
pub struct SqliteQueue {
  db: Arc<Database>,
}

impl SqliteQueue {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

type QueuedRow = (i64, String, String, String, String, Vec<u8>, bool, String);

impl QueueStorage for SqliteQueue {
  fn push(&self, tag: &str, request: &Request) -> Result<i64> {
    let conn = self.db.conn()?;
    let headers = serde_json::to_string(&request.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT INTO queued_actions (tag, method, url, headers, body, navigate, enqueued_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
          tag,
          request.method,
          request.url.as_str(),
          headers,
          request.body,
          request.is_navigation(),
          Utc::now().to_rfc3339()
        ],
      )
      .map_err(|e| eyre!("Failed to enqueue request: {}", e))?;

    Ok(conn.last_insert_rowid())
  }

  fn pending(&self, tag: &str) -> Result<Vec<QueuedAction>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT id, tag, method, url, headers, body, navigate, enqueued_at
         FROM queued_actions WHERE tag = ? ORDER BY id",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<QueuedRow> = stmt
      .query_map(params![tag], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
          row.get(6)?,
          row.get(7)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query queue: {}", e))?
      .collect::<Result<Vec<QueuedRow>, _>>()
      .map_err(|e| eyre!("Failed to read queued action: {}", e))?;

    rows
      .into_iter()
      .map(
        |(id, tag, method, url, headers, body, navigate, enqueued_at)| -> Result<QueuedAction> {
          let url = Url::parse(&url).map_err(|e| eyre!("Corrupt queued url '{}': {}", url, e))?;
          let headers = serde_json::from_str(&headers)
            .map_err(|e| eyre!("Corrupt queued headers for #{}: {}", id, e))?;
          let mode = if navigate {
            RequestMode::Navigate
          } else {
            RequestMode::Subresource
          };

          Ok(QueuedAction {
            id,
            tag,
            request: Request {
              method,
              url,
              headers,
              body,
              mode,
            },
            enqueued_at: parse_datetime(&enqueued_at)?,
          })
        },
      )
      .collect()
  }

  fn remove(&self, id: i64) -> Result<()> {
    self
      .db
      .conn()?
      .execute("DELETE FROM queued_actions WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove queued action #{}: {}", id, e))?;
    Ok(())
  }

  fn len(&self, tag: &str) -> Result<usize> {
    let count: i64 = self
      .db
      .conn()?
      .query_row(
        "SELECT COUNT(*) FROM queued_actions WHERE tag = ?",
        params![tag],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count queue: {}", e))?;
    Ok(count as usize)
  }
}
