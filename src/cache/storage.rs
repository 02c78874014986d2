//! SQLite implementation of the cache storage.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;

use super::traits::CacheStorage;
use crate::db::{schema::parse_datetime, Database};
use crate::net::{RequestKey, ResponseSnapshot};

/// SQLite-based cache storage.
pub struct SqliteStorage {
  db: Arc<Database>,
}

impl SqliteStorage {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

fn ensure_store(conn: &Connection, store: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO cache_stores (name, created_at) VALUES (?, ?)",
      params![store, Utc::now().to_rfc3339()],
    )
    .map_err(|e| eyre!("Failed to create cache store {}: {}", store, e))?;
  Ok(())
}

fn write_entry(
  conn: &Connection,
  store: &str,
  key: &RequestKey,
  response: &ResponseSnapshot,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries (store, method, url, status, headers, body, captured_at)
       VALUES (?, ?, ?, ?, ?, ?, ?)",
      params![
        store,
        key.method,
        key.url,
        response.status,
        headers,
        response.body,
        response.captured_at.to_rfc3339()
      ],
    )
    .map_err(|e| eyre!("Failed to store entry {}: {}", key, e))?;
  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn store_names(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_stores ORDER BY created_at, name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache stores: {}", e))?
      .collect::<Result<Vec<String>, _>>()
      .map_err(|e| eyre!("Failed to read cache store name: {}", e))?;

    Ok(names)
  }

  fn has_store(&self, store: &str) -> Result<bool> {
    let conn = self.db.conn()?;
    let found: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM cache_stores WHERE name = ?",
        params![store],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache store: {}", e))?;

    Ok(found.is_some())
  }

  fn delete_store(&self, store: &str) -> Result<bool> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM cache_entries WHERE store = ?", params![store])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", store, e))?;
    let removed = tx
      .execute("DELETE FROM cache_stores WHERE name = ?", params![store])
      .map_err(|e| eyre!("Failed to delete cache store {}: {}", store, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn active_store(&self) -> Result<Option<String>> {
    let conn = self.db.conn()?;
    conn
      .query_row("SELECT name FROM active_store WHERE id = 1", [], |row| row.get(0))
      .optional()
      .map_err(|e| eyre!("Failed to query active store: {}", e))
  }

  fn set_active_store(&self, store: &str) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO active_store (id, name, activated_at) VALUES (1, ?, ?)",
        params![store, Utc::now().to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to record active store {}: {}", store, e))?;
    Ok(())
  }

  fn get(&self, store: &str, key: &RequestKey) -> Result<Option<ResponseSnapshot>> {
    let conn = self.db.conn()?;
    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, captured_at FROM cache_entries
         WHERE store = ? AND method = ? AND url = ?",
        params![store, key.method, key.url],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query entry {}: {}", key, e))?;

    match row {
      Some((status, headers, body, captured_at)) => {
        let headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers of {}: {}", key, e))?;
        Ok(Some(ResponseSnapshot {
          status,
          headers,
          body,
          captured_at: parse_datetime(&captured_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, store: &str, key: &RequestKey, response: &ResponseSnapshot) -> Result<()> {
    self.put_all(store, &[(key.clone(), response.clone())])
  }

  fn put_all(&self, store: &str, entries: &[(RequestKey, ResponseSnapshot)]) -> Result<()> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_store(&tx, store)?;
    for (key, response) in entries {
      write_entry(&tx, store, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn entry_count(&self, store: &str) -> Result<usize> {
    let conn = self.db.conn()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE store = ?",
        params![store],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", store, e))?;

    Ok(count as usize)
  }
}
