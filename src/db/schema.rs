/// Schema applied on every open. All statements are idempotent.
pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- One row per named cache store (one per version tag)
CREATE TABLE IF NOT EXISTS cache_stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);

-- Store of the last version that finished activating; serves while a newer
-- version is installing or after its install failed
CREATE TABLE IF NOT EXISTS active_store (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    name TEXT NOT NULL,
    activated_at TEXT NOT NULL
);

-- Response snapshots keyed by normalized (method, url)
CREATE TABLE IF NOT EXISTS cache_entries (
    store TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    captured_at TEXT NOT NULL,
    PRIMARY KEY (store, method, url),
    FOREIGN KEY (store) REFERENCES cache_stores(name) ON DELETE CASCADE
);

-- Deferred requests awaiting replay; id order is FIFO order
CREATE TABLE IF NOT EXISTS queued_actions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tag TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    navigate INTEGER NOT NULL DEFAULT 0,
    enqueued_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_queued_actions_tag ON queued_actions(tag, id);

-- Periodic refresh registrations
CREATE TABLE IF NOT EXISTS periodic_tasks (
    tag TEXT PRIMARY KEY,
    min_interval_secs INTEGER NOT NULL,
    registered_at TEXT NOT NULL,
    last_run TEXT
);

-- One-off sync registrations awaiting a connectivity trigger
CREATE TABLE IF NOT EXISTS sync_registrations (
    tag TEXT PRIMARY KEY,
    registered_at TEXT NOT NULL
);
"#;

/// Parse a timestamp written by this crate (RFC 3339).
pub fn parse_datetime(s: &str) -> color_eyre::Result<chrono::DateTime<chrono::Utc>> {
  chrono::DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&chrono::Utc))
    .map_err(|e| color_eyre::eyre::eyre!("Failed to parse datetime '{}': {}", s, e))
}
