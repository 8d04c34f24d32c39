//! Response cache storage trait and SQLite implementation.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

use super::name::{CacheComponent, CacheName};
use super::response::CachedResponse;

/// Named key→response stores: put / lookup / delete-whole-cache / enumerate.
///
/// Per-key read-your-writes consistency, no cross-key transactional guarantees.
pub trait ResponseCache: Send + Sync {
  /// Store a captured response under the given request key, overwriting any
  /// previous entry. Atomic per key.
  fn put(&self, cache: &CacheName, key: &str, response: &CachedResponse) -> Result<()>;

  /// Look up a response by exact request key.
  fn lookup(&self, cache: &CacheName, key: &str) -> Result<Option<CachedResponse>>;

  /// Delete one whole cache (every key in that component+generation).
  fn delete_cache(&self, cache: &CacheName) -> Result<()>;

  /// Enumerate all cache names that currently hold at least one entry.
  fn list_caches(&self) -> Result<Vec<CacheName>>;
}

/// SQLite-backed response cache.
pub struct SqliteResponseCache {
  conn: Mutex<Connection>,
}

impl SqliteResponseCache {
  /// Open or create the response cache at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open response cache at {}: {}", path.display(), e))?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(RESPONSE_SCHEMA)
      .map_err(|e| eyre!("Failed to run response cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for the response cache. Migrations are additive only.
const RESPONSE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS response_cache (
    component TEXT NOT NULL,
    generation TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (component, generation, request_key)
);

CREATE INDEX IF NOT EXISTS idx_response_cache_name
    ON response_cache(component, generation);
"#;

impl ResponseCache for SqliteResponseCache {
  fn put(&self, cache: &CacheName, key: &str, response: &CachedResponse) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO response_cache
           (component, generation, request_key, status, headers, body, stored_at)
         VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          cache.component.as_str(),
          cache.generation,
          key,
          response.status,
          headers,
          response.body,
        ],
      )
      .map_err(|e| eyre!("Failed to store response for {}: {}", key, e))?;

    Ok(())
  }

  fn lookup(&self, cache: &CacheName, key: &str) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body FROM response_cache
         WHERE component = ? AND generation = ? AND request_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare lookup: {}", e))?;

    let row: Option<(u16, String, Vec<u8>)> = stmt
      .query_row(
        params![cache.component.as_str(), cache.generation, key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .ok();

    match row {
      Some((status, headers, body)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        Ok(Some(CachedResponse {
          status,
          headers,
          body,
        }))
      }
      None => Ok(None),
    }
  }

  fn delete_cache(&self, cache: &CacheName) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM response_cache WHERE component = ? AND generation = ?",
        params![cache.component.as_str(), cache.generation],
      )
      .map_err(|e| eyre!("Failed to delete cache {}: {}", cache.label(), e))?;

    Ok(())
  }

  fn list_caches(&self) -> Result<Vec<CacheName>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT DISTINCT component, generation FROM response_cache")
      .map_err(|e| eyre!("Failed to prepare cache enumeration: {}", e))?;

    let names = stmt
      .query_map([], |row| {
        let component: String = row.get(0)?;
        let generation: String = row.get(1)?;
        Ok((component, generation))
      })
      .map_err(|e| eyre!("Failed to enumerate caches: {}", e))?
      .filter_map(|r| r.ok())
      .filter_map(|(component, generation)| {
        let component = CacheComponent::parse(&component).ok()?;
        Some(CacheName::new(component, generation))
      })
      .collect();

    Ok(names)
  }
}
