//! Durable local store for full article content.
//!
//! Articles are pulled in on explicit user download and evicted only on
//! explicit removal or a full clear. There is no size or age based eviction.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

/// A saved article as the backend returns it, plus the local cache timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
  /// Backend-assigned identifier, unique and stable
  pub id: String,
  pub title: String,
  #[serde(default)]
  pub byline: Option<String>,
  #[serde(default)]
  pub site: Option<String>,
  pub created_at: DateTime<Utc>,
  /// Full serialized markup. List-view metadata alone leaves this empty.
  #[serde(default)]
  pub content: Option<String>,
  /// When the full copy landed in the local store
  #[serde(default)]
  pub cached_at: Option<DateTime<Utc>>,
}

impl ArticleRecord {
  /// A record is fully downloaded iff content is present and non-empty.
  pub fn is_fully_downloaded(&self) -> bool {
    self.content.as_deref().is_some_and(|c| !c.is_empty())
  }
}

/// Aggregate numbers for the offline store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
  pub count: usize,
  pub total_bytes: u64,
}

impl StoreStats {
  pub fn size_formatted(&self) -> String {
    format_bytes(self.total_bytes)
  }
}

/// SQLite-backed article store.
pub struct ArticleStore {
  conn: Mutex<Connection>,
}

impl ArticleStore {
  /// Open or create the article store at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create store directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open article store at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Run migrations. Additive only: a version bump may add stores or indexes
  /// but never drops existing rows.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(ARTICLE_SCHEMA)
      .map_err(|e| eyre!("Failed to run article store migrations: {}", e))?;

    Ok(())
  }

  /// Insert or overwrite a record by id, stamping `cached_at` if absent.
  /// A single statement, so the write is atomic.
  pub fn put(&self, record: &ArticleRecord) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let cached_at = record.cached_at.unwrap_or_else(Utc::now);

    conn
      .execute(
        "INSERT OR REPLACE INTO articles
           (id, title, byline, site, created_at, content, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
          record.id,
          record.title,
          record.byline,
          record.site,
          record.created_at.to_rfc3339(),
          record.content,
          cached_at.to_rfc3339(),
        ],
      )
      .map_err(|e| eyre!("Failed to store article {}: {}", record.id, e))?;

    Ok(())
  }

  /// Fetch a record by id. Absence is `Ok(None)`, never an error.
  pub fn get(&self, id: &str) -> Result<Option<ArticleRecord>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT id, title, byline, site, created_at, content, cached_at
         FROM articles WHERE id = ?",
      )
      .map_err(|e| eyre!("Failed to prepare article lookup: {}", e))?;

    let record = stmt
      .query_row(params![id], row_to_record)
      .optional()
      .map_err(|e| eyre!("Failed to fetch article {}: {}", id, e))?;

    Ok(record)
  }

  /// All records, newest first by creation timestamp.
  pub fn list(&self) -> Result<Vec<ArticleRecord>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT id, title, byline, site, created_at, content, cached_at
         FROM articles ORDER BY created_at DESC",
      )
      .map_err(|e| eyre!("Failed to prepare article listing: {}", e))?;

    let records = stmt
      .query_map([], row_to_record)
      .map_err(|e| eyre!("Failed to list articles: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(records)
  }

  /// Remove a record. Idempotent: a missing id is not an error.
  pub fn delete(&self, id: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM articles WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete article {}: {}", id, e))?;

    Ok(())
  }

  /// True iff a record exists and its content is non-empty. Drives the
  /// download-vs-remove affordance in the UI.
  pub fn is_fully_available(&self, id: &str) -> Result<bool> {
    Ok(
      self
        .get(id)?
        .map(|record| record.is_fully_downloaded())
        .unwrap_or(false),
    )
  }

  /// Remove all records.
  pub fn clear(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM articles", [])
      .map_err(|e| eyre!("Failed to clear article store: {}", e))?;

    Ok(())
  }

  /// Count and approximate content size of the offline store.
  pub fn stats(&self) -> Result<StoreStats> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let (count, total_bytes): (usize, u64) = conn
      .query_row(
        "SELECT COUNT(*), COALESCE(SUM(LENGTH(content)), 0) FROM articles",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .map_err(|e| eyre!("Failed to compute store stats: {}", e))?;

    Ok(StoreStats { count, total_bytes })
  }
}

/// Schema for the article store. Migrations are additive only.
const ARTICLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS articles (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    byline TEXT,
    site TEXT,
    created_at TEXT NOT NULL,
    content TEXT,
    cached_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_articles_created ON articles(created_at);
"#;

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ArticleRecord> {
  let created_at: String = row.get(4)?;
  let cached_at: String = row.get(6)?;

  Ok(ArticleRecord {
    id: row.get(0)?,
    title: row.get(1)?,
    byline: row.get(2)?,
    site: row.get(3)?,
    created_at: parse_timestamp(&created_at, 4)?,
    content: row.get(5)?,
    cached_at: Some(parse_timestamp(&cached_at, 6)?),
  })
}

fn parse_timestamp(s: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| {
      rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Human-readable byte count, e.g. "1.5 MB".
pub fn format_bytes(bytes: u64) -> String {
  const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

  if bytes == 0 {
    return "0 B".to_string();
  }

  let mut value = bytes as f64;
  let mut unit = 0;
  while value >= 1024.0 && unit < UNITS.len() - 1 {
    value /= 1024.0;
    unit += 1;
  }

  if unit == 0 {
    format!("{} {}", bytes, UNITS[unit])
  } else {
    format!("{:.2} {}", value, UNITS[unit])
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn open_temp() -> (tempfile::TempDir, ArticleStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = ArticleStore::open_at(&dir.path().join("articles.db")).unwrap();
    (dir, store)
  }

  fn article(id: &str, content: Option<&str>) -> ArticleRecord {
    ArticleRecord {
      id: id.to_string(),
      title: format!("Article {}", id),
      byline: Some("A. Writer".to_string()),
      site: Some("example.com".to_string()),
      created_at: Utc::now(),
      content: content.map(String::from),
      cached_at: Some(Utc::now()),
    }
  }

  #[test]
  fn put_then_get_returns_equal_record() {
    let (_dir, store) = open_temp();
    let record = article("a1", Some("<p>body</p>"));

    store.put(&record).unwrap();
    let found = store.get("a1").unwrap().unwrap();
    assert_eq!(found, record);
  }

  #[test]
  fn put_stamps_cached_at_when_absent() {
    let (_dir, store) = open_temp();
    let mut record = article("a1", Some("<p>body</p>"));
    record.cached_at = None;

    store.put(&record).unwrap();
    let found = store.get("a1").unwrap().unwrap();
    assert!(found.cached_at.is_some());
  }

  #[test]
  fn get_absent_is_none_not_error() {
    let (_dir, store) = open_temp();
    assert!(store.get("nope").unwrap().is_none());
  }

  #[test]
  fn fully_available_iff_content_non_empty() {
    let (_dir, store) = open_temp();

    store.put(&article("full", Some("<p>text</p>"))).unwrap();
    store.put(&article("empty", Some(""))).unwrap();
    store.put(&article("meta", None)).unwrap();

    assert!(store.is_fully_available("full").unwrap());
    assert!(!store.is_fully_available("empty").unwrap());
    assert!(!store.is_fully_available("meta").unwrap());
    assert!(!store.is_fully_available("absent").unwrap());
  }

  #[test]
  fn delete_is_idempotent() {
    let (_dir, store) = open_temp();
    store.put(&article("a1", Some("x"))).unwrap();

    store.delete("a1").unwrap();
    assert!(store.get("a1").unwrap().is_none());

    // Deleting again, or deleting something that never existed, is fine
    store.delete("a1").unwrap();
    store.delete("never-there").unwrap();
  }

  #[test]
  fn list_orders_newest_first() {
    let (_dir, store) = open_temp();

    let mut older = article("old", None);
    older.created_at = Utc::now() - chrono::Duration::days(2);
    let mut newer = article("new", None);
    newer.created_at = Utc::now();

    store.put(&older).unwrap();
    store.put(&newer).unwrap();

    let listed = store.list().unwrap();
    let ids: Vec<&str> = listed.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["new", "old"]);
  }

  #[test]
  fn clear_removes_everything() {
    let (_dir, store) = open_temp();
    store.put(&article("a1", Some("x"))).unwrap();
    store.put(&article("a2", Some("y"))).unwrap();

    store.clear().unwrap();
    assert!(store.list().unwrap().is_empty());
  }

  #[test]
  fn stats_counts_content_bytes() {
    let (_dir, store) = open_temp();
    store.put(&article("a1", Some("12345"))).unwrap();
    store.put(&article("a2", None)).unwrap();

    let stats = store.stats().unwrap();
    assert_eq!(stats.count, 2);
    assert_eq!(stats.total_bytes, 5);
  }

  #[test]
  fn format_bytes_picks_unit() {
    assert_eq!(format_bytes(0), "0 B");
    assert_eq!(format_bytes(512), "512 B");
    assert_eq!(format_bytes(1536), "1.50 KB");
    assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MB");
  }
}
