//! Small durable key-value store for app-level state.
//!
//! Holds the remembered app version, the auth session, and one-time notice
//! flags. The full-reset path prunes everything here except the auth session
//! and the offline image notice, so a repair never logs the user out.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// Key under which the locally remembered app version lives.
pub const APP_VERSION_KEY: &str = "app_version";

/// Keys with this prefix hold the auth session and survive a full reset.
pub const AUTH_SESSION_PREFIX: &str = "session-";

/// One-time flag for the offline image notice; survives a full reset.
pub const IMAGE_NOTICE_KEY: &str = "offline_image_notice_shown";

/// SQLite-backed preference store.
pub struct Prefs {
  conn: Mutex<Connection>,
}

impl Prefs {
  /// Open or create the preference store at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create prefs directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open prefs at {}: {}", path.display(), e))?;

    let prefs = Self {
      conn: Mutex::new(conn),
    };
    prefs.run_migrations()?;

    Ok(prefs)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(
        "CREATE TABLE IF NOT EXISTS prefs (
           key TEXT PRIMARY KEY,
           value TEXT NOT NULL
         );",
      )
      .map_err(|e| eyre!("Failed to run prefs migrations: {}", e))?;

    Ok(())
  }

  pub fn get(&self, key: &str) -> Result<Option<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let value = conn
      .query_row("SELECT value FROM prefs WHERE key = ?", params![key], |row| {
        row.get(0)
      })
      .optional()
      .map_err(|e| eyre!("Failed to read pref {}: {}", key, e))?;

    Ok(value)
  }

  pub fn set(&self, key: &str, value: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO prefs (key, value) VALUES (?, ?)",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write pref {}: {}", key, e))?;

    Ok(())
  }

  pub fn remove(&self, key: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM prefs WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to remove pref {}: {}", key, e))?;

    Ok(())
  }

  pub fn keys(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT key FROM prefs ORDER BY key")
      .map_err(|e| eyre!("Failed to prepare key listing: {}", e))?;

    let keys = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list pref keys: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(keys)
  }

  /// Remove every key except those matching a preserved prefix or exact name.
  /// Returns the number of keys removed.
  pub fn clear_except(&self, keep_prefixes: &[&str], keep_keys: &[&str]) -> Result<usize> {
    let keys = self.keys()?;
    let mut removed = 0;

    for key in keys {
      let preserved = keep_keys.contains(&key.as_str())
        || keep_prefixes.iter().any(|prefix| key.starts_with(prefix));
      if !preserved {
        self.remove(&key)?;
        removed += 1;
      }
    }

    Ok(removed)
  }
}
