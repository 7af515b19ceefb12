use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::StoreError;
use crate::models::{Currency, Settings};

/// String-keyed durable storage. The receipt store keeps its whole
/// collection as one serialized value under a single key.
pub trait KeyValueStore: Send {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set_item(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let mut db = Database { conn };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&mut self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL
            );",
        )?;

        let migrations = vec![
            (
                "001_create_kv_store.sql",
                include_str!(concat!(
                    env!("CARGO_MANIFEST_DIR"),
                    "/migrations/001_create_kv_store.sql"
                )),
            ),
            (
                "002_create_settings.sql",
                include_str!(concat!(
                    env!("CARGO_MANIFEST_DIR"),
                    "/migrations/002_create_settings.sql"
                )),
            ),
        ];

        for (name, sql) in migrations {
            let applied: Option<String> = self
                .conn
                .query_row(
                    "SELECT name FROM schema_migrations WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;

            if applied.is_none() {
                let tx = self.conn.transaction()?;
                tx.execute_batch(sql)?;
                tx.execute(
                    "INSERT INTO schema_migrations (name, applied_at) VALUES (?1, datetime('now'))",
                    params![name],
                )?;
                tx.commit()?;
                tracing::debug!(migration = name, "Applied migration");
            }
        }

        Ok(())
    }

    pub fn get_value(&self, key: &str) -> rusqlite::Result<Option<String>> {
        let mut stmt = self.conn.prepare("SELECT value FROM kv_store WHERE key = ?1")?;
        stmt.query_row(params![key], |row| row.get(0)).optional()
    }

    pub fn put_value(&self, key: &str, value: &str) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?1, ?2, datetime('now'))",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn set_setting(&self, key: &str, value: &str) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?1, ?2, datetime('now'))",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> rusqlite::Result<Option<String>> {
        let mut stmt = self.conn.prepare("SELECT value FROM settings WHERE key = ?1")?;
        stmt.query_row(params![key], |row| row.get(0)).optional()
    }

    /// Reads persisted settings, falling back to defaults for anything
    /// missing or unreadable.
    pub fn load_settings(&self) -> Settings {
        let defaults = Settings::default();
        let default_currency = self
            .get_setting("default_currency")
            .ok()
            .flatten()
            .and_then(|code| code.parse::<Currency>().ok())
            .unwrap_or(defaults.default_currency);
        let gemini_model = self
            .get_setting("gemini_model")
            .ok()
            .flatten()
            .filter(|model| !model.trim().is_empty())
            .unwrap_or(defaults.gemini_model);
        Settings {
            default_currency,
            gemini_model,
        }
    }
}

impl KeyValueStore for Database {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.get_value(key)?)
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        Ok(self.put_value(key, value)?)
    }
}

/// Process-local key-value storage. Clones share the same contents, so a
/// caller can keep a handle after boxing one into a store.
#[derive(Clone, Default)]
pub struct MemoryKeyValueStore {
    items: Arc<Mutex<HashMap<String, String>>>,
    writes: Arc<AtomicUsize>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful writes so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.items.lock().ok().and_then(|items| items.get(key).cloned())
    }

    pub fn insert_raw(&self, key: &str, value: &str) {
        if let Ok(mut items) = self.items.lock() {
            items.insert(key.to_string(), value.to_string());
        }
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        let items = self.items.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(items.get(key).cloned())
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("quota exceeded".to_string()));
        }
        let mut items = self.items.lock().map_err(|_| StoreError::LockPoisoned)?;
        items.insert(key.to_string(), value.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("receipts.sqlite");
        {
            let db = Database::new(path.clone()).unwrap();
            db.put_value("savedReceipts", "[]").unwrap();
        }
        let db = Database::new(path).unwrap();
        assert_eq!(db.get_value("savedReceipts").unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn put_value_overwrites() {
        let mut db = Database::open_in_memory().unwrap();
        db.set_item("k", "one").unwrap();
        db.set_item("k", "two").unwrap();
        assert_eq!(db.get_item("k").unwrap().as_deref(), Some("two"));
        assert_eq!(db.get_item("missing").unwrap(), None);
    }

    #[test]
    fn settings_fall_back_to_defaults() {
        let db = Database::open_in_memory().unwrap();
        db.set_setting("default_currency", "bogus").unwrap();
        let settings = db.load_settings();
        assert_eq!(settings.default_currency, Currency::USD);
        assert_eq!(settings.gemini_model, "gemini-2.5-flash");

        db.set_setting("default_currency", "gbp").unwrap();
        db.set_setting("gemini_model", "gemini-2.0-flash").unwrap();
        let settings = db.load_settings();
        assert_eq!(settings.default_currency, Currency::GBP);
        assert_eq!(settings.gemini_model, "gemini-2.0-flash");
    }

    #[test]
    fn memory_store_can_refuse_writes() {
        let handle = MemoryKeyValueStore::new();
        let mut store = handle.clone();
        store.set_item("k", "v").unwrap();
        handle.set_fail_writes(true);
        assert!(store.set_item("k", "w").is_err());
        assert_eq!(handle.raw("k").as_deref(), Some("v"));
        assert_eq!(handle.writes(), 1);
    }
}
