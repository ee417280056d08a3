//! Durable storage for forwarded signals and per-target watermarks.
//!
//! The ledger reads the whole seen set once at startup and appends one row per
//! newly forwarded signal. Watermarks are upserted after each processed item,
//! and every item that produced a new signal is archived as an alert.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{Connection, params};
use tracing::info;

use crate::error::StoreError;
use crate::types::{AlertRecord, ItemId, SignalKind};

pub trait SignalStore: Send + Sync {
    /// Every ledger key ever appended.
    fn load_seen(&self) -> Result<HashSet<String>, StoreError>;

    /// Record a forwarded signal. Appending an existing key is a no-op.
    fn append_seen(&self, key: &str, kind: SignalKind, value: &str) -> Result<(), StoreError>;

    fn load_watermarks(&self) -> Result<HashMap<String, ItemId>, StoreError>;

    fn save_watermark(&self, target: &str, id: &ItemId) -> Result<(), StoreError>;

    fn append_alert(&self, alert: &AlertRecord) -> Result<(), StoreError>;

    fn alert_count(&self) -> Result<u64, StoreError>;
}

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn, &path.display().to_string())
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, ":memory:")
    }

    fn init(conn: Connection, label: &str) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS seen_signals (
                key         TEXT PRIMARY KEY,
                kind        TEXT NOT NULL,
                value       TEXT NOT NULL,
                recorded_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS watermarks (
                target     TEXT PRIMARY KEY,
                item_id    TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS alerts (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                detected_at  INTEGER NOT NULL,
                target       TEXT NOT NULL,
                item_id      TEXT NOT NULL,
                published_at INTEGER,
                text         TEXT NOT NULL,
                permalink    TEXT NOT NULL,
                addresses    TEXT NOT NULL,
                keywords     TEXT NOT NULL
            );",
        )?;
        info!(store = label, "Signal store ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl SignalStore for SqliteStore {
    fn load_seen(&self) -> Result<HashSet<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key FROM seen_signals")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut seen = HashSet::new();
        for key in rows {
            seen.insert(key?);
        }
        Ok(seen)
    }

    fn append_seen(&self, key: &str, kind: SignalKind, value: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO seen_signals (key, kind, value, recorded_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![key, kind.as_str(), value, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    fn load_watermarks(&self) -> Result<HashMap<String, ItemId>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT target, item_id FROM watermarks")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut marks = HashMap::new();
        for row in rows {
            let (target, raw) = row?;
            let id = ItemId::parse(&raw)
                .map_err(|_| StoreError::Corrupt(format!("watermark for {target}: {raw:?}")))?;
            marks.insert(target, id);
        }
        Ok(marks)
    }

    fn save_watermark(&self, target: &str, id: &ItemId) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO watermarks (target, item_id, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(target) DO UPDATE SET
                item_id = excluded.item_id,
                updated_at = excluded.updated_at",
            params![target, id.to_string(), Utc::now().timestamp()],
        )?;
        Ok(())
    }

    fn append_alert(&self, alert: &AlertRecord) -> Result<(), StoreError> {
        let addresses = serde_json::to_string(&alert.addresses)?;
        let keywords = serde_json::to_string(&alert.keywords)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO alerts
                (detected_at, target, item_id, published_at, text, permalink, addresses, keywords)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                alert.detected_at.timestamp(),
                alert.target,
                alert.item_id,
                alert.published_at.map(|t| t.timestamp()),
                alert.text,
                alert.permalink,
                addresses,
                keywords,
            ],
        )?;
        Ok(())
    }

    fn alert_count(&self) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }
}

/// Volatile store for dry runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    seen: Mutex<HashSet<String>>,
    watermarks: Mutex<HashMap<String, ItemId>>,
    alerts: Mutex<Vec<AlertRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<AlertRecord> {
        self.alerts.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

impl SignalStore for MemoryStore {
    fn load_seen(&self) -> Result<HashSet<String>, StoreError> {
        Ok(self.seen.lock().map_err(|_| StoreError::Poisoned)?.clone())
    }

    fn append_seen(&self, key: &str, _kind: SignalKind, _value: &str) -> Result<(), StoreError> {
        self.seen
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .insert(key.to_string());
        Ok(())
    }

    fn load_watermarks(&self) -> Result<HashMap<String, ItemId>, StoreError> {
        Ok(self.watermarks.lock().map_err(|_| StoreError::Poisoned)?.clone())
    }

    fn save_watermark(&self, target: &str, id: &ItemId) -> Result<(), StoreError> {
        self.watermarks
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .insert(target.to_string(), id.clone());
        Ok(())
    }

    fn append_alert(&self, alert: &AlertRecord) -> Result<(), StoreError> {
        self.alerts
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .push(alert.clone());
        Ok(())
    }

    fn alert_count(&self) -> Result<u64, StoreError> {
        Ok(self.alerts.lock().map_err(|_| StoreError::Poisoned)?.len() as u64)
    }
}
