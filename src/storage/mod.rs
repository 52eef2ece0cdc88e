//! Persistence for reconciled inventory and saved searches.
//!
//! A single SQLite database holds two tables:
//!
//! ```text
//! items          one row per (location_id, make, model, year, row_number)
//!                + first_seen / last_seen / status / session_id / notes
//! subscriptions  owner + normalized filter tuple (unique) + audit timestamps
//! job_state      named timestamps, e.g. the last successful NEW broadcast
//! ```
//!
//! All writers go through [`InventoryStore`]; nothing else mutates rows.
//! Statements that hit SQLITE_BUSY or SQLITE_LOCKED are retried with a
//! fixed backoff before the error is surfaced.

mod inventory;
mod subscriptions;

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode};

use crate::error::{AppError, Result};
use crate::models::StoreConfig;

pub use inventory::{SweepScope, UpsertOutcome};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    location_id INTEGER NOT NULL,
    make        TEXT NOT NULL,
    model       TEXT NOT NULL,
    year        INTEGER NOT NULL,
    row_number  INTEGER NOT NULL,
    first_seen  TEXT NOT NULL,
    last_seen   TEXT NOT NULL,
    status      TEXT NOT NULL,
    session_id  TEXT NOT NULL,
    notes       TEXT NOT NULL DEFAULT '',
    UNIQUE (location_id, make, model, year, row_number)
);

CREATE INDEX IF NOT EXISTS idx_items_location_session
    ON items (location_id, session_id);

CREATE INDEX IF NOT EXISTS idx_items_status
    ON items (status);

CREATE TABLE IF NOT EXISTS subscriptions (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    owner         TEXT NOT NULL,
    location      TEXT NOT NULL,
    make          TEXT NOT NULL DEFAULT 'ANY',
    model         TEXT NOT NULL DEFAULT 'ANY',
    year_filter   TEXT NOT NULL DEFAULT 'ANY',
    status        TEXT NOT NULL,
    notes         TEXT NOT NULL DEFAULT '',
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    last_notified TEXT,
    UNIQUE (owner, location, make, model, year_filter, status)
);

CREATE INDEX IF NOT EXISTS idx_subscriptions_owner
    ON subscriptions (owner);

CREATE TABLE IF NOT EXISTS job_state (
    name TEXT PRIMARY KEY,
    at   TEXT NOT NULL
);
"#;

/// Bounded retry on lock contention.
#[derive(Debug, Clone, Copy)]
struct BusyRetry {
    retries: u32,
    backoff: Duration,
}

impl From<&StoreConfig> for BusyRetry {
    fn from(config: &StoreConfig) -> Self {
        Self {
            retries: config.busy_retries,
            backoff: Duration::from_millis(config.busy_backoff_ms),
        }
    }
}

/// SQLite-backed reconciliation and subscription store.
///
/// Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct InventoryStore {
    conn: Arc<Mutex<Connection>>,
    retry: BusyRetry,
}

impl InventoryStore {
    /// Open (or create) the database file and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>, config: &StoreConfig) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        let journal_mode: String =
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        if !journal_mode.eq_ignore_ascii_case("wal") {
            log::warn!(
                "SQLite kept journal_mode={} for {}",
                journal_mode,
                path.display()
            );
        }

        log::info!("Inventory store opened at {}", path.display());
        Self::with_connection(conn, config)
    }

    /// In-memory store, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, &StoreConfig::default())
    }

    fn with_connection(conn: Connection, config: &StoreConfig) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            retry: BusyRetry::from(config),
        })
    }

    /// Run `op` against the connection, retrying on lock contention.
    fn with_conn<T, F>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|_| AppError::storage("connection mutex poisoned"))?;

        let mut attempt = 0;
        loop {
            match op(&*conn) {
                Err(AppError::Sql(err)) if is_busy(&err) && attempt < self.retry.retries => {
                    attempt += 1;
                    log::debug!(
                        "{label}: database busy, retry {attempt}/{}",
                        self.retry.retries
                    );
                    thread::sleep(self.retry.backoff);
                }
                other => return other,
            }
        }
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// Fixed-precision RFC 3339 so lexical order equals time order.
fn to_db_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn from_db_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_db_time_roundtrip_and_order() {
        let early = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let late = early + chrono::Duration::milliseconds(1500);
        let (a, b) = (to_db_time(early), to_db_time(late));
        assert_eq!(a, "2026-01-02T03:04:05.000Z");
        assert!(a < b);
        assert_eq!(from_db_time(0, &b).unwrap(), late);
    }

    #[test]
    fn test_busy_classification() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        let constraint = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            None,
        );
        assert!(is_busy(&busy));
        assert!(!is_busy(&constraint));
        assert!(is_constraint_violation(&constraint));
    }

    #[test]
    fn test_busy_retry_gives_up() {
        let store = InventoryStore::open_in_memory().unwrap();
        let mut calls = 0;
        let result: Result<()> = store.with_conn("test", |_| {
            calls += 1;
            Err(AppError::Sql(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                None,
            )))
        });
        assert!(result.is_err());
        assert_eq!(calls, 6);
    }

    #[test]
    fn test_open_file_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("inventory.db");
        let store = InventoryStore::open(&path, &StoreConfig::default()).unwrap();
        assert!(path.exists());
        assert_eq!(store.latest_refresh().unwrap(), None);
    }
}
