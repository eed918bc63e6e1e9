//! SQLite persistence.
//!
//! Raw SQL with rusqlite, no ORM. Each table has a unit-struct repository whose
//! functions take a `&Connection`; [`Database`] owns the shared connection and is
//! what the async components hold on to.

pub mod bots;
pub mod init;
pub mod leases;
pub mod recordings;
pub mod schemas;
pub mod sessions;
pub mod usage;
pub mod webhook_events;


pub use init::{init_db, migrate};
pub use schemas::{BotRecord, RecordingRecord, SessionRecord, WebhookEventRecord};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Shared handle to the engine database.
///
/// Every mutation runs under the connection mutex, so a read-check-write done
/// inside one closure is atomic with respect to every other caller in this process.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open the default database under the data directory.
    pub fn open_default() -> Result<Self> {
        Ok(Self::from_connection(init_db()?))
    }

    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
        let conn = Connection::open(path).context("Failed to open database connection")?;
        migrate(&conn)?;
        Ok(Self::from_connection(conn))
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        migrate(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| anyhow!("Database connection mutex poisoned"))?;
        f(&mut guard)
    }

    /// Same as [`Database::with_conn`] but off the async runtime threads.
    pub async fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.with_conn(f))
            .await
            .context("Database task panicked")?
    }
}

/// Timestamps are stored as RFC 3339 UTC text with second precision so that
/// string comparison in SQL matches chronological order.
pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp in database: {}", raw))
}

/// Read an optional timestamp column inside a rusqlite row mapper.
pub(crate) fn ts_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
            }),
    }
}

/// Read a required timestamp column inside a rusqlite row mapper.
pub(crate) fn required_ts_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    ts_column(row, idx)?.ok_or(rusqlite::Error::InvalidColumnType(
        idx,
        "timestamp".to_string(),
        rusqlite::types::Type::Null,
    ))
}
