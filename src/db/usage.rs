//! Per-minute usage rows.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::format_ts;

pub struct UsageRepository;

impl UsageRepository {
    /// Insert one usage minute. A second insert for the same (session, minute) is
    /// ignored by the primary key. Returns whether a row was added.
    pub fn insert_minute(
        conn: &Connection,
        session_id: &str,
        minute: DateTime<Utc>,
        seconds_recorded: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO usage_records \
                 (session_id, minute_timestamp, seconds_recorded, recorded_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![session_id, format_ts(&minute), seconds_recorded, format_ts(&now)],
            )
            .context("Failed to insert usage minute")?;
        Ok(inserted == 1)
    }

    pub fn count_minutes(conn: &Connection, session_id: &str) -> Result<i64> {
        conn.query_row(
            "SELECT COUNT(*) FROM usage_records WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )
        .context("Failed to count usage minutes")
    }

    pub fn total_seconds(conn: &Connection, session_id: &str) -> Result<i64> {
        conn.query_row(
            "SELECT COALESCE(SUM(seconds_recorded), 0) FROM usage_records WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )
        .context("Failed to sum usage seconds")
    }
}
