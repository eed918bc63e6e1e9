//! Bot record persistence.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::schemas::BotRecord;
use super::{format_ts, required_ts_column, ts_column};
use crate::lifecycle::status::BotStatus;

const BOT_COLUMNS: &str =
    "bot_id, session_id, status, vendor_status, last_status_change_at, last_reconciled_at, created_at";

fn map_bot(row: &Row<'_>) -> rusqlite::Result<BotRecord> {
    let status: String = row.get(2)?;
    let status = BotStatus::parse(&status).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
    })?;

    Ok(BotRecord {
        bot_id: row.get(0)?,
        session_id: row.get(1)?,
        status,
        vendor_status: row.get(3)?,
        last_status_change_at: required_ts_column(row, 4)?,
        last_reconciled_at: ts_column(row, 5)?,
        created_at: required_ts_column(row, 6)?,
    })
}

/// Repository for bot records.
pub struct BotRepository;

impl BotRepository {
    /// Insert a bot in the `pending` state.
    pub fn insert(conn: &Connection, bot_id: &str, session_id: &str, now: DateTime<Utc>) -> Result<()> {
        let now = format_ts(&now);
        conn.execute(
            "INSERT INTO bots (bot_id, session_id, status, last_status_change_at, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![bot_id, session_id, BotStatus::Pending.as_str(), now],
        )
        .context("Failed to insert bot")?;
        Ok(())
    }

    pub fn get(conn: &Connection, bot_id: &str) -> Result<Option<BotRecord>> {
        let sql = format!("SELECT {} FROM bots WHERE bot_id = ?1", BOT_COLUMNS);
        conn.query_row(&sql, params![bot_id], map_bot)
            .optional()
            .context("Failed to query bot")
    }

    /// Conditional status write: only succeeds if the stored status still equals `expected`.
    /// Returns whether the row changed.
    pub fn compare_and_set_status(
        conn: &Connection,
        bot_id: &str,
        expected: BotStatus,
        next: BotStatus,
        vendor_status: Option<&str>,
        changed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let changed = conn
            .execute(
                "UPDATE bots SET status = ?1, vendor_status = COALESCE(?2, vendor_status), \
                 last_status_change_at = ?3 WHERE bot_id = ?4 AND status = ?5",
                params![
                    next.as_str(),
                    vendor_status,
                    format_ts(&changed_at),
                    bot_id,
                    expected.as_str(),
                ],
            )
            .context("Failed to update bot status")?;
        Ok(changed == 1)
    }

    /// Remember the latest raw vendor code without changing status.
    pub fn set_vendor_status(conn: &Connection, bot_id: &str, vendor_status: &str) -> Result<()> {
        conn.execute(
            "UPDATE bots SET vendor_status = ?1 WHERE bot_id = ?2",
            params![vendor_status, bot_id],
        )
        .context("Failed to update bot vendor status")?;
        Ok(())
    }

    pub fn mark_reconciled(conn: &Connection, bot_id: &str, at: DateTime<Utc>) -> Result<()> {
        conn.execute(
            "UPDATE bots SET last_reconciled_at = ?1 WHERE bot_id = ?2",
            params![format_ts(&at), bot_id],
        )
        .context("Failed to mark bot reconciled")?;
        Ok(())
    }

    /// Non-terminal bots whose most recent confirmation is older than `cutoff`.
    pub fn find_stale(conn: &Connection, cutoff: DateTime<Utc>, limit: usize) -> Result<Vec<BotRecord>> {
        let sql = format!(
            "SELECT {} FROM bots WHERE status IN ('pending', 'active') \
             AND MAX(last_status_change_at, COALESCE(last_reconciled_at, last_status_change_at)) < ?1 \
             ORDER BY last_status_change_at ASC LIMIT ?2",
            BOT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql).context("Failed to prepare stale bots query")?;
        let rows = stmt
            .query_map(params![format_ts(&cutoff), limit as i64], map_bot)
            .context("Failed to query stale bots")?;

        let mut bots = Vec::new();
        for row in rows {
            bots.push(row?);
        }
        Ok(bots)
    }

    /// Completed bots that finished after `since` and still have no recording row.
    pub fn find_completed_without_recordings(
        conn: &Connection,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<BotRecord>> {
        let sql = format!(
            "SELECT {} FROM bots WHERE status = 'completed' AND last_status_change_at >= ?1 \
             AND NOT EXISTS (SELECT 1 FROM recordings r WHERE r.bot_id = bots.bot_id) \
             ORDER BY last_status_change_at ASC LIMIT ?2",
            BOT_COLUMNS
        );
        let mut stmt = conn
            .prepare(&sql)
            .context("Failed to prepare pending recordings query")?;
        let rows = stmt
            .query_map(params![format_ts(&since), limit as i64], map_bot)
            .context("Failed to query bots without recordings")?;

        let mut bots = Vec::new();
        for row in rows {
            bots.push(row?);
        }
        Ok(bots)
    }
}
