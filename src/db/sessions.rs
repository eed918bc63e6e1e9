//! Session record persistence.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::schemas::SessionRecord;
use super::{format_ts, required_ts_column, ts_column};
use crate::lifecycle::status::SessionStatus;

const SESSION_COLUMNS: &str = "id, status, bot_id, recording_started_at, recording_ended_at, \
     billable_minutes, billable_amount, billing_source, summary, transcript, finalized_at, \
     archived_at, created_at, updated_at";

fn map_session(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    let status: String = row.get(1)?;
    let status = SessionStatus::parse(&status).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, e.into())
    })?;

    Ok(SessionRecord {
        id: row.get(0)?,
        status,
        bot_id: row.get(2)?,
        recording_started_at: ts_column(row, 3)?,
        recording_ended_at: ts_column(row, 4)?,
        billable_minutes: row.get(5)?,
        billable_amount: row.get(6)?,
        billing_source: row.get(7)?,
        summary: row.get(8)?,
        transcript: row.get(9)?,
        finalized_at: ts_column(row, 10)?,
        archived_at: ts_column(row, 11)?,
        created_at: required_ts_column(row, 12)?,
        updated_at: required_ts_column(row, 13)?,
    })
}

/// Repository for session records.
pub struct SessionRepository;

impl SessionRepository {
    /// Insert a new session in the `created` state.
    pub fn insert(conn: &Connection, id: &str, now: DateTime<Utc>) -> Result<()> {
        let now = format_ts(&now);
        conn.execute(
            "INSERT INTO sessions (id, status, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            params![id, SessionStatus::Created.as_str(), now],
        )
        .context("Failed to insert session")?;
        Ok(())
    }

    pub fn get(conn: &Connection, id: &str) -> Result<Option<SessionRecord>> {
        let sql = format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS);
        conn.query_row(&sql, params![id], map_session)
            .optional()
            .context("Failed to query session")
    }

    /// List sessions, newest first.
    pub fn list(conn: &Connection, limit: usize) -> Result<Vec<SessionRecord>> {
        let sql = format!(
            "SELECT {} FROM sessions WHERE archived_at IS NULL \
             ORDER BY created_at DESC, id DESC LIMIT ?1",
            SESSION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql).context("Failed to prepare sessions list query")?;
        let rows = stmt
            .query_map(params![limit as i64], map_session)
            .context("Failed to list sessions")?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    pub fn set_bot(conn: &Connection, id: &str, bot_id: &str, now: DateTime<Utc>) -> Result<()> {
        conn.execute(
            "UPDATE sessions SET bot_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![bot_id, format_ts(&now), id],
        )
        .context("Failed to attach bot to session")?;
        Ok(())
    }

    /// `created -> active`, stamping the recording start if it is not already set.
    /// Returns whether a row changed.
    pub fn mark_active(
        conn: &Connection,
        id: &str,
        started_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let changed = conn
            .execute(
                "UPDATE sessions SET status = ?1, \
                 recording_started_at = COALESCE(recording_started_at, ?2), updated_at = ?3 \
                 WHERE id = ?4 AND status = ?5",
                params![
                    SessionStatus::Active.as_str(),
                    format_ts(&started_at),
                    format_ts(&now),
                    id,
                    SessionStatus::Created.as_str(),
                ],
            )
            .context("Failed to mark session active")?;
        Ok(changed == 1)
    }

    /// Record the recording start without touching status.
    pub fn stamp_started(conn: &Connection, id: &str, started_at: DateTime<Utc>) -> Result<()> {
        conn.execute(
            "UPDATE sessions SET recording_started_at = COALESCE(recording_started_at, ?1) \
             WHERE id = ?2",
            params![format_ts(&started_at), id],
        )
        .context("Failed to stamp session start")?;
        Ok(())
    }

    /// Claim the stop step: `created|active -> stopping`, or take over a
    /// `stopping` session whose last update is older than `stale_before`.
    /// Returns whether this caller now owns the stop.
    pub fn begin_stopping(
        conn: &Connection,
        id: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        let changed = conn
            .execute(
                "UPDATE sessions SET status = ?1, updated_at = ?2 \
                 WHERE id = ?3 AND (status IN ('created', 'active') \
                 OR (status = ?1 AND updated_at < ?4))",
                params![
                    SessionStatus::Stopping.as_str(),
                    format_ts(&now),
                    id,
                    format_ts(&stale_before)
                ],
            )
            .context("Failed to mark session stopping")?;
        Ok(changed == 1)
    }

    /// Move a non-terminal session into `completed` or `failed`.
    ///
    /// `recording_ended_at` is set in the same statement so the invariant
    /// "ended_at set iff terminal" holds for every committed row. An existing end
    /// time is kept. Returns whether a row changed.
    pub fn mark_terminal(
        conn: &Connection,
        id: &str,
        status: SessionStatus,
        ended_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        anyhow::ensure!(
            status.is_terminal(),
            "mark_terminal called with non-terminal status {}",
            status.as_str()
        );
        let changed = conn
            .execute(
                "UPDATE sessions SET status = ?1, \
                 recording_ended_at = COALESCE(recording_ended_at, ?2), updated_at = ?3 \
                 WHERE id = ?4 AND status IN ('created', 'active', 'stopping')",
                params![status.as_str(), format_ts(&ended_at), format_ts(&now), id],
            )
            .context("Failed to mark session terminal")?;
        Ok(changed == 1)
    }

    pub fn set_billing(
        conn: &Connection,
        id: &str,
        billable_minutes: i64,
        billable_amount: i64,
        source: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        conn.execute(
            "UPDATE sessions SET billable_minutes = ?1, billable_amount = ?2, billing_source = ?3, \
             updated_at = ?4 WHERE id = ?5",
            params![billable_minutes, billable_amount, source, format_ts(&now), id],
        )
        .context("Failed to store session billing")?;
        Ok(())
    }

    /// Set the finalized marker together with the summary output.
    pub fn mark_finalized(
        conn: &Connection,
        id: &str,
        summary: &str,
        transcript: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let now = format_ts(&now);
        let changed = conn
            .execute(
                "UPDATE sessions SET summary = ?1, transcript = ?2, finalized_at = ?3, updated_at = ?3 \
                 WHERE id = ?4 AND finalized_at IS NULL",
                params![summary, transcript, now, id],
            )
            .context("Failed to finalize session")?;
        Ok(changed == 1)
    }

    /// Claim the summary step for an unfinalized session. A claim older than
    /// `stale_before` is considered abandoned and can be taken over.
    pub fn claim_summary(
        conn: &Connection,
        id: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        let changed = conn
            .execute(
                "UPDATE sessions SET summary_started_at = ?1 \
                 WHERE id = ?2 AND finalized_at IS NULL \
                 AND (summary_started_at IS NULL OR summary_started_at < ?3)",
                params![format_ts(&now), id, format_ts(&stale_before)],
            )
            .context("Failed to claim session summary")?;
        Ok(changed == 1)
    }

    /// Drop a summary claim after a failed attempt so the next one can run.
    pub fn release_summary(conn: &Connection, id: &str) -> Result<()> {
        conn.execute(
            "UPDATE sessions SET summary_started_at = NULL WHERE id = ?1 AND finalized_at IS NULL",
            params![id],
        )
        .context("Failed to release session summary claim")?;
        Ok(())
    }

    /// Soft-archive. Sessions are never deleted.
    pub fn archive(conn: &Connection, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let now = format_ts(&now);
        let changed = conn
            .execute(
                "UPDATE sessions SET archived_at = ?1, updated_at = ?1 \
                 WHERE id = ?2 AND archived_at IS NULL",
                params![now, id],
            )
            .context("Failed to archive session")?;
        Ok(changed == 1)
    }

    /// Completed sessions still waiting for a successful summary.
    pub fn list_unfinalized(conn: &Connection, limit: usize) -> Result<Vec<SessionRecord>> {
        let sql = format!(
            "SELECT {} FROM sessions WHERE status = 'completed' AND finalized_at IS NULL \
             AND archived_at IS NULL ORDER BY updated_at ASC LIMIT ?1",
            SESSION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql).context("Failed to prepare unfinalized query")?;
        let rows = stmt
            .query_map(params![limit as i64], map_session)
            .context("Failed to list unfinalized sessions")?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    /// Completed sessions with a bot, most recently updated first, for the recording sync batch.
    pub fn list_completed_with_bot(conn: &Connection, limit: usize) -> Result<Vec<SessionRecord>> {
        let sql = format!(
            "SELECT {} FROM sessions WHERE status = 'completed' AND bot_id IS NOT NULL \
             AND archived_at IS NULL ORDER BY updated_at DESC LIMIT ?1",
            SESSION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql).context("Failed to prepare completed sessions query")?;
        let rows = stmt
            .query_map(params![limit as i64], map_session)
            .context("Failed to list completed sessions")?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }
}
