//! Recording artifact persistence.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::schemas::RecordingRecord;
use super::{format_ts, required_ts_column, ts_column};

const RECORDING_COLUMNS: &str =
    "recording_id, session_id, bot_id, retrieval_url, expires_at, duration_seconds, resolved_at";

fn map_recording(row: &Row<'_>) -> rusqlite::Result<RecordingRecord> {
    Ok(RecordingRecord {
        recording_id: row.get(0)?,
        session_id: row.get(1)?,
        bot_id: row.get(2)?,
        retrieval_url: row.get(3)?,
        expires_at: ts_column(row, 4)?,
        duration_seconds: row.get(5)?,
        resolved_at: required_ts_column(row, 6)?,
    })
}

/// Whether an upsert created a row or refreshed an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

pub struct RecordingRepository;

impl RecordingRepository {
    /// Insert or refresh a recording keyed by (session_id, bot_id, recording_id).
    pub fn upsert(conn: &Connection, recording: &RecordingRecord) -> Result<UpsertOutcome> {
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM recordings WHERE session_id = ?1 AND bot_id = ?2 AND recording_id = ?3",
                params![recording.session_id, recording.bot_id, recording.recording_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to look up recording")?;

        conn.execute(
            "INSERT INTO recordings \
             (recording_id, session_id, bot_id, retrieval_url, expires_at, duration_seconds, resolved_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(session_id, bot_id, recording_id) DO UPDATE SET \
             retrieval_url = excluded.retrieval_url, expires_at = excluded.expires_at, \
             duration_seconds = COALESCE(excluded.duration_seconds, recordings.duration_seconds), \
             resolved_at = excluded.resolved_at",
            params![
                recording.recording_id,
                recording.session_id,
                recording.bot_id,
                recording.retrieval_url,
                recording.expires_at.as_ref().map(format_ts),
                recording.duration_seconds,
                format_ts(&recording.resolved_at),
            ],
        )
        .context("Failed to upsert recording")?;

        Ok(if existing.is_some() {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        })
    }

    pub fn list_for_bot(conn: &Connection, bot_id: &str) -> Result<Vec<RecordingRecord>> {
        Self::list_where(conn, "bot_id = ?1", bot_id)
    }

    pub fn list_for_session(conn: &Connection, session_id: &str) -> Result<Vec<RecordingRecord>> {
        Self::list_where(conn, "session_id = ?1", session_id)
    }

    fn list_where(conn: &Connection, filter: &str, value: &str) -> Result<Vec<RecordingRecord>> {
        let sql = format!(
            "SELECT {} FROM recordings WHERE {} ORDER BY resolved_at ASC, id ASC",
            RECORDING_COLUMNS, filter
        );
        let mut stmt = conn.prepare(&sql).context("Failed to prepare recordings query")?;
        let rows = stmt
            .query_map(params![value], map_recording)
            .context("Failed to query recordings")?;

        let mut recordings = Vec::new();
        for row in rows {
            recordings.push(row?);
        }
        Ok(recordings)
    }
}
