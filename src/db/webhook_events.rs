//! Webhook delivery log used for event-id deduplication.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::schemas::WebhookEventRecord;
use super::{format_ts, required_ts_column};

pub struct WebhookEventRepository;

impl WebhookEventRepository {
    /// Record a delivery if its id is new. Returns the stored row either way, so a
    /// redelivery sees the `processed` flag of the first attempt.
    pub fn record_received(
        conn: &Connection,
        event_id: &str,
        bot_id: &str,
        reported_status: &str,
        received_at: DateTime<Utc>,
    ) -> Result<WebhookEventRecord> {
        conn.execute(
            "INSERT OR IGNORE INTO webhook_events (event_id, bot_id, reported_status, received_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![event_id, bot_id, reported_status, format_ts(&received_at)],
        )
        .context("Failed to record webhook event")?;

        Self::get(conn, event_id)?
            .with_context(|| format!("Webhook event {} vanished after insert", event_id))
    }

    pub fn get(conn: &Connection, event_id: &str) -> Result<Option<WebhookEventRecord>> {
        conn.query_row(
            "SELECT event_id, bot_id, reported_status, received_at, processed, outcome \
             FROM webhook_events WHERE event_id = ?1",
            params![event_id],
            |row| {
                let processed: i64 = row.get(4)?;
                Ok(WebhookEventRecord {
                    event_id: row.get(0)?,
                    bot_id: row.get(1)?,
                    reported_status: row.get(2)?,
                    received_at: required_ts_column(row, 3)?,
                    processed: processed != 0,
                    outcome: row.get(5)?,
                })
            },
        )
        .optional()
        .context("Failed to query webhook event")
    }

    pub fn mark_processed(conn: &Connection, event_id: &str, outcome: &str) -> Result<()> {
        conn.execute(
            "UPDATE webhook_events SET processed = 1, outcome = ?1 WHERE event_id = ?2",
            params![outcome, event_id],
        )
        .context("Failed to mark webhook event processed")?;
        Ok(())
    }
}
