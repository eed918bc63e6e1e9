//! Recording Resolver.
//!
//! Looks up recording artifacts for a finished bot and stores their retrieval
//! URLs. Holds no retry state: callers (webhook follow-up, sweep, admin sync)
//! decide when to try again.

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::db::recordings::{RecordingRepository, UpsertOutcome};
use crate::db::sessions::SessionRepository;
use crate::db::{RecordingRecord, SessionRecord};
use crate::error::engine_error;
use crate::lifecycle::BotStateStore;
use crate::provider::BotProvider;

#[derive(Debug, Clone)]
pub enum RecordingResolution {
    /// Usable recordings were found and stored.
    Resolved(Vec<RecordingRecord>),
    /// The vendor has nothing playable yet.
    Pending,
    /// The bot is not known locally.
    NotFound,
}

impl RecordingResolution {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }
}

/// Result of an admin recording sync batch.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub processed: usize,
    pub updated: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

#[derive(Clone)]
pub struct RecordingResolver {
    store: BotStateStore,
    provider: Arc<dyn BotProvider>,
    call_timeout: Duration,
}

impl RecordingResolver {
    pub fn new(store: BotStateStore, provider: Arc<dyn BotProvider>, call_timeout: Duration) -> Self {
        Self {
            store,
            provider,
            call_timeout,
        }
    }

    pub async fn resolve_recording(&self, bot_id: &str) -> Result<RecordingResolution> {
        let bot = match self.store.get_bot(bot_id).await {
            Ok(bot) => bot,
            Err(e) if engine_error(&e).is_some_and(|e| e.is_not_found()) => {
                return Ok(RecordingResolution::NotFound)
            }
            Err(e) => return Err(e),
        };

        let listed = tokio::time::timeout(self.call_timeout, self.provider.list_recordings(bot_id))
            .await
            .map_err(|_| anyhow!("Listing recordings for bot {} timed out", bot_id))??;

        let resolved_at = Utc::now();
        let usable: Vec<RecordingRecord> = listed
            .iter()
            .filter(|r| r.is_done())
            .filter_map(|r| {
                let url = r.playable_url()?;
                Some(RecordingRecord {
                    recording_id: r.recording_id.clone(),
                    session_id: bot.session_id.clone(),
                    bot_id: bot.bot_id.clone(),
                    retrieval_url: url.to_string(),
                    expires_at: r.expires_at,
                    duration_seconds: r.duration_seconds(),
                    resolved_at,
                })
            })
            .collect();

        if usable.is_empty() {
            debug!(
                "No playable recording yet for bot {} ({} listed)",
                bot_id,
                listed.len()
            );
            return Ok(RecordingResolution::Pending);
        }

        let records = usable.clone();
        let (inserted, updated) = self
            .store
            .database()
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut inserted = 0;
                let mut updated = 0;
                for record in &records {
                    match RecordingRepository::upsert(&tx, record)? {
                        UpsertOutcome::Inserted => inserted += 1,
                        UpsertOutcome::Updated => updated += 1,
                    }
                }
                tx.commit()?;
                Ok((inserted, updated))
            })
            .await?;

        info!(
            "Resolved recordings for bot {}: {} new, {} refreshed",
            bot_id, inserted, updated
        );
        Ok(RecordingResolution::Resolved(usable))
    }

    /// Resolve recordings for the given sessions, or for the most recent completed
    /// sessions when none are named. Per-session failures are counted and reported;
    /// the batch itself only fails if the session list cannot be read.
    pub async fn sync_recordings(
        &self,
        session_ids: Option<Vec<String>>,
        limit: usize,
    ) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        let sessions: Vec<SessionRecord> = match session_ids {
            Some(ids) => {
                let mut found = Vec::new();
                for id in ids {
                    match self.store.get_session(&id).await {
                        Ok(session) => found.push(session),
                        Err(e) => {
                            report.failed += 1;
                            report.errors.push(format!("{}: {}", id, e));
                        }
                    }
                }
                found
            }
            None => {
                self.store
                    .database()
                    .call(move |conn| SessionRepository::list_completed_with_bot(conn, limit))
                    .await?
            }
        };

        for session in sessions {
            let Some(bot_id) = session.bot_id.as_deref() else {
                report.failed += 1;
                report.errors.push(format!("{}: session has no bot", session.id));
                continue;
            };

            report.processed += 1;
            match self.resolve_recording(bot_id).await {
                Ok(RecordingResolution::Resolved(_)) => report.updated += 1,
                Ok(RecordingResolution::Pending) => {}
                Ok(RecordingResolution::NotFound) => {
                    report.failed += 1;
                    report
                        .errors
                        .push(format!("{}: bot {} not found", session.id, bot_id));
                }
                Err(e) => {
                    warn!("Recording sync failed for session {}: {}", session.id, e);
                    report.failed += 1;
                    report.errors.push(format!("{}: {}", session.id, e));
                }
            }
        }

        info!(
            "Recording sync: {} processed, {} updated, {} failed",
            report.processed, report.updated, report.failed
        );
        Ok(report)
    }
}
