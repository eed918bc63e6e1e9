//! Session Termination Coordinator.
//!
//! `end_session` drives a session through `stopping` to `completed`, then asks
//! the summary service for the final write-up. A bot that cannot be stopped
//! never blocks completion, and a failed summary leaves the session completed
//! but unfinalized so it can be retried.

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::billing::UsageCalculator;
use crate::db::recordings::RecordingRepository;
use crate::db::sessions::SessionRepository;
use crate::db::SessionRecord;
use crate::error::EngineError;
use crate::lifecycle::{BotStateStore, SessionStatus};
use crate::provider::BotProvider;
use crate::summary::{SummaryContext, SummaryService};

/// A `stopping` session untouched this long is taken over by the next end request.
const STOP_CLAIM_TTL_MINUTES: i64 = 5;
/// A summary claim older than this belongs to an attempt that died.
const SUMMARY_CLAIM_TTL_MINUTES: i64 = 15;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminationOutcome {
    /// The bot is known to have left the call: the stop succeeded or the bot was
    /// already terminal.
    pub bot_stopped: bool,
    pub summary_generated: bool,
    pub redirect_target: String,
}

#[derive(Clone)]
pub struct SessionTerminator {
    store: BotStateStore,
    provider: Arc<dyn BotProvider>,
    billing: UsageCalculator,
    summary: Arc<dyn SummaryService>,
    stop_timeout: Duration,
    redirect_template: String,
}

impl SessionTerminator {
    pub fn new(
        store: BotStateStore,
        provider: Arc<dyn BotProvider>,
        billing: UsageCalculator,
        summary: Arc<dyn SummaryService>,
        stop_timeout: Duration,
        redirect_template: String,
    ) -> Self {
        Self {
            store,
            provider,
            billing,
            summary,
            stop_timeout,
            redirect_template,
        }
    }

    fn redirect_for(&self, session_id: &str) -> String {
        self.redirect_template.replace("{id}", session_id)
    }

    pub async fn end_session(&self, session_id: &str) -> Result<TerminationOutcome> {
        let session = self.store.get_session(session_id).await?;
        let redirect_target = self.redirect_for(session_id);

        if session.is_finalized() {
            info!("Session {} already finalized", session_id);
            return Ok(TerminationOutcome {
                bot_stopped: self.bot_is_terminal(&session).await?,
                summary_generated: true,
                redirect_target,
            });
        }

        let bot_stopped = if session.status.is_terminal() {
            self.bot_is_terminal(&session).await?
        } else if self
            .store
            .begin_stopping(session_id, chrono::Duration::minutes(STOP_CLAIM_TTL_MINUTES))
            .await?
        {
            self.stop_and_complete(&session).await?
        } else {
            info!("Session {} is already being stopped", session_id);
            let session = self.store.get_session(session_id).await?;
            self.bot_is_terminal(&session).await?
        };

        let session = self.store.get_session(session_id).await?;
        let summary_generated = if session.status == SessionStatus::Completed {
            self.generate_summary(session_id).await?
        } else {
            info!(
                "Session {} is {}; no summary",
                session_id,
                session.status.as_str()
            );
            false
        };

        Ok(TerminationOutcome {
            bot_stopped,
            summary_generated,
            redirect_target,
        })
    }

    /// Steps 1 and 2, run by the caller holding the stop claim: stop the bot if
    /// needed, then close the session and bill it.
    async fn stop_and_complete(&self, session: &SessionRecord) -> Result<bool> {
        let bot_stopped = match session.bot_id.as_deref() {
            None => false,
            Some(bot_id) => self.stop_bot(bot_id).await?,
        };

        if self.store.complete_session(&session.id, Utc::now()).await? {
            info!("Session {} completed", session.id);
        }

        if let Err(e) = self.billing.finalize_local(&session.id).await {
            warn!("Billing failed for session {}: {:#}", session.id, e);
        }

        Ok(bot_stopped)
    }

    async fn stop_bot(&self, bot_id: &str) -> Result<bool> {
        let bot = self.store.get_bot(bot_id).await?;
        if bot.status.is_terminal() {
            return Ok(true);
        }

        match tokio::time::timeout(self.stop_timeout, self.provider.stop_bot(bot_id)).await {
            Ok(Ok(())) => {
                info!("Bot {} asked to leave the call", bot_id);
                Ok(true)
            }
            Ok(Err(e)) => {
                warn!("Stopping bot {} failed; continuing: {:#}", bot_id, e);
                Ok(false)
            }
            Err(_) => {
                warn!(
                    "Stopping bot {} timed out after {}s; continuing",
                    bot_id,
                    self.stop_timeout.as_secs()
                );
                Ok(false)
            }
        }
    }

    async fn bot_is_terminal(&self, session: &SessionRecord) -> Result<bool> {
        match session.bot_id.as_deref() {
            Some(bot_id) => Ok(self.store.get_bot(bot_id).await?.status.is_terminal()),
            None => Ok(false),
        }
    }

    /// Step 3. Returns whether the session is now finalized. Summary service
    /// failures are logged and reported as `false`; storage failures are errors.
    pub async fn generate_summary(&self, session_id: &str) -> Result<bool> {
        let id = session_id.to_string();
        let (session, recordings) = self
            .store
            .database()
            .call(move |conn| {
                let session = SessionRepository::get(conn, &id)?
                    .ok_or_else(|| EngineError::SessionNotFound(id.clone()))?;
                let recordings = RecordingRepository::list_for_session(conn, &id)?;
                Ok((session, recordings))
            })
            .await?;

        if session.is_finalized() {
            return Ok(true);
        }

        if !self
            .store
            .claim_summary(session_id, chrono::Duration::minutes(SUMMARY_CLAIM_TTL_MINUTES))
            .await?
        {
            debug!("Summary for session {} already in progress", session_id);
            return Ok(false);
        }

        let context = SummaryContext::new(&session, &recordings);
        match self.summary.finalize(session_id, &context).await {
            Ok(output) => {
                if self
                    .store
                    .mark_finalized(session_id, output.summary, output.transcript)
                    .await?
                {
                    info!("Session {} finalized", session_id);
                }
                Ok(true)
            }
            Err(e) => {
                warn!(
                    "Summary for session {} failed; left unfinalized: {:#}",
                    session_id, e
                );
                self.store.release_summary(session_id).await?;
                Ok(false)
            }
        }
    }
}
