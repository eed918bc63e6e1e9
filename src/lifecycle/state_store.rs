//! Bot State Store.
//!
//! The only place bot or session status is written. Every bot status change goes
//! through [`BotStateStore::apply_transition`], which reads the current status and
//! writes the new one inside a single immediate transaction with a status-guarded
//! UPDATE, so webhook and poller deliveries for the same bot cannot lose updates.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::TransactionBehavior;
use serde::Serialize;
use tracing::{debug, info};

use super::status::{BotStatus, SessionStatus, TransitionSource};
use crate::db::bots::BotRepository;
use crate::db::sessions::SessionRepository;
use crate::db::{BotRecord, Database, SessionRecord};
use crate::error::EngineError;

/// Why a proposed transition was or was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    Applied,
    /// The bot is already completed or failed. Replays land here.
    AlreadyTerminal,
    /// The proposal moves backward in pending < active < terminal.
    Backward,
    /// The proposal equals the stored status.
    Unchanged,
    /// Another writer changed the row between read and write.
    Conflict,
}

impl TransitionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::AlreadyTerminal => "already_terminal",
            Self::Backward => "backward",
            Self::Unchanged => "unchanged",
            Self::Conflict => "conflict",
        }
    }
}

/// Result of [`BotStateStore::apply_transition`].
#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    pub applied: bool,
    pub reason: TransitionReason,
    pub bot_id: String,
    pub session_id: String,
    pub previous: BotStatus,
    pub current: BotStatus,
}

impl TransitionOutcome {
    /// True when this call is the one that moved the bot into a terminal state.
    pub fn entered_terminal(&self) -> bool {
        self.applied && self.current.is_terminal()
    }
}

/// Pure transition rule: terminal is absorbing, and status only moves forward.
pub fn evaluate_transition(current: BotStatus, proposed: BotStatus) -> TransitionReason {
    if current.is_terminal() {
        TransitionReason::AlreadyTerminal
    } else if proposed == current {
        TransitionReason::Unchanged
    } else if proposed.rank() < current.rank() {
        TransitionReason::Backward
    } else {
        TransitionReason::Applied
    }
}

#[derive(Clone)]
pub struct BotStateStore {
    db: Database,
}

impl BotStateStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Create a session in the `created` state. Generates an id when none is given.
    pub async fn create_session(&self, id: Option<String>) -> Result<SessionRecord> {
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        validate_id("session", &id)?;
        self.db
            .call(move |conn| {
                SessionRepository::insert(conn, &id, Utc::now())?;
                SessionRepository::get(conn, &id)?
                    .ok_or_else(|| EngineError::SessionNotFound(id.clone()).into())
            })
            .await
    }

    /// Register a dispatched bot against a session. Dispatch itself happens elsewhere.
    pub async fn attach_bot(
        &self,
        session_id: &str,
        bot_id: &str,
        dispatched_at: DateTime<Utc>,
    ) -> Result<BotRecord> {
        validate_id("bot", bot_id)?;
        let session_id = session_id.to_string();
        let bot_id = bot_id.to_string();
        self.db
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                if SessionRepository::get(&tx, &session_id)?.is_none() {
                    return Err(EngineError::SessionNotFound(session_id).into());
                }
                BotRepository::insert(&tx, &bot_id, &session_id, dispatched_at)?;
                SessionRepository::set_bot(&tx, &session_id, &bot_id, dispatched_at)?;
                let bot = BotRepository::get(&tx, &bot_id)?
                    .ok_or_else(|| EngineError::BotNotFound(bot_id.clone()))?;
                tx.commit()?;
                info!("Bot {} attached to session {}", bot.bot_id, bot.session_id);
                Ok(bot)
            })
            .await
    }

    pub async fn get_bot(&self, bot_id: &str) -> Result<BotRecord> {
        let bot_id = bot_id.to_string();
        self.db
            .call(move |conn| {
                BotRepository::get(conn, &bot_id)?
                    .ok_or_else(|| EngineError::BotNotFound(bot_id).into())
            })
            .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<SessionRecord> {
        let session_id = session_id.to_string();
        self.db
            .call(move |conn| {
                SessionRepository::get(conn, &session_id)?
                    .ok_or_else(|| EngineError::SessionNotFound(session_id).into())
            })
            .await
    }

    pub async fn list_sessions(&self, limit: usize) -> Result<Vec<SessionRecord>> {
        self.db
            .call(move |conn| SessionRepository::list(conn, limit))
            .await
    }

    /// Apply a proposed status to a bot.
    ///
    /// Rejections (terminal, backward, unchanged) are not errors: they come back
    /// with `applied == false` and a reason. A missing bot is an error.
    /// When the transition is applied the owning session is moved in the same
    /// transaction: `created -> active` on activation, and any open status to the
    /// matching terminal status (stamping `recording_ended_at`) on termination.
    pub async fn apply_transition(
        &self,
        bot_id: &str,
        proposed: BotStatus,
        source: TransitionSource,
        observed_at: DateTime<Utc>,
        vendor_code: Option<&str>,
    ) -> Result<TransitionOutcome> {
        let bot_id = bot_id.to_string();
        let vendor_code = vendor_code.map(str::to_string);

        let outcome = self
            .db
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let bot = BotRepository::get(&tx, &bot_id)?
                    .ok_or_else(|| EngineError::BotNotFound(bot_id.clone()))?;

                let mut reason = evaluate_transition(bot.status, proposed);
                if reason == TransitionReason::Applied {
                    let changed = BotRepository::compare_and_set_status(
                        &tx,
                        &bot_id,
                        bot.status,
                        proposed,
                        vendor_code.as_deref(),
                        observed_at,
                    )?;
                    if changed {
                        mirror_session(&tx, &bot.session_id, proposed, observed_at)?;
                    } else {
                        reason = TransitionReason::Conflict;
                    }
                } else if let (false, Some(code)) = (bot.status.is_terminal(), vendor_code.as_deref()) {
                    BotRepository::set_vendor_status(&tx, &bot_id, code)?;
                }
                tx.commit()?;

                let applied = reason == TransitionReason::Applied;
                Ok(TransitionOutcome {
                    applied,
                    reason,
                    bot_id: bot.bot_id,
                    session_id: bot.session_id,
                    previous: bot.status,
                    current: if applied { proposed } else { bot.status },
                })
            })
            .await?;

        if outcome.applied {
            info!(
                "Bot {} {} -> {} via {}",
                outcome.bot_id,
                outcome.previous.as_str(),
                outcome.current.as_str(),
                source.as_str()
            );
        } else {
            debug!(
                "Bot {} ignored {} from {} ({}; stays {})",
                outcome.bot_id,
                proposed.as_str(),
                source.as_str(),
                outcome.reason.as_str(),
                outcome.current.as_str()
            );
        }

        Ok(outcome)
    }

    /// Record that the provider was asked about this bot, whatever the answer.
    pub async fn mark_reconciled(&self, bot_id: &str, at: DateTime<Utc>) -> Result<()> {
        let bot_id = bot_id.to_string();
        self.db
            .call(move |conn| BotRepository::mark_reconciled(conn, &bot_id, at))
            .await
    }

    /// Non-terminal bots not confirmed by either path within `threshold`.
    pub async fn find_stale_bots(
        &self,
        threshold: chrono::Duration,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<BotRecord>> {
        let cutoff = now - threshold;
        self.db
            .call(move |conn| BotRepository::find_stale(conn, cutoff, limit))
            .await
    }

    pub async fn find_bots_missing_recordings(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<BotRecord>> {
        self.db
            .call(move |conn| BotRepository::find_completed_without_recordings(conn, since, limit))
            .await
    }

    /// Claim the stop of a session: `created|active -> stopping`, or a takeover
    /// of a `stopping` claim older than `claim_ttl`. Only the caller that gets
    /// `true` stops the bot.
    pub async fn begin_stopping(&self, session_id: &str, claim_ttl: chrono::Duration) -> Result<bool> {
        let session_id = session_id.to_string();
        self.db
            .call(move |conn| {
                let now = Utc::now();
                SessionRepository::begin_stopping(conn, &session_id, now, now - claim_ttl)
            })
            .await
    }

    /// Close an open session as completed. Returns whether the session moved.
    pub async fn complete_session(&self, session_id: &str, ended_at: DateTime<Utc>) -> Result<bool> {
        let session_id = session_id.to_string();
        let moved = self
            .db
            .call(move |conn| {
                SessionRepository::mark_terminal(
                    conn,
                    &session_id,
                    SessionStatus::Completed,
                    ended_at,
                    Utc::now(),
                )
            })
            .await?;
        Ok(moved)
    }

    /// Set the finalized marker with the summary output. Returns false if already finalized.
    pub async fn mark_finalized(
        &self,
        session_id: &str,
        summary: String,
        transcript: Option<String>,
    ) -> Result<bool> {
        let session_id = session_id.to_string();
        self.db
            .call(move |conn| {
                SessionRepository::mark_finalized(
                    conn,
                    &session_id,
                    &summary,
                    transcript.as_deref(),
                    Utc::now(),
                )
            })
            .await
    }

    /// Claim the summary step. Only the caller that gets `true` invokes the
    /// summary service; claims older than `claim_ttl` are taken over.
    pub async fn claim_summary(&self, session_id: &str, claim_ttl: chrono::Duration) -> Result<bool> {
        let session_id = session_id.to_string();
        self.db
            .call(move |conn| {
                let now = Utc::now();
                SessionRepository::claim_summary(conn, &session_id, now, now - claim_ttl)
            })
            .await
    }

    pub async fn release_summary(&self, session_id: &str) -> Result<()> {
        let session_id = session_id.to_string();
        self.db
            .call(move |conn| SessionRepository::release_summary(conn, &session_id))
            .await
    }

    pub async fn list_unfinalized_sessions(&self, limit: usize) -> Result<Vec<SessionRecord>> {
        self.db
            .call(move |conn| SessionRepository::list_unfinalized(conn, limit))
            .await
    }

    /// Soft-archive a session. Returns false when it was already archived.
    pub async fn archive_session(&self, session_id: &str) -> Result<bool> {
        let session_id = session_id.to_string();
        self.db
            .call(move |conn| {
                if SessionRepository::get(conn, &session_id)?.is_none() {
                    return Err(EngineError::SessionNotFound(session_id).into());
                }
                SessionRepository::archive(conn, &session_id, Utc::now())
            })
            .await
    }
}

/// Ids are non-empty, at most 128 characters, with no whitespace or `/`.
fn validate_id(kind: &str, id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 128 || id.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(EngineError::InvalidInput(format!("invalid {} id {:?}", kind, id)).into());
    }
    Ok(())
}

fn mirror_session(
    conn: &rusqlite::Connection,
    session_id: &str,
    status: BotStatus,
    observed_at: DateTime<Utc>,
) -> Result<()> {
    let now = Utc::now();
    match status {
        BotStatus::Pending => {}
        BotStatus::Active => {
            SessionRepository::mark_active(conn, session_id, observed_at, now)?;
            SessionRepository::stamp_started(conn, session_id, observed_at)?;
        }
        BotStatus::Completed | BotStatus::Failed => {
            if let Some(session_status) = SessionStatus::from_terminal_bot(status) {
                SessionRepository::mark_terminal(conn, session_id, session_status, observed_at, now)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn store_with_bot() -> (BotStateStore, String) {
        let store = BotStateStore::new(Database::in_memory().unwrap());
        let session = store.create_session(Some("s-1".to_string())).await.unwrap();
        store
            .attach_bot(&session.id, "bot-1", Utc::now() - Duration::minutes(10))
            .await
            .unwrap();
        (store, session.id)
    }

    #[test]
    fn test_evaluate_transition_rules() {
        use BotStatus::*;
        assert_eq!(evaluate_transition(Pending, Active), TransitionReason::Applied);
        assert_eq!(evaluate_transition(Pending, Completed), TransitionReason::Applied);
        assert_eq!(evaluate_transition(Active, Failed), TransitionReason::Applied);
        assert_eq!(evaluate_transition(Active, Pending), TransitionReason::Backward);
        assert_eq!(evaluate_transition(Active, Active), TransitionReason::Unchanged);
        assert_eq!(evaluate_transition(Completed, Active), TransitionReason::AlreadyTerminal);
        assert_eq!(evaluate_transition(Completed, Failed), TransitionReason::AlreadyTerminal);
        assert_eq!(evaluate_transition(Failed, Completed), TransitionReason::AlreadyTerminal);
    }

    #[tokio::test]
    async fn test_forward_transitions_mirror_session() {
        let (store, session_id) = store_with_bot().await;
        let started = Utc::now() - Duration::minutes(5);

        let outcome = store
            .apply_transition("bot-1", BotStatus::Active, TransitionSource::Webhook, started, Some("in_call_recording"))
            .await
            .unwrap();
        assert!(outcome.applied);
        assert_eq!(outcome.previous, BotStatus::Pending);

        let session = store.get_session(&session_id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert!(session.recording_ended_at.is_none());

        let ended = Utc::now();
        let outcome = store
            .apply_transition("bot-1", BotStatus::Completed, TransitionSource::Webhook, ended, Some("done"))
            .await
            .unwrap();
        assert!(outcome.entered_terminal());

        let session = store.get_session(&session_id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.recording_started_at.is_some());
        assert!(session.recording_ended_at.is_some());
    }

    #[tokio::test]
    async fn test_terminal_is_absorbing() {
        let (store, session_id) = store_with_bot().await;
        let now = Utc::now();
        store
            .apply_transition("bot-1", BotStatus::Failed, TransitionSource::Poller, now, None)
            .await
            .unwrap();

        for proposed in [BotStatus::Pending, BotStatus::Active, BotStatus::Completed, BotStatus::Failed] {
            for source in [TransitionSource::Webhook, TransitionSource::Poller] {
                let outcome = store
                    .apply_transition("bot-1", proposed, source, now + Duration::seconds(5), Some("done"))
                    .await
                    .unwrap();
                assert!(!outcome.applied);
                assert_eq!(outcome.reason, TransitionReason::AlreadyTerminal);
                assert_eq!(outcome.current, BotStatus::Failed);
            }
        }

        let bot = store.get_bot("bot-1").await.unwrap();
        assert_eq!(bot.status, BotStatus::Failed);
        let session = store.get_session(&session_id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
    }

    #[tokio::test]
    async fn test_backward_transition_rejected() {
        let (store, _) = store_with_bot().await;
        let now = Utc::now();
        store
            .apply_transition("bot-1", BotStatus::Active, TransitionSource::Webhook, now, None)
            .await
            .unwrap();

        let outcome = store
            .apply_transition("bot-1", BotStatus::Pending, TransitionSource::Poller, now, Some("joining_call"))
            .await
            .unwrap();
        assert!(!outcome.applied);
        assert_eq!(outcome.reason, TransitionReason::Backward);
        assert_eq!(store.get_bot("bot-1").await.unwrap().status, BotStatus::Active);
    }

    #[tokio::test]
    async fn test_unknown_bot_is_error() {
        let store = BotStateStore::new(Database::in_memory().unwrap());
        let err = store
            .apply_transition("ghost", BotStatus::Active, TransitionSource::Webhook, Utc::now(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            crate::error::engine_error(&err),
            Some(EngineError::BotNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_terminal_transitions_apply_once() {
        let (store, _) = store_with_bot().await;
        let now = Utc::now();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let proposed = if i % 2 == 0 { BotStatus::Completed } else { BotStatus::Failed };
            handles.push(tokio::spawn(async move {
                store
                    .apply_transition("bot-1", proposed, TransitionSource::Webhook, now, None)
                    .await
                    .unwrap()
            }));
        }

        let mut applied = 0;
        for handle in handles {
            if handle.await.unwrap().applied {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
    }

    #[tokio::test]
    async fn test_attach_bot_requires_session() {
        let store = BotStateStore::new(Database::in_memory().unwrap());
        let err = store.attach_bot("nope", "bot-1", Utc::now()).await.unwrap_err();
        assert!(crate::error::engine_error(&err).is_some_and(|e| e.is_not_found()));
    }

    #[tokio::test]
    async fn test_complete_session_keeps_invariant() {
        let (store, session_id) = store_with_bot().await;
        assert!(store.begin_stopping(&session_id, Duration::minutes(5)).await.unwrap());
        assert!(store.complete_session(&session_id, Utc::now()).await.unwrap());
        assert!(!store.complete_session(&session_id, Utc::now()).await.unwrap());

        let session = store.get_session(&session_id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.recording_ended_at.is_some());
        assert!(!session.is_finalized());
    }

    #[tokio::test]
    async fn test_invalid_ids_are_rejected() {
        let store = BotStateStore::new(Database::in_memory().unwrap());
        for bad in ["", "has space", "a/b"] {
            let err = store.create_session(Some(bad.to_string())).await.unwrap_err();
            assert!(matches!(
                crate::error::engine_error(&err),
                Some(EngineError::InvalidInput(_))
            ));
        }

        store.create_session(Some("s-1".to_string())).await.unwrap();
        let err = store.attach_bot("s-1", " ", Utc::now()).await.unwrap_err();
        assert!(matches!(
            crate::error::engine_error(&err),
            Some(EngineError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_archive_session_hides_it_once() {
        let (store, session_id) = store_with_bot().await;
        assert!(store.archive_session(&session_id).await.unwrap());
        assert!(!store.archive_session(&session_id).await.unwrap());
        assert!(store.list_sessions(10).await.unwrap().is_empty());
        assert!(store.get_session(&session_id).await.unwrap().archived_at.is_some());

        let err = store.archive_session("missing").await.unwrap_err();
        assert!(crate::error::engine_error(&err).is_some_and(|e| e.is_not_found()));
    }
}
