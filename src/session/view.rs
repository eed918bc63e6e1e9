//! Read model for `GET /sessions/{id}`.

use anyhow::Result;
use serde::Serialize;

use crate::db::bots::BotRepository;
use crate::db::recordings::RecordingRepository;
use crate::db::sessions::SessionRepository;
use crate::db::usage::UsageRepository;
use crate::db::{BotRecord, Database, RecordingRecord, SessionRecord};
use crate::error::EngineError;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session: SessionRecord,
    pub bot: Option<BotRecord>,
    pub recordings: Vec<RecordingRecord>,
    pub usage_minutes: i64,
    /// Seconds reported across all usage minutes.
    pub usage_seconds: i64,
}

pub async fn load_session_view(db: &Database, session_id: &str) -> Result<SessionView> {
    let session_id = session_id.to_string();
    db.call(move |conn| {
        let session = SessionRepository::get(conn, &session_id)?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.clone()))?;
        let bot = match session.bot_id.as_deref() {
            Some(bot_id) => BotRepository::get(conn, bot_id)?,
            None => None,
        };
        let recordings = RecordingRepository::list_for_session(conn, &session_id)?;
        let usage_minutes = UsageRepository::count_minutes(conn, &session_id)?;
        let usage_seconds = UsageRepository::total_seconds(conn, &session_id)?;

        Ok(SessionView {
            session,
            bot,
            recordings,
            usage_minutes,
            usage_seconds,
        })
    })
    .await
}
