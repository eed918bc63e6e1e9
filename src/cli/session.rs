use anyhow::Result;
use chrono::Utc;

use super::args::{SessionCliArgs, SessionCommand};
use crate::db::Database;
use crate::lifecycle::BotStateStore;
use crate::session::load_session_view;

pub async fn handle_session_command(args: SessionCliArgs) -> Result<()> {
    let store = BotStateStore::new(Database::open_default()?);

    match args.command {
        SessionCommand::Show { id } => {
            let view = load_session_view(store.database(), &id).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        SessionCommand::Create { id, bot } => {
            let session = store.create_session(id).await?;
            println!("Created session {}", session.id);
            if let Some(bot_id) = bot {
                store.attach_bot(&session.id, &bot_id, Utc::now()).await?;
                println!("Attached bot {}", bot_id);
            }
        }
        SessionCommand::List { limit } => {
            let sessions = store.list_sessions(limit).await?;
            if sessions.is_empty() {
                println!("No sessions found.");
                return Ok(());
            }

            println!("Found {} session(s):\n", sessions.len());
            for session in sessions {
                println!("ID: {}", session.id);
                println!("Status: {}", session.status.as_str());
                println!("Bot: {}", session.bot_id.as_deref().unwrap_or("-"));
                println!("Created: {}", session.created_at.to_rfc3339());
                if let Some(minutes) = session.billable_minutes {
                    println!("Billed: {} min", minutes);
                }
                println!("Finalized: {}", if session.is_finalized() { "yes" } else { "no" });
                println!("---");
            }
        }
        SessionCommand::Archive { id } => {
            if store.archive_session(&id).await? {
                println!("Archived session {}", id);
            } else {
                println!("Session {} was already archived", id);
            }
        }
    }

    Ok(())
}
