use anyhow::{Context, Result};
use rusqlite::Connection;

pub fn init_db() -> Result<Connection> {
    let db_path = crate::global::db_file()?;

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let conn = Connection::open(&db_path).context("Failed to open database connection")?;

    migrate(&conn)?;

    Ok(conn)
}

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .context("Failed to enable foreign keys")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL DEFAULT 'created',
            bot_id TEXT,
            recording_started_at TEXT,
            recording_ended_at TEXT,
            billable_minutes INTEGER,
            billable_amount INTEGER,
            billing_source TEXT,
            summary TEXT,
            transcript TEXT,
            finalized_at TEXT,
            summary_started_at TEXT,
            archived_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )
    .context("Failed to create sessions table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status)",
        [],
    )
    .context("Failed to create sessions status index")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS bots (
            bot_id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL REFERENCES sessions(id),
            status TEXT NOT NULL DEFAULT 'pending',
            vendor_status TEXT,
            last_status_change_at TEXT NOT NULL,
            last_reconciled_at TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )
    .context("Failed to create bots table")?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_bots_status ON bots(status)", [])
        .context("Failed to create bots status index")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_bots_session ON bots(session_id)",
        [],
    )
    .context("Failed to create bots session index")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS webhook_events (
            event_id TEXT PRIMARY KEY,
            bot_id TEXT,
            reported_status TEXT,
            received_at TEXT NOT NULL,
            processed INTEGER NOT NULL DEFAULT 0,
            outcome TEXT
        )",
        [],
    )
    .context("Failed to create webhook_events table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS recordings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recording_id TEXT NOT NULL,
            session_id TEXT NOT NULL REFERENCES sessions(id),
            bot_id TEXT NOT NULL,
            retrieval_url TEXT NOT NULL,
            expires_at TEXT,
            duration_seconds INTEGER,
            resolved_at TEXT NOT NULL,
            UNIQUE(session_id, bot_id, recording_id)
        )",
        [],
    )
    .context("Failed to create recordings table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_recordings_bot ON recordings(bot_id)",
        [],
    )
    .context("Failed to create recordings bot index")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS usage_records (
            session_id TEXT NOT NULL REFERENCES sessions(id),
            minute_timestamp TEXT NOT NULL,
            seconds_recorded INTEGER NOT NULL,
            recorded_at TEXT NOT NULL,
            PRIMARY KEY (session_id, minute_timestamp)
        )",
        [],
    )
    .context("Failed to create usage_records table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sweep_leases (
            name TEXT PRIMARY KEY,
            holder TEXT NOT NULL,
            expires_at TEXT NOT NULL
        )",
        [],
    )
    .context("Failed to create sweep_leases table")?;

    Ok(())
}
