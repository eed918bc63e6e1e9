//! Expiring leases that keep scheduled sweeps from overlapping.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};

use super::format_ts;

pub struct LeaseRepository;

impl LeaseRepository {
    /// Take the lease `name` for `holder` if it is free, expired, or already ours.
    pub fn try_acquire(
        conn: &Connection,
        name: &str,
        holder: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool> {
        let changed = conn
            .execute(
                "INSERT INTO sweep_leases (name, holder, expires_at) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(name) DO UPDATE SET holder = excluded.holder, expires_at = excluded.expires_at \
                 WHERE sweep_leases.expires_at <= ?4 OR sweep_leases.holder = excluded.holder",
                params![name, holder, format_ts(&(now + ttl)), format_ts(&now)],
            )
            .context("Failed to acquire sweep lease")?;
        Ok(changed == 1)
    }

    /// Drop the lease if `holder` still owns it.
    pub fn release(conn: &Connection, name: &str, holder: &str) -> Result<bool> {
        let changed = conn
            .execute(
                "DELETE FROM sweep_leases WHERE name = ?1 AND holder = ?2",
                params![name, holder],
            )
            .context("Failed to release sweep lease")?;
        Ok(changed == 1)
    }
}
