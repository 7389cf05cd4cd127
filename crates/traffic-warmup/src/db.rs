use rusqlite::Connection;

use crate::error::Result;

/// Tracks, per account, the last local date on which the planner advanced
/// day-in-phase — kept separate from `traffic-accounts` so the planner owns
/// its own idempotence key without reaching into the account store's schema.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS warmup_progress (
            account_id        TEXT PRIMARY KEY NOT NULL,
            last_checked_date TEXT NOT NULL
         );",
    )?;
    Ok(())
}
