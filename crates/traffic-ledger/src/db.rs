use rusqlite::Connection;

use crate::error::Result;

/// Initialise the rate-counter schema. Idempotent.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS rate_counters (
            account_id   TEXT NOT NULL,
            action_kind  TEXT NOT NULL,
            local_date   TEXT NOT NULL,
            count        INTEGER NOT NULL DEFAULT 0,
            updated_at   TEXT NOT NULL,
            PRIMARY KEY (account_id, action_kind, local_date)
         ) STRICT;
         CREATE INDEX IF NOT EXISTS idx_rate_counters_date ON rate_counters (local_date);",
    )?;
    Ok(())
}
