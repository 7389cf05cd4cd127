use rusqlite::Connection;

use crate::error::Result;

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS proxies (
            endpoint              TEXT PRIMARY KEY NOT NULL,
            kind                  TEXT NOT NULL,
            credentials           TEXT,
            in_use_by             TEXT,
            consecutive_failures  INTEGER NOT NULL DEFAULT 0,
            cooldown_strikes      INTEGER NOT NULL DEFAULT 0,
            cooldown_until        TEXT,
            last_failure_at       TEXT
         );
         CREATE INDEX IF NOT EXISTS idx_proxies_available
            ON proxies (in_use_by, cooldown_until);",
    )?;
    Ok(())
}
