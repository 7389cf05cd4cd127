use rusqlite::Connection;

use crate::error::Result;

/// Initialise the telegram_sessions table.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS telegram_sessions (
            account_id       TEXT PRIMARY KEY,
            session_blob     BLOB NOT NULL,
            spam_status      TEXT NOT NULL DEFAULT 'ok',
            spam_checked_at  TEXT,
            created_at       TEXT NOT NULL,
            updated_at       TEXT NOT NULL
        ) STRICT;",
    )?;
    Ok(())
}
