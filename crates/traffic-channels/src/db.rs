use rusqlite::Connection;

use crate::error::Result;

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS target_channels (
            username   TEXT PRIMARY KEY NOT NULL,
            segment    TEXT NOT NULL,
            joined_at  TEXT NOT NULL,
            active     INTEGER NOT NULL DEFAULT 1,
            anti_bot   INTEGER NOT NULL DEFAULT 0,
            last_polled_at TEXT
         );
         CREATE TABLE IF NOT EXISTS post_observations (
            channel              TEXT NOT NULL,
            telegram_message_id  INTEGER NOT NULL,
            seen_at              TEXT NOT NULL,
            topic_tag            TEXT NOT NULL,
            claimed_by_account_id TEXT,
            PRIMARY KEY (channel, telegram_message_id)
         );
         CREATE INDEX IF NOT EXISTS idx_post_observations_unclaimed
            ON post_observations (channel, claimed_by_account_id, seen_at);",
    )?;
    Ok(())
}
