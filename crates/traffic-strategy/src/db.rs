use rusqlite::Connection;

use crate::error::Result;

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS strategy_models (
            strategy   TEXT PRIMARY KEY NOT NULL,
            model_json TEXT NOT NULL,
            updated_at TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS strategy_effectiveness (
            segment           TEXT NOT NULL,
            channel           TEXT NOT NULL,
            strategy          TEXT NOT NULL,
            time_slot         TEXT NOT NULL,
            post_topic        TEXT NOT NULL,
            attempts          INTEGER NOT NULL DEFAULT 0,
            weighted_successes REAL NOT NULL DEFAULT 0,
            score             REAL NOT NULL DEFAULT 0,
            last_updated      TEXT NOT NULL,
            PRIMARY KEY (segment, channel, strategy, time_slot, post_topic)
         );
         CREATE TABLE IF NOT EXISTS strategy_updates_seen (
            action_id  TEXT PRIMARY KEY NOT NULL,
            updated_at TEXT NOT NULL
         );",
    )?;
    Ok(())
}
