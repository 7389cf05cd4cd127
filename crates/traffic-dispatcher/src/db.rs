use rusqlite::Connection;

use crate::error::Result;

/// Initialise the dispatcher schema: the append-only action log, the
/// pending-outcome queue the Reply Poller drains, and the scheduled content
/// queue for `message`/`post` action kinds.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS action_records (
            action_id           TEXT PRIMARY KEY NOT NULL,
            account_id          TEXT NOT NULL,
            kind                TEXT NOT NULL,
            target_ref          TEXT NOT NULL,
            started_at          TEXT NOT NULL,
            finished_at         TEXT,
            outcome             TEXT,
            error_kind          TEXT,
            comment_message_id  INTEGER,
            strategy_used       TEXT,
            relevance_score     REAL,
            post_topic          TEXT,
            got_reply           INTEGER NOT NULL DEFAULT 0,
            reply_count         INTEGER NOT NULL DEFAULT 0
         );
         CREATE INDEX IF NOT EXISTS idx_action_records_account
            ON action_records (account_id, started_at);
         CREATE INDEX IF NOT EXISTS idx_action_records_unfinished
            ON action_records (account_id) WHERE finished_at IS NULL;

         CREATE TABLE IF NOT EXISTS outcome_pending (
            action_id            TEXT PRIMARY KEY NOT NULL,
            account_id           TEXT NOT NULL,
            channel              TEXT NOT NULL,
            comment_message_id   INTEGER NOT NULL,
            context_segment      TEXT NOT NULL,
            context_channel      TEXT NOT NULL,
            context_time_slot    TEXT NOT NULL,
            context_post_topic   TEXT NOT NULL,
            strategy             TEXT NOT NULL,
            poll_at              TEXT NOT NULL,
            processed            INTEGER NOT NULL DEFAULT 0
         );
         CREATE INDEX IF NOT EXISTS idx_outcome_pending_due
            ON outcome_pending (poll_at) WHERE processed = 0;

         CREATE TABLE IF NOT EXISTS account_subscriptions (
            account_id    TEXT NOT NULL,
            channel       TEXT NOT NULL,
            subscribed_at TEXT NOT NULL,
            PRIMARY KEY (account_id, channel)
         );

         CREATE TABLE IF NOT EXISTS content_queue (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id    TEXT NOT NULL,
            kind          TEXT NOT NULL,
            target        TEXT NOT NULL,
            text          TEXT NOT NULL,
            scheduled_at  TEXT NOT NULL,
            consumed_at   TEXT
         );
         CREATE INDEX IF NOT EXISTS idx_content_queue_pending
            ON content_queue (account_id, kind, scheduled_at) WHERE consumed_at IS NULL;",
    )?;
    Ok(())
}
