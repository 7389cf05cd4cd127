use rusqlite::Connection;

use crate::error::Result;

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS invite_links (
            invite_link_id       TEXT PRIMARY KEY NOT NULL,
            vip_channel_id       TEXT NOT NULL,
            invite_hash          TEXT NOT NULL UNIQUE,
            url                  TEXT NOT NULL,
            expire_date          TEXT NOT NULL,
            usage_limit          INTEGER NOT NULL,
            status               TEXT NOT NULL DEFAULT 'active',
            total_uses           INTEGER NOT NULL DEFAULT 0,
            total_joins          INTEGER NOT NULL DEFAULT 0,
            publisher_account_id TEXT NOT NULL,
            public_channel       TEXT NOT NULL,
            teaser_message_id    INTEGER NOT NULL,
            auto_delete_at       TEXT NOT NULL,
            deleted              INTEGER NOT NULL DEFAULT 0,
            created_at           TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_invite_links_status_expire
            ON invite_links (status, expire_date);
         CREATE INDEX IF NOT EXISTS idx_invite_links_auto_delete
            ON invite_links (deleted, auto_delete_at);

         CREATE TABLE IF NOT EXISTS funnel_conversions (
            user_id            TEXT NOT NULL,
            invite_link_id     TEXT NOT NULL,
            source_channel_id  TEXT NOT NULL,
            joined_at          TEXT NOT NULL,
            verified_as_partner INTEGER,
            status             TEXT NOT NULL DEFAULT 'joined',
            PRIMARY KEY (user_id, invite_link_id)
         );",
    )?;
    Ok(())
}
