use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use traffic_core::types::{AccountStatus, Segment, SpamStatus};

use crate::error::Result;
use crate::types::{Account, Persona};

/// Initialise the accounts schema. Idempotent — safe on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS accounts (
            account_id          TEXT PRIMARY KEY NOT NULL,
            phone_identifier     TEXT NOT NULL,
            segment              TEXT NOT NULL,
            display_name         TEXT NOT NULL,
            persona_bio          TEXT,
            proxy_id             TEXT,
            linked_channel_id    TEXT,
            status               TEXT NOT NULL DEFAULT 'new',
            phase                INTEGER NOT NULL DEFAULT 1,
            day_in_phase         INTEGER NOT NULL DEFAULT 1,
            warmup_completed     INTEGER NOT NULL DEFAULT 0,
            last_activity_at     TEXT,
            paused_until         TEXT,
            ban_reason           TEXT,
            spam_status          TEXT NOT NULL DEFAULT 'ok',
            spam_checked_at      TEXT,
            timezone_override    TEXT,
            created_at           TEXT NOT NULL,
            updated_at           TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_accounts_status_segment
            ON accounts (status, segment);",
    )?;
    Ok(())
}

/// Column order matches `ACCOUNT_SELECT_SQL` below — keep them in sync.
pub(crate) const ACCOUNT_SELECT_SQL: &str = "SELECT account_id, phone_identifier, segment,
        display_name, persona_bio, proxy_id, linked_channel_id, status, phase,
        day_in_phase, warmup_completed, last_activity_at, paused_until, ban_reason,
        spam_status, spam_checked_at, timezone_override, created_at, updated_at
    FROM accounts";

pub(crate) fn row_to_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    let parse_dt = |s: String| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    };
    let parse_opt_dt = |s: Option<String>| s.map(parse_dt);

    Ok(Account {
        account_id: row.get::<_, String>(0)?.into(),
        phone_identifier: row.get(1)?,
        segment: Segment::from_str(&row.get::<_, String>(2)?).unwrap_or(Segment::Universal),
        persona: Persona {
            display_name: row.get(3)?,
            bio: row.get(4)?,
        },
        proxy_id: row.get(5)?,
        linked_channel_id: row.get(6)?,
        status: AccountStatus::from_str(&row.get::<_, String>(7)?).unwrap_or(AccountStatus::New),
        phase: row.get::<_, i64>(8)? as u8,
        day_in_phase: row.get::<_, i64>(9)? as u32,
        warmup_completed: row.get::<_, i64>(10)? != 0,
        last_activity_at: parse_opt_dt(row.get(11)?),
        paused_until: parse_opt_dt(row.get(12)?),
        ban_reason: row.get(13)?,
        spam_status: SpamStatus::from_str(&row.get::<_, String>(14)?).unwrap_or(SpamStatus::Ok),
        spam_checked_at: parse_opt_dt(row.get(15)?),
        timezone_override: row.get(16)?,
        created_at: parse_dt(row.get(17)?),
        updated_at: parse_dt(row.get(18)?),
    })
}
