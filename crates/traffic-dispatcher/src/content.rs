use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use traffic_core::types::{AccountId, ActionKind};

use crate::db::init_db;
use crate::error::Result;
use crate::types::ContentItem;

/// Queue of pre-generated `message`/`post` content awaiting publication
///. The dispatcher only
/// consumes from this queue; population is external (operator tooling or a
/// batch job run ahead of time against the `TextGenerator` interface).
pub struct ContentQueue {
    conn: Mutex<Connection>,
}

impl ContentQueue {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn enqueue(&self, account_id: &AccountId, kind: ActionKind, target: &str, text: &str, scheduled_at: DateTime<Utc>) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO content_queue (account_id, kind, target, text, scheduled_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                account_id.as_str(),
                kind.to_string(),
                target,
                text,
                scheduled_at.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Claims the earliest unconsumed item due for `account_id`/`kind`, if
    /// any. The claim is a CAS on `consumed_at` so two fibers racing on the
    /// same account (which should not happen given one fiber per account,
    /// but is cheap insurance) never hand out the same item twice.
    pub fn claim_due(&self, account_id: &AccountId, kind: ActionKind, now: DateTime<Utc>) -> Result<Option<ContentItem>> {
        let conn = self.conn.lock().unwrap();
        let candidate: Option<(i64, String, String)> = conn
            .query_row(
                "SELECT id, target, text FROM content_queue
                 WHERE account_id = ?1 AND kind = ?2 AND consumed_at IS NULL AND scheduled_at <= ?3
                 ORDER BY scheduled_at ASC LIMIT 1",
                params![account_id.as_str(), kind.to_string(), now.to_rfc3339()],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional_none_on_no_rows()?;

        let Some((id, target, text)) = candidate else {
            return Ok(None);
        };

        let updated = conn.execute(
            "UPDATE content_queue SET consumed_at = ?1 WHERE id = ?2 AND consumed_at IS NULL",
            params![now.to_rfc3339(), id],
        )?;
        if updated == 0 {
            return Ok(None);
        }

        Ok(Some(ContentItem {
            id,
            account_id: account_id.clone(),
            kind,
            target,
            text,
            scheduled_at: now,
        }))
    }

    /// True if `account_id` has no unconsumed item due for `kind` yet.
    pub fn is_empty_for(&self, account_id: &AccountId, kind: ActionKind) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM content_queue WHERE account_id = ?1 AND kind = ?2 AND consumed_at IS NULL",
            params![account_id.as_str(), kind.to_string()],
            |r| r.get(0),
        )?;
        Ok(count == 0)
    }
}

trait OptionalNoRows<T> {
    fn optional_none_on_no_rows(self) -> rusqlite::Result<Option<T>>;
}

impl<T> OptionalNoRows<T> for rusqlite::Result<T> {
    fn optional_none_on_no_rows(self) -> rusqlite::Result<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn queue() -> ContentQueue {
        ContentQueue::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn claim_due_returns_none_when_scheduled_in_future() {
        let q = queue();
        let acc = AccountId::new();
        let now = Utc::now();
        q.enqueue(&acc, ActionKind::Post, "@channel", "hi", now + Duration::hours(1)).unwrap();
        assert!(q.claim_due(&acc, ActionKind::Post, now).unwrap().is_none());
    }

    #[test]
    fn claim_due_consumes_earliest_item_once() {
        let q = queue();
        let acc = AccountId::new();
        let now = Utc::now();
        q.enqueue(&acc, ActionKind::Post, "@channel", "first", now - Duration::minutes(5)).unwrap();
        q.enqueue(&acc, ActionKind::Post, "@channel", "second", now - Duration::minutes(1)).unwrap();

        let item = q.claim_due(&acc, ActionKind::Post, now).unwrap().unwrap();
        assert_eq!(item.text, "first");

        let item2 = q.claim_due(&acc, ActionKind::Post, now).unwrap().unwrap();
        assert_eq!(item2.text, "second");

        assert!(q.claim_due(&acc, ActionKind::Post, now).unwrap().is_none());
    }

    #[test]
    fn is_empty_for_reflects_queue_state() {
        let q = queue();
        let acc = AccountId::new();
        assert!(q.is_empty_for(&acc, ActionKind::Message).unwrap());
        q.enqueue(&acc, ActionKind::Message, "@peer", "hey", Utc::now()).unwrap();
        assert!(!q.is_empty_for(&acc, ActionKind::Message).unwrap());
    }
}
