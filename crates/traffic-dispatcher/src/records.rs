use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{instrument, warn};

use traffic_core::types::{
    AccountId, ActionId, ActionKind, ActionOutcome, ErrorKind, Strategy,
};

use crate::db::init_db;
use crate::error::Result;
use crate::types::ActionRecord;

/// Append-only log of executed actions. The only
/// mutation allowed after `begin`/`complete` is reply-outcome attribution.
pub struct ActionRecordStore {
    conn: Mutex<Connection>,
}

impl ActionRecordStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Inserts the `started` half of a record before the transport call is
    /// made, so a crash mid-call leaves a reconcilable trace.
    pub fn begin(&self, account_id: &AccountId, kind: ActionKind, target_ref: &str) -> Result<ActionId> {
        let action_id = ActionId::new();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO action_records (action_id, account_id, kind, target_ref, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                action_id.as_str(),
                account_id.as_str(),
                kind.to_string(),
                target_ref,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(action_id)
    }

    /// Fills in the `finished` half once the transport call returns.
    #[allow(clippy::too_many_arguments)]
    pub fn complete(
        &self,
        action_id: &ActionId,
        outcome: ActionOutcome,
        error_kind: Option<ErrorKind>,
        comment_message_id: Option<i64>,
        strategy_used: Option<Strategy>,
        post_topic: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE action_records
             SET finished_at = ?1, outcome = ?2, error_kind = ?3, comment_message_id = ?4,
                 strategy_used = ?5, post_topic = ?6
             WHERE action_id = ?7",
            params![
                Utc::now().to_rfc3339(),
                outcome.to_string(),
                error_kind.map(|e| e.to_string()),
                comment_message_id,
                strategy_used.map(|s| s.to_string()),
                post_topic,
                action_id.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, action_id: &ActionId) -> Result<ActionRecord> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            SELECT_SQL,
            params![action_id.as_str()],
            row_to_record,
        )
        .map_err(Into::into)
    }

    /// Records reply/reaction attribution onto an already-finished record
    ///.
    pub fn record_reply_outcome(&self, action_id: &ActionId, got_reply: bool, reply_count: u32) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE action_records SET got_reply = ?1, reply_count = ?2 WHERE action_id = ?3",
            params![got_reply as i64, reply_count, action_id.as_str()],
        )?;
        Ok(())
    }

    /// On startup, any record with `finished_at IS NULL` represents an
    /// in-flight attempt interrupted by a crash or restart; it is reconciled
    /// as `error` without retrying the transport call, so a restart never
    /// risks a duplicate send.
    #[instrument(skip(self))]
    pub fn reconcile_unfinished(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let n = conn.execute(
            "UPDATE action_records
             SET finished_at = ?1, outcome = 'error', error_kind = 'persistence_error'
             WHERE finished_at IS NULL",
            params![now],
        )?;
        if n > 0 {
            warn!(count = n, "reconciled unfinished action records on startup");
        }
        Ok(n)
    }

    /// Per-account detail projection for the admin surface.
    pub fn recent_for_account(&self, account_id: &AccountId, limit: u32) -> Result<Vec<ActionRecord>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("{SELECT_SQL} WHERE account_id = ?1 ORDER BY started_at DESC LIMIT ?2");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![account_id.as_str(), limit], row_to_record)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Error digest projection: recent `error` outcomes grouped by
    /// `error_kind` over the last `hours`.
    pub fn error_digest(&self, hours: u32) -> Result<Vec<(ErrorKind, u32)>> {
        let conn = self.conn.lock().unwrap();
        let cutoff = (Utc::now() - chrono::Duration::hours(hours as i64)).to_rfc3339();
        let mut stmt = conn.prepare(
            "SELECT error_kind, COUNT(*) FROM action_records
             WHERE outcome = 'error' AND started_at >= ?1 AND error_kind IS NOT NULL
             GROUP BY error_kind ORDER BY COUNT(*) DESC",
        )?;
        let rows = stmt
            .query_map(params![cutoff], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
            })?
            .filter_map(|r| r.ok())
            .filter_map(|(k, c)| ErrorKind::from_str(&k).ok().map(|k| (k, c as u32)))
            .collect();
        Ok(rows)
    }

    /// True when `target_ref` already has a `comment` `ActionRecord` — the
    /// per-post exclusivity invariant, checked
    /// defensively in addition to the channel monitor's own claim CAS.
    pub fn has_comment_for_target(&self, target_ref: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM action_records WHERE kind = 'comment' AND target_ref = ?1 LIMIT 1",
                params![target_ref],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

const SELECT_SQL: &str = "SELECT action_id, account_id, kind, target_ref, started_at, finished_at,
        outcome, error_kind, comment_message_id, strategy_used, relevance_score, post_topic,
        got_reply, reply_count
    FROM action_records";

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActionRecord> {
    let parse_dt = |s: String| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    };
    let finished_at: Option<String> = row.get(5)?;
    let outcome: Option<String> = row.get(6)?;
    let error_kind: Option<String> = row.get(7)?;
    let strategy_used: Option<String> = row.get(9)?;

    Ok(ActionRecord {
        action_id: row.get::<_, String>(0)?.into(),
        account_id: row.get::<_, String>(1)?.into(),
        kind: ActionKind::from_str(&row.get::<_, String>(2)?).unwrap_or(ActionKind::Comment),
        target_ref: row.get(3)?,
        started_at: parse_dt(row.get(4)?),
        finished_at: finished_at.map(parse_dt),
        outcome: outcome.and_then(|s| ActionOutcome::from_str(&s).ok()),
        error_kind: error_kind.and_then(|s| ErrorKind::from_str(&s).ok()),
        comment_message_id: row.get(8)?,
        strategy_used: strategy_used.and_then(|s| Strategy::from_str(&s).ok()),
        relevance_score: row.get(10)?,
        post_topic: row.get(11)?,
        got_reply: row.get::<_, i64>(12)? != 0,
        reply_count: row.get::<_, i64>(13)? as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ActionRecordStore {
        ActionRecordStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn begin_then_complete_round_trips() {
        let s = store();
        let acc = AccountId::new();
        let action_id = s.begin(&acc, ActionKind::Comment, "@c:42").unwrap();

        let record = s.get(&action_id).unwrap();
        assert!(record.finished_at.is_none());
        assert!(record.outcome.is_none());

        s.complete(
            &action_id,
            ActionOutcome::Success,
            None,
            Some(99),
            Some(Strategy::Smart),
            Some("detox"),
        )
        .unwrap();

        let record = s.get(&action_id).unwrap();
        assert!(record.finished_at.is_some());
        assert_eq!(record.outcome, Some(ActionOutcome::Success));
        assert_eq!(record.comment_message_id, Some(99));
    }

    #[test]
    fn reconcile_unfinished_marks_started_only_records_as_error() {
        let s = store();
        let acc = AccountId::new();
        let action_id = s.begin(&acc, ActionKind::Comment, "@c:1").unwrap();

        let n = s.reconcile_unfinished().unwrap();
        assert_eq!(n, 1);

        let record = s.get(&action_id).unwrap();
        assert_eq!(record.outcome, Some(ActionOutcome::Error));
        assert_eq!(record.error_kind, Some(ErrorKind::PersistenceError));
    }

    #[test]
    fn has_comment_for_target_reflects_existing_comment_record() {
        let s = store();
        let acc = AccountId::new();
        assert!(!s.has_comment_for_target("@c:42").unwrap());
        s.begin(&acc, ActionKind::Comment, "@c:42").unwrap();
        assert!(s.has_comment_for_target("@c:42").unwrap());
    }

    #[test]
    fn error_digest_groups_by_error_kind() {
        let s = store();
        let acc = AccountId::new();
        let a1 = s.begin(&acc, ActionKind::Comment, "@c:1").unwrap();
        s.complete(&a1, ActionOutcome::Error, Some(ErrorKind::PeerNotAccessible), None, None, None)
            .unwrap();
        let a2 = s.begin(&acc, ActionKind::Comment, "@c:2").unwrap();
        s.complete(&a2, ActionOutcome::Error, Some(ErrorKind::PeerNotAccessible), None, None, None)
            .unwrap();

        let digest = s.error_digest(24).unwrap();
        assert_eq!(digest, vec![(ErrorKind::PeerNotAccessible, 2)]);
    }
}
