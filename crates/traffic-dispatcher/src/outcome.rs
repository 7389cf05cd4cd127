use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use traffic_core::types::{AccountId, ActionId, Strategy};

use crate::db::init_db;
use crate::error::Result;
use crate::types::OutcomePending;

/// Durable queue the Reply Poller drains. Backed
/// by SQLite rather than an in-memory channel so a restart between a
/// comment's execution and its 30-minute outcome poll loses nothing.
pub struct OutcomePendingStore {
    conn: Mutex<Connection>,
}

impl OutcomePendingStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn enqueue(
        &self,
        action_id: &ActionId,
        account_id: &AccountId,
        channel: &str,
        comment_message_id: i64,
        context_segment: &str,
        context_channel: &str,
        context_time_slot: &str,
        context_post_topic: &str,
        strategy: Strategy,
        poll_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO outcome_pending
                (action_id, account_id, channel, comment_message_id, context_segment,
                 context_channel, context_time_slot, context_post_topic, strategy, poll_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            params![
                action_id.as_str(),
                account_id.as_str(),
                channel,
                comment_message_id,
                context_segment,
                context_channel,
                context_time_slot,
                context_post_topic,
                strategy.to_string(),
                poll_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Rows whose `poll_at` has arrived and have not yet been processed.
    pub fn due(&self, now: DateTime<Utc>) -> Result<Vec<OutcomePending>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT action_id, account_id, channel, comment_message_id, context_segment,
                    context_channel, context_time_slot, context_post_topic, strategy, poll_at
             FROM outcome_pending WHERE processed = 0 AND poll_at <= ?1
             ORDER BY poll_at ASC",
        )?;
        let rows = stmt
            .query_map(params![now.to_rfc3339()], row_to_pending)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Marks a row processed; idempotent under a CAS so a poller restarting
    /// mid-batch never double-attributes the same row.
    pub fn mark_processed(&self, action_id: &ActionId) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE outcome_pending SET processed = 1 WHERE action_id = ?1 AND processed = 0",
            params![action_id.as_str()],
        )?;
        Ok(n > 0)
    }
}

fn row_to_pending(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutcomePending> {
    use std::str::FromStr;
    let poll_at: String = row.get(9)?;
    let strategy: String = row.get(8)?;
    Ok(OutcomePending {
        action_id: row.get::<_, String>(0)?.into(),
        account_id: row.get::<_, String>(1)?.into(),
        channel: row.get(2)?,
        comment_message_id: row.get(3)?,
        context_segment: row.get(4)?,
        context_channel: row.get(5)?,
        context_time_slot: row.get(6)?,
        context_post_topic: row.get(7)?,
        strategy: Strategy::from_str(&strategy).unwrap_or(Strategy::Smart),
        poll_at: chrono::DateTime::parse_from_rfc3339(&poll_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> OutcomePendingStore {
        OutcomePendingStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn due_only_returns_rows_at_or_past_poll_at() {
        let s = store();
        let now = Utc::now();
        let action_id = ActionId::new();
        s.enqueue(
            &action_id,
            &AccountId::new(),
            "@c",
            99,
            "zozh",
            "@c",
            "morning",
            "detox",
            Strategy::Smart,
            now + Duration::minutes(30),
        )
        .unwrap();

        assert!(s.due(now).unwrap().is_empty());
        assert_eq!(s.due(now + Duration::minutes(31)).unwrap().len(), 1);
    }

    #[test]
    fn mark_processed_is_cas_idempotent() {
        let s = store();
        let action_id = ActionId::new();
        s.enqueue(
            &action_id,
            &AccountId::new(),
            "@c",
            99,
            "zozh",
            "@c",
            "morning",
            "detox",
            Strategy::Smart,
            Utc::now(),
        )
        .unwrap();

        assert!(s.mark_processed(&action_id).unwrap());
        assert!(!s.mark_processed(&action_id).unwrap());
    }
}
