use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, instrument};

use traffic_core::types::InviteLinkId;

use crate::db::init_db;
use crate::error::{FunnelError, Result};
use crate::types::{FunnelConversion, InviteLink};

/// Persists `InviteLink` and `FunnelConversion` rows.
pub struct InviteLinkStore {
    conn: Mutex<Connection>,
}

impl InviteLinkStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &self,
        vip_channel_id: &str,
        invite_hash: &str,
        url: &str,
        expire_date: DateTime<Utc>,
        usage_limit: u32,
        publisher_account_id: &str,
        public_channel: &str,
        teaser_message_id: i64,
        auto_delete_at: DateTime<Utc>,
    ) -> Result<InviteLinkId> {
        let invite_link_id = InviteLinkId::new();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO invite_links
                (invite_link_id, vip_channel_id, invite_hash, url, expire_date, usage_limit,
                 status, total_uses, total_joins, publisher_account_id, public_channel,
                 teaser_message_id, auto_delete_at, deleted, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,'active',0,0,?7,?8,?9,?10,0,?11)",
            params![
                invite_link_id.as_str(),
                vip_channel_id,
                invite_hash,
                url,
                expire_date.to_rfc3339(),
                usage_limit,
                publisher_account_id,
                public_channel,
                teaser_message_id,
                auto_delete_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        info!(invite_link_id = %invite_link_id, vip_channel_id, "invite link created");
        Ok(invite_link_id)
    }

    pub fn get(&self, invite_link_id: &InviteLinkId) -> Result<InviteLink> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            SELECT_SQL,
            params![invite_link_id.as_str()],
            row_to_invite,
        )
        .optional()?
        .ok_or_else(|| FunnelError::NotFound {
            id: invite_link_id.to_string(),
        })
    }

    /// The most recent still-`active` link matching `invite_hash` — used to
    /// attribute a join event. "Most recent" matters only
    /// if a hash were ever reused; Telegram invite hashes are unique per
    /// link, so this is a defensive `ORDER BY` rather than a real tie-break.
    pub fn active_by_hash(&self, invite_hash: &str) -> Result<Option<InviteLink>> {
        let sql = format!("{SELECT_FROM} WHERE invite_hash = ?1 AND status = 'active' ORDER BY created_at DESC LIMIT 1");
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(&sql, params![invite_hash], row_to_invite)
            .optional()?;
        Ok(row)
    }

    /// Active links whose `expire_date` has passed — the per-minute sweep's
    /// expiry candidates.
    pub fn due_for_expiry(&self, now: DateTime<Utc>) -> Result<Vec<InviteLink>> {
        let sql = format!("{SELECT_FROM} WHERE status = 'active' AND expire_date <= ?1");
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![now.to_rfc3339()], row_to_invite)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Non-deleted teaser posts whose `auto_delete_at` has passed.
    pub fn due_for_deletion(&self, now: DateTime<Utc>) -> Result<Vec<InviteLink>> {
        let sql = format!("{SELECT_FROM} WHERE deleted = 0 AND auto_delete_at <= ?1");
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![now.to_rfc3339()], row_to_invite)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Transitions `active` -> `expired`. A CAS on `status` so a sweep racing
    /// a concurrent `revoke`/`exhaust` transition never clobbers it.
    #[instrument(skip(self))]
    pub fn mark_expired(&self, invite_link_id: &InviteLinkId) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE invite_links SET status = 'expired' WHERE invite_link_id = ?1 AND status = 'active'",
            params![invite_link_id.as_str()],
        )?;
        Ok(n > 0)
    }

    /// Explicit admin action.
    pub fn revoke(&self, invite_link_id: &InviteLinkId) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE invite_links SET status = 'revoked' WHERE invite_link_id = ?1 AND status = 'active'",
            params![invite_link_id.as_str()],
        )?;
        Ok(n > 0)
    }

    pub fn mark_deleted(&self, invite_link_id: &InviteLinkId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE invite_links SET deleted = 1 WHERE invite_link_id = ?1",
            params![invite_link_id.as_str()],
        )?;
        Ok(())
    }

    /// Records one join against `invite_link_id`: increments `total_uses`
    /// and `total_joins`, transitioning to `exhausted` if the usage limit is
    /// now reached, and inserts the `FunnelConversion` row — all in one
    /// transaction so the invariant "every FunnelConversion references a row
    /// that existed at joined_at" never observes a partial write.
    /// Idempotent on `(user_id, invite_link_id)`: a duplicate join event for
    /// the same user against the same link is ignored.
    #[instrument(skip(self))]
    pub fn record_join(
        &self,
        invite_link_id: &InviteLinkId,
        user_id: &str,
        source_channel_id: &str,
        joined_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO funnel_conversions
                (user_id, invite_link_id, source_channel_id, joined_at, verified_as_partner, status)
             VALUES (?1,?2,?3,?4,NULL,'joined')",
            params![user_id, invite_link_id.as_str(), source_channel_id, joined_at.to_rfc3339()],
        )?;

        if inserted > 0 {
            tx.execute(
                "UPDATE invite_links SET total_uses = total_uses + 1, total_joins = total_joins + 1
                 WHERE invite_link_id = ?1",
                params![invite_link_id.as_str()],
            )?;
            let (total_joins, usage_limit): (i64, i64) = tx.query_row(
                "SELECT total_joins, usage_limit FROM invite_links WHERE invite_link_id = ?1",
                params![invite_link_id.as_str()],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )?;
            if total_joins >= usage_limit {
                tx.execute(
                    "UPDATE invite_links SET status = 'exhausted'
                     WHERE invite_link_id = ?1 AND status = 'active'",
                    params![invite_link_id.as_str()],
                )?;
            }
        }

        tx.commit()?;
        if inserted > 0 {
            info!(invite_link_id = %invite_link_id, user_id, "funnel conversion recorded");
        }
        Ok(inserted > 0)
    }

    pub fn set_verified(&self, user_id: &str, invite_link_id: &InviteLinkId, verified: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE funnel_conversions SET verified_as_partner = ?1
             WHERE user_id = ?2 AND invite_link_id = ?3",
            params![verified as i64, user_id, invite_link_id.as_str()],
        )?;
        Ok(())
    }

    pub fn conversions_for_link(&self, invite_link_id: &InviteLinkId) -> Result<Vec<FunnelConversion>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT user_id, invite_link_id, source_channel_id, joined_at, verified_as_partner, status
             FROM funnel_conversions WHERE invite_link_id = ?1 ORDER BY joined_at ASC",
        )?;
        let rows = stmt
            .query_map(params![invite_link_id.as_str()], row_to_conversion)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

const SELECT_FROM: &str = "SELECT invite_link_id, vip_channel_id, invite_hash, url, expire_date,
        usage_limit, status, total_uses, total_joins, publisher_account_id, public_channel,
        teaser_message_id, auto_delete_at, deleted, created_at
    FROM invite_links";
const SELECT_SQL: &str = "SELECT invite_link_id, vip_channel_id, invite_hash, url, expire_date,
        usage_limit, status, total_uses, total_joins, publisher_account_id, public_channel,
        teaser_message_id, auto_delete_at, deleted, created_at
    FROM invite_links WHERE invite_link_id = ?1";

fn row_to_invite(row: &rusqlite::Row<'_>) -> rusqlite::Result<InviteLink> {
    let parse_dt = |s: String| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    };
    Ok(InviteLink {
        invite_link_id: row.get(0)?,
        vip_channel_id: row.get(1)?,
        invite_hash: row.get(2)?,
        url: row.get(3)?,
        expire_date: parse_dt(row.get(4)?),
        usage_limit: row.get::<_, i64>(5)? as u32,
        status: traffic_core::types::InviteStatus::from_str(&row.get::<_, String>(6)?)
            .unwrap_or(traffic_core::types::InviteStatus::Active),
        total_uses: row.get::<_, i64>(7)? as u32,
        total_joins: row.get::<_, i64>(8)? as u32,
        publisher_account_id: row.get(9)?,
        public_channel: row.get(10)?,
        teaser_message_id: row.get(11)?,
        auto_delete_at: parse_dt(row.get(12)?),
        deleted: row.get::<_, i64>(13)? != 0,
        created_at: parse_dt(row.get(14)?),
    })
}

fn row_to_conversion(row: &rusqlite::Row<'_>) -> rusqlite::Result<FunnelConversion> {
    let joined_at: String = row.get(3)?;
    let verified: Option<i64> = row.get(4)?;
    Ok(FunnelConversion {
        user_id: row.get(0)?,
        invite_link_id: row.get(1)?,
        source_channel_id: row.get(2)?,
        joined_at: DateTime::parse_from_rfc3339(&joined_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        verified_as_partner: verified.map(|v| v != 0),
        status: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> InviteLinkStore {
        InviteLinkStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn make_link(s: &InviteLinkStore, expire: DateTime<Utc>, usage_limit: u32) -> InviteLinkId {
        s.create(
            "@vip",
            "hash-1",
            "https://t.me/+hash-1",
            expire,
            usage_limit,
            "publisher-acc",
            "@teaser",
            7,
            expire,
        )
        .unwrap()
    }

    #[test]
    fn create_then_get_round_trips() {
        let s = store();
        let now = Utc::now();
        let id = make_link(&s, now + Duration::hours(2), 25);
        let link = s.get(&id).unwrap();
        assert_eq!(link.status, traffic_core::types::InviteStatus::Active);
        assert_eq!(link.total_uses, 0);
    }

    #[test]
    fn due_for_expiry_only_returns_past_expire_date() {
        let s = store();
        let now = Utc::now();
        make_link(&s, now - Duration::seconds(1), 25);
        assert_eq!(s.due_for_expiry(now).unwrap().len(), 1);
        assert_eq!(s.due_for_expiry(now - Duration::hours(1)).unwrap().len(), 0);
    }

    #[test]
    fn record_join_is_idempotent_per_user() {
        let s = store();
        let now = Utc::now();
        let id = make_link(&s, now + Duration::hours(2), 25);

        assert!(s.record_join(&id, "user-1", "@public", now).unwrap());
        assert!(!s.record_join(&id, "user-1", "@public", now).unwrap());

        let link = s.get(&id).unwrap();
        assert_eq!(link.total_joins, 1);
        assert_eq!(s.conversions_for_link(&id).unwrap().len(), 1);
    }

    #[test]
    fn record_join_transitions_to_exhausted_at_usage_limit() {
        let s = store();
        let now = Utc::now();
        let id = make_link(&s, now + Duration::hours(2), 2);

        s.record_join(&id, "user-1", "@public", now).unwrap();
        assert_eq!(s.get(&id).unwrap().status, traffic_core::types::InviteStatus::Active);
        s.record_join(&id, "user-2", "@public", now).unwrap();
        assert_eq!(s.get(&id).unwrap().status, traffic_core::types::InviteStatus::Exhausted);
    }

    #[test]
    fn mark_expired_is_cas_and_active_by_hash_then_excludes_it() {
        let s = store();
        let now = Utc::now();
        let id = make_link(&s, now - Duration::seconds(1), 25);

        assert!(s.active_by_hash("hash-1").unwrap().is_some());
        assert!(s.mark_expired(&id).unwrap());
        assert!(!s.mark_expired(&id).unwrap());
        assert!(s.active_by_hash("hash-1").unwrap().is_none());
    }
}
