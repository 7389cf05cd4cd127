use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use traffic_core::types::{AccountId, AccountStatus, Segment, SpamStatus};

use crate::db::{init_db, row_to_account, ACCOUNT_SELECT_SQL};
use crate::error::{AccountError, Result};
use crate::types::{Account, NewAccount};

/// Account State Store: CRUD plus the account lifecycle state
/// machine. Every mutation is a compare-and-set on `status` so concurrent
/// dispatcher fibers never race each other into an invalid transition.
pub struct AccountStore {
    conn: Mutex<Connection>,
}

impl AccountStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[instrument(skip(self, new))]
    pub fn create(&self, new: NewAccount) -> Result<Account> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let id = Uuid::now_v7().to_string();
        conn.execute(
            "INSERT INTO accounts
                (account_id, phone_identifier, segment, display_name, persona_bio,
                 proxy_id, linked_channel_id, status, phase, day_in_phase,
                 warmup_completed, last_activity_at, paused_until, ban_reason, spam_status,
                 spam_checked_at, timezone_override, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,NULL,NULL,'new',1,1,0,NULL,NULL,NULL,'ok',NULL,?6,?7,?7)",
            params![
                id,
                new.phone_identifier,
                new.segment.to_string(),
                new.persona.display_name,
                new.persona.bio,
                new.timezone_override,
                now,
            ],
        )?;
        info!(account_id = %id, segment = %new.segment, "account created");
        self.get(&id.into())
    }

    pub fn get(&self, account_id: &AccountId) -> Result<Account> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("{ACCOUNT_SELECT_SQL} WHERE account_id = ?1");
        conn.query_row(&sql, params![account_id.as_str()], row_to_account)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => AccountError::NotFound {
                    id: account_id.to_string(),
                },
                other => AccountError::Database(other),
            })
    }

    /// Accounts with the given status, optionally narrowed to a segment.
    pub fn list_by_status(
        &self,
        status: AccountStatus,
        segment: Option<Segment>,
    ) -> Result<Vec<Account>> {
        let conn = self.conn.lock().unwrap();
        let accounts = if let Some(seg) = segment {
            let sql = format!("{ACCOUNT_SELECT_SQL} WHERE status = ?1 AND segment = ?2");
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map(params![status.to_string(), seg.to_string()], row_to_account)?
                .filter_map(|r| r.ok())
                .collect()
        } else {
            let sql = format!("{ACCOUNT_SELECT_SQL} WHERE status = ?1");
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map(params![status.to_string()], row_to_account)?
                .filter_map(|r| r.ok())
                .collect()
        };
        Ok(accounts)
    }

    /// Compare-and-set status transition. Rejects transitions not in the
    /// state machine, and rejects `paused -> active` unless the
    /// account's last spam check was `ok`.
    #[instrument(skip(self))]
    pub fn transition(
        &self,
        account_id: &AccountId,
        from: AccountStatus,
        to: AccountStatus,
    ) -> Result<Account> {
        if !allowed_transition(from, to) {
            return Err(AccountError::InvalidTransition {
                id: account_id.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let conn = self.conn.lock().unwrap();
        if from == AccountStatus::Paused && to == AccountStatus::Active {
            let spam_status: String = conn.query_row(
                "SELECT spam_status FROM accounts WHERE account_id = ?1",
                params![account_id.as_str()],
                |r| r.get(0),
            )?;
            if spam_status != SpamStatus::Ok.to_string() {
                return Err(AccountError::InvalidTransition {
                    id: account_id.to_string(),
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
        }

        let now = Utc::now().to_rfc3339();
        // Resuming to `active` always clears any flood-wait wake time —
        // whether the resume happened because `paused_until` elapsed or
        // because of an explicit admin resume.
        let n = conn.execute(
            "UPDATE accounts SET status = ?1, updated_at = ?2,
                paused_until = CASE WHEN ?1 = 'active' THEN NULL ELSE paused_until END
             WHERE account_id = ?3 AND status = ?4",
            params![to.to_string(), now, account_id.as_str(), from.to_string()],
        )?;
        if n == 0 {
            return Err(AccountError::InvalidTransition {
                id: account_id.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        info!(account_id = %account_id, %from, %to, "account transitioned");
        drop(conn);
        self.get(account_id)
    }

    /// Parks the account in `paused` with a wake time, for a long flood-wait
    /// (§4.3: "park the account in cooldown status for the required
    /// duration"). Unlike an admin pause, `resume_expired_pauses` will
    /// automatically transition the account back to `active` once
    /// `wake_at` passes.
    #[instrument(skip(self))]
    pub fn pause_until(&self, account_id: &AccountId, from: AccountStatus, wake_at: chrono::DateTime<Utc>) -> Result<Account> {
        if !allowed_transition(from, AccountStatus::Paused) {
            return Err(AccountError::InvalidTransition {
                id: account_id.to_string(),
                from: from.to_string(),
                to: AccountStatus::Paused.to_string(),
            });
        }
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let n = conn.execute(
            "UPDATE accounts SET status = 'paused', paused_until = ?1, updated_at = ?2
             WHERE account_id = ?3 AND status = ?4",
            params![wake_at.to_rfc3339(), now, account_id.as_str(), from.to_string()],
        )?;
        if n == 0 {
            return Err(AccountError::InvalidTransition {
                id: account_id.to_string(),
                from: from.to_string(),
                to: AccountStatus::Paused.to_string(),
            });
        }
        warn!(account_id = %account_id, wake_at = %wake_at, "account paused with flood-wait wake time");
        drop(conn);
        self.get(account_id)
    }

    /// Auto-resumes every `paused` account whose flood-wait `paused_until`
    /// has passed and whose last spam check is still `ok`, mirroring the
    /// guard `transition` applies to an admin `paused -> active` resume.
    /// Returns the ids resumed.
    #[instrument(skip(self))]
    pub fn resume_expired_pauses(&self) -> Result<Vec<AccountId>> {
        let paused = self.list_by_status(AccountStatus::Paused, None)?;
        let now = Utc::now();
        let mut resumed = Vec::new();
        for account in paused {
            let Some(wake_at) = account.paused_until else { continue };
            if wake_at > now || account.spam_status != SpamStatus::Ok {
                continue;
            }
            match self.transition(&account.account_id, AccountStatus::Paused, AccountStatus::Active) {
                Ok(_) => {
                    info!(account_id = %account.account_id, "flood-wait elapsed, account auto-resumed");
                    resumed.push(account.account_id);
                }
                Err(e) => warn!(account_id = %account.account_id, "failed to auto-resume account: {e}"),
            }
        }
        Ok(resumed)
    }

    /// Records a spam-check verdict and applies its side effects: `limited`
    /// parks an active account, `banned` terminates it regardless of its
    /// current status (except an already-banned account, which is a no-op).
    #[instrument(skip(self))]
    pub fn record_spam_check(&self, account_id: &AccountId, verdict: SpamStatus) -> Result<Account> {
        {
            let conn = self.conn.lock().unwrap();
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE accounts SET spam_status = ?1, spam_checked_at = ?2, updated_at = ?2
                 WHERE account_id = ?3",
                params![verdict.to_string(), now, account_id.as_str()],
            )?;
        }

        let account = self.get(account_id)?;
        match verdict {
            SpamStatus::Banned if account.status != AccountStatus::Banned => {
                self.mark_banned(account_id, "spam_check_banned")
            }
            SpamStatus::Limited if account.status == AccountStatus::Active => {
                self.transition(account_id, AccountStatus::Active, AccountStatus::Paused)
            }
            _ => Ok(account),
        }
    }

    /// Terminal transition: any status (except already-banned) to `banned`.
    #[instrument(skip(self))]
    pub fn mark_banned(&self, account_id: &AccountId, reason: &str) -> Result<Account> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let n = conn.execute(
            "UPDATE accounts SET status = 'banned', ban_reason = ?1, updated_at = ?2
             WHERE account_id = ?3 AND status != 'banned'",
            params![reason, now, account_id.as_str()],
        )?;
        if n > 0 {
            warn!(account_id = %account_id, reason, "account banned");
        }
        drop(conn);
        self.get(account_id)
    }

    pub fn set_proxy(&self, account_id: &AccountId, proxy_id: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE accounts SET proxy_id = ?1, updated_at = ?2 WHERE account_id = ?3",
            params![proxy_id, Utc::now().to_rfc3339(), account_id.as_str()],
        )?;
        Ok(())
    }

    pub fn set_linked_channel(&self, account_id: &AccountId, channel_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE accounts SET linked_channel_id = ?1, updated_at = ?2 WHERE account_id = ?3",
            params![channel_id, Utc::now().to_rfc3339(), account_id.as_str()],
        )?;
        Ok(())
    }

    /// Advances the warmup position. Called by the Warmup Planner on a new
    /// local day; `completed` flips `warmup_completed` once phase 4 finishes,
    /// which the caller then follows with a `warming -> active` transition.
    pub fn advance_warmup(
        &self,
        account_id: &AccountId,
        phase: u8,
        day_in_phase: u32,
        completed: bool,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE accounts SET phase = ?1, day_in_phase = ?2, warmup_completed = ?3,
                updated_at = ?4
             WHERE account_id = ?5",
            params![
                phase as i64,
                day_in_phase as i64,
                completed as i64,
                Utc::now().to_rfc3339(),
                account_id.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn touch_activity(&self, account_id: &AccountId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE accounts SET last_activity_at = ?1, updated_at = ?1 WHERE account_id = ?2",
            params![Utc::now().to_rfc3339(), account_id.as_str()],
        )?;
        Ok(())
    }

    /// Fleet overview: per-status counts, for the admin surface.
    pub fn status_counts(&self) -> Result<Vec<(AccountStatus, u32)>> {
        use std::str::FromStr;
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM accounts GROUP BY status ORDER BY status")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
            .filter_map(|r| r.ok())
            .filter_map(|(s, c)| AccountStatus::from_str(&s).ok().map(|st| (st, c as u32)))
            .collect();
        Ok(rows)
    }

    /// Row lookup bypassing `Account` instantiation, for a quick existence
    /// check without cloning the whole record (used by `transition`'s CAS
    /// check path above, kept private to the crate).
    pub(crate) fn exists(&self, account_id: &AccountId) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM accounts WHERE account_id = ?1",
                params![account_id.as_str()],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

/// The account lifecycle state machine. `paused -> active` has
/// an additional spam-status guard applied by the caller.
fn allowed_transition(from: AccountStatus, to: AccountStatus) -> bool {
    use AccountStatus::*;
    if to == Banned {
        return from != Banned;
    }
    matches!(
        (from, to),
        (New, Warming) | (Warming, Active) | (Active, Paused) | (Paused, Active)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use traffic_core::types::Segment;

    fn store() -> AccountStore {
        AccountStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn new_account() -> NewAccount {
        NewAccount {
            phone_identifier: "phone-hash-1".into(),
            segment: Segment::Zozh,
            persona: crate::types::Persona {
                display_name: "Anya".into(),
                bio: None,
            },
            timezone_override: None,
        }
    }

    #[test]
    fn create_starts_new_phase_one() {
        let s = store();
        let acc = s.create(new_account()).unwrap();
        assert_eq!(acc.status, AccountStatus::New);
        assert_eq!(acc.phase, 1);
        assert_eq!(acc.day_in_phase, 1);
        assert!(!acc.warmup_completed);
    }

    #[test]
    fn lifecycle_new_to_warming_to_active_to_paused_to_active() {
        let s = store();
        let acc = s.create(new_account()).unwrap();
        let id = acc.account_id;

        let acc = s
            .transition(&id, AccountStatus::New, AccountStatus::Warming)
            .unwrap();
        assert_eq!(acc.status, AccountStatus::Warming);

        let acc = s
            .transition(&id, AccountStatus::Warming, AccountStatus::Active)
            .unwrap();
        assert_eq!(acc.status, AccountStatus::Active);

        let acc = s
            .transition(&id, AccountStatus::Active, AccountStatus::Paused)
            .unwrap();
        assert_eq!(acc.status, AccountStatus::Paused);

        // Resume requires spam_status == ok, which is the default.
        let acc = s
            .transition(&id, AccountStatus::Paused, AccountStatus::Active)
            .unwrap();
        assert_eq!(acc.status, AccountStatus::Active);
    }

    #[test]
    fn invalid_transition_rejected() {
        let s = store();
        let acc = s.create(new_account()).unwrap();
        let err = s
            .transition(&acc.account_id, AccountStatus::New, AccountStatus::Active)
            .unwrap_err();
        assert!(matches!(err, AccountError::InvalidTransition { .. }));
    }

    #[test]
    fn cas_prevents_racing_transition_from_stale_state() {
        let s = store();
        let acc = s.create(new_account()).unwrap();
        s.transition(&acc.account_id, AccountStatus::New, AccountStatus::Warming)
            .unwrap();
        // A second caller still believes the account is `new`.
        let err = s
            .transition(&acc.account_id, AccountStatus::New, AccountStatus::Warming)
            .unwrap_err();
        assert!(matches!(err, AccountError::InvalidTransition { .. }));
    }

    #[test]
    fn banned_is_terminal() {
        let s = store();
        let acc = s.create(new_account()).unwrap();
        let acc = s.mark_banned(&acc.account_id, "test").unwrap();
        assert_eq!(acc.status, AccountStatus::Banned);
        assert_eq!(acc.ban_reason.as_deref(), Some("test"));

        let err = s
            .transition(&acc.account_id, AccountStatus::Banned, AccountStatus::Active)
            .unwrap_err();
        assert!(matches!(err, AccountError::InvalidTransition { .. }));
    }

    #[test]
    fn spam_check_banned_overrides_any_status() {
        let s = store();
        let acc = s.create(new_account()).unwrap();
        s.transition(&acc.account_id, AccountStatus::New, AccountStatus::Warming)
            .unwrap();
        let acc = s
            .record_spam_check(&acc.account_id, SpamStatus::Banned)
            .unwrap();
        assert_eq!(acc.status, AccountStatus::Banned);
        assert_eq!(acc.spam_status, SpamStatus::Banned);
    }

    #[test]
    fn spam_check_limited_pauses_active_account() {
        let s = store();
        let acc = s.create(new_account()).unwrap();
        s.transition(&acc.account_id, AccountStatus::New, AccountStatus::Warming)
            .unwrap();
        s.transition(&acc.account_id, AccountStatus::Warming, AccountStatus::Active)
            .unwrap();
        let acc = s
            .record_spam_check(&acc.account_id, SpamStatus::Limited)
            .unwrap();
        assert_eq!(acc.status, AccountStatus::Paused);
    }

    #[test]
    fn paused_cannot_resume_while_spam_limited() {
        let s = store();
        let acc = s.create(new_account()).unwrap();
        s.transition(&acc.account_id, AccountStatus::New, AccountStatus::Warming)
            .unwrap();
        s.transition(&acc.account_id, AccountStatus::Warming, AccountStatus::Active)
            .unwrap();
        let acc = s
            .record_spam_check(&acc.account_id, SpamStatus::Limited)
            .unwrap();
        assert_eq!(acc.status, AccountStatus::Paused);
        let err = s
            .transition(&acc.account_id, AccountStatus::Paused, AccountStatus::Active)
            .unwrap_err();
        assert!(matches!(err, AccountError::InvalidTransition { .. }));
    }

    #[test]
    fn list_by_status_filters_by_segment() {
        let s = store();
        s.create(new_account()).unwrap();
        let mut other = new_account();
        other.segment = Segment::Business;
        s.create(other).unwrap();

        let zozh_new = s
            .list_by_status(AccountStatus::New, Some(Segment::Zozh))
            .unwrap();
        assert_eq!(zozh_new.len(), 1);

        let all_new = s.list_by_status(AccountStatus::New, None).unwrap();
        assert_eq!(all_new.len(), 2);
    }

    #[test]
    fn advance_warmup_updates_position() {
        let s = store();
        let acc = s.create(new_account()).unwrap();
        s.advance_warmup(&acc.account_id, 2, 1, false).unwrap();
        let acc = s.get(&acc.account_id).unwrap();
        assert_eq!(acc.phase, 2);
        assert_eq!(acc.day_in_phase, 1);
        assert!(!acc.warmup_completed);
    }

    #[test]
    fn exists_reflects_presence() {
        let s = store();
        let acc = s.create(new_account()).unwrap();
        assert!(s.exists(&acc.account_id).unwrap());
        assert!(!s.exists(&AccountId::new()).unwrap());
    }

    #[test]
    fn pause_until_parks_account_with_wake_time_scenario_b() {
        let s = store();
        let acc = s.create(new_account()).unwrap();
        s.transition(&acc.account_id, AccountStatus::New, AccountStatus::Warming)
            .unwrap();
        s.transition(&acc.account_id, AccountStatus::Warming, AccountStatus::Active)
            .unwrap();

        let wake_at = Utc::now() + chrono::Duration::seconds(3600);
        let acc = s.pause_until(&acc.account_id, AccountStatus::Active, wake_at).unwrap();

        assert_eq!(acc.status, AccountStatus::Paused);
        assert_eq!(acc.paused_until.unwrap().timestamp(), wake_at.timestamp());
    }

    #[test]
    fn resume_expired_pauses_only_resumes_elapsed_wake_times() {
        let s = store();
        let still_waiting = s.create(new_account()).unwrap();
        s.transition(&still_waiting.account_id, AccountStatus::New, AccountStatus::Warming)
            .unwrap();
        s.transition(&still_waiting.account_id, AccountStatus::Warming, AccountStatus::Active)
            .unwrap();
        s.pause_until(&still_waiting.account_id, AccountStatus::Active, Utc::now() + chrono::Duration::hours(1))
            .unwrap();

        let mut elapsed = new_account();
        elapsed.phone_identifier = "phone-hash-2".into();
        let elapsed = s.create(elapsed).unwrap();
        s.transition(&elapsed.account_id, AccountStatus::New, AccountStatus::Warming)
            .unwrap();
        s.transition(&elapsed.account_id, AccountStatus::Warming, AccountStatus::Active)
            .unwrap();
        s.pause_until(&elapsed.account_id, AccountStatus::Active, Utc::now() - chrono::Duration::seconds(1))
            .unwrap();

        let resumed = s.resume_expired_pauses().unwrap();
        assert_eq!(resumed, vec![elapsed.account_id.clone()]);

        let elapsed_after = s.get(&elapsed.account_id).unwrap();
        assert_eq!(elapsed_after.status, AccountStatus::Active);
        assert!(elapsed_after.paused_until.is_none());

        let still_waiting_after = s.get(&still_waiting.account_id).unwrap();
        assert_eq!(still_waiting_after.status, AccountStatus::Paused);
        assert!(still_waiting_after.paused_until.is_some());
    }

    #[test]
    fn resume_expired_pauses_skips_accounts_still_spam_limited() {
        let s = store();
        let acc = s.create(new_account()).unwrap();
        s.transition(&acc.account_id, AccountStatus::New, AccountStatus::Warming)
            .unwrap();
        s.transition(&acc.account_id, AccountStatus::Warming, AccountStatus::Active)
            .unwrap();
        s.pause_until(&acc.account_id, AccountStatus::Active, Utc::now() - chrono::Duration::seconds(1))
            .unwrap();
        s.record_spam_check(&acc.account_id, SpamStatus::Limited).unwrap();

        let resumed = s.resume_expired_pauses().unwrap();
        assert!(resumed.is_empty());
        assert_eq!(s.get(&acc.account_id).unwrap().status, AccountStatus::Paused);
    }
}
