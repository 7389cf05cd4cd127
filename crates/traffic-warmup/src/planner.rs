use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono_tz::Tz;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, instrument};

use traffic_accounts::{Account, AccountStore};
use traffic_core::types::{AccountId, AccountStatus, ActionKind};
use traffic_ledger::Clock;

use crate::db::init_db;
use crate::error::Result;
use crate::table::{limit_for, phase_length};
use crate::types::ActionBudget;

/// Warmup Planner. Reads the daily-limits reference table for
/// `(phase, day_in_phase)` and emits the day's Action Budget, advancing the
/// account's warmup position exactly once per account-local day.
pub struct WarmupPlanner {
    progress: Mutex<Connection>,
    accounts: Arc<AccountStore>,
    clock: Arc<dyn Clock>,
}

impl WarmupPlanner {
    pub fn new(conn: Connection, accounts: Arc<AccountStore>, clock: Arc<dyn Clock>) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            progress: Mutex::new(conn),
            accounts,
            clock,
        })
    }

    /// Returns today's Action Budget for `account_id`, advancing
    /// day-in-phase/phase/`warmup_completed` first if a new account-local
    /// day has started since the last call. Accounts past warmup reuse the
    /// final phase-4 day's figures as a steady-state allocation.
    #[instrument(skip(self))]
    pub fn today_budget(&self, account_id: &AccountId, tz: Tz) -> Result<ActionBudget> {
        let today = self.clock.local_date(tz);
        let mut account = self.accounts.get(account_id)?;

        if !account.warmup_completed {
            self.advance_if_new_day(&mut account, &today)?;
        }

        let (phase, day) = if account.warmup_completed {
            (4, phase_length(4))
        } else {
            (account.phase, account.day_in_phase)
        };
        let limit = limit_for(phase, day);

        let mut quotas = HashMap::new();
        quotas.insert(ActionKind::Message, limit.max_messages);
        quotas.insert(ActionKind::Reaction, limit.max_reactions);
        quotas.insert(ActionKind::Subscribe, limit.max_subscriptions);
        quotas.insert(ActionKind::Comment, limit.max_comments);
        quotas.insert(ActionKind::Post, limit.max_posts);
        // story_view/story_react have no dedicated column in WarmupDailyLimit
        // — only `rate.hard_ceilings` bounds them, applied by the
        // dispatcher directly against the ledger.

        Ok(ActionBudget {
            quotas,
            delay_range: (limit.min_delay_seconds, limit.max_delay_seconds),
            phase,
            day_in_phase: day,
        })
    }

    fn advance_if_new_day(&self, account: &mut Account, today: &str) -> Result<()> {
        let conn = self.progress.lock().unwrap();
        let last: Option<String> = conn
            .query_row(
                "SELECT last_checked_date FROM warmup_progress WHERE account_id = ?1",
                params![account.account_id.as_str()],
                |r| r.get(0),
            )
            .optional()?;

        if last.as_deref() == Some(today) {
            return Ok(());
        }

        // First-ever check just records today without advancing — the
        // account starts its plan on day 1 of phase 1.
        if last.is_some() {
            let mut phase = account.phase;
            let mut day = account.day_in_phase + 1;
            let mut completed = false;

            if day > phase_length(phase) {
                day = 1;
                if phase >= 4 {
                    completed = true;
                    phase = 4;
                } else {
                    phase += 1;
                }
            }

            self.accounts
                .advance_warmup(&account.account_id, phase, day, completed)?;
            account.phase = phase;
            account.day_in_phase = day;
            account.warmup_completed = completed;

            if completed && account.status == AccountStatus::Warming {
                self.accounts.transition(
                    &account.account_id,
                    AccountStatus::Warming,
                    AccountStatus::Active,
                )?;
                account.status = AccountStatus::Active;
            }

            info!(account_id = %account.account_id, phase, day_in_phase = day, completed, "warmup advanced");
        }

        conn.execute(
            "INSERT INTO warmup_progress (account_id, last_checked_date) VALUES (?1, ?2)
             ON CONFLICT(account_id) DO UPDATE SET last_checked_date = excluded.last_checked_date",
            params![account.account_id.as_str(), today],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use traffic_accounts::types::{NewAccount, Persona};
    use traffic_core::types::Segment;
    use traffic_ledger::clock::test_support::FixedClock;
    use chrono::{TimeZone, Utc};

    fn setup(at: chrono::DateTime<Utc>) -> (WarmupPlanner, Arc<AccountStore>, Arc<FixedClock>, AccountId) {
        let accounts = Arc::new(AccountStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let account = accounts
            .create(NewAccount {
                phone_identifier: "p1".into(),
                segment: Segment::Zozh,
                persona: Persona {
                    display_name: "A".into(),
                    bio: None,
                },
                timezone_override: None,
            })
            .unwrap();
        accounts
            .transition(&account.account_id, AccountStatus::New, AccountStatus::Warming)
            .unwrap();
        let clock = Arc::new(FixedClock::new(at));
        let planner =
            WarmupPlanner::new(Connection::open_in_memory().unwrap(), accounts.clone(), clock.clone())
                .unwrap();
        (planner, accounts, clock, account.account_id)
    }

    #[test]
    fn first_call_does_not_advance_day() {
        let (planner, accounts, _clock, id) = setup(Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap());
        let budget = planner.today_budget(&id, Tz::UTC).unwrap();
        assert_eq!(budget.phase, 1);
        assert_eq!(budget.day_in_phase, 1);
        let account = accounts.get(&id).unwrap();
        assert_eq!(account.day_in_phase, 1);
    }

    #[test]
    fn new_local_day_advances_day_in_phase() {
        let (planner, _accounts, clock, id) = setup(Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap());
        planner.today_budget(&id, Tz::UTC).unwrap();
        clock.set(Utc.with_ymd_and_hms(2026, 1, 2, 10, 0, 0).unwrap());
        let budget = planner.today_budget(&id, Tz::UTC).unwrap();
        assert_eq!(budget.day_in_phase, 2);
    }

    #[test]
    fn phase_rolls_over_after_phase_length_days() {
        let (planner, accounts, clock, id) = setup(Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap());
        planner.today_budget(&id, Tz::UTC).unwrap();
        // Phase 1 is 7 days: days 1..7, then day 8 rolls to phase 2 day 1.
        for day_offset in 1..=7 {
            clock.set(Utc.with_ymd_and_hms(2026, 1, 1 + day_offset, 10, 0, 0).unwrap());
            planner.today_budget(&id, Tz::UTC).unwrap();
        }
        let account = accounts.get(&id).unwrap();
        assert_eq!(account.phase, 2);
        assert_eq!(account.day_in_phase, 1);
        assert!(!account.warmup_completed);
    }

    #[test]
    fn phase_four_completion_transitions_to_active() {
        let (planner, accounts, clock, id) = setup(Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap());
        accounts.advance_warmup(&id, 4, 9, false).unwrap();
        planner.today_budget(&id, Tz::UTC).unwrap();
        clock.set(Utc.with_ymd_and_hms(2026, 1, 2, 10, 0, 0).unwrap());
        planner.today_budget(&id, Tz::UTC).unwrap();

        let account = accounts.get(&id).unwrap();
        assert!(account.warmup_completed);
        assert_eq!(account.status, AccountStatus::Active);
    }
}
