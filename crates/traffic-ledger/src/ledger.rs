use std::sync::{Arc, Mutex};

use chrono::Utc;
use chrono_tz::Tz;
use rusqlite::{params, Connection};
use tracing::{instrument, warn};

use traffic_core::types::{AccountId, ActionKind};

use crate::clock::Clock;
use crate::db::init_db;
use crate::error::{LedgerError, Result};

/// Max optimistic-concurrency retries on a write conflict.
const MAX_RETRIES: u32 = 5;

/// Outcome of a conditional increment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    Granted { new_count: u32 },
    Denied,
}

/// Clock & Rate Ledger: the authoritative per-account-per-day
/// action counters. Every increment is atomic and conditional on
/// `counter + 1 <= limit`; the ledger never reports `Granted` without a
/// durable commit backing it.
pub struct RateLedger {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl RateLedger {
    pub fn new(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    pub fn now(&self) -> chrono::DateTime<Utc> {
        self.clock.now()
    }

    /// Current count for `(account, kind)` on the account's local today.
    pub fn daily_counter(&self, account_id: &AccountId, kind: ActionKind, tz: Tz) -> Result<u32> {
        let date = self.clock.local_date(tz);
        let conn = self.conn.lock().unwrap();
        let count: Option<i64> = conn
            .query_row(
                "SELECT count FROM rate_counters
                 WHERE account_id = ?1 AND action_kind = ?2 AND local_date = ?3",
                params![account_id.as_str(), kind.to_string(), date],
                |r| r.get(0),
            )
            .ok();
        Ok(count.unwrap_or(0) as u32)
    }

    /// Atomically increments `(account, kind)` for the account-local today,
    /// granting only if the result would not exceed `limit`. On denial, no
    /// mutation occurs.
    #[instrument(skip(self))]
    pub fn try_increment(
        &self,
        account_id: &AccountId,
        kind: ActionKind,
        limit: u32,
        tz: Tz,
    ) -> Result<Grant> {
        if limit == 0 {
            return Ok(Grant::Denied);
        }

        let date = self.clock.local_date(tz);
        let updated_at = self.clock.now().to_rfc3339();

        for attempt in 0..MAX_RETRIES {
            let conn = self.conn.lock().unwrap();
            let result = conn.execute(
                "INSERT INTO rate_counters (account_id, action_kind, local_date, count, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4)
                 ON CONFLICT(account_id, action_kind, local_date)
                   DO UPDATE SET count = count + 1, updated_at = ?4
                   WHERE count < ?5",
                params![account_id.as_str(), kind.to_string(), date, updated_at, limit],
            );

            match result {
                Ok(changed) if changed > 0 => {
                    drop(conn);
                    let new_count = self.daily_counter(account_id, kind, tz)?;
                    return Ok(Grant::Granted { new_count });
                }
                Ok(_) => {
                    // Either at the limit already, or the row pre-existed and the
                    // WHERE guard blocked the update — both mean "denied", unless
                    // this is the very first row for the day with limit == 0.
                    return Ok(Grant::Denied);
                }
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::DatabaseBusy && attempt + 1 < MAX_RETRIES =>
                {
                    warn!(account_id = %account_id, %kind, attempt, "ledger write busy, retrying");
                    continue;
                }
                Err(e) => return Err(LedgerError::Database(e)),
            }
        }

        Err(LedgerError::RetriesExhausted {
            account_id: account_id.to_string(),
            kind: kind.to_string(),
        })
    }

    /// Deletes rate-counter rows older than 7 days. Intended to run as a periodic
    /// maintenance sweep alongside the dispatcher supervisor.
    pub fn compact(&self, tz: Tz) -> Result<usize> {
        let cutoff = (self.clock.now().with_timezone(&tz) - chrono::Duration::days(7))
            .format("%Y-%m-%d")
            .to_string();
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM rate_counters WHERE local_date < ?1",
            params![cutoff],
        )?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::FixedClock;
    use chrono::TimeZone;

    fn ledger_at(dt: chrono::DateTime<Utc>) -> (RateLedger, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(dt));
        let ledger = RateLedger::new(Connection::open_in_memory().unwrap(), clock.clone()).unwrap();
        (ledger, clock)
    }

    #[test]
    fn try_increment_grants_until_limit_then_denies() {
        let (ledger, _clock) = ledger_at(Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap());
        let acc = AccountId::new();
        let tz = Tz::Europe__Moscow;

        for i in 1..=3 {
            let grant = ledger.try_increment(&acc, ActionKind::Comment, 3, tz).unwrap();
            assert_eq!(grant, Grant::Granted { new_count: i });
        }
        let denied = ledger.try_increment(&acc, ActionKind::Comment, 3, tz).unwrap();
        assert_eq!(denied, Grant::Denied);
        assert_eq!(ledger.daily_counter(&acc, ActionKind::Comment, tz).unwrap(), 3);
    }

    #[test]
    fn denial_does_not_mutate_counter() {
        let (ledger, _clock) = ledger_at(Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap());
        let acc = AccountId::new();
        let tz = Tz::Europe__Moscow;
        ledger.try_increment(&acc, ActionKind::Comment, 1, tz).unwrap();
        ledger.try_increment(&acc, ActionKind::Comment, 1, tz).unwrap();
        assert_eq!(ledger.daily_counter(&acc, ActionKind::Comment, tz).unwrap(), 1);
    }

    #[test]
    fn day_boundary_rollover_resets_counter() {
        let (ledger, clock) = ledger_at(Utc.with_ymd_and_hms(2026, 1, 1, 23, 59, 0).unwrap());
        let acc = AccountId::new();
        let tz = Tz::Europe__Moscow;
        ledger.try_increment(&acc, ActionKind::Comment, 5, tz).unwrap();
        assert_eq!(ledger.daily_counter(&acc, ActionKind::Comment, tz).unwrap(), 1);

        // Advance past local midnight in Europe/Moscow (UTC+3).
        clock.set(Utc.with_ymd_and_hms(2026, 1, 2, 1, 30, 0).unwrap());
        assert_eq!(ledger.daily_counter(&acc, ActionKind::Comment, tz).unwrap(), 0);
        let grant = ledger.try_increment(&acc, ActionKind::Comment, 5, tz).unwrap();
        assert_eq!(grant, Grant::Granted { new_count: 1 });
    }

    #[test]
    fn compact_removes_counters_older_than_seven_days() {
        let (ledger, clock) = ledger_at(Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap());
        let acc = AccountId::new();
        let tz = Tz::UTC;
        ledger.try_increment(&acc, ActionKind::Comment, 5, tz).unwrap();

        clock.set(Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap());
        let removed = ledger.compact(tz).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(ledger.daily_counter(&acc, ActionKind::Comment, tz).unwrap(), 0);
    }
}
