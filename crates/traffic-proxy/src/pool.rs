use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, instrument, warn};

use crate::db::init_db;
use crate::error::Result;
use crate::types::{Proxy, ProxyKind, ProxyOutcome};

/// Proxy Pool. Acquisition is serialized by holding the
/// connection mutex across the read-candidate + claim-by-CAS pair, so two
/// concurrent `acquire` calls never hand out the same endpoint.
pub struct ProxyPool {
    conn: Mutex<Connection>,
    cooldown_base_seconds: u64,
    cooldown_max_seconds: u64,
}

impl ProxyPool {
    pub fn new(conn: Connection, cooldown_base_seconds: u64, cooldown_max_seconds: u64) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            cooldown_base_seconds,
            cooldown_max_seconds,
        })
    }

    /// Seed a proxy endpoint into the pool (operator bootstrapping).
    pub fn register(&self, endpoint: &str, kind: ProxyKind, credentials: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO proxies (endpoint, kind, credentials, in_use_by, consecutive_failures,
                cooldown_strikes, cooldown_until, last_failure_at)
             VALUES (?1, ?2, ?3, NULL, 0, 0, NULL, NULL)
             ON CONFLICT(endpoint) DO NOTHING",
            params![endpoint, kind.to_string(), credentials],
        )?;
        Ok(())
    }

    /// Claims the least-recently-failed free, non-cooling-down proxy for
    /// `account_id`. Returns `None` when the pool is exhausted.
    #[instrument(skip(self))]
    pub fn acquire(&self, account_id: &str) -> Result<Option<Proxy>> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let candidate: Option<String> = conn
            .query_row(
                "SELECT endpoint FROM proxies
                 WHERE in_use_by IS NULL AND (cooldown_until IS NULL OR cooldown_until <= ?1)
                 ORDER BY (last_failure_at IS NOT NULL), last_failure_at ASC, endpoint ASC
                 LIMIT 1",
                params![now],
                |r| r.get(0),
            )
            .optional()?;

        let Some(endpoint) = candidate else {
            return Ok(None);
        };

        let claimed = conn.execute(
            "UPDATE proxies SET in_use_by = ?1 WHERE endpoint = ?2 AND in_use_by IS NULL",
            params![account_id, endpoint],
        )?;
        if claimed == 0 {
            // Lost a race to another caller inside the same mutex window — can't
            // happen given the single-writer connection, but stay defensive.
            return Ok(None);
        }

        info!(account_id, endpoint = %endpoint, "proxy acquired");
        self.row(&conn, &endpoint)
    }

    /// Reports the outcome of using a proxy. Three consecutive failures put
    /// it on an exponentially increasing cooldown (5 min, doubling to 2 h).
    #[instrument(skip(self))]
    pub fn report(&self, endpoint: &str, outcome: ProxyOutcome) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();

        match outcome {
            ProxyOutcome::Success => {
                conn.execute(
                    "UPDATE proxies SET consecutive_failures = 0, cooldown_strikes = 0,
                        cooldown_until = NULL WHERE endpoint = ?1",
                    params![endpoint],
                )?;
            }
            ProxyOutcome::Failure => {
                let (failures, strikes): (i64, i64) = conn.query_row(
                    "SELECT consecutive_failures, cooldown_strikes FROM proxies WHERE endpoint = ?1",
                    params![endpoint],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )?;
                let new_failures = failures + 1;

                if new_failures >= 3 {
                    let new_strikes = strikes + 1;
                    let seconds = self
                        .cooldown_base_seconds
                        .saturating_mul(1u64 << (new_strikes.saturating_sub(1).min(32) as u32))
                        .min(self.cooldown_max_seconds);
                    let cooldown_until = now + chrono::Duration::seconds(seconds as i64);
                    warn!(endpoint, seconds, strikes = new_strikes, "proxy entering cooldown");
                    conn.execute(
                        "UPDATE proxies SET consecutive_failures = 0, cooldown_strikes = ?1,
                            cooldown_until = ?2, last_failure_at = ?3 WHERE endpoint = ?4",
                        params![new_strikes, cooldown_until.to_rfc3339(), now.to_rfc3339(), endpoint],
                    )?;
                } else {
                    conn.execute(
                        "UPDATE proxies SET consecutive_failures = ?1, last_failure_at = ?2
                         WHERE endpoint = ?3",
                        params![new_failures, now.to_rfc3339(), endpoint],
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Releases the proxy currently assigned to `account_id`, if any.
    pub fn release(&self, account_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE proxies SET in_use_by = NULL WHERE in_use_by = ?1",
            params![account_id],
        )?;
        Ok(())
    }

    fn row(&self, conn: &Connection, endpoint: &str) -> Result<Option<Proxy>> {
        let row = conn
            .query_row(
                "SELECT endpoint, kind, credentials, in_use_by, consecutive_failures,
                        cooldown_strikes, cooldown_until, last_failure_at
                 FROM proxies WHERE endpoint = ?1",
                params![endpoint],
                row_to_proxy,
            )
            .optional()?;
        Ok(row)
    }
}

fn row_to_proxy(row: &rusqlite::Row<'_>) -> rusqlite::Result<Proxy> {
    let parse_dt = |s: Option<String>| -> Option<DateTime<Utc>> {
        s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    };
    Ok(Proxy {
        endpoint: row.get(0)?,
        kind: ProxyKind::from_str(&row.get::<_, String>(1)?).unwrap_or(ProxyKind::Socks5),
        credentials: row.get(2)?,
        in_use_by: row.get(3)?,
        consecutive_failures: row.get::<_, i64>(4)? as u32,
        cooldown_strikes: row.get::<_, i64>(5)? as u32,
        cooldown_until: parse_dt(row.get(6)?),
        last_failure_at: parse_dt(row.get(7)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> ProxyPool {
        ProxyPool::new(Connection::open_in_memory().unwrap(), 300, 7_200).unwrap()
    }

    #[test]
    fn acquire_returns_none_when_pool_empty() {
        let p = pool();
        assert!(p.acquire("acc-1").unwrap().is_none());
    }

    #[test]
    fn acquire_claims_a_free_proxy_and_excludes_it_for_others() {
        let p = pool();
        p.register("proxy-1:1080", ProxyKind::Socks5, None).unwrap();
        let proxy = p.acquire("acc-1").unwrap().unwrap();
        assert_eq!(proxy.endpoint, "proxy-1:1080");
        assert_eq!(proxy.in_use_by.as_deref(), Some("acc-1"));
        assert!(p.acquire("acc-2").unwrap().is_none());
    }

    #[test]
    fn release_frees_the_proxy_for_reacquisition() {
        let p = pool();
        p.register("proxy-1:1080", ProxyKind::Socks5, None).unwrap();
        p.acquire("acc-1").unwrap();
        p.release("acc-1").unwrap();
        let proxy = p.acquire("acc-2").unwrap().unwrap();
        assert_eq!(proxy.in_use_by.as_deref(), Some("acc-2"));
    }

    #[test]
    fn three_consecutive_failures_trigger_cooldown() {
        let p = pool();
        p.register("proxy-1:1080", ProxyKind::Socks5, None).unwrap();
        p.acquire("acc-1").unwrap();
        p.release("acc-1").unwrap();

        p.report("proxy-1:1080", ProxyOutcome::Failure).unwrap();
        p.report("proxy-1:1080", ProxyOutcome::Failure).unwrap();
        assert!(p.acquire("acc-2").unwrap().is_some());
        p.release("acc-2").unwrap();

        p.report("proxy-1:1080", ProxyOutcome::Failure).unwrap();
        // Third consecutive failure -> cooldown, not acquirable now.
        assert!(p.acquire("acc-3").unwrap().is_none());
    }

    #[test]
    fn success_resets_failure_streak() {
        let p = pool();
        p.register("proxy-1:1080", ProxyKind::Socks5, None).unwrap();
        p.report("proxy-1:1080", ProxyOutcome::Failure).unwrap();
        p.report("proxy-1:1080", ProxyOutcome::Failure).unwrap();
        p.report("proxy-1:1080", ProxyOutcome::Success).unwrap();
        p.report("proxy-1:1080", ProxyOutcome::Failure).unwrap();
        p.report("proxy-1:1080", ProxyOutcome::Failure).unwrap();
        // Only 2 consecutive failures since the reset — still available.
        assert!(p.acquire("acc-1").unwrap().is_some());
    }

    #[test]
    fn least_recently_failed_is_preferred() {
        let p = pool();
        p.register("proxy-a", ProxyKind::Socks5, None).unwrap();
        p.register("proxy-b", ProxyKind::Socks5, None).unwrap();
        // proxy-a takes one failure (but not enough to cool down), proxy-b none.
        p.report("proxy-a", ProxyOutcome::Failure).unwrap();
        // proxy-b (never failed) should be preferred over proxy-a.
        let proxy = p.acquire("acc-1").unwrap().unwrap();
        assert_eq!(proxy.endpoint, "proxy-b");
    }
}
