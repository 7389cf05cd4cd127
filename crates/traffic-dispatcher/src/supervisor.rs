use std::collections::HashMap;
use std::sync::Arc;

use chrono_tz::Tz;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{info, instrument, warn};

use traffic_accounts::AccountStore;
use traffic_core::types::{AccountId, AccountStatus, ActionKind};
use traffic_ledger::RateLedger;
use traffic_proxy::ProxyPool;
use traffic_sessions::SessionRegistry;
use traffic_strategy::StrategyOracle;
use traffic_warmup::WarmupPlanner;

use crate::outcome::OutcomePendingStore;
use crate::records::ActionRecordStore;
use crate::targets::TargetSource;
use crate::text::TextGenerator;
use crate::worker::DispatcherWorker;

/// Caps the exponential restart backoff for a panicking fiber, matching the
/// cooldown cap convention used across the workspace's other retry loops.
const MAX_RESTART_BACKOFF_SECS: u64 = 300;

/// Runs one [`DispatcherWorker`] fiber per account with status `warming` or
/// `active`, restarting a fiber with exponential backoff if its task panics
///. Re-scans the account store on an interval to pick
/// up newly warming accounts and to notice accounts a fiber has parked
/// (ineligible, banned, paused) so a later status change respawns them.
pub struct Supervisor {
    accounts: Arc<AccountStore>,
    warmup: Arc<WarmupPlanner>,
    ledger: Arc<RateLedger>,
    proxies: Arc<ProxyPool>,
    sessions: Arc<SessionRegistry>,
    targets: Arc<TargetSource>,
    records: Arc<ActionRecordStore>,
    pending: Arc<OutcomePendingStore>,
    oracle: Arc<StrategyOracle>,
    generator: Arc<dyn TextGenerator>,
    default_tz: Tz,
    quiet_start: String,
    quiet_end: String,
    reply_window_minutes: u32,
    hard_ceilings: HashMap<ActionKind, u32>,
    rescan_interval: Duration,
    max_accounts: u32,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        accounts: Arc<AccountStore>,
        warmup: Arc<WarmupPlanner>,
        ledger: Arc<RateLedger>,
        proxies: Arc<ProxyPool>,
        sessions: Arc<SessionRegistry>,
        targets: Arc<TargetSource>,
        records: Arc<ActionRecordStore>,
        pending: Arc<OutcomePendingStore>,
        oracle: Arc<StrategyOracle>,
        generator: Arc<dyn TextGenerator>,
        default_tz: Tz,
        quiet_start: String,
        quiet_end: String,
        reply_window_minutes: u32,
        hard_ceilings: HashMap<ActionKind, u32>,
        rescan_interval_secs: u64,
        max_accounts: u32,
    ) -> Self {
        Self {
            accounts,
            warmup,
            ledger,
            proxies,
            sessions,
            targets,
            records,
            pending,
            oracle,
            generator,
            default_tz,
            quiet_start,
            quiet_end,
            reply_window_minutes,
            hard_ceilings,
            rescan_interval: Duration::from_secs(rescan_interval_secs),
            max_accounts,
        }
    }

    /// Drives fiber lifecycle until `shutdown` broadcasts `true`, then waits
    /// for every in-flight fiber to park before returning.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("dispatcher supervisor started");
        let mut fibers: HashMap<AccountId, JoinHandle<()>> = HashMap::new();

        loop {
            self.spawn_missing(&mut fibers, shutdown.clone());
            fibers.retain(|_, handle| !handle.is_finished());

            tokio::select! {
                _ = tokio::time::sleep(self.rescan_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(fibers = fibers.len(), "supervisor shutting down, draining fibers");
        for (_, handle) in fibers {
            let _ = handle.await;
        }
        info!("dispatcher supervisor stopped");
    }

    #[instrument(skip_all)]
    fn spawn_missing(self: &Arc<Self>, fibers: &mut HashMap<AccountId, JoinHandle<()>>, shutdown: watch::Receiver<bool>) {
        match self.accounts.resume_expired_pauses() {
            Ok(resumed) if !resumed.is_empty() => {
                info!(count = resumed.len(), "flood-wait cooldowns elapsed, accounts auto-resumed");
            }
            Ok(_) => {}
            Err(e) => warn!("failed to resume expired flood-wait pauses: {e}"),
        }

        let mut eligible = match self.accounts.list_by_status(AccountStatus::Warming, None) {
            Ok(rows) => rows,
            Err(e) => {
                warn!("supervisor rescan failed to list warming accounts: {e}");
                Vec::new()
            }
        };
        match self.accounts.list_by_status(AccountStatus::Active, None) {
            Ok(rows) => eligible.extend(rows),
            Err(e) => warn!("supervisor rescan failed to list active accounts: {e}"),
        }

        for account in eligible {
            if fibers.contains_key(&account.account_id) {
                continue;
            }
            if fibers.len() as u32 >= self.max_accounts {
                warn!(
                    max_accounts = self.max_accounts,
                    "fleet.max_accounts reached, deferring remaining eligible accounts to the next rescan"
                );
                break;
            }
            let supervisor = Arc::clone(self);
            let account_id = account.account_id.clone();
            let rx = shutdown.clone();
            let handle = tokio::spawn(async move { supervisor.run_fiber(account_id, rx).await });
            fibers.insert(account.account_id, handle);
        }
    }

    /// Owns one account's restart loop: builds a fresh [`DispatcherWorker`]
    /// and runs it; a clean return (parked or shutdown) ends the loop so the
    /// next rescan decides whether to respawn, while a panic is treated as
    /// transient and retried with backoff.
    async fn run_fiber(self: Arc<Self>, account_id: AccountId, shutdown: watch::Receiver<bool>) {
        let mut attempt: u32 = 0;
        loop {
            if *shutdown.borrow() {
                return;
            }
            let worker = self.build_worker(account_id.clone());
            let rx = shutdown.clone();
            let task = tokio::spawn(async move { worker.run(rx).await });

            match task.await {
                Ok(()) => return,
                Err(join_err) => {
                    attempt += 1;
                    let backoff = Duration::from_secs((2u64.pow(attempt.min(8))).min(MAX_RESTART_BACKOFF_SECS));
                    warn!(
                        account_id = %account_id,
                        attempt,
                        backoff_secs = backoff.as_secs(),
                        "dispatcher fiber panicked: {join_err}, restarting"
                    );
                    if *shutdown.borrow() {
                        return;
                    }
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    fn build_worker(&self, account_id: AccountId) -> DispatcherWorker {
        DispatcherWorker::new(
            account_id,
            Arc::clone(&self.accounts),
            Arc::clone(&self.warmup),
            Arc::clone(&self.ledger),
            Arc::clone(&self.proxies),
            Arc::clone(&self.sessions),
            Arc::clone(&self.targets),
            Arc::clone(&self.records),
            Arc::clone(&self.pending),
            Arc::clone(&self.oracle),
            Arc::clone(&self.generator),
            self.default_tz,
            &self.quiet_start,
            &self.quiet_end,
            self.reply_window_minutes,
            self.hard_ceilings.clone(),
        )
    }
}
