use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{error, info, instrument, warn};

use traffic_accounts::AccountStore;
use traffic_core::types::AccountStatus;
use traffic_sessions::SessionRegistry;

use crate::error::Result;

/// Periodic spam-status poller. `spam_status` drives the `active -> paused`
/// transition and the ban decision, but nothing else calls
/// `check_spam_status`; this runs it on every `warming`/`active` account on
/// an interval, the same way the dispatcher supervisor restarts per-account
/// fibers on a rescan interval rather than reacting to a push event.
pub struct SpamChecker {
    accounts: Arc<AccountStore>,
    sessions: Arc<SessionRegistry>,
    tick_interval: Duration,
}

impl SpamChecker {
    pub fn new(accounts: Arc<AccountStore>, sessions: Arc<SessionRegistry>, tick_interval_seconds: u64) -> Self {
        Self {
            accounts,
            sessions,
            tick_interval: Duration::from_secs(tick_interval_seconds),
        }
    }

    /// Drives the poll loop until `shutdown` broadcasts `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("spam checker started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.tick_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("spam checker shutting down");
                        return;
                    }
                }
            }
            if *shutdown.borrow() {
                return;
            }
            if let Err(e) = self.tick().await {
                error!("spam checker tick failed: {e}");
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<()> {
        let mut eligible = self.accounts.list_by_status(AccountStatus::Warming, None)?;
        eligible.extend(self.accounts.list_by_status(AccountStatus::Active, None)?);

        for account in eligible {
            match self.sessions.check_spam_status(&account.account_id).await {
                Ok(verdict) => {
                    if let Err(e) = self.accounts.record_spam_check(&account.account_id, verdict) {
                        warn!(account_id = %account.account_id, "failed to record spam check: {e}");
                    }
                }
                Err(e) => {
                    // A transport failure here is not itself a spam verdict —
                    // skip this account this round rather than guessing.
                    warn!(account_id = %account.account_id, "spam status check failed: {e}");
                }
            }
        }
        Ok(())
    }
}
