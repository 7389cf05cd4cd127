use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{error, info, instrument, warn};

use traffic_core::types::AccountId;
use traffic_sessions::SessionRegistry;

use crate::error::Result;
use crate::store::InviteLinkStore;

/// Scheduled sweep: "A scheduled sweep at each minute
/// revokes links where `expire_date <= now` and status=active ... it also
/// issues `delete_message` for posts whose `auto_delete_at` has passed."
///
/// Expiry and deletion are independent passes over independent queries, so a
/// transport failure deleting one teaser post never blocks another link from
/// expiring.
pub struct InviteSweeper {
    store: Arc<InviteLinkStore>,
    sessions: Arc<SessionRegistry>,
    tick_interval: Duration,
}

impl InviteSweeper {
    pub fn new(store: Arc<InviteLinkStore>, sessions: Arc<SessionRegistry>, tick_interval_seconds: u64) -> Self {
        Self {
            store,
            sessions,
            tick_interval: Duration::from_secs(tick_interval_seconds),
        }
    }

    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<()> {
        let now = Utc::now();

        for link in self.store.due_for_expiry(now)? {
            if self.store.mark_expired(&link.invite_link_id.clone().into())? {
                info!(invite_link_id = %link.invite_link_id, "invite link expired");
            }
        }

        for link in self.store.due_for_deletion(now)? {
            let account_id = AccountId::from(link.publisher_account_id.as_str());
            match self
                .sessions
                .delete_message(&account_id, &link.public_channel, link.teaser_message_id)
                .await
            {
                Ok(()) => {
                    self.store.mark_deleted(&link.invite_link_id.clone().into())?;
                    info!(invite_link_id = %link.invite_link_id, "teaser post deleted");
                }
                Err(e) => warn!(invite_link_id = %link.invite_link_id, "teaser delete failed: {e}"),
            }
        }

        Ok(())
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("invite sweeper started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.tick_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("invite sweeper shutting down");
                        return;
                    }
                }
            }
            if *shutdown.borrow() {
                return;
            }
            if let Err(e) = self.tick().await {
                error!("invite sweeper tick failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration};
    use rusqlite::Connection;
    use traffic_core::types::SpamStatus;
    use traffic_telegram::{ChannelPost, InviteHandle, JoinEvent, Reply, TelegramClient};

    struct FakeTransport;

    #[async_trait]
    impl TelegramClient for FakeTransport {
        async fn send_comment(&self, _: &AccountId, _: &str, _: i64, _: &str) -> traffic_telegram::Result<i64> {
            unimplemented!()
        }
        async fn view_story(&self, _: &AccountId, _: &str, _: i64) -> traffic_telegram::Result<()> {
            unimplemented!()
        }
        async fn react(&self, _: &AccountId, _: &str, _: &str) -> traffic_telegram::Result<()> {
            unimplemented!()
        }
        async fn subscribe(&self, _: &AccountId, _: &str) -> traffic_telegram::Result<()> {
            unimplemented!()
        }
        async fn send_direct(&self, _: &AccountId, _: &str, _: &str) -> traffic_telegram::Result<()> {
            unimplemented!()
        }
        async fn publish_post(&self, _: &AccountId, _: &str, _: &str) -> traffic_telegram::Result<i64> {
            unimplemented!()
        }
        async fn create_invite_link(
            &self,
            _: &AccountId,
            _: &str,
            _: DateTime<Utc>,
            _: u32,
        ) -> traffic_telegram::Result<InviteHandle> {
            unimplemented!()
        }
        async fn delete_message(&self, _: &AccountId, _: &str, _: i64) -> traffic_telegram::Result<()> {
            Ok(())
        }
        async fn fetch_replies(
            &self,
            _: &AccountId,
            _: &str,
            _: i64,
            _: DateTime<Utc>,
        ) -> traffic_telegram::Result<Vec<Reply>> {
            Ok(vec![])
        }
        async fn check_spam_status(&self, _: &AccountId) -> traffic_telegram::Result<SpamStatus> {
            Ok(SpamStatus::Ok)
        }
        async fn fetch_channel_posts(
            &self,
            _: &AccountId,
            _: &str,
            _: DateTime<Utc>,
        ) -> traffic_telegram::Result<Vec<ChannelPost>> {
            Ok(vec![])
        }
        async fn fetch_vip_joins(
            &self,
            _: &AccountId,
            _: &str,
            _: DateTime<Utc>,
        ) -> traffic_telegram::Result<Vec<JoinEvent>> {
            Ok(vec![])
        }
        async fn ensure_session(&self, _: &AccountId, _: &[u8]) -> traffic_telegram::Result<Vec<u8>> {
            Ok(vec![])
        }
    }

    fn sweeper() -> (InviteSweeper, Arc<InviteLinkStore>) {
        let store = Arc::new(InviteLinkStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let sessions = Arc::new(SessionRegistry::new(
            Connection::open_in_memory().unwrap(),
            Arc::new(FakeTransport) as Arc<dyn TelegramClient>,
        ));
        (InviteSweeper::new(store.clone(), sessions, 60), store)
    }

    #[tokio::test]
    async fn tick_expires_links_past_expire_date() {
        let (sweeper, store) = sweeper();
        let now = Utc::now();
        let id = store
            .create("@vip", "h1", "u1", now - ChronoDuration::seconds(1), 25, "acc", "@pub", 1, now + ChronoDuration::hours(1))
            .unwrap();

        sweeper.tick().await.unwrap();

        let link = store.get(&id).unwrap();
        assert_eq!(link.status, traffic_core::types::InviteStatus::Expired);
    }

    #[tokio::test]
    async fn tick_deletes_teaser_posts_past_auto_delete_at() {
        let (sweeper, store) = sweeper();
        let now = Utc::now();
        let id = store
            .create("@vip", "h1", "u1", now + ChronoDuration::hours(1), 25, "acc", "@pub", 1, now - ChronoDuration::seconds(1))
            .unwrap();

        sweeper.tick().await.unwrap();

        let link = store.get(&id).unwrap();
        assert!(link.deleted);
    }
}
