use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::time::Duration;
use tracing::{error, info, instrument, warn};

use traffic_core::types::AccountId;
use traffic_sessions::SessionRegistry;

use crate::error::Result;
use crate::store::InviteLinkStore;

/// Consumes the VIP channel's membership-update stream and attributes each
/// join to the invite link whose hash it carries.
/// `verified_as_partner` is left `None` here — a separate async call flips
/// it later, so this worker only ever inserts, never marks verification.
pub struct JoinAttributor {
    store: Arc<InviteLinkStore>,
    sessions: Arc<SessionRegistry>,
    watcher_account: AccountId,
    vip_channel_id: String,
    poll_interval: Duration,
    cursor: Mutex<chrono::DateTime<Utc>>,
}

impl JoinAttributor {
    pub fn new(
        store: Arc<InviteLinkStore>,
        sessions: Arc<SessionRegistry>,
        watcher_account: AccountId,
        vip_channel_id: String,
        poll_interval_seconds: u64,
    ) -> Self {
        Self {
            store,
            sessions,
            watcher_account,
            vip_channel_id,
            poll_interval: Duration::from_secs(poll_interval_seconds),
            cursor: Mutex::new(Utc::now()),
        }
    }

    #[instrument(skip(self))]
    pub async fn poll_once(&self) -> Result<usize> {
        let mut cursor = self.cursor.lock().await;
        let joins = self
            .sessions
            .fetch_vip_joins(&self.watcher_account, &self.vip_channel_id, *cursor)
            .await?;

        let mut attributed = 0;
        let mut latest = *cursor;
        for join in &joins {
            latest = latest.max(join.joined_at);
            let Some(hash) = join.invite_hash.as_deref() else {
                // A join with no traceable invite hash (e.g. a direct add by
                // an admin) cannot be attributed; it is silently skipped, not
                // an error.
                continue;
            };
            match self.store.active_by_hash(hash)? {
                Some(link) => {
                    if self.store.record_join(
                        &link.invite_link_id.clone().into(),
                        &join.user_id,
                        &link.public_channel,
                        join.joined_at,
                    )? {
                        attributed += 1;
                    }
                }
                None => warn!(hash, user_id = %join.user_id, "join event matched no active invite link"),
            }
        }
        *cursor = latest;
        Ok(attributed)
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("join attributor started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("join attributor shutting down");
                        return;
                    }
                }
            }
            if *shutdown.borrow() {
                return;
            }
            if let Err(e) = self.poll_once().await {
                error!("join attributor poll failed: {e}");
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

    struct FakeTransport {
        joins: Vec<JoinEvent>,
    }

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
            unimplemented!()
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
            Ok(self.joins.clone())
        }
        async fn ensure_session(&self, _: &AccountId, _: &[u8]) -> traffic_telegram::Result<Vec<u8>> {
            unimplemented!()
        }
    }

    fn attributor(joins: Vec<JoinEvent>) -> (JoinAttributor, Arc<InviteLinkStore>) {
        let store = Arc::new(InviteLinkStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let sessions = Arc::new(SessionRegistry::new(
            Connection::open_in_memory().unwrap(),
            Arc::new(FakeTransport { joins }) as Arc<dyn TelegramClient>,
        ));
        (
            JoinAttributor::new(store.clone(), sessions, AccountId::from("watcher"), "@vip".to_string(), 60),
            store,
        )
    }

    #[tokio::test]
    async fn poll_once_attributes_join_to_matching_active_link() {
        let now = Utc::now();
        let (attributor, store) = attributor(vec![JoinEvent {
            user_id: "user-1".to_string(),
            invite_hash: Some("h1".to_string()),
            joined_at: now,
        }]);
        let id = store
            .create("@vip", "h1", "u1", now + ChronoDuration::hours(1), 25, "acc", "@pub", 1, now + ChronoDuration::hours(1))
            .unwrap();

        let attributed = attributor.poll_once().await.unwrap();
        assert_eq!(attributed, 1);
        assert_eq!(store.get(&id).unwrap().total_joins, 1);
    }

    #[tokio::test]
    async fn poll_once_skips_joins_with_no_hash_or_no_matching_link() {
        let now = Utc::now();
        let (attributor, _store) = attributor(vec![
            JoinEvent {
                user_id: "user-1".to_string(),
                invite_hash: None,
                joined_at: now,
            },
            JoinEvent {
                user_id: "user-2".to_string(),
                invite_hash: Some("missing".to_string()),
                joined_at: now,
            },
        ]);

        let attributed = attributor.poll_once().await.unwrap();
        assert_eq!(attributed, 0);
    }
}
