use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{error, info, instrument};

use traffic_core::types::AccountId;
use traffic_dispatcher::text::{
    generate_with_fallback, GenerationContext, GenerationKind, TemplateFallback, TextGenerator,
};
use traffic_sessions::SessionRegistry;

use crate::error::Result;
use crate::store::InviteLinkStore;

/// Publishes periodic invite-teaser posts to public channels. One designated account (`publisher_account`) administers both
/// the public teaser channels and the gated VIP channel, mirroring the
/// reader-account pattern `traffic-channels::ChannelMonitor` uses for
/// borrowing a single session rather than rotating through the fleet.
pub struct InvitePublisher {
    store: Arc<InviteLinkStore>,
    sessions: Arc<SessionRegistry>,
    generator: Arc<dyn TextGenerator>,
    fallback: TemplateFallback,
    publisher_account: AccountId,
    vip_channel_id: String,
    public_channels: Vec<String>,
    expire_hours: u32,
    usage_limit: u32,
    publish_interval: Duration,
}

impl InvitePublisher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<InviteLinkStore>,
        sessions: Arc<SessionRegistry>,
        generator: Arc<dyn TextGenerator>,
        publisher_account: AccountId,
        vip_channel_id: String,
        public_channels: Vec<String>,
        expire_hours: u32,
        usage_limit: u32,
        publish_interval_seconds: u64,
    ) -> Self {
        Self {
            store,
            sessions,
            generator,
            fallback: TemplateFallback,
            publisher_account,
            vip_channel_id,
            public_channels,
            expire_hours,
            usage_limit,
            publish_interval: Duration::from_secs(publish_interval_seconds),
        }
    }

    /// Publishes one teaser to each configured public channel.
    #[instrument(skip(self))]
    pub async fn publish_once(&self) -> Result<usize> {
        let mut published = 0;
        for channel in &self.public_channels {
            if let Err(e) = self.publish_to(channel).await {
                error!(channel, "invite teaser publish failed: {e}");
                continue;
            }
            published += 1;
        }
        Ok(published)
    }

    async fn publish_to(&self, public_channel: &str) -> Result<()> {
        let now = Utc::now();
        let expire_date = now + ChronoDuration::hours(self.expire_hours as i64);

        let handle = self
            .sessions
            .create_invite_link(&self.publisher_account, &self.vip_channel_id, expire_date, self.usage_limit)
            .await?;

        let context = GenerationContext {
            segment: "universal".to_string(),
            persona_display_name: String::new(),
            strategy: None,
            topic: None,
            source_post_excerpt: None,
        };
        // Invite teasers always have a templated fallback, so this
        // never returns `None`.
        let text = generate_with_fallback(
            self.generator.as_ref(),
            &self.fallback,
            GenerationKind::InviteTeaser,
            &context,
        )
        .await
        .unwrap_or_default();

        let message_id = self
            .sessions
            .publish_post(&self.publisher_account, public_channel, &text)
            .await?;

        self.store.create(
            &self.vip_channel_id,
            &handle.invite_hash,
            &handle.url,
            expire_date,
            self.usage_limit,
            self.publisher_account.as_str(),
            public_channel,
            message_id,
            expire_date,
        )?;

        info!(public_channel, vip_channel = %self.vip_channel_id, "invite teaser published");
        Ok(())
    }

    /// Drives the periodic publish loop until `shutdown` broadcasts `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("invite publisher started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.publish_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("invite publisher shutting down");
                        return;
                    }
                }
            }
            if *shutdown.borrow() {
                return;
            }
            if let Err(e) = self.publish_once().await {
                error!("invite publisher tick failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use rusqlite::Connection;
    use traffic_core::types::SpamStatus;
    use std::sync::atomic::{AtomicU32, Ordering};
    use traffic_telegram::{ChannelPost, InviteHandle, JoinEvent, Reply, TelegramClient};

    struct FakeTransport {
        next_hash: AtomicU32,
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
            Ok(501)
        }
        async fn create_invite_link(
            &self,
            _: &AccountId,
            _: &str,
            _: DateTime<Utc>,
            _: u32,
        ) -> traffic_telegram::Result<InviteHandle> {
            let n = self.next_hash.fetch_add(1, Ordering::SeqCst);
            Ok(InviteHandle {
                invite_hash: format!("hash-{n}"),
                url: format!("https://t.me/+hash-{n}"),
            })
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

    struct NoGenerator;

    #[async_trait]
    impl TextGenerator for NoGenerator {
        async fn generate(&self, _: GenerationKind, _: &GenerationContext) -> Option<String> {
            None
        }
    }

    fn publisher() -> InvitePublisher {
        let conn = Connection::open_in_memory().unwrap();
        let store = Arc::new(InviteLinkStore::new(conn).unwrap());
        let sessions = Arc::new(SessionRegistry::new(
            Connection::open_in_memory().unwrap(),
            Arc::new(FakeTransport { next_hash: AtomicU32::new(1) }) as Arc<dyn TelegramClient>,
        ));
        InvitePublisher::new(
            store,
            sessions,
            Arc::new(NoGenerator),
            AccountId::from("publisher-acc"),
            "@vip".to_string(),
            vec!["@public1".to_string(), "@public2".to_string()],
            2,
            25,
            60,
        )
    }

    #[tokio::test]
    async fn publish_once_creates_a_link_per_public_channel() {
        let p = publisher();
        let count = p.publish_once().await.unwrap();
        assert_eq!(count, 2);

        let link = p.store.active_by_hash("hash-1").unwrap();
        assert!(link.is_some());
    }
}
