use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use dashmap::DashMap;
use rusqlite::{Connection, OptionalExtension};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Duration;
use tracing::{instrument, warn};

use traffic_core::types::{AccountId, SpamStatus};
use traffic_telegram::{self as telegram, TelegramClient};

use crate::error::{Result, SessionError};
use crate::types::SessionRecord;

/// Default flood-wait sleep ceiling (spec §4.3): waits at or below this
/// bound are slept through and retried once; anything longer is surfaced
/// so the caller can park the account. Overridable via
/// `telegram.flood_wait_ceiling_seconds`.
pub const DEFAULT_FLOOD_WAIT_CEILING_SECS: u64 = 600;

/// Mediates every Telegram call for the fleet.
///
/// Two responsibilities live here: the registry owns the encrypted
/// session blob for each account (load/save against SQLite), and it
/// guarantees at most one in-flight MTProto call per account by holding a
/// per-account async lock around every call to the underlying
/// `TelegramClient`. Flood-wait responses are mediated here too — a short
/// wait is slept through transparently, a long one is surfaced as
/// `SessionError::FloodExceeded` so the dispatcher can move the account to
/// cooldown instead of blocking its fiber.
pub struct SessionRegistry {
    db: StdMutex<Connection>,
    transport: Arc<dyn TelegramClient>,
    locks: DashMap<AccountId, Arc<AsyncMutex<()>>>,
    flood_wait_ceiling_secs: u64,
}

impl SessionRegistry {
    pub fn new(conn: Connection, transport: Arc<dyn TelegramClient>) -> Self {
        Self::with_flood_wait_ceiling(conn, transport, DEFAULT_FLOOD_WAIT_CEILING_SECS)
    }

    pub fn with_flood_wait_ceiling(conn: Connection, transport: Arc<dyn TelegramClient>, flood_wait_ceiling_secs: u64) -> Self {
        Self {
            db: StdMutex::new(conn),
            transport,
            locks: DashMap::new(),
            flood_wait_ceiling_secs,
        }
    }

    fn lock_for(&self, account_id: &AccountId) -> Arc<AsyncMutex<()>> {
        self.locks
            .entry(account_id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    #[instrument(skip(self), fields(account_id = %account_id))]
    pub fn load(&self, account_id: &AccountId) -> Result<Option<SessionRecord>> {
        let db = self.db.lock().unwrap();
        let record = db
            .query_row(
                "SELECT account_id, session_blob, spam_status, spam_checked_at,
                        created_at, updated_at
                 FROM telegram_sessions WHERE account_id = ?1",
                rusqlite::params![account_id.as_str()],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    #[instrument(skip(self, record), fields(account_id = %record.account_id))]
    pub fn save(&self, record: &SessionRecord) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO telegram_sessions
                (account_id, session_blob, spam_status, spam_checked_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(account_id) DO UPDATE SET
                session_blob    = excluded.session_blob,
                spam_status     = excluded.spam_status,
                spam_checked_at = excluded.spam_checked_at,
                updated_at      = excluded.updated_at",
            rusqlite::params![
                record.account_id.as_str(),
                record.session_blob,
                record.spam_status.to_string(),
                record.spam_checked_at.map(|t| t.to_rfc3339()),
                record.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    #[instrument(skip(self), fields(account_id = %account_id))]
    pub fn record_spam_status(&self, account_id: &AccountId, status: SpamStatus) -> Result<()> {
        let now = Utc::now();
        let db = self.db.lock().unwrap();
        let rows = db.execute(
            "UPDATE telegram_sessions
             SET spam_status = ?1, spam_checked_at = ?2, updated_at = ?2
             WHERE account_id = ?3",
            rusqlite::params![status.to_string(), now.to_rfc3339(), account_id.as_str()],
        )?;
        if rows == 0 {
            return Err(SessionError::NotFound {
                account_id: account_id.to_string(),
            });
        }
        Ok(())
    }

    /// Log in (or refresh) an account's session, persisting the resulting blob.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn ensure_session(&self, account_id: &AccountId) -> Result<()> {
        let existing = self.load(account_id)?;
        let blob = existing
            .as_ref()
            .map(|r| r.session_blob.clone())
            .unwrap_or_default();

        let lock = self.lock_for(account_id);
        let _guard = lock.lock().await;

        let refreshed = self.transport.ensure_session(account_id, &blob).await?;

        let now = Utc::now();
        let record = SessionRecord {
            account_id: account_id.clone(),
            session_blob: refreshed,
            spam_status: existing
                .map(|r| r.spam_status)
                .unwrap_or(SpamStatus::Ok),
            spam_checked_at: None,
            created_at: now,
            updated_at: now,
        };
        self.save(&record)?;
        Ok(())
    }

    /// Run a single transport call for `account_id` under its serialization
    /// lock, transparently retrying once if the transport reports a
    /// flood-wait within `flood_wait_ceiling_secs`.
    async fn call<T, F, Fut>(&self, account_id: &AccountId, f: F) -> Result<T>
    where
        F: Fn(Arc<dyn TelegramClient>) -> Fut,
        Fut: Future<Output = telegram::Result<T>>,
    {
        let lock = self.lock_for(account_id);
        let _guard = lock.lock().await;

        match f(self.transport.clone()).await {
            Ok(value) => Ok(value),
            Err(telegram::TransportError::FloodWait { seconds })
                if seconds <= self.flood_wait_ceiling_secs =>
            {
                warn!(account_id = %account_id, seconds, "flood wait, sleeping and retrying once");
                tokio::time::sleep(Duration::from_secs(seconds)).await;
                Ok(f(self.transport.clone()).await?)
            }
            Err(telegram::TransportError::FloodWait { seconds }) => {
                Err(SessionError::FloodExceeded { seconds })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn send_comment(
        &self,
        account_id: &AccountId,
        channel: &str,
        post_id: i64,
        text: &str,
    ) -> Result<i64> {
        self.call(account_id, |t| async move {
            t.send_comment(account_id, channel, post_id, text).await
        })
        .await
    }

    pub async fn view_story(&self, account_id: &AccountId, owner: &str, story_id: i64) -> Result<()> {
        self.call(account_id, |t| async move { t.view_story(account_id, owner, story_id).await })
            .await
    }

    pub async fn react(&self, account_id: &AccountId, target: &str, emoji: &str) -> Result<()> {
        self.call(account_id, |t| async move { t.react(account_id, target, emoji).await })
            .await
    }

    pub async fn subscribe(&self, account_id: &AccountId, channel: &str) -> Result<()> {
        self.call(account_id, |t| async move { t.subscribe(account_id, channel).await })
            .await
    }

    pub async fn send_direct(&self, account_id: &AccountId, peer: &str, text: &str) -> Result<()> {
        self.call(account_id, |t| async move { t.send_direct(account_id, peer, text).await })
            .await
    }

    pub async fn publish_post(&self, account_id: &AccountId, channel: &str, text: &str) -> Result<i64> {
        self.call(account_id, |t| async move { t.publish_post(account_id, channel, text).await })
            .await
    }

    pub async fn check_spam_status(&self, account_id: &AccountId) -> Result<SpamStatus> {
        let status = self
            .call(account_id, |t| async move { t.check_spam_status(account_id).await })
            .await?;
        self.record_spam_status(account_id, status)?;
        Ok(status)
    }

    pub async fn fetch_replies(
        &self,
        account_id: &AccountId,
        channel: &str,
        post_id: i64,
        since: chrono::DateTime<Utc>,
    ) -> Result<Vec<telegram::Reply>> {
        self.call(account_id, |t| async move { t.fetch_replies(account_id, channel, post_id, since).await })
            .await
    }

    /// Used by the Funnel & Invite Manager's publisher.
    pub async fn create_invite_link(
        &self,
        account_id: &AccountId,
        channel: &str,
        expire: chrono::DateTime<Utc>,
        usage_limit: u32,
    ) -> Result<telegram::InviteHandle> {
        self.call(account_id, |t| async move {
            t.create_invite_link(account_id, channel, expire, usage_limit).await
        })
        .await
    }

    /// Used by the Funnel & Invite Manager's sweep.
    pub async fn delete_message(&self, account_id: &AccountId, channel: &str, message_id: i64) -> Result<()> {
        self.call(account_id, |t| async move { t.delete_message(account_id, channel, message_id).await })
            .await
    }

    /// Used by the Funnel & Invite Manager's join attributor.
    pub async fn fetch_vip_joins(
        &self,
        account_id: &AccountId,
        vip_channel: &str,
        since: chrono::DateTime<Utc>,
    ) -> Result<Vec<telegram::JoinEvent>> {
        self.call(account_id, |t| async move { t.fetch_vip_joins(account_id, vip_channel, since).await })
            .await
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRecord> {
    let account_id: String = row.get(0)?;
    let spam_status: String = row.get(2)?;
    let spam_checked_at: Option<String> = row.get(3)?;
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;

    Ok(SessionRecord {
        account_id: AccountId::from(account_id),
        session_blob: row.get(1)?,
        spam_status: spam_status.parse().unwrap_or(SpamStatus::Ok),
        spam_checked_at: spam_checked_at
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.with_timezone(&Utc)),
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
            .unwrap()
            .with_timezone(&Utc),
        updated_at: chrono::DateTime::parse_from_rfc3339(&updated_at)
            .unwrap()
            .with_timezone(&Utc),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use traffic_telegram::{ChannelPost, InviteHandle, JoinEvent, Reply};

    struct CountingClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TelegramClient for CountingClient {
        async fn send_comment(&self, _: &AccountId, _: &str, _: i64, _: &str) -> telegram::Result<i64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        }
        async fn view_story(&self, _: &AccountId, _: &str, _: i64) -> telegram::Result<()> {
            Ok(())
        }
        async fn react(&self, _: &AccountId, _: &str, _: &str) -> telegram::Result<()> {
            Ok(())
        }
        async fn subscribe(&self, _: &AccountId, _: &str) -> telegram::Result<()> {
            Ok(())
        }
        async fn send_direct(&self, _: &AccountId, _: &str, _: &str) -> telegram::Result<()> {
            Ok(())
        }
        async fn publish_post(&self, _: &AccountId, _: &str, _: &str) -> telegram::Result<i64> {
            Ok(43)
        }
        async fn create_invite_link(
            &self,
            _: &AccountId,
            _: &str,
            _: DateTime<Utc>,
            _: u32,
        ) -> telegram::Result<InviteHandle> {
            Ok(InviteHandle {
                invite_hash: "hash".to_string(),
                url: "https://t.me/+hash".to_string(),
            })
        }
        async fn delete_message(&self, _: &AccountId, _: &str, _: i64) -> telegram::Result<()> {
            Ok(())
        }
        async fn fetch_replies(
            &self,
            _: &AccountId,
            _: &str,
            _: i64,
            _: DateTime<Utc>,
        ) -> telegram::Result<Vec<Reply>> {
            Ok(vec![])
        }
        async fn check_spam_status(&self, _: &AccountId) -> telegram::Result<SpamStatus> {
            Ok(SpamStatus::Ok)
        }
        async fn fetch_channel_posts(
            &self,
            _: &AccountId,
            _: &str,
            _: DateTime<Utc>,
        ) -> telegram::Result<Vec<ChannelPost>> {
            Ok(vec![])
        }
        async fn fetch_vip_joins(
            &self,
            _: &AccountId,
            _: &str,
            _: DateTime<Utc>,
        ) -> telegram::Result<Vec<JoinEvent>> {
            Ok(vec![])
        }
        async fn ensure_session(&self, _: &AccountId, _: &[u8]) -> telegram::Result<Vec<u8>> {
            Ok(vec![1, 2, 3])
        }
    }

    fn test_registry(transport: Arc<dyn TelegramClient>) -> SessionRegistry {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        SessionRegistry::new(conn, transport)
    }

    #[tokio::test]
    async fn send_comment_round_trips_through_transport() {
        let transport = Arc::new(CountingClient {
            calls: AtomicUsize::new(0),
        });
        let registry = test_registry(transport.clone());
        let account_id = AccountId::new();

        let message_id = registry
            .send_comment(&account_id, "somechannel", 7, "hi")
            .await
            .unwrap();

        assert_eq!(message_id, 42);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ensure_session_persists_the_returned_blob() {
        let transport = Arc::new(CountingClient {
            calls: AtomicUsize::new(0),
        });
        let registry = test_registry(transport);
        let account_id = AccountId::new();

        registry.ensure_session(&account_id).await.unwrap();

        let record = registry.load(&account_id).unwrap().unwrap();
        assert_eq!(record.session_blob, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn create_invite_link_round_trips_through_transport() {
        let transport = Arc::new(CountingClient {
            calls: AtomicUsize::new(0),
        });
        let registry = test_registry(transport);
        let account_id = AccountId::new();

        let handle = registry
            .create_invite_link(&account_id, "@vip", Utc::now() + chrono::Duration::hours(2), 25)
            .await
            .unwrap();

        assert_eq!(handle.invite_hash, "hash");
    }

    /// Reports `FloodWait` on the first call, then succeeds — used to check
    /// the sleep-and-retry-once path for waits within the ceiling.
    struct FloodOnceClient {
        seconds: u64,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TelegramClient for FloodOnceClient {
        async fn send_comment(&self, _: &AccountId, _: &str, _: i64, _: &str) -> telegram::Result<i64> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(telegram::TransportError::FloodWait { seconds: self.seconds })
            } else {
                Ok(42)
            }
        }
        async fn view_story(&self, _: &AccountId, _: &str, _: i64) -> telegram::Result<()> {
            Ok(())
        }
        async fn react(&self, _: &AccountId, _: &str, _: &str) -> telegram::Result<()> {
            Ok(())
        }
        async fn subscribe(&self, _: &AccountId, _: &str) -> telegram::Result<()> {
            Ok(())
        }
        async fn send_direct(&self, _: &AccountId, _: &str, _: &str) -> telegram::Result<()> {
            Ok(())
        }
        async fn publish_post(&self, _: &AccountId, _: &str, _: &str) -> telegram::Result<i64> {
            Ok(43)
        }
        async fn create_invite_link(
            &self,
            _: &AccountId,
            _: &str,
            _: DateTime<Utc>,
            _: u32,
        ) -> telegram::Result<InviteHandle> {
            Ok(InviteHandle {
                invite_hash: "hash".to_string(),
                url: "https://t.me/+hash".to_string(),
            })
        }
        async fn delete_message(&self, _: &AccountId, _: &str, _: i64) -> telegram::Result<()> {
            Ok(())
        }
        async fn fetch_replies(
            &self,
            _: &AccountId,
            _: &str,
            _: i64,
            _: DateTime<Utc>,
        ) -> telegram::Result<Vec<Reply>> {
            Ok(vec![])
        }
        async fn check_spam_status(&self, _: &AccountId) -> telegram::Result<SpamStatus> {
            Ok(SpamStatus::Ok)
        }
        async fn fetch_channel_posts(
            &self,
            _: &AccountId,
            _: &str,
            _: DateTime<Utc>,
        ) -> telegram::Result<Vec<ChannelPost>> {
            Ok(vec![])
        }
        async fn fetch_vip_joins(
            &self,
            _: &AccountId,
            _: &str,
            _: DateTime<Utc>,
        ) -> telegram::Result<Vec<JoinEvent>> {
            Ok(vec![])
        }
        async fn ensure_session(&self, _: &AccountId, _: &[u8]) -> telegram::Result<Vec<u8>> {
            Ok(vec![1, 2, 3])
        }
    }

    #[tokio::test]
    async fn flood_wait_within_ceiling_is_slept_through_and_retried_once() {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        let transport = Arc::new(FloodOnceClient { seconds: 1, calls: AtomicUsize::new(0) });
        let registry = SessionRegistry::with_flood_wait_ceiling(conn, transport.clone(), 600);
        let account_id = AccountId::new();

        let message_id = registry.send_comment(&account_id, "@c", 1, "hi").await.unwrap();

        assert_eq!(message_id, 42);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn flood_wait_above_ceiling_is_surfaced_as_flood_exceeded() {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        let transport = Arc::new(FloodOnceClient { seconds: 3600, calls: AtomicUsize::new(0) });
        let registry = SessionRegistry::with_flood_wait_ceiling(conn, transport.clone(), 600);
        let account_id = AccountId::new();

        let err = registry.send_comment(&account_id, "@c", 1, "hi").await.unwrap_err();

        assert!(matches!(err, SessionError::FloodExceeded { seconds: 3600 }));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_flood_wait_ceiling_matches_spec_default() {
        assert_eq!(DEFAULT_FLOOD_WAIT_CEILING_SECS, 600);
    }
}
