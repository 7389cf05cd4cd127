use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use traffic_core::types::{AccountId, SpamStatus};

use crate::error::Result;

/// A single reply or reaction observed on one of our comments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub telegram_message_id: i64,
    pub from_user_id: String,
    pub text: Option<String>,
    /// `true` when this entry is a reaction rather than a text reply.
    pub is_reaction: bool,
    pub observed_at: DateTime<Utc>,
}

/// A post observed in a monitored third-party channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelPost {
    pub telegram_message_id: i64,
    pub text: String,
    pub posted_at: DateTime<Utc>,
}

/// A freshly minted invite link, as returned by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteHandle {
    pub invite_hash: String,
    pub url: String,
}

/// A membership-update event on a channel we hold an invite link for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinEvent {
    pub user_id: String,
    pub invite_hash: Option<String>,
    pub joined_at: DateTime<Utc>,
}

/// The narrow capability set the engine depends on.
///
/// The engine treats this trait as the entire boundary to Telegram: no
/// transport detail leaks past it. Every method is serialized per-account by
/// the caller (`traffic-sessions::SessionRegistry`); implementations need not
/// guard against concurrent calls for the same account themselves, but must
/// be safe to call concurrently for *different* accounts.
#[async_trait]
pub trait TelegramClient: Send + Sync {
    async fn send_comment(
        &self,
        account: &AccountId,
        channel: &str,
        post_id: i64,
        text: &str,
    ) -> Result<i64>;

    async fn view_story(&self, account: &AccountId, owner: &str, story_id: i64) -> Result<()>;

    async fn react(&self, account: &AccountId, target: &str, emoji: &str) -> Result<()>;

    async fn subscribe(&self, account: &AccountId, channel: &str) -> Result<()>;

    async fn send_direct(&self, account: &AccountId, peer: &str, text: &str) -> Result<()>;

    /// Publishes a top-level post to a channel the account administers —
    /// the account's own thematic channel (action kind `post`) or a public
    /// channel receiving an invite teaser (Funnel & Invite Manager).
    async fn publish_post(&self, account: &AccountId, channel: &str, text: &str) -> Result<i64>;

    async fn create_invite_link(
        &self,
        account: &AccountId,
        channel: &str,
        expire: DateTime<Utc>,
        usage_limit: u32,
    ) -> Result<InviteHandle>;

    async fn delete_message(&self, account: &AccountId, channel: &str, message_id: i64)
        -> Result<()>;

    async fn fetch_replies(
        &self,
        account: &AccountId,
        channel: &str,
        post_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<Reply>>;

    async fn check_spam_status(&self, account: &AccountId) -> Result<SpamStatus>;

    /// Not part of the dispatcher's own capability list, but needed by the
    /// Channel Monitor, which borrows a designated reader account's session.
    async fn fetch_channel_posts(
        &self,
        account: &AccountId,
        channel: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ChannelPost>>;

    /// Polled by the Funnel & Invite Manager's membership-update stream.
    async fn fetch_vip_joins(
        &self,
        account: &AccountId,
        vip_channel: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<JoinEvent>>;

    /// Log in a fresh session from a persisted (possibly empty) session blob,
    /// returning the updated blob to persist. Used by the registry on first
    /// login and on session refresh.
    async fn ensure_session(&self, account: &AccountId, session_blob: &[u8]) -> Result<Vec<u8>>;
}
