//! `grammers`-backed implementation of [`TelegramClient`].
//!
//! Unlike a Bot API client, `grammers` authenticates as a real user account,
//! which is required for the actions this engine performs: commenting as a
//! person, viewing and reacting to stories, and joining channels. One
//! connected `grammers_client::Client` is kept per account in `sessions`;
//! the registry above us guarantees calls for a given account never overlap.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use grammers_client::{Client, Config, InitParams, SignInError};
use grammers_session::Session;
use tracing::{error, warn};

use traffic_core::types::{AccountId, SpamStatus};

use crate::client::{ChannelPost, InviteHandle, JoinEvent, Reply, TelegramClient};
use crate::error::{Result, TransportError};

/// Flood-wait above this many seconds is surfaced instead of slept through.
const FLOOD_WAIT_CEILING_SECS: u64 = 600;

/// API credentials for the MTProto application registered at my.telegram.org.
#[derive(Clone)]
pub struct ApiCredentials {
    pub api_id: i32,
    pub api_hash: String,
}

pub struct GrammersTelegramClient {
    credentials: ApiCredentials,
    sessions: DashMap<AccountId, Arc<Client>>,
}

impl GrammersTelegramClient {
    pub fn new(credentials: ApiCredentials) -> Self {
        Self {
            credentials,
            sessions: DashMap::new(),
        }
    }

    /// Connect (or return the cached connection for) an account's session.
    async fn client_for(&self, account: &AccountId, session_blob: &[u8]) -> Result<Arc<Client>> {
        if let Some(existing) = self.sessions.get(account) {
            return Ok(existing.clone());
        }

        let session = if session_blob.is_empty() {
            Session::new()
        } else {
            Session::load(session_blob)
                .map_err(|e| TransportError::AuthError(format!("corrupt session blob: {e}")))?
        };

        let client = Client::connect(Config {
            session,
            api_id: self.credentials.api_id,
            api_hash: self.credentials.api_hash.clone(),
            params: InitParams::default(),
        })
        .await
        .map_err(|e| TransportError::Network(e.to_string()))?;

        let client = Arc::new(client);
        self.sessions.insert(account.clone(), client.clone());
        Ok(client)
    }

    fn classify_invocation_error(err: &grammers_client::InvocationError) -> TransportError {
        match err {
            grammers_client::InvocationError::Rpc(rpc) => {
                if rpc.name == "FLOOD_WAIT" {
                    let seconds = rpc.value.unwrap_or(0) as u64;
                    if seconds <= FLOOD_WAIT_CEILING_SECS {
                        TransportError::FloodWait { seconds }
                    } else {
                        TransportError::FloodExceeded { seconds }
                    }
                } else if rpc.code == 401 {
                    TransportError::AuthError(rpc.name.clone())
                } else if rpc.name.contains("BANNED") || rpc.name.contains("DEACTIVATED") {
                    TransportError::Banned(rpc.name.clone())
                } else if rpc.name.contains("PEER") || rpc.code == 400 {
                    TransportError::PeerNotAccessible(rpc.name.clone())
                } else {
                    TransportError::Invocation(rpc.name.clone())
                }
            }
            other => TransportError::Network(other.to_string()),
        }
    }
}

#[async_trait]
impl TelegramClient for GrammersTelegramClient {
    async fn send_comment(
        &self,
        account: &AccountId,
        channel: &str,
        post_id: i64,
        text: &str,
    ) -> Result<i64> {
        let client = self
            .sessions
            .get(account)
            .ok_or_else(|| TransportError::AuthError("no active session".into()))?
            .clone();

        let chat = client
            .resolve_username(channel)
            .await
            .map_err(Self::classify_invocation_error)?
            .ok_or_else(|| TransportError::PeerNotAccessible(channel.to_string()))?;

        let reply_to = grammers_client::InputMessage::text(text).reply_to(Some(post_id as i32));

        let message = client
            .send_message(&chat, reply_to)
            .await
            .map_err(Self::classify_invocation_error)?;

        Ok(message.id() as i64)
    }

    async fn view_story(&self, account: &AccountId, owner: &str, story_id: i64) -> Result<()> {
        let client = self
            .sessions
            .get(account)
            .ok_or_else(|| TransportError::AuthError("no active session".into()))?
            .clone();

        let peer = client
            .resolve_username(owner)
            .await
            .map_err(Self::classify_invocation_error)?
            .ok_or_else(|| TransportError::PeerNotAccessible(owner.to_string()))?;

        client
            .invoke(&grammers_tl_types::functions::stories::ReadStories {
                peer: peer.to_input(),
                max_id: story_id as i32,
            })
            .await
            .map_err(Self::classify_invocation_error)?;

        Ok(())
    }

    async fn react(&self, account: &AccountId, target: &str, emoji: &str) -> Result<()> {
        let client = self
            .sessions
            .get(account)
            .ok_or_else(|| TransportError::AuthError("no active session".into()))?
            .clone();

        let peer = client
            .resolve_username(target)
            .await
            .map_err(Self::classify_invocation_error)?
            .ok_or_else(|| TransportError::PeerNotAccessible(target.to_string()))?;

        client
            .invoke(&grammers_tl_types::functions::messages::SendReaction {
                big: false,
                add_to_recent: true,
                peer: peer.to_input(),
                msg_id: 0,
                reaction: Some(vec![grammers_tl_types::enums::Reaction::Emoji(
                    grammers_tl_types::types::ReactionEmoji {
                        emoticon: emoji.to_string(),
                    },
                )]),
            })
            .await
            .map_err(Self::classify_invocation_error)?;

        Ok(())
    }

    async fn subscribe(&self, account: &AccountId, channel: &str) -> Result<()> {
        let client = self
            .sessions
            .get(account)
            .ok_or_else(|| TransportError::AuthError("no active session".into()))?
            .clone();

        let chat = client
            .resolve_username(channel)
            .await
            .map_err(Self::classify_invocation_error)?
            .ok_or_else(|| TransportError::PeerNotAccessible(channel.to_string()))?;

        client
            .join_chat(&chat)
            .await
            .map_err(Self::classify_invocation_error)?;
        Ok(())
    }

    async fn send_direct(&self, account: &AccountId, peer: &str, text: &str) -> Result<()> {
        let client = self
            .sessions
            .get(account)
            .ok_or_else(|| TransportError::AuthError("no active session".into()))?
            .clone();

        let chat = client
            .resolve_username(peer)
            .await
            .map_err(Self::classify_invocation_error)?
            .ok_or_else(|| TransportError::PeerNotAccessible(peer.to_string()))?;

        client
            .send_message(&chat, text)
            .await
            .map_err(Self::classify_invocation_error)?;
        Ok(())
    }

    async fn publish_post(&self, account: &AccountId, channel: &str, text: &str) -> Result<i64> {
        let client = self
            .sessions
            .get(account)
            .ok_or_else(|| TransportError::AuthError("no active session".into()))?
            .clone();

        let chat = client
            .resolve_username(channel)
            .await
            .map_err(Self::classify_invocation_error)?
            .ok_or_else(|| TransportError::PeerNotAccessible(channel.to_string()))?;

        let message = client
            .send_message(&chat, text)
            .await
            .map_err(Self::classify_invocation_error)?;

        Ok(message.id() as i64)
    }

    async fn create_invite_link(
        &self,
        account: &AccountId,
        channel: &str,
        expire: DateTime<Utc>,
        usage_limit: u32,
    ) -> Result<InviteHandle> {
        let client = self
            .sessions
            .get(account)
            .ok_or_else(|| TransportError::AuthError("no active session".into()))?
            .clone();

        let chat = client
            .resolve_username(channel)
            .await
            .map_err(Self::classify_invocation_error)?
            .ok_or_else(|| TransportError::PeerNotAccessible(channel.to_string()))?;

        let result = client
            .invoke(&grammers_tl_types::functions::messages::ExportChatInvite {
                legacy_revoke_permanent: false,
                request_needed: false,
                peer: chat.to_input(),
                expire_date: Some(expire.timestamp() as i32),
                usage_limit: Some(usage_limit as i32),
                title: None,
                subscription_pricing: None,
            })
            .await
            .map_err(Self::classify_invocation_error)?;

        match result {
            grammers_tl_types::enums::ExportedChatInvite::ExportedChatInvite(invite) => {
                let hash = invite
                    .link
                    .rsplit('/')
                    .next()
                    .unwrap_or(&invite.link)
                    .to_string();
                Ok(InviteHandle {
                    invite_hash: hash,
                    url: invite.link,
                })
            }
            _ => Err(TransportError::Invocation(
                "unexpected invite variant".into(),
            )),
        }
    }

    async fn delete_message(
        &self,
        account: &AccountId,
        channel: &str,
        message_id: i64,
    ) -> Result<()> {
        let client = self
            .sessions
            .get(account)
            .ok_or_else(|| TransportError::AuthError("no active session".into()))?
            .clone();

        let chat = client
            .resolve_username(channel)
            .await
            .map_err(Self::classify_invocation_error)?
            .ok_or_else(|| TransportError::PeerNotAccessible(channel.to_string()))?;

        client
            .delete_messages(&chat, &[message_id as i32])
            .await
            .map_err(Self::classify_invocation_error)?;
        Ok(())
    }

    async fn fetch_replies(
        &self,
        account: &AccountId,
        channel: &str,
        post_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<Reply>> {
        let client = self
            .sessions
            .get(account)
            .ok_or_else(|| TransportError::AuthError("no active session".into()))?
            .clone();

        let chat = client
            .resolve_username(channel)
            .await
            .map_err(Self::classify_invocation_error)?
            .ok_or_else(|| TransportError::PeerNotAccessible(channel.to_string()))?;

        let mut replies = Vec::new();
        let mut iter = client.iter_messages(&chat).reply_to(post_id as i32);
        while let Some(msg) = iter.next().await.map_err(Self::classify_invocation_error)? {
            let observed_at = Utc
                .timestamp_opt(msg.date().timestamp(), 0)
                .single()
                .unwrap_or(since);
            if observed_at < since {
                break;
            }
            replies.push(Reply {
                telegram_message_id: msg.id() as i64,
                from_user_id: msg
                    .sender()
                    .map(|s| s.id().to_string())
                    .unwrap_or_default(),
                text: Some(msg.text().to_string()),
                is_reaction: false,
                observed_at,
            });
        }
        Ok(replies)
    }

    async fn check_spam_status(&self, account: &AccountId) -> Result<SpamStatus> {
        let client = self
            .sessions
            .get(account)
            .ok_or_else(|| TransportError::AuthError("no active session".into()))?
            .clone();

        match client.invoke(&grammers_tl_types::functions::account::GetAuthorizations).await {
            Ok(_) => Ok(SpamStatus::Ok),
            Err(e) => {
                let classified = Self::classify_invocation_error(&e);
                match classified {
                    TransportError::Banned(_) => Ok(SpamStatus::Banned),
                    TransportError::FloodWait { .. } | TransportError::FloodExceeded { .. } => {
                        Ok(SpamStatus::Limited)
                    }
                    other => Err(other),
                }
            }
        }
    }

    async fn fetch_channel_posts(
        &self,
        account: &AccountId,
        channel: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ChannelPost>> {
        let client = self
            .sessions
            .get(account)
            .ok_or_else(|| TransportError::AuthError("no active session".into()))?
            .clone();

        let chat = client
            .resolve_username(channel)
            .await
            .map_err(Self::classify_invocation_error)?
            .ok_or_else(|| TransportError::PeerNotAccessible(channel.to_string()))?;

        let mut posts = Vec::new();
        let mut iter = client.iter_messages(&chat);
        while let Some(msg) = iter.next().await.map_err(Self::classify_invocation_error)? {
            let posted_at = Utc
                .timestamp_opt(msg.date().timestamp(), 0)
                .single()
                .unwrap_or(since);
            if posted_at < since {
                break;
            }
            posts.push(ChannelPost {
                telegram_message_id: msg.id() as i64,
                text: msg.text().to_string(),
                posted_at,
            });
        }
        Ok(posts)
    }

    async fn fetch_vip_joins(
        &self,
        account: &AccountId,
        vip_channel: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<JoinEvent>> {
        let client = self
            .sessions
            .get(account)
            .ok_or_else(|| TransportError::AuthError("no active session".into()))?
            .clone();

        let chat = client
            .resolve_username(vip_channel)
            .await
            .map_err(Self::classify_invocation_error)?
            .ok_or_else(|| TransportError::PeerNotAccessible(vip_channel.to_string()))?;

        // grammers exposes recent-actions via GetAdminLog; join events are
        // filtered to ParticipantJoin / ParticipantJoinByInvite entries.
        let result = client
            .invoke(&grammers_tl_types::functions::channels::GetAdminLog {
                channel: match chat.to_input() {
                    grammers_tl_types::enums::InputPeer::Channel(c) => {
                        grammers_tl_types::types::InputChannel {
                            channel_id: c.channel_id,
                            access_hash: c.access_hash,
                        }
                        .into()
                    }
                    other => {
                        warn!(channel = vip_channel, "unexpected peer kind for admin log");
                        return Ok(Vec::new());
                    }
                },
                q: String::new(),
                events_filter: None,
                admins: None,
                max_id: 0,
                min_id: 0,
                limit: 100,
            })
            .await
            .map_err(Self::classify_invocation_error)?;

        let events = match result {
            grammers_tl_types::enums::channels::AdminLogResults::Results(r) => r.events,
        };

        let mut joins = Vec::new();
        for event in events {
            let grammers_tl_types::enums::ChannelAdminLogEvent::Event(e) = event;
            let joined_at = Utc
                .timestamp_opt(e.date, 0)
                .single()
                .unwrap_or(since);
            if joined_at < since {
                continue;
            }
            if let grammers_tl_types::enums::ChannelAdminLogEventAction::ParticipantJoin = e.action
            {
                joins.push(JoinEvent {
                    user_id: e.user_id.to_string(),
                    invite_hash: None,
                    joined_at,
                });
            }
        }
        Ok(joins)
    }

    async fn ensure_session(&self, account: &AccountId, session_blob: &[u8]) -> Result<Vec<u8>> {
        let client = self.client_for(account, session_blob).await?;

        if !client.is_authorized().await.unwrap_or(false) {
            error!(
                account_id = %account,
                "session requires interactive login (code/2FA) — not handled automatically"
            );
            return Err(TransportError::AuthError(
                "session requires interactive sign-in".into(),
            ));
        }

        client
            .session()
            .save()
            .map_err(|e| TransportError::AuthError(format!("failed to serialize session: {e}")))
    }
}

/// Surfaced only to document the otherwise-unused `SignInError` import: a
/// fully interactive login flow (phone code + 2FA) is out of scope for the
/// automated fleet path and is handled by a separate operator-run bootstrap
/// tool, not by the dispatcher.
#[allow(dead_code)]
fn _sign_in_error_marker(_: SignInError) {}
