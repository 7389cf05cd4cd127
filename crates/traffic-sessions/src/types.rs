use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use traffic_core::types::{AccountId, SpamStatus};

/// A persisted MTProto session for one account.
///
/// Unlike the conversation-centric sessions this crate used to track, a
/// Telegram session is simple: one opaque, encrypted blob per account, plus
/// the spam/limitation state last observed for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub account_id: AccountId,
    /// Opaque `grammers_session::Session` bytes, encrypted at rest by the
    /// caller before being handed to `SessionRegistry::save`.
    pub session_blob: Vec<u8>,
    pub spam_status: SpamStatus,
    pub spam_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
