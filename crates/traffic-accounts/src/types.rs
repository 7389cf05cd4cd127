use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use traffic_core::types::{AccountId, AccountStatus, Segment, SpamStatus};

/// Persona display fields shown to other users through comments/posts.
/// The actual comment/post text is produced by the external `TextGenerator`;
/// this is just the identity it is generated on behalf of.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub display_name: String,
    pub bio: Option<String>,
}

/// A single fleet account row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub account_id: AccountId,
    /// Opaque identifier for the phone number used to register the Telegram
    /// account. The number itself is never logged; only this field (which
    /// may be a hash) travels through tracing spans.
    pub phone_identifier: String,
    pub segment: Segment,
    pub persona: Persona,
    /// Current proxy assignment, mirrored here for fast reads; the proxy
    /// pool remains the source of truth for acquisition/cooldown.
    pub proxy_id: Option<String>,
    pub linked_channel_id: Option<String>,
    pub status: AccountStatus,
    /// Warmup phase, 1..=4. Meaningless once `warmup_completed`.
    pub phase: u8,
    pub day_in_phase: u32,
    pub warmup_completed: bool,
    pub last_activity_at: Option<DateTime<Utc>>,
    /// Set when a long flood-wait parks the account in `paused`; the
    /// dispatcher supervisor auto-resumes the account once this instant
    /// passes (unlike an admin-initiated pause, which has no wake time and
    /// waits for a manual resume).
    pub paused_until: Option<DateTime<Utc>>,
    pub ban_reason: Option<String>,
    pub spam_status: SpamStatus,
    pub spam_checked_at: Option<DateTime<Utc>>,
    /// IANA zone name override; `None` means use `fleet.default_timezone`.
    pub timezone_override: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when registering a brand-new account (status=new, phase=1).
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub phone_identifier: String,
    pub segment: Segment,
    pub persona: Persona,
    pub timezone_override: Option<String>,
}
