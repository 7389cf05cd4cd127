use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use traffic_core::types::InviteStatus;

/// A time-limited invite to the gated VIP channel.
///
/// `public_channel` / `teaser_message_id` / `auto_delete_at` track the teaser
/// post that advertised the invite, so the sweep can cascade its deletion
/// without a separate join table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteLink {
    pub invite_link_id: String,
    pub vip_channel_id: String,
    pub invite_hash: String,
    pub url: String,
    pub expire_date: DateTime<Utc>,
    pub usage_limit: u32,
    pub status: InviteStatus,
    pub total_uses: u32,
    pub total_joins: u32,
    /// Account whose session created the link — also the one used to
    /// `delete_message` the teaser post on expiry.
    pub publisher_account_id: String,
    pub public_channel: String,
    pub teaser_message_id: i64,
    pub auto_delete_at: DateTime<Utc>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

/// A VIP-channel join attributed to the invite link that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelConversion {
    pub user_id: String,
    pub invite_link_id: String,
    pub source_channel_id: String,
    pub joined_at: DateTime<Utc>,
    pub verified_as_partner: Option<bool>,
    pub status: String,
}
