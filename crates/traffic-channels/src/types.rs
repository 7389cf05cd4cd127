use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use traffic_core::types::Segment;

/// A third-party channel being monitored for new posts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetChannel {
    pub username: String,
    pub segment: Segment,
    pub joined_at: DateTime<Utc>,
    pub active: bool,
    /// Operator-provided seed flag; advisory, not authoritative.
    pub anti_bot: bool,
    /// Cursor for the next `fetch_channel_posts` call; `None` before the first poll.
    pub last_polled_at: Option<DateTime<Utc>>,
}

/// A single observed post, weakly owned by the monitor and transiently
/// claimed by at most one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostObservation {
    pub channel: String,
    pub telegram_message_id: i64,
    pub seen_at: DateTime<Utc>,
    pub topic_tag: String,
    pub claimed_by_account_id: Option<String>,
}

/// Emitted by the monitor for every newly observed, not-yet-seen post.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub channel: String,
    pub telegram_message_id: i64,
    pub observed_at: DateTime<Utc>,
    pub topic_tag: String,
}

/// Result of attempting to claim a `PostObservation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    AlreadyClaimed,
    Expired,
    NotFound,
}
