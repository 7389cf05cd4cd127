use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use traffic_core::types::{AccountId, ActionId, ActionKind, ActionOutcome, ErrorKind, Strategy};

/// Immutable append-only log entry. The only
/// mutation allowed after insert is outcome attribution (`got_reply`,
/// `reply_count`), applied by the Reply Poller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action_id: ActionId,
    pub account_id: AccountId,
    pub kind: ActionKind,
    /// Opaque reference to the target, e.g. `"@channel:42"` for a comment,
    /// `"@owner:7"` for a story, or a bare peer/channel username otherwise.
    pub target_ref: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// `None` while the record represents an in-flight attempt not yet
    /// reconciled — see `ActionRecordStore::reconcile_unfinished`.
    pub outcome: Option<ActionOutcome>,
    pub error_kind: Option<ErrorKind>,
    pub comment_message_id: Option<i64>,
    pub strategy_used: Option<Strategy>,
    pub relevance_score: Option<f64>,
    pub post_topic: Option<String>,
    pub got_reply: bool,
    pub reply_count: u32,
}

/// A concrete thing to act on, resolved for the chosen action kind.
#[derive(Debug, Clone)]
pub enum Target {
    Comment {
        channel: String,
        post_id: i64,
        post_topic: String,
    },
    StoryView {
        owner: String,
        story_id: i64,
    },
    StoryReact {
        owner: String,
        story_id: i64,
    },
    Subscribe {
        channel: String,
    },
    Message {
        content_id: i64,
        peer: String,
        text: String,
    },
    Post {
        content_id: i64,
        channel: String,
        text: String,
    },
}

impl Target {
    pub fn kind(&self) -> ActionKind {
        match self {
            Target::Comment { .. } => ActionKind::Comment,
            Target::StoryView { .. } => ActionKind::StoryView,
            Target::StoryReact { .. } => ActionKind::StoryReact,
            Target::Subscribe { .. } => ActionKind::Subscribe,
            Target::Message { .. } => ActionKind::Message,
            Target::Post { .. } => ActionKind::Post,
        }
    }

    pub fn target_ref(&self) -> String {
        match self {
            Target::Comment { channel, post_id, .. } => format!("{channel}:{post_id}"),
            Target::StoryView { owner, story_id } | Target::StoryReact { owner, story_id } => {
                format!("{owner}:{story_id}")
            }
            Target::Subscribe { channel } => channel.clone(),
            Target::Message { peer, .. } => peer.clone(),
            Target::Post { channel, .. } => channel.clone(),
        }
    }
}

/// A queued piece of pre-generated content awaiting publication, for the
/// `message`/`post` action kinds. The content itself comes from the external
/// `TextGenerator`/operator tooling; the dispatcher only consumes the queue.
#[derive(Debug, Clone)]
pub struct ContentItem {
    pub id: i64,
    pub account_id: AccountId,
    pub kind: ActionKind,
    pub target: String,
    pub text: String,
    pub scheduled_at: DateTime<Utc>,
}

/// Row awaiting reply/reaction attribution.
#[derive(Debug, Clone)]
pub struct OutcomePending {
    pub action_id: ActionId,
    pub account_id: AccountId,
    pub channel: String,
    pub comment_message_id: i64,
    pub context_segment: String,
    pub context_channel: String,
    pub context_time_slot: String,
    pub context_post_topic: String,
    pub strategy: Strategy,
    pub poll_at: DateTime<Utc>,
}
