use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use rusqlite::{params, Connection};
use traffic_channels::ChannelMonitor;
use traffic_core::types::{AccountId, ActionKind, Segment};

use crate::content::ContentQueue;
use crate::db::init_db;
use crate::error::Result;
use crate::types::Target;

/// Resolves a concrete `Target` for a chosen action kind.
/// Owns the small amount of dispatcher-local state the acquisition needs
/// that doesn't belong to any other subsystem: which channels an account has
/// already subscribed to.
pub struct TargetSource {
    conn: Mutex<Connection>,
    channels: Arc<ChannelMonitor>,
    content: Arc<ContentQueue>,
}

impl TargetSource {
    pub fn new(conn: Connection, channels: Arc<ChannelMonitor>, content: Arc<ContentQueue>) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            channels,
            content,
        })
    }

    /// Attempts to find and claim a target for `kind`. Returns `Ok(None)`
    /// when there is nothing currently available (caller should try a
    /// different action kind), never treating that as an error.
    pub fn acquire(&self, account_id: &AccountId, segment: Segment, kind: ActionKind) -> Result<Option<Target>> {
        match kind {
            ActionKind::Comment => self.acquire_comment(account_id, segment),
            ActionKind::StoryView => self.acquire_story(segment, false),
            ActionKind::StoryReact => self.acquire_story(segment, true),
            ActionKind::Subscribe => self.acquire_subscribe(account_id, segment),
            ActionKind::Message => self.acquire_queued(account_id, ActionKind::Message),
            ActionKind::Post => self.acquire_queued(account_id, ActionKind::Post),
            // `reaction` targets a comment the account itself just posted, not a
            // freshly acquired target; the dispatcher does not pick it via this path.
            ActionKind::Reaction => Ok(None),
        }
    }

    /// `comment`: pop the next unclaimed post for the account's segment and
    /// attempt the CAS claim; on a lost race, move to the next candidate.
    /// Bounded by `claim_horizon`'s own pruning, so this never spins forever.
    fn acquire_comment(&self, account_id: &AccountId, segment: Segment) -> Result<Option<Target>> {
        const MAX_ATTEMPTS: u32 = 5;
        for _ in 0..MAX_ATTEMPTS {
            let Some(candidate) = self.channels.next_unclaimed(segment)? else {
                return Ok(None);
            };
            let outcome = self
                .channels
                .claim(&candidate.channel, candidate.telegram_message_id, account_id)?;
            if outcome == traffic_channels::ClaimOutcome::Claimed {
                return Ok(Some(Target::Comment {
                    channel: candidate.channel,
                    post_id: candidate.telegram_message_id,
                    post_topic: candidate.topic_tag,
                }));
            }
            // AlreadyClaimed/Expired/NotFound: someone else won the race or the
            // horizon passed between the lookup and the claim — try the next one.
        }
        Ok(None)
    }

    /// `story_view`/`story_react`: pick one channel from the account's
    /// segment cohort as a story owner. No cursor state is kept — the
    /// candidate is drawn uniformly, matching the workspace's clock-derived
    /// pick technique (no `rand` dependency).
    fn acquire_story(&self, segment: Segment, react: bool) -> Result<Option<Target>> {
        let channels = self.channels.list_active_channels()?;
        let cohort: Vec<_> = channels.into_iter().filter(|c| c.segment == segment).collect();
        if cohort.is_empty() {
            return Ok(None);
        }
        let idx = (clock_nanos() as usize) % cohort.len();
        let owner = cohort[idx].username.clone();
        // No per-story id is observable from the channel monitor; story_id 0
        // denotes "the owner's current story", which the transport resolves.
        Ok(Some(if react {
            Target::StoryReact { owner, story_id: 0 }
        } else {
            Target::StoryView { owner, story_id: 0 }
        }))
    }

    /// `subscribe`: pick an unjoined channel from the account's segment.
    fn acquire_subscribe(&self, account_id: &AccountId, segment: Segment) -> Result<Option<Target>> {
        let channels = self.channels.list_active_channels()?;
        let conn = self.conn.lock().unwrap();
        for channel in channels.into_iter().filter(|c| c.segment == segment) {
            let joined: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM account_subscriptions WHERE account_id = ?1 AND channel = ?2",
                    params![account_id.as_str(), channel.username],
                    |r| r.get(0),
                )
                .ok();
            if joined.is_none() {
                return Ok(Some(Target::Subscribe { channel: channel.username }));
            }
        }
        Ok(None)
    }

    /// Records a successful `subscribe` so it is not offered again.
    pub fn record_subscription(&self, account_id: &AccountId, channel: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO account_subscriptions (account_id, channel, subscribed_at)
             VALUES (?1, ?2, ?3)",
            params![account_id.as_str(), channel, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// `message`/`post`: claim the earliest due item from the content queue.
    fn acquire_queued(&self, account_id: &AccountId, kind: ActionKind) -> Result<Option<Target>> {
        let Some(item) = self.content.claim_due(account_id, kind, Utc::now())? else {
            return Ok(None);
        };
        Ok(Some(match kind {
            ActionKind::Message => Target::Message {
                content_id: item.id,
                peer: item.target,
                text: item.text,
            },
            ActionKind::Post => Target::Post {
                content_id: item.id,
                channel: item.target,
                text: item.text,
            },
            _ => unreachable!("acquire_queued only called for message/post"),
        }))
    }
}

fn clock_nanos() -> u64 {
    let mut hasher = DefaultHasher::new();
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
        .hash(&mut hasher);
    hasher.finish()
}
