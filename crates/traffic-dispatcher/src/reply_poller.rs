use std::str::FromStr;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{error, info, instrument};

use traffic_core::types::{Segment, TimeSlot};
use traffic_sessions::SessionRegistry;
use traffic_strategy::{Context, StrategyOracle};

use crate::error::Result;
use crate::outcome::OutcomePendingStore;
use crate::records::ActionRecordStore;

/// Reply Poller. A separate scheduled worker that drains
/// `OutcomePending` rows at their `poll_at` time, fetches replies via the
/// Session Registry, and attributes reward back to the Strategy Oracle.
pub struct ReplyPoller {
    pending: Arc<OutcomePendingStore>,
    records: Arc<ActionRecordStore>,
    sessions: Arc<SessionRegistry>,
    oracle: Arc<StrategyOracle>,
    window: ChronoDuration,
    tick_interval: Duration,
}

impl ReplyPoller {
    pub fn new(
        pending: Arc<OutcomePendingStore>,
        records: Arc<ActionRecordStore>,
        sessions: Arc<SessionRegistry>,
        oracle: Arc<StrategyOracle>,
        window_minutes: u32,
        tick_interval_seconds: u64,
    ) -> Self {
        Self {
            pending,
            records,
            sessions,
            oracle,
            window: ChronoDuration::minutes(window_minutes as i64),
            tick_interval: Duration::from_secs(tick_interval_seconds),
        }
    }

    /// Drives the poll loop until `shutdown` broadcasts `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("reply poller started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.tick_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("reply poller shutting down");
                        return;
                    }
                }
            }
            if *shutdown.borrow() {
                return;
            }
            if let Err(e) = self.tick().await {
                error!("reply poller tick failed: {e}");
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<()> {
        let due = self.pending.due(Utc::now())?;
        for row in due {
            if let Err(e) = self.process_one(&row).await {
                error!(action_id = %row.action_id, "reply poller failed to process row: {e}");
                continue;
            }
        }
        Ok(())
    }

    async fn process_one(&self, row: &crate::types::OutcomePending) -> Result<()> {
        // Causal ordering: the record must already exist before we
        // attribute an outcome to it.
        let record = self.records.get(&row.action_id)?;
        if record.finished_at.is_none() {
            // Not yet reconciled (crash between posting and polling); skip
            // this round, it will be reconciled on the next dispatcher start.
            return Ok(());
        }

        let since = row.poll_at - self.window;
        let replies = self
            .sessions
            .fetch_replies(&row.account_id, &row.channel, row.comment_message_id, since)
            .await?;

        let reply_count = replies.iter().filter(|r| !r.is_reaction).count() as u32;
        let has_reaction = replies.iter().any(|r| r.is_reaction);
        let got_reply = reply_count > 0;

        let reward = if got_reply {
            1.0
        } else if has_reaction {
            0.5
        } else {
            0.0
        };

        self.records.record_reply_outcome(&row.action_id, got_reply, reply_count)?;

        let context = Context {
            segment: Segment::from_str(&row.context_segment).unwrap_or(Segment::Universal),
            channel: row.context_channel.clone(),
            time_slot: TimeSlot::from_str(&row.context_time_slot).unwrap_or(TimeSlot::Morning),
            post_topic: row.context_post_topic.clone(),
        };
        self.oracle
            .update(&context, row.strategy, reward, row.action_id.as_str())?;

        self.pending.mark_processed(&row.action_id)?;
        info!(action_id = %row.action_id, reward, got_reply, reply_count, "outcome attributed");
        Ok(())
    }
}
