use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Duration as ChronoDuration, Timelike, Utc};
use chrono_tz::Tz;
use tokio::time::Duration;
use tracing::{info, instrument, warn};

use traffic_accounts::{Account, AccountStore};
use traffic_core::types::{AccountId, ActionKind, ActionOutcome, ErrorKind, Strategy, TimeSlot};
use traffic_ledger::{Grant, RateLedger};
use traffic_proxy::{ProxyOutcome, ProxyPool};
use traffic_sessions::{SessionError, SessionRegistry};
use traffic_strategy::{Context, StrategyOracle};
use traffic_warmup::{ActionBudget, WarmupPlanner};

use crate::error::Result;
use crate::outcome::OutcomePendingStore;
use crate::records::ActionRecordStore;
use crate::targets::TargetSource;
use crate::text::{generate_with_fallback, GenerationContext, GenerationKind, TemplateFallback, TextGenerator};
use crate::types::Target;

/// Every action kind the dispatcher's budget selection loop will consider.
/// `reaction` is excluded: it targets a comment the account itself just
/// posted rather than a freshly acquired target (see `TargetSource::acquire`).
const SELECTABLE_KINDS: [ActionKind; 6] = [
    ActionKind::Comment,
    ActionKind::StoryView,
    ActionKind::StoryReact,
    ActionKind::Subscribe,
    ActionKind::Message,
    ActionKind::Post,
];

const TRANSIENT_RETRY_ATTEMPTS: u32 = 3;

/// One dispatcher fiber's progress this tick, for the supervisor/tests to
/// observe without inspecting persisted state.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Account status is not `{warming, active}` — the fiber should park.
    Ineligible,
    /// Inside the quiet-hours window; caller should sleep this long.
    QuietHours(Duration),
    /// Every selectable kind is exhausted for today.
    NoBudget,
    /// The chosen kind had no acquirable target right now.
    NoTarget(ActionKind),
    /// The ledger denied the increment (hit the limit between selection and commit).
    RateLimited(ActionKind),
    /// An action executed successfully.
    Executed(ActionKind),
    /// An action failed with a locally-recovered or surfaced error.
    Failed(ActionKind, ErrorKind),
    /// The account moved to a terminal/parked state; the fiber should exit.
    Stopped,
}

/// The Action Dispatcher: one fiber's worth of state for a
/// single account. Cross-account coordination (proxy, post claims, ledger
/// counters, strategy updates) all goes through collaborators that are
/// themselves safe under concurrent access from sibling fibers — nothing
/// here is held across a tick.
pub struct DispatcherWorker {
    account_id: AccountId,
    accounts: Arc<AccountStore>,
    warmup: Arc<WarmupPlanner>,
    ledger: Arc<RateLedger>,
    proxies: Arc<ProxyPool>,
    sessions: Arc<SessionRegistry>,
    targets: Arc<TargetSource>,
    records: Arc<ActionRecordStore>,
    pending: Arc<OutcomePendingStore>,
    oracle: Arc<StrategyOracle>,
    generator: Arc<dyn TextGenerator>,
    fallback: TemplateFallback,
    default_tz: Tz,
    quiet_start_min: i32,
    quiet_end_min: i32,
    reply_window: ChronoDuration,
    hard_ceilings: HashMap<ActionKind, u32>,
}

impl DispatcherWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        account_id: AccountId,
        accounts: Arc<AccountStore>,
        warmup: Arc<WarmupPlanner>,
        ledger: Arc<RateLedger>,
        proxies: Arc<ProxyPool>,
        sessions: Arc<SessionRegistry>,
        targets: Arc<TargetSource>,
        records: Arc<ActionRecordStore>,
        pending: Arc<OutcomePendingStore>,
        oracle: Arc<StrategyOracle>,
        generator: Arc<dyn TextGenerator>,
        default_tz: Tz,
        quiet_start: &str,
        quiet_end: &str,
        reply_window_minutes: u32,
        hard_ceilings: HashMap<ActionKind, u32>,
    ) -> Self {
        Self {
            account_id,
            accounts,
            warmup,
            ledger,
            proxies,
            sessions,
            targets,
            records,
            pending,
            oracle,
            generator,
            fallback: TemplateFallback,
            default_tz,
            quiet_start_min: parse_hhmm(quiet_start),
            quiet_end_min: parse_hhmm(quiet_end),
            reply_window: ChronoDuration::minutes(reply_window_minutes as i64),
            hard_ceilings,
        }
    }

    /// Drives the fiber until the account becomes ineligible, is stopped
    /// (banned/auth error/long flood-wait), or `shutdown` fires.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        self.ensure_proxy().await;
        loop {
            if *shutdown.borrow() {
                break;
            }
            let outcome = match self.tick().await {
                Ok(o) => o,
                Err(e) => {
                    warn!(account_id = %self.account_id, "dispatcher tick failed: {e}");
                    TickOutcome::Failed(ActionKind::Comment, ErrorKind::PersistenceError)
                }
            };

            let sleep_for = match &outcome {
                TickOutcome::Ineligible | TickOutcome::Stopped => {
                    info!(account_id = %self.account_id, "dispatcher fiber parking");
                    self.release_proxy();
                    break;
                }
                TickOutcome::QuietHours(d) => *d,
                TickOutcome::NoBudget => Duration::from_secs(300),
                TickOutcome::NoTarget(_) | TickOutcome::RateLimited(_) => Duration::from_secs(20),
                TickOutcome::Executed(_) | TickOutcome::Failed(_, _) => Duration::from_secs(1),
            };

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(account_id = %self.account_id, "dispatcher fiber stopped");
    }

    async fn ensure_proxy(&self) {
        if let Ok(account) = self.accounts.get(&self.account_id) {
            if account.proxy_id.is_none() {
                if let Ok(Some(proxy)) = self.proxies.acquire(self.account_id.as_str()) {
                    let _ = self.accounts.set_proxy(&self.account_id, Some(&proxy.endpoint));
                }
            }
        }
    }

    fn release_proxy(&self) {
        let _ = self.proxies.release(self.account_id.as_str());
    }

    /// Runs one budget-check -> target-acquire -> rate-clear -> execute -> record cycle.
    #[instrument(skip(self), fields(account_id = %self.account_id))]
    pub async fn tick(&self) -> Result<TickOutcome> {
        let account = self.accounts.get(&self.account_id)?;
        if !matches!(
            account.status,
            traffic_core::types::AccountStatus::Warming | traffic_core::types::AccountStatus::Active
        ) {
            return Ok(TickOutcome::Ineligible);
        }

        let tz = account_tz(&account, self.default_tz);
        if let Some(remaining) = self.quiet_hours_remaining(tz) {
            return Ok(TickOutcome::QuietHours(remaining));
        }

        let budget = self.warmup.today_budget(&self.account_id, tz)?;
        let Some(kind) = self.choose_kind(&budget, tz)? else {
            return Ok(TickOutcome::NoBudget);
        };

        let Some(target) = self.targets.acquire(&self.account_id, account.segment, kind)? else {
            return Ok(TickOutcome::NoTarget(kind));
        };

        let limit = self.effective_limit(&budget, kind);
        let grant = self.ledger.try_increment(&self.account_id, kind, limit, tz)?;
        if grant == Grant::Denied {
            return Ok(TickOutcome::RateLimited(kind));
        }

        let (min_d, max_d) = budget.delay_range;
        tokio::time::sleep(Duration::from_secs(jittered_delay(min_d, max_d))).await;

        self.run_target(&account, kind, target).await
    }

    /// Resolves strategy/text for a comment up front (so retries reuse the
    /// same text), then drives the transport call with local error recovery.
    async fn run_target(&self, account: &Account, kind: ActionKind, target: Target) -> Result<TickOutcome> {
        let action_id = self.records.begin(&self.account_id, kind, &target.target_ref())?;

        let comment_plan = match &target {
            Target::Comment { channel, post_topic, .. } => {
                let time_slot =
                    TimeSlot::from_hour(Utc::now().hour_for(account_tz(account, self.default_tz)));
                let context = Context {
                    segment: account.segment,
                    channel: channel.clone(),
                    time_slot,
                    post_topic: post_topic.clone(),
                };
                let strategy = self.oracle.select(&context)?;
                let gen_ctx = GenerationContext {
                    segment: account.segment.to_string(),
                    persona_display_name: account.persona.display_name.clone(),
                    strategy: Some(strategy),
                    topic: Some(post_topic.clone()),
                    source_post_excerpt: None,
                };
                let text = generate_with_fallback(
                    self.generator.as_ref(),
                    &self.fallback,
                    GenerationKind::Comment,
                    &gen_ctx,
                )
                .await;
                let Some(text) = text else {
                    // Comments have no safe generic fallback; drop
                    // the action rather than post placeholder text.
                    self.records.complete(
                        &action_id,
                        ActionOutcome::Error,
                        Some(ErrorKind::ContentRejected),
                        None,
                        Some(strategy),
                        Some(post_topic.as_str()),
                    )?;
                    return Ok(TickOutcome::Failed(kind, ErrorKind::ContentRejected));
                };
                Some((strategy, text))
            }
            _ => None,
        };

        let mut attempt = 0u32;
        loop {
            let comment_ref = comment_plan.as_ref().map(|(s, t)| (*s, t.as_str()));
            match self.execute(&target, comment_ref).await {
                Ok(message_id) => {
                    let (strategy, post_topic) = match &target {
                        Target::Comment { post_topic, .. } => {
                            (comment_plan.as_ref().map(|(s, _)| *s), Some(post_topic.as_str()))
                        }
                        _ => (None, None),
                    };
                    self.records.complete(
                        &action_id,
                        ActionOutcome::Success,
                        None,
                        message_id,
                        strategy,
                        post_topic,
                    )?;
                    self.accounts.touch_activity(&self.account_id)?;

                    if let (Target::Comment { channel, post_topic, .. }, Some(message_id)) =
                        (&target, message_id)
                    {
                        let time_slot =
                            TimeSlot::from_hour(Utc::now().hour_for(account_tz(account, self.default_tz)));
                        self.pending.enqueue(
                            &action_id,
                            &self.account_id,
                            channel,
                            message_id,
                            &account.segment.to_string(),
                            channel,
                            &time_slot.to_string(),
                            post_topic,
                            strategy.unwrap_or(Strategy::Smart),
                            Utc::now() + self.reply_window,
                        )?;
                    }
                    if let Target::Subscribe { channel } = &target {
                        self.targets.record_subscription(&self.account_id, channel)?;
                    }
                    return Ok(TickOutcome::Executed(kind));
                }
                Err(err) => {
                    let error_kind = classify(&err);
                    match error_kind {
                        ErrorKind::TransientNetwork if attempt < TRANSIENT_RETRY_ATTEMPTS => {
                            attempt += 1;
                            if let Some(proxy_id) = account.proxy_id.as_deref() {
                                let _ = self.proxies.report(proxy_id, ProxyOutcome::Failure);
                            }
                            self.release_proxy();
                            self.ensure_proxy().await;
                            tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                            continue;
                        }
                        ErrorKind::Banned => {
                            self.records.complete(&action_id, ActionOutcome::Blocked, Some(error_kind), None, None, None)?;
                            self.accounts.mark_banned(&self.account_id, "transport_reported_banned")?;
                            return Ok(TickOutcome::Stopped);
                        }
                        ErrorKind::AuthError => {
                            self.records.complete(&action_id, ActionOutcome::Error, Some(error_kind), None, None, None)?;
                            let _ = self.accounts.transition(
                                &self.account_id,
                                account.status,
                                traffic_core::types::AccountStatus::Paused,
                            );
                            warn!(account_id = %self.account_id, "auth error, account paused");
                            return Ok(TickOutcome::Stopped);
                        }
                        ErrorKind::FloodWaitLong => {
                            self.records.complete(&action_id, ActionOutcome::FloodWait, Some(error_kind), None, None, None)?;
                            let wake_at = Utc::now()
                                + ChronoDuration::seconds(flood_wait_seconds(&err).unwrap_or(0) as i64);
                            let _ = self.accounts.pause_until(&self.account_id, account.status, wake_at);
                            warn!(account_id = %self.account_id, %wake_at, "flood wait exceeded ceiling, account parked");
                            return Ok(TickOutcome::Stopped);
                        }
                        _ => {
                            self.records.complete(&action_id, ActionOutcome::Error, Some(error_kind), None, None, None)?;
                            return Ok(TickOutcome::Failed(kind, error_kind));
                        }
                    }
                }
            }
        }
    }

    /// Makes the single transport call for `target`, returning the resulting
    /// `message_id` where the action kind produces one.
    async fn execute(
        &self,
        target: &Target,
        comment: Option<(Strategy, &str)>,
    ) -> std::result::Result<Option<i64>, SessionError> {
        match target {
            Target::Comment { channel, post_id, .. } => {
                let (_, text) = comment.expect("comment plan resolved before execute");
                let message_id = self.sessions.send_comment(&self.account_id, channel, *post_id, text).await?;
                Ok(Some(message_id))
            }
            Target::StoryView { owner, story_id } => {
                self.sessions.view_story(&self.account_id, owner, *story_id).await?;
                Ok(None)
            }
            Target::StoryReact { owner, story_id } => {
                self.sessions
                    .react(&self.account_id, &format!("{owner}:{story_id}"), "\u{2764}")
                    .await?;
                Ok(None)
            }
            Target::Subscribe { channel } => {
                self.sessions.subscribe(&self.account_id, channel).await?;
                Ok(None)
            }
            Target::Message { peer, text, .. } => {
                self.sessions.send_direct(&self.account_id, peer, text).await?;
                Ok(None)
            }
            Target::Post { channel, text, .. } => {
                let message_id = self.sessions.publish_post(&self.account_id, channel, text).await?;
                Ok(Some(message_id))
            }
        }
    }

    /// Weighted pick over kinds with remaining budget, biased toward the
    /// kind furthest below its pace for the day.
    fn choose_kind(&self, budget: &ActionBudget, tz: Tz) -> Result<Option<ActionKind>> {
        let mut candidates = Vec::new();
        for kind in SELECTABLE_KINDS {
            let limit = self.effective_limit(budget, kind);
            if limit == 0 {
                continue;
            }
            let counter = self.ledger.daily_counter(&self.account_id, kind, tz)?;
            if counter >= limit {
                continue;
            }
            let deficit = 1.0 - (counter as f64 / limit as f64);
            candidates.push((kind, deficit.max(0.05)));
        }
        if candidates.is_empty() {
            return Ok(None);
        }
        Ok(Some(weighted_pick(&candidates)))
    }

    fn effective_limit(&self, budget: &ActionBudget, kind: ActionKind) -> u32 {
        let planner = budget.quota_for(kind);
        let hard = self.hard_ceilings.get(&kind).copied().unwrap_or(u32::MAX);
        planner.min(hard)
    }

    /// `None` outside quiet hours; `Some(sleep-until-end)` inside them.
    /// `end < start` means the window spans midnight.
    fn quiet_hours_remaining(&self, tz: Tz) -> Option<Duration> {
        if self.quiet_start_min == self.quiet_end_min {
            return None;
        }
        let now_local = Utc::now().with_timezone(&tz);
        let now_min = now_local.hour() as i32 * 60 + now_local.minute() as i32;
        let inside = if self.quiet_start_min < self.quiet_end_min {
            now_min >= self.quiet_start_min && now_min < self.quiet_end_min
        } else {
            now_min >= self.quiet_start_min || now_min < self.quiet_end_min
        };
        if !inside {
            return None;
        }
        let minutes_left = if self.quiet_end_min > now_min {
            self.quiet_end_min - now_min
        } else {
            (24 * 60 - now_min) + self.quiet_end_min
        };
        Some(Duration::from_secs((minutes_left.max(1) as u64) * 60))
    }
}

fn classify(err: &SessionError) -> ErrorKind {
    match err {
        SessionError::NotFound { .. } => ErrorKind::AuthError,
        SessionError::Database(_) => ErrorKind::PersistenceError,
        SessionError::FloodExceeded { .. } => ErrorKind::FloodWaitLong,
        SessionError::Transport(t) => t.classify(),
    }
}

/// Recovers the registry's reported flood-wait duration, lost by
/// `classify`'s collapse to `ErrorKind::FloodWaitLong`, so the required
/// wake time can be persisted on the account (§4.3, Scenario B).
fn flood_wait_seconds(err: &SessionError) -> Option<u64> {
    match err {
        SessionError::FloodExceeded { seconds } => Some(*seconds),
        _ => None,
    }
}

fn account_tz(account: &Account, default_tz: Tz) -> Tz {
    account
        .timezone_override
        .as_deref()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default_tz)
}

fn parse_hhmm(s: &str) -> i32 {
    let mut parts = s.splitn(2, ':');
    let h: i32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let m: i32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    (h.clamp(0, 23)) * 60 + m.clamp(0, 59)
}

trait HourForExt {
    fn hour_for(&self, tz: Tz) -> u32;
}

impl HourForExt for chrono::DateTime<Utc> {
    fn hour_for(&self, tz: Tz) -> u32 {
        self.with_timezone(&tz).hour()
    }
}

/// `delay_range` sampled uniformly then jittered by ±20%.
/// Deterministic clock-derived draws, matching the rest of the workspace's
/// no-`rand`-dependency technique.
fn jittered_delay(min_secs: u32, max_secs: u32) -> u64 {
    let (lo, hi) = if min_secs <= max_secs { (min_secs, max_secs) } else { (max_secs, min_secs) };
    let span = (hi - lo) as u64 + 1;
    let base = lo as u64 + (clock_nanos() % span);
    let jitter_frac = ((clock_nanos() >> 8) % 41) as i64 - 20; // -20..=20
    let jittered = base as i64 + (base as i64 * jitter_frac / 100);
    jittered.max(1) as u64
}

fn weighted_pick(candidates: &[(ActionKind, f64)]) -> ActionKind {
    let total: f64 = candidates.iter().map(|(_, w)| w).sum();
    let draw = draw_unit() * total;
    let mut acc = 0.0;
    for (kind, weight) in candidates {
        acc += weight;
        if draw < acc {
            return *kind;
        }
    }
    candidates.last().unwrap().0
}

fn draw_unit() -> f64 {
    (clock_nanos() % 1_000_000) as f64 / 1_000_000.0
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_hours_wraparound_parses_start_after_end() {
        let start = parse_hhmm("23:00");
        let end = parse_hhmm("07:00");
        assert!(start > end);
    }

    #[test]
    fn jittered_delay_stays_within_reasonable_bounds_of_range() {
        for _ in 0..50 {
            let d = jittered_delay(100, 200);
            assert!(d >= 1);
            assert!(d <= 240);
        }
    }

    #[test]
    fn weighted_pick_only_returns_candidate_kinds() {
        let candidates = vec![(ActionKind::Comment, 1.0), (ActionKind::Post, 0.1)];
        for _ in 0..20 {
            let pick = weighted_pick(&candidates);
            assert!(pick == ActionKind::Comment || pick == ActionKind::Post);
        }
    }

    #[test]
    fn parse_hhmm_handles_default_format() {
        assert_eq!(parse_hhmm("23:00"), 23 * 60);
        assert_eq!(parse_hhmm("07:05"), 7 * 60 + 5);
    }
}
