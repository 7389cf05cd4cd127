use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifies a fleet account (UUIDv7 — time-sortable for log correlation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifies an append-only `ActionRecord` (UUIDv7).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId(pub String);

impl ActionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ActionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ActionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifies an `InviteLink` row (UUIDv7).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InviteLinkId(pub String);

impl InviteLinkId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for InviteLinkId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InviteLinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for InviteLinkId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for InviteLinkId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Audience cohort tag. Closed set per the glossary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    Zozh,
    Mama,
    Business,
    Student,
    Universal,
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Segment::Zozh => "zozh",
            Segment::Mama => "mama",
            Segment::Business => "business",
            Segment::Student => "student",
            Segment::Universal => "universal",
        })
    }
}

impl FromStr for Segment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zozh" => Ok(Segment::Zozh),
            "mama" => Ok(Segment::Mama),
            "business" => Ok(Segment::Business),
            "student" => Ok(Segment::Student),
            "universal" => Ok(Segment::Universal),
            other => Err(format!("unknown segment: {other}")),
        }
    }
}

/// Account lifecycle status. See the Account State Store state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    New,
    Warming,
    Active,
    Paused,
    Banned,
    Backup,
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AccountStatus::New => "new",
            AccountStatus::Warming => "warming",
            AccountStatus::Active => "active",
            AccountStatus::Paused => "paused",
            AccountStatus::Banned => "banned",
            AccountStatus::Backup => "backup",
        })
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(AccountStatus::New),
            "warming" => Ok(AccountStatus::Warming),
            "active" => Ok(AccountStatus::Active),
            "paused" => Ok(AccountStatus::Paused),
            "banned" => Ok(AccountStatus::Banned),
            "backup" => Ok(AccountStatus::Backup),
            other => Err(format!("unknown account status: {other}")),
        }
    }
}

/// The closed set of actions a dispatcher fiber can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Comment,
    Reaction,
    Subscribe,
    StoryView,
    StoryReact,
    Message,
    Post,
}

impl ActionKind {
    pub const ALL: [ActionKind; 7] = [
        ActionKind::Comment,
        ActionKind::Reaction,
        ActionKind::Subscribe,
        ActionKind::StoryView,
        ActionKind::StoryReact,
        ActionKind::Message,
        ActionKind::Post,
    ];
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActionKind::Comment => "comment",
            ActionKind::Reaction => "reaction",
            ActionKind::Subscribe => "subscribe",
            ActionKind::StoryView => "story_view",
            ActionKind::StoryReact => "story_react",
            ActionKind::Message => "message",
            ActionKind::Post => "post",
        })
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "comment" => Ok(ActionKind::Comment),
            "reaction" => Ok(ActionKind::Reaction),
            "subscribe" => Ok(ActionKind::Subscribe),
            "story_view" => Ok(ActionKind::StoryView),
            "story_react" => Ok(ActionKind::StoryReact),
            "message" => Ok(ActionKind::Message),
            "post" => Ok(ActionKind::Post),
            other => Err(format!("unknown action kind: {other}")),
        }
    }
}

/// Outcome of an executed action, as recorded in `ActionRecord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Success,
    Error,
    FloodWait,
    Blocked,
}

impl fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActionOutcome::Success => "success",
            ActionOutcome::Error => "error",
            ActionOutcome::FloodWait => "flood_wait",
            ActionOutcome::Blocked => "blocked",
        })
    }
}

impl FromStr for ActionOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ActionOutcome::Success),
            "error" => Ok(ActionOutcome::Error),
            "flood_wait" => Ok(ActionOutcome::FloodWait),
            "blocked" => Ok(ActionOutcome::Blocked),
            other => Err(format!("unknown action outcome: {other}")),
        }
    }
}

/// Comment style passed to the external text generator. Closed set — new
/// strategies require code, since each carries prompt-assembly logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Smart,
    Supportive,
    Funny,
    Expert,
}

impl Strategy {
    /// All strategies in deterministic tie-break order (strategy id order).
    pub const ALL: [Strategy; 4] = [
        Strategy::Smart,
        Strategy::Supportive,
        Strategy::Funny,
        Strategy::Expert,
    ];
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strategy::Smart => "smart",
            Strategy::Supportive => "supportive",
            Strategy::Funny => "funny",
            Strategy::Expert => "expert",
        })
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "smart" => Ok(Strategy::Smart),
            "supportive" => Ok(Strategy::Supportive),
            "funny" => Ok(Strategy::Funny),
            "expert" => Ok(Strategy::Expert),
            other => Err(format!("unknown strategy: {other}")),
        }
    }
}

/// Time-of-day bucket used as a Strategy Oracle context feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSlot {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeSlot {
    /// Bucket an hour-of-day (0-23, account-local) into a time slot.
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            6..=11 => TimeSlot::Morning,
            12..=17 => TimeSlot::Afternoon,
            18..=22 => TimeSlot::Evening,
            _ => TimeSlot::Night,
        }
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TimeSlot::Morning => "morning",
            TimeSlot::Afternoon => "afternoon",
            TimeSlot::Evening => "evening",
            TimeSlot::Night => "night",
        })
    }
}

impl FromStr for TimeSlot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "morning" => Ok(TimeSlot::Morning),
            "afternoon" => Ok(TimeSlot::Afternoon),
            "evening" => Ok(TimeSlot::Evening),
            "night" => Ok(TimeSlot::Night),
            other => Err(format!("unknown time slot: {other}")),
        }
    }
}

/// Closed taxonomy of error kinds surfaced on `ActionRecord.error_kind`
/// and used to drive local-recovery decisions (see `TransportError::classify`
/// in `traffic-telegram`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientNetwork,
    FloodWaitShort,
    FloodWaitLong,
    ProxyFailure,
    RateLimitDenied,
    PeerNotAccessible,
    ContentRejected,
    AuthError,
    Banned,
    ConfigError,
    PersistenceError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::FloodWaitShort => "flood_wait_short",
            ErrorKind::FloodWaitLong => "flood_wait_long",
            ErrorKind::ProxyFailure => "proxy_failure",
            ErrorKind::RateLimitDenied => "rate_limit_denied",
            ErrorKind::PeerNotAccessible => "peer_not_accessible",
            ErrorKind::ContentRejected => "content_rejected",
            ErrorKind::AuthError => "auth_error",
            ErrorKind::Banned => "banned",
            ErrorKind::ConfigError => "config_error",
            ErrorKind::PersistenceError => "persistence_error",
        })
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transient_network" => Ok(ErrorKind::TransientNetwork),
            "flood_wait_short" => Ok(ErrorKind::FloodWaitShort),
            "flood_wait_long" => Ok(ErrorKind::FloodWaitLong),
            "proxy_failure" => Ok(ErrorKind::ProxyFailure),
            "rate_limit_denied" => Ok(ErrorKind::RateLimitDenied),
            "peer_not_accessible" => Ok(ErrorKind::PeerNotAccessible),
            "content_rejected" => Ok(ErrorKind::ContentRejected),
            "auth_error" => Ok(ErrorKind::AuthError),
            "banned" => Ok(ErrorKind::Banned),
            "config_error" => Ok(ErrorKind::ConfigError),
            "persistence_error" => Ok(ErrorKind::PersistenceError),
            other => Err(format!("unknown error kind: {other}")),
        }
    }
}

/// Verdict of the last spam-status check performed against a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpamStatus {
    Ok,
    Limited,
    Banned,
}

impl fmt::Display for SpamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SpamStatus::Ok => "ok",
            SpamStatus::Limited => "limited",
            SpamStatus::Banned => "banned",
        })
    }
}

impl FromStr for SpamStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(SpamStatus::Ok),
            "limited" => Ok(SpamStatus::Limited),
            "banned" => Ok(SpamStatus::Banned),
            other => Err(format!("unknown spam status: {other}")),
        }
    }
}

/// Status of an `InviteLink`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteStatus {
    Active,
    Expired,
    Revoked,
    Exhausted,
}

impl fmt::Display for InviteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InviteStatus::Active => "active",
            InviteStatus::Expired => "expired",
            InviteStatus::Revoked => "revoked",
            InviteStatus::Exhausted => "exhausted",
        })
    }
}

impl FromStr for InviteStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(InviteStatus::Active),
            "expired" => Ok(InviteStatus::Expired),
            "revoked" => Ok(InviteStatus::Revoked),
            "exhausted" => Ok(InviteStatus::Exhausted),
            other => Err(format!("unknown invite status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_id_roundtrips_through_display() {
        let id = AccountId::new();
        let parsed = AccountId::from(id.to_string());
        assert_eq!(id, parsed);
    }

    #[test]
    fn invite_link_id_roundtrips_through_display() {
        let id = InviteLinkId::new();
        let parsed = InviteLinkId::from(id.to_string());
        assert_eq!(id, parsed);
    }

    #[test]
    fn segment_roundtrips() {
        for s in ["zozh", "mama", "business", "student", "universal"] {
            let seg: Segment = s.parse().unwrap();
            assert_eq!(seg.to_string(), s);
        }
    }

    #[test]
    fn action_kind_roundtrips() {
        for k in ActionKind::ALL {
            let parsed: ActionKind = k.to_string().parse().unwrap();
            assert_eq!(parsed, k);
        }
    }

    #[test]
    fn time_slot_from_hour_buckets_correctly() {
        assert_eq!(TimeSlot::from_hour(7), TimeSlot::Morning);
        assert_eq!(TimeSlot::from_hour(14), TimeSlot::Afternoon);
        assert_eq!(TimeSlot::from_hour(20), TimeSlot::Evening);
        assert_eq!(TimeSlot::from_hour(2), TimeSlot::Night);
        assert_eq!(TimeSlot::from_hour(23), TimeSlot::Night);
    }

    #[test]
    fn strategy_all_is_in_deterministic_id_order() {
        assert_eq!(
            Strategy::ALL.map(|s| s.to_string()),
            ["smart", "supportive", "funny", "expert"]
        );
    }
}
