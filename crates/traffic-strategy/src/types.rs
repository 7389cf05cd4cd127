use serde::{Deserialize, Serialize};

use traffic_core::types::{Segment, Strategy, TimeSlot};

/// The feature tuple the oracle selects and updates against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Context {
    pub segment: Segment,
    pub channel: String,
    pub time_slot: TimeSlot,
    pub post_topic: String,
}

/// Public snapshot of a `(segment, channel, strategy, time_slot, post_topic)`
/// aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectivenessEntry {
    pub segment: Segment,
    pub channel: String,
    pub strategy: Strategy,
    pub time_slot: TimeSlot,
    pub post_topic: String,
    pub attempts: u32,
    pub weighted_successes: f64,
    pub score: f64,
}
