use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use traffic_core::types::{Segment, TimeSlot};

use crate::types::Context;

/// Dimensionality of the compact feature vector: bias(1) + segment one-hot(5)
/// + time-slot one-hot(4) + hashed-channel buckets(4) + hashed-topic buckets(4).
pub const FEATURE_DIM: usize = 18;

const CHANNEL_BUCKETS: usize = 4;
const TOPIC_BUCKETS: usize = 4;

/// Turns a context into a fixed-width feature vector via one-hot encoding
/// for the closed-set fields and feature hashing (deterministic, stable
/// across process restarts since `DefaultHasher` uses fixed SipHash keys)
/// for the open-set channel/topic fields. Keeping the vector fixed-width
/// regardless of how many channels or topics exist is what makes the
/// per-strategy linear model tractable without per-context state.
pub fn feature_vector(ctx: &Context) -> [f64; FEATURE_DIM] {
    let mut v = [0.0; FEATURE_DIM];
    v[0] = 1.0;
    v[1 + segment_index(ctx.segment)] = 1.0;
    v[6 + time_slot_index(ctx.time_slot)] = 1.0;
    v[10 + hash_bucket(&ctx.channel, CHANNEL_BUCKETS)] = 1.0;
    v[14 + hash_bucket(&ctx.post_topic, TOPIC_BUCKETS)] = 1.0;
    v
}

fn segment_index(s: Segment) -> usize {
    match s {
        Segment::Zozh => 0,
        Segment::Mama => 1,
        Segment::Business => 2,
        Segment::Student => 3,
        Segment::Universal => 4,
    }
}

fn time_slot_index(t: TimeSlot) -> usize {
    match t {
        TimeSlot::Morning => 0,
        TimeSlot::Afternoon => 1,
        TimeSlot::Evening => 2,
        TimeSlot::Night => 3,
    }
}

fn hash_bucket(s: &str, buckets: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    s.hash(&mut hasher);
    (hasher.finish() % buckets as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_vector_has_exactly_one_hot_per_field() {
        let ctx = Context {
            segment: Segment::Zozh,
            channel: "@healthy_life".to_string(),
            time_slot: TimeSlot::Morning,
            post_topic: "detox".to_string(),
        };
        let v = feature_vector(&ctx);
        assert_eq!(v[0], 1.0);
        assert_eq!(v[1..6].iter().filter(|&&x| x == 1.0).count(), 1);
        assert_eq!(v[6..10].iter().filter(|&&x| x == 1.0).count(), 1);
        assert_eq!(v[10..14].iter().filter(|&&x| x == 1.0).count(), 1);
        assert_eq!(v[14..18].iter().filter(|&&x| x == 1.0).count(), 1);
        assert_eq!(v.iter().filter(|&&x| x == 1.0).count(), 5);
    }

    #[test]
    fn hash_bucket_is_deterministic_across_calls() {
        assert_eq!(hash_bucket("@same_channel", 4), hash_bucket("@same_channel", 4));
    }
}
