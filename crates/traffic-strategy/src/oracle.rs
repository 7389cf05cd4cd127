use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, instrument};

use traffic_core::types::Strategy;

use crate::db::init_db;
use crate::error::{Result, StrategyError};
use crate::features::feature_vector;
use crate::model::LinUcbModel;
use crate::types::{Context, EffectivenessEntry};

/// Strategy Oracle: a contextual bandit with per-strategy LinUCB
/// linear reward models, falling back to forced uniform exploration while a
/// context is cold and to epsilon-greedy exploration once it has warmed up.
pub struct StrategyOracle {
    conn: Mutex<Connection>,
    epsilon: f64,
    cold_start_threshold: u32,
    /// Exploration weight in the LinUCB score; not part of the external
    /// configuration surface, kept as an internal tuning constant.
    alpha: f64,
}

impl StrategyOracle {
    pub fn new(conn: Connection, epsilon: f64, cold_start_threshold: u32) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            epsilon,
            cold_start_threshold,
            alpha: 1.0,
        })
    }

    /// Selects a strategy for `context`.
    ///
    /// "Cold start" (per-context attempts below the threshold falls back to
    /// ε-greedy so every strategy gets explored) and the boundary case where
    /// every strategy in a context is still below threshold (selection must
    /// be uniform random) are reconciled here as two distinct regimes rather
    /// than one: while *every* strategy in the context is still below the
    /// cold-start threshold, selection is pure uniform random. Once at least
    /// one strategy has cleared the threshold, the context is
    /// "warm" and ordinary ε-greedy applies: explore uniformly with
    /// probability ε, otherwise exploit the LinUCB argmax. This is recorded
    /// as a resolved open question in DESIGN.md rather than guessed silently.
    #[instrument(skip(self))]
    pub fn select(&self, context: &Context) -> Result<Strategy> {
        let attempts = self.attempts_per_strategy(context)?;
        let all_cold = attempts
            .iter()
            .all(|&a| a < self.cold_start_threshold);

        if all_cold {
            return Ok(pick_uniform(&Strategy::ALL));
        }

        if draw_unit() < self.epsilon {
            return Ok(pick_uniform(&Strategy::ALL));
        }

        let x = feature_vector(context);
        let mut best = Strategy::ALL[0];
        let mut best_score = f64::NEG_INFINITY;
        for strategy in Strategy::ALL {
            let model = self.load_model(strategy)?;
            let score = model.ucb_score(&x, self.alpha);
            // Strict `>` keeps the first (lowest id-order) strategy on ties,
            // satisfying the deterministic tie-break rule.
            if score > best_score {
                best_score = score;
                best = strategy;
            }
        }
        Ok(best)
    }

    /// Updates the oracle from an outcome. Rejects a duplicate `action_id`
    ///.
    #[instrument(skip(self))]
    pub fn update(
        &self,
        context: &Context,
        strategy: Strategy,
        reward: f64,
        action_id: &str,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        {
            let conn = self.conn.lock().unwrap();
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO strategy_updates_seen (action_id, updated_at) VALUES (?1, ?2)",
                params![action_id, now],
            )?;
            if inserted == 0 {
                return Err(StrategyError::DuplicateUpdate {
                    action_id: action_id.to_string(),
                });
            }
        }

        let mut model = self.load_model(strategy)?;
        let x = feature_vector(context);
        model.update(&x, reward);
        self.save_model(strategy, &model)?;
        self.record_effectiveness(context, strategy, reward)?;

        info!(strategy = %strategy, reward, "strategy oracle updated");
        Ok(())
    }

    pub fn effectiveness(&self, context: &Context) -> Result<Vec<EffectivenessEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT segment, channel, strategy, time_slot, post_topic, attempts,
                    weighted_successes, score
             FROM strategy_effectiveness
             WHERE segment = ?1 AND channel = ?2 AND time_slot = ?3 AND post_topic = ?4",
        )?;
        let rows = stmt
            .query_map(
                params![
                    context.segment.to_string(),
                    context.channel,
                    context.time_slot.to_string(),
                    context.post_topic,
                ],
                row_to_entry,
            )?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    fn attempts_per_strategy(&self, context: &Context) -> Result<[u32; 4]> {
        let conn = self.conn.lock().unwrap();
        let mut out = [0u32; 4];
        for (i, strategy) in Strategy::ALL.iter().enumerate() {
            let attempts: Option<i64> = conn
                .query_row(
                    "SELECT attempts FROM strategy_effectiveness
                     WHERE segment = ?1 AND channel = ?2 AND strategy = ?3
                       AND time_slot = ?4 AND post_topic = ?5",
                    params![
                        context.segment.to_string(),
                        context.channel,
                        strategy.to_string(),
                        context.time_slot.to_string(),
                        context.post_topic,
                    ],
                    |r| r.get(0),
                )
                .optional()?;
            out[i] = attempts.unwrap_or(0) as u32;
        }
        Ok(out)
    }

    fn record_effectiveness(&self, context: &Context, strategy: Strategy, reward: f64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let success = if reward > 0.0 { reward } else { 0.0 };
        conn.execute(
            "INSERT INTO strategy_effectiveness
                (segment, channel, strategy, time_slot, post_topic, attempts,
                 weighted_successes, score, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6, ?7)
             ON CONFLICT(segment, channel, strategy, time_slot, post_topic) DO UPDATE SET
                attempts = attempts + 1,
                weighted_successes = weighted_successes + ?6,
                score = (weighted_successes + ?6) / (attempts + 1),
                last_updated = ?7",
            params![
                context.segment.to_string(),
                context.channel,
                strategy.to_string(),
                context.time_slot.to_string(),
                context.post_topic,
                success,
                now,
            ],
        )?;
        Ok(())
    }

    fn load_model(&self, strategy: Strategy) -> Result<LinUcbModel> {
        let conn = self.conn.lock().unwrap();
        let json: Option<String> = conn
            .query_row(
                "SELECT model_json FROM strategy_models WHERE strategy = ?1",
                params![strategy.to_string()],
                |r| r.get(0),
            )
            .optional()?;
        match json {
            Some(j) => Ok(serde_json::from_str(&j)?),
            None => Ok(LinUcbModel::identity()),
        }
    }

    fn save_model(&self, strategy: Strategy, model: &LinUcbModel) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let json = serde_json::to_string(model)?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO strategy_models (strategy, model_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(strategy) DO UPDATE SET model_json = ?2, updated_at = ?3",
            params![strategy.to_string(), json, now],
        )?;
        Ok(())
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<EffectivenessEntry> {
    use std::str::FromStr;
    use traffic_core::types::{Segment, TimeSlot};
    Ok(EffectivenessEntry {
        segment: Segment::from_str(&row.get::<_, String>(0)?).unwrap_or(Segment::Universal),
        channel: row.get(1)?,
        strategy: Strategy::from_str(&row.get::<_, String>(2)?).unwrap_or(Strategy::Smart),
        time_slot: TimeSlot::from_str(&row.get::<_, String>(3)?).unwrap_or(TimeSlot::Morning),
        post_topic: row.get(4)?,
        attempts: row.get::<_, i64>(5)? as u32,
        weighted_successes: row.get(6)?,
        score: row.get(7)?,
    })
}

/// Picks one strategy uniformly at random using a deterministic
/// clock-derived draw (no `rand` dependency, matching the rest of the
/// workspace's jitter technique).
fn pick_uniform(strategies: &[Strategy]) -> Strategy {
    let idx = (clock_nanos() as usize) % strategies.len();
    strategies[idx]
}

/// A `[0, 1)` draw derived the same way, for the ε-greedy coin flip.
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
    use traffic_core::types::{Segment, TimeSlot};

    fn oracle() -> StrategyOracle {
        StrategyOracle::new(Connection::open_in_memory().unwrap(), 0.2, 5).unwrap()
    }

    fn ctx() -> Context {
        Context {
            segment: Segment::Zozh,
            channel: "@c".to_string(),
            time_slot: TimeSlot::Morning,
            post_topic: "detox".to_string(),
        }
    }

    #[test]
    fn cold_context_picks_some_strategy_without_error() {
        let o = oracle();
        let s = o.select(&ctx()).unwrap();
        assert!(Strategy::ALL.contains(&s));
    }

    #[test]
    fn update_is_additive_and_rejects_duplicate_action_id() {
        let o = oracle();
        o.update(&ctx(), Strategy::Smart, 1.0, "action-1").unwrap();
        let dup = o.update(&ctx(), Strategy::Smart, 1.0, "action-1");
        assert!(matches!(dup, Err(StrategyError::DuplicateUpdate { .. })));

        let entries = o.effectiveness(&ctx()).unwrap();
        let smart = entries.iter().find(|e| e.strategy == Strategy::Smart).unwrap();
        assert_eq!(smart.attempts, 1);
        assert_eq!(smart.weighted_successes, 1.0);
    }

    #[test]
    fn context_with_enough_attempts_exits_cold_start() {
        let o = oracle();
        for i in 0..5 {
            o.update(&ctx(), Strategy::Smart, 1.0, &format!("a-{i}")).unwrap();
        }
        // With Smart now past the threshold, the context is no longer "all cold" —
        // selection should not error and should return a valid strategy.
        let s = o.select(&ctx()).unwrap();
        assert!(Strategy::ALL.contains(&s));
    }

    #[test]
    fn scenario_a_single_comment_positive_reward_matches_expected_aggregate() {
        let o = oracle();
        o.update(&ctx(), Strategy::Smart, 1.0, "action-99").unwrap();
        let entries = o.effectiveness(&ctx()).unwrap();
        let smart = entries.iter().find(|e| e.strategy == Strategy::Smart).unwrap();
        assert_eq!(smart.attempts, 1);
        assert_eq!(smart.weighted_successes, 1.0);
    }
}
