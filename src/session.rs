//! Session tracking and meta-learning
//!
//! Sessions group ingests into short-lived buckets (roughly hourly) so the
//! temporal inference strategy can reason about "what happened together".
//! The meta-learning job observes aggregate statistics and proposes new
//! threshold values within clamped bounds.

use chrono::{DateTime, Datelike, Timelike, Utc};
use parking_lot::Mutex;

use crate::config::Tunables;
use crate::types::Memory;

/// A session stays reusable for this long after it was opened
const SESSION_MAX_AGE_SECS: i64 = 60 * 60;

#[derive(Debug, Clone)]
struct OpenSession {
    id: String,
    opened_at: DateTime<Utc>,
}

/// Groups ingests into short-lived sessions
pub struct SessionTracker {
    current: Mutex<Option<OpenSession>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }

    /// Open a session from an external signal; generated id when absent
    pub fn open(&self, id: Option<String>, now: DateTime<Utc>) -> String {
        let id = id.unwrap_or_else(|| bucket_id(now));
        *self.current.lock() = Some(OpenSession {
            id: id.clone(),
            opened_at: now,
        });
        id
    }

    pub fn close(&self) {
        *self.current.lock() = None;
    }

    /// Session tag for a memory ingested now
    ///
    /// Uses the explicitly opened session while it is fresh, otherwise the
    /// hourly bucket.
    pub fn tag_for(&self, now: DateTime<Utc>) -> String {
        let mut current = self.current.lock();
        if let Some(session) = current.as_ref() {
            if (now - session.opened_at).num_seconds() < SESSION_MAX_AGE_SECS {
                return session.id.clone();
            }
            *current = None;
        }
        bucket_id(now)
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn bucket_id(now: DateTime<Utc>) -> String {
    format!(
        "sess-{:04}{:02}{:02}{:02}",
        now.year(),
        now.month(),
        now.day(),
        now.hour()
    )
}

/// Aggregate statistics observed by the meta-learning job
#[derive(Debug, Clone, Copy, Default)]
pub struct MetaObservation {
    pub avg_importance: f32,
    pub avg_access_rate: f32,
    /// Fraction of memories whose |emotional_weight| clears the threshold
    pub emotional_coverage: f32,
}

impl MetaObservation {
    /// Fold a page of memories into the observation
    pub fn from_memories(memories: &[Memory], now: DateTime<Utc>, emotional_threshold: f32) -> Self {
        if memories.is_empty() {
            return Self::default();
        }
        let n = memories.len() as f32;
        let avg_importance = memories.iter().map(|m| m.importance).sum::<f32>() / n;
        let avg_access_rate = memories
            .iter()
            .map(|m| crate::scoring::normalized_access_rate(m, now))
            .sum::<f32>()
            / n;
        let emotional_coverage = memories
            .iter()
            .filter(|m| m.emotional_weight.abs() >= emotional_threshold)
            .count() as f32
            / n;
        Self {
            avg_importance,
            avg_access_rate,
            emotional_coverage,
        }
    }
}

/// Step size of a single meta-learning adjustment
const ADJUST_STEP: f32 = 0.01;

/// Propose adjusted thresholds from an observation
///
/// Low access rates loosen the cache (more hits from paraphrases); high
/// average importance tightens the semantic floor so the graph stays
/// precise; emotional coverage is steered toward a healthy middle band.
pub fn propose_tunables(observation: &MetaObservation, current: &Tunables) -> Tunables {
    let cache_similarity_threshold = if observation.avg_access_rate < 0.2 {
        current.cache_similarity_threshold - ADJUST_STEP
    } else {
        current.cache_similarity_threshold + ADJUST_STEP
    };

    let semantic_floor = if observation.avg_importance > 0.6 {
        current.semantic_floor + ADJUST_STEP
    } else {
        current.semantic_floor - ADJUST_STEP
    };

    let emotional_threshold = if observation.emotional_coverage > 0.5 {
        current.emotional_threshold + 0.05
    } else if observation.emotional_coverage < 0.1 {
        current.emotional_threshold - 0.05
    } else {
        current.emotional_threshold
    };

    let mut proposed = current.clone();
    proposed.apply(&Tunables {
        cache_similarity_threshold,
        semantic_floor,
        emotional_threshold,
    });
    proposed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use chrono::TimeZone;

    #[test]
    fn bucket_rotates_hourly() {
        let tracker = SessionTracker::new();
        let t1 = Utc.with_ymd_and_hms(2026, 3, 14, 9, 5, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 3, 14, 10, 5, 0).unwrap();
        assert_eq!(tracker.tag_for(t1), "sess-2026031409");
        assert_eq!(tracker.tag_for(t2), "sess-2026031410");
    }

    #[test]
    fn open_session_tags_until_stale() {
        let tracker = SessionTracker::new();
        let opened = Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap();
        let id = tracker.open(Some("debug-sprint".to_string()), opened);
        assert_eq!(id, "debug-sprint");

        let soon = opened + chrono::Duration::minutes(30);
        assert_eq!(tracker.tag_for(soon), "debug-sprint");

        let later = opened + chrono::Duration::hours(2);
        assert_eq!(tracker.tag_for(later), "sess-2026031411");
    }

    #[test]
    fn close_returns_to_buckets() {
        let tracker = SessionTracker::new();
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap();
        tracker.open(Some("s".to_string()), now);
        tracker.close();
        assert!(tracker.tag_for(now).starts_with("sess-"));
    }

    #[test]
    fn proposals_stay_clamped() {
        let current = Tunables::from_config(&MemoryConfig::default());

        // Many rounds of one-sided observations cannot escape the bounds
        let mut tunables = current;
        for _ in 0..100 {
            tunables = propose_tunables(
                &MetaObservation {
                    avg_importance: 0.9,
                    avg_access_rate: 0.9,
                    emotional_coverage: 0.9,
                },
                &tunables,
            );
        }
        assert!(tunables.cache_similarity_threshold <= Tunables::CACHE_SIMILARITY_BOUNDS.1);
        assert!(tunables.semantic_floor <= Tunables::SEMANTIC_FLOOR_BOUNDS.1);
        assert!(tunables.emotional_threshold <= Tunables::EMOTIONAL_BOUNDS.1);

        let mut tunables = Tunables::from_config(&MemoryConfig::default());
        for _ in 0..100 {
            tunables = propose_tunables(&MetaObservation::default(), &tunables);
        }
        assert!(tunables.cache_similarity_threshold >= Tunables::CACHE_SIMILARITY_BOUNDS.0);
        assert!(tunables.semantic_floor >= Tunables::SEMANTIC_FLOOR_BOUNDS.0);
        assert!(tunables.emotional_threshold >= Tunables::EMOTIONAL_BOUNDS.0);
    }
}
