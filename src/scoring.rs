//! Scoring and decay
//!
//! Importance, recency, utility, reinforcement, the forgetting curve, and
//! the emotional-weight lexicon scan. All functions are pure; callers pass
//! `now` so scheduled jobs and tests control the clock.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::embedding::sparse::tokenize;
use crate::types::{clamp01, clamp_signed, Memory, MemoryState, MemoryType};

/// Recency decay rate per hour since last access
const RECENCY_LAMBDA: f32 = 0.005;
/// Utility mix weights: importance / access rate / recency
const UTILITY_WEIGHTS: (f32, f32, f32) = (0.4, 0.35, 0.25);
/// Reinforcement applies when the access interval is shorter than this
const REINFORCEMENT_WINDOW_HOURS: i64 = 24;
/// Reinforcement applies past this access count
const REINFORCEMENT_MIN_ACCESSES: i64 = 5;

/// Base importance per memory type
pub fn importance_base(memory_type: MemoryType) -> f32 {
    match memory_type {
        MemoryType::Error => 0.8,
        MemoryType::Decision => 0.9,
        MemoryType::Pattern => 0.7,
        MemoryType::Docs => 0.5,
        MemoryType::Learning => 0.6,
        MemoryType::Context => 0.3,
    }
}

/// Forgetting-curve decay rate per day, tuned per type
///
/// Context decays fastest, decisions slowest; the ordering mirrors the base
/// importance table.
pub fn decay_lambda(memory_type: MemoryType) -> f32 {
    match memory_type {
        MemoryType::Error => 0.015,
        MemoryType::Decision => 0.008,
        MemoryType::Pattern => 0.010,
        MemoryType::Docs => 0.020,
        MemoryType::Learning => 0.012,
        MemoryType::Context => 0.030,
    }
}

/// Exponential recency score in (0, 1]
pub fn recency(now: DateTime<Utc>, last_accessed: Option<DateTime<Utc>>) -> f32 {
    let Some(last) = last_accessed else {
        return 0.0;
    };
    let hours = (now - last).num_minutes().max(0) as f32 / 60.0;
    (-RECENCY_LAMBDA * hours).exp()
}

/// Access rate normalized into [0, 1)
pub fn normalized_access_rate(memory: &Memory, now: DateTime<Utc>) -> f32 {
    let days = ((now - memory.created_at).num_hours().max(1) as f32) / 24.0;
    let rate = memory.access_count as f32 / days;
    rate / (rate + 1.0)
}

/// Composite utility driving archival decisions
pub fn utility(memory: &Memory, now: DateTime<Utc>) -> f32 {
    let (wi, wa, wr) = UTILITY_WEIGHTS;
    wi * memory.importance
        + wa * normalized_access_rate(memory, now)
        + wr * recency(now, memory.last_accessed)
}

/// Utility buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtilityBucket {
    High,
    Medium,
    Low,
}

pub fn utility_bucket(memory: &Memory, now: DateTime<Utc>) -> UtilityBucket {
    let u = utility(memory, now);
    if u >= 0.6 {
        UtilityBucket::High
    } else if u >= 0.3 {
        UtilityBucket::Medium
    } else {
        UtilityBucket::Low
    }
}

/// New importance after an access, when the reinforcement gate opens
///
/// `memory` reflects the state before the access being processed;
/// `previous_access` is the access before that one.
pub fn reinforce_on_access(
    memory: &Memory,
    previous_access: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<f32> {
    let prev = previous_access?;
    if (now - prev).num_hours() >= REINFORCEMENT_WINDOW_HOURS {
        return None;
    }
    if memory.access_count <= REINFORCEMENT_MIN_ACCESSES {
        return None;
    }
    let boost = (0.02 * memory.access_count as f32).min(0.1);
    Some(clamp01(memory.importance + boost))
}

/// Forgetting curve: returns the decayed strength, or None when exempt
///
/// Pinned, resolved, and archived memories do not decay.
pub fn apply_forgetting(memory: &Memory, now: DateTime<Utc>) -> Option<f32> {
    if memory.pinned || memory.resolved || memory.state == MemoryState::Archived {
        return None;
    }
    let reference = memory.last_accessed.unwrap_or(memory.created_at);
    let days = (now - reference).num_hours().max(0) as f32 / 24.0;
    let lambda = decay_lambda(memory.memory_type);
    Some(clamp01(memory.strength * (-lambda * days).exp()))
}

/// Importance recomputed from access statistics (adaptive_importance job)
pub fn adaptive_importance(memory: &Memory, now: DateTime<Utc>) -> f32 {
    clamp01(
        0.5 * importance_base(memory.memory_type)
            + 0.3 * normalized_access_rate(memory, now)
            + 0.2 * recency(now, memory.last_accessed),
    )
}

static POSITIVE_WORDS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "success", "succeeded", "resolved", "fixed", "works", "working", "solved", "improved",
        "faster", "stable", "reliable", "clean", "elegant", "simplified", "recovered", "passing",
        "correct", "optimal", "great", "perfect",
    ]
});

static NEGATIVE_WORDS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "failed", "failure", "error", "crash", "crashed", "timeout", "broken", "bug", "critical",
        "regression", "corrupt", "corrupted", "leak", "deadlock", "outage", "panic", "fatal",
        "exhausted", "degraded", "flaky", "stuck", "hang", "unstable", "severe",
    ]
});

static INTENSITY_MODIFIERS: Lazy<HashMap<&'static str, f32>> = Lazy::new(|| {
    HashMap::from([
        ("very", 1.5),
        ("extremely", 2.0),
        ("severely", 2.0),
        ("completely", 1.8),
        ("totally", 1.8),
        ("highly", 1.5),
        ("slightly", 0.5),
        ("somewhat", 0.6),
        ("barely", 0.4),
    ])
});

/// Lexicon-based sentiment in [-1, 1]
pub fn emotional_weight(content: &str) -> f32 {
    let tokens = tokenize(content);
    let mut score = 0.0f32;
    let mut modifier = 1.0f32;

    for token in &tokens {
        if let Some(&m) = INTENSITY_MODIFIERS.get(token.as_str()) {
            modifier = m;
            continue;
        }
        if POSITIVE_WORDS.contains(&token.as_str()) {
            score += modifier;
        } else if NEGATIVE_WORDS.contains(&token.as_str()) {
            score -= modifier;
        }
        modifier = 1.0;
    }

    // Saturate: a handful of charged words maxes the scale
    clamp_signed(score / 4.0)
}

/// Importance delta for a type-compatible emotional weight, in [-0.2, 0.2]
///
/// Strongly negative errors and decisions become more important (they were
/// costly); strongly positive learnings and patterns become more important
/// (they paid off); charged context is demoted as noise.
pub fn emotional_importance_delta(
    memory_type: MemoryType,
    weight: f32,
    threshold: f32,
) -> f32 {
    if weight.abs() < threshold {
        return 0.0;
    }
    match memory_type {
        MemoryType::Error | MemoryType::Decision if weight < 0.0 => 0.2 * weight.abs(),
        MemoryType::Learning | MemoryType::Pattern if weight > 0.0 => 0.2 * weight,
        MemoryType::Context => -0.2 * weight.abs(),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn make_memory(memory_type: MemoryType) -> Memory {
        Memory {
            id: "m".to_string(),
            memory_type,
            content: "scoring test subject".to_string(),
            tags: vec![],
            project: None,
            source: None,
            error_message: None,
            solution: None,
            prevention: None,
            rationale: None,
            alternatives: vec![],
            session: None,
            created_at: Utc::now(),
            last_accessed: None,
            access_count: 0,
            importance: 0.5,
            strength: 1.0,
            quality_score: 0.5,
            emotional_weight: 0.0,
            resolved: false,
            pinned: false,
            superseded: false,
            state: MemoryState::Episodic,
            content_hash: None,
        }
    }

    #[test]
    fn base_importance_table() {
        assert_eq!(importance_base(MemoryType::Decision), 0.9);
        assert_eq!(importance_base(MemoryType::Error), 0.8);
        assert_eq!(importance_base(MemoryType::Context), 0.3);
    }

    #[test]
    fn recency_decays() {
        let now = Utc::now();
        let fresh = recency(now, Some(now));
        let stale = recency(now, Some(now - Duration::hours(200)));
        assert!(fresh > 0.99);
        assert!(stale < fresh);
        assert_eq!(recency(now, None), 0.0);
    }

    #[test]
    fn utility_buckets() {
        let now = Utc::now();
        let mut m = make_memory(MemoryType::Decision);
        m.importance = 0.9;
        m.last_accessed = Some(now);
        m.access_count = 50;
        m.created_at = now - Duration::days(1);
        assert_eq!(utility_bucket(&m, now), UtilityBucket::High);

        let mut m = make_memory(MemoryType::Context);
        m.importance = 0.2;
        m.created_at = now - Duration::days(60);
        assert_eq!(utility_bucket(&m, now), UtilityBucket::Low);
    }

    #[test]
    fn reinforcement_gate() {
        let now = Utc::now();
        let mut m = make_memory(MemoryType::Learning);
        m.importance = 0.6;
        m.access_count = 10;

        // Rapid re-access past the count gate reinforces
        let boosted = reinforce_on_access(&m, Some(now - Duration::hours(2)), now).unwrap();
        assert!((boosted - 0.7).abs() < 1e-5); // min(0.1, 0.02 * 10) = 0.1

        // Slow re-access does not
        assert_eq!(
            reinforce_on_access(&m, Some(now - Duration::hours(48)), now),
            None
        );

        // Low access count does not
        m.access_count = 3;
        assert_eq!(
            reinforce_on_access(&m, Some(now - Duration::hours(2)), now),
            None
        );
    }

    #[test]
    fn reinforcement_clamps_at_one() {
        let now = Utc::now();
        let mut m = make_memory(MemoryType::Learning);
        m.importance = 0.97;
        m.access_count = 50;
        let boosted = reinforce_on_access(&m, Some(now - Duration::hours(1)), now).unwrap();
        assert_eq!(boosted, 1.0);
    }

    #[test]
    fn forgetting_exemptions() {
        let now = Utc::now();
        let mut m = make_memory(MemoryType::Context);
        m.created_at = now - Duration::days(30);

        let decayed = apply_forgetting(&m, now).unwrap();
        assert!(decayed < 1.0);

        m.pinned = true;
        assert!(apply_forgetting(&m, now).is_none());
        m.pinned = false;
        m.resolved = true;
        assert!(apply_forgetting(&m, now).is_none());
        m.resolved = false;
        m.state = MemoryState::Archived;
        assert!(apply_forgetting(&m, now).is_none());
    }

    #[test]
    fn context_decays_faster_than_decision() {
        let now = Utc::now();
        let mut context = make_memory(MemoryType::Context);
        context.created_at = now - Duration::days(30);
        let mut decision = make_memory(MemoryType::Decision);
        decision.created_at = now - Duration::days(30);

        assert!(apply_forgetting(&context, now).unwrap() < apply_forgetting(&decision, now).unwrap());
    }

    #[test]
    fn emotional_weight_direction() {
        let negative =
            emotional_weight("the deploy failed with a critical error and a severe outage");
        let positive = emotional_weight("the fix resolved everything, tests passing and stable");
        let neutral = emotional_weight("updated the configuration file for the service");
        assert!(negative < -0.3);
        assert!(positive > 0.3);
        assert!(neutral.abs() < 0.1);
    }

    #[test]
    fn intensity_modifiers_amplify() {
        let plain = emotional_weight("the request failed");
        let intense = emotional_weight("the request extremely failed");
        assert!(intense < plain);
    }

    #[test]
    fn emotional_delta_type_compatibility() {
        // Costly error becomes more important
        assert!(emotional_importance_delta(MemoryType::Error, -0.8, 0.3) > 0.0);
        // Paying-off learning becomes more important
        assert!(emotional_importance_delta(MemoryType::Learning, 0.8, 0.3) > 0.0);
        // Charged context is demoted
        assert!(emotional_importance_delta(MemoryType::Context, 0.8, 0.3) < 0.0);
        // Below threshold nothing happens
        assert_eq!(emotional_importance_delta(MemoryType::Error, -0.1, 0.3), 0.0);
        // Docs are neutral
        assert_eq!(emotional_importance_delta(MemoryType::Docs, -0.9, 0.3), 0.0);
    }
}
