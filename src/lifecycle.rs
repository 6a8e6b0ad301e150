//! Lifecycle state machine
//!
//! ```text
//!   draft ──first retrieval──► episodic
//!   episodic ──access_count ≥ 5 or importance ≥ 0.7──► semantic
//!   any ──low utility for longer than the retention window──► archived
//!   archived ──explicit restore──► episodic
//! ```
//!
//! Transitions are append-only into a per-memory state-history log kept by
//! the vector store. They are applied after a read's results have been
//! materialized, so the payload a caller sees never changes state mid-read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scoring::{self, UtilityBucket};
use crate::types::{Memory, MemoryState};

/// Access count at which an episodic memory generalizes
pub const SEMANTIC_ACCESS_THRESHOLD: i64 = 5;
/// Importance at which an episodic memory generalizes
pub const SEMANTIC_IMPORTANCE_THRESHOLD: f32 = 0.7;

/// One entry of the append-only state-history log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: MemoryState,
    pub to: MemoryState,
    pub changed_at: DateTime<Utc>,
}

/// Next state after a retrieval, if any
///
/// `memory.access_count` is expected to already include the access being
/// processed.
pub fn transition_on_access(memory: &Memory) -> Option<MemoryState> {
    match memory.state {
        MemoryState::Draft => Some(MemoryState::Episodic),
        MemoryState::Episodic
            if memory.access_count >= SEMANTIC_ACCESS_THRESHOLD
                || memory.importance >= SEMANTIC_IMPORTANCE_THRESHOLD =>
        {
            Some(MemoryState::Semantic)
        }
        _ => None,
    }
}

/// Whether the archival job should archive this memory
pub fn archival_due(memory: &Memory, now: DateTime<Utc>, retention_window_days: i64) -> bool {
    if memory.pinned || memory.state == MemoryState::Archived {
        return false;
    }
    if scoring::utility_bucket(memory, now) != UtilityBucket::Low {
        return false;
    }
    let reference = memory.last_accessed.unwrap_or(memory.created_at);
    (now - reference).num_days() > retention_window_days
}

/// Whether decay has forgotten this memory entirely
///
/// Only unpinned, non-archived, unresolved memories older than the horizon
/// are ever deleted; everything else is at most archived.
pub fn forget_due(
    memory: &Memory,
    now: DateTime<Utc>,
    strength_epsilon: f32,
    retention_window_days: i64,
) -> bool {
    if memory.pinned || memory.resolved || memory.state == MemoryState::Archived {
        return false;
    }
    if memory.strength >= strength_epsilon {
        return false;
    }
    (now - memory.created_at).num_days() > retention_window_days
}

/// Target state for an explicit restore
pub fn restore_target() -> MemoryState {
    MemoryState::Episodic
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemoryType;
    use chrono::Duration;

    fn make_memory(state: MemoryState) -> Memory {
        Memory {
            id: "m".to_string(),
            memory_type: MemoryType::Context,
            content: "lifecycle test subject".to_string(),
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
            importance: 0.3,
            strength: 1.0,
            quality_score: 0.5,
            emotional_weight: 0.0,
            resolved: false,
            pinned: false,
            superseded: false,
            state,
            content_hash: None,
        }
    }

    #[test]
    fn draft_promotes_on_first_access() {
        let mut m = make_memory(MemoryState::Draft);
        m.access_count = 1;
        assert_eq!(transition_on_access(&m), Some(MemoryState::Episodic));
    }

    #[test]
    fn episodic_promotes_on_sustained_access() {
        let mut m = make_memory(MemoryState::Episodic);
        m.access_count = SEMANTIC_ACCESS_THRESHOLD;
        assert_eq!(transition_on_access(&m), Some(MemoryState::Semantic));

        let mut m = make_memory(MemoryState::Episodic);
        m.access_count = 2;
        m.importance = 0.8;
        assert_eq!(transition_on_access(&m), Some(MemoryState::Semantic));

        let mut m = make_memory(MemoryState::Episodic);
        m.access_count = 2;
        assert_eq!(transition_on_access(&m), None);
    }

    #[test]
    fn semantic_is_stable_on_access() {
        let mut m = make_memory(MemoryState::Semantic);
        m.access_count = 100;
        assert_eq!(transition_on_access(&m), None);
    }

    #[test]
    fn pinned_never_archived() {
        let mut m = make_memory(MemoryState::Episodic);
        m.pinned = true;
        m.created_at = Utc::now() - Duration::days(365);
        assert!(!archival_due(&m, Utc::now(), 30));
    }

    #[test]
    fn stale_low_utility_archived() {
        let mut m = make_memory(MemoryState::Episodic);
        m.created_at = Utc::now() - Duration::days(90);
        m.importance = 0.2;
        assert!(archival_due(&m, Utc::now(), 30));
    }

    #[test]
    fn recent_memory_not_archived() {
        let mut m = make_memory(MemoryState::Episodic);
        m.created_at = Utc::now() - Duration::days(2);
        m.importance = 0.2;
        assert!(!archival_due(&m, Utc::now(), 30));
    }

    #[test]
    fn forget_requires_all_conditions() {
        let now = Utc::now();
        let mut m = make_memory(MemoryState::Episodic);
        m.strength = 0.01;
        m.created_at = now - Duration::days(90);
        assert!(forget_due(&m, now, 0.05, 30));

        m.pinned = true;
        assert!(!forget_due(&m, now, 0.05, 30));
        m.pinned = false;
        m.resolved = true;
        assert!(!forget_due(&m, now, 0.05, 30));
        m.resolved = false;
        m.strength = 0.5;
        assert!(!forget_due(&m, now, 0.05, 30));
    }
}
