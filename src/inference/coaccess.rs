//! Co-access tracking
//!
//! Counts unordered pairs among the top results of every search. When a
//! pair's count reaches the threshold it is promoted (the caller creates a
//! CO_ACTIVATED edge) and its counter resets. The tracker is process-local
//! and deliberately lost on restart.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::types::MemoryId;

/// How many of a search's top results participate in co-access tracking
pub const TOP_K: usize = 5;

/// Process-local pair counter under a single lock
pub struct CoAccessTracker {
    counts: Mutex<HashMap<(MemoryId, MemoryId), u32>>,
    threshold: u32,
}

impl CoAccessTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
            threshold: threshold.max(1),
        }
    }

    /// Record one search's top results; returns pairs that crossed the
    /// threshold (their counters reset)
    pub fn track(&self, result_ids: &[MemoryId]) -> Vec<(MemoryId, MemoryId)> {
        let top = &result_ids[..result_ids.len().min(TOP_K)];
        let mut promoted = Vec::new();
        let mut counts = self.counts.lock();

        for i in 0..top.len() {
            for j in (i + 1)..top.len() {
                let pair = ordered_pair(&top[i], &top[j]);
                let count = counts.entry(pair.clone()).or_insert(0);
                *count += 1;
                if *count >= self.threshold {
                    counts.remove(&pair);
                    promoted.push(pair);
                }
            }
        }
        promoted
    }

    /// Drop a memory's counters (called on forget)
    pub fn forget(&self, id: &str) {
        self.counts.lock().retain(|(a, b), _| a != id && b != id);
    }

    pub fn reset(&self) {
        self.counts.lock().clear();
    }

    pub fn tracked_pairs(&self) -> usize {
        self.counts.lock().len()
    }
}

fn ordered_pair(a: &str, b: &str) -> (MemoryId, MemoryId) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<MemoryId> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn promotes_at_threshold_and_resets() {
        let tracker = CoAccessTracker::new(5);
        for _ in 0..4 {
            assert!(tracker.track(&ids(&["a", "b"])).is_empty());
        }
        let promoted = tracker.track(&ids(&["a", "b"]));
        assert_eq!(promoted, vec![("a".to_string(), "b".to_string())]);

        // Counter was reset, next track starts from one again
        assert!(tracker.track(&ids(&["a", "b"])).is_empty());
    }

    #[test]
    fn pair_order_does_not_matter() {
        let tracker = CoAccessTracker::new(2);
        tracker.track(&ids(&["b", "a"]));
        let promoted = tracker.track(&ids(&["a", "b"]));
        assert_eq!(promoted.len(), 1);
    }

    #[test]
    fn only_top_five_participate() {
        let tracker = CoAccessTracker::new(1);
        let promoted = tracker.track(&ids(&["a", "b", "c", "d", "e", "f"]));
        // f is rank 6 and never pairs
        assert!(promoted
            .iter()
            .all(|(x, y)| x != "f" && y != "f"));
        // 5 choose 2 pairs promoted at threshold 1
        assert_eq!(promoted.len(), 10);
    }

    #[test]
    fn forget_drops_counters() {
        let tracker = CoAccessTracker::new(5);
        tracker.track(&ids(&["a", "b"]));
        tracker.forget("a");
        assert_eq!(tracker.tracked_pairs(), 0);
    }
}
