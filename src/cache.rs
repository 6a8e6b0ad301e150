//! Query cache
//!
//! Semantic cache keyed by the query's dense embedding: a lookup hits when
//! the cosine similarity to a stored key reaches the configured threshold,
//! the filter signature matches exactly, and the entry is younger than the
//! TTL. The cache is advisory; a miss is only slower, never wrong. Hits do
//! not touch the underlying memories.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::embedding::cosine_similarity;
use crate::types::{CacheStatsSnapshot, SearchResult};

/// A cached result set
struct CachedQuery {
    dense: Vec<f32>,
    filter_signature: String,
    results: Vec<SearchResult>,
    created_at: Instant,
    last_used: Mutex<Instant>,
}

impl CachedQuery {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }
}

/// Embedding-similarity-keyed cache of recent result sets
pub struct QueryCache {
    entries: DashMap<u64, Arc<CachedQuery>>,
    next_key: AtomicU64,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl QueryCache {
    pub fn new(ttl_seconds: u64, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            next_key: AtomicU64::new(0),
            ttl: Duration::from_secs(ttl_seconds),
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up by embedding similarity and exact filter signature
    pub fn lookup(
        &self,
        dense: &[f32],
        filter_signature: &str,
        similarity_threshold: f32,
    ) -> Option<Vec<SearchResult>> {
        let mut expired: Vec<u64> = Vec::new();
        let mut hit: Option<Vec<SearchResult>> = None;

        for entry in self.entries.iter() {
            if entry.is_expired(self.ttl) {
                expired.push(*entry.key());
                continue;
            }
            if entry.filter_signature != filter_signature {
                continue;
            }
            if cosine_similarity(dense, &entry.dense) >= similarity_threshold {
                *entry.last_used.lock() = Instant::now();
                hit = Some(entry.results.clone());
                break;
            }
        }

        for key in expired {
            self.entries.remove(&key);
        }

        match hit {
            Some(results) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(results)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a result set, evicting the least-recently-used entry at capacity
    pub fn insert(&self, dense: Vec<f32>, filter_signature: String, results: Vec<SearchResult>) {
        if self.max_entries == 0 {
            return;
        }
        while self.entries.len() >= self.max_entries {
            self.evict_lru();
        }
        let now = Instant::now();
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            key,
            Arc::new(CachedQuery {
                dense,
                filter_signature,
                results,
                created_at: now,
                last_used: Mutex::new(now),
            }),
        );
    }

    fn evict_lru(&self) {
        let mut lru_key: Option<u64> = None;
        let mut lru_time = Instant::now();

        for entry in self.entries.iter() {
            let used = *entry.last_used.lock();
            if lru_key.is_none() || used < lru_time {
                lru_time = used;
                lru_key = Some(*entry.key());
            }
        }

        if let Some(key) = lru_key {
            self.entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drop expired entries (called opportunistically by the scheduler)
    pub fn remove_expired(&self) {
        self.entries.retain(|_, v| !v.is_expired(self.ttl));
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStatsSnapshot {
            entries: self.entries.len(),
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Memory, MemoryState, MemoryType};
    use chrono::Utc;

    fn make_result(id: &str) -> SearchResult {
        SearchResult {
            memory: Memory {
                id: id.to_string(),
                memory_type: MemoryType::Context,
                content: "cached content".to_string(),
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
                state: MemoryState::Draft,
                content_hash: None,
            },
            score: 0.9,
        }
    }

    #[test]
    fn hit_on_similar_embedding() {
        let cache = QueryCache::new(3600, 100);
        cache.insert(vec![1.0, 0.0, 0.0], "{}".into(), vec![make_result("a")]);

        // Identical key hits
        assert!(cache.lookup(&[1.0, 0.0, 0.0], "{}", 0.87).is_some());
        // Near-identical key hits
        assert!(cache.lookup(&[0.99, 0.05, 0.0], "{}", 0.87).is_some());
        // Orthogonal key misses
        assert!(cache.lookup(&[0.0, 1.0, 0.0], "{}", 0.87).is_none());
    }

    #[test]
    fn filter_signature_must_match_exactly() {
        let cache = QueryCache::new(3600, 100);
        cache.insert(
            vec![1.0, 0.0],
            r#"{"project":"api"}"#.into(),
            vec![make_result("a")],
        );

        assert!(cache
            .lookup(&[1.0, 0.0], r#"{"project":"api"}"#, 0.87)
            .is_some());
        assert!(cache
            .lookup(&[1.0, 0.0], r#"{"project":"web"}"#, 0.87)
            .is_none());
    }

    #[test]
    fn ttl_expiry() {
        let cache = QueryCache::new(0, 100);
        cache.insert(vec![1.0, 0.0], "{}".into(), vec![make_result("a")]);
        std::thread::sleep(Duration::from_millis(10));
        assert!(cache.lookup(&[1.0, 0.0], "{}", 0.87).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn lru_eviction_at_capacity() {
        let cache = QueryCache::new(3600, 2);
        cache.insert(vec![1.0, 0.0], "a".into(), vec![make_result("a")]);
        cache.insert(vec![0.0, 1.0], "b".into(), vec![make_result("b")]);

        // Refresh "a" so "b" becomes the LRU entry
        cache.lookup(&[1.0, 0.0], "a", 0.87);
        cache.insert(vec![0.5, 0.5], "c".into(), vec![make_result("c")]);

        assert_eq!(cache.len(), 2);
        assert!(cache.lookup(&[1.0, 0.0], "a", 0.87).is_some());
        assert!(cache.lookup(&[0.0, 1.0], "b", 0.87).is_none());
        assert_eq!(cache.snapshot().evictions, 1);
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let cache = QueryCache::new(3600, 100);
        cache.lookup(&[1.0], "{}", 0.87);
        cache.insert(vec![1.0], "{}".into(), vec![make_result("a")]);
        cache.lookup(&[1.0], "{}", 0.87);

        let stats = cache.snapshot();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn clear_empties_the_cache() {
        let cache = QueryCache::new(3600, 100);
        cache.insert(vec![1.0], "{}".into(), vec![make_result("a")]);
        cache.clear();
        assert!(cache.is_empty());
    }
}
