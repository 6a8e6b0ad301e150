//! Configuration for the memory engine
//!
//! All knobs are serde-deserializable with sensible defaults so a config
//! file can specify only what it overrides.

use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};

/// Configuration recognized by the core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Path to the vector store database (":memory:" for tests)
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Path to the graph store database (":memory:" for tests)
    #[serde(default = "default_graph_db_path")]
    pub graph_db_path: String,
    /// Dense embedding dimension; change requires `migrate`
    #[serde(default = "default_dense_dim")]
    pub dense_dim: usize,
    /// Advisory embedding model identifier
    #[serde(default = "default_model_id")]
    pub embedding_model_id: String,
    /// Cache hit aggressiveness (clamped to [0.80, 0.95])
    #[serde(default = "default_cache_similarity")]
    pub cache_similarity_threshold: f32,
    /// Query cache entry lifetime
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
    /// Query cache capacity (LRU beyond this)
    #[serde(default = "default_max_cache_entries")]
    pub max_cache_entries: usize,
    /// Cross-encoder reranking toggle
    #[serde(default = "default_true")]
    pub reranking_enabled: bool,
    /// Reranker inference budget; past it, fusion order is kept
    #[serde(default = "default_rerank_budget")]
    pub rerank_budget_ms: u64,
    /// Route exact-token queries to sparse-only retrieval
    #[serde(default = "default_true")]
    pub use_query_understanding: bool,
    /// Master switch for background jobs
    #[serde(default = "default_true")]
    pub scheduler_enabled: bool,
    /// Per-job intervals in seconds
    #[serde(default)]
    pub job_intervals: JobIntervals,
    /// Co-access promotions after this many shared top-5 appearances
    #[serde(default = "default_co_access_threshold")]
    pub co_access_threshold: u32,
    /// Similarity floor for generic semantic edges
    #[serde(default = "default_semantic_floor")]
    pub semantic_floor: f32,
    /// Similarity floor for FIXES / SIMILAR_TO edges
    #[serde(default = "default_fixes_floor")]
    pub fixes_floor: f32,
    /// Minimum |emotional_weight| before importance is adjusted
    #[serde(default = "default_emotional_threshold")]
    pub emotional_threshold: f32,
    /// Run without the graph store when false
    #[serde(default = "default_true")]
    pub graph_enabled: bool,
    /// Default score cutoff for search results
    #[serde(default = "default_min_score")]
    pub min_score: f32,
    /// Candidate multiplier when reranking
    #[serde(default = "default_overfetch")]
    pub overfetch: usize,
    /// Low-utility memories older than this are archived
    #[serde(default = "default_retention_window")]
    pub retention_window_days: i64,
    /// Unpinned unresolved memories below this strength are forgotten
    #[serde(default = "default_strength_epsilon")]
    pub strength_epsilon: f32,
    /// Same-type similarity at which near-duplicates are consolidated
    #[serde(default = "default_consolidation_similarity")]
    pub consolidation_similarity: f32,
    /// SQLite busy timeout for store queries
    #[serde(default = "default_store_timeout")]
    pub store_timeout_ms: u64,
}

fn default_db_path() -> String {
    "mnemos.db".to_string()
}

fn default_graph_db_path() -> String {
    "mnemos-graph.db".to_string()
}

fn default_dense_dim() -> usize {
    384
}

fn default_model_id() -> String {
    "hashed-tf-v1".to_string()
}

fn default_cache_similarity() -> f32 {
    0.87
}

fn default_cache_ttl() -> u64 {
    24 * 60 * 60
}

fn default_max_cache_entries() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

fn default_rerank_budget() -> u64 {
    500
}

fn default_co_access_threshold() -> u32 {
    5
}

fn default_semantic_floor() -> f32 {
    0.75
}

fn default_fixes_floor() -> f32 {
    0.85
}

fn default_emotional_threshold() -> f32 {
    0.3
}

fn default_min_score() -> f32 {
    0.3
}

fn default_overfetch() -> usize {
    3
}

fn default_retention_window() -> i64 {
    30
}

fn default_strength_epsilon() -> f32 {
    0.05
}

fn default_consolidation_similarity() -> f32 {
    0.95
}

fn default_store_timeout() -> u64 {
    5000
}

impl Default for MemoryConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default config deserializes")
    }
}

impl MemoryConfig {
    /// In-memory stores, suitable for tests
    pub fn in_memory() -> Self {
        Self {
            db_path: ":memory:".to_string(),
            graph_db_path: ":memory:".to_string(),
            ..Default::default()
        }
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.dense_dim == 0 {
            return Err(MemoryError::Config("dense_dim must be positive".into()));
        }
        if !(0.5..=1.0).contains(&self.cache_similarity_threshold) {
            return Err(MemoryError::Config(format!(
                "cache_similarity_threshold out of range: {}",
                self.cache_similarity_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.semantic_floor) || !(0.0..=1.0).contains(&self.fixes_floor) {
            return Err(MemoryError::Config("similarity floors must be in [0, 1]".into()));
        }
        if self.overfetch == 0 {
            return Err(MemoryError::Config("overfetch must be at least 1".into()));
        }
        Ok(())
    }
}

/// Per-job scheduler intervals in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobIntervals {
    #[serde(default = "default_daily")]
    pub relationship_inference: u64,
    #[serde(default = "default_daily")]
    pub adaptive_importance: u64,
    #[serde(default = "default_daily")]
    pub utility_archival: u64,
    #[serde(default = "default_daily")]
    pub consolidation: u64,
    #[serde(default = "default_six_hours")]
    pub spaced_repetition: u64,
    #[serde(default = "default_twelve_hours")]
    pub memory_replay: u64,
    #[serde(default = "default_daily")]
    pub emotional_analysis: u64,
    #[serde(default = "default_weekly")]
    pub interference_detection: u64,
    #[serde(default = "default_weekly")]
    pub meta_learning: u64,
}

fn default_daily() -> u64 {
    24 * 60 * 60
}

fn default_six_hours() -> u64 {
    6 * 60 * 60
}

fn default_twelve_hours() -> u64 {
    12 * 60 * 60
}

fn default_weekly() -> u64 {
    7 * 24 * 60 * 60
}

impl Default for JobIntervals {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default intervals deserialize")
    }
}

/// Thresholds the meta-learning job is allowed to move, with clamp bounds
///
/// Kept separate from [`MemoryConfig`] so runtime adjustment does not race
/// with readers of the static configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tunables {
    pub cache_similarity_threshold: f32,
    pub semantic_floor: f32,
    pub emotional_threshold: f32,
}

impl Tunables {
    pub const CACHE_SIMILARITY_BOUNDS: (f32, f32) = (0.80, 0.95);
    pub const SEMANTIC_FLOOR_BOUNDS: (f32, f32) = (0.65, 0.90);
    pub const EMOTIONAL_BOUNDS: (f32, f32) = (0.15, 0.60);

    pub fn from_config(config: &MemoryConfig) -> Self {
        Self {
            cache_similarity_threshold: config
                .cache_similarity_threshold
                .clamp(Self::CACHE_SIMILARITY_BOUNDS.0, Self::CACHE_SIMILARITY_BOUNDS.1),
            semantic_floor: config
                .semantic_floor
                .clamp(Self::SEMANTIC_FLOOR_BOUNDS.0, Self::SEMANTIC_FLOOR_BOUNDS.1),
            emotional_threshold: config
                .emotional_threshold
                .clamp(Self::EMOTIONAL_BOUNDS.0, Self::EMOTIONAL_BOUNDS.1),
        }
    }

    /// Apply a proposed adjustment, clamping each threshold to its bounds
    pub fn apply(&mut self, proposal: &Tunables) {
        self.cache_similarity_threshold = proposal
            .cache_similarity_threshold
            .clamp(Self::CACHE_SIMILARITY_BOUNDS.0, Self::CACHE_SIMILARITY_BOUNDS.1);
        self.semantic_floor = proposal
            .semantic_floor
            .clamp(Self::SEMANTIC_FLOOR_BOUNDS.0, Self::SEMANTIC_FLOOR_BOUNDS.1);
        self.emotional_threshold = proposal
            .emotional_threshold
            .clamp(Self::EMOTIONAL_BOUNDS.0, Self::EMOTIONAL_BOUNDS.1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = MemoryConfig::default();
        config.validate().unwrap();
        assert_eq!(config.dense_dim, 384);
        assert_eq!(config.cache_similarity_threshold, 0.87);
        assert_eq!(config.job_intervals.spaced_repetition, 6 * 60 * 60);
        assert_eq!(config.job_intervals.interference_detection, 7 * 24 * 60 * 60);
    }

    #[test]
    fn partial_config_deserializes() {
        let config: MemoryConfig =
            serde_json::from_str(r#"{"dense_dim": 768, "graph_enabled": false}"#).unwrap();
        assert_eq!(config.dense_dim, 768);
        assert!(!config.graph_enabled);
        assert!(config.reranking_enabled);
    }

    #[test]
    fn tunables_clamp_to_bounds() {
        let mut tunables = Tunables::from_config(&MemoryConfig::default());
        tunables.apply(&Tunables {
            cache_similarity_threshold: 0.5,
            semantic_floor: 0.99,
            emotional_threshold: 0.0,
        });
        assert_eq!(tunables.cache_similarity_threshold, 0.80);
        assert_eq!(tunables.semantic_floor, 0.90);
        assert_eq!(tunables.emotional_threshold, 0.15);
    }

    #[test]
    fn invalid_config_rejected() {
        let config = MemoryConfig {
            dense_dim: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
