//! Core types for Mnemos

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique identifier for a memory (UUID v4, opaque to callers)
pub type MemoryId = String;

/// A memory entry in the collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Unique identifier
    pub id: MemoryId,
    /// Memory type classification
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    /// Main content of the memory
    pub content: String,
    /// Tags for categorization (order irrelevant)
    #[serde(default)]
    pub tags: Vec<String>,
    /// Optional grouping key (project name)
    pub project: Option<String>,
    /// Optional provenance (URL, file path)
    pub source: Option<String>,
    /// Required for `error` memories
    pub error_message: Option<String>,
    /// How the error was fixed (error memories)
    pub solution: Option<String>,
    /// How to avoid the error (error memories)
    pub prevention: Option<String>,
    /// Required for `decision` memories
    pub rationale: Option<String>,
    /// Alternatives considered (decision memories)
    #[serde(default)]
    pub alternatives: Vec<String>,
    /// Session tag assigned at ingest time
    pub session: Option<String>,
    /// When the memory was created (immutable)
    pub created_at: DateTime<Utc>,
    /// When the memory was last returned from a search or get
    pub last_accessed: Option<DateTime<Utc>>,
    /// Number of times accessed (monotonically non-decreasing)
    #[serde(default)]
    pub access_count: i64,
    /// Importance score in [0, 1]
    #[serde(default = "default_importance")]
    pub importance: f32,
    /// Reinforcement-curve state in [0, 1]
    #[serde(default = "default_strength")]
    pub strength: f32,
    /// User- or heuristic-derived quality in [0, 1]
    #[serde(default = "default_quality")]
    pub quality_score: f32,
    /// Sentiment-derived weight in [-1, 1]
    #[serde(default)]
    pub emotional_weight: f32,
    /// Whether an error memory has a known fix
    #[serde(default)]
    pub resolved: bool,
    /// Pinned memories are exempt from decay and archival
    #[serde(default)]
    pub pinned: bool,
    /// Set when a SUPERSEDES edge targets this memory; demoted from default search
    #[serde(default)]
    pub superseded: bool,
    /// Lifecycle state
    #[serde(default)]
    pub state: MemoryState,
    /// SHA-256 of whitespace-normalized content (for duplicate detection)
    pub content_hash: Option<String>,
}

fn default_importance() -> f32 {
    0.5
}

fn default_strength() -> f32 {
    1.0
}

fn default_quality() -> f32 {
    0.5
}

/// Memory type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    /// A failure with a message and ideally a fix
    Error,
    /// A choice with rationale and alternatives
    Decision,
    /// A reusable implementation or design pattern
    Pattern,
    /// A documentation snippet (requires provenance)
    Docs,
    /// Something figured out along the way
    Learning,
    /// Ambient project or conversation context
    #[default]
    Context,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Error => "error",
            MemoryType::Decision => "decision",
            MemoryType::Pattern => "pattern",
            MemoryType::Docs => "docs",
            MemoryType::Learning => "learning",
            MemoryType::Context => "context",
        }
    }

    pub fn all() -> &'static [MemoryType] {
        &[
            MemoryType::Error,
            MemoryType::Decision,
            MemoryType::Pattern,
            MemoryType::Docs,
            MemoryType::Learning,
            MemoryType::Context,
        ]
    }
}

impl std::str::FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(MemoryType::Error),
            "decision" => Ok(MemoryType::Decision),
            "pattern" => Ok(MemoryType::Pattern),
            "docs" => Ok(MemoryType::Docs),
            "learning" => Ok(MemoryType::Learning),
            "context" => Ok(MemoryType::Context),
            _ => Err(format!("Unknown memory type: {}", s)),
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a memory
///
/// Transitions: draft → episodic on first retrieval; episodic → semantic on
/// sustained access or high importance; any → archived on low utility;
/// archived → episodic on explicit restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryState {
    /// Just ingested, never retrieved
    #[default]
    Draft,
    /// Event-like and recent
    Episodic,
    /// Generalized and stable
    Semantic,
    /// Excluded from default search, reachable by id
    Archived,
}

impl MemoryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryState::Draft => "draft",
            MemoryState::Episodic => "episodic",
            MemoryState::Semantic => "semantic",
            MemoryState::Archived => "archived",
        }
    }
}

impl std::str::FromStr for MemoryState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(MemoryState::Draft),
            "episodic" => Ok(MemoryState::Episodic),
            "semantic" => Ok(MemoryState::Semantic),
            "archived" => Ok(MemoryState::Archived),
            _ => Err(format!("Unknown memory state: {}", s)),
        }
    }
}

impl std::fmt::Display for MemoryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Types of edges between memories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    /// A learning or decision that resolves an error
    Fixes,
    /// Causal link discovered from cue phrases
    Causes,
    /// High-similarity pair of the same type
    SimilarTo,
    /// Generic association
    #[default]
    Related,
    /// Newer memory replaces an older near-duplicate
    Supersedes,
    /// Temporal succession within a project window
    Follows,
    /// A pattern backing a decision or learning
    Supports,
    /// Frequently retrieved together
    CoActivated,
    /// Incremental extension of prior work
    BuildsOn,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Fixes => "FIXES",
            EdgeType::Causes => "CAUSES",
            EdgeType::SimilarTo => "SIMILAR_TO",
            EdgeType::Related => "RELATED",
            EdgeType::Supersedes => "SUPERSEDES",
            EdgeType::Follows => "FOLLOWS",
            EdgeType::Supports => "SUPPORTS",
            EdgeType::CoActivated => "CO_ACTIVATED",
            EdgeType::BuildsOn => "BUILDS_ON",
        }
    }

    pub fn all() -> &'static [EdgeType] {
        &[
            EdgeType::Fixes,
            EdgeType::Causes,
            EdgeType::SimilarTo,
            EdgeType::Related,
            EdgeType::Supersedes,
            EdgeType::Follows,
            EdgeType::Supports,
            EdgeType::CoActivated,
            EdgeType::BuildsOn,
        ]
    }
}

impl std::str::FromStr for EdgeType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "FIXES" => Ok(EdgeType::Fixes),
            "CAUSES" => Ok(EdgeType::Causes),
            "SIMILAR_TO" => Ok(EdgeType::SimilarTo),
            "RELATED" => Ok(EdgeType::Related),
            "SUPERSEDES" => Ok(EdgeType::Supersedes),
            "FOLLOWS" => Ok(EdgeType::Follows),
            "SUPPORTS" => Ok(EdgeType::Supports),
            "CO_ACTIVATED" => Ok(EdgeType::CoActivated),
            "BUILDS_ON" => Ok(EdgeType::BuildsOn),
            _ => Err(format!("Unknown edge type: {}", s)),
        }
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed edge between two memories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    /// Source memory id
    pub source_id: MemoryId,
    /// Target memory id
    pub target_id: MemoryId,
    /// Edge type
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    /// Confidence in [0, 1], set by the inference rule that produced it
    pub confidence: f32,
    /// When the edge was created
    pub created_at: DateTime<Utc>,
}

/// Input for creating a new memory
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CreateMemoryInput {
    pub content: String,
    #[serde(default, alias = "type")]
    pub memory_type: MemoryType,
    #[serde(default)]
    pub tags: Vec<String>,
    pub project: Option<String>,
    pub source: Option<String>,
    pub error_message: Option<String>,
    pub solution: Option<String>,
    pub prevention: Option<String>,
    pub rationale: Option<String>,
    #[serde(default)]
    pub alternatives: Vec<String>,
    /// Override the type-derived base importance
    pub importance: Option<f32>,
    /// Heuristic quality override
    pub quality_score: Option<f32>,
    #[serde(default)]
    pub pinned: bool,
    /// For error memories: whether a fix is already known
    #[serde(default)]
    pub resolved: bool,
}

/// Input for a partial update of mutable fields
///
/// `id`, `created_at` and the stored vectors cannot be updated directly;
/// a content change triggers re-embedding.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateMemoryInput {
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub project: Option<String>,
    pub source: Option<String>,
    pub solution: Option<String>,
    pub prevention: Option<String>,
    pub importance: Option<f32>,
    pub quality_score: Option<f32>,
    pub pinned: Option<bool>,
    pub resolved: Option<bool>,
}

impl UpdateMemoryInput {
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.tags.is_none()
            && self.project.is_none()
            && self.source.is_none()
            && self.solution.is_none()
            && self.prevention.is_none()
            && self.importance.is_none()
            && self.quality_score.is_none()
            && self.pinned.is_none()
            && self.resolved.is_none()
    }
}

/// Retrieval mode for a search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Lexical term matching only
    Sparse,
    /// Embedding cosine similarity only
    Dense,
    /// Reciprocal-rank fusion of both
    Hybrid,
}

/// A single search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub memory: Memory,
    pub score: f32,
}

/// Search response with per-feature advisory flags
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    /// Retrieval mode actually used
    pub mode: SearchMode,
    /// Whether the reranker ran
    pub reranked: bool,
    /// Whether the graph store participated
    pub graph: bool,
    /// Whether the response came from the query cache
    pub cache_hit: bool,
}

/// A related memory reached through the graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedMemory {
    pub memory: Memory,
    pub edge_type: EdgeType,
    pub confidence: f32,
    /// Hops from the origin (1 or 2)
    pub depth: usize,
}

/// Response for `find_related`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedResponse {
    pub related: Vec<RelatedMemory>,
    /// False when the graph store is disabled or unreachable
    pub graph: bool,
}

/// Outcome of one item in a `bulk_store` batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum BulkStoreOutcome {
    Stored { id: MemoryId },
    Failed { error: String },
}

/// Collection and graph counters, used for health checks
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CollectionStats {
    pub total_memories: i64,
    pub by_type: HashMap<String, i64>,
    pub by_state: HashMap<String, i64>,
    pub pinned: i64,
    pub resolved_errors: i64,
    pub dense_dim: usize,
    pub graph: Option<GraphStats>,
    pub cache: CacheStatsSnapshot,
}

/// Graph store counters
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GraphStats {
    pub node_count: i64,
    pub edge_count_by_type: HashMap<String, i64>,
}

/// Query cache counters
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheStatsSnapshot {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

/// Kinds of inference a manual trigger can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InferenceKind {
    All,
    Semantic,
    Temporal,
    Causal,
    ErrorSolution,
}

impl std::str::FromStr for InferenceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" => Ok(InferenceKind::All),
            "semantic" => Ok(InferenceKind::Semantic),
            "temporal" => Ok(InferenceKind::Temporal),
            "causal" => Ok(InferenceKind::Causal),
            "error-solution" | "error_solution" => Ok(InferenceKind::ErrorSolution),
            _ => Err(format!("Unknown inference kind: {}", s)),
        }
    }
}

/// Clamp a score into [0, 1]
pub fn clamp01(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}

/// Clamp an emotional weight into [-1, 1]
pub fn clamp_signed(v: f32) -> f32 {
    v.clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_type_round_trip() {
        for &edge in EdgeType::all() {
            let parsed: EdgeType = edge.as_str().parse().unwrap();
            assert_eq!(parsed, edge);
        }
    }

    #[test]
    fn memory_type_round_trip() {
        for &ty in MemoryType::all() {
            let parsed: MemoryType = ty.as_str().parse().unwrap();
            assert_eq!(parsed, ty);
        }
    }

    #[test]
    fn edge_type_serializes_screaming() {
        let json = serde_json::to_string(&EdgeType::CoActivated).unwrap();
        assert_eq!(json, "\"CO_ACTIVATED\"");
    }

    #[test]
    fn clamping() {
        assert_eq!(clamp01(1.3), 1.0);
        assert_eq!(clamp01(-0.2), 0.0);
        assert_eq!(clamp_signed(-1.7), -1.0);
        assert_eq!(clamp_signed(0.4), 0.4);
    }
}
