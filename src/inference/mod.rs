//! Relationship inference engine
//!
//! Discovers typed edges between memories through five strategies: temporal
//! (same project/session window), semantic (k-NN with a type-combination
//! table), tag overlap, co-access promotion, and a scheduled causal sweep
//! over cue phrases. Edges go to the graph store when it is available and
//! fall back to payload annotations in the vector store otherwise.

pub mod coaccess;

pub use coaccess::CoAccessTracker;

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::embedding::{cosine_similarity, Embedder};
use crate::error::Result;
use crate::graph::GraphStore;
use crate::store::{MemoryFilter, VectorStore};
use crate::types::{EdgeType, Memory, MemoryId, MemoryType, Relationship};

/// Temporal inference looks this far back for project/session neighbors
pub const TEMPORAL_WINDOW_HOURS: i64 = 2;
/// Similarity floor of the catch-all RELATED row
pub const ANY_PAIR_FLOOR: f32 = 0.80;
/// Similarity floor for causal cue matches
pub const CAUSAL_FLOOR: f32 = 0.80;
/// Jaccard floor for tag-overlap edges
pub const TAG_JACCARD_FLOOR: f32 = 0.5;
/// k-NN width of the semantic strategy
const SEMANTIC_K: usize = 10;
/// At most this many tag-overlap edges per write
const MAX_TAG_EDGES: usize = 3;

static CAUSAL_CUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:caused by|due to|because of|triggered by)\s+([^.;:!?\n]{8,120})")
        .expect("causal cue regex compiles")
});

/// Result of an on-write inference pass
#[derive(Debug, Default)]
pub struct InferenceOutcome {
    pub edges: Vec<Relationship>,
    /// Errors marked resolved by a FIXES edge
    pub resolved_errors: Vec<MemoryId>,
}

/// Result of a scheduled sweep
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepReport {
    pub scanned: usize,
    pub edges_created: usize,
    pub failures: usize,
}

impl SweepReport {
    fn merge(&mut self, other: SweepReport) {
        self.scanned += other.scanned;
        self.edges_created += other.edges_created;
        self.failures += other.failures;
    }
}

/// Discovers edges on write, on co-access, and in scheduled passes
pub struct InferenceEngine {
    pub coaccess: CoAccessTracker,
}

impl InferenceEngine {
    pub fn new(co_access_threshold: u32) -> Self {
        Self {
            coaccess: CoAccessTracker::new(co_access_threshold),
        }
    }

    /// On-write pass: temporal, then semantic, then tag overlap as fallback
    #[allow(clippy::too_many_arguments)]
    pub fn on_write(
        &self,
        memory: &Memory,
        dense: &[f32],
        store: &VectorStore,
        graph: Option<&GraphStore>,
        semantic_floor: f32,
        fixes_floor: f32,
        now: DateTime<Utc>,
    ) -> Result<InferenceOutcome> {
        let mut outcome = InferenceOutcome::default();

        let (temporal_edges, resolved) =
            self.temporal(memory, dense, store, graph, fixes_floor, now)?;
        outcome.edges.extend(temporal_edges);
        outcome.resolved_errors = resolved;

        let semantic_edges =
            self.semantic(memory, dense, store, graph, semantic_floor, fixes_floor, now)?;
        outcome.edges.extend(semantic_edges);

        if outcome.edges.is_empty() {
            outcome
                .edges
                .extend(self.tag_overlap(memory, store, graph, now)?);
        }

        Ok(outcome)
    }

    /// Temporal strategy: FIXES an unresolved error in the window, or
    /// FOLLOWS the most recent neighbor
    fn temporal(
        &self,
        memory: &Memory,
        dense: &[f32],
        store: &VectorStore,
        graph: Option<&GraphStore>,
        fixes_floor: f32,
        now: DateTime<Utc>,
    ) -> Result<(Vec<Relationship>, Vec<MemoryId>)> {
        let window_start = now - Duration::hours(TEMPORAL_WINDOW_HOURS);
        let neighbors = store.recent_in_scope(
            memory.project.as_deref(),
            memory.session.as_deref(),
            window_start,
            &memory.id,
        )?;
        if neighbors.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let mut edges = Vec::new();
        let mut resolved = Vec::new();

        if matches!(memory.memory_type, MemoryType::Learning | MemoryType::Decision) {
            let mut best: Option<(&Memory, f32)> = None;
            for error in neighbors
                .iter()
                .filter(|m| m.memory_type == MemoryType::Error && !m.resolved)
            {
                let Some((error_dense, _)) = store.vectors(&error.id)? else {
                    continue;
                };
                let sim = cosine_similarity(dense, &error_dense);
                if best.map(|(_, s)| sim > s).unwrap_or(true) {
                    best = Some((error, sim));
                }
            }

            if let Some((error, sim)) = best {
                if sim >= fixes_floor {
                    let edge = Relationship {
                        source_id: memory.id.clone(),
                        target_id: error.id.clone(),
                        edge_type: EdgeType::Fixes,
                        confidence: 0.9,
                        created_at: now,
                    };
                    if persist_edge(&edge, store, graph)? {
                        edges.push(edge);
                    }
                    store.set_resolved(&error.id, memory.solution.as_deref())?;
                    resolved.push(error.id.clone());
                    return Ok((edges, resolved));
                }
            }
        }

        // No fix found: chain onto the most recent neighbor
        if let Some(latest) = neighbors.first() {
            let edge = Relationship {
                source_id: memory.id.clone(),
                target_id: latest.id.clone(),
                edge_type: EdgeType::Follows,
                confidence: 0.6,
                created_at: now,
            };
            if persist_edge(&edge, store, graph)? {
                edges.push(edge);
            }
        }

        Ok((edges, resolved))
    }

    /// Semantic strategy: k-NN pairs classified by the type-combination table
    #[allow(clippy::too_many_arguments)]
    fn semantic(
        &self,
        memory: &Memory,
        dense: &[f32],
        store: &VectorStore,
        graph: Option<&GraphStore>,
        semantic_floor: f32,
        fixes_floor: f32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Relationship>> {
        let knn = store.query(Some(dense), None, &MemoryFilter::default(), SEMANTIC_K + 1)?;
        let mut edges = Vec::new();

        for candidate in knn.iter().filter(|c| c.memory.id != memory.id) {
            let sim = candidate.dense_score;
            if sim < semantic_floor {
                continue;
            }
            let Some((edge_type, confidence)) = classify_pair(
                memory.memory_type,
                candidate.memory.memory_type,
                sim,
                semantic_floor,
                fixes_floor,
            ) else {
                continue;
            };
            if edge_exists(&memory.id, &candidate.memory.id, edge_type, store, graph) {
                continue;
            }
            let edge = Relationship {
                source_id: memory.id.clone(),
                target_id: candidate.memory.id.clone(),
                edge_type,
                confidence,
                created_at: now,
            };
            if persist_edge(&edge, store, graph)? {
                edges.push(edge);
            }
        }

        Ok(edges)
    }

    /// Tag-overlap fallback, only when nothing else linked the write
    fn tag_overlap(
        &self,
        memory: &Memory,
        store: &VectorStore,
        graph: Option<&GraphStore>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Relationship>> {
        if memory.tags.is_empty() {
            return Ok(Vec::new());
        }

        let candidates = store.sharing_tags(&memory.tags, &memory.id, 50)?;
        let mut edges = Vec::new();

        for candidate in candidates {
            if edges.len() >= MAX_TAG_EDGES {
                break;
            }
            if jaccard(&memory.tags, &candidate.tags) < TAG_JACCARD_FLOOR {
                continue;
            }
            if edge_exists(&memory.id, &candidate.id, EdgeType::Related, store, graph) {
                continue;
            }
            let edge = Relationship {
                source_id: memory.id.clone(),
                target_id: candidate.id.clone(),
                edge_type: EdgeType::Related,
                confidence: 0.5,
                created_at: now,
            };
            if persist_edge(&edge, store, graph)? {
                edges.push(edge);
            }
        }

        Ok(edges)
    }

    /// Scheduled semantic pass over every memory, in pages
    pub fn semantic_sweep(
        &self,
        store: &VectorStore,
        graph: Option<&GraphStore>,
        semantic_floor: f32,
        fixes_floor: f32,
        now: DateTime<Utc>,
        page_size: usize,
    ) -> SweepReport {
        let mut report = SweepReport::default();
        let mut offset = 0;

        loop {
            let page = match store.page(offset, page_size) {
                Ok(page) => page,
                Err(e) => {
                    warn!("semantic sweep aborted: {}", e);
                    report.failures += 1;
                    break;
                }
            };
            if page.is_empty() {
                break;
            }
            offset += page.len();

            for memory in &page {
                report.scanned += 1;
                let result: Result<usize> = (|| {
                    let Some((dense, _)) = store.vectors(&memory.id)? else {
                        return Ok(0);
                    };
                    let edges = self.semantic(
                        memory,
                        &dense,
                        store,
                        graph,
                        semantic_floor,
                        fixes_floor,
                        now,
                    )?;
                    Ok(edges.len())
                })();
                match result {
                    Ok(n) => report.edges_created += n,
                    Err(e) => {
                        warn!(memory_id = %memory.id, "semantic sweep item failed: {}", e);
                        report.failures += 1;
                    }
                }
            }
        }

        report
    }

    /// Scheduled causal pass: scan contents for cue phrases and link the
    /// mentioned cause when it retrieves with high similarity
    pub fn causal_sweep(
        &self,
        embedder: &dyn Embedder,
        store: &VectorStore,
        graph: Option<&GraphStore>,
        now: DateTime<Utc>,
        page_size: usize,
    ) -> SweepReport {
        let mut report = SweepReport::default();
        let mut offset = 0;

        loop {
            let page = match store.page(offset, page_size) {
                Ok(page) => page,
                Err(e) => {
                    warn!("causal sweep aborted: {}", e);
                    report.failures += 1;
                    break;
                }
            };
            if page.is_empty() {
                break;
            }
            offset += page.len();

            for memory in &page {
                report.scanned += 1;
                match self.causal_edges_for(embedder, store, graph, memory, now) {
                    Ok(n) => report.edges_created += n,
                    Err(e) => {
                        warn!(memory_id = %memory.id, "causal sweep item failed: {}", e);
                        report.failures += 1;
                    }
                }
            }
        }

        report
    }

    fn causal_edges_for(
        &self,
        embedder: &dyn Embedder,
        store: &VectorStore,
        graph: Option<&GraphStore>,
        memory: &Memory,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut created = 0;

        for capture in CAUSAL_CUE.captures_iter(&memory.content) {
            let phrase = capture[1].trim();
            let embedded = match embedder.embed(phrase) {
                Ok(e) => e,
                Err(_) => continue,
            };
            let hits = store.query(Some(&embedded.dense), None, &MemoryFilter::default(), 3)?;
            let Some(cause) = hits
                .iter()
                .find(|h| h.memory.id != memory.id && h.score >= CAUSAL_FLOOR)
            else {
                continue;
            };
            if edge_exists(&cause.memory.id, &memory.id, EdgeType::Causes, store, graph) {
                continue;
            }
            let edge = Relationship {
                source_id: cause.memory.id.clone(),
                target_id: memory.id.clone(),
                edge_type: EdgeType::Causes,
                confidence: 0.7,
                created_at: now,
            };
            if persist_edge(&edge, store, graph)? {
                created += 1;
            }
        }

        Ok(created)
    }

    /// Manual pass pairing unresolved errors with their best fix candidate
    pub fn error_solution_sweep(
        &self,
        store: &VectorStore,
        graph: Option<&GraphStore>,
        fixes_floor: f32,
        now: DateTime<Utc>,
        page_size: usize,
    ) -> SweepReport {
        let mut report = SweepReport::default();
        let filter = MemoryFilter {
            memory_type: Some(MemoryType::Error),
            resolved: Some(false),
            ..Default::default()
        };

        let mut offset = 0;
        loop {
            let errors = match store.scroll(&filter, page_size, offset) {
                Ok(page) => page,
                Err(e) => {
                    warn!("error-solution sweep aborted: {}", e);
                    report.failures += 1;
                    break;
                }
            };
            if errors.is_empty() {
                break;
            }
            offset += errors.len();

            for error in &errors {
                report.scanned += 1;
                let result: Result<usize> = (|| {
                    let Some((dense, _)) = store.vectors(&error.id)? else {
                        return Ok(0);
                    };
                    let knn =
                        store.query(Some(&dense), None, &MemoryFilter::default(), SEMANTIC_K)?;
                    let Some(fix) = knn.iter().find(|c| {
                        c.memory.id != error.id
                            && matches!(
                                c.memory.memory_type,
                                MemoryType::Learning | MemoryType::Decision
                            )
                            && c.dense_score >= fixes_floor
                    }) else {
                        return Ok(0);
                    };
                    let edge = Relationship {
                        source_id: fix.memory.id.clone(),
                        target_id: error.id.clone(),
                        edge_type: EdgeType::Fixes,
                        confidence: 0.9,
                        created_at: now,
                    };
                    let created = persist_edge(&edge, store, graph)?;
                    store.set_resolved(&error.id, fix.memory.solution.as_deref())?;
                    Ok(created as usize)
                })();
                match result {
                    Ok(n) => report.edges_created += n,
                    Err(e) => {
                        warn!(memory_id = %error.id, "error-solution item failed: {}", e);
                        report.failures += 1;
                    }
                }
            }
        }

        report
    }

    /// Manual temporal pass over memories ingested within the window
    pub fn temporal_recent(
        &self,
        store: &VectorStore,
        graph: Option<&GraphStore>,
        fixes_floor: f32,
        now: DateTime<Utc>,
    ) -> SweepReport {
        let mut report = SweepReport::default();
        let filter = MemoryFilter {
            created_after: Some(now - Duration::hours(TEMPORAL_WINDOW_HOURS)),
            ..Default::default()
        };

        let recent = match store.scroll(&filter, 500, 0) {
            Ok(page) => page,
            Err(e) => {
                warn!("temporal sweep aborted: {}", e);
                report.failures += 1;
                return report;
            }
        };

        for memory in &recent {
            report.scanned += 1;
            let result: Result<usize> = (|| {
                let Some((dense, _)) = store.vectors(&memory.id)? else {
                    return Ok(0);
                };
                let (edges, _) =
                    self.temporal(memory, &dense, store, graph, fixes_floor, now)?;
                Ok(edges.len())
            })();
            match result {
                Ok(n) => report.edges_created += n,
                Err(e) => {
                    warn!(memory_id = %memory.id, "temporal item failed: {}", e);
                    report.failures += 1;
                }
            }
        }

        report
    }

    /// Run the full scheduled inference pass (semantic + causal)
    #[allow(clippy::too_many_arguments)]
    pub fn full_sweep(
        &self,
        embedder: &dyn Embedder,
        store: &VectorStore,
        graph: Option<&GraphStore>,
        semantic_floor: f32,
        fixes_floor: f32,
        now: DateTime<Utc>,
        page_size: usize,
    ) -> SweepReport {
        let mut report =
            self.semantic_sweep(store, graph, semantic_floor, fixes_floor, now, page_size);
        report.merge(self.causal_sweep(embedder, store, graph, now, page_size));
        if let Some(g) = graph {
            match g.orphan_sweep() {
                Ok(removed) if removed > 0 => {
                    warn!(removed, "orphan edges removed during inference sweep");
                }
                Err(e) => warn!("orphan sweep failed: {}", e),
                _ => {}
            }
        }
        report
    }
}

/// First matching row of the type-combination table
fn classify_pair(
    n: MemoryType,
    m: MemoryType,
    sim: f32,
    semantic_floor: f32,
    fixes_floor: f32,
) -> Option<(EdgeType, f32)> {
    use MemoryType::*;
    match (n, m) {
        (Learning, Error) | (Decision, Error) if sim >= fixes_floor => Some((EdgeType::Fixes, 0.9)),
        (Pattern, Decision) | (Pattern, Learning) if sim >= semantic_floor => {
            Some((EdgeType::Supports, 0.75))
        }
        (Error, Error) if sim >= fixes_floor => Some((EdgeType::SimilarTo, 0.9)),
        _ if sim >= ANY_PAIR_FLOOR => Some((EdgeType::Related, 0.6)),
        _ => None,
    }
}

/// Write an edge to the graph store, or to vector-store annotations when the
/// graph is unavailable; true when a new edge was created
pub fn persist_edge(
    rel: &Relationship,
    store: &VectorStore,
    graph: Option<&GraphStore>,
) -> Result<bool> {
    match graph {
        Some(g) => match g.link(rel) {
            Ok(created) => Ok(created),
            Err(e) => {
                warn!("graph link failed, falling back to annotation: {}", e);
                store.add_relation_annotation(rel)
            }
        },
        None => store.add_relation_annotation(rel),
    }
}

/// Whether the pair already carries an edge of this type, in either direction
pub fn edge_exists(
    src: &str,
    dst: &str,
    edge_type: EdgeType,
    store: &VectorStore,
    graph: Option<&GraphStore>,
) -> bool {
    if let Some(g) = graph {
        if g.has_edge(src, dst, edge_type).unwrap_or(false)
            || g.has_edge(dst, src, edge_type).unwrap_or(false)
        {
            return true;
        }
    }
    store.has_relation_annotation(src, dst, edge_type).unwrap_or(false)
        || store.has_relation_annotation(dst, src, edge_type).unwrap_or(false)
}

/// Jaccard similarity of two tag sets
pub fn jaccard(a: &[String], b: &[String]) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let set_a: HashSet<&String> = a.iter().collect();
    let set_b: HashSet<&String> = b.iter().collect();
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_first_match_wins() {
        use MemoryType::*;
        // learning fixing an error beats the catch-all
        assert_eq!(
            classify_pair(Learning, Error, 0.9, 0.75, 0.85),
            Some((EdgeType::Fixes, 0.9))
        );
        // below the fixes floor the catch-all can still apply
        assert_eq!(
            classify_pair(Learning, Error, 0.82, 0.75, 0.85),
            Some((EdgeType::Related, 0.6))
        );
        // pattern supporting a decision
        assert_eq!(
            classify_pair(Pattern, Decision, 0.76, 0.75, 0.85),
            Some((EdgeType::Supports, 0.75))
        );
        // twin errors
        assert_eq!(
            classify_pair(Error, Error, 0.86, 0.75, 0.85),
            Some((EdgeType::SimilarTo, 0.9))
        );
        // similar but below every floor
        assert_eq!(classify_pair(Context, Docs, 0.78, 0.75, 0.85), None);
        // generic pair above the catch-all floor
        assert_eq!(
            classify_pair(Context, Docs, 0.81, 0.75, 0.85),
            Some((EdgeType::Related, 0.6))
        );
    }

    #[test]
    fn jaccard_overlap() {
        let a = vec!["postgres".to_string(), "pool".to_string()];
        let b = vec!["postgres".to_string(), "pool".to_string()];
        let c = vec!["react".to_string()];
        assert_eq!(jaccard(&a, &b), 1.0);
        assert_eq!(jaccard(&a, &c), 0.0);
        assert_eq!(jaccard(&a, &[]), 0.0);

        let d = vec!["postgres".to_string(), "timeout".to_string()];
        assert!((jaccard(&a, &d) - (1.0 / 3.0)).abs() < 1e-6);
    }

    #[test]
    fn causal_cue_extraction() {
        let content = "The outage was caused by connection pool exhaustion in the api tier.";
        let capture = CAUSAL_CUE.captures(content).unwrap();
        assert_eq!(
            capture[1].trim(),
            "connection pool exhaustion in the api tier"
        );

        assert!(CAUSAL_CUE
            .captures("Deploys went fine this week, nothing notable.")
            .is_none());

        // Case-insensitive, different cue
        assert!(CAUSAL_CUE
            .captures("Latency regression DUE TO unbounded retry loops downstream")
            .is_some());
    }
}
