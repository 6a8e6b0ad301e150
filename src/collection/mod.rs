//! Memory collection
//!
//! The orchestrator over every other component: the write path embeds,
//! persists, and runs on-write inference; the read path consults the cache,
//! routes the query, fuses and reranks candidates, then records access
//! telemetry. All externally visible operations live here.

pub mod jobs;
pub mod validate;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::QueryCache;
use crate::config::{MemoryConfig, Tunables};
use crate::embedding::{Embedder, HashedEmbedder};
use crate::error::{MemoryError, Result};
use crate::graph::GraphStore;
use crate::inference::{self, InferenceEngine, SweepReport};
use crate::lifecycle;
use crate::rerank::Reranker;
use crate::scoring;
use crate::session::SessionTracker;
use crate::store::{MemoryFilter, VectorStore};
use crate::types::{
    clamp01, BulkStoreOutcome, CollectionStats, CreateMemoryInput, EdgeType, InferenceKind,
    Memory, MemoryId, MemoryState, RelatedMemory, RelatedResponse, Relationship, SearchMode,
    SearchResponse, SearchResult, UpdateMemoryInput,
};

/// Retry backoff for `StoreUnavailable`, per attempt
const RETRY_BACKOFF_MS: [u64; 3] = [200, 500, 1500];
/// Floor of the candidate overfetch
const MIN_OVERFETCH: usize = 50;

/// Options for a search request
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    /// Score cutoff; collection default when None
    pub min_score: Option<f32>,
    pub filter: MemoryFilter,
    pub use_cache: bool,
    pub use_reranking: bool,
    /// Force a retrieval mode instead of query understanding
    pub mode: Option<SearchMode>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            min_score: None,
            filter: MemoryFilter::default(),
            use_cache: true,
            use_reranking: true,
            mode: None,
        }
    }
}

/// The memory collection: one logical memory over two stores
pub struct MemoryCollection {
    config: MemoryConfig,
    tunables: RwLock<Tunables>,
    embedder: RwLock<Arc<dyn Embedder>>,
    store: VectorStore,
    graph: Option<GraphStore>,
    cache: QueryCache,
    reranker: Reranker,
    inference: InferenceEngine,
    sessions: SessionTracker,
}

impl MemoryCollection {
    /// Open the collection with the default embedding backend
    pub fn open(config: MemoryConfig) -> Result<Self> {
        let dim = config.dense_dim;
        Self::with_embedder(config, Arc::new(HashedEmbedder::new(dim)))
    }

    /// Open the collection with a custom embedding backend
    pub fn with_embedder(config: MemoryConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        config.validate()?;

        let store = VectorStore::open(&config.db_path, config.dense_dim, config.store_timeout_ms)?;
        let graph = if config.graph_enabled {
            match GraphStore::open(&config.graph_db_path) {
                Ok(g) => Some(g),
                Err(e) => {
                    warn!("graph store unavailable, continuing without it: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let tunables = Tunables::from_config(&config);
        let cache = QueryCache::new(config.cache_ttl_seconds, config.max_cache_entries);
        let reranker = Reranker::new(config.rerank_budget_ms);
        let inference = InferenceEngine::new(config.co_access_threshold);

        info!(
            dim = store.dim(),
            model = %config.embedding_model_id,
            graph = graph.is_some(),
            "memory collection opened"
        );

        Ok(Self {
            config,
            tunables: RwLock::new(tunables),
            embedder: RwLock::new(embedder),
            store,
            graph,
            cache,
            reranker,
            inference,
            sessions: SessionTracker::new(),
        })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Current runtime-adjusted thresholds
    pub fn tunables(&self) -> Tunables {
        self.tunables.read().clone()
    }

    fn embedder(&self) -> Arc<dyn Embedder> {
        self.embedder.read().clone()
    }

    /// Open a session from an external signal; ingests share the tag
    pub fn open_session(&self, id: Option<String>) -> String {
        self.sessions.open(id, Utc::now())
    }

    pub fn close_session(&self) {
        self.sessions.close();
    }

    /// Retry a store operation on `StoreUnavailable`
    async fn with_retry<T, F>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut attempt = 0;
        loop {
            match op() {
                Err(e) if e.is_retryable() && attempt < RETRY_BACKOFF_MS.len() => {
                    warn!(attempt, "store unavailable, backing off: {}", e);
                    tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS[attempt])).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Write path: validate, embed, persist, then best-effort inference
    pub async fn store(&self, input: CreateMemoryInput) -> Result<MemoryId> {
        validate::validate_create(&input)?;

        let embedding = self.embedder().embed(&input.content)?;
        let now = Utc::now();

        let mut tags = input.tags.clone();
        tags.sort();
        tags.dedup();

        let memory = Memory {
            id: Uuid::new_v4().to_string(),
            memory_type: input.memory_type,
            content: input.content.clone(),
            tags,
            project: input.project.clone(),
            source: input.source.clone(),
            error_message: input.error_message.clone(),
            solution: input.solution.clone(),
            prevention: input.prevention.clone(),
            rationale: input.rationale.clone(),
            alternatives: input.alternatives.clone(),
            session: Some(self.sessions.tag_for(now)),
            created_at: now,
            last_accessed: None,
            access_count: 0,
            importance: clamp01(
                input
                    .importance
                    .unwrap_or_else(|| scoring::importance_base(input.memory_type)),
            ),
            strength: 1.0,
            quality_score: clamp01(
                input
                    .quality_score
                    .unwrap_or_else(|| validate::quality_heuristic(&input.content)),
            ),
            emotional_weight: scoring::emotional_weight(&input.content),
            resolved: input.resolved,
            pinned: input.pinned,
            superseded: false,
            state: MemoryState::Draft,
            content_hash: Some(validate::content_hash(&input.content)),
        };

        self.with_retry(|| self.store.upsert(&memory, &embedding.dense, &embedding.sparse))
            .await?;

        if let Some(graph) = &self.graph {
            let properties = serde_json::json!({
                "project": memory.project,
                "tags": memory.tags,
            });
            if let Err(e) = graph.ensure_node(&memory.id, memory.memory_type.as_str(), &properties)
            {
                warn!(memory_id = %memory.id, "graph node creation failed: {}", e);
            }
        }

        // On-write inference is best-effort; its failure never rolls back the
        // stored memory
        let tunables = self.tunables();
        match self.inference.on_write(
            &memory,
            &embedding.dense,
            &self.store,
            self.graph.as_ref(),
            tunables.semantic_floor,
            self.config.fixes_floor,
            now,
        ) {
            Ok(outcome) => {
                if !outcome.edges.is_empty() {
                    debug!(
                        memory_id = %memory.id,
                        edges = outcome.edges.len(),
                        resolved = outcome.resolved_errors.len(),
                        "on-write inference complete"
                    );
                }
            }
            Err(e) => warn!(memory_id = %memory.id, "on-write inference failed: {}", e),
        }

        Ok(memory.id)
    }

    /// Best-effort batch store; partial failures are reported per item
    pub async fn bulk_store(&self, inputs: Vec<CreateMemoryInput>) -> Vec<BulkStoreOutcome> {
        let mut outcomes = Vec::with_capacity(inputs.len());
        for input in inputs {
            match self.store(input).await {
                Ok(id) => outcomes.push(BulkStoreOutcome::Stored { id }),
                Err(e) => outcomes.push(BulkStoreOutcome::Failed {
                    error: e.to_string(),
                }),
            }
        }
        outcomes
    }

    /// Read path: cache, query understanding, hybrid retrieval, rerank,
    /// access telemetry
    pub async fn search(&self, query: &str, options: SearchOptions) -> Result<SearchResponse> {
        let embedding = self.embedder().embed(query)?;
        let tunables = self.tunables();
        let signature = options.filter.signature();
        let mode = options.mode.unwrap_or_else(|| self.choose_mode(query));

        if options.use_cache {
            if let Some(results) = self.cache.lookup(
                &embedding.dense,
                &signature,
                tunables.cache_similarity_threshold,
            ) {
                debug!(query, "query cache hit");
                return Ok(SearchResponse {
                    results,
                    mode,
                    reranked: false,
                    graph: self.graph.is_some(),
                    cache_hit: true,
                });
            }
        }

        let overfetch = (options.limit * self.config.overfetch).max(MIN_OVERFETCH);
        let (dense_query, sparse_query) = match mode {
            SearchMode::Dense => (Some(embedding.dense.as_slice()), None),
            SearchMode::Sparse => (None, Some(&embedding.sparse)),
            SearchMode::Hybrid => (Some(embedding.dense.as_slice()), Some(&embedding.sparse)),
        };

        let mut scored = self
            .with_retry(|| {
                self.store
                    .query(dense_query, sparse_query, &options.filter, overfetch)
            })
            .await?;

        let min_score = options.min_score.unwrap_or(self.config.min_score);
        scored.retain(|s| s.score >= min_score);

        let mut reranked = false;
        if options.use_reranking && self.config.reranking_enabled && scored.len() >= 2 {
            let contents: Vec<&str> = scored.iter().map(|s| s.memory.content.as_str()).collect();
            match self.reranker.score(query, &contents) {
                Some(cross_scores) => {
                    for (s, ce) in scored.iter_mut().zip(cross_scores) {
                        s.score = Reranker::blend(s.score, ce);
                    }
                    reranked = true;
                }
                None => {
                    warn!("reranker budget exceeded, keeping fusion order");
                }
            }
        }

        // score desc, then pinned, importance, recency, id
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.memory.pinned.cmp(&a.memory.pinned))
                .then_with(|| {
                    b.memory
                        .importance
                        .partial_cmp(&a.memory.importance)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| b.memory.created_at.cmp(&a.memory.created_at))
                .then_with(|| a.memory.id.cmp(&b.memory.id))
        });
        scored.truncate(options.limit);

        let results: Vec<SearchResult> = scored
            .into_iter()
            .map(|s| SearchResult {
                memory: s.memory,
                score: s.score,
            })
            .collect();

        self.record_access(&results);

        if options.use_cache {
            self.cache
                .insert(embedding.dense.clone(), signature, results.clone());
        }

        Ok(SearchResponse {
            results,
            mode,
            reranked,
            graph: self.graph.is_some(),
            cache_hit: false,
        })
    }

    /// Telemetry for returned results: access counters, reinforcement,
    /// lifecycle transitions, co-access tracking. Never fails the search.
    fn record_access(&self, results: &[SearchResult]) {
        let now = Utc::now();

        for result in results {
            let pre = &result.memory;
            if let Err(e) = self.store.touch(&pre.id, now) {
                warn!(memory_id = %pre.id, "access tracking failed: {}", e);
                continue;
            }

            let mut importance = pre.importance;
            if let Some(boosted) = scoring::reinforce_on_access(pre, pre.last_accessed, now) {
                importance = boosted;
                if let Err(e) =
                    self.store
                        .set_scores(&pre.id, boosted, pre.strength, pre.emotional_weight)
                {
                    warn!(memory_id = %pre.id, "reinforcement failed: {}", e);
                }
            }

            let mut post = pre.clone();
            post.access_count += 1;
            post.last_accessed = Some(now);
            post.importance = importance;
            if let Some(next) = lifecycle::transition_on_access(&post) {
                if let Err(e) = self.store.set_state(&pre.id, next, now) {
                    warn!(memory_id = %pre.id, "lifecycle transition failed: {}", e);
                }
            }
        }

        let top_ids: Vec<MemoryId> = results.iter().map(|r| r.memory.id.clone()).collect();
        for (a, b) in self.inference.coaccess.track(&top_ids) {
            let edge = Relationship {
                source_id: a,
                target_id: b,
                edge_type: EdgeType::CoActivated,
                confidence: 0.7,
                created_at: now,
            };
            if let Err(e) = inference::persist_edge(&edge, &self.store, self.graph.as_ref()) {
                warn!("co-access edge failed: {}", e);
            }
        }
    }

    /// Query understanding: exact tokens (error codes, stack symbols) route
    /// to sparse-only retrieval
    fn choose_mode(&self, query: &str) -> SearchMode {
        if !self.config.use_query_understanding {
            return SearchMode::Hybrid;
        }
        let trimmed = query.trim();
        if !trimmed.contains(char::is_whitespace) && looks_like_exact_token(trimmed) {
            SearchMode::Sparse
        } else {
            SearchMode::Hybrid
        }
    }

    /// Fetch by id; archived memories stay reachable
    pub async fn get(&self, id: &str) -> Result<Memory> {
        self.with_retry(|| self.store.get(id))
            .await?
            .ok_or_else(|| MemoryError::NotFound(id.to_string()))
    }

    /// Partial update of mutable fields; a content change re-embeds
    pub async fn update(&self, id: &str, mutations: UpdateMemoryInput) -> Result<Memory> {
        if mutations.is_empty() {
            return Err(MemoryError::InvalidInput("empty update".into()));
        }

        let mut memory = self.get(id).await?;

        let content_changed = mutations
            .content
            .as_ref()
            .map(|c| *c != memory.content)
            .unwrap_or(false);

        if let Some(content) = mutations.content {
            if content.chars().count() < validate::MIN_CONTENT_CHARS {
                return Err(MemoryError::Validation(vec![format!(
                    "content must be at least {} characters",
                    validate::MIN_CONTENT_CHARS
                )]));
            }
            memory.content = content;
        }
        if let Some(mut tags) = mutations.tags {
            tags.sort();
            tags.dedup();
            memory.tags = tags;
        }
        if let Some(project) = mutations.project {
            memory.project = Some(project);
        }
        if let Some(source) = mutations.source {
            memory.source = Some(source);
        }
        if let Some(solution) = mutations.solution {
            memory.solution = Some(solution);
        }
        if let Some(prevention) = mutations.prevention {
            memory.prevention = Some(prevention);
        }
        if let Some(importance) = mutations.importance {
            memory.importance = clamp01(importance);
        }
        if let Some(quality) = mutations.quality_score {
            memory.quality_score = clamp01(quality);
        }
        if let Some(pinned) = mutations.pinned {
            memory.pinned = pinned;
        }
        if let Some(resolved) = mutations.resolved {
            memory.resolved = resolved;
        }

        let (dense, sparse) = if content_changed {
            memory.content_hash = Some(validate::content_hash(&memory.content));
            memory.emotional_weight = scoring::emotional_weight(&memory.content);
            let embedding = self.embedder().embed(&memory.content)?;
            (embedding.dense, embedding.sparse)
        } else {
            self.with_retry(|| self.store.vectors(id))
                .await?
                .ok_or_else(|| MemoryError::NotFound(id.to_string()))?
        };

        self.with_retry(|| self.store.upsert(&memory, &dense, &sparse))
            .await?;
        Ok(memory)
    }

    /// Hard delete
    pub async fn forget(&self, id: &str) -> Result<()> {
        let existed = self.with_retry(|| self.store.delete(id)).await?;
        if !existed {
            return Err(MemoryError::NotFound(id.to_string()));
        }
        if let Some(graph) = &self.graph {
            if let Err(e) = graph.delete_node(id) {
                warn!(memory_id = %id, "graph node removal failed: {}", e);
            }
        }
        self.inference.coaccess.forget(id);
        Ok(())
    }

    /// Pin or unpin; pinned memories never decay or archive
    pub async fn pin(&self, id: &str, pinned: bool) -> Result<()> {
        self.with_retry(|| self.store.set_pinned(id, pinned)).await
    }

    /// Soft archive: excluded from default search, reachable by id
    pub async fn archive(&self, id: &str) -> Result<()> {
        self.with_retry(|| self.store.set_state(id, MemoryState::Archived, Utc::now()))
            .await
    }

    /// Explicit restore from the archive
    pub async fn restore(&self, id: &str) -> Result<()> {
        self.with_retry(|| self.store.set_state(id, lifecycle::restore_target(), Utc::now()))
            .await
    }

    /// Mark an error memory resolved with its solution
    pub async fn resolve(&self, id: &str, solution: &str) -> Result<()> {
        self.with_retry(|| self.store.set_resolved(id, Some(solution)))
            .await
    }

    /// Explicit edge between two existing memories
    pub async fn link(
        &self,
        source_id: &str,
        target_id: &str,
        edge_type: EdgeType,
        confidence: Option<f32>,
    ) -> Result<()> {
        self.get(source_id).await?;
        self.get(target_id).await?;

        let edge = Relationship {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            edge_type,
            confidence: clamp01(confidence.unwrap_or(1.0)),
            created_at: Utc::now(),
        };
        inference::persist_edge(&edge, &self.store, self.graph.as_ref())?;

        // A superseded memory is demoted from default retrieval
        if edge_type == EdgeType::Supersedes {
            self.with_retry(|| self.store.set_superseded(target_id, true))
                .await?;
        }
        Ok(())
    }

    /// Graph neighborhood up to two hops
    pub async fn find_related(
        &self,
        id: &str,
        depth: usize,
        types: Option<&[EdgeType]>,
    ) -> Result<RelatedResponse> {
        self.get(id).await?;

        let Some(graph) = &self.graph else {
            return Ok(RelatedResponse {
                related: Vec::new(),
                graph: false,
            });
        };

        let neighbors = match graph.neighbors(id, types, depth) {
            Ok(neighbors) => neighbors,
            Err(e) => {
                warn!(memory_id = %id, "graph traversal failed: {}", e);
                return Ok(RelatedResponse {
                    related: Vec::new(),
                    graph: false,
                });
            }
        };

        let mut related = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            // An edge may briefly reference a node whose memory is gone; the
            // scheduled sweep repairs, readers just skip
            if let Some(memory) = self.with_retry(|| self.store.get(&neighbor.id)).await? {
                related.push(RelatedMemory {
                    memory,
                    edge_type: neighbor.edge_type,
                    confidence: neighbor.confidence,
                    depth: neighbor.depth,
                });
            }
        }

        Ok(RelatedResponse {
            related,
            graph: true,
        })
    }

    /// Collection and graph counters
    pub async fn stats(&self) -> Result<CollectionStats> {
        let (total, by_type, by_state, pinned, resolved) =
            self.with_retry(|| self.store.counts()).await?;

        let graph = self.graph.as_ref().and_then(|g| match g.stats() {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!("graph stats failed: {}", e);
                None
            }
        });

        Ok(CollectionStats {
            total_memories: total,
            by_type,
            by_state,
            pinned,
            resolved_errors: resolved,
            dense_dim: self.store.dim(),
            graph,
            cache: self.cache.snapshot(),
        })
    }

    /// Manual inference trigger
    pub async fn run_inference(&self, kind: InferenceKind) -> Result<SweepReport> {
        let tunables = self.tunables();
        let now = Utc::now();
        let embedder = self.embedder();
        let graph = self.graph.as_ref();
        let page = jobs::PAGE_SIZE;

        let report = match kind {
            InferenceKind::Semantic => self.inference.semantic_sweep(
                &self.store,
                graph,
                tunables.semantic_floor,
                self.config.fixes_floor,
                now,
                page,
            ),
            InferenceKind::Temporal => {
                self.inference
                    .temporal_recent(&self.store, graph, self.config.fixes_floor, now)
            }
            InferenceKind::Causal => {
                self.inference
                    .causal_sweep(embedder.as_ref(), &self.store, graph, now, page)
            }
            InferenceKind::ErrorSolution => self.inference.error_solution_sweep(
                &self.store,
                graph,
                self.config.fixes_floor,
                now,
                page,
            ),
            InferenceKind::All => {
                let mut report = self.inference.full_sweep(
                    embedder.as_ref(),
                    &self.store,
                    graph,
                    tunables.semantic_floor,
                    self.config.fixes_floor,
                    now,
                    page,
                );
                let temporal =
                    self.inference
                        .temporal_recent(&self.store, graph, self.config.fixes_floor, now);
                report.scanned += temporal.scanned;
                report.edges_created += temporal.edges_created;
                report.failures += temporal.failures;
                report
            }
        };

        Ok(report)
    }

    /// Destructive reset to a new embedding dimension
    ///
    /// Installs the default embedding backend at the new dimension when the
    /// current backend does not match.
    pub async fn migrate(&self, new_dim: Option<usize>) -> Result<()> {
        let dim = new_dim.unwrap_or(self.config.dense_dim);
        if dim == 0 {
            return Err(MemoryError::Config("dense_dim must be positive".into()));
        }

        self.with_retry(|| self.store.recreate_collection(dim))
            .await?;
        if let Some(graph) = &self.graph {
            if let Err(e) = graph.clear() {
                warn!("graph clear failed during migrate: {}", e);
            }
        }
        self.cache.clear();
        self.inference.coaccess.reset();

        if self.embedder.read().dimensions() != dim {
            *self.embedder.write() = Arc::new(HashedEmbedder::new(dim));
        }

        info!(dim, "collection migrated");
        Ok(())
    }

    pub(crate) fn store_ref(&self) -> &VectorStore {
        &self.store
    }

    pub(crate) fn graph_ref(&self) -> Option<&GraphStore> {
        self.graph.as_ref()
    }

    pub(crate) fn cache_ref(&self) -> &QueryCache {
        &self.cache
    }

    pub(crate) fn inference_ref(&self) -> &InferenceEngine {
        &self.inference
    }

    pub(crate) fn tunables_lock(&self) -> &RwLock<Tunables> {
        &self.tunables
    }
}

/// Heuristic for error codes and stack symbols
fn looks_like_exact_token(token: &str) -> bool {
    if token.is_empty() {
        return false;
    }
    if token.contains("::") || token.contains('_') {
        return true;
    }
    if token.contains('.') && !token.ends_with('.') && token.len() > 3 {
        return true;
    }
    // Screaming identifiers: ECONNREFUSED, E0308, HTTP502
    let upperish = token
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
    if upperish && token.len() >= 4 {
        return true;
    }
    let has_digit = token.chars().any(|c| c.is_ascii_digit());
    has_digit && upperish && token.len() >= 3
}
