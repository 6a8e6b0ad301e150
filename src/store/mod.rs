//! Vector store adapter
//!
//! Persists memory payloads with their dense and sparse vectors in SQLite
//! (WAL mode) and answers k-NN, scroll, and filtered queries. Similarity is
//! computed by scanning candidate rows; hybrid queries fuse the dense and
//! sparse rankings with reciprocal-rank fusion.

pub mod filter;
pub mod migrations;

pub use filter::MemoryFilter;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::embedding::{cosine_similarity, SparseVector};
use crate::error::{MemoryError, Result};
use crate::lifecycle::StateTransition;
use crate::types::{EdgeType, Memory, MemoryState, MemoryType, Relationship};

/// Reciprocal-rank fusion constant
const RRF_K: f32 = 60.0;

const MEMORY_COLUMNS: &str = "id, memory_type, content, tags, project, source, error_message, \
     solution, prevention, rationale, alternatives, session, created_at, last_accessed, \
     access_count, importance, strength, quality_score, emotional_weight, resolved, pinned, \
     superseded, state, content_hash";

/// A memory scored by a store query
#[derive(Debug, Clone)]
pub struct ScoredMemory {
    pub memory: Memory,
    /// Fused (or single-mode) score in [0, 1]
    pub score: f32,
    pub dense_score: f32,
    pub sparse_score: f32,
}

/// A row of the meta-learning metric history
#[derive(Debug, Clone)]
pub struct MetricRow {
    pub recorded_at: DateTime<Utc>,
    pub avg_importance: f32,
    pub avg_access_rate: f32,
    pub emotional_coverage: f32,
    pub cache_similarity_threshold: f32,
    pub semantic_floor: f32,
    pub emotional_threshold: f32,
}

/// SQLite-backed vector store
pub struct VectorStore {
    conn: Arc<Mutex<Connection>>,
    dim: RwLock<usize>,
}

impl VectorStore {
    /// Open or create the store; `configured_dim` is recorded on first open
    pub fn open(path: &str, configured_dim: usize, busy_timeout_ms: u64) -> Result<Self> {
        let conn = Self::create_connection(path, busy_timeout_ms)?;
        migrations::run_migrations(&conn)?;

        let stored_dim: Option<String> = conn
            .query_row("SELECT value FROM meta WHERE key = 'dense_dim'", [], |row| {
                row.get(0)
            })
            .optional()
            .map_err(db_err)?;

        let dim = match stored_dim.and_then(|s| s.parse::<usize>().ok()) {
            Some(d) => d,
            None => {
                conn.execute(
                    "INSERT OR REPLACE INTO meta (key, value) VALUES ('dense_dim', ?)",
                    params![configured_dim.to_string()],
                )
                .map_err(db_err)?;
                configured_dim
            }
        };

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            dim: RwLock::new(dim),
        })
    }

    fn create_connection(path: &str, busy_timeout_ms: u64) -> Result<Connection> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory().map_err(db_err)?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX;
            Connection::open_with_flags(path, flags).map_err(db_err)?
        };

        conn.execute_batch(&format!(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout={};
            PRAGMA temp_store=MEMORY;
            PRAGMA foreign_keys=ON;
            "#,
            busy_timeout_ms
        ))
        .map_err(db_err)?;

        Ok(conn)
    }

    /// Fixed dense dimension for the current collection lifetime
    pub fn dim(&self) -> usize {
        *self.dim.read()
    }

    fn check_dim(&self, dense: &[f32]) -> Result<()> {
        let expected = self.dim();
        if dense.len() != expected {
            return Err(MemoryError::DimensionMismatch {
                expected,
                actual: dense.len(),
            });
        }
        Ok(())
    }

    /// Idempotent insert-or-replace of a memory and its vectors
    pub fn upsert(&self, memory: &Memory, dense: &[f32], sparse: &SparseVector) -> Result<()> {
        self.check_dim(dense)?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO memories (
                id, memory_type, content, tags, project, source, error_message, solution,
                prevention, rationale, alternatives, session, created_at, last_accessed,
                access_count, importance, strength, quality_score, emotional_weight,
                resolved, pinned, superseded, state, content_hash, dense, sparse
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                      ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)",
            params![
                memory.id,
                memory.memory_type.as_str(),
                memory.content,
                serde_json::to_string(&memory.tags)?,
                memory.project,
                memory.source,
                memory.error_message,
                memory.solution,
                memory.prevention,
                memory.rationale,
                serde_json::to_string(&memory.alternatives)?,
                memory.session,
                memory.created_at.to_rfc3339(),
                memory.last_accessed.map(|t| t.to_rfc3339()),
                memory.access_count,
                memory.importance as f64,
                memory.strength as f64,
                memory.quality_score as f64,
                memory.emotional_weight as f64,
                memory.resolved as i64,
                memory.pinned as i64,
                memory.superseded as i64,
                memory.state.as_str(),
                memory.content_hash,
                vec_to_blob(dense),
                serde_json::to_string(sparse)?,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Fetch a memory by id (archived memories stay reachable here)
    pub fn get(&self, id: &str) -> Result<Option<Memory>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM memories WHERE id = ?", MEMORY_COLUMNS),
            params![id],
            row_to_memory,
        )
        .optional()
        .map_err(db_err)
    }

    /// Fetch the stored vectors for a memory
    pub fn vectors(&self, id: &str) -> Result<Option<(Vec<f32>, SparseVector)>> {
        let conn = self.conn.lock();
        let row: Option<(Vec<u8>, String)> = conn
            .query_row(
                "SELECT dense, sparse FROM memories WHERE id = ? AND dense IS NOT NULL",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)?;

        match row {
            Some((blob, sparse_json)) => Ok(Some((
                blob_to_vec(&blob),
                serde_json::from_str(&sparse_json)?,
            ))),
            None => Ok(None),
        }
    }

    /// Delete a memory; returns whether a row existed
    pub fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn
            .execute("DELETE FROM memories WHERE id = ?", params![id])
            .map_err(db_err)?;
        conn.execute(
            "DELETE FROM relation_annotations WHERE source_id = ?1 OR target_id = ?1",
            params![id],
        )
        .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// Filterable listing with limit/offset, newest first
    pub fn scroll(&self, filter: &MemoryFilter, limit: usize, offset: usize) -> Result<Vec<Memory>> {
        let (clauses, mut values) = filter.to_sql();
        let mut sql = format!("SELECT {} FROM memories", MEMORY_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC, id LIMIT ? OFFSET ?");
        values.push(SqlValue::Integer(limit as i64));
        values.push(SqlValue::Integer(offset as i64));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(values), row_to_memory)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// k-NN / hybrid query
    ///
    /// With both vectors present, ranks are fused with RRF (k = 60) and the
    /// fused score is normalized so a result topping both lists scores 1.0;
    /// ties break on the dense score. With one vector, the score is that
    /// mode's cosine similarity.
    pub fn query(
        &self,
        dense: Option<&[f32]>,
        sparse: Option<&SparseVector>,
        filter: &MemoryFilter,
        limit: usize,
    ) -> Result<Vec<ScoredMemory>> {
        if dense.is_none() && sparse.is_none() {
            return Err(MemoryError::InvalidInput(
                "query requires a dense or sparse vector".into(),
            ));
        }
        if let Some(d) = dense {
            self.check_dim(d)?;
        }

        let candidates = self.load_candidates(filter)?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<ScoredMemory> = candidates
            .into_iter()
            .map(|(memory, cand_dense, cand_sparse)| {
                let dense_score = dense
                    .map(|q| cosine_similarity(q, &cand_dense))
                    .unwrap_or(0.0);
                let sparse_score = sparse.map(|q| q.cosine(&cand_sparse)).unwrap_or(0.0);
                ScoredMemory {
                    memory,
                    score: 0.0,
                    dense_score,
                    sparse_score,
                }
            })
            .collect();

        match (dense.is_some(), sparse.is_some()) {
            (true, true) => fuse_rrf(&mut scored),
            (true, false) => {
                for s in &mut scored {
                    s.score = s.dense_score;
                }
            }
            (false, true) => {
                for s in &mut scored {
                    s.score = s.sparse_score;
                }
            }
            (false, false) => unreachable!(),
        }

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    b.dense_score
                        .partial_cmp(&a.dense_score)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then_with(|| a.memory.id.cmp(&b.memory.id))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    fn load_candidates(
        &self,
        filter: &MemoryFilter,
    ) -> Result<Vec<(Memory, Vec<f32>, SparseVector)>> {
        let (clauses, values) = filter.to_sql();
        let mut sql = format!(
            "SELECT {}, dense, sparse FROM memories WHERE dense IS NOT NULL",
            MEMORY_COLUMNS
        );
        if !clauses.is_empty() {
            sql.push_str(" AND ");
            sql.push_str(&clauses.join(" AND "));
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(values), |row| {
                let memory = row_to_memory(row)?;
                let blob: Vec<u8> = row.get(24)?;
                let sparse_json: String = row.get(25)?;
                Ok((memory, blob, sparse_json))
            })
            .map_err(db_err)?;

        let expected_bytes = self.dim() * std::mem::size_of::<f32>();
        let mut out = Vec::new();
        for row in rows {
            let (memory, blob, sparse_json) = row.map_err(db_err)?;
            if blob.len() != expected_bytes {
                // Stale row from a previous collection lifetime; migrate clears these
                continue;
            }
            out.push((
                memory,
                blob_to_vec(&blob),
                serde_json::from_str(&sparse_json)?,
            ));
        }
        Ok(out)
    }

    /// Destructive reset to a new dense dimension
    pub fn recreate_collection(&self, dim: usize) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            DELETE FROM memories;
            DELETE FROM state_history;
            DELETE FROM relation_annotations;
            "#,
        )
        .map_err(db_err)?;
        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('dense_dim', ?)",
            params![dim.to_string()],
        )
        .map_err(db_err)?;
        *self.dim.write() = dim;
        Ok(())
    }

    /// Record a retrieval: bump access_count and refresh last_accessed
    pub fn touch(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE memories SET access_count = access_count + 1, last_accessed = ? WHERE id = ?",
            params![now.to_rfc3339(), id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Transition lifecycle state, appending to the state-history log
    pub fn set_state(&self, id: &str, to: MemoryState, now: DateTime<Utc>) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let from: Option<String> = tx
            .query_row("SELECT state FROM memories WHERE id = ?", params![id], |row| {
                row.get(0)
            })
            .optional()
            .map_err(db_err)?;
        let Some(from) = from else {
            return Err(MemoryError::NotFound(id.to_string()));
        };
        if from != to.as_str() {
            tx.execute(
                "UPDATE memories SET state = ? WHERE id = ?",
                params![to.as_str(), id],
            )
            .map_err(db_err)?;
            tx.execute(
                "INSERT INTO state_history (memory_id, from_state, to_state, changed_at)
                 VALUES (?, ?, ?, ?)",
                params![id, from, to.as_str(), now.to_rfc3339()],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;
        Ok(())
    }

    /// Append-only state history for a memory, oldest first
    pub fn state_history(&self, id: &str) -> Result<Vec<StateTransition>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT from_state, to_state, changed_at FROM state_history
                 WHERE memory_id = ? ORDER BY id",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![id], |row| {
                let from: String = row.get(0)?;
                let to: String = row.get(1)?;
                let at: String = row.get(2)?;
                Ok((from, to, at))
            })
            .map_err(db_err)?;

        let mut out = Vec::new();
        for row in rows {
            let (from, to, at) = row.map_err(db_err)?;
            out.push(StateTransition {
                from: from.parse().unwrap_or_default(),
                to: to.parse().unwrap_or_default(),
                changed_at: parse_ts(&at),
            });
        }
        Ok(out)
    }

    pub fn set_pinned(&self, id: &str, pinned: bool) -> Result<()> {
        self.simple_update(id, "pinned", SqlValue::Integer(pinned as i64))
    }

    pub fn set_superseded(&self, id: &str, superseded: bool) -> Result<()> {
        self.simple_update(id, "superseded", SqlValue::Integer(superseded as i64))
    }

    /// Mark an error memory resolved, optionally attaching the solution
    pub fn set_resolved(&self, id: &str, solution: Option<&str>) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE memories SET resolved = 1,
                     solution = COALESCE(?, solution)
                 WHERE id = ?",
                params![solution, id],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(MemoryError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Overwrite the evolving score fields
    pub fn set_scores(
        &self,
        id: &str,
        importance: f32,
        strength: f32,
        emotional_weight: f32,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE memories SET importance = ?, strength = ?, emotional_weight = ? WHERE id = ?",
            params![importance as f64, strength as f64, emotional_weight as f64, id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn simple_update(&self, id: &str, column: &str, value: SqlValue) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                &format!("UPDATE memories SET {} = ? WHERE id = ?", column),
                params![value, id],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(MemoryError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Page through every memory, oldest first (used by scheduled jobs)
    pub fn page(&self, offset: usize, limit: usize) -> Result<Vec<Memory>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM memories ORDER BY created_at, id LIMIT ? OFFSET ?",
                MEMORY_COLUMNS
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![limit as i64, offset as i64], row_to_memory)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Memories created since `after` that share the project or session
    /// scope, newest first (temporal inference window)
    pub fn recent_in_scope(
        &self,
        project: Option<&str>,
        session: Option<&str>,
        after: DateTime<Utc>,
        exclude_id: &str,
    ) -> Result<Vec<Memory>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM memories
                 WHERE created_at >= ?1 AND id != ?2
                   AND ((?3 IS NOT NULL AND project = ?3) OR (?4 IS NOT NULL AND session = ?4))
                 ORDER BY created_at DESC, id",
                MEMORY_COLUMNS
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(
                params![after.to_rfc3339(), exclude_id, project, session],
                row_to_memory,
            )
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Memories sharing at least one tag with the given set
    pub fn sharing_tags(
        &self,
        tags: &[String],
        exclude_id: &str,
        limit: usize,
    ) -> Result<Vec<Memory>> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; tags.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM memories
             WHERE id != ? AND EXISTS (
                 SELECT 1 FROM json_each(memories.tags) WHERE json_each.value IN ({})
             )
             ORDER BY created_at DESC LIMIT ?",
            MEMORY_COLUMNS, placeholders
        );

        let mut values: Vec<SqlValue> = vec![SqlValue::Text(exclude_id.to_string())];
        for tag in tags {
            values.push(SqlValue::Text(tag.clone()));
        }
        values.push(SqlValue::Integer(limit as i64));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(values), row_to_memory)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    pub fn count(&self) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))
            .map_err(db_err)
    }

    /// Counters for `stats()`
    pub fn counts(
        &self,
    ) -> Result<(i64, std::collections::HashMap<String, i64>, std::collections::HashMap<String, i64>, i64, i64)>
    {
        let conn = self.conn.lock();
        let total: i64 = conn
            .query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))
            .map_err(db_err)?;

        let mut by_type = std::collections::HashMap::new();
        let mut stmt = conn
            .prepare("SELECT memory_type, COUNT(*) FROM memories GROUP BY memory_type")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(db_err)?;
        for row in rows {
            let (ty, n) = row.map_err(db_err)?;
            by_type.insert(ty, n);
        }

        let mut by_state = std::collections::HashMap::new();
        let mut stmt = conn
            .prepare("SELECT state, COUNT(*) FROM memories GROUP BY state")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(db_err)?;
        for row in rows {
            let (state, n) = row.map_err(db_err)?;
            by_state.insert(state, n);
        }

        let pinned: i64 = conn
            .query_row("SELECT COUNT(*) FROM memories WHERE pinned = 1", [], |row| {
                row.get(0)
            })
            .map_err(db_err)?;
        let resolved: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM memories WHERE memory_type = 'error' AND resolved = 1",
                [],
                |row| row.get(0),
            )
            .map_err(db_err)?;

        Ok((total, by_type, by_state, pinned, resolved))
    }

    /// Idempotent edge annotation (graph-store fallback); true when inserted
    pub fn add_relation_annotation(&self, rel: &Relationship) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO relation_annotations
                     (source_id, target_id, edge_type, confidence, created_at)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    rel.source_id,
                    rel.target_id,
                    rel.edge_type.as_str(),
                    rel.confidence as f64,
                    rel.created_at.to_rfc3339(),
                ],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// Edge annotations touching a memory, in either direction
    pub fn relation_annotations(&self, id: &str) -> Result<Vec<Relationship>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT source_id, target_id, edge_type, confidence, created_at
                 FROM relation_annotations WHERE source_id = ?1 OR target_id = ?1",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(db_err)?;

        let mut out = Vec::new();
        for row in rows {
            let (source_id, target_id, edge_type, confidence, created_at) = row.map_err(db_err)?;
            let Ok(edge_type) = edge_type.parse::<EdgeType>() else {
                continue;
            };
            out.push(Relationship {
                source_id,
                target_id,
                edge_type,
                confidence: confidence as f32,
                created_at: parse_ts(&created_at),
            });
        }
        Ok(out)
    }

    pub fn has_relation_annotation(&self, src: &str, dst: &str, edge_type: EdgeType) -> Result<bool> {
        let conn = self.conn.lock();
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM relation_annotations
                 WHERE source_id = ? AND target_id = ? AND edge_type = ?",
                params![src, dst, edge_type.as_str()],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(n > 0)
    }

    /// Append a meta-learning metric record
    #[allow(clippy::too_many_arguments)]
    pub fn record_metrics(
        &self,
        recorded_at: DateTime<Utc>,
        avg_importance: f32,
        avg_access_rate: f32,
        emotional_coverage: f32,
        cache_similarity_threshold: f32,
        semantic_floor: f32,
        emotional_threshold: f32,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO metric_history
                 (recorded_at, avg_importance, avg_access_rate, emotional_coverage,
                  cache_similarity_threshold, semantic_floor, emotional_threshold)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                recorded_at.to_rfc3339(),
                avg_importance as f64,
                avg_access_rate as f64,
                emotional_coverage as f64,
                cache_similarity_threshold as f64,
                semantic_floor as f64,
                emotional_threshold as f64,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Most recent metric records, newest first
    pub fn metric_history(&self, limit: usize) -> Result<Vec<MetricRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT recorded_at, avg_importance, avg_access_rate, emotional_coverage,
                        cache_similarity_threshold, semantic_floor, emotional_threshold
                 FROM metric_history ORDER BY id DESC LIMIT ?",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, f64>(6)?,
                ))
            })
            .map_err(db_err)?;

        let mut out = Vec::new();
        for row in rows {
            let (at, imp, rate, cov, cache_thr, floor, emo) = row.map_err(db_err)?;
            out.push(MetricRow {
                recorded_at: parse_ts(&at),
                avg_importance: imp as f32,
                avg_access_rate: rate as f32,
                emotional_coverage: cov as f32,
                cache_similarity_threshold: cache_thr as f32,
                semantic_floor: floor as f32,
                emotional_threshold: emo as f32,
            });
        }
        Ok(out)
    }
}

/// Fuse dense and sparse rankings with RRF; normalized so topping both lists
/// scores 1.0
fn fuse_rrf(scored: &mut [ScoredMemory]) {
    let mut dense_order: Vec<usize> = (0..scored.len()).collect();
    dense_order.sort_by(|&a, &b| {
        scored[b]
            .dense_score
            .partial_cmp(&scored[a].dense_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut sparse_order: Vec<usize> = (0..scored.len()).collect();
    sparse_order.sort_by(|&a, &b| {
        scored[b]
            .sparse_score
            .partial_cmp(&scored[a].sparse_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut dense_rank = vec![0usize; scored.len()];
    for (rank, &idx) in dense_order.iter().enumerate() {
        dense_rank[idx] = rank + 1;
    }
    let mut sparse_rank = vec![0usize; scored.len()];
    for (rank, &idx) in sparse_order.iter().enumerate() {
        sparse_rank[idx] = rank + 1;
    }

    let max_fused = 2.0 / (RRF_K + 1.0);
    for (idx, s) in scored.iter_mut().enumerate() {
        let fused =
            1.0 / (RRF_K + dense_rank[idx] as f32) + 1.0 / (RRF_K + sparse_rank[idx] as f32);
        s.score = fused / max_fused;
    }
}

/// Map SQLite connection-level failures to `StoreUnavailable`
fn db_err(e: rusqlite::Error) -> MemoryError {
    if let rusqlite::Error::SqliteFailure(err, _) = &e {
        if matches!(
            err.code,
            rusqlite::ErrorCode::DatabaseBusy
                | rusqlite::ErrorCode::DatabaseLocked
                | rusqlite::ErrorCode::CannotOpen
        ) {
            return MemoryError::StoreUnavailable(e.to_string());
        }
    }
    MemoryError::Database(e)
}

fn vec_to_blob(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for f in v {
        out.extend_from_slice(&f.to_le_bytes());
    }
    out
}

fn blob_to_vec(b: &[u8]) -> Vec<f32> {
    b.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<Memory> {
    let memory_type: String = row.get(1)?;
    let tags: String = row.get(3)?;
    let alternatives: String = row.get(10)?;
    let created_at: String = row.get(12)?;
    let last_accessed: Option<String> = row.get(13)?;
    let state: String = row.get(22)?;

    Ok(Memory {
        id: row.get(0)?,
        memory_type: memory_type.parse::<MemoryType>().unwrap_or_default(),
        content: row.get(2)?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        project: row.get(4)?,
        source: row.get(5)?,
        error_message: row.get(6)?,
        solution: row.get(7)?,
        prevention: row.get(8)?,
        rationale: row.get(9)?,
        alternatives: serde_json::from_str(&alternatives).unwrap_or_default(),
        session: row.get(11)?,
        created_at: parse_ts(&created_at),
        last_accessed: last_accessed.as_deref().map(parse_ts),
        access_count: row.get(14)?,
        importance: row.get::<_, f64>(15)? as f32,
        strength: row.get::<_, f64>(16)? as f32,
        quality_score: row.get::<_, f64>(17)? as f32,
        emotional_weight: row.get::<_, f64>(18)? as f32,
        resolved: row.get::<_, i64>(19)? != 0,
        pinned: row.get::<_, i64>(20)? != 0,
        superseded: row.get::<_, i64>(21)? != 0,
        state: state.parse::<MemoryState>().unwrap_or_default(),
        content_hash: row.get(23)?,
    })
}
