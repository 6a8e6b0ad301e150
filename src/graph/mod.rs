//! Graph store adapter
//!
//! Persists memories as nodes and typed, confidence-weighted edges, and
//! answers neighborhood queries up to two hops. The adapter is optional:
//! when it is disabled or unreachable the engine logs a warning, graph reads
//! return empty sets, and graph-based inference is skipped.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};

use crate::error::{MemoryError, Result};
use crate::types::{EdgeType, GraphStats, MemoryId, Relationship};

/// Maximum traversal depth for neighborhood queries
pub const MAX_DEPTH: usize = 2;

/// A neighbor reached during traversal
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub id: MemoryId,
    pub edge_type: EdgeType,
    pub confidence: f32,
    /// Hops from the origin (1 or 2)
    pub depth: usize,
}

/// SQLite-backed graph store
pub struct GraphStore {
    conn: Arc<Mutex<Connection>>,
}

impl GraphStore {
    /// Open or create the graph database
    pub fn open(path: &str) -> Result<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory().map_err(graph_err)?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX;
            Connection::open_with_flags(path, flags).map_err(graph_err)?
        };

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=5000;

            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                label TEXT NOT NULL,
                properties TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS edges (
                source_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                edge_type TEXT NOT NULL,
                confidence REAL NOT NULL DEFAULT 0.5,
                created_at TEXT NOT NULL,
                PRIMARY KEY (source_id, target_id, edge_type)
            );

            CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_id);
            CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id);
            "#,
        )
        .map_err(graph_err)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Idempotent node upsert
    pub fn ensure_node(
        &self,
        id: &str,
        label: &str,
        properties: &serde_json::Value,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO nodes (id, label, properties, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET label = excluded.label,
                                           properties = excluded.properties",
            params![
                id,
                label,
                properties.to_string(),
                Utc::now().to_rfc3339()
            ],
        )
        .map_err(graph_err)?;
        Ok(())
    }

    /// Idempotent edge creation per (source, target, type); true when inserted
    pub fn link(&self, rel: &Relationship) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO edges
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
            .map_err(graph_err)?;
        Ok(changed > 0)
    }

    pub fn has_edge(&self, src: &str, dst: &str, edge_type: EdgeType) -> Result<bool> {
        let conn = self.conn.lock();
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM edges
                 WHERE source_id = ? AND target_id = ? AND edge_type = ?",
                params![src, dst, edge_type.as_str()],
                |row| row.get(0),
            )
            .map_err(graph_err)?;
        Ok(n > 0)
    }

    /// Edges touching a node, in either direction
    pub fn edges_for(&self, id: &str) -> Result<Vec<Relationship>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT source_id, target_id, edge_type, confidence, created_at
                 FROM edges WHERE source_id = ?1 OR target_id = ?1",
            )
            .map_err(graph_err)?;
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
            .map_err(graph_err)?;

        let mut out = Vec::new();
        for row in rows {
            let (source_id, target_id, edge_type, confidence, created_at) =
                row.map_err(graph_err)?;
            let Ok(edge_type) = edge_type.parse::<EdgeType>() else {
                continue;
            };
            out.push(Relationship {
                source_id,
                target_id,
                edge_type,
                confidence: confidence as f32,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_default(),
            });
        }
        Ok(out)
    }

    /// BFS neighborhood up to `depth` hops (clamped to [`MAX_DEPTH`]),
    /// following edges in both directions, optionally restricted by type
    pub fn neighbors(
        &self,
        id: &str,
        types: Option<&[EdgeType]>,
        depth: usize,
    ) -> Result<Vec<Neighbor>> {
        let depth = depth.clamp(1, MAX_DEPTH);
        let mut visited: HashSet<MemoryId> = HashSet::from([id.to_string()]);
        let mut queue: VecDeque<(MemoryId, usize)> = VecDeque::from([(id.to_string(), 0)]);
        let mut out = Vec::new();

        while let Some((current, dist)) = queue.pop_front() {
            if dist >= depth {
                continue;
            }
            for edge in self.edges_for(&current)? {
                if let Some(types) = types {
                    if !types.contains(&edge.edge_type) {
                        continue;
                    }
                }
                let other = if edge.source_id == current {
                    edge.target_id.clone()
                } else {
                    edge.source_id.clone()
                };
                if !visited.insert(other.clone()) {
                    continue;
                }
                out.push(Neighbor {
                    id: other.clone(),
                    edge_type: edge.edge_type,
                    confidence: edge.confidence,
                    depth: dist + 1,
                });
                queue.push_back((other, dist + 1));
            }
        }
        Ok(out)
    }

    /// Remove a node and its incident edges
    pub fn delete_node(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM nodes WHERE id = ?", params![id])
            .map_err(graph_err)?;
        conn.execute(
            "DELETE FROM edges WHERE source_id = ?1 OR target_id = ?1",
            params![id],
        )
        .map_err(graph_err)?;
        Ok(())
    }

    /// Remove edges whose endpoints no longer exist; returns removed count
    pub fn orphan_sweep(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let removed = conn
            .execute(
                "DELETE FROM edges
                 WHERE source_id NOT IN (SELECT id FROM nodes)
                    OR target_id NOT IN (SELECT id FROM nodes)",
                [],
            )
            .map_err(graph_err)?;
        Ok(removed)
    }

    pub fn stats(&self) -> Result<GraphStats> {
        let conn = self.conn.lock();
        let node_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))
            .map_err(graph_err)?;

        let mut edge_count_by_type = HashMap::new();
        let mut stmt = conn
            .prepare("SELECT edge_type, COUNT(*) FROM edges GROUP BY edge_type")
            .map_err(graph_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(graph_err)?;
        for row in rows {
            let (ty, n) = row.map_err(graph_err)?;
            edge_count_by_type.insert(ty, n);
        }

        Ok(GraphStats {
            node_count,
            edge_count_by_type,
        })
    }

    /// Destructive reset (used by migrate)
    pub fn clear(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch("DELETE FROM edges; DELETE FROM nodes;")
            .map_err(graph_err)?;
        Ok(())
    }
}

/// Every graph failure is `GraphUnavailable`; callers degrade, never abort
fn graph_err(e: rusqlite::Error) -> MemoryError {
    MemoryError::GraphUnavailable(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_graph() -> GraphStore {
        GraphStore::open(":memory:").unwrap()
    }

    fn edge(src: &str, dst: &str, edge_type: EdgeType) -> Relationship {
        Relationship {
            source_id: src.to_string(),
            target_id: dst.to_string(),
            edge_type,
            confidence: 0.7,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn link_is_idempotent() {
        let graph = test_graph();
        graph.ensure_node("a", "error", &json!({})).unwrap();
        graph.ensure_node("b", "learning", &json!({})).unwrap();

        assert!(graph.link(&edge("b", "a", EdgeType::Fixes)).unwrap());
        assert!(!graph.link(&edge("b", "a", EdgeType::Fixes)).unwrap());

        let stats = graph.stats().unwrap();
        assert_eq!(stats.node_count, 2);
        assert_eq!(stats.edge_count_by_type.get("FIXES"), Some(&1));
    }

    #[test]
    fn neighbors_walks_two_hops() {
        let graph = test_graph();
        for id in ["a", "b", "c", "d"] {
            graph.ensure_node(id, "context", &json!({})).unwrap();
        }
        graph.link(&edge("a", "b", EdgeType::Related)).unwrap();
        graph.link(&edge("b", "c", EdgeType::Related)).unwrap();
        graph.link(&edge("c", "d", EdgeType::Related)).unwrap();

        let one_hop = graph.neighbors("a", None, 1).unwrap();
        assert_eq!(one_hop.len(), 1);
        assert_eq!(one_hop[0].id, "b");

        let two_hops = graph.neighbors("a", None, 2).unwrap();
        let ids: Vec<_> = two_hops.iter().map(|n| n.id.as_str()).collect();
        assert!(ids.contains(&"b"));
        assert!(ids.contains(&"c"));
        assert!(!ids.contains(&"d"));

        // Depth is clamped, never deeper than two hops
        let clamped = graph.neighbors("a", None, 10).unwrap();
        assert_eq!(clamped.len(), 2);
    }

    #[test]
    fn neighbors_filters_by_type() {
        let graph = test_graph();
        for id in ["a", "b", "c"] {
            graph.ensure_node(id, "context", &json!({})).unwrap();
        }
        graph.link(&edge("a", "b", EdgeType::Fixes)).unwrap();
        graph.link(&edge("a", "c", EdgeType::Related)).unwrap();

        let fixes = graph.neighbors("a", Some(&[EdgeType::Fixes]), 2).unwrap();
        assert_eq!(fixes.len(), 1);
        assert_eq!(fixes[0].id, "b");
    }

    #[test]
    fn delete_node_removes_incident_edges() {
        let graph = test_graph();
        graph.ensure_node("a", "context", &json!({})).unwrap();
        graph.ensure_node("b", "context", &json!({})).unwrap();
        graph.link(&edge("a", "b", EdgeType::Related)).unwrap();

        graph.delete_node("b").unwrap();
        assert!(graph.neighbors("a", None, 2).unwrap().is_empty());
    }

    #[test]
    fn orphan_sweep_removes_dangling_edges() {
        let graph = test_graph();
        graph.ensure_node("a", "context", &json!({})).unwrap();
        // Edge to a node that was never created
        graph.link(&edge("a", "ghost", EdgeType::Related)).unwrap();

        let removed = graph.orphan_sweep().unwrap();
        assert_eq!(removed, 1);
        assert!(graph.neighbors("a", None, 2).unwrap().is_empty());
    }
}
