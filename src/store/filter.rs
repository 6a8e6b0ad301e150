//! Search filters
//!
//! A filter is a conjunction over payload fields. Unknown keys in a JSON
//! filter are rejected at the boundary rather than silently ignored.

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MemoryError, Result};
use crate::types::MemoryType;

/// Filter keys accepted in a JSON filter object
const KNOWN_KEYS: &[&str] = &[
    "type",
    "memory_type",
    "project",
    "tags",
    "created_after",
    "created_before",
    "pinned",
    "resolved",
    "min_importance",
    "include_archived",
    "include_superseded",
];

/// Conjunction filter over memory payload fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryFilter {
    #[serde(alias = "type")]
    pub memory_type: Option<MemoryType>,
    pub project: Option<String>,
    /// Any-of tag match
    pub tags: Option<Vec<String>>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub pinned: Option<bool>,
    pub resolved: Option<bool>,
    pub min_importance: Option<f32>,
    /// Archived memories are excluded from default search
    #[serde(default)]
    pub include_archived: bool,
    /// Superseded memories are demoted from default search
    #[serde(default)]
    pub include_superseded: bool,
}

impl MemoryFilter {
    /// Parse a JSON filter, failing on unknown keys
    pub fn from_json(value: &Value) -> Result<Self> {
        let obj = value.as_object().ok_or_else(|| {
            MemoryError::Validation(vec!["filter must be a JSON object".to_string()])
        })?;

        let unknown: Vec<String> = obj
            .keys()
            .filter(|k| !KNOWN_KEYS.contains(&k.as_str()))
            .map(|k| format!("unknown filter key: {}", k))
            .collect();
        if !unknown.is_empty() {
            return Err(MemoryError::Validation(unknown));
        }

        serde_json::from_value(value.clone())
            .map_err(|e| MemoryError::Validation(vec![format!("invalid filter: {}", e)]))
    }

    /// Stable signature for cache keying; equal filters produce equal strings
    pub fn signature(&self) -> String {
        let mut canonical = self.clone();
        if let Some(tags) = canonical.tags.as_mut() {
            tags.sort();
            tags.dedup();
        }
        serde_json::to_string(&canonical).unwrap_or_default()
    }

    /// Render as SQL clauses plus bound parameters
    ///
    /// Clauses reference columns of the `memories` table and are joined with
    /// AND by the caller.
    pub fn to_sql(&self) -> (Vec<String>, Vec<SqlValue>) {
        let mut clauses = Vec::new();
        let mut params: Vec<SqlValue> = Vec::new();

        if let Some(ty) = self.memory_type {
            clauses.push("memory_type = ?".to_string());
            params.push(SqlValue::Text(ty.as_str().to_string()));
        }
        if let Some(ref project) = self.project {
            clauses.push("project = ?".to_string());
            params.push(SqlValue::Text(project.clone()));
        }
        if let Some(ref tags) = self.tags {
            if !tags.is_empty() {
                let placeholders = vec!["?"; tags.len()].join(", ");
                clauses.push(format!(
                    "EXISTS (SELECT 1 FROM json_each(memories.tags) WHERE json_each.value IN ({}))",
                    placeholders
                ));
                for tag in tags {
                    params.push(SqlValue::Text(tag.clone()));
                }
            }
        }
        if let Some(after) = self.created_after {
            clauses.push("created_at >= ?".to_string());
            params.push(SqlValue::Text(after.to_rfc3339()));
        }
        if let Some(before) = self.created_before {
            clauses.push("created_at <= ?".to_string());
            params.push(SqlValue::Text(before.to_rfc3339()));
        }
        if let Some(pinned) = self.pinned {
            clauses.push("pinned = ?".to_string());
            params.push(SqlValue::Integer(pinned as i64));
        }
        if let Some(resolved) = self.resolved {
            clauses.push("resolved = ?".to_string());
            params.push(SqlValue::Integer(resolved as i64));
        }
        if let Some(min_importance) = self.min_importance {
            clauses.push("importance >= ?".to_string());
            params.push(SqlValue::Real(min_importance as f64));
        }
        if !self.include_archived {
            clauses.push("state != 'archived'".to_string());
        }
        if !self.include_superseded {
            clauses.push("superseded = 0".to_string());
        }

        (clauses, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_key_rejected() {
        let err = MemoryFilter::from_json(&json!({"workspace": "api"})).unwrap_err();
        match err {
            MemoryError::Validation(fields) => {
                assert!(fields[0].contains("workspace"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn known_keys_parse() {
        let filter = MemoryFilter::from_json(&json!({
            "type": "error",
            "project": "api",
            "tags": ["postgres", "pool"],
            "pinned": false,
            "min_importance": 0.5
        }))
        .unwrap();
        assert_eq!(filter.memory_type, Some(MemoryType::Error));
        assert_eq!(filter.project.as_deref(), Some("api"));
        assert_eq!(filter.min_importance, Some(0.5));
    }

    #[test]
    fn signature_is_order_insensitive_for_tags() {
        let a = MemoryFilter {
            tags: Some(vec!["b".into(), "a".into()]),
            ..Default::default()
        };
        let b = MemoryFilter {
            tags: Some(vec!["a".into(), "b".into()]),
            ..Default::default()
        };
        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn default_excludes_archived_and_superseded() {
        let (clauses, _) = MemoryFilter::default().to_sql();
        assert!(clauses.iter().any(|c| c.contains("archived")));
        assert!(clauses.iter().any(|c| c.contains("superseded")));

        let (clauses, _) = MemoryFilter {
            include_archived: true,
            include_superseded: true,
            ..Default::default()
        }
        .to_sql();
        assert!(clauses.is_empty());
    }
}
