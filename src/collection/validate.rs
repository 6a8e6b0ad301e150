//! Write-time payload validation
//!
//! Type-conditioned required fields are enforced before anything touches the
//! stores; a failed validation lists every missing field at once.

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{MemoryError, Result};
use crate::types::{clamp01, CreateMemoryInput, MemoryType};

/// Minimum accepted content length in characters
pub const MIN_CONTENT_CHARS: usize = 30;
/// Patterns shorter than this are accepted but flagged
pub const PATTERN_RECOMMENDED_CHARS: usize = 100;

/// Validate a create payload against its type-specific contract
pub fn validate_create(input: &CreateMemoryInput) -> Result<()> {
    let mut missing: Vec<String> = Vec::new();

    if input.content.chars().count() < MIN_CONTENT_CHARS {
        missing.push(format!(
            "content must be at least {} characters",
            MIN_CONTENT_CHARS
        ));
    }

    match input.memory_type {
        MemoryType::Error => {
            if none_or_blank(&input.error_message) {
                missing.push("error_message".to_string());
            }
            // An open error legitimately has no fix yet; one stored as
            // already resolved must say how
            if input.resolved
                && none_or_blank(&input.solution)
                && none_or_blank(&input.prevention)
            {
                missing.push("solution or prevention".to_string());
            }
        }
        MemoryType::Decision => {
            if none_or_blank(&input.rationale) {
                missing.push("rationale".to_string());
            }
            if input.alternatives.is_empty() {
                missing.push("alternatives".to_string());
            }
        }
        MemoryType::Docs => {
            if none_or_blank(&input.source) {
                missing.push("source".to_string());
            }
        }
        MemoryType::Pattern => {
            if input.content.chars().count() < PATTERN_RECOMMENDED_CHARS {
                debug!(
                    "pattern content under {} characters; consider expanding",
                    PATTERN_RECOMMENDED_CHARS
                );
            }
        }
        MemoryType::Learning | MemoryType::Context => {}
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(MemoryError::Validation(missing))
    }
}

fn none_or_blank(field: &Option<String>) -> bool {
    field.as_deref().map(|s| s.trim().is_empty()).unwrap_or(true)
}

/// Heuristic initial quality from content structure
pub fn quality_heuristic(content: &str) -> f32 {
    let mut score = 0.4;
    score += (content.len() as f32 / 1000.0).min(0.3);
    if content.contains('\n') {
        score += 0.1;
    }
    if content.contains("```") {
        score += 0.1;
    }
    clamp01(score)
}

/// SHA-256 of whitespace-normalized, lowercased content
pub fn content_hash(content: &str) -> String {
    let normalized = content.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut hasher = Sha256::new();
    hasher.update(normalized.to_lowercase().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_input(memory_type: MemoryType, content: &str) -> CreateMemoryInput {
        CreateMemoryInput {
            content: content.to_string(),
            memory_type,
            ..Default::default()
        }
    }

    #[test]
    fn content_length_boundary() {
        let exactly_30 = "a".repeat(30);
        let input = base_input(MemoryType::Context, &exactly_30);
        assert!(validate_create(&input).is_ok());

        let just_29 = "a".repeat(29);
        let input = base_input(MemoryType::Context, &just_29);
        assert!(matches!(
            validate_create(&input),
            Err(MemoryError::Validation(_))
        ));
    }

    #[test]
    fn error_requires_message() {
        let mut input = base_input(
            MemoryType::Error,
            "connection refused when the pool was exhausted",
        );
        let err = validate_create(&input).unwrap_err();
        match err {
            MemoryError::Validation(fields) => {
                assert!(fields.iter().any(|f| f.contains("error_message")));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        // Open error without a fix is fine
        input.error_message = Some("connection refused".to_string());
        assert!(validate_create(&input).is_ok());
    }

    #[test]
    fn resolved_error_requires_fix() {
        let mut input = base_input(
            MemoryType::Error,
            "connection refused when the pool was exhausted",
        );
        input.error_message = Some("connection refused".to_string());
        input.resolved = true;
        let err = validate_create(&input).unwrap_err();
        match err {
            MemoryError::Validation(fields) => {
                assert!(fields.iter().any(|f| f.contains("solution or prevention")));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        input.prevention = Some("cap concurrent connections".to_string());
        assert!(validate_create(&input).is_ok());
    }

    #[test]
    fn decision_requires_rationale_and_alternatives() {
        let mut input = base_input(
            MemoryType::Decision,
            "we will use sqlite as the primary store",
        );
        assert!(validate_create(&input).is_err());

        input.rationale = Some("embedded, zero ops, good enough".to_string());
        input.alternatives = vec!["postgres".to_string()];
        assert!(validate_create(&input).is_ok());
    }

    #[test]
    fn docs_require_source() {
        let mut input = base_input(
            MemoryType::Docs,
            "tokio::spawn requires the future to be Send and 'static",
        );
        assert!(validate_create(&input).is_err());

        input.source = Some("https://docs.rs/tokio".to_string());
        assert!(validate_create(&input).is_ok());
    }

    #[test]
    fn short_pattern_is_accepted() {
        let input = base_input(MemoryType::Pattern, "always wrap handlers in a retry layer");
        assert!(validate_create(&input).is_ok());
    }

    #[test]
    fn blank_fields_count_as_missing() {
        let mut input = base_input(
            MemoryType::Error,
            "connection refused when the pool was exhausted",
        );
        input.error_message = Some("   ".to_string());
        input.solution = Some("bump the pool".to_string());
        assert!(validate_create(&input).is_err());
    }

    #[test]
    fn content_hash_ignores_whitespace() {
        let a = content_hash("increase  the pool\nsize to 100");
        let b = content_hash("increase the pool size to 100");
        assert_eq!(a, b);
        let c = content_hash("decrease the pool size to 10");
        assert_ne!(a, c);
    }

    #[test]
    fn quality_heuristic_bounds() {
        let short = quality_heuristic("tiny");
        let rich = quality_heuristic(&format!(
            "a long writeup\nwith structure\n```rust\nlet x = 1;\n```\n{}",
            "detail ".repeat(200)
        ));
        assert!(short < rich);
        assert!((0.0..=1.0).contains(&rich));
    }
}
