//! Sparse lexical vectors
//!
//! A sparse vector maps hashed token identifiers to positive weights,
//! computed with BM25-style term-frequency saturation. Used for the lexical
//! side of hybrid retrieval.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// BM25 term-frequency saturation constant
const K1: f32 = 1.2;
/// BM25 length-normalization constant
const B: f32 = 0.75;
/// Assumed average document length in tokens
const AVG_DOC_LEN: f32 = 64.0;

/// Variable-cardinality bag of weighted terms
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SparseVector {
    /// Token id → positive weight
    pub weights: BTreeMap<u32, f32>,
}

impl SparseVector {
    /// Build a sparse vector from free text
    pub fn from_text(text: &str) -> Self {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Self::default();
        }

        let mut tf: BTreeMap<u32, f32> = BTreeMap::new();
        for token in &tokens {
            *tf.entry(hash_token(token)).or_insert(0.0) += 1.0;
        }

        let doc_len = tokens.len() as f32;
        let norm = K1 * (1.0 - B + B * doc_len / AVG_DOC_LEN);

        let weights = tf
            .into_iter()
            .map(|(id, count)| {
                // BM25 saturation: repeated terms gain diminishing weight
                let w = count * (K1 + 1.0) / (count + norm);
                (id, w)
            })
            .collect();

        Self { weights }
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    /// Dot product over the shared token ids
    pub fn dot(&self, other: &SparseVector) -> f32 {
        let (small, large) = if self.weights.len() <= other.weights.len() {
            (&self.weights, &other.weights)
        } else {
            (&other.weights, &self.weights)
        };
        small
            .iter()
            .filter_map(|(id, w)| large.get(id).map(|v| w * v))
            .sum()
    }

    fn l2_norm(&self) -> f32 {
        self.weights.values().map(|w| w * w).sum::<f32>().sqrt()
    }

    /// Cosine similarity in [0, 1] (weights are non-negative)
    pub fn cosine(&self, other: &SparseVector) -> f32 {
        let denom = self.l2_norm() * other.l2_norm();
        if denom == 0.0 {
            return 0.0;
        }
        self.dot(other) / denom
    }
}

/// Tokenize text into lowercase alphanumeric terms
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.len() > 1)
        .map(String::from)
        .collect()
}

/// Hash a token to a stable 32-bit term id
pub fn hash_token(token: &str) -> u32 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    token.hash(&mut hasher);
    hasher.finish() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_identical_vector() {
        let a = SparseVector::from_text("connection pool exhausted");
        let b = SparseVector::from_text("connection pool exhausted");
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn overlap_scores_higher() {
        let query = SparseVector::from_text("postgres connection timeout");
        let hit = SparseVector::from_text("postgres connection timeout during pool exhaustion");
        let miss = SparseVector::from_text("react hooks state management");
        assert!(query.cosine(&hit) > query.cosine(&miss));
    }

    #[test]
    fn empty_text_empty_vector() {
        assert!(SparseVector::from_text("").is_empty());
        assert!(SparseVector::from_text("   ").is_empty());
    }

    #[test]
    fn cosine_is_bounded() {
        let a = SparseVector::from_text("tokio async runtime worker threads");
        let sim = a.cosine(&a);
        assert!((sim - 1.0).abs() < 1e-5);
    }

    #[test]
    fn saturation_dampens_repetition() {
        let once = SparseVector::from_text("timeout retry backoff");
        let many = SparseVector::from_text("timeout timeout timeout timeout retry backoff");
        let id = hash_token("timeout");
        let w_once = once.weights[&id];
        let w_many = many.weights[&id];
        assert!(w_many > w_once);
        assert!(w_many < w_once * 4.0);
    }
}
