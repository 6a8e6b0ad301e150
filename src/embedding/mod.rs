//! Embedding generation
//!
//! Produces a dense embedding and a sparse lexical vector per text. The
//! default backend uses the hashing trick with term-frequency weighting;
//! it needs no model files, is deterministic within a process, and keeps
//! the retrieval pipeline self-contained.

pub mod sparse;

pub use sparse::SparseVector;

use std::hash::{Hash, Hasher};

use crate::error::{MemoryError, Result};

/// A dense + sparse embedding pair for one text
#[derive(Debug, Clone)]
pub struct Embedding {
    /// Fixed-dimension, L2-normalized
    pub dense: Vec<f32>,
    /// Term-id → weight
    pub sparse: SparseVector,
}

/// Trait for embedding generators
pub trait Embedder: Send + Sync {
    /// Generate the dense and sparse vectors for a single text
    fn embed(&self, text: &str) -> Result<Embedding>;

    /// Generate embeddings for multiple texts (batch)
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Dense embedding dimensions
    fn dimensions(&self) -> usize;

    /// Model identifier (advisory, recorded in collection metadata)
    fn model_id(&self) -> &str;
}

/// Hashing-trick embedder with TF weighting, bigrams, and sign hashing
pub struct HashedEmbedder {
    dimensions: usize,
}

impl HashedEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    /// Hash a token to a dimension index
    fn hash_index(token: &str, dimensions: usize) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        token.hash(&mut hasher);
        (hasher.finish() as usize) % dimensions
    }

    /// Sign for feature hashing (reduces collision impact)
    fn hash_sign(token: &str) -> f32 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        format!("{}_sign", token).hash(&mut hasher);
        if hasher.finish() % 2 == 0 {
            1.0
        } else {
            -1.0
        }
    }
}

impl Embedder for HashedEmbedder {
    fn embed(&self, text: &str) -> Result<Embedding> {
        if text.trim().is_empty() {
            return Err(MemoryError::Embedding("empty input".into()));
        }

        let tokens = sparse::tokenize(text);
        let mut dense = vec![0.0_f32; self.dimensions];

        let mut tf: std::collections::HashMap<&str, f32> = std::collections::HashMap::new();
        for token in &tokens {
            *tf.entry(token.as_str()).or_insert(0.0) += 1.0;
        }

        let doc_len = tokens.len().max(1) as f32;
        for (token, count) in tf {
            let tf_score = (1.0 + count / doc_len).ln();
            // Length as a crude rarity proxy: longer tokens carry more signal
            let idf_score = 1.0 + token.len() as f32 * 0.1;

            let idx = Self::hash_index(token, self.dimensions);
            dense[idx] += tf_score * idf_score * Self::hash_sign(token);
        }

        // Bigrams capture local word order
        for window in tokens.windows(2) {
            let bigram = format!("{}_{}", window[0], window[1]);
            let idx = Self::hash_index(&bigram, self.dimensions);
            dense[idx] += 0.5 * Self::hash_sign(&bigram);
        }

        let norm: f32 = dense.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut dense {
                *x /= norm;
            }
        }

        Ok(Embedding {
            dense,
            sparse: SparseVector::from_text(text),
        })
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        "hashed-tf-v1"
    }
}

/// Cosine similarity between two dense vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}
