//! Search result reranking
//!
//! Second-pass scoring of the top candidates with a lightweight
//! cross-encoder stand-in: each (query, content) pair is scored from term
//! overlap, exact-phrase and bigram signals, then blended monotonically with
//! the fusion score. The reranker runs under a time budget; past it, the
//! fusion order is preserved. Never fatal.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::embedding::sparse::tokenize;
use crate::types::clamp01;

/// Weight of the fusion score in the final blend
pub const FUSION_WEIGHT: f32 = 0.4;
/// Weight of the cross-encoder score in the final blend
pub const CROSS_ENCODER_WEIGHT: f32 = 0.6;

/// Stateless cross-encoder-style scorer
pub struct Reranker {
    budget: Duration,
}

impl Reranker {
    pub fn new(budget_ms: u64) -> Self {
        Self {
            budget: Duration::from_millis(budget_ms),
        }
    }

    /// Score each candidate against the query
    ///
    /// Returns None when the budget is exhausted mid-pass; the caller keeps
    /// the fusion order.
    pub fn score(&self, query: &str, candidates: &[&str]) -> Option<Vec<f32>> {
        let started = Instant::now();
        let query_lower = query.to_lowercase();
        let query_terms: HashSet<String> = tokenize(query).into_iter().collect();
        let query_bigrams = bigrams(&query_lower);

        let mut scores = Vec::with_capacity(candidates.len());
        for content in candidates {
            if started.elapsed() > self.budget {
                return None;
            }
            scores.push(pair_score(
                &query_terms,
                &query_lower,
                &query_bigrams,
                content,
            ));
        }
        Some(scores)
    }

    /// Monotonic blend of fusion score and cross-encoder score
    pub fn blend(fusion: f32, cross_encoder: f32) -> f32 {
        FUSION_WEIGHT * fusion + CROSS_ENCODER_WEIGHT * cross_encoder
    }
}

/// Relevance of one (query, content) pair in [0, 1]
fn pair_score(
    query_terms: &HashSet<String>,
    query_lower: &str,
    query_bigrams: &HashSet<(String, String)>,
    content: &str,
) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }

    let content_lower = content.to_lowercase();
    let content_terms: HashSet<String> = tokenize(content).into_iter().collect();

    let overlap = query_terms.intersection(&content_terms).count() as f32
        / query_terms.len() as f32;

    let exact = if !query_lower.trim().is_empty() && content_lower.contains(query_lower.trim()) {
        0.3
    } else {
        0.0
    };

    let bigram = if query_bigrams.is_empty() {
        0.0
    } else {
        let content_bigrams = bigrams(&content_lower);
        let shared = query_bigrams.intersection(&content_bigrams).count() as f32;
        0.2 * shared / query_bigrams.len() as f32
    };

    clamp01(0.5 * overlap + exact + bigram)
}

fn bigrams(text: &str) -> HashSet<(String, String)> {
    let tokens = tokenize(text);
    tokens
        .windows(2)
        .map(|w| (w[0].clone(), w[1].clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relevant_candidate_scores_higher() {
        let reranker = Reranker::new(500);
        let scores = reranker
            .score(
                "postgres connection pool timeout",
                &[
                    "increase the postgres connection pool size to fix timeout errors",
                    "react useState hooks tutorial for beginners",
                ],
            )
            .unwrap();
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn exact_phrase_match_boosts() {
        let reranker = Reranker::new(500);
        let scores = reranker
            .score(
                "connection timeout",
                &[
                    "we hit a connection timeout in production",
                    "timeout happened, connection was dropped later",
                ],
            )
            .unwrap();
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn zero_budget_falls_through() {
        let reranker = Reranker::new(0);
        assert!(reranker
            .score("anything at all", &["some candidate text"])
            .is_none());
    }

    #[test]
    fn scores_are_bounded() {
        let reranker = Reranker::new(500);
        let scores = reranker
            .score("alpha beta", &["alpha beta", "", "gamma delta"])
            .unwrap();
        for s in scores {
            assert!((0.0..=1.0).contains(&s));
        }
    }

    #[test]
    fn blend_is_monotonic_in_cross_encoder() {
        let low = Reranker::blend(0.5, 0.2);
        let high = Reranker::blend(0.5, 0.9);
        assert!(high > low);
    }
}
