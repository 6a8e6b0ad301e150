//! Property-based tests
//!
//! Invariants that must hold for all inputs:
//! - scores stay clamped, embeddings stay normalized
//! - validation and filters never panic
//! - similarity functions stay bounded and symmetric
//!
//! Run with: cargo test --test property_tests

use proptest::prelude::*;

mod scoring_props {
    use super::*;
    use mnemos::scoring::emotional_weight;
    use mnemos::types::{clamp01, clamp_signed};

    proptest! {
        /// clamp01 output is always in [0, 1]
        #[test]
        fn clamp01_bounds(v in -1000.0_f32..1000.0) {
            let c = clamp01(v);
            prop_assert!((0.0..=1.0).contains(&c));
        }

        /// clamp_signed output is always in [-1, 1]
        #[test]
        fn clamp_signed_bounds(v in -1000.0_f32..1000.0) {
            let c = clamp_signed(v);
            prop_assert!((-1.0..=1.0).contains(&c));
        }

        /// The lexicon scan never panics and stays in [-1, 1]
        #[test]
        fn emotional_weight_bounded(content in "\\PC{0,400}") {
            let w = emotional_weight(&content);
            prop_assert!((-1.0..=1.0).contains(&w));
        }
    }
}

mod embedding_props {
    use super::*;
    use mnemos::embedding::sparse::tokenize;
    use mnemos::embedding::{cosine_similarity, Embedder, HashedEmbedder, SparseVector};

    proptest! {
        /// Tokenization never panics on any input
        #[test]
        fn tokenize_never_panics(text in "\\PC{0,300}") {
            let _ = tokenize(&text);
        }

        /// Dense embeddings of non-trivial text are unit length
        #[test]
        fn dense_is_normalized(text in "[a-z]{2,12}( [a-z]{2,12}){0,20}") {
            let embedder = HashedEmbedder::new(64);
            if let Ok(e) = embedder.embed(&text) {
                let norm: f32 = e.dense.iter().map(|x| x * x).sum::<f32>().sqrt();
                prop_assert!((norm - 1.0).abs() < 1e-4);
                prop_assert_eq!(e.dense.len(), 64);
            }
        }

        /// Embedding is deterministic
        #[test]
        fn embedding_deterministic(text in "[a-z]{2,12}( [a-z]{2,12}){0,10}") {
            let embedder = HashedEmbedder::new(64);
            let a = embedder.embed(&text);
            let b = embedder.embed(&text);
            match (a, b) {
                (Ok(a), Ok(b)) => {
                    prop_assert_eq!(a.dense, b.dense);
                    prop_assert_eq!(a.sparse, b.sparse);
                }
                (Err(_), Err(_)) => {}
                _ => prop_assert!(false, "determinism broken across calls"),
            }
        }

        /// Cosine similarity is bounded and symmetric
        #[test]
        fn cosine_bounded_and_symmetric(
            a in prop::collection::vec(-10.0_f32..10.0, 16),
            b in prop::collection::vec(-10.0_f32..10.0, 16),
        ) {
            let ab = cosine_similarity(&a, &b);
            let ba = cosine_similarity(&b, &a);
            prop_assert!((-1.0001..=1.0001).contains(&ab));
            prop_assert!((ab - ba).abs() < 1e-5);
        }

        /// Sparse cosine stays in [0, 1] and is symmetric
        #[test]
        fn sparse_cosine_bounded(
            t1 in "[a-z]{2,10}( [a-z]{2,10}){0,15}",
            t2 in "[a-z]{2,10}( [a-z]{2,10}){0,15}",
        ) {
            let a = SparseVector::from_text(&t1);
            let b = SparseVector::from_text(&t2);
            let ab = a.cosine(&b);
            prop_assert!((0.0..=1.0001).contains(&ab));
            prop_assert!((ab - b.cosine(&a)).abs() < 1e-5);
        }
    }
}

mod validation_props {
    use super::*;
    use mnemos::collection::validate::{content_hash, quality_heuristic, validate_create};
    use mnemos::types::{CreateMemoryInput, MemoryType};

    proptest! {
        /// Validation never panics, whatever the payload looks like
        #[test]
        fn validate_never_panics(
            content in "\\PC{0,200}",
            type_idx in 0usize..6,
        ) {
            let input = CreateMemoryInput {
                content,
                memory_type: MemoryType::all()[type_idx],
                ..Default::default()
            };
            let _ = validate_create(&input);
        }

        /// Context memories are accepted exactly at the length boundary
        #[test]
        fn context_boundary(extra in 0usize..40) {
            let input = CreateMemoryInput {
                content: "x".repeat(30 + extra),
                memory_type: MemoryType::Context,
                ..Default::default()
            };
            prop_assert!(validate_create(&input).is_ok());
        }

        /// Hashing is whitespace-insensitive and deterministic
        #[test]
        fn content_hash_stable(words in prop::collection::vec("[a-z]{1,8}", 1..12)) {
            let single = words.join(" ");
            let double = words.join("  ");
            prop_assert_eq!(content_hash(&single), content_hash(&double));
        }

        /// Quality heuristic stays in [0, 1]
        #[test]
        fn quality_bounded(content in "\\PC{0,2000}") {
            let q = quality_heuristic(&content);
            prop_assert!((0.0..=1.0).contains(&q));
        }
    }
}

mod filter_props {
    use super::*;
    use mnemos::MemoryFilter;

    proptest! {
        /// Arbitrary single-key objects with unknown keys are rejected
        #[test]
        fn unknown_keys_rejected(key in "[a-z]{3,12}") {
            let known = [
                "type", "memory_type", "project", "tags", "created_after",
                "created_before", "pinned", "resolved", "min_importance",
                "include_archived", "include_superseded",
            ];
            prop_assume!(!known.contains(&key.as_str()));
            let value = serde_json::json!({ key: "anything" });
            prop_assert!(MemoryFilter::from_json(&value).is_err());
        }

        /// Signatures are deterministic and order-insensitive for tags
        #[test]
        fn signature_stable(mut tags in prop::collection::vec("[a-z]{1,6}", 0..6)) {
            let a = MemoryFilter { tags: Some(tags.clone()), ..Default::default() };
            tags.reverse();
            let b = MemoryFilter { tags: Some(tags), ..Default::default() };
            prop_assert_eq!(a.signature(), b.signature());
        }
    }
}

mod coaccess_props {
    use super::*;
    use mnemos::inference::CoAccessTracker;

    proptest! {
        /// Tracking never panics and promoted pairs are always ordered
        #[test]
        fn promoted_pairs_ordered(
            ids in prop::collection::vec("[a-f]{1,3}", 0..8),
            threshold in 1u32..4,
        ) {
            let tracker = CoAccessTracker::new(threshold);
            for _ in 0..threshold {
                for (a, b) in tracker.track(&ids) {
                    prop_assert!(a <= b);
                }
            }
        }
    }
}
