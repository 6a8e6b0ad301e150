//! Scheduled job bodies
//!
//! Each job takes `now` from the caller so the scheduler and tests control
//! the clock. Jobs page through the store (100 memories at a time), tolerate
//! per-memory failures, and report what they touched.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use tracing::{debug, warn};

use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::inference::{self, SweepReport};
use crate::lifecycle;
use crate::scoring;
use crate::session::{propose_tunables, MetaObservation};
use crate::store::MemoryFilter;
use crate::types::{clamp01, EdgeType, Memory, MemoryType, Relationship};

use super::MemoryCollection;

/// Memories processed per page
pub const PAGE_SIZE: usize = 100;
/// Sample size of the memory-replay job
const REPLAY_SAMPLE: usize = 20;
/// High-importance floor for replay sampling
const REPLAY_IMPORTANCE_FLOOR: f32 = 0.7;
/// Same-type similarity floor for interference detection
const INTERFERENCE_FLOOR: f32 = 0.85;
/// Strength gained by a spaced-repetition review
const REVIEW_BOOST: f32 = 0.1;

/// Cues suggesting one memory contradicts another
static NEGATION_CUES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "not ", "no longer", "instead", "deprecated", "avoid", "never", "don't", "do not",
        "stop using", "rather than",
    ]
});

/// Outcome of a maintenance job
#[derive(Debug, Default, Clone, Copy)]
pub struct JobReport {
    pub processed: usize,
    pub mutated: usize,
    pub failures: usize,
}

impl MemoryCollection {
    /// relationship_inference: scheduled semantic + causal sweeps, plus the
    /// graph orphan repair
    pub async fn run_relationship_inference(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let tunables = self.tunables();
        let embedder = self.embedder();
        Ok(self.inference_ref().full_sweep(
            embedder.as_ref(),
            self.store_ref(),
            self.graph_ref(),
            tunables.semantic_floor,
            self.config().fixes_floor,
            now,
            PAGE_SIZE,
        ))
    }

    /// adaptive_importance: recompute importance from access statistics
    pub async fn run_adaptive_importance(&self, now: DateTime<Utc>) -> Result<JobReport> {
        let mut report = JobReport::default();
        self.for_each_page(|collection, memory| {
            if memory.state == crate::types::MemoryState::Archived {
                return Ok(false);
            }
            let recomputed = scoring::adaptive_importance(memory, now);
            if (recomputed - memory.importance).abs() < 1e-3 {
                return Ok(false);
            }
            collection.store_ref().set_scores(
                &memory.id,
                recomputed,
                memory.strength,
                memory.emotional_weight,
            )?;
            Ok(true)
        }, &mut report)?;
        debug!(?report, "adaptive importance complete");
        Ok(report)
    }

    /// utility_archival: apply the forgetting curve, archive sustained
    /// low-utility memories, forget the fully decayed
    pub async fn run_utility_archival(&self, now: DateTime<Utc>) -> Result<JobReport> {
        let mut report = JobReport::default();
        let retention = self.config().retention_window_days;
        let epsilon = self.config().strength_epsilon;

        let mut offset = 0;
        loop {
            let page = self.store_ref().page(offset, PAGE_SIZE)?;
            if page.is_empty() {
                break;
            }
            offset += page.len();

            for memory in &page {
                report.processed += 1;
                let result: Result<bool> = (|| {
                    let mut current = memory.clone();

                    if let Some(decayed) = scoring::apply_forgetting(&current, now) {
                        if (decayed - current.strength).abs() > 1e-4 {
                            self.store_ref().set_scores(
                                &current.id,
                                current.importance,
                                decayed,
                                current.emotional_weight,
                            )?;
                            current.strength = decayed;
                        }
                    }

                    if lifecycle::forget_due(&current, now, epsilon, retention) {
                        self.store_ref().delete(&current.id)?;
                        if let Some(graph) = self.graph_ref() {
                            if let Err(e) = graph.delete_node(&current.id) {
                                warn!(memory_id = %current.id, "graph removal failed: {}", e);
                            }
                        }
                        self.inference_ref().coaccess.forget(&current.id);
                        return Ok(true);
                    }

                    if lifecycle::archival_due(&current, now, retention) {
                        self.store_ref().set_state(
                            &current.id,
                            crate::types::MemoryState::Archived,
                            now,
                        )?;
                        return Ok(true);
                    }

                    Ok(false)
                })();
                match result {
                    Ok(true) => report.mutated += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!(memory_id = %memory.id, "archival item failed: {}", e);
                        report.failures += 1;
                    }
                }
            }
        }

        debug!(?report, "utility archival complete");
        Ok(report)
    }

    /// consolidation: merge near-duplicates of the same type; the newer one
    /// supersedes the older
    pub async fn run_consolidation(&self, now: DateTime<Utc>) -> Result<JobReport> {
        let mut report = JobReport::default();
        let threshold = self.config().consolidation_similarity;

        let mut offset = 0;
        loop {
            // Pairs are compared within a page; across-page duplicates are
            // caught by later runs as pages shift
            let page = self
                .store_ref()
                .scroll(&MemoryFilter::default(), PAGE_SIZE, offset)?;
            if page.is_empty() {
                break;
            }
            offset += page.len();
            report.processed += page.len();

            let mut by_type: HashMap<MemoryType, Vec<&Memory>> = HashMap::new();
            for memory in &page {
                by_type.entry(memory.memory_type).or_default().push(memory);
            }

            let mut vectors: HashMap<String, Vec<f32>> = HashMap::new();

            for group in by_type.values() {
                for i in 0..group.len() {
                    for j in (i + 1)..group.len() {
                        let (a, b) = (group[i], group[j]);
                        match self.consolidate_pair(a, b, threshold, &mut vectors, now) {
                            Ok(true) => report.mutated += 1,
                            Ok(false) => {}
                            Err(e) => {
                                warn!("consolidation pair failed: {}", e);
                                report.failures += 1;
                            }
                        }
                    }
                }
            }
        }

        debug!(?report, "consolidation complete");
        Ok(report)
    }

    fn consolidate_pair(
        &self,
        a: &Memory,
        b: &Memory,
        threshold: f32,
        vectors: &mut HashMap<String, Vec<f32>>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let same_hash = match (&a.content_hash, &b.content_hash) {
            (Some(ha), Some(hb)) => ha == hb,
            _ => false,
        };

        let duplicate = same_hash || {
            let va = self.dense_for(&a.id, vectors)?;
            let vb = self.dense_for(&b.id, vectors)?;
            match (va, vb) {
                (Some(va), Some(vb)) => cosine_similarity(&va, &vb) >= threshold,
                _ => false,
            }
        };
        if !duplicate {
            return Ok(false);
        }

        let (newer, older) = if (a.created_at, &a.id) >= (b.created_at, &b.id) {
            (a, b)
        } else {
            (b, a)
        };

        if inference::edge_exists(
            &newer.id,
            &older.id,
            EdgeType::Supersedes,
            self.store_ref(),
            self.graph_ref(),
        ) {
            return Ok(false);
        }

        let edge = Relationship {
            source_id: newer.id.clone(),
            target_id: older.id.clone(),
            edge_type: EdgeType::Supersedes,
            confidence: 0.9,
            created_at: now,
        };
        inference::persist_edge(&edge, self.store_ref(), self.graph_ref())?;
        self.store_ref().set_superseded(&older.id, true)?;
        Ok(true)
    }

    fn dense_for(
        &self,
        id: &str,
        memo: &mut HashMap<String, Vec<f32>>,
    ) -> Result<Option<Vec<f32>>> {
        if let Some(v) = memo.get(id) {
            return Ok(Some(v.clone()));
        }
        match self.store_ref().vectors(id)? {
            Some((dense, _)) => {
                memo.insert(id.to_string(), dense.clone());
                Ok(Some(dense))
            }
            None => Ok(None),
        }
    }

    /// spaced_repetition: reinforce memories whose review interval elapsed
    ///
    /// The interval doubles with each recorded access, so well-known
    /// memories are reviewed rarely.
    pub async fn run_spaced_repetition(&self, now: DateTime<Utc>) -> Result<JobReport> {
        let mut report = JobReport::default();
        self.for_each_page(|collection, memory| {
            if memory.pinned || memory.state == crate::types::MemoryState::Archived {
                return Ok(false);
            }
            let reference = memory.last_accessed.unwrap_or(memory.created_at);
            let interval_hours = 24_i64 << memory.access_count.clamp(0, 6);
            if (now - reference) < Duration::hours(interval_hours) {
                return Ok(false);
            }
            let reviewed = clamp01(memory.strength + REVIEW_BOOST);
            if (reviewed - memory.strength).abs() < 1e-4 {
                return Ok(false);
            }
            collection.store_ref().set_scores(
                &memory.id,
                memory.importance,
                reviewed,
                memory.emotional_weight,
            )?;
            Ok(true)
        }, &mut report)?;
        debug!(?report, "spaced repetition complete");
        Ok(report)
    }

    /// memory_replay: re-run semantic inference on a sample of
    /// high-importance memories
    pub async fn run_memory_replay(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let filter = MemoryFilter {
            min_importance: Some(REPLAY_IMPORTANCE_FLOOR),
            ..Default::default()
        };
        let mut candidates = self.store_ref().scroll(&filter, 500, 0)?;
        candidates.shuffle(&mut rand::thread_rng());
        candidates.truncate(REPLAY_SAMPLE);

        let tunables = self.tunables();
        let mut report = SweepReport::default();

        for memory in &candidates {
            report.scanned += 1;
            let result: Result<usize> = (|| {
                let Some((dense, _)) = self.store_ref().vectors(&memory.id)? else {
                    return Ok(0);
                };
                let outcome = self.inference_ref().on_write(
                    memory,
                    &dense,
                    self.store_ref(),
                    self.graph_ref(),
                    tunables.semantic_floor,
                    self.config().fixes_floor,
                    now,
                )?;
                Ok(outcome.edges.len())
            })();
            match result {
                Ok(n) => report.edges_created += n,
                Err(e) => {
                    warn!(memory_id = %memory.id, "replay item failed: {}", e);
                    report.failures += 1;
                }
            }
        }

        debug!(?report, "memory replay complete");
        Ok(report)
    }

    /// emotional_analysis: refresh emotional weights and the importance
    /// adjustments they imply
    pub async fn run_emotional_analysis(&self, _now: DateTime<Utc>) -> Result<JobReport> {
        let threshold = self.tunables().emotional_threshold;
        let mut report = JobReport::default();
        self.for_each_page(|collection, memory| {
            let weight = scoring::emotional_weight(&memory.content);
            let delta = scoring::emotional_importance_delta(memory.memory_type, weight, threshold);
            let importance = clamp01(memory.importance + delta);
            if (weight - memory.emotional_weight).abs() < 1e-3
                && (importance - memory.importance).abs() < 1e-3
            {
                return Ok(false);
            }
            collection
                .store_ref()
                .set_scores(&memory.id, importance, memory.strength, weight)?;
            Ok(true)
        }, &mut report)?;
        debug!(?report, "emotional analysis complete");
        Ok(report)
    }

    /// interference_detection: contradicting same-type pairs; the newer or
    /// more important side supersedes the other
    pub async fn run_interference_detection(&self, now: DateTime<Utc>) -> Result<JobReport> {
        let mut report = JobReport::default();

        let mut offset = 0;
        loop {
            let page = self
                .store_ref()
                .scroll(&MemoryFilter::default(), PAGE_SIZE, offset)?;
            if page.is_empty() {
                break;
            }
            offset += page.len();
            report.processed += page.len();

            let mut by_type: HashMap<MemoryType, Vec<&Memory>> = HashMap::new();
            for memory in &page {
                by_type.entry(memory.memory_type).or_default().push(memory);
            }

            let mut vectors: HashMap<String, Vec<f32>> = HashMap::new();

            for group in by_type.values() {
                for i in 0..group.len() {
                    for j in (i + 1)..group.len() {
                        let (a, b) = (group[i], group[j]);
                        if negation_count(&a.content) == negation_count(&b.content) {
                            continue;
                        }
                        let result: Result<bool> = (|| {
                            let va = self.dense_for(&a.id, &mut vectors)?;
                            let vb = self.dense_for(&b.id, &mut vectors)?;
                            let (Some(va), Some(vb)) = (va, vb) else {
                                return Ok(false);
                            };
                            if cosine_similarity(&va, &vb) < INTERFERENCE_FLOOR {
                                return Ok(false);
                            }

                            let (winner, loser) = if a.importance != b.importance {
                                if a.importance > b.importance {
                                    (a, b)
                                } else {
                                    (b, a)
                                }
                            } else if a.created_at >= b.created_at {
                                (a, b)
                            } else {
                                (b, a)
                            };

                            if inference::edge_exists(
                                &winner.id,
                                &loser.id,
                                EdgeType::Supersedes,
                                self.store_ref(),
                                self.graph_ref(),
                            ) {
                                return Ok(false);
                            }

                            let edge = Relationship {
                                source_id: winner.id.clone(),
                                target_id: loser.id.clone(),
                                edge_type: EdgeType::Supersedes,
                                confidence: 0.8,
                                created_at: now,
                            };
                            inference::persist_edge(&edge, self.store_ref(), self.graph_ref())?;
                            self.store_ref().set_superseded(&loser.id, true)?;
                            Ok(true)
                        })();
                        match result {
                            Ok(true) => report.mutated += 1,
                            Ok(false) => {}
                            Err(e) => {
                                warn!("interference pair failed: {}", e);
                                report.failures += 1;
                            }
                        }
                    }
                }
            }
        }

        debug!(?report, "interference detection complete");
        Ok(report)
    }

    /// meta_learning: observe aggregate statistics, shift the tunable
    /// thresholds within bounds, and record a metric snapshot
    pub async fn run_meta_learning(&self, now: DateTime<Utc>) -> Result<JobReport> {
        let filter = MemoryFilter {
            include_archived: true,
            include_superseded: true,
            ..Default::default()
        };
        let sample = self.store_ref().scroll(&filter, 500, 0)?;

        let current = self.tunables();
        let observation = MetaObservation::from_memories(&sample, now, current.emotional_threshold);
        let proposed = propose_tunables(&observation, &current);

        self.store_ref().record_metrics(
            now,
            observation.avg_importance,
            observation.avg_access_rate,
            observation.emotional_coverage,
            proposed.cache_similarity_threshold,
            proposed.semantic_floor,
            proposed.emotional_threshold,
        )?;
        *self.tunables_lock().write() = proposed;

        // Opportunistic cache hygiene while we are here
        self.cache_ref().remove_expired();

        Ok(JobReport {
            processed: sample.len(),
            mutated: 1,
            failures: 0,
        })
    }

    /// Shared paging loop for per-memory jobs
    fn for_each_page<F>(&self, mut visit: F, report: &mut JobReport) -> Result<()>
    where
        F: FnMut(&MemoryCollection, &Memory) -> Result<bool>,
    {
        let mut offset = 0;
        loop {
            let page = self.store_ref().page(offset, PAGE_SIZE)?;
            if page.is_empty() {
                break;
            }
            offset += page.len();

            for memory in &page {
                report.processed += 1;
                match visit(self, memory) {
                    Ok(true) => report.mutated += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!(memory_id = %memory.id, "job item failed: {}", e);
                        report.failures += 1;
                    }
                }
            }
        }
        Ok(())
    }
}

fn negation_count(content: &str) -> usize {
    let lower = content.to_lowercase();
    NEGATION_CUES.iter().filter(|cue| lower.contains(*cue)).count()
}
