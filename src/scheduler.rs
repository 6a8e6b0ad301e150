//! Background maintenance scheduler
//!
//! Runs the named jobs on fixed intervals inside the process's async
//! runtime. Runs of the same job are serialized (the scheduled loop and
//! manual triggers share a per-job lock); different jobs run independently.
//! A failing job is counted and retried at its next tick, never stopping
//! the scheduler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::collection::MemoryCollection;
use crate::config::JobIntervals;
use crate::error::{MemoryError, Result};

/// The named maintenance jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    RelationshipInference,
    AdaptiveImportance,
    UtilityArchival,
    Consolidation,
    SpacedRepetition,
    MemoryReplay,
    EmotionalAnalysis,
    InterferenceDetection,
    MetaLearning,
}

impl JobKind {
    pub fn all() -> &'static [JobKind] {
        &[
            JobKind::RelationshipInference,
            JobKind::AdaptiveImportance,
            JobKind::UtilityArchival,
            JobKind::Consolidation,
            JobKind::SpacedRepetition,
            JobKind::MemoryReplay,
            JobKind::EmotionalAnalysis,
            JobKind::InterferenceDetection,
            JobKind::MetaLearning,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::RelationshipInference => "relationship_inference",
            JobKind::AdaptiveImportance => "adaptive_importance",
            JobKind::UtilityArchival => "utility_archival",
            JobKind::Consolidation => "consolidation",
            JobKind::SpacedRepetition => "spaced_repetition",
            JobKind::MemoryReplay => "memory_replay",
            JobKind::EmotionalAnalysis => "emotional_analysis",
            JobKind::InterferenceDetection => "interference_detection",
            JobKind::MetaLearning => "meta_learning",
        }
    }

    pub fn interval_secs(&self, intervals: &JobIntervals) -> u64 {
        match self {
            JobKind::RelationshipInference => intervals.relationship_inference,
            JobKind::AdaptiveImportance => intervals.adaptive_importance,
            JobKind::UtilityArchival => intervals.utility_archival,
            JobKind::Consolidation => intervals.consolidation,
            JobKind::SpacedRepetition => intervals.spaced_repetition,
            JobKind::MemoryReplay => intervals.memory_replay,
            JobKind::EmotionalAnalysis => intervals.emotional_analysis,
            JobKind::InterferenceDetection => intervals.interference_detection,
            JobKind::MetaLearning => intervals.meta_learning,
        }
    }
}

impl std::str::FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        JobKind::all()
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown job: {}", s))
    }
}

struct JobState {
    runs: AtomicU64,
    failures: AtomicU64,
    item_failures: AtomicU64,
    last_run: Mutex<Option<DateTime<Utc>>>,
    serialize: tokio::sync::Mutex<()>,
}

impl JobState {
    fn new() -> Self {
        Self {
            runs: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            item_failures: AtomicU64::new(0),
            last_run: Mutex::new(None),
            serialize: tokio::sync::Mutex::new(()),
        }
    }
}

/// Counters for one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub name: String,
    pub runs: u64,
    pub failures: u64,
    pub item_failures: u64,
    pub last_run: Option<DateTime<Utc>>,
}

/// Named-job scheduler over the collection's maintenance work
pub struct Scheduler {
    collection: Arc<MemoryCollection>,
    jobs: Arc<HashMap<JobKind, JobState>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(collection: Arc<MemoryCollection>) -> Self {
        let jobs = JobKind::all()
            .iter()
            .map(|&kind| (kind, JobState::new()))
            .collect();
        Self {
            collection,
            jobs: Arc::new(jobs),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the interval loops; a no-op when the scheduler is disabled
    pub fn start(&self) {
        if !self.collection.config().scheduler_enabled {
            info!("scheduler disabled by configuration");
            return;
        }

        let intervals = self.collection.config().job_intervals.clone();
        let mut handles = self.handles.lock();

        for &kind in JobKind::all() {
            let secs = kind.interval_secs(&intervals).max(1);
            let collection = Arc::clone(&self.collection);
            let jobs = Arc::clone(&self.jobs);

            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(secs));
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // The first tick completes immediately; skip it so startup
                // is not a thundering herd of maintenance
                ticker.tick().await;

                loop {
                    ticker.tick().await;
                    run_serialized(&collection, &jobs, kind).await;
                }
            }));
        }

        info!(jobs = JobKind::all().len(), "scheduler started");
    }

    /// Manual trigger, serialized against the scheduled loop
    pub async fn trigger(&self, kind: JobKind) -> Result<()> {
        if !self.jobs.contains_key(&kind) {
            return Err(MemoryError::Job(format!("unknown job {}", kind.as_str())));
        }
        run_serialized(&self.collection, &self.jobs, kind).await;
        Ok(())
    }

    /// Per-job counters
    pub fn snapshot(&self) -> Vec<JobSnapshot> {
        JobKind::all()
            .iter()
            .map(|kind| {
                let state = &self.jobs[kind];
                JobSnapshot {
                    name: kind.as_str().to_string(),
                    runs: state.runs.load(Ordering::Relaxed),
                    failures: state.failures.load(Ordering::Relaxed),
                    item_failures: state.item_failures.load(Ordering::Relaxed),
                    last_run: *state.last_run.lock(),
                }
            })
            .collect()
    }

    /// Abort the interval loops
    pub fn shutdown(&self) {
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
        info!("scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_serialized(
    collection: &MemoryCollection,
    jobs: &HashMap<JobKind, JobState>,
    kind: JobKind,
) {
    let Some(state) = jobs.get(&kind) else {
        return;
    };
    let _guard = state.serialize.lock().await;
    let now = Utc::now();

    match execute(collection, kind, now).await {
        Ok(item_failures) => {
            state.runs.fetch_add(1, Ordering::Relaxed);
            state.item_failures.fetch_add(item_failures, Ordering::Relaxed);
            *state.last_run.lock() = Some(now);
            debug!(job = kind.as_str(), "job run complete");
        }
        Err(e) => {
            state.failures.fetch_add(1, Ordering::Relaxed);
            warn!(job = kind.as_str(), "job run failed: {}", e);
        }
    }
}

/// Dispatch one job run; returns the per-item failure count
async fn execute(
    collection: &MemoryCollection,
    kind: JobKind,
    now: DateTime<Utc>,
) -> Result<u64> {
    match kind {
        JobKind::RelationshipInference => Ok(collection
            .run_relationship_inference(now)
            .await?
            .failures as u64),
        JobKind::AdaptiveImportance => {
            Ok(collection.run_adaptive_importance(now).await?.failures as u64)
        }
        JobKind::UtilityArchival => Ok(collection.run_utility_archival(now).await?.failures as u64),
        JobKind::Consolidation => Ok(collection.run_consolidation(now).await?.failures as u64),
        JobKind::SpacedRepetition => {
            Ok(collection.run_spaced_repetition(now).await?.failures as u64)
        }
        JobKind::MemoryReplay => Ok(collection.run_memory_replay(now).await?.failures as u64),
        JobKind::EmotionalAnalysis => {
            Ok(collection.run_emotional_analysis(now).await?.failures as u64)
        }
        JobKind::InterferenceDetection => {
            Ok(collection.run_interference_detection(now).await?.failures as u64)
        }
        JobKind::MetaLearning => Ok(collection.run_meta_learning(now).await?.failures as u64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_names_round_trip() {
        for &kind in JobKind::all() {
            let parsed: JobKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("defragmentation".parse::<JobKind>().is_err());
    }

    #[test]
    fn intervals_match_configuration() {
        let intervals = JobIntervals::default();
        assert_eq!(
            JobKind::SpacedRepetition.interval_secs(&intervals),
            6 * 60 * 60
        );
        assert_eq!(
            JobKind::MemoryReplay.interval_secs(&intervals),
            12 * 60 * 60
        );
        assert_eq!(
            JobKind::MetaLearning.interval_secs(&intervals),
            7 * 24 * 60 * 60
        );
        assert_eq!(
            JobKind::Consolidation.interval_secs(&intervals),
            24 * 60 * 60
        );
    }
}
