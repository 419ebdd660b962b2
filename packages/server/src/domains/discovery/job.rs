//! Process-local discovery jobs and their registry.
//!
//! Jobs are never persisted: they live in the registry for the duration of a
//! discovery run plus a grace period, then get garbage collected. The
//! registry is the single writer for job state, so counter updates, terminal
//! transitions and subscribe operations stay atomic relative to each other.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::common::GeoPoint;

/// Job lifecycle status. Transitions are monotonic:
/// running → completed | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct JobCounters {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// One end-to-end discovery over a region.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryJob {
    pub job_id: Uuid,
    pub query: String,
    pub center: GeoPoint,
    pub radius_m: f64,
    pub status: JobStatus,
    pub urls_found: usize,
    pub counters: JobCounters,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl DiscoveryJob {
    pub fn new(job_id: Uuid, query: String, center: GeoPoint, radius_m: f64) -> Self {
        Self {
            job_id,
            query,
            center,
            radius_m,
            status: JobStatus::Running,
            urls_found: 0,
            counters: JobCounters::default(),
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Stream-hub topic for this job's events.
    pub fn topic(&self) -> String {
        job_topic(self.job_id)
    }
}

pub fn job_topic(job_id: Uuid) -> String {
    format!("discovery:{job_id}")
}

struct JobEntry {
    job: DiscoveryJob,
    cancel: CancellationToken,
    /// When the last progress event went out (coalescing).
    last_progress: Instant,
    /// When the job reached a terminal state (for GC).
    finished: Option<Instant>,
    /// Whether any subscriber ever attached (arms the idle watcher).
    ever_subscribed: bool,
}

/// In-memory registry of running and recently finished jobs.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<Uuid, JobEntry>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new running job and return its root cancellation token.
    pub fn insert(&self, job: DiscoveryJob) -> CancellationToken {
        let cancel = CancellationToken::new();
        let entry = JobEntry {
            job,
            cancel: cancel.clone(),
            last_progress: Instant::now(),
            finished: None,
            ever_subscribed: false,
        };
        self.jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(entry.job.job_id, entry);
        cancel
    }

    /// Snapshot of a job's current state.
    pub fn get(&self, job_id: Uuid) -> Option<DiscoveryJob> {
        self.jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&job_id)
            .map(|e| e.job.clone())
    }

    pub fn cancel_token(&self, job_id: Uuid) -> Option<CancellationToken> {
        self.jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&job_id)
            .map(|e| e.cancel.clone())
    }

    /// Cancel a job's root token. Idempotent; returns false for unknown jobs.
    pub fn cancel(&self, job_id: Uuid) -> bool {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        match jobs.get(&job_id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Record that a subscriber attached at least once.
    pub fn mark_subscribed(&self, job_id: Uuid) {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = jobs.get_mut(&job_id) {
            entry.ever_subscribed = true;
        }
    }

    pub fn ever_subscribed(&self, job_id: Uuid) -> bool {
        self.jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&job_id)
            .map(|e| e.ever_subscribed)
            .unwrap_or(false)
    }

    pub fn set_urls_found(&self, job_id: Uuid, urls_found: usize) {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = jobs.get_mut(&job_id) {
            entry.job.urls_found = urls_found;
        }
    }

    pub fn record_success(&self, job_id: Uuid) -> JobCounters {
        self.update_counters(job_id, |c| c.succeeded += 1)
    }

    pub fn record_failure(&self, job_id: Uuid) -> JobCounters {
        self.update_counters(job_id, |c| c.failed += 1)
    }

    pub fn record_skipped(&self, job_id: Uuid) -> JobCounters {
        self.update_counters(job_id, |c| c.skipped += 1)
    }

    fn update_counters(&self, job_id: Uuid, update: impl FnOnce(&mut JobCounters)) -> JobCounters {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        match jobs.get_mut(&job_id) {
            Some(entry) => {
                update(&mut entry.job.counters);
                entry.job.counters
            }
            None => JobCounters::default(),
        }
    }

    /// Whether a progress event is due; updates the coalescing clock when it
    /// is, so concurrent workers cannot double-emit inside the window.
    pub fn progress_due(&self, job_id: Uuid, min_interval: Duration) -> Option<DiscoveryJob> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let entry = jobs.get_mut(&job_id)?;
        if entry.last_progress.elapsed() < min_interval {
            return None;
        }
        entry.last_progress = Instant::now();
        Some(entry.job.clone())
    }

    /// Move a job to a terminal state. The first transition wins; later calls
    /// return the already-terminal snapshot.
    pub fn finish(&self, job_id: Uuid, status: JobStatus) -> Option<DiscoveryJob> {
        debug_assert!(status.is_terminal());
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let entry = jobs.get_mut(&job_id)?;
        if !entry.job.status.is_terminal() {
            entry.job.status = status;
            entry.job.finished_at = Some(Utc::now());
            entry.finished = Some(Instant::now());
        }
        Some(entry.job.clone())
    }

    /// Drop terminal jobs older than the grace period. Returns removed count.
    pub fn gc(&self, grace: Duration) -> usize {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let before = jobs.len();
        jobs.retain(|_, entry| match entry.finished {
            Some(finished) => finished.elapsed() < grace,
            None => true,
        });
        before - jobs.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> DiscoveryJob {
        DiscoveryJob::new(
            Uuid::new_v4(),
            "Denver".to_string(),
            GeoPoint::new(39.739, -104.990),
            8000.0,
        )
    }

    #[test]
    fn insert_and_snapshot() {
        let registry = JobRegistry::new();
        let job = sample_job();
        let job_id = job.job_id;
        registry.insert(job);

        let snapshot = registry.get(job_id).unwrap();
        assert_eq!(snapshot.status, JobStatus::Running);
        assert_eq!(snapshot.urls_found, 0);
    }

    #[test]
    fn counters_accumulate() {
        let registry = JobRegistry::new();
        let job = sample_job();
        let job_id = job.job_id;
        registry.insert(job);

        registry.record_success(job_id);
        registry.record_success(job_id);
        registry.record_failure(job_id);
        let counters = registry.record_skipped(job_id);

        assert_eq!(counters.succeeded, 2);
        assert_eq!(counters.failed, 1);
        assert_eq!(counters.skipped, 1);
    }

    #[test]
    fn finish_is_monotonic() {
        let registry = JobRegistry::new();
        let job = sample_job();
        let job_id = job.job_id;
        registry.insert(job);

        let finished = registry.finish(job_id, JobStatus::Failed).unwrap();
        assert_eq!(finished.status, JobStatus::Failed);

        // A later transition does not overwrite the first terminal state.
        let again = registry.finish(job_id, JobStatus::Completed).unwrap();
        assert_eq!(again.status, JobStatus::Failed);
        assert_eq!(again.finished_at, finished.finished_at);
    }

    #[test]
    fn cancel_is_idempotent() {
        let registry = JobRegistry::new();
        let job = sample_job();
        let job_id = job.job_id;
        let token = registry.insert(job);

        assert!(registry.cancel(job_id));
        assert!(registry.cancel(job_id));
        assert!(token.is_cancelled());
        assert!(!registry.cancel(Uuid::new_v4()));
    }

    #[test]
    fn progress_coalesces_within_window() {
        let registry = JobRegistry::new();
        let job = sample_job();
        let job_id = job.job_id;
        registry.insert(job);

        // First check immediately after insert is inside the window.
        assert!(registry
            .progress_due(job_id, Duration::from_secs(60))
            .is_none());
        // A zero window is always due, and due again right after.
        assert!(registry.progress_due(job_id, Duration::ZERO).is_some());
        assert!(registry.progress_due(job_id, Duration::ZERO).is_some());
    }

    #[test]
    fn gc_removes_only_stale_terminal_jobs() {
        let registry = JobRegistry::new();
        let running = sample_job();
        let running_id = running.job_id;
        registry.insert(running);

        let done = sample_job();
        let done_id = done.job_id;
        registry.insert(done);
        registry.finish(done_id, JobStatus::Completed);

        // Grace not yet elapsed: nothing removed.
        assert_eq!(registry.gc(Duration::from_secs(60)), 0);
        // Zero grace: terminal job removed, running job kept.
        assert_eq!(registry.gc(Duration::ZERO), 1);
        assert!(registry.get(running_id).is_some());
        assert!(registry.get(done_id).is_none());
    }
}
