//! Top-level discovery state machine.
//!
//! Owns the job registry and the per-job event streams. One `start_job` call
//! drives: places lookup → candidate partitioning → bounded-concurrency
//! ingestion → upserts → typed events, ending in exactly one `complete`.
//!
//! Concurrency model: a single worker semaphore bounds scrape/extract
//! parallelism across all jobs. Every long call suspends on the job's
//! cancellation token, so `stop_job`, the job timeout watchdog, and the
//! idle-subscriber watcher all converge on the same shutdown path: cancel the
//! token, let in-flight tasks return at their next suspension point, emit the
//! terminal event with counters as of that moment.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::{broadcast, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::common::{GeoPoint, PlaceCandidate};
use crate::domains::pantries::models::{Pantry, PantryDraft};
use crate::kernel::ServerDeps;

use super::events::DiscoveryEvent;
use super::job::{job_topic, DiscoveryJob, JobRegistry, JobStatus};
use super::pipeline::{self, IngestOutcome};
use super::places;

pub struct StartJobRequest {
    pub query: String,
    pub center: GeoPoint,
    pub radius_m: f64,
    /// Overrides the configured places variants when present and non-empty.
    pub variants: Option<Vec<String>>,
}

pub struct StartJobOutcome {
    pub job_id: Uuid,
    /// Pantries already stored within the requested radius.
    pub existing_pantries: i64,
    /// Stream-hub topic carrying this job's events.
    pub topic: String,
}

pub struct DiscoveryOrchestrator {
    deps: ServerDeps,
    registry: JobRegistry,
    workers: Arc<Semaphore>,
}

impl DiscoveryOrchestrator {
    pub fn new(deps: ServerDeps) -> Arc<Self> {
        let workers = Arc::new(Semaphore::new(deps.discovery.worker_concurrency));
        Arc::new(Self {
            deps,
            registry: JobRegistry::new(),
            workers,
        })
    }

    /// Create a job, kick off the discovery run, and return immediately.
    pub async fn start_job(self: &Arc<Self>, req: StartJobRequest) -> Result<StartJobOutcome> {
        let job_id = Uuid::new_v4();

        let existing_pantries = self
            .deps
            .store
            .count_within_radius(req.center, req.radius_m)
            .await
            .context("Failed to count existing pantries")?;

        let job = DiscoveryJob::new(job_id, req.query.clone(), req.center, req.radius_m);
        let topic = job.topic();
        let cancel = self.registry.insert(job);

        info!(
            job_id = %job_id,
            query = %req.query,
            lat = req.center.lat,
            lng = req.center.lng,
            radius_m = req.radius_m,
            existing = existing_pantries,
            "Discovery job started"
        );

        // Subscribers see activity before the places lookup resolves.
        self.publish(&topic, &DiscoveryEvent::JobStarted { urls_found: 0 });

        let variants = req
            .variants
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| self.deps.discovery.places_variants.clone());

        self.spawn_timeout_watchdog(job_id, topic.clone(), cancel.clone());
        self.spawn_idle_watcher(job_id, topic.clone(), cancel.clone());

        let orchestrator = Arc::clone(self);
        let run_topic = topic.clone();
        let center = req.center;
        let radius_m = req.radius_m;
        tokio::spawn(async move {
            let status = orchestrator
                .run_job(job_id, &run_topic, center, radius_m, &variants, &cancel)
                .await;

            if let Some(job) = orchestrator.registry.finish(job_id, status) {
                // The terminal event retires the topic: drained subscribers
                // see a closed channel, not an idle stream.
                orchestrator.deps.stream_hub.publish_final(
                    &run_topic,
                    event_json(&DiscoveryEvent::Complete {
                        found: job.counters.succeeded,
                        failed: job.counters.failed,
                        skipped: job.counters.skipped,
                    }),
                );
                info!(
                    job_id = %job_id,
                    status = ?job.status,
                    found = job.counters.succeeded,
                    failed = job.counters.failed,
                    skipped = job.counters.skipped,
                    "Discovery job finished"
                );
            }

            // Tear down the watchers.
            cancel.cancel();
        });

        Ok(StartJobOutcome {
            job_id,
            existing_pantries,
            topic,
        })
    }

    /// Cancel a job. Idempotent; false for unknown (or GC'd) jobs.
    pub fn stop_job(&self, job_id: Uuid) -> bool {
        self.registry.cancel(job_id)
    }

    /// Current snapshot of a job.
    pub fn job_status(&self, job_id: Uuid) -> Option<DiscoveryJob> {
        self.registry.get(job_id)
    }

    /// Attach to a job's event stream.
    ///
    /// Returns synthesized catch-up events (a `job_started` from current
    /// state, plus `complete` if the job already finished) and the live
    /// receiver. No per-pantry history is replayed.
    pub fn subscribe(
        &self,
        job_id: Uuid,
    ) -> Option<(Vec<serde_json::Value>, broadcast::Receiver<serde_json::Value>)> {
        // Receiver first: anything published after this point is live.
        let rx = self.deps.stream_hub.subscribe(&job_topic(job_id));
        let job = self.registry.get(job_id)?;
        self.registry.mark_subscribed(job_id);

        let mut initial = vec![event_json(&DiscoveryEvent::JobStarted {
            urls_found: job.urls_found,
        })];
        if job.status.is_terminal() {
            initial.push(event_json(&DiscoveryEvent::Complete {
                found: job.counters.succeeded,
                failed: job.counters.failed,
                skipped: job.counters.skipped,
            }));
        }

        Some((initial, rx))
    }

    /// Synchronously re-ingest one stored pantry and return the updated row.
    ///
    /// Falls back to the provider's website lookup when the row has no
    /// source URL. Rows without a `place_id` cannot be re-keyed and are
    /// returned unchanged.
    pub async fn ingest_pantry(&self, pantry_id: Uuid) -> Result<Option<Pantry>> {
        let Some(pantry) = self.deps.store.find_by_id(pantry_id).await? else {
            return Ok(None);
        };

        let Some(place_id) = pantry.place_id.clone() else {
            warn!(pantry_id = %pantry_id, "Pantry has no place_id; skipping re-ingest");
            return Ok(Some(pantry));
        };

        let website = match pantry.source_url.clone() {
            Some(url) => Some(url),
            None => self.deps.places.website_for(&place_id).await.unwrap_or(None),
        };

        let candidate = PlaceCandidate {
            place_id,
            name: pantry.name.clone(),
            formatted_address: pantry.address.clone().unwrap_or_default(),
            lat: pantry.latitude,
            lng: pantry.longitude,
            website,
        };

        let outcome =
            pipeline::ingest_candidate(&self.deps, &candidate, &CancellationToken::new()).await;
        let draft = match outcome {
            IngestOutcome::Enriched(draft) | IngestOutcome::PlacesOnly(draft) => draft,
            IngestOutcome::Dropped { reason, .. } => {
                anyhow::bail!("pantry {pantry_id} not ingestable: {reason}")
            }
            IngestOutcome::Cancelled => unreachable!("fresh token is never cancelled"),
        };

        let updated = self.deps.store.upsert(&draft).await?;
        Ok(Some(updated))
    }

    /// Number of jobs currently tracked (running or awaiting GC).
    pub fn job_count(&self) -> usize {
        self.registry.len()
    }

    /// Periodic registry GC and hub housekeeping. Call once at startup.
    pub fn spawn_maintenance(self: &Arc<Self>) {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(60));
            loop {
                tick.tick().await;
                let removed = orchestrator
                    .registry
                    .gc(orchestrator.deps.discovery.job_gc_grace);
                if removed > 0 {
                    debug!(removed, "Job registry GC");
                }
                orchestrator.deps.stream_hub.prune();
            }
        });
    }

    // =========================================================================
    // Job execution
    // =========================================================================

    async fn run_job(
        self: &Arc<Self>,
        job_id: Uuid,
        topic: &str,
        center: GeoPoint,
        radius_m: f64,
        variants: &[String],
        cancel: &CancellationToken,
    ) -> JobStatus {
        let candidates = match places::find_candidates(&self.deps, center, radius_m, variants).await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Places lookup failed");
                self.publish(
                    topic,
                    &DiscoveryEvent::ErrorEvent {
                        message: "upstream_unavailable".to_string(),
                    },
                );
                return JobStatus::Failed;
            }
        };

        let total = candidates.len();
        self.registry.set_urls_found(job_id, total);
        self.publish(topic, &DiscoveryEvent::JobStarted { urls_found: total });

        if cancel.is_cancelled() {
            return JobStatus::Completed;
        }

        let place_ids: Vec<String> = candidates.iter().map(|c| c.place_id.clone()).collect();
        let existing = match self.deps.store.existing_place_ids(&place_ids).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Existing-pantry lookup failed");
                HashSet::new()
            }
        };

        // Partition: skip known, persist website-less directly, queue the rest.
        let mut to_ingest = Vec::new();
        for candidate in candidates {
            if cancel.is_cancelled() {
                return JobStatus::Completed;
            }

            if existing.contains(&candidate.place_id) {
                self.registry.record_skipped(job_id);
                self.publish(
                    topic,
                    &DiscoveryEvent::PantrySkipped {
                        place_id: candidate.place_id.clone(),
                        reason: "already_known".to_string(),
                    },
                );
                continue;
            }

            if candidate.website.is_none() {
                let draft = pipeline::places_only_draft(&candidate);
                self.persist_and_announce(job_id, topic, &draft, None).await;
                self.maybe_publish_progress(job_id, topic);
                continue;
            }

            to_ingest.push(candidate);
        }

        // Worker pool: the semaphore bounds effective parallelism.
        let mut handles = Vec::with_capacity(to_ingest.len());
        for candidate in to_ingest {
            let orchestrator = Arc::clone(self);
            let worker_topic = topic.to_string();
            let worker_cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                orchestrator
                    .ingest_one(job_id, &worker_topic, candidate, worker_cancel)
                    .await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }

        JobStatus::Completed
    }

    async fn ingest_one(
        self: &Arc<Self>,
        job_id: Uuid,
        topic: &str,
        candidate: PlaceCandidate,
        cancel: CancellationToken,
    ) {
        let _permit = tokio::select! {
            _ = cancel.cancelled() => return,
            permit = Arc::clone(&self.workers).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };
        // Queued tasks are discarded once the job is cancelled.
        if cancel.is_cancelled() {
            return;
        }

        let website = candidate.website.clone();
        match pipeline::ingest_candidate(&self.deps, &candidate, &cancel).await {
            IngestOutcome::Cancelled => return,
            IngestOutcome::Enriched(draft) | IngestOutcome::PlacesOnly(draft) => {
                self.persist_and_announce(job_id, topic, &draft, website)
                    .await;
            }
            IngestOutcome::Dropped { url, reason } => {
                debug!(job_id = %job_id, reason = %reason, "Candidate dropped");
                self.registry.record_failure(job_id);
                self.publish(
                    topic,
                    &DiscoveryEvent::PantryFailed {
                        url: url.unwrap_or_default(),
                        reason,
                    },
                );
            }
        }

        self.maybe_publish_progress(job_id, topic);
    }

    /// Upsert then announce; the store write happens-before the event.
    async fn persist_and_announce(
        &self,
        job_id: Uuid,
        topic: &str,
        draft: &PantryDraft,
        source: Option<String>,
    ) {
        match self.deps.store.upsert(draft).await {
            Ok(pantry) => {
                self.registry.record_success(job_id);
                self.publish(topic, &DiscoveryEvent::PantryDiscovered { pantry });
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Pantry upsert failed");
                self.registry.record_failure(job_id);
                self.publish(
                    topic,
                    &DiscoveryEvent::PantryFailed {
                        url: source.unwrap_or_default(),
                        reason: "store_error".to_string(),
                    },
                );
            }
        }
    }

    fn maybe_publish_progress(&self, job_id: Uuid, topic: &str) {
        let min_interval = Duration::from_millis(self.deps.discovery.progress_coalesce_ms);
        if let Some(job) = self.registry.progress_due(job_id, min_interval) {
            self.publish(
                topic,
                &DiscoveryEvent::Progress {
                    total: job.urls_found,
                    succeeded: job.counters.succeeded,
                    failed: job.counters.failed,
                },
            );
        }
    }

    fn publish(&self, topic: &str, event: &DiscoveryEvent) {
        self.deps.stream_hub.publish(topic, event_json(event));
    }

    // =========================================================================
    // Watchers
    // =========================================================================

    /// Hard job ceiling: surface a timeout and cancel.
    fn spawn_timeout_watchdog(self: &Arc<Self>, job_id: Uuid, topic: String, cancel: CancellationToken) {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(orchestrator.deps.discovery.job_timeout) => {
                    let still_running = orchestrator
                        .registry
                        .get(job_id)
                        .map(|j| !j.status.is_terminal())
                        .unwrap_or(false);
                    if still_running {
                        warn!(job_id = %job_id, "Job exceeded hard ceiling, cancelling");
                        orchestrator.publish(&topic, &DiscoveryEvent::ErrorEvent {
                            message: "timeout".to_string(),
                        });
                        cancel.cancel();
                    }
                }
            }
        });
    }

    /// Cancel a job whose subscribers all went away and stayed away.
    ///
    /// Armed only after a first subscriber attaches: a job nobody has watched
    /// yet (callers may poll `job_status` instead) is left alone.
    fn spawn_idle_watcher(self: &Arc<Self>, job_id: Uuid, topic: String, cancel: CancellationToken) {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let grace = orchestrator.deps.discovery.subscriber_idle_grace;
            let period = (grace / 2).min(Duration::from_secs(1)).max(Duration::from_millis(50));
            let mut tick = tokio::time::interval(period);
            let mut idle_since: Option<Instant> = None;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        let count = orchestrator.deps.stream_hub.subscriber_count(&topic);
                        if count > 0 {
                            idle_since = None;
                            continue;
                        }
                        if !orchestrator.registry.ever_subscribed(job_id) {
                            continue;
                        }
                        let since = *idle_since.get_or_insert_with(Instant::now);
                        if since.elapsed() >= grace {
                            info!(job_id = %job_id, "All subscribers gone, cancelling job");
                            cancel.cancel();
                            break;
                        }
                    }
                }
            }
        });
    }
}

fn event_json(event: &DiscoveryEvent) -> serde_json::Value {
    serde_json::to_value(event).unwrap_or_else(|e| {
        // Events are plain data; serialization cannot realistically fail.
        warn!(error = %e, "Event serialization failed");
        serde_json::json!({"type": "error_event", "message": "serialization failure"})
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscoveryConfig;
    use crate::domains::pantries::models::PantryStatus;
    use crate::kernel::{ScrapeFailure, TestDependencies};

    fn candidate(place_id: &str, website: Option<&str>) -> PlaceCandidate {
        PlaceCandidate {
            place_id: place_id.to_string(),
            name: format!("Pantry {place_id}"),
            formatted_address: format!("{place_id} Main St, Denver, CO 80202, USA"),
            lat: 39.739,
            lng: -104.990,
            website: website.map(String::from),
        }
    }

    fn denver_request() -> StartJobRequest {
        StartJobRequest {
            query: "Denver".to_string(),
            center: GeoPoint::new(39.739, -104.990),
            radius_m: 8000.0,
            variants: None,
        }
    }

    /// Drain events until (and including) the terminal `complete`.
    async fn collect_until_complete(
        initial: Vec<serde_json::Value>,
        mut rx: broadcast::Receiver<serde_json::Value>,
    ) -> Vec<serde_json::Value> {
        let mut events = initial;
        let deadline = Duration::from_secs(10);
        loop {
            if events
                .last()
                .and_then(|e| e.get("type"))
                .is_some_and(|t| t == "complete")
            {
                return events;
            }
            match tokio::time::timeout(deadline, rx.recv()).await {
                Ok(Ok(event)) => events.push(event),
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) => return events,
                Err(_) => panic!("timed out waiting for complete; got {events:?}"),
            }
        }
    }

    fn events_of_type<'a>(
        events: &'a [serde_json::Value],
        name: &str,
    ) -> Vec<&'a serde_json::Value> {
        events
            .iter()
            .filter(|e| e.get("type").is_some_and(|t| t == name))
            .collect()
    }

    #[tokio::test]
    async fn s1_clean_discovery() {
        let test_deps = TestDependencies::new();
        test_deps.places.set_results(
            (1..=5)
                .map(|i| candidate(&format!("p{i}"), Some(&format!("https://p{i}.org"))))
                .collect(),
        );
        test_deps.ai.set_default_response(
            r#"{"status": "OPEN", "hours_notes": "Tue 9-11am", "confidence": 7}"#,
        );
        let orchestrator = DiscoveryOrchestrator::new(test_deps.deps());

        let outcome = orchestrator.start_job(denver_request()).await.unwrap();
        assert_eq!(outcome.existing_pantries, 0);

        let (initial, rx) = orchestrator.subscribe(outcome.job_id).unwrap();
        let events = collect_until_complete(initial, rx).await;

        // job_started first, complete last.
        assert_eq!(events.first().unwrap()["type"], "job_started");
        assert_eq!(events.last().unwrap()["type"], "complete");

        // The corrected job_started carries the real count.
        let started = events_of_type(&events, "job_started");
        assert_eq!(started.last().unwrap()["urls_found"], 5);

        assert_eq!(events_of_type(&events, "pantry_discovered").len(), 5);
        assert_eq!(events_of_type(&events, "pantry_failed").len(), 0);

        let complete = events.last().unwrap();
        assert_eq!(complete["found"], 5);
        assert_eq!(complete["failed"], 0);
        assert_eq!(complete["skipped"], 0);

        // Discovered pantries are queryable by the time complete arrives.
        assert_eq!(test_deps.store.len(), 5);
        let stored = test_deps.store.get_by_place_id("p1").unwrap();
        assert_eq!(stored.status(), PantryStatus::Open);

        let job = orchestrator.job_status(outcome.job_id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(
            job.counters.succeeded + job.counters.failed + job.counters.skipped,
            job.urls_found
        );
    }

    #[tokio::test]
    async fn s2_mixed_candidates_fail_soft() {
        let test_deps = TestDependencies::new();
        test_deps.places.set_results(vec![
            candidate("p1", Some("https://p1.org")),
            candidate("p2", Some("https://p2.org")),
            candidate("p3", Some("https://p3.org")),
            candidate("p4", Some("https://timeout.org")),
            candidate("p5", None),
            candidate("p6", None),
        ]);
        test_deps
            .scraper
            .set_failure("https://timeout.org", ScrapeFailure::Timeout);
        test_deps.ai.set_default_response(
            r#"{"status": "OPEN", "confidence": 6}"#,
        );
        let orchestrator = DiscoveryOrchestrator::new(test_deps.deps());

        let outcome = orchestrator.start_job(denver_request()).await.unwrap();
        let (initial, rx) = orchestrator.subscribe(outcome.job_id).unwrap();
        let events = collect_until_complete(initial, rx).await;

        // All six end up discovered: 3 enriched, 3 places-only.
        assert_eq!(events_of_type(&events, "pantry_discovered").len(), 6);
        assert_eq!(events_of_type(&events, "pantry_failed").len(), 0);

        let complete = events.last().unwrap();
        assert_eq!(complete["found"], 6);
        assert_eq!(complete["failed"], 0);

        let places_only: Vec<Pantry> = test_deps
            .store
            .all()
            .into_iter()
            .filter(|p| p.source_url.is_none())
            .collect();
        assert_eq!(places_only.len(), 3);
        for pantry in places_only {
            assert_eq!(pantry.confidence, 3);
            assert_eq!(pantry.status(), PantryStatus::Unknown);
        }

        // A scrape failure never fails the job.
        let job = orchestrator.job_status(outcome.job_id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn s3_all_existing_are_skipped() {
        let test_deps = TestDependencies::new();
        let candidates: Vec<PlaceCandidate> = (1..=4)
            .map(|i| candidate(&format!("p{i}"), Some(&format!("https://p{i}.org"))))
            .collect();
        test_deps.places.set_results(candidates.clone());
        for c in &candidates {
            test_deps.store.seed(&pipeline::places_only_draft(c));
        }
        let orchestrator = DiscoveryOrchestrator::new(test_deps.deps());

        let outcome = orchestrator.start_job(denver_request()).await.unwrap();
        assert_eq!(outcome.existing_pantries, 4);

        let (initial, rx) = orchestrator.subscribe(outcome.job_id).unwrap();
        let events = collect_until_complete(initial, rx).await;

        assert_eq!(events_of_type(&events, "pantry_skipped").len(), 4);
        assert_eq!(events_of_type(&events, "pantry_discovered").len(), 0);

        let complete = events.last().unwrap();
        assert_eq!(complete["found"], 0);
        assert_eq!(complete["skipped"], 4);
        assert_eq!(test_deps.store.len(), 4);
    }

    #[tokio::test]
    async fn s4_provider_outage_fails_job() {
        let test_deps = TestDependencies::new();
        test_deps.places.set_fail_all(true);
        let orchestrator = DiscoveryOrchestrator::new(test_deps.deps());

        let outcome = orchestrator.start_job(denver_request()).await.unwrap();
        let (initial, rx) = orchestrator.subscribe(outcome.job_id).unwrap();
        let events = collect_until_complete(initial, rx).await;

        assert_eq!(events.first().unwrap()["type"], "job_started");
        let errors = events_of_type(&events, "error_event");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0]["message"], "upstream_unavailable");

        let complete = events.last().unwrap();
        assert_eq!(complete["found"], 0);
        assert_eq!(complete["failed"], 0);
        assert_eq!(complete["skipped"], 0);

        let job = orchestrator.job_status(outcome.job_id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn s5_cancellation_mid_flight() {
        let test_deps = TestDependencies::new();
        test_deps.places.set_results(
            (1..=8)
                .map(|i| candidate(&format!("p{i}"), Some(&format!("https://p{i}.org"))))
                .collect(),
        );
        // Slow scrapes keep the job in flight while we cancel it.
        test_deps.scraper.set_delay(Duration::from_millis(300));
        let mut config = DiscoveryConfig::default();
        config.worker_concurrency = 2;
        let test_deps = test_deps.with_discovery(config);
        let orchestrator = DiscoveryOrchestrator::new(test_deps.deps());

        let outcome = orchestrator.start_job(denver_request()).await.unwrap();
        let (initial, rx) = orchestrator.subscribe(outcome.job_id).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(orchestrator.stop_job(outcome.job_id));
        // Repeated stop is an idempotent ack.
        assert!(orchestrator.stop_job(outcome.job_id));

        let started = Instant::now();
        let events = collect_until_complete(initial, rx).await;
        // Terminal event within a bounded time of the stop.
        assert!(started.elapsed() < Duration::from_secs(5));

        // At most the in-flight workers can still land.
        assert!(events_of_type(&events, "pantry_discovered").len() <= 2);
        assert_eq!(events.last().unwrap()["type"], "complete");

        let job = orchestrator.job_status(outcome.job_id).unwrap();
        assert!(job.status.is_terminal());
    }

    #[tokio::test]
    async fn job_timeout_emits_error_then_complete() {
        let test_deps = TestDependencies::new();
        test_deps
            .places
            .set_results(vec![candidate("p1", Some("https://p1.org"))]);
        test_deps.scraper.set_delay(Duration::from_secs(60));
        let mut config = DiscoveryConfig::default();
        config.job_timeout = Duration::from_millis(100);
        let test_deps = test_deps.with_discovery(config);
        let orchestrator = DiscoveryOrchestrator::new(test_deps.deps());

        let outcome = orchestrator.start_job(denver_request()).await.unwrap();
        let (initial, rx) = orchestrator.subscribe(outcome.job_id).unwrap();
        let events = collect_until_complete(initial, rx).await;

        let errors = events_of_type(&events, "error_event");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0]["message"], "timeout");
        assert_eq!(events.last().unwrap()["type"], "complete");
    }

    #[tokio::test]
    async fn idle_subscribers_cancel_the_job() {
        let test_deps = TestDependencies::new();
        test_deps
            .places
            .set_results(vec![candidate("p1", Some("https://p1.org"))]);
        test_deps.scraper.set_delay(Duration::from_secs(60));
        let mut config = DiscoveryConfig::default();
        config.subscriber_idle_grace = Duration::from_millis(150);
        let test_deps = test_deps.with_discovery(config);
        let orchestrator = DiscoveryOrchestrator::new(test_deps.deps());

        let outcome = orchestrator.start_job(denver_request()).await.unwrap();
        let (_initial, rx) = orchestrator.subscribe(outcome.job_id).unwrap();
        drop(rx);

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let job = orchestrator.job_status(outcome.job_id).unwrap();
            if job.status.is_terminal() {
                break;
            }
            assert!(Instant::now() < deadline, "idle watcher never cancelled the job");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    #[tokio::test]
    async fn rerunning_a_region_is_idempotent() {
        let test_deps = TestDependencies::new();
        test_deps.places.set_results(vec![
            candidate("p1", Some("https://p1.org")),
            candidate("p2", None),
        ]);
        test_deps
            .ai
            .set_default_response(r#"{"status": "OPEN", "confidence": 7}"#);
        let orchestrator = DiscoveryOrchestrator::new(test_deps.deps());

        let first = orchestrator.start_job(denver_request()).await.unwrap();
        let (initial, rx) = orchestrator.subscribe(first.job_id).unwrap();
        collect_until_complete(initial, rx).await;
        assert_eq!(test_deps.store.len(), 2);
        let first_updated = test_deps.store.get_by_place_id("p1").unwrap().last_updated;

        let second = orchestrator.start_job(denver_request()).await.unwrap();
        let (initial, rx) = orchestrator.subscribe(second.job_id).unwrap();
        let events = collect_until_complete(initial, rx).await;

        // Same stored set, everything skipped, last_updated non-decreasing.
        assert_eq!(test_deps.store.len(), 2);
        assert_eq!(events_of_type(&events, "pantry_skipped").len(), 2);
        let second_updated = test_deps.store.get_by_place_id("p1").unwrap().last_updated;
        assert!(second_updated >= first_updated);
    }

    #[tokio::test]
    async fn subscribe_after_completion_synthesizes_terminal_state() {
        let test_deps = TestDependencies::new();
        test_deps
            .places
            .set_results(vec![candidate("p1", None)]);
        let orchestrator = DiscoveryOrchestrator::new(test_deps.deps());

        let outcome = orchestrator.start_job(denver_request()).await.unwrap();
        let (initial, rx) = orchestrator.subscribe(outcome.job_id).unwrap();
        collect_until_complete(initial, rx).await;

        // A late subscriber still gets job_started + complete without waiting.
        let (initial, _rx) = orchestrator.subscribe(outcome.job_id).unwrap();
        assert_eq!(initial.len(), 2);
        assert_eq!(initial[0]["type"], "job_started");
        assert_eq!(initial[1]["type"], "complete");
        assert_eq!(initial[1]["found"], 1);
    }

    #[tokio::test]
    async fn ingest_pantry_reenriches_a_stored_row() {
        let test_deps = TestDependencies::new();
        let seeded = test_deps
            .store
            .seed(&pipeline::places_only_draft(&candidate(
                "p1",
                Some("https://p1.org"),
            )));
        assert_eq!(seeded.confidence, 3);

        test_deps.places.set_website("p1", "https://p1.org");
        test_deps
            .ai
            .set_default_response(r#"{"status": "OPEN", "hours_notes": "Mon 1-3pm", "confidence": 8}"#);
        let orchestrator = DiscoveryOrchestrator::new(test_deps.deps());

        let updated = orchestrator.ingest_pantry(seeded.id).await.unwrap().unwrap();
        assert_eq!(updated.status(), PantryStatus::Open);
        assert_eq!(updated.confidence, 8);
        assert_eq!(updated.source_url.as_deref(), Some("https://p1.org"));
        // Still a single row for the place.
        assert_eq!(test_deps.store.len(), 1);
    }

    #[tokio::test]
    async fn unknown_jobs_are_not_subscribable_or_stoppable() {
        let test_deps = TestDependencies::new();
        let orchestrator = DiscoveryOrchestrator::new(test_deps.deps());

        assert!(orchestrator.subscribe(Uuid::new_v4()).is_none());
        assert!(!orchestrator.stop_job(Uuid::new_v4()));
        assert!(orchestrator.job_status(Uuid::new_v4()).is_none());
    }
}
