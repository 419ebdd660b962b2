use serde::{Deserialize, Serialize};

use crate::domains::pantries::models::Pantry;

/// Discovery job lifecycle events.
///
/// These are facts about a job's progress, published to the job's stream-hub
/// topic and fanned out to SSE subscribers. The `type` tag doubles as the
/// SSE event name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscoveryEvent {
    /// Emitted immediately on job creation with `urls_found: 0`, then again
    /// with the real candidate count; the later value is authoritative.
    JobStarted { urls_found: usize },

    /// A pantry was upserted (enriched or places-only). The upsert
    /// happens-before this event.
    PantryDiscovered { pantry: Pantry },

    /// A candidate was dropped (structural error or store failure).
    PantryFailed { url: String, reason: String },

    /// A candidate was skipped without work (already in the store).
    PantrySkipped { place_id: String, reason: String },

    /// Coalesced counter snapshot.
    Progress {
        total: usize,
        succeeded: usize,
        failed: usize,
    },

    /// Terminal event, emitted exactly once per job.
    Complete {
        found: usize,
        failed: usize,
        skipped: usize,
    },

    /// Infrastructure-level failure surfaced to subscribers.
    ErrorEvent { message: String },
}

impl DiscoveryEvent {
    /// Wire name, matching the serde tag.
    pub fn name(&self) -> &'static str {
        match self {
            DiscoveryEvent::JobStarted { .. } => "job_started",
            DiscoveryEvent::PantryDiscovered { .. } => "pantry_discovered",
            DiscoveryEvent::PantryFailed { .. } => "pantry_failed",
            DiscoveryEvent::PantrySkipped { .. } => "pantry_skipped",
            DiscoveryEvent::Progress { .. } => "progress",
            DiscoveryEvent::Complete { .. } => "complete",
            DiscoveryEvent::ErrorEvent { .. } => "error_event",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DiscoveryEvent::Complete { .. })
    }
}
