//! Per-candidate ingestion: Scraper → Extractor → Validator.
//!
//! Fail-soft by construction: a scrape or extraction failure degrades to a
//! places-only record instead of surfacing an error. Only structural problems
//! (no name, no coordinates) drop a candidate.

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::common::PlaceCandidate;
use crate::domains::pantries::models::PantryDraft;
use crate::kernel::{ScrapeFailure, ServerDeps};

use super::extractor::{self, ExtractedFields};
use super::validator::{self, RawPantry};

/// Provenance tag for records enriched by the local scraper.
const SCRAPE_METHOD: &str = "simple_scraper";

const PLACES_ONLY_NOTE: &str = "Limited info — places-only";

/// Result of running one candidate through the pipeline.
#[derive(Debug)]
pub enum IngestOutcome {
    /// Scrape and extraction both succeeded.
    Enriched(PantryDraft),
    /// Website absent or scrape/extraction failed; record built from places
    /// fields only.
    PlacesOnly(PantryDraft),
    /// Structural error: nothing storable could be built.
    Dropped { url: Option<String>, reason: String },
    /// The job was cancelled while this candidate was in flight.
    Cancelled,
}

/// Run one candidate through scrape → extract → validate.
///
/// Honors the job's cancellation token at every suspension point; an
/// in-flight scrape or extraction is interrupted, not awaited.
pub async fn ingest_candidate(
    deps: &ServerDeps,
    candidate: &PlaceCandidate,
    cancel: &CancellationToken,
) -> IngestOutcome {
    if candidate.name.trim().is_empty() {
        return IngestOutcome::Dropped {
            url: candidate.website.clone(),
            reason: "candidate has no name".to_string(),
        };
    }
    if !candidate.lat.is_finite() || !candidate.lng.is_finite() {
        return IngestOutcome::Dropped {
            url: candidate.website.clone(),
            reason: "candidate has no coordinates".to_string(),
        };
    }

    let Some(url) = candidate.website.clone() else {
        return IngestOutcome::PlacesOnly(places_only_draft(candidate));
    };

    // Scrape, bounded by the configured budget and the job token.
    let scrape = tokio::select! {
        _ = cancel.cancelled() => return IngestOutcome::Cancelled,
        result = tokio::time::timeout(deps.discovery.scrape_timeout, deps.scraper.scrape(&url)) => {
            result.unwrap_or(Err(ScrapeFailure::Timeout))
        }
    };

    let markdown = match scrape {
        Ok(result) => result.markdown,
        Err(failure) => {
            debug!(url = %url, reason = %failure, "Scrape failed, falling back to places-only");
            return IngestOutcome::PlacesOnly(places_only_draft(candidate));
        }
    };

    // Extract, same discipline.
    let today = Utc::now().date_naive();
    let extracted = tokio::select! {
        _ = cancel.cancelled() => return IngestOutcome::Cancelled,
        result = tokio::time::timeout(
            deps.discovery.extract_timeout,
            extractor::extract_pantry_fields(deps.ai.as_ref(), &markdown, today),
        ) => {
            match result {
                Ok(inner) => inner,
                Err(_) => Err(extractor::ExtractionFailure::LlmError),
            }
        }
    };

    match extracted {
        Ok(fields) => IngestOutcome::Enriched(enriched_draft(candidate, fields, url)),
        Err(failure) => {
            warn!(url = %url, reason = %failure, "Extraction failed, falling back to places-only");
            IngestOutcome::PlacesOnly(places_only_draft(candidate))
        }
    }
}

fn enriched_draft(
    candidate: &PlaceCandidate,
    fields: ExtractedFields,
    source_url: String,
) -> PantryDraft {
    let (city, state) = parse_city_state(&candidate.formatted_address);
    validator::validate(RawPantry {
        place_id: Some(candidate.place_id.clone()),
        name: candidate.name.clone(),
        address: Some(candidate.formatted_address.clone()),
        city,
        state,
        latitude: candidate.lat,
        longitude: candidate.lng,
        status: fields.status,
        hours_notes: fields.hours_notes,
        hours_today: fields.hours_today,
        eligibility_rules: fields.eligibility_rules.unwrap_or_default(),
        is_id_required: fields.is_id_required,
        residency_req: fields.residency_req,
        special_notes: fields.special_notes,
        confidence: fields.confidence,
        source_url: Some(source_url),
        scrape_method: Some(SCRAPE_METHOD.to_string()),
        scraped_at: Some(Utc::now()),
    })
}

/// Record from places fields only: low confidence, unknown status.
pub fn places_only_draft(candidate: &PlaceCandidate) -> PantryDraft {
    let (city, state) = parse_city_state(&candidate.formatted_address);
    validator::validate(RawPantry {
        place_id: Some(candidate.place_id.clone()),
        name: candidate.name.clone(),
        address: Some(candidate.formatted_address.clone()),
        city,
        state,
        latitude: candidate.lat,
        longitude: candidate.lng,
        special_notes: Some(PLACES_ONLY_NOTE.to_string()),
        ..RawPantry::default()
    })
}

/// Pull city and state out of a provider-formatted US address
/// (e.g. "123 Main St, Denver, CO 80202, USA").
fn parse_city_state(formatted_address: &str) -> (Option<String>, Option<String>) {
    let parts: Vec<&str> = formatted_address
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    for i in (1..parts.len()).rev() {
        let mut tokens = parts[i].split_whitespace();
        let Some(first) = tokens.next() else { continue };
        if first.len() == 2 && first.chars().all(|c| c.is_ascii_uppercase()) {
            let zip_ok = tokens
                .next()
                .map(|z| z.chars().all(|c| c.is_ascii_digit() || c == '-'))
                .unwrap_or(true);
            if zip_ok {
                return (Some(parts[i - 1].to_string()), Some(first.to_string()));
            }
        }
    }

    (None, None)
}
