// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Business logic (like "extract a pantry record") should be domain functions
// that use these traits.
//
// Naming convention: Base* for trait names (e.g., BaseAI, BaseWebScraper)

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::common::{CitySummary, GeoPoint, PlaceCandidate};
use crate::domains::pantries::models::{NearbyPantry, Pantry, PantryDraft};

// =============================================================================
// AI Trait (Infrastructure - Generic LLM capabilities)
// =============================================================================

#[async_trait]
pub trait BaseAI: Send + Sync {
    /// Complete a prompt with an LLM (returns raw text response)
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Complete a prompt expecting JSON response (returns raw JSON string)
    /// Parse with serde_json::from_str in calling code
    async fn complete_json(&self, prompt: &str) -> Result<String> {
        // Default implementation calls complete
        self.complete(prompt).await
    }
}

// =============================================================================
// Web Scraper Trait (Infrastructure)
// =============================================================================

/// A scraped page rendered as markdown.
#[derive(Debug, Clone)]
pub struct ScrapeResult {
    pub url: String,
    pub markdown: String,
    pub title: Option<String>,
}

/// Typed scrape failures. Per-candidate recoverable: the ingestion pipeline
/// falls back to a places-only record on any of these.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ScrapeFailure {
    #[error("scrape timed out")]
    Timeout,
    #[error("http error {status}")]
    HttpError { status: u16 },
    #[error("request blocked by site")]
    Blocked,
    #[error("page had no usable content")]
    Empty,
}

#[async_trait]
pub trait BaseWebScraper: Send + Sync {
    /// Fetch a URL and return it rendered as markdown.
    ///
    /// Implementations strip scripts and boilerplate. Concatenating same-site
    /// sub-pages separated by `---` source-URL headers is permitted; the
    /// extractor prompt relies on that convention.
    async fn scrape(&self, url: &str) -> Result<ScrapeResult, ScrapeFailure>;
}

// =============================================================================
// Places Search Trait (Infrastructure)
// =============================================================================

#[async_trait]
pub trait BasePlacesSearch: Send + Sync {
    /// Run one provider text search around a center point.
    ///
    /// One call per query variant; the caller unions and dedupes.
    async fn search(
        &self,
        query: &str,
        center: GeoPoint,
        radius_m: f64,
    ) -> Result<Vec<PlaceCandidate>>;

    /// Place-details fallback to recover a missing website. Failures are
    /// tolerated by callers.
    async fn website_for(&self, place_id: &str) -> Result<Option<String>>;
}

// =============================================================================
// Places Cache Trait (Infrastructure)
// =============================================================================

/// TTL cache over candidate sets, keyed by query fingerprint.
///
/// `get` returns None for missing or expired entries. `put` is a single
/// atomic replace for the fingerprint.
#[async_trait]
pub trait BasePlacesCache: Send + Sync {
    async fn get(&self, fingerprint: &str) -> Result<Option<Vec<PlaceCandidate>>>;

    async fn put(&self, fingerprint: &str, candidates: &[PlaceCandidate]) -> Result<()>;
}

// =============================================================================
// Pantry Store Trait (Infrastructure)
// =============================================================================

#[async_trait]
pub trait BasePantryStore: Send + Sync {
    /// Insert-or-update keyed by `place_id`. Never overwrites a stored value
    /// with null; bumps `last_updated`.
    async fn upsert(&self, draft: &PantryDraft) -> Result<Pantry>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Pantry>>;

    /// Which of the given provider ids already exist in the store.
    async fn existing_place_ids(&self, place_ids: &[String]) -> Result<HashSet<String>>;

    async fn count_within_radius(&self, center: GeoPoint, radius_m: f64) -> Result<i64>;

    /// Pantries within `max_distance_m` of the center, ascending distance.
    async fn nearby(
        &self,
        center: GeoPoint,
        max_distance_m: f64,
        limit: i64,
    ) -> Result<Vec<NearbyPantry>>;

    async fn list(&self, city: Option<&str>, state: Option<&str>) -> Result<Vec<Pantry>>;

    async fn cities(&self) -> Result<Vec<CitySummary>>;
}
