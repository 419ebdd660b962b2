// TestDependencies - mock implementations for testing
//
// Provides mock services that can be injected into ServerDeps for tests.
// The in-memory store and cache implement the same trait contracts as the
// Postgres-backed versions, so orchestrator tests exercise the real flow.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::common::geo::haversine_m;
use crate::common::{CitySummary, GeoPoint, PlaceCandidate};
use crate::config::DiscoveryConfig;
use crate::domains::pantries::models::{NearbyPantry, Pantry, PantryDraft, PantryStatus};
use crate::kernel::{
    BaseAI, BasePantryStore, BasePlacesCache, BasePlacesSearch, BaseWebScraper, ScrapeFailure,
    ScrapeResult, ServerDeps, StreamHub,
};

// =============================================================================
// Mock AI (Generic LLM capabilities)
// =============================================================================

pub struct MockAI {
    responses: Mutex<Vec<String>>,
    calls: Mutex<Vec<String>>,
    should_fail: Mutex<bool>,
    /// Returned when the scripted queue is empty.
    default_response: Mutex<String>,
}

impl MockAI {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            should_fail: Mutex::new(false),
            default_response: Mutex::new("{}".to_string()),
        }
    }

    /// Queue a text response (consumed in order)
    pub fn push_response(&self, response: impl Into<String>) {
        self.responses.lock().unwrap().push(response.into());
    }

    /// Queue a JSON response (will be serialized)
    pub fn push_json_response<T: serde::Serialize>(&self, data: &T) {
        let json = serde_json::to_string(data).expect("Failed to serialize mock response");
        self.push_response(json);
    }

    /// Response used once the queue is drained
    pub fn set_default_response(&self, response: impl Into<String>) {
        *self.default_response.lock().unwrap() = response.into();
    }

    pub fn set_should_fail(&self, fail: bool) {
        *self.should_fail.lock().unwrap() = fail;
    }

    /// Get all prompts that were sent to the AI
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Check if a prompt containing the given text was sent
    pub fn was_called_with(&self, text: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|p| p.contains(text))
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Default for MockAI {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseAI for MockAI {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.calls.lock().unwrap().push(prompt.to_string());

        if *self.should_fail.lock().unwrap() {
            anyhow::bail!("MockAI configured to fail");
        }

        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(self.default_response.lock().unwrap().clone())
        } else {
            Ok(responses.remove(0))
        }
    }
}

// =============================================================================
// Mock Web Scraper
// =============================================================================

pub struct MockScraper {
    /// Per-URL scripted results; URLs not listed get the default markdown.
    results: Mutex<HashMap<String, Result<String, ScrapeFailure>>>,
    calls: Mutex<Vec<String>>,
    /// Artificial latency, for cancellation tests.
    delay: Mutex<Option<Duration>>,
}

impl MockScraper {
    pub fn new() -> Self {
        Self {
            results: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
        }
    }

    pub fn set_markdown(&self, url: impl Into<String>, markdown: impl Into<String>) {
        self.results
            .lock()
            .unwrap()
            .insert(url.into(), Ok(markdown.into()));
    }

    pub fn set_failure(&self, url: impl Into<String>, failure: ScrapeFailure) {
        self.results.lock().unwrap().insert(url.into(), Err(failure));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockScraper {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseWebScraper for MockScraper {
    async fn scrape(&self, url: &str) -> Result<ScrapeResult, ScrapeFailure> {
        self.calls.lock().unwrap().push(url.to_string());

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.results.lock().unwrap().get(url).cloned();
        match scripted {
            Some(Ok(markdown)) => Ok(ScrapeResult {
                url: url.to_string(),
                markdown,
                title: None,
            }),
            Some(Err(failure)) => Err(failure),
            None => Ok(ScrapeResult {
                url: url.to_string(),
                markdown: "# Food Pantry\n\nOpen Tuesdays 9-11am. No ID required.".to_string(),
                title: Some("Food Pantry".to_string()),
            }),
        }
    }
}

// =============================================================================
// Mock Places Search
// =============================================================================

pub struct MockPlacesSearch {
    /// Results keyed by query variant; unknown variants get `default_results`.
    per_variant: Mutex<HashMap<String, Vec<PlaceCandidate>>>,
    default_results: Mutex<Vec<PlaceCandidate>>,
    failing_variants: Mutex<HashSet<String>>,
    fail_all: Mutex<bool>,
    /// Websites returned by the details fallback.
    websites: Mutex<HashMap<String, String>>,
    search_calls: Mutex<Vec<String>>,
    details_calls: Mutex<Vec<String>>,
}

impl MockPlacesSearch {
    pub fn new() -> Self {
        Self {
            per_variant: Mutex::new(HashMap::new()),
            default_results: Mutex::new(Vec::new()),
            failing_variants: Mutex::new(HashSet::new()),
            fail_all: Mutex::new(false),
            websites: Mutex::new(HashMap::new()),
            search_calls: Mutex::new(Vec::new()),
            details_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_results(&self, candidates: Vec<PlaceCandidate>) {
        *self.default_results.lock().unwrap() = candidates;
    }

    pub fn set_variant_results(&self, variant: impl Into<String>, candidates: Vec<PlaceCandidate>) {
        self.per_variant
            .lock()
            .unwrap()
            .insert(variant.into(), candidates);
    }

    pub fn fail_variant(&self, variant: impl Into<String>) {
        self.failing_variants.lock().unwrap().insert(variant.into());
    }

    pub fn set_fail_all(&self, fail: bool) {
        *self.fail_all.lock().unwrap() = fail;
    }

    pub fn set_website(&self, place_id: impl Into<String>, website: impl Into<String>) {
        self.websites
            .lock()
            .unwrap()
            .insert(place_id.into(), website.into());
    }

    pub fn search_call_count(&self) -> usize {
        self.search_calls.lock().unwrap().len()
    }

    pub fn details_call_count(&self) -> usize {
        self.details_calls.lock().unwrap().len()
    }
}

impl Default for MockPlacesSearch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BasePlacesSearch for MockPlacesSearch {
    async fn search(
        &self,
        query: &str,
        _center: GeoPoint,
        _radius_m: f64,
    ) -> Result<Vec<PlaceCandidate>> {
        self.search_calls.lock().unwrap().push(query.to_string());

        if *self.fail_all.lock().unwrap() {
            anyhow::bail!("MockPlacesSearch configured to fail");
        }
        if self.failing_variants.lock().unwrap().contains(query) {
            anyhow::bail!("MockPlacesSearch variant failure: {query}");
        }

        if let Some(results) = self.per_variant.lock().unwrap().get(query) {
            return Ok(results.clone());
        }
        Ok(self.default_results.lock().unwrap().clone())
    }

    async fn website_for(&self, place_id: &str) -> Result<Option<String>> {
        self.details_calls.lock().unwrap().push(place_id.to_string());
        Ok(self.websites.lock().unwrap().get(place_id).cloned())
    }
}

// =============================================================================
// In-memory Places Cache
// =============================================================================

/// TTL cache double. Time is controlled explicitly: `expire_all` simulates
/// the clock passing the TTL.
pub struct MemoryPlacesCache {
    entries: Mutex<HashMap<String, Vec<PlaceCandidate>>>,
    puts: Mutex<usize>,
}

impl MemoryPlacesCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            puts: Mutex::new(0),
        }
    }

    pub fn expire_all(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn put_count(&self) -> usize {
        *self.puts.lock().unwrap()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryPlacesCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BasePlacesCache for MemoryPlacesCache {
    async fn get(&self, fingerprint: &str) -> Result<Option<Vec<PlaceCandidate>>> {
        Ok(self.entries.lock().unwrap().get(fingerprint).cloned())
    }

    async fn put(&self, fingerprint: &str, candidates: &[PlaceCandidate]) -> Result<()> {
        *self.puts.lock().unwrap() += 1;
        self.entries
            .lock()
            .unwrap()
            .insert(fingerprint.to_string(), candidates.to_vec());
        Ok(())
    }
}

// =============================================================================
// In-memory Pantry Store
// =============================================================================

/// Store double with the same upsert merge semantics as the Postgres model:
/// non-null new values win, UNKNOWN never clobbers a known status, a
/// places-only write never downgrades confidence.
pub struct MemoryPantryStore {
    rows: Mutex<HashMap<String, Pantry>>,
}

impl MemoryPantryStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> Vec<Pantry> {
        self.rows.lock().unwrap().values().cloned().collect()
    }

    pub fn get_by_place_id(&self, place_id: &str) -> Option<Pantry> {
        self.rows.lock().unwrap().get(place_id).cloned()
    }

    /// Seed a row directly (for "already known" scenarios).
    pub fn seed(&self, draft: &PantryDraft) -> Pantry {
        let pantry = draft_to_pantry(draft, Uuid::new_v4());
        let key = pantry
            .place_id
            .clone()
            .unwrap_or_else(|| pantry.id.to_string());
        self.rows.lock().unwrap().insert(key, pantry.clone());
        pantry
    }
}

impl Default for MemoryPantryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn draft_to_pantry(draft: &PantryDraft, id: Uuid) -> Pantry {
    Pantry {
        id,
        place_id: draft.place_id.clone(),
        name: draft.name.clone(),
        address: draft.address.clone(),
        city: draft.city.clone(),
        state: draft.state.clone(),
        latitude: draft.latitude,
        longitude: draft.longitude,
        status: draft.status.as_str().to_string(),
        hours_notes: draft.hours_notes.clone(),
        hours_today: draft.hours_today.clone(),
        eligibility_rules: draft.eligibility_rules.clone(),
        is_id_required: draft.is_id_required,
        residency_req: draft.residency_req.clone(),
        special_notes: draft.special_notes.clone(),
        confidence: draft.confidence,
        source_url: draft.source_url.clone(),
        scrape_method: draft.scrape_method.clone(),
        scraped_at: draft.scraped_at,
        last_updated: Utc::now(),
    }
}

fn merge_option(new: &Option<String>, old: &Option<String>) -> Option<String> {
    new.clone().or_else(|| old.clone())
}

#[async_trait]
impl BasePantryStore for MemoryPantryStore {
    async fn upsert(&self, draft: &PantryDraft) -> Result<Pantry> {
        let mut rows = self.rows.lock().unwrap();

        let key = draft
            .place_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let merged = match rows.get(&key) {
            None => draft_to_pantry(draft, Uuid::new_v4()),
            Some(existing) => {
                let mut updated = draft_to_pantry(draft, existing.id);
                updated.address = merge_option(&draft.address, &existing.address);
                updated.city = merge_option(&draft.city, &existing.city);
                updated.state = merge_option(&draft.state, &existing.state);
                if draft.status == PantryStatus::Unknown {
                    updated.status = existing.status.clone();
                }
                updated.hours_notes = merge_option(&draft.hours_notes, &existing.hours_notes);
                updated.hours_today = merge_option(&draft.hours_today, &existing.hours_today);
                updated.residency_req = merge_option(&draft.residency_req, &existing.residency_req);
                updated.special_notes = merge_option(&draft.special_notes, &existing.special_notes);
                if draft.source_url.is_none() {
                    updated.confidence = existing.confidence.max(draft.confidence);
                }
                updated.source_url = merge_option(&draft.source_url, &existing.source_url);
                updated.scrape_method =
                    merge_option(&draft.scrape_method, &existing.scrape_method);
                updated.scraped_at = draft.scraped_at.or(existing.scraped_at);
                // last_updated only moves forward
                updated.last_updated = existing.last_updated.max(Utc::now());
                updated
            }
        };

        rows.insert(key, merged.clone());
        Ok(merged)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Pantry>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn existing_place_ids(&self, place_ids: &[String]) -> Result<HashSet<String>> {
        let rows = self.rows.lock().unwrap();
        Ok(place_ids
            .iter()
            .filter(|id| rows.contains_key(*id))
            .cloned()
            .collect())
    }

    async fn count_within_radius(&self, center: GeoPoint, radius_m: f64) -> Result<i64> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .filter(|p| haversine_m(center.lat, center.lng, p.latitude, p.longitude) <= radius_m)
            .count() as i64)
    }

    async fn nearby(
        &self,
        center: GeoPoint,
        max_distance_m: f64,
        limit: i64,
    ) -> Result<Vec<NearbyPantry>> {
        let rows = self.rows.lock().unwrap();
        let mut found: Vec<NearbyPantry> = rows
            .values()
            .filter_map(|p| {
                let distance_m = haversine_m(center.lat, center.lng, p.latitude, p.longitude);
                (distance_m <= max_distance_m).then(|| NearbyPantry {
                    pantry: p.clone(),
                    distance_m,
                })
            })
            .collect();
        found.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
        found.truncate(limit as usize);
        Ok(found)
    }

    async fn list(&self, city: Option<&str>, state: Option<&str>) -> Result<Vec<Pantry>> {
        let rows = self.rows.lock().unwrap();
        let mut found: Vec<Pantry> = rows
            .values()
            .filter(|p| {
                city.map(|c| p.city.as_deref().is_some_and(|pc| pc.eq_ignore_ascii_case(c)))
                    .unwrap_or(true)
                    && state
                        .map(|s| p.state.as_deref().is_some_and(|ps| ps.eq_ignore_ascii_case(s)))
                        .unwrap_or(true)
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| (a.city.clone(), a.name.clone()).cmp(&(b.city.clone(), b.name.clone())));
        Ok(found)
    }

    async fn cities(&self) -> Result<Vec<CitySummary>> {
        let rows = self.rows.lock().unwrap();
        let mut groups: HashMap<(String, String), Vec<&Pantry>> = HashMap::new();
        for pantry in rows.values() {
            if let (Some(city), Some(state)) = (&pantry.city, &pantry.state) {
                groups
                    .entry((city.clone(), state.clone()))
                    .or_default()
                    .push(pantry);
            }
        }

        let mut summaries: Vec<CitySummary> = groups
            .into_iter()
            .map(|((city, state), pantries)| {
                let n = pantries.len() as f64;
                let lat = pantries.iter().map(|p| p.latitude).sum::<f64>() / n;
                let lng = pantries.iter().map(|p| p.longitude).sum::<f64>() / n;
                CitySummary {
                    city,
                    state,
                    count: pantries.len() as i64,
                    center: GeoPoint::new(lat, lng),
                }
            })
            .collect();
        summaries.sort_by(|a, b| b.count.cmp(&a.count).then(a.city.cmp(&b.city)));
        Ok(summaries)
    }
}

// =============================================================================
// TestDependencies bundle
// =============================================================================

/// All mocks wired into a ServerDeps, with handles kept for assertions.
pub struct TestDependencies {
    pub places: Arc<MockPlacesSearch>,
    pub places_cache: Arc<MemoryPlacesCache>,
    pub scraper: Arc<MockScraper>,
    pub ai: Arc<MockAI>,
    pub store: Arc<MemoryPantryStore>,
    pub stream_hub: StreamHub,
    pub discovery: DiscoveryConfig,
}

impl TestDependencies {
    pub fn new() -> Self {
        Self {
            places: Arc::new(MockPlacesSearch::new()),
            places_cache: Arc::new(MemoryPlacesCache::new()),
            scraper: Arc::new(MockScraper::new()),
            ai: Arc::new(MockAI::new()),
            store: Arc::new(MemoryPantryStore::new()),
            stream_hub: StreamHub::default(),
            discovery: DiscoveryConfig::default(),
        }
    }

    pub fn with_discovery(mut self, discovery: DiscoveryConfig) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn deps(&self) -> ServerDeps {
        ServerDeps::new(
            self.places.clone(),
            self.places_cache.clone(),
            self.scraper.clone(),
            self.ai.clone(),
            self.store.clone(),
            self.stream_hub.clone(),
            self.discovery.clone(),
        )
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}
