//! Server dependencies for the discovery core (using traits for testability)
//!
//! This is the composition root handed to the orchestrator and domain
//! functions. All external services sit behind trait abstractions so tests
//! can run the real orchestrator against in-memory doubles.

use std::sync::Arc;

use crate::config::DiscoveryConfig;
use crate::kernel::{
    stream_hub::StreamHub, BaseAI, BasePantryStore, BasePlacesCache, BasePlacesSearch,
    BaseWebScraper,
};

/// Dependencies accessible to the discovery core.
#[derive(Clone)]
pub struct ServerDeps {
    /// Places-search provider (text search + details fallback)
    pub places: Arc<dyn BasePlacesSearch>,
    /// TTL cache over candidate sets
    pub places_cache: Arc<dyn BasePlacesCache>,
    /// Web scraper producing markdown
    pub scraper: Arc<dyn BaseWebScraper>,
    /// LLM client for field extraction
    pub ai: Arc<dyn BaseAI>,
    /// Pantry persistence
    pub store: Arc<dyn BasePantryStore>,
    /// In-process pub/sub hub for real-time streaming to SSE endpoints
    pub stream_hub: StreamHub,
    /// Discovery tunables (timeouts, concurrency, cache policy)
    pub discovery: DiscoveryConfig,
}

impl ServerDeps {
    pub fn new(
        places: Arc<dyn BasePlacesSearch>,
        places_cache: Arc<dyn BasePlacesCache>,
        scraper: Arc<dyn BaseWebScraper>,
        ai: Arc<dyn BaseAI>,
        store: Arc<dyn BasePantryStore>,
        stream_hub: StreamHub,
        discovery: DiscoveryConfig,
    ) -> Self {
        Self {
            places,
            places_cache,
            scraper,
            ai,
            store,
            stream_hub,
            discovery,
        }
    }
}
