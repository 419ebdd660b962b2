//! Application setup and server configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::domains::discovery::DiscoveryOrchestrator;
use crate::domains::pantries::{PostgresPantryStore, PostgresPlacesCache};
use crate::kernel::{
    BaseAI, BasePlacesSearch, ClaudeClient, GooglePlacesClient, NoopAI, NoopPlacesSearch,
    ServerDeps, SimpleScraper, StreamHub,
};
use crate::server::routes::{
    health_handler, ingest_pantry_handler, job_status_handler, list_cities_handler,
    list_pantries_handler, nearby_pantries_handler, start_job_handler, stop_job_handler,
    stream_handler,
};

/// Shared state for route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub orchestrator: Arc<DiscoveryOrchestrator>,
    pub deps: ServerDeps,
}

/// Wire up dependencies and build the axum router.
///
/// Missing provider keys degrade to no-op clients so the service still boots
/// for local development; discovery jobs then complete with zero candidates.
pub fn build_app(pool: PgPool, config: &Config) -> Result<Router> {
    let places: Arc<dyn BasePlacesSearch> = match &config.google_places_api_key {
        Some(key) => Arc::new(
            GooglePlacesClient::new(key.clone()).context("Failed to create places client")?,
        ),
        None => {
            tracing::warn!("GOOGLE_PLACES_API_KEY not set; places search disabled");
            Arc::new(NoopPlacesSearch)
        }
    };

    let ai: Arc<dyn BaseAI> = match &config.anthropic_api_key {
        Some(key) => Arc::new(ClaudeClient::new(key.clone())),
        None => {
            tracing::warn!("ANTHROPIC_API_KEY not set; extraction disabled");
            Arc::new(NoopAI)
        }
    };

    let scraper = Arc::new(SimpleScraper::new().context("Failed to create scraper")?);
    let places_cache = Arc::new(PostgresPlacesCache::new(
        pool.clone(),
        config.discovery.places_cache_ttl_secs,
    ));
    let store = Arc::new(PostgresPantryStore::new(pool.clone()));
    let stream_hub = StreamHub::new(config.discovery.subscriber_buffer);

    let deps = ServerDeps::new(
        places,
        places_cache,
        scraper,
        ai,
        store,
        stream_hub,
        config.discovery.clone(),
    );

    let orchestrator = DiscoveryOrchestrator::new(deps.clone());
    orchestrator.spawn_maintenance();
    spawn_cache_eviction(pool.clone(), config.discovery.places_cache_ttl_secs);

    let state = AppState {
        db_pool: pool,
        orchestrator,
        deps,
    };

    // Job creation fans out to external providers; rate limit it separately
    // from stream subscriptions. Disabled in development where all requests
    // share localhost IP.
    let start_routes = Router::new().route("/api/discovery/jobs", post(start_job_handler));
    #[cfg(not(debug_assertions))]
    let start_routes = {
        use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
        let config = std::sync::Arc::new(
            GovernorConfigBuilder::default()
                .per_second(2)
                .burst_size(5)
                .use_headers()
                .finish()
                .expect("Rate limiter configuration is valid and should never fail"),
        );
        start_routes.layer(GovernorLayer { config })
    };

    let stream_routes =
        Router::new().route("/api/discovery/jobs/:job_id/stream", get(stream_handler));
    #[cfg(not(debug_assertions))]
    let stream_routes = {
        use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
        let config = std::sync::Arc::new(
            GovernorConfigBuilder::default()
                .per_second(5)
                .burst_size(10)
                .use_headers()
                .finish()
                .expect("Rate limiter configuration is valid and should never fail"),
        );
        stream_routes.layer(GovernorLayer { config })
    };

    let router = Router::new()
        .merge(start_routes)
        .merge(stream_routes)
        .route(
            "/api/discovery/jobs/:job_id",
            get(job_status_handler).delete(stop_job_handler),
        )
        .route("/api/pantries", get(list_pantries_handler))
        .route("/api/pantries/nearby", get(nearby_pantries_handler))
        .route("/api/pantries/:pantry_id/ingest", post(ingest_pantry_handler))
        .route("/api/cities", get(list_cities_handler))
        // Health check (no rate limit)
        .route("/health", get(health_handler));

    Ok(router
        .layer(Extension(state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http()))
}

/// Hourly sweep of expired places-cache entries.
fn spawn_cache_eviction(pool: PgPool, ttl_secs: u64) {
    use crate::domains::pantries::models::PlacesCacheEntry;

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(3600));
        loop {
            tick.tick().await;
            match PlacesCacheEntry::evict_expired(ttl_secs, &pool).await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "Evicted expired places-cache entries"),
                Err(e) => tracing::warn!(error = %e, "Places-cache eviction failed"),
            }
        }
    });
}
