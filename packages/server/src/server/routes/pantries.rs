//! Pantry query endpoints: list, nearby, cities, synchronous re-ingest.

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::common::{CitySummary, GeoPoint};
use crate::domains::pantries::models::{NearbyPantry, Pantry};
use crate::server::app::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub city: Option<String>,
    pub state: Option<String>,
}

/// GET /api/pantries?city=&state=
pub async fn list_pantries_handler(
    Extension(state): Extension<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Pantry>>, StatusCode> {
    state
        .deps
        .store
        .list(query.city.as_deref(), query.state.as_deref())
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!(error = %e, "Pantry list failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

#[derive(Debug, Deserialize)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lng: f64,
    pub max_distance_m: f64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

/// GET /api/pantries/nearby?lat=&lng=&max_distance_m=&limit=
pub async fn nearby_pantries_handler(
    Extension(state): Extension<AppState>,
    Query(query): Query<NearbyQuery>,
) -> Result<Json<Vec<NearbyPantry>>, StatusCode> {
    if !query.lat.is_finite() || !query.lng.is_finite() || query.max_distance_m <= 0.0 {
        return Err(StatusCode::BAD_REQUEST);
    }

    state
        .deps
        .store
        .nearby(
            GeoPoint::new(query.lat, query.lng),
            query.max_distance_m,
            query.limit.clamp(1, 500),
        )
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!(error = %e, "Nearby query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

/// GET /api/cities
pub async fn list_cities_handler(
    Extension(state): Extension<AppState>,
) -> Result<Json<Vec<CitySummary>>, StatusCode> {
    state.deps.store.cities().await.map(Json).map_err(|e| {
        tracing::error!(error = %e, "City listing failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// POST /api/pantries/:pantry_id/ingest
///
/// Synchronous scrape + extract for one stored pantry; returns the updated
/// record.
pub async fn ingest_pantry_handler(
    Extension(state): Extension<AppState>,
    Path(pantry_id): Path<Uuid>,
) -> Result<Json<Pantry>, StatusCode> {
    match state.orchestrator.ingest_pantry(pantry_id).await {
        Ok(Some(pantry)) => Ok(Json(pantry)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(pantry_id = %pantry_id, error = %e, "Re-ingest failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
