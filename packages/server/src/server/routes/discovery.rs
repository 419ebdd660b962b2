//! Discovery job endpoints: create, inspect, stop.

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::GeoPoint;
use crate::domains::discovery::{DiscoveryJob, StartJobRequest};
use crate::server::app::AppState;

#[derive(Debug, Deserialize)]
pub struct StartJobBody {
    pub query: String,
    pub lat: f64,
    pub lng: f64,
    pub radius_meters: f64,
    #[serde(default)]
    pub variants: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct StartJobResponse {
    pub job_id: Uuid,
    pub existing_pantries: i64,
    /// SSE endpoint carrying this job's events.
    pub stream_url: String,
}

/// POST /api/discovery/jobs
pub async fn start_job_handler(
    Extension(state): Extension<AppState>,
    Json(body): Json<StartJobBody>,
) -> Result<Json<StartJobResponse>, StatusCode> {
    if !body.lat.is_finite() || !body.lng.is_finite() || body.radius_meters <= 0.0 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let outcome = state
        .orchestrator
        .start_job(StartJobRequest {
            query: body.query,
            center: GeoPoint::new(body.lat, body.lng),
            radius_m: body.radius_meters,
            variants: body.variants,
        })
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to start discovery job");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(StartJobResponse {
        job_id: outcome.job_id,
        existing_pantries: outcome.existing_pantries,
        stream_url: format!("/api/discovery/jobs/{}/stream", outcome.job_id),
    }))
}

/// GET /api/discovery/jobs/:job_id
pub async fn job_status_handler(
    Extension(state): Extension<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<DiscoveryJob>, StatusCode> {
    state
        .orchestrator
        .job_status(job_id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(Debug, Serialize)]
pub struct StopJobResponse {
    pub job_id: Uuid,
    pub cancelled: bool,
}

/// DELETE /api/discovery/jobs/:job_id
///
/// Idempotent: stopping an already-stopped (but not yet GC'd) job acks again.
pub async fn stop_job_handler(
    Extension(state): Extension<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<StopJobResponse>, StatusCode> {
    if state.orchestrator.stop_job(job_id) {
        Ok(Json(StopJobResponse {
            job_id,
            cancelled: true,
        }))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}
