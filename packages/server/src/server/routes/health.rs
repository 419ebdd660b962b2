//! Service health: database reachability, pool utilization, and how many
//! discovery jobs the orchestrator is tracking.

use std::time::Duration;

use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;
use sqlx::PgPool;

use crate::server::app::AppState;

const DB_PING_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
pub struct HealthReport {
    status: &'static str,
    database: DatabaseReport,
    pool: PoolReport,
    discovery: DiscoveryReport,
}

#[derive(Serialize)]
pub struct DatabaseReport {
    reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

#[derive(Serialize)]
pub struct PoolReport {
    connections: u32,
    idle: usize,
    max: u32,
}

#[derive(Serialize)]
pub struct DiscoveryReport {
    /// Jobs in the registry: running plus recently finished (pre-GC).
    jobs_tracked: usize,
}

/// GET /health
///
/// 200 when the pantry store answers a ping inside the timeout, 503
/// otherwise. The payload always carries pool and job-registry numbers so a
/// degraded instance is still inspectable.
pub async fn health_handler(
    Extension(state): Extension<AppState>,
) -> (StatusCode, Json<HealthReport>) {
    let database = ping_database(&state.db_pool).await;

    let pool = PoolReport {
        connections: state.db_pool.size(),
        idle: state.db_pool.num_idle(),
        max: state.db_pool.options().get_max_connections(),
    };

    let discovery = DiscoveryReport {
        jobs_tracked: state.orchestrator.job_count(),
    };

    let (status_code, status) = if database.reachable {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    (
        status_code,
        Json(HealthReport {
            status,
            database,
            pool,
            discovery,
        }),
    )
}

async fn ping_database(pool: &PgPool) -> DatabaseReport {
    match tokio::time::timeout(DB_PING_TIMEOUT, sqlx::query("SELECT 1").execute(pool)).await {
        Ok(Ok(_)) => DatabaseReport {
            reachable: true,
            detail: None,
        },
        Ok(Err(e)) => DatabaseReport {
            reachable: false,
            detail: Some(format!("pantry store query failed: {e}")),
        },
        Err(_) => DatabaseReport {
            reachable: false,
            detail: Some(format!("pantry store ping exceeded {DB_PING_TIMEOUT:?}")),
        },
    }
}
