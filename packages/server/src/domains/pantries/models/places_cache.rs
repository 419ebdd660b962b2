use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::common::PlaceCandidate;

/// One cached candidate set, keyed by query fingerprint.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PlacesCacheEntry {
    pub fingerprint: String,
    pub candidates: Json<Vec<PlaceCandidate>>,
    pub created_at: DateTime<Utc>,
}

impl PlacesCacheEntry {
    /// Look up a cached candidate set. Returns None if missing or older than
    /// `ttl_secs`.
    pub async fn get(
        fingerprint: &str,
        ttl_secs: u64,
        pool: &PgPool,
    ) -> Result<Option<Vec<PlaceCandidate>>> {
        let row = sqlx::query_as::<_, Self>(
            "SELECT * FROM places_cache
             WHERE fingerprint = $1
               AND created_at > now() - ($2::double precision * interval '1 second')",
        )
        .bind(fingerprint)
        .bind(ttl_secs as i64)
        .fetch_optional(pool)
        .await?;

        Ok(row.map(|r| r.candidates.0))
    }

    /// Store a candidate set (atomic replace with a fresh created_at).
    pub async fn put(
        fingerprint: &str,
        candidates: &[PlaceCandidate],
        pool: &PgPool,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO places_cache (fingerprint, candidates, created_at)
             VALUES ($1, $2, now())
             ON CONFLICT (fingerprint)
             DO UPDATE SET candidates = EXCLUDED.candidates,
                           created_at = now()",
        )
        .bind(fingerprint)
        .bind(Json(candidates))
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Delete entries older than the TTL.
    pub async fn evict_expired(ttl_secs: u64, pool: &PgPool) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM places_cache
             WHERE created_at <= now() - ($1::double precision * interval '1 second')",
        )
        .bind(ttl_secs as i64)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
