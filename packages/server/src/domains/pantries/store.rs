//! Postgres-backed implementations of the store and cache traits.
//!
//! Thin adapters: the SQL lives on the models, these satisfy the kernel
//! traits so the orchestrator can also run against in-memory doubles.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::common::{CitySummary, GeoPoint, PlaceCandidate};
use crate::kernel::{BasePantryStore, BasePlacesCache};

use super::models::{NearbyPantry, Pantry, PantryDraft, PlacesCacheEntry};

pub struct PostgresPantryStore {
    pool: PgPool,
}

impl PostgresPantryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BasePantryStore for PostgresPantryStore {
    async fn upsert(&self, draft: &PantryDraft) -> Result<Pantry> {
        Pantry::upsert(draft, &self.pool).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Pantry>> {
        Pantry::find_by_id(id, &self.pool).await
    }

    async fn existing_place_ids(&self, place_ids: &[String]) -> Result<HashSet<String>> {
        let found = Pantry::existing_place_ids(place_ids, &self.pool).await?;
        Ok(found.into_iter().collect())
    }

    async fn count_within_radius(&self, center: GeoPoint, radius_m: f64) -> Result<i64> {
        Pantry::count_within_radius(center, radius_m, &self.pool).await
    }

    async fn nearby(
        &self,
        center: GeoPoint,
        max_distance_m: f64,
        limit: i64,
    ) -> Result<Vec<NearbyPantry>> {
        Pantry::nearby(center, max_distance_m, limit, &self.pool).await
    }

    async fn list(&self, city: Option<&str>, state: Option<&str>) -> Result<Vec<Pantry>> {
        Pantry::list(city, state, &self.pool).await
    }

    async fn cities(&self) -> Result<Vec<CitySummary>> {
        Pantry::cities(&self.pool).await
    }
}

pub struct PostgresPlacesCache {
    pool: PgPool,
    ttl_secs: u64,
}

impl PostgresPlacesCache {
    pub fn new(pool: PgPool, ttl_secs: u64) -> Self {
        Self { pool, ttl_secs }
    }
}

#[async_trait]
impl BasePlacesCache for PostgresPlacesCache {
    async fn get(&self, fingerprint: &str) -> Result<Option<Vec<PlaceCandidate>>> {
        PlacesCacheEntry::get(fingerprint, self.ttl_secs, &self.pool).await
    }

    async fn put(&self, fingerprint: &str, candidates: &[PlaceCandidate]) -> Result<()> {
        PlacesCacheEntry::put(fingerprint, candidates, &self.pool).await
    }
}
