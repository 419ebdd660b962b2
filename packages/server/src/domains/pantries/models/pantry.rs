use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::common::{CitySummary, GeoPoint};

/// Default eligibility text when a source lists no restrictions.
pub const OPEN_TO_ALL: &str = "Open to all - no restrictions listed";

/// Operational status of a pantry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PantryStatus {
    Open,
    Closed,
    Waitlist,
    Unknown,
}

impl PantryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PantryStatus::Open => "OPEN",
            PantryStatus::Closed => "CLOSED",
            PantryStatus::Waitlist => "WAITLIST",
            PantryStatus::Unknown => "UNKNOWN",
        }
    }

    /// Coerce a loose string to the enum; anything unrecognized is Unknown.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "OPEN" => PantryStatus::Open,
            "CLOSED" => PantryStatus::Closed,
            "WAITLIST" => PantryStatus::Waitlist,
            _ => PantryStatus::Unknown,
        }
    }
}

/// Canonical enriched pantry record (one row in `pantries`).
///
/// `place_id` is the upsert key; `latitude`/`longitude` feed the haversine
/// radius queries.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Pantry {
    pub id: Uuid,
    pub place_id: Option<String>,
    pub name: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub status: String, // 'OPEN', 'CLOSED', 'WAITLIST', 'UNKNOWN'
    pub hours_notes: Option<String>,
    pub hours_today: Option<String>,
    pub eligibility_rules: Vec<String>,
    pub is_id_required: bool,
    pub residency_req: Option<String>,
    pub special_notes: Option<String>,
    pub confidence: i32,
    pub source_url: Option<String>,
    pub scrape_method: Option<String>,
    pub scraped_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

impl Pantry {
    /// Coordinates as a `(longitude, latitude)` pair, GeoJSON order.
    pub fn point(&self) -> (f64, f64) {
        (self.longitude, self.latitude)
    }

    pub fn status(&self) -> PantryStatus {
        PantryStatus::parse(&self.status)
    }
}

/// A validated record ready for storage (everything except the row identity).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PantryDraft {
    pub place_id: Option<String>,
    pub name: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub status: PantryStatus,
    pub hours_notes: Option<String>,
    pub hours_today: Option<String>,
    pub eligibility_rules: Vec<String>,
    pub is_id_required: bool,
    pub residency_req: Option<String>,
    pub special_notes: Option<String>,
    pub confidence: i32,
    pub source_url: Option<String>,
    pub scrape_method: Option<String>,
    pub scraped_at: Option<DateTime<Utc>>,
}

/// A pantry plus its distance from a query point.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct NearbyPantry {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub pantry: Pantry,
    pub distance_m: f64,
}

impl Pantry {
    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        let pantry = sqlx::query_as::<_, Self>("SELECT * FROM pantries WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(pantry)
    }

    pub async fn find_by_place_id(place_id: &str, pool: &PgPool) -> Result<Option<Self>> {
        let pantry = sqlx::query_as::<_, Self>("SELECT * FROM pantries WHERE place_id = $1")
            .bind(place_id)
            .fetch_optional(pool)
            .await?;
        Ok(pantry)
    }

    /// Insert-or-update keyed by `place_id`.
    ///
    /// Concurrent upserts for the same place converge via the unique index.
    /// A stored value is never replaced with null; a places-only re-run never
    /// downgrades the confidence of an enriched row; `last_updated` only
    /// moves forward.
    pub async fn upsert(draft: &PantryDraft, pool: &PgPool) -> Result<Self> {
        let pantry = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO pantries (
                id, place_id, name, address, city, state, latitude, longitude,
                status, hours_notes, hours_today, eligibility_rules, is_id_required,
                residency_req, special_notes, confidence, source_url, scrape_method,
                scraped_at, last_updated
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, now())
            ON CONFLICT (place_id) DO UPDATE SET
                name = EXCLUDED.name,
                address = COALESCE(EXCLUDED.address, pantries.address),
                city = COALESCE(EXCLUDED.city, pantries.city),
                state = COALESCE(EXCLUDED.state, pantries.state),
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude,
                status = CASE WHEN EXCLUDED.status <> 'UNKNOWN' THEN EXCLUDED.status ELSE pantries.status END,
                hours_notes = COALESCE(EXCLUDED.hours_notes, pantries.hours_notes),
                hours_today = COALESCE(EXCLUDED.hours_today, pantries.hours_today),
                eligibility_rules = EXCLUDED.eligibility_rules,
                is_id_required = EXCLUDED.is_id_required,
                residency_req = COALESCE(EXCLUDED.residency_req, pantries.residency_req),
                special_notes = COALESCE(EXCLUDED.special_notes, pantries.special_notes),
                confidence = CASE
                    WHEN EXCLUDED.source_url IS NULL THEN GREATEST(pantries.confidence, EXCLUDED.confidence)
                    ELSE EXCLUDED.confidence
                END,
                source_url = COALESCE(EXCLUDED.source_url, pantries.source_url),
                scrape_method = COALESCE(EXCLUDED.scrape_method, pantries.scrape_method),
                scraped_at = COALESCE(EXCLUDED.scraped_at, pantries.scraped_at),
                last_updated = now()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&draft.place_id)
        .bind(&draft.name)
        .bind(&draft.address)
        .bind(&draft.city)
        .bind(&draft.state)
        .bind(draft.latitude)
        .bind(draft.longitude)
        .bind(draft.status.as_str())
        .bind(&draft.hours_notes)
        .bind(&draft.hours_today)
        .bind(&draft.eligibility_rules)
        .bind(draft.is_id_required)
        .bind(&draft.residency_req)
        .bind(&draft.special_notes)
        .bind(draft.confidence)
        .bind(&draft.source_url)
        .bind(&draft.scrape_method)
        .bind(draft.scraped_at)
        .fetch_one(pool)
        .await?;
        Ok(pantry)
    }

    /// Which of the given provider ids already have rows.
    pub async fn existing_place_ids(place_ids: &[String], pool: &PgPool) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT place_id FROM pantries WHERE place_id = ANY($1)",
        )
        .bind(place_ids)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn count_within_radius(
        center: GeoPoint,
        radius_m: f64,
        pool: &PgPool,
    ) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM pantries
             WHERE haversine_distance($1, $2, latitude, longitude) <= $3",
        )
        .bind(center.lat)
        .bind(center.lng)
        .bind(radius_m / 1000.0)
        .fetch_one(pool)
        .await?;
        Ok(count)
    }

    /// Pantries within the radius, closest first.
    ///
    /// Uses the haversine_distance SQL function (kilometers).
    pub async fn nearby(
        center: GeoPoint,
        max_distance_m: f64,
        limit: i64,
        pool: &PgPool,
    ) -> Result<Vec<NearbyPantry>> {
        let pantries = sqlx::query_as::<_, NearbyPantry>(
            r#"
            SELECT *,
                   haversine_distance($1, $2, latitude, longitude) * 1000.0 AS distance_m
            FROM pantries
            WHERE haversine_distance($1, $2, latitude, longitude) <= $3
            ORDER BY distance_m ASC
            LIMIT $4
            "#,
        )
        .bind(center.lat)
        .bind(center.lng)
        .bind(max_distance_m / 1000.0)
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(pantries)
    }

    pub async fn list(
        city: Option<&str>,
        state: Option<&str>,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let pantries = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM pantries
            WHERE ($1::text IS NULL OR city ILIKE $1)
              AND ($2::text IS NULL OR state ILIKE $2)
            ORDER BY city NULLS LAST, name
            "#,
        )
        .bind(city)
        .bind(state)
        .fetch_all(pool)
        .await?;
        Ok(pantries)
    }

    /// Distinct cities with pantry counts and an averaged center point.
    pub async fn cities(pool: &PgPool) -> Result<Vec<CitySummary>> {
        let rows: Vec<(String, String, i64, f64, f64)> = sqlx::query_as(
            r#"
            SELECT city, state, COUNT(*) AS count,
                   AVG(latitude) AS lat, AVG(longitude) AS lng
            FROM pantries
            WHERE city IS NOT NULL AND state IS NOT NULL
            GROUP BY city, state
            ORDER BY count DESC, city
            "#,
        )
        .fetch_all(pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(city, state, count, lat, lng)| CitySummary {
                city,
                state,
                count,
                center: GeoPoint::new(lat, lng),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parse_is_lenient() {
        assert_eq!(PantryStatus::parse("open"), PantryStatus::Open);
        assert_eq!(PantryStatus::parse(" WAITLIST "), PantryStatus::Waitlist);
        assert_eq!(PantryStatus::parse("permanently closed"), PantryStatus::Unknown);
        assert_eq!(PantryStatus::parse(""), PantryStatus::Unknown);
    }

    #[test]
    fn status_round_trips_as_str() {
        for status in [
            PantryStatus::Open,
            PantryStatus::Closed,
            PantryStatus::Waitlist,
            PantryStatus::Unknown,
        ] {
            assert_eq!(PantryStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn point_is_lng_lat_order() {
        let pantry = Pantry {
            id: Uuid::new_v4(),
            place_id: Some("p1".into()),
            name: "Test".into(),
            address: None,
            city: None,
            state: None,
            latitude: 39.7,
            longitude: -104.9,
            status: "OPEN".into(),
            hours_notes: None,
            hours_today: None,
            eligibility_rules: vec![OPEN_TO_ALL.into()],
            is_id_required: false,
            residency_req: None,
            special_notes: None,
            confidence: 5,
            source_url: None,
            scrape_method: None,
            scraped_at: None,
            last_updated: Utc::now(),
        };
        assert_eq!(pantry.point(), (-104.9, 39.7));
    }
}
