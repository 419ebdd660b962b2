//! Cross-layer value types.
//!
//! These are shared between the kernel (provider clients, store traits) and
//! the discovery domain. Anything with business rules lives in the domains.

use serde::{Deserialize, Serialize};

/// A WGS84 coordinate pair.
///
/// Field order here is `lat, lng` for readability; anything that serializes a
/// point for storage or the wire uses `(longitude, latitude)` order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// A pre-enrichment place returned by the places-search provider.
///
/// Candidate sets are unique by `place_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceCandidate {
    pub place_id: String,
    pub name: String,
    pub formatted_address: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub website: Option<String>,
}

/// Aggregate row for the cities listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitySummary {
    pub city: String,
    pub state: String,
    pub count: i64,
    pub center: GeoPoint,
}
