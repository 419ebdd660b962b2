use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::BasePlacesSearch;
use crate::common::{GeoPoint, PlaceCandidate};

const SEARCH_URL: &str = "https://places.googleapis.com/v1/places:searchText";
const DETAILS_URL: &str = "https://places.googleapis.com/v1/places";

const SEARCH_FIELD_MASK: &str =
    "places.id,places.displayName,places.formattedAddress,places.location,places.websiteUri";

/// Google Places (New) API client for text search
pub struct GooglePlacesClient {
    api_key: String,
    client: reqwest::Client,
}

/// Text-search request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest {
    text_query: String,
    location_bias: LocationBias,
    max_result_count: usize,
}

#[derive(Debug, Serialize)]
struct LocationBias {
    circle: Circle,
}

#[derive(Debug, Serialize)]
struct Circle {
    center: LatLng,
    radius: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct LatLng {
    latitude: f64,
    longitude: f64,
}

/// Text-search response
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    places: Vec<Place>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Place {
    id: String,
    display_name: Option<DisplayName>,
    formatted_address: Option<String>,
    location: Option<LatLng>,
    website_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DisplayName {
    text: String,
}

/// Place-details response (website lookup only)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetailsResponse {
    website_uri: Option<String>,
}

impl GooglePlacesClient {
    /// Create a new Places client
    pub fn new(api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { api_key, client })
    }
}

impl Place {
    fn into_candidate(self) -> Option<PlaceCandidate> {
        let location = self.location?;
        Some(PlaceCandidate {
            place_id: self.id,
            name: self.display_name.map(|n| n.text).unwrap_or_default(),
            formatted_address: self.formatted_address.unwrap_or_default(),
            lat: location.latitude,
            lng: location.longitude,
            website: self.website_uri,
        })
    }
}

#[async_trait]
impl BasePlacesSearch for GooglePlacesClient {
    async fn search(
        &self,
        query: &str,
        center: GeoPoint,
        radius_m: f64,
    ) -> Result<Vec<PlaceCandidate>> {
        let request = SearchRequest {
            text_query: query.to_string(),
            location_bias: LocationBias {
                circle: Circle {
                    center: LatLng {
                        latitude: center.lat,
                        longitude: center.lng,
                    },
                    // Provider caps circle bias at 50km
                    radius: radius_m.min(50_000.0),
                },
            },
            max_result_count: 20,
        };

        let response = self
            .client
            .post(SEARCH_URL)
            .header("X-Goog-Api-Key", &self.api_key)
            .header("X-Goog-FieldMask", SEARCH_FIELD_MASK)
            .json(&request)
            .send()
            .await
            .context("Failed to send places search request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Places API error {}: {}", status, body);
        }

        let search_response: SearchResponse = response
            .json()
            .await
            .context("Failed to parse places search response")?;

        Ok(search_response
            .places
            .into_iter()
            .filter_map(Place::into_candidate)
            .collect())
    }

    async fn website_for(&self, place_id: &str) -> Result<Option<String>> {
        let url = format!("{}/{}", DETAILS_URL, place_id);

        let response = self
            .client
            .get(&url)
            .header("X-Goog-Api-Key", &self.api_key)
            .header("X-Goog-FieldMask", "websiteUri")
            .send()
            .await
            .context("Failed to send place details request")?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("Place details error {} for {}", status, place_id);
        }

        let details: DetailsResponse = response
            .json()
            .await
            .context("Failed to parse place details response")?;

        Ok(details.website_uri)
    }
}

/// No-op search service for testing or when API key not configured
pub struct NoopPlacesSearch;

#[async_trait]
impl BasePlacesSearch for NoopPlacesSearch {
    async fn search(
        &self,
        _query: &str,
        _center: GeoPoint,
        _radius_m: f64,
    ) -> Result<Vec<PlaceCandidate>> {
        tracing::warn!("NoopPlacesSearch: search called but no GOOGLE_PLACES_API_KEY configured");
        Ok(vec![])
    }

    async fn website_for(&self, _place_id: &str) -> Result<Option<String>> {
        Ok(None)
    }
}
