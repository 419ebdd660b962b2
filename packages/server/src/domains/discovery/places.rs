//! Candidate lookup: provider fan-out, dedup, and the fingerprint cache.
//!
//! One provider search per query variant runs in parallel, fail-soft per
//! variant. Results are unioned by `place_id` and cached under a fingerprint
//! of the rounded center, radius and variant set, so nearby queries share
//! cache entries.

use std::collections::HashSet;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::common::{GeoPoint, PlaceCandidate};
use crate::kernel::ServerDeps;

/// All query variants failed; nothing to discover against.
#[derive(Debug, thiserror::Error)]
#[error("places provider unavailable: all {variants} variant searches failed")]
pub struct UpstreamUnavailable {
    pub variants: usize,
}

/// Stable cache key over `(round(lat), round(lng), radius, sorted variants)`.
///
/// Coordinate rounding is the only cache-sharing mechanism: queries within
/// ~100m of each other (at 3 decimal places) hit the same entry.
pub fn fingerprint(center: GeoPoint, radius_m: f64, variants: &[String], round_places: u32) -> String {
    let mut sorted: Vec<&str> = variants.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let places = round_places as usize;
    let canonical = format!(
        "{lat:.places$}|{lng:.places$}|{radius:.0}|{variants}",
        lat = center.lat,
        lng = center.lng,
        radius = radius_m,
        variants = sorted.join("\x1f"),
    );

    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}

/// Resolve the candidate set for a query, consulting the cache first.
///
/// Cache read/write failures are tolerated (a broken cache degrades to
/// provider calls, it never fails the lookup or poisons future entries).
pub async fn find_candidates(
    deps: &ServerDeps,
    center: GeoPoint,
    radius_m: f64,
    variants: &[String],
) -> Result<Vec<PlaceCandidate>, UpstreamUnavailable> {
    let config = &deps.discovery;
    let key = fingerprint(center, radius_m, variants, config.places_lat_lng_round);

    match deps.places_cache.get(&key).await {
        Ok(Some(cached)) => {
            info!(fingerprint = %key, candidates = cached.len(), "Places cache hit");
            return Ok(cached);
        }
        Ok(None) => debug!(fingerprint = %key, "Places cache miss"),
        Err(e) => warn!(fingerprint = %key, error = %e, "Places cache read failed"),
    }

    // One search per variant, in parallel, each under its own timeout.
    let searches = variants.iter().map(|variant| {
        let places = Arc::clone(&deps.places);
        let variant = variant.clone();
        let timeout = config.places_timeout;
        async move {
            let result =
                tokio::time::timeout(timeout, places.search(&variant, center, radius_m)).await;
            match result {
                Ok(Ok(candidates)) => {
                    debug!(variant = %variant, count = candidates.len(), "Variant search ok");
                    Some(candidates)
                }
                Ok(Err(e)) => {
                    warn!(variant = %variant, error = %e, "Variant search failed");
                    None
                }
                Err(_) => {
                    warn!(variant = %variant, "Variant search timed out");
                    None
                }
            }
        }
    });

    let results = futures::future::join_all(searches).await;

    let succeeded = results.iter().filter(|r| r.is_some()).count();
    if succeeded == 0 {
        return Err(UpstreamUnavailable {
            variants: variants.len(),
        });
    }

    // Union keyed by place_id, first occurrence wins.
    let mut seen: HashSet<String> = HashSet::new();
    let mut candidates: Vec<PlaceCandidate> = Vec::new();
    for result in results.into_iter().flatten() {
        for candidate in result {
            if seen.insert(candidate.place_id.clone()) {
                candidates.push(candidate);
            }
        }
    }

    // Details fallback for candidates missing a website; failures tolerated.
    let lookups = candidates.iter().enumerate().filter_map(|(i, c)| {
        if c.website.is_some() {
            return None;
        }
        let places = Arc::clone(&deps.places);
        let place_id = c.place_id.clone();
        Some(async move {
            match places.website_for(&place_id).await {
                Ok(website) => (i, website),
                Err(e) => {
                    debug!(place_id = %place_id, error = %e, "Website lookup failed");
                    (i, None)
                }
            }
        })
    });
    for (i, website) in futures::future::join_all(lookups).await {
        candidates[i].website = website;
    }

    if let Err(e) = deps.places_cache.put(&key, &candidates).await {
        warn!(fingerprint = %key, error = %e, "Places cache write failed");
    }

    info!(
        fingerprint = %key,
        variants_ok = succeeded,
        variants_total = variants.len(),
        candidates = candidates.len(),
        "Places lookup complete"
    );

    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::TestDependencies;

    fn variants() -> Vec<String> {
        vec!["food bank".to_string(), "food pantry".to_string()]
    }

    fn candidate(place_id: &str, website: Option<&str>) -> PlaceCandidate {
        PlaceCandidate {
            place_id: place_id.to_string(),
            name: format!("Pantry {place_id}"),
            formatted_address: "1 Main St, Denver, CO 80202, USA".to_string(),
            lat: 39.74,
            lng: -104.99,
            website: website.map(String::from),
        }
    }

    #[test]
    fn fingerprint_stable_under_coordinate_jitter() {
        let a = fingerprint(GeoPoint::new(39.7390, -104.9900), 8000.0, &variants(), 3);
        let b = fingerprint(
            GeoPoint::new(39.73904, -104.98998),
            8000.0,
            &variants(),
            3,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_on_radius_and_variants() {
        let base = fingerprint(GeoPoint::new(39.739, -104.990), 8000.0, &variants(), 3);
        let other_radius = fingerprint(GeoPoint::new(39.739, -104.990), 9000.0, &variants(), 3);
        assert_ne!(base, other_radius);

        let mut more = variants();
        more.push("community food".to_string());
        let other_variants = fingerprint(GeoPoint::new(39.739, -104.990), 8000.0, &more, 3);
        assert_ne!(base, other_variants);
    }

    #[test]
    fn fingerprint_ignores_variant_order() {
        let forward = fingerprint(GeoPoint::new(39.739, -104.990), 8000.0, &variants(), 3);
        let mut reversed = variants();
        reversed.reverse();
        let backward = fingerprint(GeoPoint::new(39.739, -104.990), 8000.0, &reversed, 3);
        assert_eq!(forward, backward);
    }

    #[tokio::test]
    async fn second_lookup_hits_cache_with_zero_provider_calls() {
        let test_deps = TestDependencies::new();
        test_deps.places.set_results(vec![candidate("p1", Some("https://p1.org"))]);
        let deps = test_deps.deps();
        let center = GeoPoint::new(39.739, -104.990);

        let first = find_candidates(&deps, center, 8000.0, &variants()).await.unwrap();
        assert_eq!(first.len(), 1);
        let calls_after_first = test_deps.places.search_call_count();
        assert_eq!(calls_after_first, 2); // one per variant

        // Slightly jittered center rounds to the same fingerprint.
        let second = find_candidates(
            &deps,
            GeoPoint::new(39.73901, -104.99002),
            8000.0,
            &variants(),
        )
        .await
        .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(test_deps.places.search_call_count(), calls_after_first);
        assert_eq!(test_deps.places_cache.put_count(), 1);
    }

    #[tokio::test]
    async fn expired_cache_issues_provider_calls_again() {
        let test_deps = TestDependencies::new();
        test_deps.places.set_results(vec![candidate("p1", Some("https://p1.org"))]);
        let deps = test_deps.deps();
        let center = GeoPoint::new(39.739, -104.990);

        find_candidates(&deps, center, 8000.0, &variants()).await.unwrap();
        test_deps.places_cache.expire_all();

        find_candidates(&deps, center, 8000.0, &variants()).await.unwrap();
        assert_eq!(test_deps.places.search_call_count(), 4);
        assert_eq!(test_deps.places_cache.put_count(), 2);
    }

    #[tokio::test]
    async fn overlapping_variants_dedupe_by_place_id() {
        let test_deps = TestDependencies::new();
        test_deps.places.set_variant_results(
            "food bank",
            vec![candidate("shared", Some("https://a.org")), candidate("only-bank", None)],
        );
        test_deps.places.set_variant_results(
            "food pantry",
            vec![candidate("shared", Some("https://a.org")), candidate("only-pantry", None)],
        );
        let deps = test_deps.deps();

        let found = find_candidates(&deps, GeoPoint::new(39.7, -105.0), 8000.0, &variants())
            .await
            .unwrap();

        let ids: Vec<&str> = found.iter().map(|c| c.place_id.as_str()).collect();
        assert_eq!(found.len(), 3);
        assert_eq!(ids.iter().filter(|id| **id == "shared").count(), 1);
    }

    #[tokio::test]
    async fn website_fallback_fills_missing_sites() {
        let test_deps = TestDependencies::new();
        test_deps
            .places
            .set_results(vec![candidate("p1", None), candidate("p2", Some("https://p2.org"))]);
        test_deps.places.set_website("p1", "https://recovered.org");
        let deps = test_deps.deps();

        let found = find_candidates(&deps, GeoPoint::new(39.7, -105.0), 8000.0, &variants())
            .await
            .unwrap();

        let p1 = found.iter().find(|c| c.place_id == "p1").unwrap();
        assert_eq!(p1.website.as_deref(), Some("https://recovered.org"));
        // Only the candidate missing a website triggered a details call.
        assert_eq!(test_deps.places.details_call_count(), 1);
    }

    #[tokio::test]
    async fn partial_variant_failure_returns_union() {
        let test_deps = TestDependencies::new();
        test_deps.places.set_variant_results("food bank", vec![candidate("p1", None)]);
        test_deps.places.fail_variant("food pantry");
        let deps = test_deps.deps();

        let found = find_candidates(&deps, GeoPoint::new(39.7, -105.0), 8000.0, &variants())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn all_variants_failing_is_upstream_unavailable() {
        let test_deps = TestDependencies::new();
        test_deps.places.set_fail_all(true);
        let deps = test_deps.deps();

        let result = find_candidates(&deps, GeoPoint::new(39.7, -105.0), 8000.0, &variants()).await;
        assert!(result.is_err());
        // A failed lookup never poisons the cache.
        assert_eq!(test_deps.places_cache.put_count(), 0);
    }
}
