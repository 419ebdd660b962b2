use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub anthropic_api_key: Option<String>,
    pub google_places_api_key: Option<String>,
    pub discovery: DiscoveryConfig,
}

/// Discovery core tunables. Defaults match production; every value can be
/// overridden from the environment.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Query strings submitted to the places provider per discovery
    pub places_variants: Vec<String>,
    /// Seconds before a cached candidate set expires
    pub places_cache_ttl_secs: u64,
    /// Global worker pool width across all jobs
    pub worker_concurrency: usize,
    /// Per-URL scrape budget
    pub scrape_timeout: Duration,
    /// Per-call extraction budget
    pub extract_timeout: Duration,
    /// Per-variant places search budget
    pub places_timeout: Duration,
    /// Hard ceiling for a whole job, after which it is auto-cancelled
    pub job_timeout: Duration,
    /// Minimum interval between progress events
    pub progress_coalesce_ms: u64,
    /// Per-subscriber event buffer; a subscriber that falls this many events
    /// behind is dropped rather than back-pressuring the publisher
    pub subscriber_buffer: usize,
    /// Decimal places used when rounding coordinates into cache fingerprints
    pub places_lat_lng_round: u32,
    /// How long terminal jobs stay queryable before the registry GC runs
    pub job_gc_grace: Duration,
    /// After all subscribers disconnect, how long before the job is cancelled
    pub subscriber_idle_grace: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            places_variants: vec![
                "food bank".to_string(),
                "food pantry".to_string(),
                "food distribution".to_string(),
                "community food".to_string(),
            ],
            places_cache_ttl_secs: 604_800, // 7 days
            worker_concurrency: 6,
            scrape_timeout: Duration::from_secs(30),
            extract_timeout: Duration::from_secs(45),
            places_timeout: Duration::from_secs(15),
            job_timeout: Duration::from_secs(600),
            progress_coalesce_ms: 250,
            subscriber_buffer: 256,
            places_lat_lng_round: 3,
            job_gc_grace: Duration::from_secs(900),
            subscriber_idle_grace: Duration::from_secs(120),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            anthropic_api_key: env::var("ANTHROPIC_API_KEY").ok(),
            google_places_api_key: env::var("GOOGLE_PLACES_API_KEY").ok(),
            discovery: DiscoveryConfig::from_env(),
        })
    }
}

impl DiscoveryConfig {
    /// Defaults overridden by any matching environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(variants) = env_string("PLACES_VARIANTS") {
            let parsed: Vec<String> = variants
                .split(',')
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
            if !parsed.is_empty() {
                config.places_variants = parsed;
            }
        }
        if let Some(ttl) = env_parse("PLACES_CACHE_TTL_SECS") {
            config.places_cache_ttl_secs = ttl;
        }
        if let Some(n) = env_parse("WORKER_CONCURRENCY") {
            config.worker_concurrency = n;
        }
        if let Some(secs) = env_parse("SCRAPE_TIMEOUT_SECS") {
            config.scrape_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse("EXTRACT_TIMEOUT_SECS") {
            config.extract_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse("PLACES_TIMEOUT_SECS") {
            config.places_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse("JOB_TIMEOUT_SECS") {
            config.job_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = env_parse("PROGRESS_COALESCE_MS") {
            config.progress_coalesce_ms = ms;
        }
        if let Some(n) = env_parse("SUBSCRIBER_BUFFER") {
            config.subscriber_buffer = n;
        }
        if let Some(n) = env_parse("PLACES_LAT_LNG_ROUND") {
            config.places_lat_lng_round = n;
        }
        if let Some(secs) = env_parse("JOB_GC_GRACE_SECS") {
            config.job_gc_grace = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse("SUBSCRIBER_IDLE_GRACE_SECS") {
            config.subscriber_idle_grace = Duration::from_secs(secs);
        }

        config
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_defaults_match_documented_values() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.places_variants.len(), 4);
        assert_eq!(config.places_cache_ttl_secs, 604_800);
        assert_eq!(config.worker_concurrency, 6);
        assert_eq!(config.scrape_timeout, Duration::from_secs(30));
        assert_eq!(config.extract_timeout, Duration::from_secs(45));
        assert_eq!(config.places_timeout, Duration::from_secs(15));
        assert_eq!(config.job_timeout, Duration::from_secs(600));
        assert_eq!(config.progress_coalesce_ms, 250);
        assert_eq!(config.places_lat_lng_round, 3);
    }
}
