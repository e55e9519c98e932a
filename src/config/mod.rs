use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub scraper: ScraperConfig,
    pub scrape: ScrapeConfig,
    pub storage: StorageConfig,

    /// Per-source enable flags keyed by slug; sources not listed are enabled.
    #[serde(default)]
    pub sources: BTreeMap<String, bool>,
}

/// Transport and session settings shared by all adapters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    /// Minimum spacing between outbound requests. Hard floor, no bursts.
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,

    /// Extra random delay added on top of the floor.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_true")]
    pub headless: bool,

    /// Safety cap on paginated grid/matrix pages per run.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Concurrent requests per batch for the REST adapters.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

/// What to scrape: horizon, occupancy, tracked stay lengths
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScrapeConfig {
    #[serde(default = "default_days_ahead")]
    pub days_ahead: Vec<i64>,

    #[serde(default = "default_horizon_days")]
    pub horizon_days: i64,

    #[serde(default = "default_months_ahead")]
    pub months_ahead: u32,

    #[serde(default = "default_persons")]
    pub persons: u32,

    /// Canonical night counts; quotes for other stay lengths are dropped.
    #[serde(default = "default_accepted_nights")]
    pub accepted_nights: Vec<u32>,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_rate_limit_ms() -> u64 {
    5000
}
fn default_jitter_ms() -> u64 {
    500
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36"
        .to_string()
}
fn default_max_pages() -> u32 {
    30
}
fn default_batch_size() -> usize {
    10
}
fn default_days_ahead() -> Vec<i64> {
    vec![7, 14, 21, 30, 45, 60, 90]
}
fn default_horizon_days() -> i64 {
    90
}
fn default_months_ahead() -> u32 {
    3
}
fn default_persons() -> u32 {
    4
}
fn default_accepted_nights() -> Vec<u32> {
    vec![2, 3, 4, 7]
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/staywatch.duckdb")
}
fn default_true() -> bool {
    true
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("STAYWATCH").separator("__"))
            .build()?;

        let app_cfg: AppConfig = cfg.try_deserialize().unwrap_or_else(|_| AppConfig::default());
        Ok(app_cfg)
    }

    /// Whether a source slug is enabled (absent from the map means enabled).
    pub fn source_enabled(&self, slug: &str) -> bool {
        self.sources.get(slug).copied().unwrap_or(true)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scraper: ScraperConfig {
                rate_limit_ms: default_rate_limit_ms(),
                jitter_ms: default_jitter_ms(),
                max_retries: default_max_retries(),
                timeout_secs: default_timeout_secs(),
                user_agent: default_user_agent(),
                headless: true,
                max_pages: default_max_pages(),
                batch_size: default_batch_size(),
            },
            scrape: ScrapeConfig {
                days_ahead: default_days_ahead(),
                horizon_days: default_horizon_days(),
                months_ahead: default_months_ahead(),
                persons: default_persons(),
                accepted_nights: default_accepted_nights(),
            },
            storage: StorageConfig {
                db_path: default_db_path(),
                run_migrations: true,
            },
            sources: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_enabled_defaults_to_true() {
        let mut cfg = AppConfig::default();
        assert!(cfg.source_enabled("beerze_bulten"));
        cfg.sources.insert("beerze_bulten".into(), false);
        assert!(!cfg.source_enabled("beerze_bulten"));
        assert!(cfg.source_enabled("witter_zomer"));
    }
}
