use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

// ── Price record ──────────────────────────────────────────────────────────────

/// One quoted price for one (source, check-in, check-out) combination as
/// observed on one scrape day. Unique per
/// (competitor_name, check_in_date, check_out_date, scrape_date).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceRecord {
    pub competitor_name: String,
    pub accommodation_type: String,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    pub price: Option<f64>,
    pub available: bool,
    pub min_nights: Option<u32>,
    pub special_offers: Option<String>,
    pub persons: u32,
    pub scrape_timestamp: NaiveDateTime,
    pub scrape_date: NaiveDate,

    /// True when the platform explicitly reported the stay unavailable, as
    /// opposed to a price we failed to read. Drives the upsert merge rule;
    /// not a stored column.
    #[serde(skip)]
    pub availability_observed: bool,
}

impl PriceRecord {
    pub fn nights(&self) -> i64 {
        (self.check_out_date - self.check_in_date).num_days()
    }
}

// ── Quote ─────────────────────────────────────────────────────────────────────

/// What an adapter extracts for one stay, before source identity, occupancy
/// and capture time are stamped on.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub price: Option<f64>,
    pub available: bool,
    pub min_nights: Option<u32>,
    pub special_offers: Option<String>,
    pub availability_observed: bool,
}

impl Quote {
    pub fn unavailable(check_in: NaiveDate, check_out: NaiveDate, observed: bool) -> Self {
        Self {
            check_in,
            check_out,
            price: None,
            available: false,
            min_nights: Some((check_out - check_in).num_days() as u32),
            special_offers: None,
            availability_observed: observed,
        }
    }
}

// ── Scrape log ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
    DryRun,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
            RunStatus::DryRun => "dry-run",
        }
    }

    /// Unknown strings read back as failed.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "success" => RunStatus::Success,
            "partial" => RunStatus::Partial,
            "dry-run" => RunStatus::DryRun,
            _ => RunStatus::Failed,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit row per adapter run. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScrapeLogEntry {
    pub competitor_name: String,
    pub timestamp: NaiveDateTime,
    pub status: RunStatus,
    pub records_scraped: i64,
    pub error_message: Option<String>,
    pub duration_seconds: f64,
}

// ── Date window ───────────────────────────────────────────────────────────────

/// One bookable stay to query. Generated fresh each run, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateWindow {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub stay_type: String,
    pub nights: u32,
}

// ── Source identity ───────────────────────────────────────────────────────────

/// Which property and unit type an adapter scrapes, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceIdentity {
    pub name: String,
    pub accommodation_type: String,
    pub url: String,
}

impl SourceIdentity {
    pub fn new(name: &str, accommodation_type: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            accommodation_type: accommodation_type.to_string(),
            url: url.to_string(),
        }
    }
}
