pub mod grid;
pub mod holiday_api;
pub mod matrix;
pub mod own_unit;
pub mod parse;
pub mod runner;
pub mod session;
pub mod windows;

use chrono::{Duration, Local, NaiveDate};
use async_trait::async_trait;
use tracing::warn;

use crate::config::AppConfig;
use crate::models::{DateWindow, PriceRecord, Quote, SourceIdentity};
use crate::storage::PriceStore;

use self::runner::RateLimiter;

// ── Errors ────────────────────────────────────────────────────────────────────

/// What can go wrong while extracting. The retry loop branches on this:
/// timeouts are retried in place, everything else tears the session down
/// first.
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("http request failed: {0}")]
    Http(reqwest::Error),

    #[error("browser session: {0}")]
    Browser(String),

    #[error("unexpected page or response shape: {0}")]
    Parse(String),

    #[error("price store: {0}")]
    Store(String),

    #[error("{0} does not support this extraction mode")]
    UnsupportedMode(String),
}

impl ScrapeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ScrapeError::Timeout(_))
    }

    /// Classify a transport error so the retry policy sees timeouts as such.
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ScrapeError::Timeout(e.to_string())
        } else {
            ScrapeError::Http(e)
        }
    }
}

// ── Extraction capability ─────────────────────────────────────────────────────

/// How a source is driven. Fixed per source, never switched at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// The orchestrator feeds generated date windows one at a time.
    PerWindow,
    /// The adapter drives its own pagination/batching across the horizon.
    SelfPaged,
}

/// Common capability of all platform adapters.
#[async_trait(?Send)]
pub trait PriceSource: Send {
    fn identity(&self) -> &SourceIdentity;

    fn strategy(&self) -> Strategy;

    /// Extract quotes for a single stay window. Only meaningful for
    /// `Strategy::PerWindow` sources.
    async fn extract_window(
        &mut self,
        _ctx: &mut RunContext<'_>,
        _window: &DateWindow,
    ) -> Result<Vec<Quote>, ScrapeError> {
        Err(ScrapeError::UnsupportedMode(self.identity().name.clone()))
    }

    /// Drive the whole horizon, pushing records through the context as pages
    /// or batches complete. Only meaningful for `Strategy::SelfPaged`.
    async fn extract_batch(&mut self, _ctx: &mut RunContext<'_>) -> Result<(), ScrapeError> {
        Err(ScrapeError::UnsupportedMode(self.identity().name.clone()))
    }

    /// Tear down and recreate transport state (browser tab, cookie jar)
    /// after a non-timeout failure.
    async fn reset_session(&mut self) -> Result<(), ScrapeError> {
        Ok(())
    }
}

// ── Run parameters ────────────────────────────────────────────────────────────

/// Immutable per-run scrape parameters, resolved from config once at run
/// start.
#[derive(Debug, Clone)]
pub struct ScrapeParams {
    pub persons: u32,
    pub months_ahead: u32,
    pub max_pages: u32,
    pub batch_size: usize,
    pub accepted_nights: Vec<u32>,
    pub days_ahead: Vec<i64>,
    pub today: NaiveDate,
    pub horizon_end: NaiveDate,
}

impl ScrapeParams {
    pub fn from_config(cfg: &AppConfig, today: NaiveDate) -> Self {
        Self {
            persons: cfg.scrape.persons,
            months_ahead: cfg.scrape.months_ahead,
            max_pages: cfg.scraper.max_pages,
            batch_size: cfg.scraper.batch_size.max(1),
            accepted_nights: cfg.scrape.accepted_nights.clone(),
            days_ahead: cfg.scrape.days_ahead.clone(),
            today,
            horizon_end: today + Duration::days(cfg.scrape.horizon_days),
        }
    }

    pub fn accepts_nights(&self, nights: u32) -> bool {
        self.accepted_nights.contains(&nights)
    }
}

// ── Run context ───────────────────────────────────────────────────────────────

/// Everything an adapter needs while a run is in flight: pacing, the record
/// sink, and the per-run error tally. Passed explicitly, never global.
pub struct RunContext<'a> {
    pub params: &'a ScrapeParams,
    limiter: &'a mut RateLimiter,
    store: Option<&'a PriceStore>,
    records: usize,
    unit_errors: usize,
    error_notes: Vec<String>,
}

impl<'a> RunContext<'a> {
    /// A `None` store means a dry run: extraction proceeds, nothing is
    /// persisted, counts are still kept.
    pub fn new(
        params: &'a ScrapeParams,
        limiter: &'a mut RateLimiter,
        store: Option<&'a PriceStore>,
    ) -> Self {
        Self {
            params,
            limiter,
            store,
            records: 0,
            unit_errors: 0,
            error_notes: Vec::new(),
        }
    }

    /// Block until the inter-request spacing floor is satisfied.
    pub async fn pace(&mut self) {
        self.limiter.wait().await;
    }

    /// Stamp identity, occupancy and capture time onto a quote and persist
    /// it. Records are written one at a time so an interrupted run keeps its
    /// partial progress.
    pub fn push(&mut self, identity: &SourceIdentity, quote: Quote) -> Result<(), ScrapeError> {
        let now = Local::now().naive_local();
        let record = PriceRecord {
            competitor_name: identity.name.clone(),
            accommodation_type: identity.accommodation_type.clone(),
            check_in_date: quote.check_in,
            check_out_date: quote.check_out,
            price: quote.price,
            available: quote.available,
            min_nights: quote.min_nights,
            special_offers: quote.special_offers,
            persons: self.params.persons,
            scrape_timestamp: now,
            scrape_date: now.date(),
            availability_observed: quote.availability_observed,
        };

        if let Some(store) = self.store {
            store
                .upsert(&record)
                .map_err(|e| ScrapeError::Store(format!("{e:#}")))?;
        }
        self.records += 1;
        Ok(())
    }

    /// Absorb a per-page/per-date failure: logged and counted, never fatal.
    pub fn note_unit_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.unit_errors += 1;
        self.error_notes.push(message);
    }

    pub fn records(&self) -> usize {
        self.records
    }

    pub fn unit_errors(&self) -> usize {
        self.unit_errors
    }

    pub fn error_summary(&self) -> Option<String> {
        if self.error_notes.is_empty() {
            None
        } else {
            Some(self.error_notes.join("; "))
        }
    }
}
