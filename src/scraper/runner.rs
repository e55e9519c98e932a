//! Rate-limited retry orchestration around a single source's run.
//!
//! One runner drives one source: it paces outbound work, retries each unit
//! up to the configured bound, classifies the run and writes exactly one
//! scrape-log row.

use std::time::{Duration, Instant};

use chrono::Local;
use rand::RngExt;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::ScraperConfig;
use crate::models::{DateWindow, RunStatus, ScrapeLogEntry};
use crate::storage::PriceStore;

use super::windows::{default_stay_templates, generate_windows};
use super::{PriceSource, RunContext, ScrapeParams, Strategy};

// ── Rate limiter ──────────────────────────────────────────────────────────────

/// Hard minimum spacing between outbound requests. Not a token bucket:
/// there is no burst allowance, only a floor. Jitter is additive and can
/// only widen the gap.
pub struct RateLimiter {
    min_gap: Duration,
    jitter_ms: u64,
    last: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_gap_ms: u64, jitter_ms: u64) -> Self {
        Self {
            min_gap: Duration::from_millis(min_gap_ms),
            jitter_ms,
            last: None,
        }
    }

    pub async fn wait(&mut self) {
        if let Some(last) = self.last {
            let jitter = if self.jitter_ms == 0 {
                Duration::ZERO
            } else {
                Duration::from_millis(rand::rng().random_range(0..=self.jitter_ms))
            };
            let floor = self.min_gap + jitter;
            let elapsed = last.elapsed();
            if elapsed < floor {
                debug!("Rate limiting: waiting {:?}", floor - elapsed);
                sleep(floor - elapsed).await;
            }
        }
        self.last = Some(Instant::now());
    }
}

// ── Run report ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RunReport {
    pub competitor_name: String,
    pub status: RunStatus,
    pub records: usize,
    pub errors: usize,
    pub duration_seconds: f64,
}

// ── Runner ────────────────────────────────────────────────────────────────────

pub struct ScrapeRunner<'a> {
    store: &'a PriceStore,
    params: &'a ScrapeParams,
    rate_limit_ms: u64,
    jitter_ms: u64,
    max_retries: u32,
    dry_run: bool,
}

impl<'a> ScrapeRunner<'a> {
    pub fn new(
        store: &'a PriceStore,
        params: &'a ScrapeParams,
        scraper_cfg: &ScraperConfig,
        dry_run: bool,
    ) -> Self {
        Self {
            store,
            params,
            rate_limit_ms: scraper_cfg.rate_limit_ms,
            jitter_ms: scraper_cfg.jitter_ms,
            max_retries: scraper_cfg.max_retries.max(1),
            dry_run,
        }
    }

    /// Run one source to completion. Window-fed sources get the canonical
    /// generated windows; self-paged sources drive their own pagination.
    pub async fn run(&self, source: &mut dyn PriceSource) -> anyhow::Result<RunReport> {
        match source.strategy() {
            Strategy::PerWindow => {
                let windows = generate_windows(
                    self.params.today,
                    &self.params.days_ahead,
                    &default_stay_templates(),
                );
                self.run_windows(source, &windows).await
            }
            Strategy::SelfPaged => self.run_batch(source).await,
        }
    }

    /// Window-fed run over an explicit window list.
    pub async fn run_windows(
        &self,
        source: &mut dyn PriceSource,
        windows: &[DateWindow],
    ) -> anyhow::Result<RunReport> {
        let name = source.identity().name.clone();
        info!("Starting scrape for {}: {} date windows", name, windows.len());

        let started = Instant::now();
        let mut limiter = RateLimiter::new(self.rate_limit_ms, self.jitter_ms);
        let mut ctx = RunContext::new(self.params, &mut limiter, self.sink());

        for window in windows {
            self.attempt_window(source, &mut ctx, window).await;
        }

        self.finish(&name, ctx, started)
    }

    async fn run_batch(&self, source: &mut dyn PriceSource) -> anyhow::Result<RunReport> {
        let name = source.identity().name.clone();
        info!("Starting scrape for {}", name);

        let started = Instant::now();
        let mut limiter = RateLimiter::new(self.rate_limit_ms, self.jitter_ms);
        let mut ctx = RunContext::new(self.params, &mut limiter, self.sink());

        for attempt in 1..=self.max_retries {
            match source.extract_batch(&mut ctx).await {
                Ok(()) => break,
                Err(e) if e.is_timeout() => {
                    warn!(
                        "{}: timeout attempt {}/{}: {}",
                        name, attempt, self.max_retries, e
                    );
                }
                Err(e) => {
                    warn!(
                        "{}: error attempt {}/{}: {}",
                        name, attempt, self.max_retries, e
                    );
                    if let Err(reset_err) = source.reset_session().await {
                        warn!("{}: session reset failed: {}", name, reset_err);
                    }
                }
            }
            if attempt == self.max_retries {
                ctx.note_unit_error(format!(
                    "{name}: batch extraction failed after {} attempts",
                    self.max_retries
                ));
            } else {
                ctx.pace().await;
            }
        }

        self.finish(&name, ctx, started)
    }

    /// Retry one window up to the bound. A timeout retries in place; any
    /// other error recreates the session first. The final failure becomes
    /// one unit error and the run moves on.
    async fn attempt_window(
        &self,
        source: &mut dyn PriceSource,
        ctx: &mut RunContext<'_>,
        window: &DateWindow,
    ) {
        let identity = source.identity().clone();

        for attempt in 1..=self.max_retries {
            ctx.pace().await;
            match source.extract_window(ctx, window).await {
                Ok(quotes) => {
                    for quote in quotes {
                        if let Err(e) = ctx.push(&identity, quote) {
                            ctx.note_unit_error(format!(
                                "{} -> {}: persist failed: {}",
                                window.check_in, window.check_out, e
                            ));
                            return;
                        }
                    }
                    debug!(
                        "  {} -> {}: done (attempt {})",
                        window.check_in, window.check_out, attempt
                    );
                    return;
                }
                Err(e) if e.is_timeout() => {
                    warn!(
                        "  timeout attempt {}/{} for {} -> {}",
                        attempt, self.max_retries, window.check_in, window.check_out
                    );
                }
                Err(e) => {
                    warn!(
                        "  error attempt {}/{} for {} -> {}: {}",
                        attempt, self.max_retries, window.check_in, window.check_out, e
                    );
                    if let Err(reset_err) = source.reset_session().await {
                        warn!("  session reset failed: {}", reset_err);
                    }
                }
            }
        }

        ctx.note_unit_error(format!(
            "{} -> {}: failed after {} attempts",
            window.check_in, window.check_out, self.max_retries
        ));
    }

    fn sink(&self) -> Option<&'a PriceStore> {
        if self.dry_run { None } else { Some(self.store) }
    }

    /// Classify, write the single audit row, report.
    fn finish(
        &self,
        name: &str,
        ctx: RunContext<'_>,
        started: Instant,
    ) -> anyhow::Result<RunReport> {
        let records = ctx.records();
        let errors = ctx.unit_errors();
        let error_message = ctx.error_summary();
        drop(ctx);

        let status = if self.dry_run {
            RunStatus::DryRun
        } else if errors == 0 {
            RunStatus::Success
        } else if records > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Failed
        };

        let duration_seconds = started.elapsed().as_secs_f64();
        self.store.log(&ScrapeLogEntry {
            competitor_name: name.to_string(),
            timestamp: Local::now().naive_local(),
            status,
            records_scraped: records as i64,
            error_message,
            duration_seconds,
        })?;

        info!(
            "Completed {}: {} prices, {} errors, {:.1}s ({})",
            name, records, errors, duration_seconds, status
        );

        Ok(RunReport {
            competitor_name: name.to_string(),
            status,
            records,
            errors,
            duration_seconds,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::models::{Quote, SourceIdentity};
    use crate::scraper::ScrapeError;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, NaiveDate};
    use tokio_test::assert_ok;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn test_windows(n: usize) -> Vec<DateWindow> {
        (0..n)
            .map(|i| {
                let check_in = d(2026, 3, 2) + ChronoDuration::days(7 * i as i64);
                DateWindow {
                    check_in,
                    check_out: check_in + ChronoDuration::days(2),
                    stay_type: if i < 3 { "flaky".into() } else { "steady".into() },
                    nights: 2,
                }
            })
            .collect()
    }

    fn quick_config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.scraper.rate_limit_ms = 1;
        cfg.scraper.jitter_ms = 0;
        cfg.scraper.max_retries = 3;
        cfg
    }

    /// Succeeds except for windows tagged "flaky", which always error.
    struct FlakySource {
        identity: SourceIdentity,
        attempts: usize,
        resets: usize,
    }

    impl FlakySource {
        fn new() -> Self {
            Self {
                identity: SourceIdentity::new("Test Park", "Bungalow", "https://example.test"),
                attempts: 0,
                resets: 0,
            }
        }
    }

    #[async_trait(?Send)]
    impl PriceSource for FlakySource {
        fn identity(&self) -> &SourceIdentity {
            &self.identity
        }

        fn strategy(&self) -> Strategy {
            Strategy::PerWindow
        }

        async fn extract_window(
            &mut self,
            _ctx: &mut RunContext<'_>,
            window: &DateWindow,
        ) -> Result<Vec<Quote>, ScrapeError> {
            self.attempts += 1;
            if window.stay_type == "flaky" {
                return Err(ScrapeError::Parse("markup changed".into()));
            }
            Ok(vec![Quote {
                check_in: window.check_in,
                check_out: window.check_out,
                price: Some(150.0),
                available: true,
                min_nights: Some(window.nights),
                special_offers: None,
                availability_observed: false,
            }])
        }

        async fn reset_session(&mut self) -> Result<(), ScrapeError> {
            self.resets += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_partial_run_classification() {
        // 10 windows, 3 exhaust retries, 7 succeed -> partial with 7 records.
        let store = PriceStore::open_in_memory().unwrap();
        store.run_migrations().unwrap();
        let cfg = quick_config();
        let params = ScrapeParams::from_config(&cfg, d(2026, 2, 2));
        let runner = ScrapeRunner::new(&store, &params, &cfg.scraper, false);

        let mut source = FlakySource::new();
        let report = runner
            .run_windows(&mut source, &test_windows(10))
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Partial);
        assert_eq!(report.records, 7);
        assert_eq!(report.errors, 3);

        let log = store.summary(report_day(&store)).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, RunStatus::Partial);
        assert_eq!(log[0].records_scraped, 7);
    }

    fn report_day(store: &PriceStore) -> NaiveDate {
        store.latest_log_date().unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_retry_bound_is_exact() {
        let store = PriceStore::open_in_memory().unwrap();
        store.run_migrations().unwrap();
        let cfg = quick_config();
        let params = ScrapeParams::from_config(&cfg, d(2026, 2, 2));
        let runner = ScrapeRunner::new(&store, &params, &cfg.scraper, false);

        let mut source = FlakySource::new();
        let windows = &test_windows(3)[..1]; // one always-failing window
        let report = assert_ok!(runner.run_windows(&mut source, windows).await);

        assert_eq!(source.attempts, 3, "exactly max_retries attempts");
        assert_eq!(source.resets, 3, "session recreated after each failure");
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.records, 0);
    }

    #[tokio::test]
    async fn test_dry_run_logs_but_does_not_persist() {
        let store = PriceStore::open_in_memory().unwrap();
        store.run_migrations().unwrap();
        let cfg = quick_config();
        let params = ScrapeParams::from_config(&cfg, d(2026, 2, 2));
        let runner = ScrapeRunner::new(&store, &params, &cfg.scraper, true);

        let mut source = FlakySource::new();
        let windows = test_windows(5);
        let report = runner
            .run_windows(&mut source, &windows[3..])
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::DryRun);
        assert_eq!(report.records, 2);
        assert!(store.latest(None).unwrap().is_empty());
        // the attempt itself is still audited
        assert_eq!(store.summary(report_day(&store)).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rate_limiter_enforces_floor() {
        let mut limiter = RateLimiter::new(50, 0);
        let mut stamps = Vec::new();
        for _ in 0..4 {
            limiter.wait().await;
            stamps.push(Instant::now());
        }
        for pair in stamps.windows(2) {
            let gap = pair[1] - pair[0];
            // small tolerance for clock capture happening just after the wait
            assert!(
                gap >= Duration::from_millis(45),
                "gap {gap:?} under the 50ms floor"
            );
        }
    }
}
