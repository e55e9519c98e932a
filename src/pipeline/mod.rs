//! Pipeline orchestrator: ties the platform adapters → runner → price store
//! together for a whole scrape day.
//!
//! Sources run strictly sequentially (external courtesy: one host at a
//! time), first pass in registry order, then one retry pass over sources
//! whose run failed. Every per-source run writes its own scrape-log row;
//! the day's summary always reflects the latest attempt.

use anyhow::{Context, Result, bail};
use chrono::Local;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::models::RunStatus;
use crate::scraper::grid::GridSource;
use crate::scraper::holiday_api::HolidayAgentSource;
use crate::scraper::matrix::MatrixSource;
use crate::scraper::own_unit::OwnUnitSource;
use crate::scraper::runner::ScrapeRunner;
use crate::scraper::{PriceSource, ScrapeParams};
use crate::storage::PriceStore;

pub struct Pipeline {
    config: AppConfig,
    dry_run: bool,
}

#[derive(Debug)]
pub struct PipelineStats {
    pub sources_run: usize,
    pub records: usize,
    pub failed_sources: usize,
}

impl Pipeline {
    pub fn new(config: AppConfig, dry_run: bool) -> Self {
        Self { config, dry_run }
    }

    /// The full source registry, filtered by enable flags or narrowed to a
    /// single slug.
    fn build_sources(&self, only: Option<&str>) -> Result<Vec<(String, Box<dyn PriceSource>)>> {
        let cfg = &self.config.scraper;

        let all: Vec<(&str, Box<dyn PriceSource>)> = vec![
            ("beerze_bulten", Box::new(GridSource::beerze_bulten(cfg))),
            ("de_boshoek", Box::new(GridSource::de_boshoek(cfg))),
            ("de_witte_berg", Box::new(GridSource::de_witte_berg(cfg))),
            (
                "camping_ommerland",
                Box::new(HolidayAgentSource::camping_ommerland(cfg)?),
            ),
            (
                "eiland_van_maurik",
                Box::new(HolidayAgentSource::eiland_van_maurik(cfg)?),
            ),
            ("witter_zomer", Box::new(MatrixSource::witter_zomer(cfg))),
            ("westerbergen", Box::new(OwnUnitSource::westerbergen(cfg)?)),
        ];

        if let Some(slug) = only {
            if !all.iter().any(|(s, _)| *s == slug) {
                let known: Vec<&str> = all.iter().map(|(s, _)| *s).collect();
                bail!("unknown source {slug}; known: {}", known.join(", "));
            }
        }

        Ok(all
            .into_iter()
            .filter(|(slug, _)| match only {
                Some(wanted) => *slug == wanted,
                None => self.config.source_enabled(slug),
            })
            .map(|(slug, source)| (slug.to_string(), source))
            .collect())
    }

    pub async fn run(&self, only: Option<&str>) -> Result<PipelineStats> {
        let store = PriceStore::open(&self.config.storage.db_path)
            .context("Failed to open price store")?;
        if self.config.storage.run_migrations {
            store.run_migrations()?;
        }

        let params = ScrapeParams::from_config(&self.config, Local::now().date_naive());
        let runner = ScrapeRunner::new(&store, &params, &self.config.scraper, self.dry_run);

        let mut sources = self.build_sources(only)?;
        info!(
            "=== Scrape run: {} source(s), horizon to {} ===",
            sources.len(),
            params.horizon_end
        );

        let mut records = 0usize;
        let mut failed: Vec<usize> = Vec::new();

        for (idx, (slug, source)) in sources.iter_mut().enumerate() {
            info!("--- Running: {slug} ---");
            match runner.run(source.as_mut()).await {
                Ok(report) => {
                    records += report.records;
                    if report.status == RunStatus::Failed {
                        failed.push(idx);
                    }
                }
                Err(e) => {
                    error!("{slug}: run aborted: {e:#}");
                    failed.push(idx);
                }
            }
        }

        // Retry pass: failed sources get one more whole-source attempt.
        let mut still_failed = 0usize;
        if !failed.is_empty() {
            info!("=== Retry pass: {} failed source(s) ===", failed.len());
            for idx in failed {
                let (slug, source) = &mut sources[idx];
                info!("--- Retrying: {slug} ---");
                match runner.run(source.as_mut()).await {
                    Ok(report) => {
                        records += report.records;
                        if report.status == RunStatus::Failed {
                            warn!("{slug}: still failing after retry pass");
                            still_failed += 1;
                        }
                    }
                    Err(e) => {
                        error!("{slug}: retry aborted: {e:#}");
                        still_failed += 1;
                    }
                }
            }
        }

        let stats = PipelineStats {
            sources_run: sources.len(),
            records,
            failed_sources: still_failed,
        };
        info!(
            "=== Done: {} sources | {} records | {} failed ===",
            stats.sources_run, stats.records, stats.failed_sources
        );

        Ok(stats)
    }
}
