mod config;
mod models;
mod pipeline;
mod scraper;
mod storage;
mod utils;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::AppConfig;
use crate::pipeline::Pipeline;
use crate::storage::PriceStore;

#[derive(Parser)]
#[command(name = "staywatch", about = "Vacation-park price scraper", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape all enabled sources (daily run mode)
    Scrape {
        /// Run only one source (slug, e.g. beerze_bulten)
        #[arg(short, long)]
        source: Option<String>,

        /// Override the scrape horizon in days
        #[arg(short, long)]
        days: Option<i64>,

        /// Extract without persisting prices; the run is still audited
        #[arg(long)]
        dry_run: bool,

        /// Show the browser window (non-headless mode)
        #[arg(long)]
        visible: bool,
    },

    /// Show database statistics
    Stats,

    /// Show the scrape-log summary for a day (default: latest logged day)
    Summary {
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },

    /// Dump comparison rows for one scrape day (default: latest)
    Compare {
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },

    /// Apply schema migrations without scraping
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "staywatch=info,warn",
        1 => "staywatch=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let mut config = AppConfig::load()?;

    match cli.command {
        Command::Scrape {
            source,
            days,
            dry_run,
            visible,
        } => {
            let _t = utils::Timer::start("Scrape run");
            if let Some(days) = days {
                config.scrape.horizon_days = days;
            }
            if visible {
                config.scraper.headless = false;
            }

            let stats = Pipeline::new(config, dry_run).run(source.as_deref()).await?;
            info!(
                "Done: {} sources, {} records, {} failed",
                stats.sources_run, stats.records, stats.failed_sources
            );
        }

        Command::Stats => {
            let store = PriceStore::open(&config.storage.db_path)?;
            let prices = store.price_count()?;
            let competitors = store.competitor_count()?;
            let (min, max) = store.stay_range().unwrap_or((None, None));
            let last_scrape = store.latest_scrape_date()?;

            let quoted: Vec<f64> = store
                .latest(None)?
                .iter()
                .filter(|r| r.available)
                .filter_map(|r| r.price)
                .collect();

            println!("─────────────────────────────────");
            println!("  staywatch — Database Stats");
            println!("─────────────────────────────────");
            println!("  Competitors : {}", competitors);
            println!("  Price rows  : {}", prices);
            println!("  Stays from  : {}", fmt_opt_date(min));
            println!("  Stays to    : {}", fmt_opt_date(max));
            println!("  Last scrape : {}", fmt_opt_date(last_scrape));
            if let (Some(lo), Some(hi)) = (
                quoted.iter().cloned().reduce(f64::min),
                quoted.iter().cloned().reduce(f64::max),
            ) {
                println!(
                    "  Latest range: {} – {}",
                    utils::fmt_eur(lo),
                    utils::fmt_eur(hi)
                );
            }
            println!("─────────────────────────────────");
        }

        Command::Summary { date } => {
            let store = PriceStore::open(&config.storage.db_path)?;
            let day = match date {
                Some(d) => Some(d),
                None => store.latest_log_date()?,
            };
            let Some(day) = day else {
                println!("No scrape runs logged yet.");
                return Ok(());
            };

            let entries = store.summary(day)?;
            if entries.is_empty() {
                println!("No scrape runs logged on {day}.");
            } else {
                println!("Scrape summary for {day}:");
                for e in &entries {
                    println!(
                        "  {:<20} {:<8} {:>5} records  {:>6.1}s  {}",
                        e.competitor_name,
                        e.status.to_string(),
                        e.records_scraped,
                        e.duration_seconds,
                        e.error_message.as_deref().unwrap_or("-"),
                    );
                }
            }
        }

        Command::Compare { date } => {
            let store = PriceStore::open(&config.storage.db_path)?;
            let day = match date {
                Some(d) => Some(d),
                None => store.latest_scrape_date()?,
            };
            let Some(day) = day else {
                println!("No prices stored yet.");
                return Ok(());
            };

            let rows = store.comparison_rows(day, &config.scrape.accepted_nights)?;
            println!("Comparison rows for {day} ({} rows):", rows.len());
            for r in &rows {
                println!(
                    "  {:<20} {} -> {} ({}n)  {:>10}  {}",
                    r.competitor_name,
                    r.check_in_date,
                    r.check_out_date,
                    r.nights(),
                    r.price.map(utils::fmt_eur).unwrap_or_else(|| "-".into()),
                    r.special_offers.as_deref().unwrap_or(""),
                );
            }
        }

        Command::Migrate => {
            PriceStore::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}

fn fmt_opt_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.to_string()).unwrap_or_else(|| "—".into())
}
