use anyhow::{Context, Result};
use chrono::{Duration, Local, NaiveDate, Utc};
use duckdb::{Connection, params};
use std::path::Path;
use tracing::info;

use crate::models::{PriceRecord, RunStatus, ScrapeLogEntry};

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS prices (
    competitor_name     VARCHAR NOT NULL,
    accommodation_type  VARCHAR NOT NULL,
    check_in_date       DATE    NOT NULL,
    check_out_date      DATE    NOT NULL,
    price               DOUBLE,
    available           BOOLEAN NOT NULL DEFAULT true,
    min_nights          INTEGER,
    special_offers      VARCHAR,
    persons             INTEGER NOT NULL DEFAULT 4,
    scrape_timestamp    TIMESTAMP NOT NULL,
    -- Versioning axis: one row per key per capture day, never updated away
    scrape_date         DATE    NOT NULL,
    PRIMARY KEY (competitor_name, check_in_date, check_out_date, scrape_date)
);

CREATE SEQUENCE IF NOT EXISTS scrape_log_seq;

CREATE TABLE IF NOT EXISTS scrape_log (
    id                  INTEGER PRIMARY KEY DEFAULT nextval('scrape_log_seq'),
    competitor_name     VARCHAR NOT NULL,
    "timestamp"         TIMESTAMP NOT NULL,
    status              VARCHAR NOT NULL,
    records_scraped     INTEGER NOT NULL DEFAULT 0,
    error_message       VARCHAR,
    duration_seconds    DOUBLE
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_prices_competitor  ON prices (competitor_name);
CREATE INDEX IF NOT EXISTS idx_prices_checkin     ON prices (check_in_date);
CREATE INDEX IF NOT EXISTS idx_prices_scrape_date ON prices (scrape_date);
"#;

// ── Upsert statements ─────────────────────────────────────────────────────────
//
// Three merge rules for a conflicting (source, stay, scrape day) key:
//   quoted price      -> price and availability both overwritten
//   observed sold-out -> availability overwritten, last known price kept
//   unreadable        -> price and availability both preserved
// Everything else (unit type, nights, offers, persons, capture time) is
// always overwritten.

const UPSERT_COLUMNS: &str = r#"
    INSERT INTO prices (
        competitor_name, accommodation_type, check_in_date, check_out_date,
        price, available, min_nights, special_offers, persons,
        scrape_timestamp, scrape_date
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT (competitor_name, check_in_date, check_out_date, scrape_date)
    DO UPDATE SET
        accommodation_type = excluded.accommodation_type,
        min_nights         = excluded.min_nights,
        special_offers     = excluded.special_offers,
        persons            = excluded.persons,
        scrape_timestamp   = excluded.scrape_timestamp
"#;

const PRICE_FIELDS_QUOTED: &str = r#",
        price     = excluded.price,
        available = excluded.available
"#;

const PRICE_FIELDS_SOLD_OUT: &str = r#",
        available = excluded.available
"#;

const SELECT_PRICE_FIELDS: &str = r#"
    competitor_name, accommodation_type, check_in_date, check_out_date,
    price, available, min_nights, special_offers, persons,
    scrape_timestamp, scrape_date
"#;

// ── Aggregates ────────────────────────────────────────────────────────────────

/// Outcome counts per (competitor, status) over a trailing window.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeStats {
    pub competitor_name: String,
    pub status: RunStatus,
    pub runs: i64,
    pub avg_records: f64,
    pub avg_duration_seconds: f64,
}

// ── Price store ───────────────────────────────────────────────────────────────

pub struct PriceStore {
    conn: Connection,
}

impl PriceStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        self.conn.execute_batch(DDL).context("DDL failed")?;
        self.conn
            .execute_batch(INDEXES)
            .context("Index creation failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Prices ────────────────────────────────────────────────────────────────

    /// Idempotent write of one observation. A re-scrape that could not read
    /// a price must not erase a previously known-good quote; see the merge
    /// rules above the statement constants.
    pub fn upsert(&self, record: &PriceRecord) -> Result<()> {
        let sql = if record.price.is_some() {
            format!("{UPSERT_COLUMNS}{PRICE_FIELDS_QUOTED}")
        } else if record.availability_observed {
            format!("{UPSERT_COLUMNS}{PRICE_FIELDS_SOLD_OUT}")
        } else {
            UPSERT_COLUMNS.to_string()
        };

        self.conn
            .execute(
                &sql,
                params![
                    record.competitor_name,
                    record.accommodation_type,
                    record.check_in_date,
                    record.check_out_date,
                    record.price,
                    record.available,
                    record.min_nights,
                    record.special_offers,
                    record.persons,
                    record.scrape_timestamp,
                    record.scrape_date,
                ],
            )
            .with_context(|| {
                format!(
                    "upsert {} {} -> {}",
                    record.competitor_name, record.check_in_date, record.check_out_date
                )
            })?;
        Ok(())
    }

    /// Per (source, check-in, check-out) key, only the row with the latest
    /// capture timestamp.
    pub fn latest(&self, source: Option<&str>) -> Result<Vec<PriceRecord>> {
        let filter = if source.is_some() {
            " WHERE p.competitor_name = ?"
        } else {
            ""
        };
        let sql = format!(
            r#"SELECT {SELECT_PRICE_FIELDS}
               FROM prices p
               INNER JOIN (
                   SELECT competitor_name AS c, check_in_date AS ci,
                          check_out_date AS co, MAX(scrape_timestamp) AS max_ts
                   FROM prices
                   GROUP BY c, ci, co
               ) latest ON p.competitor_name = latest.c
                   AND p.check_in_date = latest.ci
                   AND p.check_out_date = latest.co
                   AND p.scrape_timestamp = latest.max_ts
               {filter}
               ORDER BY p.check_in_date, p.competitor_name"#
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = match source {
            Some(name) => stmt.query_map(params![name], map_price_row)?,
            None => stmt.query_map([], map_price_row)?,
        };
        Ok(rows.collect::<duckdb::Result<Vec<_>>>()?)
    }

    /// Rows for one scrape day with a readable price and a canonical night
    /// count. Sole contract of the downstream comparison/report layer.
    pub fn comparison_rows(
        &self,
        scrape_day: NaiveDate,
        accepted_nights: &[u32],
    ) -> Result<Vec<PriceRecord>> {
        if accepted_nights.is_empty() {
            return Ok(Vec::new());
        }
        let nights_list = accepted_nights
            .iter()
            .map(|n| n.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            r#"SELECT {SELECT_PRICE_FIELDS}
               FROM prices
               WHERE scrape_date = ?
                 AND price IS NOT NULL
                 AND date_diff('day', check_in_date, check_out_date) IN ({nights_list})
               ORDER BY check_in_date, competitor_name"#
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![scrape_day], map_price_row)?;
        Ok(rows.collect::<duckdb::Result<Vec<_>>>()?)
    }

    /// Every observation of one stay for one source, across scrape days,
    /// oldest capture first.
    pub fn history(&self, source: &str, check_in: NaiveDate) -> Result<Vec<PriceRecord>> {
        let sql = format!(
            r#"SELECT {SELECT_PRICE_FIELDS}
               FROM prices
               WHERE competitor_name = ? AND check_in_date = ?
               ORDER BY scrape_timestamp"#
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![source, check_in], map_price_row)?;
        Ok(rows.collect::<duckdb::Result<Vec<_>>>()?)
    }

    pub fn latest_scrape_date(&self) -> Result<Option<NaiveDate>> {
        let mut stmt = self.conn.prepare("SELECT MAX(scrape_date) FROM prices")?;
        Ok(stmt.query_row([], |r| r.get(0))?)
    }

    pub fn scrape_dates(&self) -> Result<Vec<NaiveDate>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT scrape_date FROM prices ORDER BY scrape_date DESC")?;
        let rows = stmt.query_map([], |r| r.get(0))?;
        Ok(rows.collect::<duckdb::Result<Vec<_>>>()?)
    }

    pub fn price_count(&self) -> Result<i64> {
        let mut stmt = self.conn.prepare("SELECT COUNT(*) FROM prices")?;
        Ok(stmt.query_row([], |r| r.get(0))?)
    }

    pub fn competitor_count(&self) -> Result<i64> {
        let mut stmt = self
            .conn
            .prepare("SELECT COUNT(DISTINCT competitor_name) FROM prices")?;
        Ok(stmt.query_row([], |r| r.get(0))?)
    }

    pub fn stay_range(&self) -> Result<(Option<NaiveDate>, Option<NaiveDate>)> {
        let mut stmt = self
            .conn
            .prepare("SELECT MIN(check_in_date), MAX(check_in_date) FROM prices")?;
        Ok(stmt.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?)
    }

    // ── Scrape log ────────────────────────────────────────────────────────────

    /// Append one audit row. Never updated or deleted.
    pub fn log(&self, entry: &ScrapeLogEntry) -> Result<()> {
        self.conn
            .execute(
                r#"INSERT INTO scrape_log (
                       competitor_name, "timestamp", status,
                       records_scraped, error_message, duration_seconds
                   ) VALUES (?, ?, ?, ?, ?, ?)"#,
                params![
                    entry.competitor_name,
                    entry.timestamp,
                    entry.status.as_str(),
                    entry.records_scraped,
                    entry.error_message,
                    entry.duration_seconds,
                ],
            )
            .with_context(|| format!("log scrape run for {}", entry.competitor_name))?;
        Ok(())
    }

    /// The latest log row per competitor for one day.
    pub fn summary(&self, day: NaiveDate) -> Result<Vec<ScrapeLogEntry>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT sl.competitor_name, sl."timestamp", sl.status,
                      sl.records_scraped, sl.error_message, sl.duration_seconds
               FROM scrape_log sl
               INNER JOIN (
                   SELECT competitor_name AS c, MAX("timestamp") AS max_ts
                   FROM scrape_log
                   WHERE CAST("timestamp" AS DATE) = ?
                   GROUP BY c
               ) latest ON sl.competitor_name = latest.c AND sl."timestamp" = latest.max_ts
               ORDER BY sl.competitor_name"#,
        )?;
        let rows = stmt.query_map(params![day], map_log_row)?;
        Ok(rows.collect::<duckdb::Result<Vec<_>>>()?)
    }

    /// Run-outcome counts per competitor and status over the last `days`.
    pub fn scrape_stats(&self, days: i64) -> Result<Vec<ScrapeStats>> {
        let cutoff = Local::now().naive_local() - Duration::days(days);
        let mut stmt = self.conn.prepare(
            r#"SELECT competitor_name, status, COUNT(*),
                      AVG(records_scraped), AVG(duration_seconds)
               FROM scrape_log
               WHERE "timestamp" >= ?
               GROUP BY competitor_name, status
               ORDER BY competitor_name, status"#,
        )?;
        let rows = stmt.query_map(params![cutoff], |r| {
            Ok(ScrapeStats {
                competitor_name: r.get(0)?,
                status: RunStatus::from_str_lossy(&r.get::<_, String>(1)?),
                runs: r.get(2)?,
                avg_records: r.get(3)?,
                avg_duration_seconds: r.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
            })
        })?;
        Ok(rows.collect::<duckdb::Result<Vec<_>>>()?)
    }

    pub fn latest_log_date(&self) -> Result<Option<NaiveDate>> {
        let mut stmt = self
            .conn
            .prepare(r#"SELECT MAX(CAST("timestamp" AS DATE)) FROM scrape_log"#)?;
        Ok(stmt.query_row([], |r| r.get(0))?)
    }
}

// ── Row mapping ───────────────────────────────────────────────────────────────

fn map_price_row(r: &duckdb::Row<'_>) -> duckdb::Result<PriceRecord> {
    Ok(PriceRecord {
        competitor_name: r.get(0)?,
        accommodation_type: r.get(1)?,
        check_in_date: r.get(2)?,
        check_out_date: r.get(3)?,
        price: r.get(4)?,
        available: r.get(5)?,
        min_nights: r.get::<_, Option<i64>>(6)?.map(|n| n as u32),
        special_offers: r.get(7)?,
        persons: r.get::<_, i64>(8)? as u32,
        scrape_timestamp: r.get(9)?,
        scrape_date: r.get(10)?,
        availability_observed: false,
    })
}

fn map_log_row(r: &duckdb::Row<'_>) -> duckdb::Result<ScrapeLogEntry> {
    Ok(ScrapeLogEntry {
        competitor_name: r.get(0)?,
        timestamp: r.get(1)?,
        status: RunStatus::from_str_lossy(&r.get::<_, String>(2)?),
        records_scraped: r.get(3)?,
        error_message: r.get(4)?,
        duration_seconds: r.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
