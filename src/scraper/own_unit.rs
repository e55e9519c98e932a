//! Own-unit extraction through the park's private booking API.
//!
//! The availability and pricing endpoints live on the same origin as the
//! booking page and expect a primed session, so the live booking page is
//! loaded first to fill the cookie jar. Both endpoints require an
//! `X-Requested-With: XMLHttpRequest` header and speak DD/MM/YYYY dates.
//! Prices are requested `withExtras=true`, meaning the returned total
//! already includes the mandatory costs (cleaning, linen, administration,
//! park charges) and compares fairly against competitor quotes.

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::config::ScraperConfig;
use crate::models::{Quote, SourceIdentity};

use super::parse::parse_dmy_slashed;
use super::windows::months_from;
use super::{PriceSource, RunContext, ScrapeError, Strategy};

// ── Wire shapes ───────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct AvailableDatesResponse {
    #[serde(default)]
    pub available: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PricesResponse {
    #[serde(default)]
    pub periods: Vec<PriceEntry>,
    #[serde(default)]
    pub packages: Vec<PriceEntry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PriceEntry {
    #[serde(default)]
    pub raw: Option<RawPeriod>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawPeriod {
    #[serde(default)]
    pub arrivaldate: String,
    #[serde(default)]
    pub departuredate: String,
    #[serde(default)]
    pub nights: u32,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub discounted: bool,
    #[serde(default)]
    pub fromprice: Option<f64>,
}

/// Normalize one pricing response; periods and packages both count.
pub fn quotes_from_prices(response: &PricesResponse, accepted_nights: &[u32]) -> Vec<Quote> {
    let mut quotes = Vec::new();
    for entry in response.periods.iter().chain(response.packages.iter()) {
        let Some(raw) = &entry.raw else {
            continue;
        };
        if !accepted_nights.contains(&raw.nights) {
            continue;
        }
        let Some(price) = raw.price else {
            continue;
        };
        let Some(check_in) = parse_dmy_slashed(&raw.arrivaldate) else {
            continue;
        };
        let Some(check_out) = parse_dmy_slashed(&raw.departuredate) else {
            continue;
        };

        let special_offers = if raw.discounted {
            raw.fromprice
                .filter(|from| *from > price)
                .map(|from| format!("Was EUR {from:.0}"))
        } else {
            None
        };

        quotes.push(Quote {
            check_in,
            check_out,
            price: Some(price),
            available: raw.available,
            min_nights: Some(raw.nights),
            special_offers,
            availability_observed: !raw.available,
        });
    }
    quotes
}

// ── Source ────────────────────────────────────────────────────────────────────

pub struct OwnUnitSource {
    identity: SourceIdentity,
    booking_url: String,
    origin: String,
    object_type: String,
    rental_id: String,
    scraper_cfg: ScraperConfig,
    client: reqwest::Client,
}

impl OwnUnitSource {
    pub fn westerbergen(scraper_cfg: &ScraperConfig) -> Result<Self, ScrapeError> {
        Ok(Self {
            identity: SourceIdentity::new(
                "Westerbergen",
                "Bosbungalow Sequoia (C6)",
                "https://www.westerbergen.nl/accommodaties/bosbungalow-sequoia-c6",
            ),
            booking_url:
                "https://www.westerbergen.nl/accommodaties/bosbungalow-sequoia-c6/boeken?type%5B0%5D=169"
                    .to_string(),
            origin: "https://www.westerbergen.nl".to_string(),
            object_type: "354".to_string(),
            rental_id: "169".to_string(),
            scraper_cfg: scraper_cfg.clone(),
            client: build_client(scraper_cfg)?,
        })
    }

    fn available_dates_url(&self, year: i32, month: u32) -> String {
        format!(
            "{}/web/recreation/getAvailableDatesByYearMonth\
             ?language=nl&year={year}&month={month:02}\
             &objectType={}&rental%5B%5D={}&package=all",
            self.origin, self.object_type, self.rental_id
        )
    }

    fn prices_url(&self, date: NaiveDate, persons: u32) -> String {
        format!(
            "{}/web/recreation/getPricesByYearMonth\
             ?language=nl&withExtras=true&persons={persons}\
             &objectType={}&year={}&month={}&day={}&rental%5B%5D={}",
            self.origin,
            self.object_type,
            date.year(),
            date.month(),
            date.day(),
            self.rental_id
        )
    }

    /// Load the live booking page so the API calls run against a valid
    /// session.
    async fn establish_session(&self) -> Result<(), ScrapeError> {
        debug!("Loading booking page to establish session");
        self.client
            .get(&self.booking_url)
            .send()
            .await
            .map_err(ScrapeError::from_reqwest)?
            .error_for_status()
            .map_err(ScrapeError::from_reqwest)?;
        Ok(())
    }

    async fn fetch_available_dates(
        &self,
        ctx: &mut RunContext<'_>,
    ) -> Result<Vec<NaiveDate>, ScrapeError> {
        let months = months_from(ctx.params.today, ctx.params.months_ahead + 1);
        let mut dates: BTreeSet<NaiveDate> = BTreeSet::new();

        for (year, month) in months {
            ctx.pace().await;
            let url = self.available_dates_url(year, month);
            let response: AvailableDatesResponse = fetch_api(&self.client, &url).await?;
            for raw in &response.available {
                if let Some(date) = parse_dmy_slashed(raw) {
                    if date <= ctx.params.horizon_end {
                        dates.insert(date);
                    }
                }
            }
        }

        Ok(dates.into_iter().collect())
    }
}

fn build_client(scraper_cfg: &ScraperConfig) -> Result<reqwest::Client, ScrapeError> {
    reqwest::Client::builder()
        .user_agent(&scraper_cfg.user_agent)
        .timeout(Duration::from_secs(scraper_cfg.timeout_secs))
        .gzip(true)
        .cookie_store(true)
        .build()
        .map_err(|e| ScrapeError::Parse(format!("http client: {e}")))
}

async fn fetch_api<T>(client: &reqwest::Client, url: &str) -> Result<T, ScrapeError>
where
    T: DeserializeOwned,
{
    let response = client
        .get(url)
        .header("X-Requested-With", "XMLHttpRequest")
        .send()
        .await
        .map_err(ScrapeError::from_reqwest)?
        .error_for_status()
        .map_err(ScrapeError::from_reqwest)?;
    response
        .json::<T>()
        .await
        .map_err(|e| ScrapeError::Parse(format!("{url}: {e}")))
}

#[async_trait(?Send)]
impl PriceSource for OwnUnitSource {
    fn identity(&self) -> &SourceIdentity {
        &self.identity
    }

    fn strategy(&self) -> Strategy {
        Strategy::SelfPaged
    }

    async fn extract_batch(&mut self, ctx: &mut RunContext<'_>) -> Result<(), ScrapeError> {
        let identity = self.identity.clone();

        self.establish_session().await?;

        let dates = self.fetch_available_dates(ctx).await?;
        info!("{}: {} available arrival dates", identity.name, dates.len());

        let mut seen: HashSet<(NaiveDate, NaiveDate)> = HashSet::new();

        // One price lookup per arrival date, a fixed-size group at a time
        // to bound simultaneous load on our own booking backend.
        for batch in dates.chunks(ctx.params.batch_size) {
            ctx.pace().await;

            let mut handles = Vec::with_capacity(batch.len());
            for &date in batch {
                let client = self.client.clone();
                let url = self.prices_url(date, ctx.params.persons);
                handles.push((
                    date,
                    tokio::spawn(async move { fetch_api::<PricesResponse>(&client, &url).await }),
                ));
            }

            for (date, handle) in handles {
                let outcome = match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        ctx.note_unit_error(format!("{}: {date}: task panic: {e}", identity.name));
                        continue;
                    }
                };
                match outcome {
                    Ok(response) => {
                        for quote in quotes_from_prices(&response, &ctx.params.accepted_nights) {
                            if !seen.insert((quote.check_in, quote.check_out)) {
                                continue;
                            }
                            ctx.push(&identity, quote)?;
                        }
                    }
                    Err(e) => {
                        ctx.note_unit_error(format!("{}: {date}: {e}", identity.name));
                    }
                }
            }
        }

        Ok(())
    }

    /// Fresh client, fresh cookie jar; the next attempt re-establishes the
    /// session from scratch.
    async fn reset_session(&mut self) -> Result<(), ScrapeError> {
        self.client = build_client(&self.scraper_cfg)?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    const PRICES_JSON: &str = r#"{
        "periods": [
            {
                "raw": {
                    "arrivaldate": "13/02/2026",
                    "departuredate": "15/02/2026",
                    "nights": 2,
                    "price": 379.5,
                    "available": true,
                    "discounted": true,
                    "fromprice": 425.0
                }
            },
            {
                "raw": {
                    "arrivaldate": "13/02/2026",
                    "departuredate": "18/02/2026",
                    "nights": 5,
                    "price": 800.0,
                    "available": true
                }
            }
        ],
        "packages": [
            {
                "raw": {
                    "arrivaldate": "13/02/2026",
                    "departuredate": "20/02/2026",
                    "nights": 7,
                    "price": 1095.0,
                    "available": false
                }
            }
        ]
    }"#;

    fn parsed() -> PricesResponse {
        serde_json::from_str(PRICES_JSON).unwrap()
    }

    #[test]
    fn test_quotes_from_prices() {
        let quotes = quotes_from_prices(&parsed(), &[2, 3, 4, 7]);

        // the 5-night period is filtered; periods and packages both counted
        assert_eq!(quotes.len(), 2);

        let weekend = &quotes[0];
        assert_eq!(weekend.check_in, d(2026, 2, 13));
        assert_eq!(weekend.check_out, d(2026, 2, 15));
        assert_eq!(weekend.price, Some(379.5));
        assert!(weekend.available);
        assert_eq!(weekend.special_offers.as_deref(), Some("Was EUR 425"));

        let week = &quotes[1];
        assert_eq!(week.min_nights, Some(7));
        assert!(!week.available);
        assert!(week.availability_observed, "flag comes from the API");
        assert_eq!(week.special_offers, None);
    }

    #[test]
    fn test_from_price_below_current_is_not_an_offer() {
        let mut response = parsed();
        if let Some(raw) = response.periods[0].raw.as_mut() {
            raw.fromprice = Some(300.0);
        }
        let quotes = quotes_from_prices(&response, &[2]);
        assert_eq!(quotes[0].special_offers, None);
    }

    #[test]
    fn test_available_dates_parse() {
        let response: AvailableDatesResponse =
            serde_json::from_str(r#"{"available": ["13/02/2026", "16/02/2026"]}"#).unwrap();
        let dates: Vec<_> = response
            .available
            .iter()
            .filter_map(|s| parse_dmy_slashed(s))
            .collect();
        assert_eq!(dates, vec![d(2026, 2, 13), d(2026, 2, 16)]);
    }

    #[test]
    fn test_entry_without_raw_is_skipped() {
        let response: PricesResponse =
            serde_json::from_str(r#"{"periods": [{}], "packages": []}"#).unwrap();
        assert!(quotes_from_prices(&response, &[2]).is_empty());
    }
}
