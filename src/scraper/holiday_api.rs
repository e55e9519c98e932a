//! Two-phase REST extraction for parks on the HolidayAgent platform.
//!
//! Phase 1 asks the per-month endpoint which arrival dates have any
//! availability; phase 2 fetches the departure options per arrival date in
//! fixed-size concurrent batches. No browser involved, so this is by far
//! the fastest adapter family.
//!
//! The API quotes a base price for two guests plus an `additionalPrice`
//! surcharge for the extra ones; the all-in price is their sum, never a
//! multiple.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, REFERER};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::ScraperConfig;
use crate::models::{Quote, SourceIdentity};

use super::parse::parse_dmy_dashed;
use super::windows::months_from;
use super::{PriceSource, RunContext, ScrapeError, Strategy};

const API_BASE: &str = "https://api.holidayagent.nl/v1/resort";

// ── Wire shapes ───────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ApiEnvelope {
    #[serde(default)]
    pub response: ApiResponse,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub arrivals: Vec<Arrival>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Arrival {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub departures: Vec<Departure>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Departure {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub nights: u32,
    #[serde(default)]
    pub prices: Prices,
    #[serde(default, rename = "amountAvailable")]
    pub amount_available: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct Prices {
    #[serde(default, rename = "totalPrice")]
    pub total_price: Option<f64>,
    #[serde(default, rename = "additionalPrice")]
    pub additional_price: Option<f64>,
    #[serde(default, rename = "discountPrice")]
    pub discount_price: Option<f64>,
}

/// Normalize one arrival's departure options. Departures outside the
/// accepted night counts are dropped; a zero availability count is an
/// explicit sold-out signal from the platform.
pub fn quotes_from_arrival(arrival: &Arrival, accepted_nights: &[u32]) -> Vec<Quote> {
    let Some(check_in) = parse_dmy_dashed(&arrival.date) else {
        return Vec::new();
    };

    let mut quotes = Vec::new();
    for departure in &arrival.departures {
        if !accepted_nights.contains(&departure.nights) {
            continue;
        }
        let Some(check_out) = parse_dmy_dashed(&departure.date) else {
            continue;
        };

        // Surcharge is additive only.
        let price = departure
            .prices
            .total_price
            .map(|base| base + departure.prices.additional_price.unwrap_or(0.0));

        let special_offers = departure
            .prices
            .discount_price
            .filter(|d| *d > 0.0)
            .map(|d| format!("Korting: EUR {d:.0}"));

        let sold_out = departure.amount_available <= 0;
        quotes.push(Quote {
            check_in,
            check_out,
            price,
            available: !sold_out && price.is_some(),
            min_nights: Some(departure.nights),
            special_offers,
            availability_observed: sold_out,
        });
    }
    quotes
}

// ── Source ────────────────────────────────────────────────────────────────────

pub struct HolidayAgentSource {
    identity: SourceIdentity,
    resort_slug: String,
    level_id: String,
    scraper_cfg: ScraperConfig,
    client: reqwest::Client,
}

impl HolidayAgentSource {
    pub fn new(
        identity: SourceIdentity,
        resort_slug: &str,
        level_id: &str,
        scraper_cfg: &ScraperConfig,
    ) -> Result<Self, ScrapeError> {
        let client = build_client(scraper_cfg, &identity.url)?;
        Ok(Self {
            identity,
            resort_slug: resort_slug.to_string(),
            level_id: level_id.to_string(),
            scraper_cfg: scraper_cfg.clone(),
            client,
        })
    }

    pub fn camping_ommerland(scraper_cfg: &ScraperConfig) -> Result<Self, ScrapeError> {
        Self::new(
            SourceIdentity::new(
                "Camping Ommerland",
                "Bos Villa (6p)",
                "https://www.ommerland.nl/huren/bos-villa",
            ),
            "campingommerland",
            "20334",
            scraper_cfg,
        )
    }

    pub fn eiland_van_maurik(scraper_cfg: &ScraperConfig) -> Result<Self, ScrapeError> {
        Self::new(
            SourceIdentity::new(
                "Eiland van Maurik",
                "EilandLodge (6 persoons)",
                "https://www.eilandvanmaurik.nl/accommodaties/eilandlodge-6",
            ),
            "eilandvanmaurik",
            "9504",
            scraper_cfg,
        )
    }

    fn month_url(&self, year: i32, month: u32) -> String {
        format!(
            "{API_BASE}/{}/arrivals?lng=nl&levels%5B%5D={}&year={year}&month={month:02}",
            self.resort_slug, self.level_id
        )
    }

    fn prices_url(&self, arrival: NaiveDate) -> String {
        format!(
            "{API_BASE}/{}/arrivals/{}?lng=nl&levels%5B%5D={}",
            self.resort_slug,
            arrival.format("%d-%m-%Y"),
            self.level_id
        )
    }

    /// Phase 1: union of arrival dates with any availability in the horizon.
    async fn fetch_arrival_dates(
        &self,
        ctx: &mut RunContext<'_>,
    ) -> Result<Vec<NaiveDate>, ScrapeError> {
        let months = months_from(ctx.params.today, ctx.params.months_ahead + 1);
        let mut dates: BTreeSet<NaiveDate> = BTreeSet::new();

        for (year, month) in months {
            ctx.pace().await;
            let url = self.month_url(year, month);
            debug!("Fetching arrivals: {url}");
            let envelope = fetch_json(&self.client, &url).await?;
            for arrival in &envelope.response.arrivals {
                if let Some(date) = parse_dmy_dashed(&arrival.date) {
                    if date <= ctx.params.horizon_end {
                        dates.insert(date);
                    }
                }
            }
        }

        Ok(dates.into_iter().collect())
    }
}

async fn fetch_json(client: &reqwest::Client, url: &str) -> Result<ApiEnvelope, ScrapeError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(ScrapeError::from_reqwest)?;
    let response = response
        .error_for_status()
        .map_err(ScrapeError::from_reqwest)?;
    response
        .json::<ApiEnvelope>()
        .await
        .map_err(|e| ScrapeError::Parse(format!("{url}: {e}")))
}

fn build_client(scraper_cfg: &ScraperConfig, referer: &str) -> Result<reqwest::Client, ScrapeError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    if let Ok(value) = HeaderValue::from_str(referer) {
        headers.insert(REFERER, value);
    }

    reqwest::Client::builder()
        .user_agent(&scraper_cfg.user_agent)
        .timeout(Duration::from_secs(scraper_cfg.timeout_secs))
        .gzip(true)
        .default_headers(headers)
        .build()
        .map_err(|e| ScrapeError::Parse(format!("http client: {e}")))
}

#[async_trait(?Send)]
impl PriceSource for HolidayAgentSource {
    fn identity(&self) -> &SourceIdentity {
        &self.identity
    }

    fn strategy(&self) -> Strategy {
        Strategy::SelfPaged
    }

    async fn extract_batch(&mut self, ctx: &mut RunContext<'_>) -> Result<(), ScrapeError> {
        let identity = self.identity.clone();

        let arrival_dates = self.fetch_arrival_dates(ctx).await?;
        info!(
            "{}: {} arrival dates with availability",
            identity.name,
            arrival_dates.len()
        );

        // Phase 2: departure options per arrival, a fixed-size batch at a
        // time. Batches run concurrently inside, sequentially between.
        for batch in arrival_dates.chunks(ctx.params.batch_size) {
            ctx.pace().await;

            let mut handles = Vec::with_capacity(batch.len());
            for &arrival in batch {
                let client = self.client.clone();
                let url = self.prices_url(arrival);
                handles.push((
                    arrival,
                    tokio::spawn(async move { fetch_json(&client, &url).await }),
                ));
            }

            for (arrival, handle) in handles {
                let outcome = match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        ctx.note_unit_error(format!("{}: {arrival}: task panic: {e}", identity.name));
                        continue;
                    }
                };
                match outcome {
                    Ok(envelope) => {
                        for wire_arrival in &envelope.response.arrivals {
                            for quote in
                                quotes_from_arrival(wire_arrival, &ctx.params.accepted_nights)
                            {
                                ctx.push(&identity, quote)?;
                            }
                        }
                    }
                    Err(e) => {
                        ctx.note_unit_error(format!("{}: {arrival}: {e}", identity.name));
                    }
                }
            }
        }

        Ok(())
    }

    async fn reset_session(&mut self) -> Result<(), ScrapeError> {
        self.client = build_client(&self.scraper_cfg, &self.identity.url)?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const ARRIVALS_JSON: &str = r#"{
        "response": {
            "arrivals": [
                {
                    "date": "13-02-2026",
                    "departures": [
                        {
                            "date": "15-02-2026",
                            "nights": 2,
                            "prices": {
                                "totalPrice": 398.0,
                                "additionalPrice": 46.0,
                                "discountPrice": 25.0
                            },
                            "amountAvailable": 3
                        },
                        {
                            "date": "19-02-2026",
                            "nights": 6,
                            "prices": { "totalPrice": 900.0 },
                            "amountAvailable": 1
                        },
                        {
                            "date": "20-02-2026",
                            "nights": 7,
                            "prices": { "totalPrice": 1020.0, "additionalPrice": 80.0 },
                            "amountAvailable": 0
                        }
                    ]
                }
            ]
        }
    }"#;

    fn parsed() -> ApiEnvelope {
        serde_json::from_str(ARRIVALS_JSON).unwrap()
    }

    #[test]
    fn test_wire_shape_parses() {
        let envelope = parsed();
        assert_eq!(envelope.response.arrivals.len(), 1);
        let arrival = &envelope.response.arrivals[0];
        assert_eq!(arrival.date, "13-02-2026");
        assert_eq!(arrival.departures.len(), 3);
        assert_eq!(arrival.departures[0].prices.total_price, Some(398.0));
    }

    #[test]
    fn test_surcharge_is_additive_and_nights_filtered() {
        let envelope = parsed();
        let quotes = quotes_from_arrival(&envelope.response.arrivals[0], &[2, 3, 4, 7]);

        // the 6-night departure is outside the whitelist
        assert_eq!(quotes.len(), 2);

        let weekend = &quotes[0];
        assert_eq!(weekend.price, Some(444.0), "base 398 + surcharge 46");
        assert!(weekend.available);
        assert_eq!(weekend.min_nights, Some(2));
        assert_eq!(weekend.special_offers.as_deref(), Some("Korting: EUR 25"));

        let week = &quotes[1];
        assert_eq!(week.price, Some(1100.0));
        assert!(!week.available, "amountAvailable 0 means sold out");
        assert!(week.availability_observed);
        assert_eq!(week.special_offers, None);
    }

    #[test]
    fn test_malformed_arrival_yields_nothing() {
        let arrival = Arrival {
            date: "not-a-date".into(),
            departures: Vec::new(),
        };
        assert!(quotes_from_arrival(&arrival, &[2]).is_empty());
    }
}
