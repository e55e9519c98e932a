//! Rendered-matrix extraction for the BoekingPro/TOMM booking widget.
//!
//! The widget applies promotional discounts client-side only, so prices are
//! read from the rendered DOM, never from the backing matrix API. Matrix
//! rows carry a duration label ("3 nachten", "1 week"), cells carry a
//! booking link whose href embeds a URL-encoded JSON `period` with the
//! exact stay dates. Price priority per cell: rendered discounted price,
//! then regular price, then the `price` href parameter.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::config::ScraperConfig;
use crate::models::{Quote, SourceIdentity};

use super::parse::{parse_dutch_amount, parse_duration_label};
use super::session::BrowserSession;
use super::{PriceSource, RunContext, ScrapeError, Strategy};

const WIDGET_SELECTOR: &str = ".w3media-booking-matrix-widget";
const NEXT_SELECTOR: &str = ".w3media-booking-matrix-widget a.btn-next";

// ── Matrix parsing ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct MatrixEntry {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub duration: u32,
    pub price: f64,
    pub original_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PeriodParam {
    start: String,
    end: String,
}

fn selector(s: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(s).map_err(|e| ScrapeError::Parse(format!("selector {s}: {e}")))
}

fn period_from_href(href: &str) -> Option<(NaiveDate, NaiveDate)> {
    let url = Url::parse(href)
        .or_else(|_| Url::parse("https://widgets.boekingpro.nl/")?.join(href))
        .ok()?;
    let (_, raw) = url.query_pairs().find(|(k, _)| k == "period")?;
    let period: PeriodParam = serde_json::from_str(&raw).ok()?;
    let start = NaiveDate::parse_from_str(&period.start, "%Y-%m-%d").ok()?;
    let end = NaiveDate::parse_from_str(&period.end, "%Y-%m-%d").ok()?;
    Some((start, end))
}

fn price_from_href(href: &str) -> Option<f64> {
    let url = Url::parse(href)
        .or_else(|_| Url::parse("https://widgets.boekingpro.nl/")?.join(href))
        .ok()?;
    let (_, raw) = url.query_pairs().find(|(k, _)| k == "price")?;
    raw.parse().ok()
}

fn text_of(cell: scraper::ElementRef<'_>, sel: &Selector) -> Option<String> {
    cell.select(sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
}

/// Parse the visible matrix page. Returns the extracted entries and whether
/// a "next" pagination control exists. A page without the widget yields no
/// entries, not an error.
pub fn parse_matrix(html: &str) -> Result<(Vec<MatrixEntry>, bool), ScrapeError> {
    let doc = Html::parse_document(html);
    let widget_sel = selector(WIDGET_SELECTOR)?;
    let row_sel = selector(".matrix-row")?;
    let cell_sel = selector(".matrix-cel")?;
    let duration_sel = selector(".duration")?;
    let link_sel = selector("a.available, a.matrix-price-popover-container")?;
    let prices_sel = selector(".prices")?;
    let discount_sel = selector(".discount-price")?;
    let price_sel = selector(".price")?;
    let old_price_sel = selector(".price-old")?;
    let next_sel = selector("a.btn-next")?;

    let Some(widget) = doc.select(&widget_sel).next() else {
        return Ok((Vec::new(), false));
    };

    let mut entries = Vec::new();
    for row in widget.select(&row_sel) {
        let cells: Vec<_> = row.select(&cell_sel).collect();
        if cells.len() < 2 {
            continue;
        }

        let Some(duration) = text_of(cells[0], &duration_sel)
            .as_deref()
            .and_then(parse_duration_label)
        else {
            continue;
        };

        for cell in &cells[1..] {
            let Some(link) = cell.select(&link_sel).next() else {
                continue;
            };
            let href = link.value().attr("href").unwrap_or("");
            let Some((check_in, check_out)) = period_from_href(href) else {
                continue;
            };

            let mut price = None;
            let mut original_price = None;
            if let Some(prices) = cell.select(&prices_sel).next() {
                let discount = text_of(prices, &discount_sel)
                    .as_deref()
                    .and_then(parse_dutch_amount);
                let regular = text_of(prices, &price_sel)
                    .as_deref()
                    .and_then(parse_dutch_amount);
                if discount.is_some() {
                    price = discount;
                    original_price = text_of(prices, &old_price_sel)
                        .as_deref()
                        .and_then(parse_dutch_amount);
                } else {
                    price = regular;
                }
            }
            if price.is_none() {
                price = price_from_href(href);
            }
            let Some(price) = price else {
                continue;
            };

            entries.push(MatrixEntry {
                check_in,
                check_out,
                duration,
                price,
                original_price: original_price.filter(|orig| *orig > price),
            });
        }
    }

    let has_next = widget.select(&next_sel).next().is_some();
    Ok((entries, has_next))
}

// ── Source ────────────────────────────────────────────────────────────────────

pub struct MatrixSource {
    identity: SourceIdentity,
    detail_url_base: String,
    scraper_cfg: ScraperConfig,
    session: Option<BrowserSession>,
}

impl MatrixSource {
    pub fn witter_zomer(scraper_cfg: &ScraperConfig) -> Self {
        Self {
            identity: SourceIdentity::new(
                "Witter Zomer",
                "6-persoons vakantiehuis (C6)",
                "https://www.witterzomer.nl/accommodaties/nederland-drenthe-6-persoons-vakantiehuis-c6",
            ),
            detail_url_base:
                "https://www.witterzomer.nl/accommodaties/verhuur/6-persoons-vakantiehuis\
                 ?house=[%2287%22]&stay=[%2238%22]"
                    .to_string(),
            scraper_cfg: scraper_cfg.clone(),
            session: None,
        }
    }

    fn detail_url(&self, persons: u32) -> String {
        format!(
            "{}&travelgroup={{%22adult%22:{persons}}}",
            self.detail_url_base
        )
    }

    fn ensure_session(&mut self) -> Result<&BrowserSession, ScrapeError> {
        if self.session.is_none() {
            self.session = Some(BrowserSession::launch(&self.scraper_cfg)?);
        }
        self.session
            .as_ref()
            .ok_or_else(|| ScrapeError::Browser("session unavailable".into()))
    }
}

#[async_trait(?Send)]
impl PriceSource for MatrixSource {
    fn identity(&self) -> &SourceIdentity {
        &self.identity
    }

    fn strategy(&self) -> Strategy {
        Strategy::SelfPaged
    }

    async fn extract_batch(&mut self, ctx: &mut RunContext<'_>) -> Result<(), ScrapeError> {
        let identity = self.identity.clone();
        let detail_url = self.detail_url(ctx.params.persons);

        let session = self.ensure_session()?;
        session.goto(&detail_url)?;
        session.accept_cookies();
        // the Vue widget renders well after navigation settles
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;

        let mut seen: HashSet<(NaiveDate, NaiveDate)> = HashSet::new();

        for page_num in 1..=ctx.params.max_pages {
            if let Err(e) = session.wait_for(WIDGET_SELECTOR) {
                ctx.note_unit_error(format!(
                    "{}: page {page_num}: widget not rendered ({e})",
                    identity.name
                ));
                break;
            }

            let html = session.html()?;
            let (entries, has_next) = parse_matrix(&html)?;

            let mut new_count = 0;
            let mut max_seen: Option<NaiveDate> = None;
            for entry in entries {
                if !ctx.params.accepts_nights(entry.duration) {
                    continue;
                }
                if !seen.insert((entry.check_in, entry.check_out)) {
                    continue;
                }
                max_seen = Some(max_seen.map_or(entry.check_in, |m: NaiveDate| m.max(entry.check_in)));

                let special_offers = entry
                    .original_price
                    .map(|orig| format!("Was EUR {orig:.0}"));
                ctx.push(
                    &identity,
                    Quote {
                        check_in: entry.check_in,
                        check_out: entry.check_out,
                        price: Some(entry.price),
                        available: true,
                        min_nights: Some(entry.duration),
                        special_offers,
                        availability_observed: false,
                    },
                )?;
                new_count += 1;
            }

            info!(
                "{}: page {page_num} (up to {}): {new_count} new prices",
                identity.name,
                max_seen.map_or_else(|| "?".to_string(), |d| d.to_string())
            );

            if max_seen.is_some_and(|m| m >= ctx.params.horizon_end) {
                debug!("{}: horizon reached", identity.name);
                break;
            }
            if !has_next {
                debug!("{}: no next control, stopping", identity.name);
                break;
            }

            ctx.pace().await;
            if !session.click(NEXT_SELECTOR)? {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        }

        Ok(())
    }

    async fn reset_session(&mut self) -> Result<(), ScrapeError> {
        match self.session.as_mut() {
            Some(session) => session.reset(),
            None => Ok(()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    // period={"start":"2026-02-14","end":"2026-02-16"} url-encoded
    const PERIOD_FEB: &str =
        "period=%7B%22start%22%3A%222026-02-14%22%2C%22end%22%3A%222026-02-16%22%7D";
    const PERIOD_MAR: &str =
        "period=%7B%22start%22%3A%222026-03-02%22%2C%22end%22%3A%222026-03-09%22%7D";

    fn widget_html() -> String {
        format!(
            r##"
            <div class="w3media-booking-matrix-widget">
              <div class="matrix-row">
                <div class="matrix-cel"><span class="duration">2 nachten</span></div>
                <div class="matrix-cel">
                  <a class="available" href="https://widgets.boekingpro.nl/boeken?{PERIOD_FEB}&price=329.00">
                    <div class="prices">
                      <span class="discount-price">299,00</span>
                      <span class="price-old">349,00</span>
                    </div>
                  </a>
                </div>
              </div>
              <div class="matrix-row">
                <div class="matrix-cel"><span class="duration">1 week</span></div>
                <div class="matrix-cel">
                  <a class="matrix-price-popover-container" href="/boeken?{PERIOD_MAR}&price=1049.50">
                  </a>
                </div>
              </div>
              <a class="btn-next" href="#">&gt;</a>
            </div>
            "##
        )
    }

    #[test]
    fn test_parse_matrix_price_priority() {
        let (entries, has_next) = parse_matrix(&widget_html()).unwrap();
        assert!(has_next);
        assert_eq!(entries.len(), 2);

        // discounted price beats the regular and href prices
        let weekend = &entries[0];
        assert_eq!(weekend.check_in, d(2026, 2, 14));
        assert_eq!(weekend.check_out, d(2026, 2, 16));
        assert_eq!(weekend.duration, 2);
        assert_eq!(weekend.price, 299.0);
        assert_eq!(weekend.original_price, Some(349.0));

        // no rendered price elements: fall back to the href parameter;
        // week phrasing multiplies out to nights
        let week = &entries[1];
        assert_eq!(week.duration, 7);
        assert_eq!(week.price, 1049.5);
        assert_eq!(week.original_price, None);
        assert_eq!(week.check_in, d(2026, 3, 2));
    }

    #[test]
    fn test_parse_matrix_without_widget() {
        let (entries, has_next) = parse_matrix("<html><body></body></html>").unwrap();
        assert!(entries.is_empty());
        assert!(!has_next);
    }

    #[test]
    fn test_period_from_relative_href() {
        let href = format!("/boeken?{PERIOD_FEB}");
        assert_eq!(
            period_from_href(&href),
            Some((d(2026, 2, 14), d(2026, 2, 16)))
        );
        assert_eq!(period_from_href("/boeken?period=broken"), None);
    }

    #[test]
    fn test_struck_price_below_effective_is_ignored() {
        let html = widget_html().replace("349,00", "250,00");
        let (entries, _) = parse_matrix(&html).unwrap();
        assert_eq!(entries[0].price, 299.0);
        assert_eq!(entries[0].original_price, None, "not an offer if lower");
    }
}
