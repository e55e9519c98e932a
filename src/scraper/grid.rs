//! Tabular price-grid extraction (BookingExperts platform).
//!
//! The accommodation page renders a `.price-grid-table`: columns are
//! year-less date headers ("vr 27 feb"), rows are night counts, cells hold a
//! decorated price ("€ 1.065") or an unavailable marker class. A "Later"
//! anchor pages roughly three days forward, so adjacent grids overlap and
//! results are deduplicated by resolved (check-in, check-out).
//!
//! One strategy struct serves every park on the platform; each source is an
//! independent instance configured with its own identity and URL.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use scraper::{Html, Selector};
use tracing::{debug, info};

use crate::config::ScraperConfig;
use crate::models::{DateWindow, Quote, SourceIdentity};

use super::parse::{parse_euro_price, resolve_date_header};
use super::session::BrowserSession;
use super::{PriceSource, RunContext, ScrapeError, Strategy};

// ── Raw grid shape ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct GridCell {
    pub date_header: String,
    pub nights: u32,
    pub price: Option<f64>,
    pub unavailable: bool,
}

fn selector(s: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(s).map_err(|e| ScrapeError::Parse(format!("selector {s}: {e}")))
}

/// Parse the full grid into (date-header, nights, price, availability)
/// tuples. A page without the grid table yields an empty list, not an error.
pub fn parse_price_grid(html: &str) -> Result<Vec<GridCell>, ScrapeError> {
    let doc = Html::parse_document(html);
    let table_sel = selector(".price-grid-table")?;
    let th_sel = selector("thead th")?;
    let row_sel = selector("tbody tr.price-grid-table-result-row")?;
    let cell_sel = selector("td, th")?;

    let Some(table) = doc.select(&table_sel).next() else {
        return Ok(Vec::new());
    };

    let headers: Vec<String> = table
        .select(&th_sel)
        .skip(1)
        .map(|th| th.text().collect::<String>().trim().to_string())
        .collect();

    let mut cells = Vec::new();
    for row in table.select(&row_sel) {
        let row_cells: Vec<_> = row.select(&cell_sel).collect();
        if row_cells.len() < 2 {
            continue;
        }

        let nights_label = row_cells[0].text().collect::<String>();
        let Some(nights) = first_number(&nights_label) else {
            continue;
        };

        for (i, cell) in row_cells.iter().skip(1).enumerate() {
            let Some(date_header) = headers.get(i) else {
                break;
            };
            let class = cell.value().attr("class").unwrap_or("");
            let unavailable = class.contains("price-grid-table-unavailable");
            let text = cell.text().collect::<String>();

            cells.push(GridCell {
                date_header: date_header.clone(),
                nights,
                price: parse_euro_price(&text),
                unavailable,
            });
        }
    }

    Ok(cells)
}

fn first_number(s: &str) -> Option<u32> {
    s.split_whitespace().find_map(|t| t.parse().ok())
}

/// Href of the grid's "Later" navigation anchor, if present.
pub fn find_later_href(html: &str) -> Result<Option<String>, ScrapeError> {
    let doc = Html::parse_document(html);
    let a_sel = selector("a")?;
    for a in doc.select(&a_sel) {
        let text = a.text().collect::<String>();
        if text.trim() == "Later" {
            return Ok(a.value().attr("href").map(|h| h.to_string()));
        }
    }
    Ok(None)
}

/// Ensure the guest-count parameter survives pagination; pricing (tourist
/// tax and the like) depends on it.
fn with_guests(url: &str, persons: u32) -> String {
    if url.contains("guest_group%5Badults%5D=") {
        return url.to_string();
    }
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}guest_group%5Badults%5D={persons}")
}

fn absolutize(base: &str, href: &str) -> Option<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    url::Url::parse(base)
        .ok()?
        .join(href)
        .ok()
        .map(|u| u.to_string())
}

// ── Source ────────────────────────────────────────────────────────────────────

pub struct GridSource {
    identity: SourceIdentity,
    scraper_cfg: ScraperConfig,
    session: Option<BrowserSession>,
}

impl GridSource {
    pub fn new(identity: SourceIdentity, scraper_cfg: &ScraperConfig) -> Self {
        Self {
            identity,
            scraper_cfg: scraper_cfg.clone(),
            session: None,
        }
    }

    pub fn beerze_bulten(scraper_cfg: &ScraperConfig) -> Self {
        Self::new(
            SourceIdentity::new(
                "Beerze Bulten",
                "Luxe Bungalow",
                "https://www.beerzebulten.nl/accommodaties/bungalow",
            ),
            scraper_cfg,
        )
    }

    pub fn de_boshoek(scraper_cfg: &ScraperConfig) -> Self {
        Self::new(
            SourceIdentity::new(
                "De Boshoek",
                "Bungalow Zeumeren",
                "https://www.deboshoek.nl/accommodaties/nederland-gelderland-bungalow-zeumeren-6-personen",
            ),
            scraper_cfg,
        )
    }

    pub fn de_witte_berg(scraper_cfg: &ScraperConfig) -> Self {
        Self::new(
            SourceIdentity::new(
                "De Witte Berg",
                "Bungalow Dennenlust",
                "https://www.dewitteberg.nl/accommodaties/nederland-overijssel-bungalow-dennenlust-6-personen",
            ),
            scraper_cfg,
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
impl PriceSource for GridSource {
    fn identity(&self) -> &SourceIdentity {
        &self.identity
    }

    fn strategy(&self) -> Strategy {
        Strategy::SelfPaged
    }

    /// Single-window lookup: center the grid on the check-in date and read
    /// the one cell matching the stay. Slower than the paged batch mode,
    /// kept for targeted re-checks.
    async fn extract_window(
        &mut self,
        ctx: &mut RunContext<'_>,
        window: &DateWindow,
    ) -> Result<Vec<Quote>, ScrapeError> {
        let persons = ctx.params.persons;
        let url = with_guests(
            &format!(
                "{}?grid_center%5Bsearch_date%5D={}",
                self.identity.url, window.check_in
            ),
            persons,
        );

        let session = self.ensure_session()?;
        session.goto(&url)?;
        session.accept_cookies();
        session.wait_for(".price-grid-table")?;

        let html = session.html()?;
        for cell in &parse_price_grid(&html)? {
            let Some(check_in) = resolve_date_header(&cell.date_header, window.check_in) else {
                continue;
            };
            if check_in == window.check_in && cell.nights == window.nights {
                return Ok(vec![Quote {
                    check_in,
                    check_out: window.check_out,
                    price: cell.price,
                    available: !cell.unavailable && cell.price.is_some(),
                    min_nights: Some(cell.nights),
                    special_offers: None,
                    availability_observed: cell.unavailable,
                }]);
            }
        }

        // Stay not in view: unknown, not an observed sold-out.
        debug!(
            "{}: no grid cell for {} ({}n)",
            self.identity.name, window.check_in, window.nights
        );
        Ok(vec![Quote::unavailable(window.check_in, window.check_out, false)])
    }

    async fn extract_batch(&mut self, ctx: &mut RunContext<'_>) -> Result<(), ScrapeError> {
        let identity = self.identity.clone();
        let persons = ctx.params.persons;
        let max_pages = ctx.params.max_pages;
        let horizon_end = ctx.params.horizon_end;

        let start_url = with_guests(&identity.url, persons);
        let session = self.ensure_session()?;
        session.goto(&start_url)?;
        session.accept_cookies();

        let mut seen: HashSet<(NaiveDate, NaiveDate)> = HashSet::new();
        let mut current_url = start_url;
        let mut reference = ctx.params.today;

        for page_num in 1..=max_pages {
            if let Err(e) = session.wait_for(".price-grid-table") {
                ctx.note_unit_error(format!(
                    "{}: page {page_num}: price grid not found ({e})",
                    identity.name
                ));
                break;
            }

            let html = session.html()?;
            let cells = parse_price_grid(&html)?;
            if cells.is_empty() {
                ctx.note_unit_error(format!("{}: page {page_num}: empty grid", identity.name));
                break;
            }

            // Anchor the year resolution on the first visible header so the
            // later pages stay correct across a year boundary.
            if let Some(first) = cells.first() {
                if let Some(resolved) = resolve_date_header(&first.date_header, reference) {
                    reference = resolved;
                }
            }

            let mut new_count = 0;
            let mut furthest: Option<NaiveDate> = None;

            for cell in &cells {
                let Some(check_in) = resolve_date_header(&cell.date_header, reference) else {
                    continue;
                };
                furthest = Some(furthest.map_or(check_in, |f: NaiveDate| f.max(check_in)));

                if !ctx.params.accepts_nights(cell.nights) {
                    continue;
                }
                let check_out = check_in + Duration::days(cell.nights as i64);
                if !seen.insert((check_in, check_out)) {
                    continue;
                }

                ctx.push(
                    &identity,
                    Quote {
                        check_in,
                        check_out,
                        price: cell.price,
                        available: !cell.unavailable && cell.price.is_some(),
                        min_nights: Some(cell.nights),
                        special_offers: None,
                        availability_observed: cell.unavailable,
                    },
                )?;
                new_count += 1;
            }

            info!(
                "{}: page {page_num}: {new_count} new prices",
                identity.name
            );

            if furthest.is_some_and(|f| f > horizon_end) {
                debug!("{}: horizon reached at {furthest:?}", identity.name);
                break;
            }

            let Some(later) = find_later_href(&html)? else {
                debug!("{}: no Later link, stopping", identity.name);
                break;
            };
            let Some(later) = absolutize(&current_url, &later) else {
                ctx.note_unit_error(format!("{}: unparsable Later href", identity.name));
                break;
            };
            current_url = with_guests(&later, persons);

            ctx.pace().await;
            session.goto(&current_url)?;
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

    const GRID_HTML: &str = r#"
        <html><body>
        <table class="price-grid-table">
          <thead>
            <tr>
              <th></th>
              <th>vr
27 feb</th>
              <th>za
28 feb</th>
            </tr>
          </thead>
          <tbody>
            <tr class="price-grid-table-result-row">
              <th>2 nachten</th>
              <td><a href="/boeken">€ 524</a></td>
              <td class="price-grid-table-unavailable">niet beschikbaar</td>
            </tr>
            <tr class="price-grid-table-result-row">
              <th>7 nachten</th>
              <td>€ 1.065</td>
              <td>€ 1.120</td>
            </tr>
          </tbody>
        </table>
        <a href="?grid_center%5Bsearch_date%5D=2026-03-02">Later</a>
        </body></html>
    "#;

    #[test]
    fn test_parse_price_grid() {
        let cells = parse_price_grid(GRID_HTML).unwrap();
        assert_eq!(cells.len(), 4);

        assert_eq!(cells[0].date_header, "vr\n27 feb");
        assert_eq!(cells[0].nights, 2);
        assert_eq!(cells[0].price, Some(524.0));
        assert!(!cells[0].unavailable);

        assert!(cells[1].unavailable);
        assert_eq!(cells[1].price, None);

        assert_eq!(cells[2].nights, 7);
        assert_eq!(cells[2].price, Some(1065.0));
        assert_eq!(cells[3].price, Some(1120.0));
    }

    #[test]
    fn test_parse_price_grid_without_table() {
        let cells = parse_price_grid("<html><body><p>onderhoud</p></body></html>").unwrap();
        assert!(cells.is_empty());
    }

    #[test]
    fn test_find_later_href() {
        let href = find_later_href(GRID_HTML).unwrap();
        assert_eq!(
            href.as_deref(),
            Some("?grid_center%5Bsearch_date%5D=2026-03-02")
        );
        assert_eq!(find_later_href("<html></html>").unwrap(), None);
    }

    #[test]
    fn test_with_guests() {
        assert_eq!(
            with_guests("https://x.nl/a", 4),
            "https://x.nl/a?guest_group%5Badults%5D=4"
        );
        assert_eq!(
            with_guests("https://x.nl/a?p=1", 4),
            "https://x.nl/a?p=1&guest_group%5Badults%5D=4"
        );
        // already present: left alone
        let kept = "https://x.nl/a?guest_group%5Badults%5D=2";
        assert_eq!(with_guests(kept, 4), kept);
    }

    #[test]
    fn test_absolutize() {
        assert_eq!(
            absolutize("https://x.nl/a/b?c=1", "?d=2").as_deref(),
            Some("https://x.nl/a/b?d=2")
        );
        assert_eq!(
            absolutize("https://x.nl/a", "https://y.nl/z").as_deref(),
            Some("https://y.nl/z")
        );
    }
}
