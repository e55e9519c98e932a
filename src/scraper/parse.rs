//! Text normalizers for the booking platforms' markup: Dutch-locale prices,
//! year-less date headers, day-first date strings and duration labels.

use chrono::{Datelike, NaiveDate};

// ── Prices ────────────────────────────────────────────────────────────────────

/// Parse a Dutch-formatted amount: dot is the thousands separator, comma the
/// decimal one. "1.065" → 1065.0 | "1.234,56" → 1234.56 | "695" → 695.0
pub fn parse_dutch_amount(s: &str) -> Option<f64> {
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.replace('.', "").replace(',', ".").parse().ok()
}

/// Parse a decorated grid cell price like "€ 524" or "€ 1.065".
/// Cells without a euro sign (unavailable markers, empty cells) yield None.
pub fn parse_euro_price(s: &str) -> Option<f64> {
    let after = s.split('€').nth(1)?;
    parse_dutch_amount(after)
}

// ── Date headers ──────────────────────────────────────────────────────────────

const DUTCH_MONTHS: [&str; 12] = [
    "jan", "feb", "mrt", "apr", "mei", "jun", "jul", "aug", "sep", "okt", "nov", "dec",
];

/// Extract (day, month) from a year-less grid header like "vr 27 feb" or
/// "ma\n 2 mrt". The weekday prefix is ignored.
pub fn parse_date_header(s: &str) -> Option<(u32, u32)> {
    let tokens: Vec<&str> = s.split_whitespace().collect();
    for pair in tokens.windows(2) {
        if let Ok(day) = pair[0].parse::<u32>() {
            let month_token = pair[1].to_lowercase();
            if let Some(idx) = DUTCH_MONTHS.iter().position(|m| month_token.starts_with(m)) {
                if (1..=31).contains(&day) {
                    return Some((day, idx as u32 + 1));
                }
            }
        }
    }
    None
}

/// Resolve a year-less (day, month) to an absolute date by picking whichever
/// of {reference year, reference year + 1} lies closest to the reference.
/// Disambiguates headers near year boundaries.
pub fn resolve_year(day: u32, month: u32, reference: NaiveDate) -> Option<NaiveDate> {
    let mut best: Option<(NaiveDate, i64)> = None;
    for year in [reference.year(), reference.year() + 1] {
        let Some(candidate) = NaiveDate::from_ymd_opt(year, month, day) else {
            continue;
        };
        let diff = (candidate - reference).num_days().abs();
        if best.is_none_or(|(_, d)| diff < d) {
            best = Some((candidate, diff));
        }
    }
    best.map(|(d, _)| d)
}

/// Full header resolution: "vr 27 feb" + reference → absolute date.
pub fn resolve_date_header(header: &str, reference: NaiveDate) -> Option<NaiveDate> {
    let (day, month) = parse_date_header(header)?;
    resolve_year(day, month, reference)
}

// ── Day-first date strings ────────────────────────────────────────────────────

/// "13-02-2026" → 2026-02-13 (HolidayAgent wire format)
pub fn parse_dmy_dashed(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%d-%m-%Y").ok()
}

/// "13/02/2026" → 2026-02-13 (own-unit booking API format)
pub fn parse_dmy_slashed(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%d/%m/%Y").ok()
}

// ── Duration labels ───────────────────────────────────────────────────────────

/// Parse a matrix row duration label into nights.
/// "2 nachten" → 2 | "1 nacht" → 1 | "2 weken" → 14 | "1 week" → 7
pub fn parse_duration_label(s: &str) -> Option<u32> {
    let tokens: Vec<&str> = s.split_whitespace().collect();
    for pair in tokens.windows(2) {
        let Ok(n) = pair[0].parse::<u32>() else {
            continue;
        };
        let unit = pair[1].to_lowercase();
        if unit.starts_with("nacht") {
            return Some(n);
        }
        if unit.starts_with("week") || unit.starts_with("weken") {
            return Some(n * 7);
        }
    }
    None
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_parse_dutch_amount() {
        assert_eq!(parse_dutch_amount("1.065"), Some(1065.0));
        assert_eq!(parse_dutch_amount("1.234,56"), Some(1234.56));
        assert_eq!(parse_dutch_amount("695"), Some(695.0));
        assert_eq!(parse_dutch_amount(""), None);
        assert_eq!(parse_dutch_amount("niet beschikbaar"), None);
    }

    #[test]
    fn test_parse_euro_price() {
        assert_eq!(parse_euro_price("€ 524"), Some(524.0));
        assert_eq!(parse_euro_price("€ 1.065"), Some(1065.0));
        assert_eq!(parse_euro_price("€\u{a0}1.065"), Some(1065.0));
        // no euro sign means the cell holds no price
        assert_eq!(parse_euro_price("524"), None);
        assert_eq!(parse_euro_price("-"), None);
    }

    #[test]
    fn test_parse_date_header() {
        assert_eq!(parse_date_header("vr 27 feb"), Some((27, 2)));
        assert_eq!(parse_date_header("ma\n 2 mrt"), Some((2, 3)));
        assert_eq!(parse_date_header("za 31 OKT"), Some((31, 10)));
        assert_eq!(parse_date_header("geen datum"), None);
    }

    #[test]
    fn test_resolve_year_prefers_closest() {
        // "27 feb" seen on 2026-01-05: 2026-02-27 is 53 days away,
        // 2025-02-27 would be 313 days back and is not even a candidate.
        assert_eq!(
            resolve_year(27, 2, d(2026, 1, 5)),
            Some(d(2026, 2, 27))
        );
        // "3 jan" seen late December resolves into the next year.
        assert_eq!(
            resolve_year(3, 1, d(2025, 12, 29)),
            Some(d(2026, 1, 3))
        );
        // Feb 29 only exists in the leap candidate year.
        assert_eq!(
            resolve_year(29, 2, d(2027, 12, 15)),
            Some(d(2028, 2, 29))
        );
    }

    #[test]
    fn test_resolve_date_header() {
        assert_eq!(
            resolve_date_header("vr 27 feb", d(2026, 1, 5)),
            Some(d(2026, 2, 27))
        );
        assert_eq!(resolve_date_header("later", d(2026, 1, 5)), None);
    }

    #[test]
    fn test_parse_dmy() {
        assert_eq!(parse_dmy_dashed("13-02-2026"), Some(d(2026, 2, 13)));
        assert_eq!(parse_dmy_slashed("13/02/2026"), Some(d(2026, 2, 13)));
        assert_eq!(parse_dmy_dashed("2026-02-13"), None);
    }

    #[test]
    fn test_parse_duration_label() {
        assert_eq!(parse_duration_label("2 nachten"), Some(2));
        assert_eq!(parse_duration_label("1 nacht"), Some(1));
        assert_eq!(parse_duration_label("1 week"), Some(7));
        assert_eq!(parse_duration_label("2 weken"), Some(14));
        assert_eq!(parse_duration_label("Aankomst"), None);
    }
}
