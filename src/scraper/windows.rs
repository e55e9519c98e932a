//! Date-window generation: which (check-in, check-out) pairs to query.
//!
//! Pure date arithmetic, no I/O. `today` is passed in so generation is
//! deterministic under test.

use chrono::{Datelike, Duration, NaiveDate, Weekday};

use crate::models::DateWindow;

/// A named stay shape: anchor weekday plus night count.
#[derive(Debug, Clone)]
pub struct StayTemplate {
    pub name: &'static str,
    pub check_in_day: Weekday,
    pub nights: u32,
}

/// The stay shapes tracked by default: a weekend, a midweek stay, a week.
/// Built fresh per call; callers may substitute their own set.
pub fn default_stay_templates() -> Vec<StayTemplate> {
    vec![
        StayTemplate {
            name: "weekend",
            check_in_day: Weekday::Fri,
            nights: 2,
        },
        StayTemplate {
            name: "midweek",
            check_in_day: Weekday::Mon,
            nights: 4,
        },
        StayTemplate {
            name: "week",
            check_in_day: Weekday::Fri,
            nights: 7,
        },
    ]
}

/// For every days-ahead offset, the next occurrence of each template's anchor
/// weekday on/after `today + offset`, paired with `check_in + nights`.
/// Deduplicated by (check_in, check_out) and sorted by check-in.
pub fn generate_windows(
    today: NaiveDate,
    days_ahead: &[i64],
    templates: &[StayTemplate],
) -> Vec<DateWindow> {
    let mut windows = Vec::new();

    for &offset in days_ahead {
        let target = today + Duration::days(offset);
        for template in templates {
            let days_until = (template.check_in_day.num_days_from_monday() as i64
                - target.weekday().num_days_from_monday() as i64)
                .rem_euclid(7);
            let check_in = target + Duration::days(days_until);
            let check_out = check_in + Duration::days(template.nights as i64);

            windows.push(DateWindow {
                check_in,
                check_out,
                stay_type: template.name.to_string(),
                nights: template.nights,
            });
        }
    }

    windows.sort_by_key(|w| (w.check_in, w.check_out));
    windows.dedup_by_key(|w| (w.check_in, w.check_out));
    windows
}

/// Consecutive (year, month) pairs starting at `start`'s month. Used by the
/// adapters that query availability month by month.
pub fn months_from(start: NaiveDate, count: u32) -> Vec<(i32, u32)> {
    let mut months = Vec::with_capacity(count as usize);
    let (mut year, mut month) = (start.year(), start.month());
    for _ in 0..count {
        months.push((year, month));
        month += 1;
        if month > 12 {
            month = 1;
            year += 1;
        }
    }
    months
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_anchor_weekday_is_respected() {
        // 2026-02-02 is a Monday.
        let windows = generate_windows(d(2026, 2, 2), &[7], &default_stay_templates());
        for w in &windows {
            match w.stay_type.as_str() {
                "weekend" | "week" => assert_eq!(w.check_in.weekday(), Weekday::Fri),
                "midweek" => assert_eq!(w.check_in.weekday(), Weekday::Mon),
                other => panic!("unexpected stay type {other}"),
            }
            assert!(w.check_in >= d(2026, 2, 9));
        }
    }

    #[test]
    fn test_nights_match_date_arithmetic() {
        let windows = generate_windows(
            d(2026, 2, 2),
            &[7, 14, 21, 30, 45, 60, 90],
            &default_stay_templates(),
        );
        assert!(!windows.is_empty());
        for w in &windows {
            assert_eq!((w.check_out - w.check_in).num_days(), w.nights as i64);
        }
    }

    #[test]
    fn test_windows_are_unique_and_sorted() {
        // Close offsets land on the same anchor days and must collapse.
        let windows = generate_windows(
            d(2026, 2, 2),
            &[7, 8, 9, 14, 21],
            &default_stay_templates(),
        );
        let mut keys: Vec<_> = windows.iter().map(|w| (w.check_in, w.check_out)).collect();
        let as_generated = keys.clone();
        keys.sort();
        keys.dedup();
        assert_eq!(keys, as_generated, "windows must come out sorted and deduplicated");
    }

    #[test]
    fn test_months_from_wraps_the_year() {
        assert_eq!(
            months_from(d(2025, 11, 20), 4),
            vec![(2025, 11), (2025, 12), (2026, 1), (2026, 2)]
        );
    }

    #[test]
    fn test_same_day_anchor_not_pushed_a_week() {
        // Offset lands exactly on a Friday: the weekend window starts there.
        // 2026-02-06 is a Friday.
        let windows = generate_windows(d(2026, 1, 30), &[7], &default_stay_templates());
        let weekend = windows.iter().find(|w| w.stay_type == "weekend").unwrap();
        assert_eq!(weekend.check_in, d(2026, 2, 6));
        assert_eq!(weekend.check_out, d(2026, 2, 8));
    }
}
