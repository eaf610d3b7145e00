//! Absolute and relative date mentions.

use chrono::{Datelike, Duration, NaiveDate, Weekday};

const MONTHS: &str = r"(Jan(?:uary)?|Feb(?:ruary)?|Mar(?:ch)?|Apr(?:il)?|May|June?|July?|Aug(?:ust)?|Sep(?:t(?:ember)?)?|Oct(?:ober)?|Nov(?:ember)?|Dec(?:ember)?)";

static_regex!(iso_re, r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b");
static_regex!(us_numeric_re, r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b");
static_regex!(
    month_day_re,
    &format!(r"\b{MONTHS}\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?(?:,?\s+(\d{{4}}))?\b")
);
static_regex!(
    day_month_re,
    &format!(r"\b(\d{{1,2}})(?:st|nd|rd|th)?\s+(?:of\s+)?{MONTHS}\.?,?\s+(\d{{4}})\b")
);
static_regex!(relative_day_re, r"(?i)\b(today|tonight|tomorrow|yesterday)\b");
static_regex!(
    weekday_re,
    r"(?i)\b(?:(this|next|last)\s+)?(monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b"
);
static_regex!(relative_week_re, r"(?i)\b(next|last)\s+week\b");
static_regex!(in_days_re, r"(?i)\bin\s+(\d{1,3})\s+days?\b");

/// Dates mentioned in `text`, in order of first appearance.
///
/// Absolute forms: `2025-03-14`, `3/14/2025`, `March 14[, 2025]` and
/// `14 March 2025`. Relative forms (`today`, `tomorrow`, `next Friday`,
/// `last week`, `in 3 days`) and year-less month-day forms resolve against
/// `reference` and are ignored without one. Impossible dates are dropped.
pub fn dates_mentioned(text: &str, reference: Option<NaiveDate>) -> Vec<NaiveDate> {
    let mut found: Vec<(usize, NaiveDate)> = Vec::new();

    for cap in iso_re().captures_iter(text) {
        if let Some(date) = ymd(&cap[1], &cap[2], &cap[3]) {
            found.push((cap.get(0).map_or(0, |m| m.start()), date));
        }
    }

    for cap in us_numeric_re().captures_iter(text) {
        if let Some(date) = ymd(&cap[3], &cap[1], &cap[2]) {
            found.push((cap.get(0).map_or(0, |m| m.start()), date));
        }
    }

    for cap in month_day_re().captures_iter(text) {
        let year = match cap.get(3) {
            Some(y) => y.as_str().parse().ok(),
            None => reference.map(|r| r.year()),
        };
        let date = year.and_then(|y| {
            let month = month_number(&cap[1])?;
            NaiveDate::from_ymd_opt(y, month, cap[2].parse().ok()?)
        });
        if let Some(date) = date {
            found.push((cap.get(0).map_or(0, |m| m.start()), date));
        }
    }

    for cap in day_month_re().captures_iter(text) {
        let date = month_number(&cap[2]).and_then(|month| {
            NaiveDate::from_ymd_opt(cap[3].parse().ok()?, month, cap[1].parse().ok()?)
        });
        if let Some(date) = date {
            found.push((cap.get(0).map_or(0, |m| m.start()), date));
        }
    }

    if let Some(reference) = reference {
        relative_dates(text, reference, &mut found);
    }

    found.sort_by_key(|(pos, _)| *pos);
    let mut out: Vec<NaiveDate> = Vec::with_capacity(found.len());
    for (_, date) in found {
        if !out.contains(&date) {
            out.push(date);
        }
    }
    out
}

fn relative_dates(text: &str, reference: NaiveDate, found: &mut Vec<(usize, NaiveDate)>) {
    for cap in relative_day_re().captures_iter(text) {
        let offset = match cap[1].to_ascii_lowercase().as_str() {
            "tomorrow" => 1,
            "yesterday" => -1,
            _ => 0,
        };
        found.push((cap.get(0).map_or(0, |m| m.start()), reference + Duration::days(offset)));
    }

    for cap in weekday_re().captures_iter(text) {
        let Some(target) = weekday(&cap[2]) else {
            continue;
        };
        let current = reference.weekday().num_days_from_monday() as i64;
        let target = target.num_days_from_monday() as i64;
        let ahead = (target - current).rem_euclid(7);
        let behind = (current - target).rem_euclid(7);
        let offset = match cap.get(1).map(|m| m.as_str().to_ascii_lowercase()).as_deref() {
            Some("next") => {
                if ahead == 0 {
                    7
                } else {
                    ahead
                }
            }
            Some("last") => {
                if behind == 0 {
                    -7
                } else {
                    -behind
                }
            }
            _ => ahead,
        };
        found.push((cap.get(0).map_or(0, |m| m.start()), reference + Duration::days(offset)));
    }

    for cap in relative_week_re().captures_iter(text) {
        let offset = if cap[1].eq_ignore_ascii_case("next") { 7 } else { -7 };
        found.push((cap.get(0).map_or(0, |m| m.start()), reference + Duration::days(offset)));
    }

    for cap in in_days_re().captures_iter(text) {
        if let Ok(days) = cap[1].parse::<i64>() {
            found.push((cap.get(0).map_or(0, |m| m.start()), reference + Duration::days(days)));
        }
    }
}

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

fn month_number(name: &str) -> Option<u32> {
    let month = match name.get(..3)? {
        "Jan" => 1,
        "Feb" => 2,
        "Mar" => 3,
        "Apr" => 4,
        "May" => 5,
        "Jun" => 6,
        "Jul" => 7,
        "Aug" => 8,
        "Sep" => 9,
        "Oct" => 10,
        "Nov" => 11,
        "Dec" => 12,
        _ => return None,
    };
    Some(month)
}

fn weekday(name: &str) -> Option<Weekday> {
    name.to_ascii_lowercase().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_absolute_forms() {
        let text = "Due 2024-12-01, moved from 11/15/2024 and then to 3rd January 2025.";
        assert_eq!(
            dates_mentioned(text, None),
            vec![d(2024, 12, 1), d(2024, 11, 15), d(2025, 1, 3)]
        );
    }

    #[test]
    fn test_month_day_uses_reference_year() {
        let text = "Kickoff on Sept 9.";
        assert_eq!(dates_mentioned(text, Some(d(2024, 8, 1))), vec![d(2024, 9, 9)]);
        assert!(dates_mentioned(text, None).is_empty());
    }

    #[test]
    fn test_relative_forms() {
        // 2024-06-05 is a Wednesday.
        let text = "Ship next Monday, we slipped last Friday. Demo Friday, review in 3 days, notes from yesterday.";
        assert_eq!(
            dates_mentioned(text, Some(d(2024, 6, 5))),
            vec![
                d(2024, 6, 10),
                d(2024, 5, 31),
                d(2024, 6, 7),
                d(2024, 6, 8),
                d(2024, 6, 4)
            ]
        );
    }

    #[test]
    fn test_relative_weeks() {
        let text = "Started last week, finishing next week.";
        assert_eq!(
            dates_mentioned(text, Some(d(2024, 6, 5))),
            vec![d(2024, 5, 29), d(2024, 6, 12)]
        );
    }

    #[test]
    fn test_relative_needs_reference() {
        assert!(dates_mentioned("see you tomorrow", None).is_empty());
    }

    #[test]
    fn test_invalid_dates_dropped() {
        assert!(dates_mentioned("on 2024-02-30 or 13/45/2024", None).is_empty());
    }

    #[test]
    fn test_duplicates_keep_first() {
        let text = "Moved to 2024-03-01, i.e. March 1, 2024.";
        assert_eq!(dates_mentioned(text, None), vec![d(2024, 3, 1)]);
    }
}
