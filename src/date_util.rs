use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};

use crate::error::{Error, Result};

/// Date-only formats accepted in row data, tried in order.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y"];

/// Datetime formats accepted in row data, tried after the date-only ones.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Get the last day of a given month.
pub fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .unwrap_or(NaiveDate::MAX)
}

pub fn is_last_day_of_month(d: NaiveDate) -> bool {
    d == last_day_of_month(d.year(), d.month())
}

/// Same month/day one year earlier, or `None` when that day does not exist (Feb 29).
pub fn same_day_prior_year(d: NaiveDate) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(d.year() - 1, d.month(), d.day())
}

/// Strict `YYYY-MM-DD` parsing for reference dates.
pub fn parse_reference_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| {
        Error::invalid_config(format!(
            "invalid reference date: '{s}'. Use format YYYY-MM-DD"
        ))
    })
}

/// Parse a date-like string from a data row. The first matching format wins.
pub fn parse_date_str(s: &str) -> std::result::Result<NaiveDate, String> {
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }
    Err(format!("unrecognized date format: {s}"))
}

/// `YYYY-MM-DDT00:00:00.000Z`
pub fn to_iso8601(d: NaiveDate) -> String {
    format!("{}T00:00:00.000Z", d.format("%Y-%m-%d"))
}

/// Sunday on or before `d`.
pub fn week_start_sunday(d: NaiveDate) -> NaiveDate {
    let days_since_sunday = (d.weekday().num_days_from_monday() + 1) % 7;
    d - Duration::days(days_since_sunday as i64)
}

pub fn first_of_month(d: NaiveDate) -> NaiveDate {
    d.with_day(1).unwrap_or(d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_last_day_of_month() {
        assert_eq!(last_day_of_month(2025, 1), ymd(2025, 1, 31));
        assert_eq!(last_day_of_month(2025, 2), ymd(2025, 2, 28));
        assert_eq!(last_day_of_month(2024, 2), ymd(2024, 2, 29)); // Leap year
        assert_eq!(last_day_of_month(2025, 12), ymd(2025, 12, 31));
    }

    #[test]
    fn test_same_day_prior_year() {
        assert_eq!(same_day_prior_year(ymd(2025, 8, 20)), Some(ymd(2024, 8, 20)));
        assert_eq!(same_day_prior_year(ymd(2024, 2, 29)), None);
    }

    #[test]
    fn test_parse_date_str_formats() {
        assert_eq!(parse_date_str("2025-01-05").unwrap(), ymd(2025, 1, 5));
        assert_eq!(parse_date_str("2025/01/05").unwrap(), ymd(2025, 1, 5));
        assert_eq!(parse_date_str("05/01/2025").unwrap(), ymd(2025, 1, 5));
        assert_eq!(parse_date_str("2025-01-05 13:45:00").unwrap(), ymd(2025, 1, 5));
        assert_eq!(parse_date_str("2025-01-05T13:45:00").unwrap(), ymd(2025, 1, 5));
        assert_eq!(
            parse_date_str("2025-01-05T13:45:00.123456").unwrap(),
            ymd(2025, 1, 5)
        );
    }

    #[test]
    fn test_parse_date_str_rejects_garbage() {
        let err = parse_date_str("Jan 5th").unwrap_err();
        assert!(err.contains("Jan 5th"));
    }

    #[test]
    fn test_parse_reference_date() {
        assert_eq!(parse_reference_date("2025-08-20").unwrap(), ymd(2025, 8, 20));
        assert!(parse_reference_date("20/08/2025").is_err());
        assert!(parse_reference_date("2025-02-30").is_err());
    }

    #[test]
    fn test_to_iso8601() {
        assert_eq!(to_iso8601(ymd(2025, 1, 5)), "2025-01-05T00:00:00.000Z");
    }

    #[test]
    fn test_week_start_sunday() {
        // 2025-01-05 is a Sunday
        assert_eq!(week_start_sunday(ymd(2025, 1, 5)), ymd(2025, 1, 5));
        assert_eq!(week_start_sunday(ymd(2025, 1, 8)), ymd(2025, 1, 5));
        assert_eq!(week_start_sunday(ymd(2025, 1, 11)), ymd(2025, 1, 5));
        assert_eq!(week_start_sunday(ymd(2025, 1, 5)).weekday(), Weekday::Sun);
    }

    #[test]
    fn test_is_last_day_of_month() {
        assert!(is_last_day_of_month(ymd(2024, 2, 29)));
        assert!(!is_last_day_of_month(ymd(2025, 2, 27)));
    }
}
