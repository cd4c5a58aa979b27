use chrono::{Datelike, NaiveDate};

use crate::date_util::{last_day_of_month, parse_reference_date, same_day_prior_year};
use crate::error::Result;

/// An inclusive date window rendered as `YYYY-MM-DD` strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateWindow {
    pub start: String,
    pub end: String,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: start.format("%Y-%m-%d").to_string(),
            end: end.format("%Y-%m-%d").to_string(),
        }
    }

    pub fn as_tuple(&self) -> (&str, &str) {
        (&self.start, &self.end)
    }
}

/// Current-year and prior-year windows for one reference date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Periods {
    pub reference: NaiveDate,
    pub cy: DateWindow,
    pub py: DateWindow,
}

impl Periods {
    /// CY runs Jan 1 through the reference date. PY runs Jan 1 of the prior
    /// year through the same month/day, or that month's last day when the
    /// day does not exist in the prior year.
    pub fn from_reference(reference: NaiveDate) -> Self {
        let year = reference.year();
        let cy_start = NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(reference);
        let py_start = NaiveDate::from_ymd_opt(year - 1, 1, 1).unwrap_or(reference);
        let py_end = same_day_prior_year(reference)
            .unwrap_or_else(|| last_day_of_month(year - 1, reference.month()));

        Self {
            reference,
            cy: DateWindow::new(cy_start, reference),
            py: DateWindow::new(py_start, py_end),
        }
    }

    pub fn parse(reference: &str) -> Result<Self> {
        Ok(Self::from_reference(parse_reference_date(reference)?))
    }

    pub fn year_cy(&self) -> i32 {
        self.reference.year()
    }

    pub fn year_py(&self) -> i32 {
        self.reference.year() - 1
    }
}

/// Single window spanning Jan 1 of the prior year through the reference date.
pub fn calculate_date_range(reference: &str) -> Result<(String, String)> {
    let date = parse_reference_date(reference)?;
    let start = NaiveDate::from_ymd_opt(date.year() - 1, 1, 1).unwrap_or(date);
    let window = DateWindow::new(start, date);
    Ok((window.start, window.end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_periods() {
        let p = Periods::parse("2025-08-20").unwrap();
        assert_eq!(p.cy.as_tuple(), ("2025-01-01", "2025-08-20"));
        assert_eq!(p.py.as_tuple(), ("2024-01-01", "2024-08-20"));
        assert_eq!(p.year_cy(), 2025);
        assert_eq!(p.year_py(), 2024);
    }

    #[test]
    fn test_calculate_periods_leap_day() {
        let p = Periods::parse("2024-02-29").unwrap();
        assert_eq!(p.cy.as_tuple(), ("2024-01-01", "2024-02-29"));
        assert_eq!(p.py.as_tuple(), ("2023-01-01", "2023-02-28"));
    }

    #[test]
    fn test_calculate_periods_year_boundary() {
        let p = Periods::parse("2025-01-01").unwrap();
        assert_eq!(p.cy.as_tuple(), ("2025-01-01", "2025-01-01"));
        assert_eq!(p.py.as_tuple(), ("2024-01-01", "2024-01-01"));
    }

    #[test]
    fn test_calculate_periods_invalid() {
        assert!(Periods::parse("2025-13-01").is_err());
        assert!(Periods::parse("yesterday").is_err());
    }

    #[test]
    fn test_calculate_date_range() {
        assert_eq!(
            calculate_date_range("2025-08-20").unwrap(),
            ("2024-01-01".to_string(), "2025-08-20".to_string())
        );
        assert_eq!(
            calculate_date_range("2024-04-15").unwrap(),
            ("2023-01-01".to_string(), "2024-04-15".to_string())
        );
        assert!(calculate_date_range("15/04/2024").is_err());
    }
}
