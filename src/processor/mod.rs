pub mod types;

pub use types::*;

use std::collections::BTreeMap;

use chrono::{Datelike, Duration, Local, NaiveDate, Weekday};
use serde_json::Value;

use crate::config::Grouping;
use crate::date_util::{
    first_of_month, is_last_day_of_month, parse_date_str, same_day_prior_year, to_iso8601,
    week_start_sunday,
};
use crate::error::{Error, Result};
use crate::storage::Row;

type Buckets = BTreeMap<String, f64>;

/// Turns `{data, valor}` rows into WBR series.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataProcessor;

impl DataProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Build the full result for one chart.
    ///
    /// Weeks are rolling 7-day buckets ending at `reference_date` when
    /// `use_rolling_week` is set and a reference exists, otherwise
    /// Sunday-start calendar weeks. Months are always calendar months.
    #[allow(clippy::too_many_arguments)]
    pub fn transform_to_wbr(
        &self,
        data_cy: &[Row],
        data_py: &[Row],
        grouping: Grouping,
        year_cy: i32,
        year_py: i32,
        reference_date: Option<NaiveDate>,
        use_rolling_week: bool,
    ) -> Result<WbrResult> {
        log::debug!(
            "transforming {} CY / {} PY rows (grouping: {grouping})",
            data_cy.len(),
            data_py.len()
        );

        self.transform_inner(data_cy, data_py, year_cy, year_py, reference_date, use_rolling_week)
            .map_err(|e| Error::DataTransformation {
                message: format!("failed to transform data: {e}"),
                cy_count: data_cy.len(),
                py_count: data_py.len(),
            })
    }

    fn transform_inner(
        &self,
        data_cy: &[Row],
        data_py: &[Row],
        year_cy: i32,
        year_py: i32,
        reference_date: Option<NaiveDate>,
        use_rolling_week: bool,
    ) -> std::result::Result<WbrResult, String> {
        let (semanas_cy, semanas_py) = match reference_date {
            Some(reference) if use_rolling_week => {
                let reference_py = prior_year_reference(reference)?;
                (
                    self.group_by_rolling_week(data_cy, reference)?,
                    self.group_by_rolling_week(data_py, reference_py)?,
                )
            }
            _ => (self.group_by_week(data_cy)?, self.group_by_week(data_py)?),
        };

        Ok(WbrResult {
            semanas_cy: MetricSeries::from_buckets(semanas_cy),
            semanas_py: MetricSeries::from_buckets(semanas_py),
            meses_cy: MetricSeries::from_buckets(self.group_by_month(data_cy)?),
            meses_py: MetricSeries::from_buckets(self.group_by_month(data_py)?),
            ano_atual: year_cy,
            ano_anterior: year_py,
            flags: self.calculate_partial_flags(),
            titulo: None,
            unidade: None,
            is_rgm: None,
        })
    }

    /// Sum values per Sunday-start week, keyed by the week's first day.
    pub fn group_by_week(&self, rows: &[Row]) -> std::result::Result<Buckets, String> {
        let mut buckets = Buckets::new();
        for row in rows {
            let (date, value) = read_row(row)?;
            *buckets.entry(to_iso8601(week_start_sunday(date))).or_default() += value;
        }
        Ok(buckets)
    }

    /// Sum values per 7-day bucket counted back from `reference`, keyed by
    /// each bucket's last day. Rows after `reference` are dropped.
    pub fn group_by_rolling_week(
        &self,
        rows: &[Row],
        reference: NaiveDate,
    ) -> std::result::Result<Buckets, String> {
        let mut buckets = Buckets::new();
        for row in rows {
            let (date, value) = read_row(row)?;
            let days_before = (reference - date).num_days();
            if days_before < 0 {
                continue;
            }
            let week_end = reference - Duration::days((days_before / 7) * 7);
            *buckets.entry(to_iso8601(week_end)).or_default() += value;
        }
        Ok(buckets)
    }

    /// Sum values per calendar month, keyed by the month's first day.
    pub fn group_by_month(&self, rows: &[Row]) -> std::result::Result<Buckets, String> {
        let mut buckets = Buckets::new();
        for row in rows {
            let (date, value) = read_row(row)?;
            *buckets.entry(to_iso8601(first_of_month(date))).or_default() += value;
        }
        Ok(buckets)
    }

    /// Partial-period flags as of the wall-clock date.
    pub fn calculate_partial_flags(&self) -> PartialFlags {
        self.partial_flags_on(Local::now().date_naive())
    }

    pub fn partial_flags_on(&self, today: NaiveDate) -> PartialFlags {
        PartialFlags {
            semana_parcial: today.weekday() != Weekday::Sat,
            mes_parcial_cy: !is_last_day_of_month(today),
            mes_parcial_py: same_day_prior_year(today)
                .map(|d| !is_last_day_of_month(d))
                .unwrap_or(true),
        }
    }
}

/// Same day one year back; Feb 29 becomes Feb 28.
fn prior_year_reference(reference: NaiveDate) -> std::result::Result<NaiveDate, String> {
    same_day_prior_year(reference)
        .or_else(|| NaiveDate::from_ymd_opt(reference.year() - 1, reference.month(), 28))
        .ok_or_else(|| format!("no prior-year date for {reference}"))
}

fn read_row(row: &Row) -> std::result::Result<(NaiveDate, f64), String> {
    let date = match row.get("data") {
        Some(Value::String(s)) => {
            parse_date_str(s).map_err(|_| "unrecognized date format".to_string())?
        }
        Some(other) => return Err(format!("unsupported date value: {}", type_name(other))),
        None => return Err("row has no 'data' field".into()),
    };
    let value = match row.get("valor") {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| "numeric value out of range".to_string())?,
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| "non-numeric value".to_string())?,
        Some(other) => return Err(format!("unsupported value: {}", type_name(other))),
        None => return Err("row has no 'valor' field".into()),
    };
    Ok((date, value))
}

/// Describes a value's kind without echoing its content.
fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn row(data: &str, valor: Value) -> Row {
        let mut r = Row::new();
        r.insert("data".into(), json!(data));
        r.insert("valor".into(), valor);
        r
    }

    #[test]
    fn test_group_by_week_sunday_start() {
        let p = DataProcessor::new();
        let rows = vec![
            row("2025-01-05", json!(10)),
            row("2025-01-08", json!(5.5)),
            row("2025-01-12", json!("2")),
        ];
        let w = p.group_by_week(&rows).unwrap();
        assert_eq!(w["2025-01-05T00:00:00.000Z"], 15.5);
        assert_eq!(w["2025-01-12T00:00:00.000Z"], 2.0);
        assert_eq!(w.len(), 2);
    }

    #[test]
    fn test_rolling_week_buckets() {
        let p = DataProcessor::new();
        let r = ymd(2025, 1, 10);
        let rows = vec![
            row("2025-01-10", json!(1)),
            row("2025-01-04", json!(2)),
            row("2025-01-03", json!(4)),
            row("2025-01-11", json!(100)),
        ];
        let w = p.group_by_rolling_week(&rows, r).unwrap();
        assert_eq!(w["2025-01-10T00:00:00.000Z"], 3.0);
        assert_eq!(w["2025-01-03T00:00:00.000Z"], 4.0);
        assert_eq!(w.len(), 2);
        assert!(w.values().all(|v| *v < 100.0));
    }

    #[test]
    fn test_group_by_month() {
        let p = DataProcessor::new();
        let rows = vec![
            row("2025-01-31", json!(1)),
            row("2025/01/02", json!(1)),
            row("01/02/2025", json!(3)),
        ];
        let m = p.group_by_month(&rows).unwrap();
        assert_eq!(m["2025-01-01T00:00:00.000Z"], 2.0);
        assert_eq!(m["2025-02-01T00:00:00.000Z"], 3.0);
    }

    #[test]
    fn test_partial_flags_on() {
        let p = DataProcessor::new();
        // 2025-05-31 is a Saturday and the last day of May
        let f = p.partial_flags_on(ymd(2025, 5, 31));
        assert!(!f.semana_parcial);
        assert!(!f.mes_parcial_cy);
        assert!(!f.mes_parcial_py);

        let f = p.partial_flags_on(ymd(2025, 5, 14));
        assert!(f.semana_parcial);
        assert!(f.mes_parcial_cy);
        assert!(f.mes_parcial_py);

        // 2024-02-29 has no prior-year counterpart
        let f = p.partial_flags_on(ymd(2024, 2, 29));
        assert!(!f.mes_parcial_cy);
        assert!(f.mes_parcial_py);

        // 2025-02-28 ends February; 2024-02-28 does not
        let f = p.partial_flags_on(ymd(2025, 2, 28));
        assert!(!f.mes_parcial_cy);
        assert!(f.mes_parcial_py);
    }

    #[test]
    fn test_transform_end_to_end() {
        let p = DataProcessor::new();
        let cy = vec![row("2025-01-05", json!(100))];
        let result = p
            .transform_to_wbr(&cy, &[], Grouping::Weekly, 2025, 2024, Some(ymd(2025, 1, 10)), true)
            .unwrap();
        assert_eq!(result.semanas_cy.metric_value.len(), 1);
        assert_eq!(
            result.semanas_cy.metric_value["2025-01-10T00:00:00.000Z"],
            100.0
        );
        assert_eq!(result.semanas_cy.index, vec!["2025-01-10T00:00:00.000Z"]);
        assert_eq!(
            result.meses_cy.metric_value["2025-01-01T00:00:00.000Z"],
            100.0
        );
        assert!(result.semanas_py.is_empty());
        assert_eq!(result.ano_atual, 2025);
        assert_eq!(result.ano_anterior, 2024);
    }

    #[test]
    fn test_transform_leap_day_reference() {
        let p = DataProcessor::new();
        let py = vec![row("2023-02-28", json!(7)), row("2023-02-21", json!(1))];
        let result = p
            .transform_to_wbr(&[], &py, Grouping::Weekly, 2024, 2023, Some(ymd(2024, 2, 29)), true)
            .unwrap();
        assert_eq!(
            result.semanas_py.index,
            vec!["2023-02-21T00:00:00.000Z", "2023-02-28T00:00:00.000Z"]
        );
    }

    #[test]
    fn test_transform_calendar_weeks_without_reference() {
        let p = DataProcessor::new();
        let cy = vec![row("2025-01-08", json!(1))];
        let result = p
            .transform_to_wbr(&cy, &[], Grouping::Monthly, 2025, 2024, None, true)
            .unwrap();
        assert_eq!(result.semanas_cy.index, vec!["2025-01-05T00:00:00.000Z"]);
    }

    #[test]
    fn test_index_is_sorted_key_set() {
        let p = DataProcessor::new();
        let cy = vec![
            row("2025-03-01", json!(1)),
            row("2025-01-01", json!(1)),
            row("2025-02-01", json!(1)),
        ];
        let result = p
            .transform_to_wbr(&cy, &[], Grouping::Weekly, 2025, 2024, Some(ymd(2025, 3, 1)), true)
            .unwrap();
        for series in [&result.semanas_cy, &result.meses_cy] {
            let keys: Vec<String> = series.metric_value.keys().cloned().collect();
            assert_eq!(keys, series.index);
            let mut sorted = series.index.clone();
            sorted.sort();
            assert_eq!(sorted, series.index);
        }
    }

    #[test]
    fn test_transform_error_carries_counts_only() {
        let p = DataProcessor::new();
        let cy = vec![row("not a date", json!(1)), row("2025-01-01", json!(1))];
        let py = vec![row("2024-01-01", json!("secret-ish"))];
        match p
            .transform_to_wbr(&cy, &py, Grouping::Weekly, 2025, 2024, None, false)
            .unwrap_err()
        {
            Error::DataTransformation {
                cy_count, py_count, ..
            } => {
                assert_eq!(cy_count, 2);
                assert_eq!(py_count, 1);
            }
            e => panic!("unexpected {e:?}"),
        }

        let bad_value = vec![row("2025-01-01", json!("secret-ish"))];
        let err = p
            .transform_to_wbr(&bad_value, &[], Grouping::Weekly, 2025, 2024, None, false)
            .unwrap_err();
        assert!(!err.to_string().contains("secret-ish"));
    }

    #[test]
    fn test_serialized_shape() {
        let p = DataProcessor::new();
        let result = p
            .transform_to_wbr(&[], &[], Grouping::Weekly, 2025, 2024, None, true)
            .unwrap();
        let v = serde_json::to_value(&result).unwrap();
        assert!(v.get("semana_parcial").is_some());
        assert!(v.get("mes_parcial_py").is_some());
        assert!(v.get("flags").is_none());
        assert!(v.get("titulo").is_none());
        assert_eq!(v["semanas_cy"]["index"], json!([]));
    }
}
