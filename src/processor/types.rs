use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One time series: ISO timestamp -> value, plus the sorted key list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    pub metric_value: BTreeMap<String, f64>,
    pub index: Vec<String>,
}

impl MetricSeries {
    /// Keys are fixed-width ISO strings, so lexical order is chronological.
    pub fn from_buckets(buckets: BTreeMap<String, f64>) -> Self {
        let index = buckets.keys().cloned().collect();
        Self {
            metric_value: buckets,
            index,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// Whether the current week and month have fully elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialFlags {
    pub semana_parcial: bool,
    pub mes_parcial_cy: bool,
    pub mes_parcial_py: bool,
}

/// Year-over-year weekly and monthly series for one chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WbrResult {
    pub semanas_cy: MetricSeries,
    pub semanas_py: MetricSeries,
    pub meses_cy: MetricSeries,
    pub meses_py: MetricSeries,
    pub ano_atual: i32,
    pub ano_anterior: i32,
    #[serde(flatten)]
    pub flags: PartialFlags,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub titulo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub unidade: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub is_rgm: Option<bool>,
}
