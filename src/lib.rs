pub mod cache;
pub mod config;
pub mod date_util;
pub mod error;
pub mod factory;
pub mod http;
pub mod logger;
pub mod options;
pub mod processor;
pub mod query;
pub mod storage;

pub use cache::{Cache, MemoryCache, NullCache, RedisCache};
pub use config::settings::Settings;
pub use config::{ChartConfig, ConfigLoader, Grouping, PageConfig};
pub use error::{Error, Result};
pub use logger::{Logger, NullLogger, StructuredLogger};
pub use options::{ChartFilters, FilterRequest};
pub use processor::{DataProcessor, MetricSeries, PartialFlags, WbrResult};
pub use query::{Filters, Periods, QueryTemplate};
pub use storage::{DatabaseExecutor, Row, SqliteExecutor};

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Map, Value};

use crate::date_util::parse_reference_date;

/// Main entry point: generates WBR results for charts and pages.
pub struct WbrService {
    config_loader: ConfigLoader,
    executor: Arc<dyn DatabaseExecutor>,
    processor: DataProcessor,
    cache: Arc<dyn Cache>,
    logger: Arc<dyn Logger>,
    cache_ttl: u64,
}

impl WbrService {
    pub fn new(
        config_loader: ConfigLoader,
        executor: Arc<dyn DatabaseExecutor>,
        cache: Arc<dyn Cache>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            config_loader,
            executor,
            processor: DataProcessor::new(),
            cache,
            logger,
            cache_ttl: cache::DEFAULT_TTL,
        }
    }

    pub fn with_cache_ttl(mut self, ttl: u64) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Access the executor (for filter discovery and health checks).
    pub fn executor(&self) -> &dyn DatabaseExecutor {
        self.executor.as_ref()
    }

    pub fn cache(&self) -> &dyn Cache {
        self.cache.as_ref()
    }

    pub fn config_loader(&self) -> &ConfigLoader {
        &self.config_loader
    }

    /// CY and PY windows for a `YYYY-MM-DD` reference date.
    pub fn calculate_periods(reference_date: &str) -> Result<Periods> {
        Periods::parse(reference_date)
    }

    /// Generate the result for one chart.
    ///
    /// `reference_date` defaults to today. A cached result for the same
    /// chart, date and filters is returned without touching the database.
    pub async fn generate(
        &self,
        chart_id: &str,
        user_filters: Option<&Filters>,
        reference_date: Option<&str>,
    ) -> Result<WbrResult> {
        match self.generate_inner(chart_id, user_filters, reference_date).await {
            Ok(result) => Ok(result),
            Err(e) if e.is_domain() => {
                self.logger.error(
                    &format!("WBR generation failed: {e}"),
                    Some(&crate::fields!(
                        "chart_id" => chart_id,
                        "error_type" => e.error_type(),
                        "details" => e.details(),
                    )),
                );
                Err(e)
            }
            Err(e) => {
                self.logger.critical(
                    &format!("unexpected error generating WBR: {e}"),
                    Some(&crate::fields!("chart_id" => chart_id, "error_type" => e.error_type())),
                );
                Err(e)
            }
        }
    }

    async fn generate_inner(
        &self,
        chart_id: &str,
        user_filters: Option<&Filters>,
        reference_date: Option<&str>,
    ) -> Result<WbrResult> {
        let started = Instant::now();
        let reference = match reference_date {
            Some(s) => parse_reference_date(s)?,
            None => chrono::Local::now().date_naive(),
        };
        let reference_iso = reference.format("%Y-%m-%d").to_string();

        let key = cache::cache_key(chart_id, &reference_iso, user_filters);
        if let Some(cached) = self.cache.get(&key).await? {
            match serde_json::from_value::<WbrResult>(cached) {
                Ok(result) => {
                    self.logger
                        .info("cache hit", Some(&crate::fields!("chart_id" => chart_id, "cache_key" => &key)));
                    return Ok(result);
                }
                Err(e) => self.logger.warning(
                    &format!("discarding unreadable cache entry: {e}"),
                    Some(&crate::fields!("cache_key" => &key)),
                ),
            }
        }

        self.logger.info(
            "generating WBR",
            Some(&crate::fields!("chart_id" => chart_id, "reference_date" => &reference_iso)),
        );

        let config = self.config_loader.load(chart_id)?;
        self.config_loader.validate(&config)?;
        let template = config.template();

        if !template.skips_column_validation() {
            if let (Some(table), Some(date_col), Some(value_col)) =
                (config.table.as_deref(), config.date_column(), config.metric_column())
            {
                self.executor
                    .validate_columns(table, &[date_col.to_string(), value_col.to_string()])
                    .await?;
            }
        }

        let periods = Periods::from_reference(reference);
        let query_cy = template.build(&config, &periods.cy, user_filters)?;
        let query_py = template.build(&config, &periods.py, user_filters)?;
        self.logger.debug(
            "queries built",
            Some(&crate::fields!(
                "template" => template.name(),
                "cy" => [&periods.cy.start, &periods.cy.end],
                "py" => [&periods.py.start, &periods.py.end],
            )),
        );

        let data_cy = self.executor.execute(&query_cy.sql, &query_cy.params).await?;
        let data_py = self.executor.execute(&query_py.sql, &query_py.params).await?;
        self.logger.debug(
            "queries executed",
            Some(&crate::fields!("cy_rows" => data_cy.len(), "py_rows" => data_py.len())),
        );

        let mut result = self.processor.transform_to_wbr(
            &data_cy,
            &data_py,
            config.grouping(),
            periods.year_cy(),
            periods.year_py(),
            Some(reference),
            true,
        )?;
        result.titulo = config.title.clone();
        result.unidade = config.unit.clone();
        result.is_rgm = config.is_rgm;

        self.cache
            .set(&key, &serde_json::to_value(&result)?, self.cache_ttl)
            .await?;

        self.logger.info(
            "WBR generated",
            Some(&crate::fields!(
                "chart_id" => chart_id,
                "duration_ms" => started.elapsed().as_millis() as u64,
                "cy_rows" => data_cy.len(),
                "py_rows" => data_py.len(),
                "cache_key" => &key,
            )),
        );

        Ok(result)
    }

    /// Raw page document as stored.
    pub fn page_config(&self, page_id: &str) -> Result<Value> {
        Ok(self.config_loader.load_page_config(page_id)?.raw)
    }

    /// Generate every chart of a page, one after another in page order.
    ///
    /// A chart that fails is reported in place as
    /// `{error, details, status: "failed", error_type}`; later charts still run.
    pub async fn generate_page(
        &self,
        page_id: &str,
        filters: &ChartFilters,
        reference_date: Option<&str>,
    ) -> Result<Map<String, Value>> {
        let page = self.config_loader.load_page_config(page_id)?;
        if page.charts.is_empty() {
            return Err(Error::BadRequest(format!(
                "page '{page_id}' has no charts configured"
            )));
        }

        let mut response = Map::new();
        for chart_id in &page.charts {
            let chart_filters = filters.for_chart(chart_id);
            let entry = match self
                .generate(chart_id, chart_filters.as_ref(), reference_date)
                .await
                .and_then(|r| serde_json::to_value(r).map_err(Error::from))
            {
                Ok(v) => v,
                Err(e) => json!({
                    "error": e.message(),
                    "details": e.details(),
                    "status": "failed",
                    "error_type": e.error_type(),
                }),
            };
            response.insert(chart_id.clone(), entry);
        }
        Ok(response)
    }
}
