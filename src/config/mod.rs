pub mod settings;

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::query::{Filters, QueryTemplate};

static RE_CONFIG_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

/// How a chart's rows are bucketed for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Grouping {
    Weekly,
    Monthly,
}

impl Grouping {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "weekly" | "semanal" => Some(Grouping::Weekly),
            "monthly" | "mensal" => Some(Grouping::Monthly),
            _ => None,
        }
    }
}

impl std::fmt::Display for Grouping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Grouping::Weekly => write!(f, "weekly"),
            Grouping::Monthly => write!(f, "monthly"),
        }
    }
}

/// Declarative description of one chart.
///
/// Fields are deserialized leniently so that [`ConfigLoader::validate`] can
/// report every missing field at once. Portuguese keys from existing config
/// files are accepted as aliases.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChartConfig {
    #[serde(alias = "grafico_id")]
    pub chart_id: Option<String>,
    #[serde(alias = "tabela")]
    pub table: Option<String>,
    #[serde(alias = "colunas")]
    pub columns: Option<Value>,
    #[serde(alias = "filtros")]
    pub filters: Option<Value>,
    #[serde(alias = "agrupamento")]
    pub grouping: Option<String>,
    #[serde(alias = "coluna_data")]
    pub data_column: Option<String>,
    #[serde(alias = "coluna_valor")]
    pub value_column: Option<String>,
    #[serde(default)]
    pub use_instagram_template: bool,
    #[serde(default)]
    pub use_cto_percentual_template: bool,
    #[serde(alias = "titulo")]
    pub title: Option<String>,
    #[serde(alias = "unidade")]
    pub unit: Option<String>,
    pub is_rgm: Option<bool>,
}

impl ChartConfig {
    pub fn id(&self) -> &str {
        self.chart_id.as_deref().unwrap_or("<unknown>")
    }

    pub fn template(&self) -> QueryTemplate {
        QueryTemplate::for_config(self)
    }

    fn column_role(&self, role: &str) -> Option<&str> {
        self.columns
            .as_ref()
            .and_then(|c| c.get(role))
            .and_then(Value::as_str)
    }

    /// The date column: `columns.data`, falling back to `data_column`.
    pub fn date_column(&self) -> Option<&str> {
        self.column_role("data").or(self.data_column.as_deref())
    }

    /// The value column: `columns.valor` / `columns.value`, falling back to `value_column`.
    pub fn metric_column(&self) -> Option<&str> {
        self.column_role("valor")
            .or_else(|| self.column_role("value"))
            .or(self.value_column.as_deref())
    }

    /// Grouping, defaulting to weekly for templated charts.
    pub fn grouping(&self) -> Grouping {
        self.grouping
            .as_deref()
            .and_then(Grouping::parse)
            .unwrap_or(Grouping::Weekly)
    }

    /// Static default filters in document order.
    pub fn default_filters(&self) -> Filters {
        match &self.filters {
            Some(Value::Object(map)) => map.clone(),
            _ => Filters::new(),
        }
    }

    fn invalid(&self, message: String, missing_fields: Vec<String>) -> Error {
        Error::InvalidConfig {
            message,
            chart_id: Some(self.id().to_string()),
            missing_fields,
        }
    }
}

/// Ordered list of charts shown on one page.
#[derive(Debug, Clone, Serialize)]
pub struct PageConfig {
    pub page_id: String,
    pub charts: Vec<String>,
    /// The full document as stored.
    pub raw: Value,
}

/// Loads chart and page documents from `<root>/charts` and `<root>/pages`.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    root: PathBuf,
}

impl ConfigLoader {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(Error::ConfigNotFound {
                id: "<unknown>".into(),
                config_path: Some(root.display().to_string()),
            });
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, dir: &str, id: &str) -> Result<PathBuf> {
        if !RE_CONFIG_ID.is_match(id) {
            return Err(Error::InvalidConfig {
                message: format!("invalid configuration identifier: '{id}'"),
                chart_id: Some(id.to_string()),
                missing_fields: Vec::new(),
            });
        }
        Ok(self.root.join(dir).join(format!("{id}.json")))
    }

    fn read_document(&self, dir: &str, id: &str) -> Result<Value> {
        let path = self.document_path(dir, id)?;
        if !path.is_file() {
            return Err(Error::ConfigNotFound {
                id: id.to_string(),
                config_path: Some(path.display().to_string()),
            });
        }
        let text = std::fs::read_to_string(&path).map_err(|e| Error::InvalidConfig {
            message: format!("failed to read configuration: {e}"),
            chart_id: Some(id.to_string()),
            missing_fields: Vec::new(),
        })?;
        serde_json::from_str(&text).map_err(|e| Error::InvalidConfig {
            message: format!("failed to parse JSON: {e}"),
            chart_id: Some(id.to_string()),
            missing_fields: Vec::new(),
        })
    }

    /// Load a chart configuration by id.
    pub fn load(&self, chart_id: &str) -> Result<ChartConfig> {
        let doc = self.read_document("charts", chart_id)?;
        serde_json::from_value(doc).map_err(|e| Error::InvalidConfig {
            message: format!("failed to parse chart configuration: {e}"),
            chart_id: Some(chart_id.to_string()),
            missing_fields: Vec::new(),
        })
    }

    /// Check the required fields for the config's template shape.
    pub fn validate(&self, config: &ChartConfig) -> Result<()> {
        if config.use_instagram_template && config.use_cto_percentual_template {
            return Err(config.invalid(
                "conflicting template flags: use_instagram_template and use_cto_percentual_template"
                    .into(),
                Vec::new(),
            ));
        }

        match config.template() {
            QueryTemplate::Instagram => {
                let mut missing = Vec::new();
                if config.chart_id.is_none() {
                    missing.push("chart_id".to_string());
                }
                if config.date_column().is_none() {
                    missing.push("data_column".to_string());
                }
                if config.metric_column().is_none() {
                    missing.push("value_column".to_string());
                }
                if !missing.is_empty() {
                    return Err(config.invalid(
                        format!("missing required fields (instagram): {}", missing.join(", ")),
                        missing,
                    ));
                }
                check_filters_mapping(config)
            }
            QueryTemplate::CtoPercentual => {
                if config.chart_id.is_none() {
                    return Err(config.invalid(
                        "missing required fields (cto percentual): chart_id".into(),
                        vec!["chart_id".into()],
                    ));
                }
                check_filters_mapping(config)
            }
            QueryTemplate::Standard => validate_standard(config),
        }
    }

    /// Load a page configuration by id.
    pub fn load_page_config(&self, page_id: &str) -> Result<PageConfig> {
        let doc = self.read_document("pages", page_id)?;
        let invalid = |message: &str| Error::InvalidConfig {
            message: message.to_string(),
            chart_id: Some(page_id.to_string()),
            missing_fields: Vec::new(),
        };

        let id = doc
            .get("page_id")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("page configuration must contain 'page_id' and 'graficos'"))?
            .to_string();
        let charts = match doc.get("graficos") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| invalid("'graficos' entries must be chart ids"))
                })
                .collect::<Result<Vec<_>>>()?,
            Some(_) => return Err(invalid("field 'graficos' must be a list")),
            None => {
                return Err(invalid(
                    "page configuration must contain 'page_id' and 'graficos'",
                ))
            }
        };

        Ok(PageConfig {
            page_id: id,
            charts,
            raw: doc,
        })
    }
}

fn validate_standard(config: &ChartConfig) -> Result<()> {
    let mut missing = Vec::new();
    if config.chart_id.is_none() {
        missing.push("chart_id");
    }
    if config.table.is_none() {
        missing.push("table");
    }
    if config.columns.is_none() {
        missing.push("columns");
    }
    if config.filters.is_none() {
        missing.push("filters");
    }
    if config.grouping.is_none() {
        missing.push("grouping");
    }
    if !missing.is_empty() {
        let missing: Vec<String> = missing.into_iter().map(str::to_string).collect();
        return Err(config.invalid(
            format!("missing required fields: {}", missing.join(", ")),
            missing,
        ));
    }

    if !matches!(config.columns, Some(Value::Object(_))) {
        return Err(config.invalid("field 'columns' must be a mapping".into(), Vec::new()));
    }
    let mut missing_columns = Vec::new();
    if config.column_role("data").is_none() {
        missing_columns.push("data".to_string());
    }
    if config.column_role("valor").is_none() && config.column_role("value").is_none() {
        missing_columns.push("valor".to_string());
    }
    if !missing_columns.is_empty() {
        return Err(config.invalid(
            format!("missing required columns: {}", missing_columns.join(", ")),
            missing_columns,
        ));
    }

    let grouping = config.grouping.as_deref().unwrap_or_default();
    if Grouping::parse(grouping).is_none() {
        return Err(config.invalid(
            format!("invalid grouping: '{grouping}'. Must be 'weekly' or 'monthly'"),
            Vec::new(),
        ));
    }

    check_filters_mapping(config)
}

fn check_filters_mapping(config: &ChartConfig) -> Result<()> {
    match &config.filters {
        None | Some(Value::Object(_)) => Ok(()),
        Some(_) => Err(config.invalid("field 'filters' must be a mapping".into(), Vec::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn loader_with(charts: &[(&str, &str)], pages: &[(&str, &str)]) -> (tempfile::TempDir, ConfigLoader) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("charts")).unwrap();
        std::fs::create_dir_all(dir.path().join("pages")).unwrap();
        for (id, body) in charts {
            std::fs::write(dir.path().join("charts").join(format!("{id}.json")), body).unwrap();
        }
        for (id, body) in pages {
            std::fs::write(dir.path().join("pages").join(format!("{id}.json")), body).unwrap();
        }
        let loader = ConfigLoader::new(dir.path()).unwrap();
        (dir, loader)
    }

    fn config(v: Value) -> ChartConfig {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_new_missing_root() {
        let err = ConfigLoader::new("/definitely/not/here").unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound { .. }));
    }

    #[test]
    fn test_load_portuguese_keys() {
        let (_dir, loader) = loader_with(
            &[(
                "vendas",
                r#"{"grafico_id":"vendas","tabela":"vendas","colunas":{"data":"dt","valor":"total"},"filtros":{},"agrupamento":"semanal","titulo":"Vendas"}"#,
            )],
            &[],
        );
        let cfg = loader.load("vendas").unwrap();
        assert_eq!(cfg.id(), "vendas");
        assert_eq!(cfg.table.as_deref(), Some("vendas"));
        assert_eq!(cfg.date_column(), Some("dt"));
        assert_eq!(cfg.metric_column(), Some("total"));
        assert_eq!(cfg.grouping(), Grouping::Weekly);
        assert_eq!(cfg.title.as_deref(), Some("Vendas"));
        assert_eq!(cfg.template(), QueryTemplate::Standard);
        loader.validate(&cfg).unwrap();
    }

    #[test]
    fn test_load_not_found() {
        let (_dir, loader) = loader_with(&[], &[]);
        match loader.load("nope").unwrap_err() {
            Error::ConfigNotFound { id, config_path } => {
                assert_eq!(id, "nope");
                assert!(config_path.unwrap().ends_with("nope.json"));
            }
            e => panic!("expected ConfigNotFound, got {e:?}"),
        }
    }

    #[test]
    fn test_load_invalid_json() {
        let (_dir, loader) = loader_with(&[("broken", "{not json")], &[]);
        assert!(matches!(
            loader.load("broken").unwrap_err(),
            Error::InvalidConfig { .. }
        ));
    }

    #[test]
    fn test_load_rejects_path_traversal() {
        let (_dir, loader) = loader_with(&[], &[]);
        assert!(matches!(
            loader.load("../secrets").unwrap_err(),
            Error::InvalidConfig { .. }
        ));
    }

    #[test]
    fn test_validate_reports_every_missing_field() {
        let (_dir, loader) = loader_with(&[], &[]);
        let cfg = config(json!({"chart_id": "x"}));
        match loader.validate(&cfg).unwrap_err() {
            Error::InvalidConfig { missing_fields, .. } => {
                assert_eq!(missing_fields, vec!["table", "columns", "filters", "grouping"]);
            }
            e => panic!("unexpected {e:?}"),
        }
    }

    #[test]
    fn test_validate_missing_column_roles() {
        let (_dir, loader) = loader_with(&[], &[]);
        let cfg = config(json!({
            "chart_id": "x", "table": "t", "columns": {}, "filters": {}, "grouping": "weekly"
        }));
        match loader.validate(&cfg).unwrap_err() {
            Error::InvalidConfig { missing_fields, .. } => {
                assert_eq!(missing_fields, vec!["data", "valor"]);
            }
            e => panic!("unexpected {e:?}"),
        }
    }

    #[test]
    fn test_validate_bad_grouping_and_filters() {
        let (_dir, loader) = loader_with(&[], &[]);
        let cfg = config(json!({
            "chart_id": "x", "table": "t", "columns": {"data": "d", "valor": "v"},
            "filters": {}, "grouping": "daily"
        }));
        assert!(loader.validate(&cfg).unwrap_err().to_string().contains("daily"));

        let cfg = config(json!({
            "chart_id": "x", "table": "t", "columns": {"data": "d", "valor": "v"},
            "filters": ["a"], "grouping": "monthly"
        }));
        assert!(loader.validate(&cfg).unwrap_err().to_string().contains("filters"));
    }

    #[test]
    fn test_validate_instagram() {
        let (_dir, loader) = loader_with(&[], &[]);
        let cfg = config(json!({
            "grafico_id": "ig_reach", "coluna_data": "\"postedAt\"", "coluna_valor": "reach",
            "use_instagram_template": true
        }));
        loader.validate(&cfg).unwrap();
        assert_eq!(cfg.template(), QueryTemplate::Instagram);

        let cfg = config(json!({"grafico_id": "ig", "use_instagram_template": true}));
        match loader.validate(&cfg).unwrap_err() {
            Error::InvalidConfig { missing_fields, .. } => {
                assert_eq!(missing_fields, vec!["data_column", "value_column"]);
            }
            e => panic!("unexpected {e:?}"),
        }
    }

    #[test]
    fn test_validate_conflicting_templates() {
        let (_dir, loader) = loader_with(&[], &[]);
        let cfg = config(json!({
            "chart_id": "x", "use_instagram_template": true, "use_cto_percentual_template": true
        }));
        assert!(loader.validate(&cfg).is_err());
    }

    #[test]
    fn test_validate_cto_percentual() {
        let (_dir, loader) = loader_with(&[], &[]);
        let cfg = config(json!({"chart_id": "rgm_cto_pct", "use_cto_percentual_template": true}));
        loader.validate(&cfg).unwrap();
        assert_eq!(cfg.template(), QueryTemplate::CtoPercentual);
    }

    #[test]
    fn test_load_page_config() {
        let (_dir, loader) = loader_with(
            &[],
            &[
                ("ops", r#"{"page_id":"ops","titulo":"Operações","graficos":["a","b"]}"#),
                ("nolist", r#"{"page_id":"nolist","graficos":"a"}"#),
                ("noid", r#"{"graficos":[]}"#),
            ],
        );
        let page = loader.load_page_config("ops").unwrap();
        assert_eq!(page.page_id, "ops");
        assert_eq!(page.charts, vec!["a", "b"]);
        assert_eq!(page.raw["titulo"], "Operações");

        assert!(matches!(
            loader.load_page_config("nolist").unwrap_err(),
            Error::InvalidConfig { .. }
        ));
        assert!(matches!(
            loader.load_page_config("noid").unwrap_err(),
            Error::InvalidConfig { .. }
        ));
        assert!(matches!(
            loader.load_page_config("missing").unwrap_err(),
            Error::ConfigNotFound { .. }
        ));
    }
}
