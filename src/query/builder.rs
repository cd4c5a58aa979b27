use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::period::DateWindow;
use super::templates::QueryTemplate;
use super::Filters;
use crate::config::ChartConfig;
use crate::error::{Error, Result};

static RE_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^[a-zA-Z0-9_."]+$"#).unwrap());

/// Substrings that mark a statement as unsafe to run.
const DANGEROUS_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "TRUNCATE", "ALTER", "CREATE", "INSERT", "UPDATE", "GRANT", "REVOKE",
    "EXEC", "EXECUTE", "UNION", "--", "/*", "*/", ";",
];

/// Columns compared with `UPPER(TRIM(..))` in the CTO percentual template.
const CASE_INSENSITIVE_COLUMNS: &[&str] = &["shopping", "chave"];

/// A rendered statement plus its named parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub sql: String,
    pub params: Filters,
}

impl QueryTemplate {
    /// Render this template for one date window.
    ///
    /// Config filters are applied first and then overridden or extended by
    /// `user_filters` key by key.
    pub fn build(
        self,
        config: &ChartConfig,
        window: &DateWindow,
        user_filters: Option<&Filters>,
    ) -> Result<Query> {
        let combined = combine_filters(&config.default_filters(), user_filters);
        let invalid = |message: &str| Error::InvalidConfig {
            message: message.to_string(),
            chart_id: config.chart_id.clone(),
            missing_fields: Vec::new(),
        };

        let sql = match self {
            QueryTemplate::Standard => {
                let date_col = config
                    .date_column()
                    .ok_or_else(|| invalid("missing date column"))?;
                let value_col = config
                    .metric_column()
                    .ok_or_else(|| invalid("missing value column"))?;
                let table = config
                    .table
                    .as_deref()
                    .ok_or_else(|| invalid("missing table"))?;
                self.sql()
                    .replace("{coluna_data}", sanitize_identifier(date_col)?)
                    .replace("{coluna_valor}", sanitize_identifier(value_col)?)
                    .replace("{tabela}", sanitize_identifier(table)?)
                    .replace("{filtros_dinamicos}", &build_filters(&combined, None)?)
            }
            QueryTemplate::Instagram => {
                let date_col = config.date_column().unwrap_or("data");
                let value_col = config
                    .metric_column()
                    .ok_or_else(|| invalid("missing value column"))?;
                self.sql()
                    .replace("{coluna_data}", sanitize_identifier(date_col)?)
                    .replace("{coluna_valor}", sanitize_identifier(value_col)?)
                    .replace("{filtros_dinamicos}", &build_filters(&combined, None)?)
            }
            QueryTemplate::CtoPercentual => self
                .sql()
                .replace(
                    "{filtros_cto}",
                    &render_filters(&combined, Some("CTO"), CASE_INSENSITIVE_COLUMNS)?,
                )
                .replace(
                    "{filtros_vb}",
                    &render_filters(&combined, Some("VB"), CASE_INSENSITIVE_COLUMNS)?,
                ),
        };

        let mut params = Filters::new();
        params.insert("data_inicio".into(), Value::String(window.start.clone()));
        params.insert("data_fim".into(), Value::String(window.end.clone()));

        Ok(Query { sql, params })
    }
}

fn combine_filters(defaults: &Filters, user_filters: Option<&Filters>) -> Filters {
    let mut combined = defaults.clone();
    if let Some(user) = user_filters {
        for (k, v) in user {
            combined.insert(k.clone(), v.clone());
        }
    }
    combined
}

/// Render a filter mapping as `AND` clauses, one per usable entry.
///
/// Nulls and blank strings are skipped, as are empty lists and nested
/// objects. When `alias` is set, bare column names are prefixed with it.
pub fn build_filters(filters: &Filters, alias: Option<&str>) -> Result<String> {
    render_filters(filters, alias, &[])
}

fn render_filters(
    filters: &Filters,
    alias: Option<&str>,
    case_insensitive: &[&str],
) -> Result<String> {
    let mut clauses = Vec::new();

    for (column, value) in filters {
        if value.is_null() {
            continue;
        }
        if let Value::String(s) = value {
            if s.trim().is_empty() {
                continue;
            }
        }

        let safe = sanitize_identifier(column)?;
        let qualified = match alias {
            Some(a) if !safe.contains('.') => format!("{a}.{safe}"),
            _ => safe.to_string(),
        };
        let fold = case_insensitive.contains(&column.as_str());
        let lhs = if fold {
            format!("UPPER(TRIM({qualified}))")
        } else {
            qualified
        };

        match value {
            Value::String(s) => {
                let s = if fold { s.trim().to_uppercase() } else { s.clone() };
                clauses.push(format!("AND {lhs} = '{}'", sanitize_string_value(&s)));
            }
            Value::Number(n) => clauses.push(format!("AND {lhs} = {n}")),
            Value::Bool(b) => clauses.push(format!("AND {lhs} = {}", sql_bool(*b))),
            Value::Array(items) if !items.is_empty() => {
                let rendered: Vec<String> = if items.iter().all(Value::is_string) {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(|s| {
                            let s = if fold { s.trim().to_uppercase() } else { s.to_string() };
                            format!("'{}'", sanitize_string_value(&s))
                        })
                        .collect()
                } else {
                    items.iter().map(render_literal).collect()
                };
                clauses.push(format!("AND {lhs} IN ({})", rendered.join(", ")));
            }
            _ => {}
        }
    }

    Ok(clauses.join("\n    "))
}

fn render_literal(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", sanitize_string_value(s)),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => sql_bool(*b).to_string(),
        Value::Null => "NULL".to_string(),
        other => format!("'{}'", sanitize_string_value(&other.to_string())),
    }
}

fn sql_bool(b: bool) -> &'static str {
    if b {
        "TRUE"
    } else {
        "FALSE"
    }
}

/// Accept table and column names made of letters, digits, `_`, `.` and `"`.
pub fn sanitize_identifier(name: &str) -> Result<&str> {
    if RE_IDENTIFIER.is_match(name) {
        Ok(name)
    } else {
        Err(Error::invalid_config(format!(
            "invalid SQL identifier: '{name}'"
        )))
    }
}

pub fn sanitize_string_value(value: &str) -> String {
    value.replace('\'', "''")
}

/// Reject statements containing DDL/DML keywords or comment markers.
pub fn validate_query(sql: &str) -> Result<()> {
    let upper = sql.to_uppercase();
    for keyword in DANGEROUS_KEYWORDS {
        if upper.contains(keyword) {
            return Err(Error::invalid_config(format!(
                "query contains forbidden command: '{keyword}'"
            )));
        }
    }
    Ok(())
}
