use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Value};
use thiserror::Error;

static RE_PASSWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)password=([^&\s]+)").unwrap());
static RE_URL_SECRET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"://([^:/@\s]*):([^@\s]+)@").unwrap());

/// Longest query text kept in error details.
const MAX_QUERY_LEN: usize = 500;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration not found for '{id}'")]
    ConfigNotFound { id: String, config_path: Option<String> },

    #[error("{message}")]
    InvalidConfig {
        message: String,
        chart_id: Option<String>,
        missing_fields: Vec<String>,
    },

    #[error("columns {columns:?} not found in table '{table}'")]
    InvalidColumn {
        table: String,
        columns: Vec<String>,
        existing_columns: Vec<String>,
    },

    #[error("{message}")]
    QueryExecution {
        message: String,
        query: Option<String>,
        db_error: Option<String>,
    },

    #[error("{message}")]
    DataTransformation {
        message: String,
        cy_count: usize,
        py_count: usize,
    },

    #[error("{message}")]
    Cache {
        message: String,
        cache_key: Option<String>,
    },

    #[error("{message}")]
    DatabaseConnection {
        message: String,
        connection_string: Option<String>,
    },

    #[error("{0}")]
    BadRequest(String),

    #[error("unexpected {type_name}: {message}")]
    Unexpected { type_name: String, message: String },
}

impl Error {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Error::InvalidConfig {
            message: message.into(),
            chart_id: None,
            missing_fields: Vec::new(),
        }
    }

    pub fn cache(message: impl Into<String>, cache_key: Option<&str>) -> Self {
        Error::Cache {
            message: message.into(),
            cache_key: cache_key.map(str::to_string),
        }
    }

    pub fn query_execution(message: impl Into<String>, query: &str, db_error: impl Into<String>) -> Self {
        Error::QueryExecution {
            message: message.into(),
            query: Some(truncate_query(query)),
            db_error: Some(db_error.into()),
        }
    }

    /// Wraps an error that has no place in the domain taxonomy, keeping its type name.
    pub fn unexpected<E: std::fmt::Display>(err: E) -> Self {
        Error::Unexpected {
            type_name: std::any::type_name::<E>().to_string(),
            message: err.to_string(),
        }
    }

    /// True for the WBR domain family; false for boundary and unexpected errors.
    pub fn is_domain(&self) -> bool {
        !matches!(self, Error::BadRequest(_) | Error::Unexpected { .. })
    }

    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Stable name reported as `error_type` at the API boundary.
    pub fn error_type(&self) -> &str {
        match self {
            Error::ConfigNotFound { .. } => "ConfigNotFoundException",
            Error::InvalidConfig { .. } => "InvalidConfigException",
            Error::InvalidColumn { .. } => "InvalidColumnException",
            Error::QueryExecution { .. } => "QueryExecutionException",
            Error::DataTransformation { .. } => "DataTransformationException",
            Error::Cache { .. } => "CacheException",
            Error::DatabaseConnection { .. } => "DatabaseConnectionException",
            Error::BadRequest(_) => "BadRequest",
            Error::Unexpected { type_name, .. } => type_name,
        }
    }

    /// Structured diagnostics. Never carries row content.
    pub fn details(&self) -> Value {
        match self {
            Error::ConfigNotFound { id, config_path } => json!({
                "grafico_id": id,
                "config_path": config_path,
            }),
            Error::InvalidConfig {
                chart_id,
                missing_fields,
                ..
            } => json!({
                "grafico_id": chart_id,
                "missing_fields": missing_fields,
            }),
            Error::InvalidColumn {
                table,
                columns,
                existing_columns,
            } => json!({
                "table": table,
                "required_columns": columns,
                "existing_columns": existing_columns,
            }),
            Error::QueryExecution { query, db_error, .. } => json!({
                "query": query,
                "db_error": db_error,
            }),
            Error::DataTransformation {
                cy_count, py_count, ..
            } => json!({
                "data_sample": { "cy_count": cy_count, "py_count": py_count },
            }),
            Error::Cache { cache_key, .. } => json!({ "cache_key": cache_key }),
            Error::DatabaseConnection {
                connection_string, ..
            } => json!({ "connection_string": connection_string }),
            Error::BadRequest(_) => json!({}),
            Error::Unexpected { type_name, .. } => json!({ "type": type_name }),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::unexpected(e)
    }
}

/// Truncate a query for diagnostics, respecting char boundaries.
pub fn truncate_query(query: &str) -> String {
    match query.char_indices().nth(MAX_QUERY_LEN) {
        Some((idx, _)) => format!("{}...", &query[..idx]),
        None => query.to_string(),
    }
}

/// Mask passwords in `key=value` connection strings and URL userinfo.
pub fn mask_secrets(connection_string: &str) -> String {
    let masked = RE_PASSWORD.replace_all(connection_string, "password=***");
    RE_URL_SECRET
        .replace_all(&masked, "://$1:***@")
        .into_owned()
}

pub type Result<T> = std::result::Result<T, Error>;
