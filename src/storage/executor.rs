use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{Number, Value};

use super::pool::ConnectionPool;
use super::{DatabaseExecutor, Row};
use crate::error::{Error, Result};
use crate::query::Filters;

static RE_TABLE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(?:"([^"]+)"|([^."]+))(?:\.(?:"([^"]+)"|([^."]+)))?$"#).unwrap()
});

const CATALOG_SQL: &str =
    "SELECT name AS column_name FROM pragma_table_info(:table_name, :schema) ORDER BY cid";

/// Number of VM instructions between deadline checks.
const PROGRESS_INTERVAL: i32 = 1000;

/// SQLite-backed executor over a bounded [`ConnectionPool`].
pub struct SqliteExecutor {
    pool: ConnectionPool,
    query_timeout: Duration,
}

impl SqliteExecutor {
    pub fn new(pool: ConnectionPool, query_timeout: Duration) -> Self {
        Self {
            pool,
            query_timeout,
        }
    }

    /// Open a pool of `pool_size` connections on the file at `path`, each
    /// with `attachments` attached under their schema names.
    pub async fn open(
        path: impl AsRef<Path>,
        pool_size: usize,
        query_timeout: Duration,
        attachments: &[(String, PathBuf)],
    ) -> Result<Self> {
        let pool = ConnectionPool::open(path, pool_size, attachments).await?;
        Ok(Self::new(pool, query_timeout))
    }

    /// Single-connection in-memory database (for testing).
    pub async fn open_in_memory() -> Result<Self> {
        let pool = ConnectionPool::open_in_memory().await?;
        Ok(Self::new(pool, Duration::from_secs(30)))
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Run several statements without parameters or result rows.
    pub async fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self.pool.acquire().await?;
        let owned = sql.to_string();
        conn.call(move |conn| conn.execute_batch(&owned).map_err(|e| e.to_string()))
            .await
            .map_err(|e| Error::query_execution("batch execution failed", sql, e.to_string()))
    }

    async fn run(&self, sql: &str, values: Vec<SqlValue>) -> Result<Vec<Row>> {
        let conn = self.pool.acquire().await?;

        let interrupted = Arc::new(AtomicBool::new(false));
        let flag = interrupted.clone();
        let timeout = self.query_timeout;
        let owned = sql.to_string();

        let result = conn
            .call(move |conn| {
                if !timeout.is_zero() {
                    let deadline = Instant::now() + timeout;
                    conn.progress_handler(PROGRESS_INTERVAL, Some(move || Instant::now() >= deadline));
                }
                let outcome = query_in_transaction(conn, &owned, &values);
                conn.progress_handler(0, None::<fn() -> bool>);
                outcome.map_err(|e| {
                    if is_interrupt(&e) {
                        flag.store(true, Ordering::SeqCst);
                    }
                    e.to_string()
                })
            })
            .await;

        result.map_err(|e| {
            let message = if interrupted.load(Ordering::SeqCst) {
                format!("statement timeout after {}s", timeout.as_secs_f64())
            } else {
                "query execution failed".to_string()
            };
            log::debug!("{message}: {e}");
            Error::query_execution(message, sql, e.to_string())
        })
    }
}

#[async_trait]
impl DatabaseExecutor for SqliteExecutor {
    async fn execute(&self, sql: &str, params: &Filters) -> Result<Vec<Row>> {
        let (rewritten, names) = rewrite_named_params(sql);
        let values = names
            .iter()
            .map(|name| params.get(name).map(json_to_sql).unwrap_or(SqlValue::Null))
            .collect();
        self.run(&rewritten, values).await
    }

    async fn validate_columns(&self, table: &str, columns: &[String]) -> Result<bool> {
        let (schema, table_name) = parse_table_name(table)?;

        let mut params = Filters::new();
        params.insert("table_name".into(), Value::String(table_name.clone()));
        params.insert("schema".into(), Value::String(schema));
        let rows = self.execute(CATALOG_SQL, &params).await?;

        let existing: Vec<String> = rows
            .iter()
            .filter_map(|r| r.get("column_name").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        let missing: Vec<String> = columns
            .iter()
            .map(|c| c.trim_matches('"').to_string())
            .filter(|c| !existing.contains(c))
            .collect();

        if !missing.is_empty() {
            return Err(Error::InvalidColumn {
                table: table.to_string(),
                columns: missing,
                existing_columns: existing,
            });
        }
        Ok(true)
    }

    async fn test_connection(&self) -> bool {
        match self.execute("SELECT 1 AS test", &Filters::new()).await {
            Ok(rows) => rows.len() == 1 && rows[0].get("test").and_then(Value::as_i64) == Some(1),
            Err(e) => {
                log::debug!("connection test failed: {e}");
                false
            }
        }
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn query_in_transaction(
    conn: &mut rusqlite::Connection,
    sql: &str,
    values: &[SqlValue],
) -> rusqlite::Result<Vec<Row>> {
    // Dropping `tx` on any early return rolls it back.
    let tx = conn.transaction()?;
    let rows = {
        let mut stmt = tx.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query(rusqlite::params_from_iter(values.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Row::new();
            for (i, name) in names.iter().enumerate() {
                record.insert(name.clone(), sql_to_json(row.get_ref(i)?));
            }
            out.push(record);
        }
        out
    };
    tx.commit()?;
    Ok(rows)
}

fn is_interrupt(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::OperationInterrupted
    )
}

/// Rewrite `:name` placeholders to `?N`, numbered by first appearance.
///
/// Quoted literals and identifiers are copied untouched, as is `::`.
pub fn rewrite_named_params(sql: &str) -> (String, Vec<String>) {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut names: Vec<String> = Vec::new();
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                out.push(c);
                i += 1;
            }
            ':' if chars.get(i + 1) == Some(&':') => {
                out.push_str("::");
                i += 2;
            }
            ':' if chars
                .get(i + 1)
                .is_some_and(|n| n.is_ascii_alphabetic() || *n == '_') =>
            {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                let index = match names.iter().position(|n| *n == name) {
                    Some(pos) => pos + 1,
                    None => {
                        names.push(name);
                        names.len()
                    }
                };
                out.push_str(&format!("?{index}"));
                i = end;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    (out, names)
}

/// Split `table`, `schema.table` or `"Schema"."Table"` into (schema, table).
/// The default schema `public` maps to SQLite's `main`.
pub fn parse_table_name(table: &str) -> Result<(String, String)> {
    let caps = RE_TABLE_NAME
        .captures(table.trim())
        .ok_or_else(|| Error::invalid_config(format!("invalid table name: '{table}'")))?;
    let first = caps.get(1).or(caps.get(2)).map(|m| m.as_str().to_string());
    let second = caps.get(3).or(caps.get(4)).map(|m| m.as_str().to_string());

    let (schema, name) = match (first, second) {
        (Some(schema), Some(name)) => (schema, name),
        (Some(name), None) => ("public".to_string(), name),
        _ => return Err(Error::invalid_config(format!("invalid table name: '{table}'"))),
    };
    let schema = if schema == "public" { "main".to_string() } else { schema };
    Ok((schema, name))
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(hex::encode(b)),
    }
}
