pub mod executor;
pub mod pool;

pub use executor::SqliteExecutor;
pub use pool::ConnectionPool;

use async_trait::async_trait;

use crate::error::Result;
use crate::query::Filters;

/// One result row: column name -> JSON value, in select-list order.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// The narrow interface the service needs from a SQL store.
#[async_trait]
pub trait DatabaseExecutor: Send + Sync {
    /// Run a statement with `:name` parameters and collect every row.
    async fn execute(&self, sql: &str, params: &Filters) -> Result<Vec<Row>>;

    /// Ok(true) when every column exists in `table`; `InvalidColumn` otherwise.
    async fn validate_columns(&self, table: &str, columns: &[String]) -> Result<bool>;

    /// Never errors; failures read as `false`.
    async fn test_connection(&self) -> bool;

    async fn close(&self);
}
