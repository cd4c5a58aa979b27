use async_trait::async_trait;
use serde_json::Value;

use super::Cache;
use crate::error::Result;

/// Caching disabled: writes are discarded and every read misses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCache;

#[async_trait]
impl Cache for NullCache {
    async fn get(&self, _key: &str) -> Result<Option<Value>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &Value, _ttl: u64) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        Ok(())
    }

    async fn exists(&self, _key: &str) -> bool {
        false
    }
}
