pub mod memory;
pub mod null;
pub mod redis_cache;

pub use memory::MemoryCache;
pub use null::NullCache;
pub use redis_cache::RedisCache;

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::query::Filters;

/// Seconds a generated result stays cached.
pub const DEFAULT_TTL: u64 = 3600;

/// Key-value store for generated results.
#[async_trait]
pub trait Cache: Send + Sync {
    /// `Ok(None)` on a miss.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Full overwrite; `ttl` is in seconds.
    async fn set(&self, key: &str, value: &Value, ttl: u64) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    /// Never errors; backend failures read as `false`.
    async fn exists(&self, key: &str) -> bool;
}

/// `wbr:{chart_id}:{reference_date}:{filters_hash}`
pub fn cache_key(chart_id: &str, reference_date: &str, filters: Option<&Filters>) -> String {
    format!("wbr:{chart_id}:{reference_date}:{}", filters_hash(filters))
}

/// First 8 hex chars of SHA-256 over the key-sorted JSON of `filters`.
/// A missing mapping hashes like an empty one.
pub fn filters_hash(filters: Option<&Filters>) -> String {
    let canonical = match filters {
        Some(f) => canonicalize(&Value::Object(f.clone())),
        None => Value::Object(Filters::new()),
    };
    let digest = Sha256::digest(canonical.to_string().as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(8);
    hex
}

/// Rebuild objects with their keys in sorted order, recursively.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filters(v: Value) -> Filters {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_cache_key_format() {
        let key = cache_key("vendas", "2025-01-10", None);
        let parts: Vec<&str> = key.split(':').collect();
        assert_eq!(parts[..3], ["wbr", "vendas", "2025-01-10"]);
        assert_eq!(parts[3].len(), 8);
        assert!(parts[3].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_missing_and_empty_filters_hash_alike() {
        assert_eq!(filters_hash(None), filters_hash(Some(&Filters::new())));
    }

    #[test]
    fn test_hash_ignores_key_order() {
        let a = filters(json!({"shopping": "SCIB", "chave": ["a", "b"]}));
        let b = filters(json!({"chave": ["a", "b"], "shopping": "SCIB"}));
        assert_eq!(filters_hash(Some(&a)), filters_hash(Some(&b)));
    }

    #[test]
    fn test_distinct_filters_distinct_keys() {
        let mut seen = std::collections::HashSet::new();
        seen.insert(cache_key("c", "2025-01-10", None));
        for i in 0..500 {
            let f = filters(json!({"shopping": format!("S{i}")}));
            assert!(seen.insert(cache_key("c", "2025-01-10", Some(&f))));
        }
        let f = filters(json!({"shopping": "S1", "ramo": null}));
        assert!(seen.insert(cache_key("c", "2025-01-10", Some(&f))));
    }
}
