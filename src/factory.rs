use std::sync::Arc;

use crate::cache::{Cache, MemoryCache, NullCache, RedisCache};
use crate::config::settings::Settings;
use crate::config::ConfigLoader;
use crate::error::Result;
use crate::fields;
use crate::logger::{Logger, StructuredLogger};
use crate::storage::{DatabaseExecutor, SqliteExecutor};
use crate::WbrService;

/// Everything a [`WbrService`] is assembled from, built once per process.
pub struct Components {
    pub settings: Settings,
    pub config_loader: ConfigLoader,
    pub executor: Arc<dyn DatabaseExecutor>,
    pub cache: Arc<dyn Cache>,
    pub logger: Arc<dyn Logger>,
}

impl Components {
    pub fn into_service(self) -> WbrService {
        WbrService::new(self.config_loader, self.executor, self.cache, self.logger)
            .with_cache_ttl(self.settings.cache_ttl)
    }
}

pub fn create_logger(settings: &Settings) -> Arc<dyn Logger> {
    Arc::new(StructuredLogger::new(settings.log_level(), settings.log_format()))
}

/// Pick the cache backend.
///
/// Disabled caching yields [`NullCache`]. A Redis URL that cannot be reached
/// falls back to [`MemoryCache`] with a warning instead of failing startup.
pub async fn create_cache(settings: &Settings, logger: &dyn Logger) -> Arc<dyn Cache> {
    if !settings.cache_enabled {
        logger.info("cache disabled", None);
        return Arc::new(NullCache);
    }
    if let Some(url) = settings.redis_url.as_deref().filter(|u| !u.trim().is_empty()) {
        match RedisCache::connect(url).await {
            Ok(cache) => {
                logger.info("using redis cache", None);
                return Arc::new(cache);
            }
            Err(e) => logger.warning(
                "redis unavailable, falling back to in-memory cache",
                Some(&fields!("error" => e.message())),
            ),
        }
    }
    Arc::new(MemoryCache::new())
}

pub async fn create_executor(settings: &Settings) -> Result<Arc<dyn DatabaseExecutor>> {
    let path = settings.database_path()?;
    let executor = SqliteExecutor::open(
        &path,
        settings.db_pool_size,
        settings.query_timeout(),
        &settings.attachments()?,
    )
    .await?;
    Ok(Arc::new(executor))
}

pub async fn build_components(settings: &Settings) -> Result<Components> {
    let logger = create_logger(settings);
    let config_loader = ConfigLoader::new(&settings.config_dir)?;
    let executor = create_executor(settings).await?;
    let cache = create_cache(settings, logger.as_ref()).await;
    Ok(Components {
        settings: settings.clone(),
        config_loader,
        executor,
        cache,
        logger,
    })
}

/// Build a fully wired service from settings.
pub async fn create_service(settings: &Settings) -> Result<WbrService> {
    Ok(build_components(settings).await?.into_service())
}
