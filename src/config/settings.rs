use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args};

use crate::error::{Error, Result};
use crate::logger::{Level, LogFormat};

/// Runtime settings, from CLI flags or `WBR_*` environment variables.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// SQLite database file or `sqlite://` URL (default: ~/.wbr/wbr.db)
    #[arg(long = "database-url", env = "WBR_DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    /// Directory holding `charts/` and `pages/`
    #[arg(long, env = "WBR_CONFIG_DIR", default_value = "./config", global = true)]
    pub config_dir: PathBuf,

    #[arg(long, env = "WBR_DB_POOL_SIZE", default_value_t = 5, global = true)]
    pub db_pool_size: usize,

    /// Per-statement timeout in seconds
    #[arg(long, env = "WBR_QUERY_TIMEOUT", default_value_t = 30, global = true)]
    pub query_timeout: u64,

    /// Extra databases to attach, as `schema=path` (comma separated)
    #[arg(long, env = "WBR_ATTACH", value_delimiter = ',', global = true)]
    pub attach: Vec<String>,

    #[arg(long, env = "WBR_REDIS_URL", global = true)]
    pub redis_url: Option<String>,

    #[arg(long, env = "WBR_CACHE_ENABLED", default_value_t = true, action = ArgAction::Set, global = true)]
    pub cache_enabled: bool,

    /// Cache TTL in seconds
    #[arg(long, env = "WBR_CACHE_TTL", default_value_t = 3600, global = true)]
    pub cache_ttl: u64,

    #[arg(long, env = "WBR_LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// `json` or `text`
    #[arg(long, env = "WBR_LOG_FORMAT", default_value = "json", global = true)]
    pub log_format: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: None,
            config_dir: PathBuf::from("./config"),
            db_pool_size: 5,
            query_timeout: 30,
            attach: Vec::new(),
            redis_url: None,
            cache_enabled: true,
            cache_ttl: crate::cache::DEFAULT_TTL,
            log_level: "info".into(),
            log_format: "json".into(),
        }
    }
}

impl Settings {
    /// Resolve the database file, creating `~/.wbr` for the default location.
    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(url) = &self.database_url {
            let path = url.strip_prefix("sqlite://").unwrap_or(url);
            return Ok(PathBuf::from(path));
        }
        let dir = dirs::home_dir()
            .ok_or_else(|| Error::invalid_config("cannot determine home directory"))?
            .join(".wbr");
        std::fs::create_dir_all(&dir).map_err(|e| Error::DatabaseConnection {
            message: format!("cannot create {}: {e}", dir.display()),
            connection_string: None,
        })?;
        Ok(dir.join("wbr.db"))
    }

    pub fn attachments(&self) -> Result<Vec<(String, PathBuf)>> {
        self.attach
            .iter()
            .filter(|a| !a.trim().is_empty())
            .map(|a| match a.split_once('=') {
                Some((schema, path)) if !schema.trim().is_empty() && !path.trim().is_empty() => {
                    Ok((schema.trim().to_string(), PathBuf::from(path.trim())))
                }
                _ => Err(Error::invalid_config(format!(
                    "invalid attachment '{a}': expected schema=path"
                ))),
            })
            .collect()
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }

    /// Unknown names fall back to `info`.
    pub fn log_level(&self) -> Level {
        Level::parse(&self.log_level).unwrap_or(Level::Info)
    }

    pub fn log_format(&self) -> LogFormat {
        LogFormat::parse(&self.log_format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        settings: Settings,
    }

    #[test]
    fn test_defaults_match_cli() {
        let cli = TestCli::parse_from(["wbr"]);
        let d = Settings::default();
        assert_eq!(cli.settings.db_pool_size, d.db_pool_size);
        assert_eq!(cli.settings.query_timeout, d.query_timeout);
        assert_eq!(cli.settings.cache_ttl, 3600);
        assert!(cli.settings.cache_enabled);
        assert_eq!(cli.settings.config_dir, d.config_dir);
    }

    #[test]
    fn test_flags() {
        let cli = TestCli::parse_from([
            "wbr",
            "--database-url",
            "sqlite:///tmp/x.db",
            "--cache-enabled",
            "false",
            "--attach",
            "mapa_do_bosque=/tmp/mdb.db,instagram_sbi=/tmp/ig.db",
            "--log-format",
            "text",
        ]);
        let s = cli.settings;
        assert_eq!(s.database_path().unwrap(), PathBuf::from("/tmp/x.db"));
        assert!(!s.cache_enabled);
        assert_eq!(s.log_format(), LogFormat::Text);
        let attached = s.attachments().unwrap();
        assert_eq!(attached.len(), 2);
        assert_eq!(attached[0].0, "mapa_do_bosque");
    }

    #[test]
    fn test_bad_attachment() {
        let s = Settings {
            attach: vec!["nopath".into()],
            ..Settings::default()
        };
        assert!(s.attachments().is_err());
    }

    #[test]
    fn test_log_level_fallback() {
        let s = Settings {
            log_level: "chatty".into(),
            ..Settings::default()
        };
        assert_eq!(s.log_level(), Level::Info);
    }
}
