use serde_json::{Map, Value};

/// Extra structured fields attached to one log line.
pub type Fields = Map<String, Value>;

/// Log target every [`StructuredLogger`] line is emitted under.
pub const LOG_TARGET: &str = "wbr";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Level {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warning" | "warn" => Some(Level::Warning),
            "error" => Some(Level::Error),
            "critical" => Some(Level::Critical),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        }
    }

    fn to_log(self) -> log::Level {
        match self {
            Level::Debug => log::Level::Debug,
            Level::Info => log::Level::Info,
            Level::Warning => log::Level::Warn,
            Level::Error | Level::Critical => log::Level::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("text") {
            LogFormat::Text
        } else {
            LogFormat::Json
        }
    }
}

/// Leveled logging with structured fields, injectable into the service.
pub trait Logger: Send + Sync {
    fn log(&self, level: Level, message: &str, fields: Option<&Fields>);

    fn debug(&self, message: &str, fields: Option<&Fields>) {
        self.log(Level::Debug, message, fields);
    }

    fn info(&self, message: &str, fields: Option<&Fields>) {
        self.log(Level::Info, message, fields);
    }

    fn warning(&self, message: &str, fields: Option<&Fields>) {
        self.log(Level::Warning, message, fields);
    }

    fn error(&self, message: &str, fields: Option<&Fields>) {
        self.log(Level::Error, message, fields);
    }

    fn critical(&self, message: &str, fields: Option<&Fields>) {
        self.log(Level::Critical, message, fields);
    }
}

/// Formats each record as one JSON object or a `key=value` text line and
/// hands it to the `log` facade.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    min_level: Level,
    format: LogFormat,
}

impl StructuredLogger {
    pub fn new(min_level: Level, format: LogFormat) -> Self {
        Self { min_level, format }
    }

    pub fn format_record(&self, level: Level, message: &str, fields: Option<&Fields>) -> String {
        match self.format {
            LogFormat::Json => {
                let mut record = Map::new();
                record.insert(
                    "timestamp".into(),
                    Value::String(
                        chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                    ),
                );
                record.insert("level".into(), Value::String(level.as_str().into()));
                record.insert("logger".into(), Value::String(LOG_TARGET.into()));
                record.insert("message".into(), Value::String(message.into()));
                if let Some(fields) = fields {
                    for (k, v) in fields {
                        record.insert(k.clone(), v.clone());
                    }
                }
                Value::Object(record).to_string()
            }
            LogFormat::Text => {
                let mut line = format!("{} - {message}", level.as_str());
                if let Some(fields) = fields {
                    for (k, v) in fields {
                        match v {
                            Value::String(s) => line.push_str(&format!(" {k}={s}")),
                            other => line.push_str(&format!(" {k}={other}")),
                        }
                    }
                }
                line
            }
        }
    }
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self::new(Level::Info, LogFormat::Json)
    }
}

impl Logger for StructuredLogger {
    fn log(&self, level: Level, message: &str, fields: Option<&Fields>) {
        if level < self.min_level {
            return;
        }
        let line = self.format_record(level, message, fields);
        log::log!(target: LOG_TARGET, level.to_log(), "{line}");
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn log(&self, _level: Level, _message: &str, _fields: Option<&Fields>) {}
}

/// Build a [`Fields`] map from `key => value` pairs.
#[macro_export]
macro_rules! fields {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut map = $crate::logger::Fields::new();
        $( map.insert($key.to_string(), serde_json::json!($value)); )*
        map
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parse_and_order() {
        assert_eq!(Level::parse("WARN"), Some(Level::Warning));
        assert_eq!(Level::parse("critical"), Some(Level::Critical));
        assert_eq!(Level::parse("loud"), None);
        assert!(Level::Debug < Level::Critical);
    }

    #[test]
    fn test_json_record() {
        let logger = StructuredLogger::new(Level::Debug, LogFormat::Json);
        let line = logger.format_record(
            Level::Info,
            "cache hit",
            Some(&crate::fields!("chart_id" => "vendas", "rows" => 3)),
        );
        let v: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["level"], "INFO");
        assert_eq!(v["logger"], "wbr");
        assert_eq!(v["message"], "cache hit");
        assert_eq!(v["chart_id"], "vendas");
        assert_eq!(v["rows"], 3);
        assert!(v["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_text_record() {
        let logger = StructuredLogger::new(Level::Debug, LogFormat::parse("text"));
        let line = logger.format_record(
            Level::Warning,
            "fallback",
            Some(&crate::fields!("backend" => "memory")),
        );
        assert_eq!(line, "WARNING - fallback backend=memory");
    }

    #[test]
    fn test_null_logger_accepts_everything() {
        let logger = NullLogger;
        logger.debug("x", None);
        logger.critical("y", Some(&Fields::new()));
    }
}
