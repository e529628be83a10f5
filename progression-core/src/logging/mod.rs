//! Structured Logging & Tracing
//!
//! Structured logging via the `tracing` crate:
//! - A default level plus per-module overrides, rendered into an `EnvFilter`
//! - `RUST_LOG` takes precedence over the configured filter
//! - `ACADEMY_LOG_LEVEL` / `ACADEMY_SQL_LOG_LEVEL` adjust the defaults
//! - Idempotent initialization (first call wins)

use serde::{Deserialize, Serialize};
use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// Default level for every target without an override.
pub const LOG_LEVEL_ENV: &str = "ACADEMY_LOG_LEVEL";
/// Level for the `sqlx` target.
pub const SQL_LOG_LEVEL_ENV: &str = "ACADEMY_SQL_LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub const ALL: [LogLevel; 5] = [
        LogLevel::Trace,
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Case-insensitive; accepts `warning` for `warn`.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        if name == "warning" {
            return Some(LogLevel::Warn);
        }
        Self::ALL.iter().copied().find(|l| l.as_str() == name)
    }
}

/// Configuration for tracing initialization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracingConfig {
    pub default_level: LogLevel,
    pub module_filters: Vec<(String, LogLevel)>,
    pub show_targets: bool,
    pub show_file_line: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            default_level: LogLevel::Info,
            module_filters: vec![
                ("academy_core::engine".to_string(), LogLevel::Info),
                ("academy_core::adjuster".to_string(), LogLevel::Warn),
                ("academy_core::store".to_string(), LogLevel::Warn),
                ("sqlx".to_string(), LogLevel::Warn),
            ],
            show_targets: true,
            show_file_line: false,
        }
    }
}

impl TracingConfig {
    /// Defaults adjusted by the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults adjusted by `lookup`; unparseable levels are ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let level = |name: &str| lookup(name).as_deref().and_then(LogLevel::parse);
        let mut config = Self::default();
        if let Some(default_level) = level(LOG_LEVEL_ENV) {
            config.default_level = default_level;
        }
        if let Some(sql) = level(SQL_LOG_LEVEL_ENV) {
            config = config.with_module("sqlx", sql);
        }
        config
    }

    /// Set the level for `module`, replacing any earlier override.
    pub fn with_module(mut self, module: &str, level: LogLevel) -> Self {
        self.module_filters.retain(|(m, _)| m != module);
        self.module_filters.push((module.to_string(), level));
        self
    }

    pub fn to_env_filter_string(&self) -> String {
        std::iter::once(self.default_level.as_str().to_string())
            .chain(
                self.module_filters
                    .iter()
                    .map(|(module, level)| format!("{}={}", module, level.as_str())),
            )
            .collect::<Vec<_>>()
            .join(",")
    }
}

static TRACING_INIT: Once = Once::new();

/// Install the global subscriber (idempotent, first call wins)
pub fn init_tracing(config: &TracingConfig) {
    let filter_str = config.to_env_filter_string();
    let show_targets = config.show_targets;
    let show_file_line = config.show_file_line;
    TRACING_INIT.call_once(move || {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(show_targets)
            .with_file(show_file_line)
            .with_line_number(show_file_line)
            .compact();

        // A host application may already own the global subscriber
        let _ = subscriber.try_init();
    });
}

/// Guard that keeps a named span entered for the duration of an operation
pub struct TimingSpan {
    _span: tracing::span::EnteredSpan,
}

impl TimingSpan {
    pub fn new(name: &str) -> Self {
        let span = tracing::info_span!("operation", name = name);
        Self {
            _span: span.entered(),
        }
    }
}

/// The filter actually in effect, logged once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSnapshot {
    pub filter: String,
    /// `RUST_LOG` was set and replaced `filter`
    pub rust_log_override: bool,
    pub config: TracingConfig,
}

impl LoggingSnapshot {
    pub fn capture(config: &TracingConfig, rust_log: Option<&str>) -> Self {
        let rust_log = rust_log.filter(|s| !s.trim().is_empty());
        Self {
            filter: rust_log
                .map(str::to_string)
                .unwrap_or_else(|| config.to_env_filter_string()),
            rust_log_override: rust_log.is_some(),
            config: config.clone(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("TRACE"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::parse(" warning "), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("error"), Some(LogLevel::Error));
        assert_eq!(LogLevel::parse("loud"), None);
    }

    #[test]
    fn test_env_filter_string() {
        let filter = TracingConfig::default().to_env_filter_string();
        assert!(filter.starts_with("info,"));
        assert!(filter.contains("academy_core::adjuster=warn"));
        assert!(filter.contains("sqlx=warn"));
    }

    #[test]
    fn test_env_overrides_default_and_sql_levels() {
        let config = TracingConfig::from_lookup(env(&[
            (LOG_LEVEL_ENV, "debug"),
            (SQL_LOG_LEVEL_ENV, "INFO"),
        ]));
        assert_eq!(config.default_level, LogLevel::Debug);
        let sqlx: Vec<_> = config.module_filters.iter().filter(|(m, _)| m == "sqlx").collect();
        assert_eq!(sqlx, vec![&("sqlx".to_string(), LogLevel::Info)]);
        assert!(config.to_env_filter_string().ends_with("sqlx=info"));
    }

    #[test]
    fn test_unparseable_env_level_ignored() {
        let config = TracingConfig::from_lookup(env(&[(LOG_LEVEL_ENV, "chatty")]));
        assert_eq!(config, TracingConfig::default());
    }

    #[test]
    fn test_snapshot_reports_rust_log_override() {
        let config = TracingConfig::default();
        let plain = LoggingSnapshot::capture(&config, None);
        assert!(!plain.rust_log_override);
        assert_eq!(plain.filter, config.to_env_filter_string());

        let overridden = LoggingSnapshot::capture(&config, Some("academy_core=trace"));
        assert!(overridden.rust_log_override);
        assert_eq!(overridden.filter, "academy_core=trace");
        assert!(overridden.to_json().contains("\"rust_log_override\":true"));

        assert!(!LoggingSnapshot::capture(&config, Some("  ")).rust_log_override);
    }

    #[test]
    fn test_init_tracing_idempotent() {
        init_tracing(&TracingConfig::default());
        init_tracing(&TracingConfig::default());
        let _span = TimingSpan::new("test_op");
        tracing::info!("inside span");
    }
}
