use std::{path::PathBuf, time::Duration};

use crate::{
    history::{DEFAULT_HISTORY_LIMIT, JsonFileStore},
    rate_limit::{DEFAULT_MAX_PER_WINDOW, DEFAULT_WINDOW_SECONDS},
    upstream::{DEFAULT_TIMEOUT_SECONDS, DEFAULT_UPSTREAM_URL},
    validator::non_empty,
};

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bind_addr: String,
    pub upstream_url: String,
    pub upstream_timeout: Duration,
    pub rate_limit_window: Duration,
    pub rate_limit_max: usize,
    pub history_limit: usize,
    pub history_path: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            upstream_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            rate_limit_window: Duration::from_secs(DEFAULT_WINDOW_SECONDS),
            rate_limit_max: DEFAULT_MAX_PER_WINDOW,
            history_limit: DEFAULT_HISTORY_LIMIT,
            history_path: JsonFileStore::default_path(),
            log_format: LogFormat::Text,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds settings from any variable source. Missing, empty or invalid
    /// values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |name: &str| {
            lookup(name).and_then(|value| non_empty(&value).map(ToString::to_string))
        };
        let read_positive = |name: &str| {
            read(name)
                .and_then(|value| value.parse::<u64>().ok())
                .filter(|value| *value > 0)
        };

        let defaults = Self::default();

        Self {
            bind_addr: resolve_bind_addr(read("APP_ADDR"), read("PORT")),
            upstream_url: read("ALLDL_UPSTREAM_URL").unwrap_or(defaults.upstream_url),
            upstream_timeout: read_positive("UPSTREAM_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.upstream_timeout),
            rate_limit_window: read_positive("RATE_LIMIT_WINDOW_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.rate_limit_window),
            rate_limit_max: read_positive("RATE_LIMIT_MAX")
                .map(|value| value as usize)
                .unwrap_or(defaults.rate_limit_max),
            history_limit: read_positive("HISTORY_LIMIT")
                .map(|value| value as usize)
                .unwrap_or(defaults.history_limit),
            history_path: read("HISTORY_PATH")
                .map(PathBuf::from)
                .or(defaults.history_path),
            log_format: match read("LOG_FORMAT").map(|value| value.to_ascii_lowercase()) {
                Some(value) if value == "json" => LogFormat::Json,
                _ => LogFormat::Text,
            },
        }
    }
}

fn resolve_bind_addr(configured: Option<String>, port: Option<String>) -> String {
    if let Some(configured) = configured {
        return configured;
    }

    if let Some(port) = port.and_then(|value| value.parse::<u16>().ok()) {
        return format!("0.0.0.0:{port}");
    }

    DEFAULT_BIND_ADDR.to_string()
}
