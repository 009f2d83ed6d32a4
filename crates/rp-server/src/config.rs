//! Server configuration from environment.

use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::feed::MAX_LINE_BYTES;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be {expected}, got {value:?}")]
    Invalid {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Where relay envelopes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedSource {
    /// Newline-delimited envelopes on standard input.
    Stdin,
    /// Newline-delimited envelopes from a TCP relay bridge.
    Tcp(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub database_max_connections: u32,
    pub feed_source: FeedSource,
    /// Silence after which a warning is logged. The session keeps waiting.
    pub feed_timeout: Duration,
    /// Longer envelopes are counted as undecodable and skipped.
    pub feed_max_line_bytes: usize,
    pub stats_interval: Duration,
    pub server_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Missing keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let feed_source = match lookup("RP_FEED_ADDR") {
            Some(addr) if addr.trim() == "-" => FeedSource::Stdin,
            Some(addr) if !addr.trim().is_empty() => FeedSource::Tcp(addr.trim().to_string()),
            _ => FeedSource::Tcp("127.0.0.1:9500".to_string()),
        };

        let log_format = match lookup("RP_LOG_FORMAT").as_deref().map(str::trim) {
            None | Some("") | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "RP_LOG_FORMAT",
                    expected: "\"text\" or \"json\"",
                    value: other.to_string(),
                })
            }
        };

        let feed_timeout_ms: u64 = parse_or(&lookup, "RP_FEED_TIMEOUT_MS", 600_000)?;
        let stats_interval_secs: u64 = parse_or(&lookup, "RP_STATS_INTERVAL_SECS", 60)?;

        Ok(Self {
            database_path: lookup("RP_DB_PATH")
                .filter(|path| !path.trim().is_empty())
                .unwrap_or_else(|| "data/systems.db".to_string()),
            database_max_connections: parse_or(&lookup, "RP_DB_MAX_CONNECTIONS", 5)?,
            feed_source,
            feed_timeout: Duration::from_millis(feed_timeout_ms.max(1)),
            feed_max_line_bytes: parse_or(&lookup, "RP_FEED_MAX_LINE_BYTES", MAX_LINE_BYTES)?.max(1),
            stats_interval: Duration::from_secs(stats_interval_secs.max(1)),
            server_port: parse_or(&lookup, "RP_HTTP_PORT", 3000)?,
            log_level: lookup("RP_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_format,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key,
            expected: "a non-negative integer",
            value: raw,
        }),
    }
}
