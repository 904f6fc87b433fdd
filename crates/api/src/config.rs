//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use pipeline::{PipelineConfig, RetryPolicy};
use queue::{Backoff, ConsumeOptions};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Server and worker configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `"info"`)
/// - `LOG_FORMAT`: `pretty` or `json` (default `pretty`)
/// - `DATABASE_URL`: PostgreSQL connection string; unset runs fully in memory
/// - `ORDER_CONSUMERS`, `RETRY_CONSUMERS`, `DEAD_LETTER_CONSUMERS`: loops per queue
/// - `RETRY_MAX_ATTEMPTS`, `RETRY_BASE_DELAY_MS`, `RETRY_MAX_DELAY_MS`: retry policy
/// - `MAX_DELIVERIES`: deliveries before a message is dead-lettered as fatal
/// - `DELIVERY_TIMEOUT_SECS`: lease length of a delivery
/// - `POLL_INTERVAL_MS`: wait between polls of an empty queue
/// - `HEALTH_TIMEOUT_MS`: timeout of each health probe
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub order_consumers: usize,
    pub retry_consumers: usize,
    pub dead_letter_consumers: usize,
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub max_deliveries: u32,
    pub delivery_timeout: Duration,
    pub poll_interval: Duration,
    pub health_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from any key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let millis = |key: &str, default: Duration| {
            parsed(key).map(Duration::from_millis).unwrap_or(default)
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .and_then(|f| f.parse().ok())
                .unwrap_or(defaults.log_format),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            order_consumers: lookup("ORDER_CONSUMERS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.order_consumers),
            retry_consumers: lookup("RETRY_CONSUMERS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.retry_consumers),
            dead_letter_consumers: lookup("DEAD_LETTER_CONSUMERS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.dead_letter_consumers),
            retry_max_attempts: lookup("RETRY_MAX_ATTEMPTS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.retry_max_attempts),
            retry_base_delay: millis("RETRY_BASE_DELAY_MS", defaults.retry_base_delay),
            retry_max_delay: millis("RETRY_MAX_DELAY_MS", defaults.retry_max_delay),
            max_deliveries: lookup("MAX_DELIVERIES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_deliveries),
            delivery_timeout: parsed("DELIVERY_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.delivery_timeout),
            poll_interval: millis("POLL_INTERVAL_MS", defaults.poll_interval),
            health_timeout: millis("HEALTH_TIMEOUT_MS", defaults.health_timeout),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Worker settings for [`pipeline::Pipeline::spawn`].
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            order_consumers: self.order_consumers,
            retry_consumers: self.retry_consumers,
            dead_letter_consumers: self.dead_letter_consumers,
            retry_policy: RetryPolicy::new(
                self.retry_max_attempts,
                self.retry_base_delay,
                self.retry_max_delay,
            ),
            max_deliveries: self.max_deliveries,
            consume: ConsumeOptions {
                poll_interval: self.poll_interval,
                heartbeat_interval: (self.delivery_timeout / 3).max(Duration::from_secs(1)),
                error_backoff: Backoff::new(Duration::from_millis(100), Duration::from_secs(5)),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            order_consumers: 4,
            retry_consumers: 1,
            dead_letter_consumers: 1,
            retry_max_attempts: 5,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(60),
            max_deliveries: 5,
            delivery_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
            health_timeout: Duration::from_secs(2),
        }
    }
}
