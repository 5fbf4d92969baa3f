//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use compensation::{RetrySpec, SchedulerConfig};
use messaging::DispatcherConfig;
use modeling::SnapshotPolicy;

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

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
/// - `DATABASE_URL`: PostgreSQL event store; in-memory when unset
/// - `DISPATCHER_PARALLELISM`: dispatcher lanes (default: available cores)
/// - `SNAPSHOT_INTERVAL`: versions between snapshots, `0` disables (default: `100`)
/// - `COMMAND_WAIT_ENDPOINT`: URL other processes post wait signals to
///   (default: `http://127.0.0.1:{PORT}/command/wait`)
/// - `COMPENSATION_POLL_INTERVAL_SECS`: retry scheduler period (default: `60`)
/// - `RETRY_MAX_RETRIES`, `RETRY_MIN_BACKOFF_SECS`, `RETRY_EXECUTION_TIMEOUT_SECS`:
///   default retry policy for failed reactions (default: `10`, `180`, `120`)
///
/// Unparseable values fall back to the default.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub dispatcher: DispatcherConfig,
    pub wait_endpoint: String,
    pub scheduler: SchedulerConfig,
    pub retry_spec: RetrySpec,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        let port = lookup("PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(defaults.port);
        let dispatcher = DispatcherConfig {
            parallelism: parse("DISPATCHER_PARALLELISM")
                .map(|n| n as usize)
                .unwrap_or(defaults.dispatcher.parallelism),
            snapshot: parse("SNAPSHOT_INTERVAL")
                .map(SnapshotPolicy::from_interval)
                .unwrap_or(defaults.dispatcher.snapshot),
            ..defaults.dispatcher
        };
        let scheduler = SchedulerConfig {
            poll_interval: parse("COMPENSATION_POLL_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.scheduler.poll_interval),
            ..defaults.scheduler
        };
        let retry_spec = RetrySpec {
            max_retries: parse("RETRY_MAX_RETRIES")
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(defaults.retry_spec.max_retries),
            min_backoff: parse("RETRY_MIN_BACKOFF_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry_spec.min_backoff),
            execution_timeout: parse("RETRY_EXECUTION_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry_spec.execution_timeout),
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port,
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .and_then(|f| f.parse().ok())
                .unwrap_or(defaults.log_format),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            dispatcher,
            wait_endpoint: lookup("COMMAND_WAIT_ENDPOINT")
                .unwrap_or_else(|| default_wait_endpoint(port)),
            scheduler,
            retry_spec,
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_wait_endpoint(port: u16) -> String {
    format!("http://127.0.0.1:{port}/command/wait")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            dispatcher: DispatcherConfig::default(),
            wait_endpoint: default_wait_endpoint(3000),
            scheduler: SchedulerConfig::default(),
            retry_spec: RetrySpec::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.database_url.is_none());
        assert_eq!(config.dispatcher.snapshot, SnapshotPolicy::Every(100));
        assert_eq!(config.wait_endpoint, "http://127.0.0.1:3000/command/wait");
        assert_eq!(config.retry_spec, RetrySpec::default());
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_reads_every_variable() {
        let config = from_pairs(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("RUST_LOG", "debug"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/events"),
            ("DISPATCHER_PARALLELISM", "3"),
            ("SNAPSHOT_INTERVAL", "0"),
            ("COMMAND_WAIT_ENDPOINT", "http://node-1:8080/command/wait"),
            ("COMPENSATION_POLL_INTERVAL_SECS", "5"),
            ("RETRY_MAX_RETRIES", "3"),
            ("RETRY_MIN_BACKOFF_SECS", "1"),
            ("RETRY_EXECUTION_TIMEOUT_SECS", "2"),
        ]);

        assert_eq!(config.addr(), "127.0.0.1:8080");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/events"));
        assert_eq!(config.dispatcher.parallelism, 3);
        assert_eq!(config.dispatcher.snapshot, SnapshotPolicy::Disabled);
        assert_eq!(config.wait_endpoint, "http://node-1:8080/command/wait");
        assert_eq!(config.scheduler.poll_interval, Duration::from_secs(5));
        assert_eq!(
            config.retry_spec,
            RetrySpec {
                max_retries: 3,
                min_backoff: Duration::from_secs(1),
                execution_timeout: Duration::from_secs(2),
            }
        );
    }

    #[test]
    fn test_wait_endpoint_follows_port() {
        let config = from_pairs(&[("PORT", "9000")]);
        assert_eq!(config.wait_endpoint, "http://127.0.0.1:9000/command/wait");
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[
            ("PORT", "not-a-port"),
            ("LOG_FORMAT", "xml"),
            ("RETRY_MAX_RETRIES", "-1"),
            ("DATABASE_URL", ""),
        ]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.retry_spec.max_retries, 10);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_zero_poll_interval_falls_back() {
        let config = from_pairs(&[("COMPENSATION_POLL_INTERVAL_SECS", "0")]);
        assert_eq!(config.scheduler.poll_interval, Duration::from_secs(60));
    }
}
