//! Configuration for Mailcast

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "MAILCAST_CONFIG";

/// Prefix for environment overrides, e.g. `MAILCAST__DISPATCH__CONCURRENCY=4`
pub const ENV_PREFIX: &str = "MAILCAST";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Dispatch loop configuration
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Schedule validation configuration
    #[serde(default)]
    pub scheduling: SchedulingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: Option<String>,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Seconds to wait for a pooled connection
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout() -> u64 {
    30
}

/// Dispatch loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Maximum concurrent sends per campaign dispatch
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Per-send timeout in seconds
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,

    /// Interval between scheduler polls in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Maximum campaigns picked up per scheduler poll
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            send_timeout_secs: default_send_timeout(),
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
        }
    }
}

impl DispatchConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

fn default_concurrency() -> usize {
    10
}

fn default_send_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    5
}

fn default_batch_size() -> i64 {
    100
}

/// Schedule validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Minimum gap between now and a "later" send, in seconds
    #[serde(default = "default_min_lead_time")]
    pub min_lead_time_secs: u64,

    /// Timezone applied when a request carries none
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            min_lead_time_secs: default_min_lead_time(),
            default_timezone: default_timezone(),
        }
    }
}

impl SchedulingConfig {
    pub fn min_lead_time(&self) -> Duration {
        Duration::from_secs(self.min_lead_time_secs)
    }
}

fn default_min_lead_time() -> u64 {
    60
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level, used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from the first file found, layered under
    /// `MAILCAST__*` environment overrides
    pub fn load() -> crate::Result<Self> {
        let explicit = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);

        let mut builder = config::Config::builder();

        match explicit {
            Some(path) => {
                builder = builder.add_source(config::File::from(path).required(true));
            }
            None => {
                let candidates = [
                    PathBuf::from("./mailcast.toml"),
                    PathBuf::from("/etc/mailcast/mailcast.toml"),
                ];
                if let Some(path) = candidates.into_iter().find(|p| p.exists()) {
                    builder = builder.add_source(config::File::from(path));
                }
            }
        }

        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| crate::Error::Config(format!("Failed to load config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.dispatch.concurrency == 0 {
            return Err(crate::Error::Config(
                "dispatch.concurrency must be at least 1".to_string(),
            ));
        }
        if self.dispatch.send_timeout_secs == 0 {
            return Err(crate::Error::Config(
                "dispatch.send_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.dispatch.batch_size <= 0 {
            return Err(crate::Error::Config(
                "dispatch.batch_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.dispatch.concurrency, 10);
        assert_eq!(config.dispatch.send_timeout(), Duration::from_secs(30));
        assert_eq!(config.scheduling.min_lead_time(), Duration::from_secs(60));
        assert_eq!(config.scheduling.default_timezone, "UTC");
        assert!(config.database.url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[database]
url = "postgres://localhost/mailcast"

[dispatch]
concurrency = 4
send_timeout_secs = 10

[scheduling]
min_lead_time_secs = 300
default_timezone = "Europe/Berlin"

[logging]
format = "json"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(
            config.database.url.as_deref(),
            Some("postgres://localhost/mailcast")
        );
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.dispatch.concurrency, 4);
        assert_eq!(config.dispatch.poll_interval_secs, 5);
        assert_eq!(config.scheduling.min_lead_time_secs, 300);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.dispatch.concurrency = 0;
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));
    }
}
