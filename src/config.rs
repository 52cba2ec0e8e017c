//! Configuration management for the driver.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Driver configuration.
///
/// Every field has a sensible default matching the sonar's factory network
/// setup; a default-constructed config talks to a stock device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// UDP port the status beacon is broadcast on.
    #[serde(default = "default_status_port")]
    pub status_port: u16,

    /// TCP port of the sonar's command/data channel.
    #[serde(default = "default_data_port")]
    pub data_port: u16,

    /// Watchdog tick period.
    #[serde(default = "default_checker_period", with = "humantime_serde")]
    pub checker_period: Duration,

    /// Status silence after which the session is considered lost.
    #[serde(default = "default_status_timeout", with = "humantime_serde")]
    pub status_timeout: Duration,

    /// Message silence after which the session is considered lost.
    #[serde(default = "default_message_timeout", with = "humantime_serde")]
    pub message_timeout: Duration,

    /// TCP connect timeout.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// How long to wait for the sonar to echo a requested configuration.
    #[serde(default = "default_feedback_timeout", with = "humantime_serde")]
    pub feedback_timeout: Duration,

    /// Maximum send/observe iterations in `request_fire_config`.
    #[serde(default = "default_max_config_requests")]
    pub max_config_requests: u32,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_status_port() -> u16 {
    crate::DEFAULT_STATUS_PORT
}
fn default_data_port() -> u16 {
    crate::DEFAULT_DATA_PORT
}
fn default_checker_period() -> Duration {
    Duration::from_secs(1)
}
fn default_status_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_message_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_feedback_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_max_config_requests() -> u32 {
    100
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            status_port: default_status_port(),
            data_port: default_data_port(),
            checker_period: default_checker_period(),
            status_timeout: default_status_timeout(),
            message_timeout: default_message_timeout(),
            connect_timeout: default_connect_timeout(),
            feedback_timeout: default_feedback_timeout(),
            max_config_requests: default_max_config_requests(),
            logging: LoggingConfig::default(),
        }
    }
}

impl DriverConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("Failed to write config: {e}")))?;

        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.checker_period.is_zero() {
            return Err(Error::InvalidConfig("checker_period must be nonzero".into()));
        }

        if self.status_timeout.is_zero() || self.message_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "watchdog timeouts must be nonzero".into(),
            ));
        }

        if self.message_timeout <= self.status_timeout {
            return Err(Error::InvalidConfig(
                "message_timeout must exceed status_timeout".into(),
            ));
        }

        if self.max_config_requests == 0 {
            return Err(Error::InvalidConfig(
                "max_config_requests must be nonzero".into(),
            ));
        }

        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text or json).
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Enable colored output.
    #[serde(default = "default_color")]
    pub color: bool,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}
fn default_color() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: default_color(),
        }
    }
}

/// Initialize logging.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to init logging: {e}")))?;
    } else {
        subscriber
            .with(fmt::layer().with_ansi(config.color))
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to init logging: {e}")))?;
    }

    Ok(())
}
