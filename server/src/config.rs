//! Server configuration.
//!
//! Loaded from a TOML file with sane defaults for every field, so an empty
//! file (or no file at all) yields a runnable server.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

/// Server configuration loaded from a TOML file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Network binding
    #[serde(default)]
    pub network: NetworkConfig,

    /// Telemetry pump and queue limits
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Logging output
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            telemetry: TelemetryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Network binding configuration.
///
/// The TCP acceptor and the shared UDP socket bind the same port.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    /// Address to bind
    #[serde(default = "default_address")]
    pub address: IpAddr,

    /// Port for both the stream acceptor and the datagram socket
    #[serde(default = "default_port")]
    pub port: u16,

    /// Accept backlog for the stream listener
    #[serde(default = "default_backlog")]
    pub backlog: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            backlog: default_backlog(),
        }
    }
}

/// Telemetry pump configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Number of synthetic controllers the built-in service exposes
    #[serde(default = "default_controllers")]
    pub controllers: u32,

    /// Per-session cap on queued dataframes; the oldest frame is dropped
    /// when a session falls this far behind
    #[serde(default = "default_max_queued_dataframes")]
    pub max_queued_dataframes: usize,

    /// Event loop tick interval in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            controllers: default_controllers(),
            max_queued_dataframes: default_max_queued_dataframes(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line output
    #[default]
    Compact,
    /// Multi-line output with field breakdown
    Pretty,
    /// Newline-delimited JSON
    Json,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter level; overridden by RUST_LOG when set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,

    /// Include timestamps in output
    #[serde(default = "default_true")]
    pub timestamps: bool,

    /// Include the log target (module path) in output
    #[serde(default)]
    pub target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            timestamps: true,
            target: false,
        }
    }
}

// Default value functions

fn default_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    9512
}

fn default_backlog() -> u32 {
    128
}

fn default_controllers() -> u32 {
    1
}

fn default_max_queued_dataframes() -> usize {
    256
}

fn default_tick_interval_ms() -> u64 {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.network.backlog == 0 {
            return Err("network.backlog must be at least 1".into());
        }

        if self.telemetry.max_queued_dataframes == 0 {
            return Err("telemetry.max_queued_dataframes must be at least 1".into());
        }

        if self.telemetry.tick_interval_ms == 0 {
            return Err("telemetry.tick_interval_ms must be at least 1".into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.network.port, 9512);
        assert_eq!(config.network.address, default_address());
        assert_eq!(config.telemetry.max_queued_dataframes, 256);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Compact);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(
            r#"
            [network]
            address = "127.0.0.1"
            port = 4433
            backlog = 64

            [telemetry]
            controllers = 2
            max_queued_dataframes = 32
            tick_interval_ms = 8

            [logging]
            level = "debug"
            format = "json"
            timestamps = false
            target = true
            "#,
        )
        .unwrap();

        assert_eq!(config.network.port, 4433);
        assert_eq!(config.network.backlog, 64);
        assert_eq!(config.telemetry.controllers, 2);
        assert_eq!(config.telemetry.max_queued_dataframes, 32);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.logging.target);
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<Config, _> = toml::from_str("[network]\nbogus = 1\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_queue_cap() {
        let config: Config = toml::from_str("[telemetry]\nmax_queued_dataframes = 0\n").unwrap();
        assert!(config.validate().is_err());
    }
}
