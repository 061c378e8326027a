//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `ecowittdirect.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - LoggingConfig: log level and whether each reading is echoed.
//!     - ApiConfig: whether the query api runs, and where it listens.
//!     - DeviceConfig: gateway address, poll interval (ticks), fetch timeout.
//!     - InfluxConfig: optional time-series sink.
//!
//! the loaded struct is never mutated. main.rs hands references to each
//! component's constructor.
//!
//! ==============================================================================

use anyhow::{anyhow, bail, Context};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Env var naming an explicit config file
pub const CONFIG_ENV: &str = "WEATHERCONF";

/// One poll-interval tick. `wait = 1` polls every 10 seconds.
pub const TICK: Duration = Duration::from_secs(10);

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct StationConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub influxdb: InfluxConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_readings: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub enable: bool,
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DeviceConfig {
    /// host or host:port of the gateway
    pub ip: String,
    pub path: String,
    /// poll interval in ticks
    pub wait: u32,
    /// fetch timeout in seconds
    pub timeout: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InfluxConfig {
    pub enable: bool,
    pub host: String,
    pub port: u16,
    pub db: String,
    /// measurement name
    pub field: String,
    pub username: String,
    pub password: String,
    /// write timeout in seconds
    pub timeout: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_readings: false }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { enable: true, bind: "0.0.0.0".to_string(), port: 8696 }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            ip: "192.168.0.2".to_string(),
            path: "/get_livedata_info".to_string(),
            wait: 1,
            timeout: 10,
        }
    }
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            enable: false,
            host: "influxdb".to_string(),
            port: 8086,
            db: "powerwall".to_string(),
            field: "ecowitt".to_string(),
            username: String::new(),
            password: String::new(),
            timeout: 5,
        }
    }
}

impl DeviceConfig {
    pub fn url(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("http://{}{}", self.ip, path)
    }

    pub fn poll_interval(&self) -> Duration {
        TICK * self.wait
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl InfluxConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl StationConfig {
    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: StationConfig =
            toml::from_str(content).map_err(|e| anyhow!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;
        Self::from_toml(&content)
    }

    /// Load from `$WEATHERCONF`, else the first default location that
    /// exists, else built-in defaults.
    ///
    /// A file named by the env var must load; it is an error otherwise.
    pub fn load_or_default() -> anyhow::Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let config = Self::load(&path)?;
            tracing::info!("[CONFIG] Loaded from {}", path);
            return Ok(config);
        }

        let paths = [
            PathBuf::from("config").join("ecowittdirect.toml"),
            PathBuf::from("..").join("config").join("ecowittdirect.toml"),
            PathBuf::from("ecowittdirect.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        tracing::info!("[CONFIG] Loaded from {}", path.display());
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("[CONFIG] Failed to load {}: {:#}", path.display(), e);
                    }
                }
            }
        }

        tracing::warn!("[CONFIG] No config file found - using defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.device.ip.trim().is_empty() {
            bail!("device.ip must not be empty");
        }
        if self.device.wait == 0 {
            bail!("device.wait must be at least 1 tick");
        }
        if self.device.timeout == 0 {
            bail!("device.timeout must be at least 1 second");
        }
        if self.influxdb.enable {
            if self.influxdb.field.trim().is_empty() {
                bail!("influxdb.field must not be empty when influxdb is enabled");
            }
            if self.influxdb.timeout == 0 {
                bail!("influxdb.timeout must be at least 1 second");
            }
        }
        Ok(())
    }

    /// Log configuration summary
    pub fn print_summary(&self) {
        tracing::info!(
            "[CONFIG] LocalWeather - Log level: {}, Activate API: {}, API Port: {}",
            self.logging.level,
            self.api.enable,
            self.api.port
        );
        tracing::info!(
            "[CONFIG] Ecowitt - URL: {}, Wait: {} tick(s) ({:?}), Timeout: {}s",
            self.device.url(),
            self.device.wait,
            self.device.poll_interval(),
            self.device.timeout
        );
        tracing::info!(
            "[CONFIG] InfluxDB - Enable: {}, Host: {}, Port: {}, DB: {}, Field: {}",
            self.influxdb.enable,
            self.influxdb.host,
            self.influxdb.port,
            self.influxdb.db,
            self.influxdb.field
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_file_parses() {
        let config = StationConfig::from_toml(
            r#"
            [logging]
            level = "debug"
            show_readings = true

            [api]
            enable = false
            port = 9000

            [device]
            ip = "10.0.0.5"
            wait = 3
            timeout = 4

            [influxdb]
            enable = true
            host = "db"
            port = 8087
            db = "weather"
            field = "station"
            username = "u"
            password = "p"
            "#,
        )
        .unwrap();

        assert_eq!(config.logging.level, "debug");
        assert!(!config.api.enable);
        assert_eq!(config.api.port, 9000);
        assert_eq!(config.api.bind, "0.0.0.0");
        assert_eq!(config.device.url(), "http://10.0.0.5/get_livedata_info");
        assert_eq!(config.device.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.device.fetch_timeout(), Duration::from_secs(4));
        assert!(config.influxdb.enable);
        assert_eq!(config.influxdb.field, "station");
        assert_eq!(config.influxdb.write_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = StationConfig::from_toml("").unwrap();
        assert!(config.api.enable);
        assert_eq!(config.api.port, 8696);
        assert_eq!(config.device.wait, 1);
        assert!(!config.influxdb.enable);
    }

    #[test]
    fn zero_wait_is_rejected() {
        let err = StationConfig::from_toml("[device]\nwait = 0").unwrap_err();
        assert!(err.to_string().contains("device.wait"));
    }

    #[test]
    fn empty_field_rejected_only_when_sink_enabled() {
        assert!(StationConfig::from_toml("[influxdb]\nfield = \"\"").is_ok());
        assert!(StationConfig::from_toml("[influxdb]\nenable = true\nfield = \"\"").is_err());
    }

    #[test]
    fn path_without_slash() {
        let device = DeviceConfig { path: "live".into(), ..DeviceConfig::default() };
        assert_eq!(device.url(), "http://192.168.0.2/live");
    }
}
