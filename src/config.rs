use crate::session::Tariff;
use crate::tracker::{
    DEFAULT_EXIT_DEBOUNCE, DEFAULT_HOURLY_RATE, DEFAULT_MIN_DURATION_SECS, TrackerSettings,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_HISTORY_DIR: &str = "data";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: AppSection,
    pub logging: LoggingSection,
    #[serde(default)]
    pub tariff: Option<TariffSection>,
    #[serde(default)]
    pub session: Option<SessionSection>,
    #[serde(default)]
    pub source: Option<SourceSection>,
    #[serde(default)]
    pub history: Option<HistorySection>,
    #[serde(default)]
    pub server: Option<ServerSection>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSection {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TariffSection {
    /// Currency per hour of dwell time (default: 20.0)
    pub hourly_rate: Option<f64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionSection {
    /// How long a vacant reading must hold before the exit counts (default: 1500)
    pub exit_debounce_ms: Option<u64>,
    /// Sessions shorter than this are treated as sensor flicker (default: 3.0)
    pub min_duration_secs: Option<f64>,
    /// Live elapsed/fee refresh period (default: 1000)
    pub tick_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceSection {
    /// Serial device streaming `{"occupied": bool}` frames
    pub serial_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistorySection {
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSection {
    /// Port to listen on (default: 8080)
    pub port: Option<u16>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub fn load_default() -> Result<Config, ConfigError> {
    load_from_path(DEFAULT_CONFIG_PATH)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}

impl Config {
    fn validate(&self) -> Result<(), ConfigError> {
        let rate = self.hourly_rate();
        if !rate.is_finite() || rate < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "tariff.hourly_rate must be a non-negative number, got {rate}"
            )));
        }
        let min_secs = self.min_duration_secs();
        if !min_secs.is_finite() || min_secs < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "session.min_duration_secs must be a non-negative number, got {min_secs}"
            )));
        }
        if self.tick_interval().is_zero() {
            return Err(ConfigError::Invalid(
                "session.tick_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn hourly_rate(&self) -> f64 {
        self.tariff
            .as_ref()
            .and_then(|t| t.hourly_rate)
            .unwrap_or(DEFAULT_HOURLY_RATE)
    }

    pub fn exit_debounce(&self) -> Duration {
        self.session
            .as_ref()
            .and_then(|s| s.exit_debounce_ms)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_EXIT_DEBOUNCE)
    }

    pub fn min_duration_secs(&self) -> f64 {
        self.session
            .as_ref()
            .and_then(|s| s.min_duration_secs)
            .unwrap_or(DEFAULT_MIN_DURATION_SECS)
    }

    pub fn tick_interval(&self) -> Duration {
        let millis = self
            .session
            .as_ref()
            .and_then(|s| s.tick_interval_ms)
            .unwrap_or(DEFAULT_TICK_INTERVAL_MS);
        Duration::from_millis(millis)
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            tariff: Tariff::new(self.hourly_rate()),
            exit_debounce: self.exit_debounce(),
            min_duration_secs: self.min_duration_secs(),
        }
    }

    /// Serial device path, or `None` when only the manual toggle is used.
    pub fn serial_path(&self) -> Option<&Path> {
        let path = self.source.as_ref()?.serial_path.as_deref()?;
        if path.as_os_str().is_empty() {
            None
        } else {
            Some(path)
        }
    }

    pub fn history_dir(&self) -> PathBuf {
        self.history
            .as_ref()
            .and_then(|h| h.dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_HISTORY_DIR))
    }

    /// Returns the server port (default: 8080)
    pub fn server_port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_SERVER_PORT)
    }

    pub fn log_level(&self) -> tracing::Level {
        self.logging.level.parse().unwrap_or(tracing::Level::INFO)
    }
}
