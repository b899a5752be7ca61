//! Configuration file support for shelter-vax.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/shelter-vax/config.toml`.
//! Every field has a default, so a missing file or a partial one is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{FixedOffset, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::EngineConfig;
use crate::schedule::MAX_SCHEDULE_DAYS;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub registration: RegistrationConfig,
}

/// Database location and locking
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// How long a connection waits on a locked database
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// Shelter calendar and query windows
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScheduleConfig {
    /// Offset from UTC that defines the shelter day
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,

    /// Local time of the daily overdue sweep, `HH:MM`
    #[serde(default = "default_sweep_at")]
    pub sweep_at: String,

    #[serde(default = "default_alert_window_days")]
    pub alert_window_days: u32,

    #[serde(default = "default_upcoming_window_days")]
    pub upcoming_window_days: u32,

    #[serde(default = "default_recent_doses_limit")]
    pub recent_doses_limit: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: default_utc_offset_minutes(),
            sweep_at: default_sweep_at(),
            alert_window_days: default_alert_window_days(),
            upcoming_window_days: default_upcoming_window_days(),
            recent_doses_limit: default_recent_doses_limit(),
        }
    }
}

/// Dose registration retries
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RegistrationConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

// Default value functions
fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shelter-vax")
        .join("shelter.db")
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_utc_offset_minutes() -> i32 {
    -180
}

fn default_sweep_at() -> String {
    "00:00".into()
}

fn default_alert_window_days() -> u32 {
    7
}

fn default_upcoming_window_days() -> u32 {
    30
}

fn default_recent_doses_limit() -> usize {
    5
}

fn default_max_attempts() -> u32 {
    5
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> ConfigResult<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Load and validate configuration from a specific path
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shelter-vax")
            .join("config.toml")
    }

    /// Save the configuration to a specific path
    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        self.utc_offset()?;
        self.sweep_at()?;

        let schedule = &self.schedule;
        for (name, days) in [
            ("alert_window_days", schedule.alert_window_days),
            ("upcoming_window_days", schedule.upcoming_window_days),
        ] {
            if days == 0 || days > MAX_SCHEDULE_DAYS {
                return Err(ConfigError::Invalid(format!(
                    "{} must be between 1 and {}, got {}",
                    name, MAX_SCHEDULE_DAYS, days
                )));
            }
        }
        if schedule.recent_doses_limit == 0 {
            return Err(ConfigError::Invalid("recent_doses_limit must be positive".into()));
        }
        if self.registration.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be positive".into()));
        }
        Ok(())
    }

    pub fn utc_offset(&self) -> ConfigResult<FixedOffset> {
        let minutes = self.schedule.utc_offset_minutes;
        minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| ConfigError::Invalid(format!("UTC offset out of range: {} minutes", minutes)))
    }

    pub fn sweep_at(&self) -> ConfigResult<NaiveTime> {
        NaiveTime::parse_from_str(&self.schedule.sweep_at, "%H:%M").map_err(|e| {
            ConfigError::Invalid(format!("sweep_at {:?}: {}", self.schedule.sweep_at, e))
        })
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.database.busy_timeout_ms)
    }

    /// Engine parameters derived from this configuration.
    pub fn engine_config(&self) -> ConfigResult<EngineConfig> {
        self.validate()?;
        Ok(EngineConfig {
            utc_offset: self.utc_offset()?,
            sweep_at: self.sweep_at()?,
            alert_window_days: self.schedule.alert_window_days,
            upcoming_window_days: self.schedule.upcoming_window_days,
            recent_doses_limit: self.schedule.recent_doses_limit,
            max_attempts: self.registration.max_attempts,
            busy_timeout: self.busy_timeout(),
        })
    }
}
