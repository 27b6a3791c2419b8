//! Configuration management for heatrelay.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use chrono::FixedOffset;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::daily::RelayStage;
use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "heatrelay";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "heatrelay.db";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `HEATRELAY_`, sections split on `__`)
/// 2. TOML config file at `~/.config/heatrelay/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Secret hashing and lockout configuration.
    pub security: SecurityConfig,
    /// Pair link issuance configuration.
    pub pairing: PairingConfig,
    /// Auto-escalation configuration.
    pub escalation: EscalationConfig,
    /// Local day boundary configuration.
    pub time: TimeConfig,
    /// Weather collaborator configuration.
    pub weather: WeatherConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/heatrelay/heatrelay.db`
    pub database_path: Option<PathBuf>,
}

/// Security-related configuration.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Secret pepper appended to every hashed code, token and actor key.
    pub pepper: String,
    /// Failed redemptions before an actor is locked out.
    pub max_failures: u32,
    /// Minutes of quiet after which the failure counter resets.
    pub window_minutes: u32,
    /// Minutes an actor stays locked.
    pub lock_minutes: u32,
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("pepper", &"<redacted>")
            .field("max_failures", &self.max_failures)
            .field("window_minutes", &self.window_minutes)
            .field("lock_minutes", &self.lock_minutes)
            .finish()
    }
}

/// Pair link issuance configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// Days a freshly issued link stays redeemable.
    pub link_ttl_days: u32,
    /// Number of digits in a short code.
    pub short_code_digits: u32,
    /// Candidates tried before code generation gives up.
    pub max_code_attempts: u32,
}

/// Auto-escalation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Minutes an unconfirmed day may wait before auto-escalation.
    pub auto_escalate_after_minutes: u32,
    /// Stage that overdue days are promoted to.
    pub auto_escalate_stage: RelayStage,
    /// Seconds between sweeps when running in watch mode.
    pub sweep_interval_seconds: u64,
    /// Create today's row for every active pair before sweeping.
    pub seed_daily_rows: bool,
}

/// Local time configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    /// UTC offset of the community's local day, e.g. `+08:00`.
    pub utc_offset: String,
}

/// Weather collaborator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    /// Timeout for a single weather lookup in milliseconds.
    pub timeout_ms: u64,
    /// Daily maximum (°C) at or above which a day counts as hot.
    pub hot_day_threshold: f64,
    /// Longest hot streak the lookup will count.
    pub max_streak_days: u32,
    /// JSON file with static readings and cooling resources per location.
    pub fixture_path: Option<PathBuf>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            pepper: String::new(), // Must be supplied per deployment
            max_failures: 5,
            window_minutes: 30,
            lock_minutes: 30,
        }
    }
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            link_ttl_days: 3,
            short_code_digits: 8,
            max_code_attempts: 20,
        }
    }
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            auto_escalate_after_minutes: 120,
            auto_escalate_stage: RelayStage::Backup,
            sweep_interval_seconds: 300,
            seed_daily_rows: true,
        }
    }
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            utc_offset: "+08:00".to_string(),
        }
    }
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 3_000,
            hot_day_threshold: 35.0,
            max_streak_days: 7,
            fixture_path: None,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config = Self::extract(config_path)?;
        config.validate()?;
        Ok(config)
    }

    /// Merge all sources without validating the result.
    ///
    /// Used where a partial configuration is still worth showing.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed.
    pub fn extract(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("HEATRELAY_").split("__"));

        Ok(figment.extract()?)
    }

    /// A copy with the pepper masked, for display.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.security.pepper.is_empty() {
            copy.security.pepper = "<redacted>".to_string();
        }
        copy
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.security.pepper.trim().is_empty() {
            return Err(validation(
                "security.pepper must be set (HEATRELAY_SECURITY__PEPPER)",
            ));
        }

        if self.security.max_failures == 0 {
            return Err(validation("security.max_failures must be greater than 0"));
        }

        if self.security.window_minutes == 0 || self.security.lock_minutes == 0 {
            return Err(validation(
                "security.window_minutes and security.lock_minutes must be greater than 0",
            ));
        }

        if !(6..=12).contains(&self.pairing.short_code_digits) {
            return Err(validation(format!(
                "pairing.short_code_digits must be between 6 and 12, got {}",
                self.pairing.short_code_digits
            )));
        }

        if self.pairing.link_ttl_days == 0 || self.pairing.max_code_attempts == 0 {
            return Err(validation(
                "pairing.link_ttl_days and pairing.max_code_attempts must be greater than 0",
            ));
        }

        if self.escalation.auto_escalate_stage == RelayStage::None {
            return Err(validation(
                "escalation.auto_escalate_stage must be above 'none'",
            ));
        }

        if self.escalation.sweep_interval_seconds == 0 {
            return Err(validation(
                "escalation.sweep_interval_seconds must be greater than 0",
            ));
        }

        if self.weather.timeout_ms == 0 {
            return Err(validation("weather.timeout_ms must be greater than 0"));
        }

        self.local_offset()?;
        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Parse the configured local UTC offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the offset is not of the form `+HH:MM` / `-HH:MM`.
    pub fn local_offset(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.time.utc_offset)
    }

    /// Get the link time-to-live as a chrono duration.
    #[must_use]
    pub fn link_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.pairing.link_ttl_days))
    }

    /// Get the auto-escalation delay as a chrono duration.
    #[must_use]
    pub fn auto_escalate_after(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.escalation.auto_escalate_after_minutes))
    }

    /// Get the sweep interval as a Duration.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.escalation.sweep_interval_seconds)
    }

    /// Get the weather lookup timeout as a Duration.
    #[must_use]
    pub fn weather_timeout(&self) -> Duration {
        Duration::from_millis(self.weather.timeout_ms)
    }
}

fn validation(message: impl Into<String>) -> Error {
    Error::ConfigValidation {
        message: message.into(),
    }
}

/// Parse `+HH:MM`, `-HH:MM` or `Z` into a fixed offset.
fn parse_utc_offset(raw: &str) -> Result<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(|| Error::internal("zero offset"));
    }

    let invalid = || validation(format!("time.utc_offset is not a valid offset: {raw}"));

    let (sign, rest) = if let Some(rest) = raw.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = raw.strip_prefix('-') {
        (-1, rest)
    } else {
        return Err(invalid());
    };
    let (hours, minutes) = rest.split_once(':').ok_or_else(invalid)?;
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if !(0..=14).contains(&hours) || !(0..60).contains(&minutes) {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}
