//! Weather, hot-streak and cooling-resource collaborators.
//!
//! These sit outside the core and may be slow or down. Every call goes
//! through [`WeatherGateway`], which bounds it with a timeout and turns any
//! failure into a [`Fetched::Fallback`] carrying a default value, so the
//! caller can carry on and still tell that a default was used.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::WeatherConfig;
use crate::error::{Error, Result};
use crate::risk::HeatInputs;

/// Current conditions for one location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherReading {
    /// Ambient temperature (°C).
    pub temperature: Option<f64>,
    /// Relative humidity (%).
    pub humidity: Option<f64>,
    /// Today's forecast maximum (°C).
    pub temperature_max: Option<f64>,
    /// Today's forecast minimum (°C).
    pub temperature_min: Option<f64>,
}

impl WeatherReading {
    /// Payload used when the provider cannot answer.
    pub const FALLBACK: Self = Self {
        temperature: Some(20.0),
        humidity: Some(60.0),
        temperature_max: Some(25.0),
        temperature_min: Some(15.0),
    };

    /// Scorer inputs for this reading and a hot streak.
    #[must_use]
    pub fn heat_inputs(&self, hot_streak: u32) -> HeatInputs {
        HeatInputs {
            temperature: self.temperature,
            humidity: self.humidity,
            night_min: self.temperature_min,
            hot_streak,
        }
    }
}

/// A place people can go to cool down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoolingResource {
    /// Display name.
    pub name: String,
    /// Short directions.
    #[serde(default)]
    pub address_hint: Option<String>,
}

impl fmt::Display for CoolingResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.address_hint {
            Some(hint) => write!(f, "{} ({hint})", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Source of current weather.
#[async_trait::async_trait]
pub trait WeatherProvider: Send + Sync + fmt::Debug {
    /// Current conditions at `location`.
    ///
    /// # Errors
    ///
    /// Returns an error if no reading is available.
    async fn current_weather(&self, location: &str) -> Result<WeatherReading>;
}

/// Source of consecutive hot-day counts.
#[async_trait::async_trait]
pub trait HotStreakSource: Send + Sync + fmt::Debug {
    /// Hot days in a row ending today, given today's maximum.
    ///
    /// # Errors
    ///
    /// Returns an error if the history is unavailable.
    async fn consecutive_hot_days(&self, location: &str, today_max: Option<f64>) -> Result<u32>;
}

/// Directory of cooling resources per community.
#[async_trait::async_trait]
pub trait CoolingResourceDirectory: Send + Sync + fmt::Debug {
    /// Resources listed for `community_code`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory is unavailable.
    async fn resources(&self, community_code: &str) -> Result<Vec<CoolingResource>>;
}

/// A collaborator answer, or the default used in its place.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<T> {
    /// The collaborator answered.
    Live(T),
    /// The collaborator failed or timed out; `value` is a default.
    Fallback {
        /// Default value used instead.
        value: T,
        /// What went wrong.
        reason: String,
    },
}

impl<T> Fetched<T> {
    /// The value, live or default.
    pub const fn value(&self) -> &T {
        match self {
            Self::Live(value) | Self::Fallback { value, .. } => value,
        }
    }

    /// Take the value, live or default.
    pub fn into_value(self) -> T {
        match self {
            Self::Live(value) | Self::Fallback { value, .. } => value,
        }
    }

    /// Whether a default was used.
    pub const fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }

    /// The live value only.
    pub fn live(self) -> Option<T> {
        match self {
            Self::Live(value) => Some(value),
            Self::Fallback { .. } => None,
        }
    }
}

/// Timeout-bounded access to all three collaborators.
#[derive(Debug, Clone)]
pub struct WeatherGateway {
    provider: Arc<dyn WeatherProvider>,
    streaks: Arc<dyn HotStreakSource>,
    directory: Arc<dyn CoolingResourceDirectory>,
    timeout: Duration,
}

impl WeatherGateway {
    /// Create a gateway over separate collaborators.
    #[must_use]
    pub fn new(
        provider: Arc<dyn WeatherProvider>,
        streaks: Arc<dyn HotStreakSource>,
        directory: Arc<dyn CoolingResourceDirectory>,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            streaks,
            directory,
            timeout,
        }
    }

    /// Create a gateway where one [`StaticWeather`] plays every role.
    #[must_use]
    pub fn from_static(weather: StaticWeather, timeout: Duration) -> Self {
        let weather = Arc::new(weather);
        Self::new(weather.clone(), weather.clone(), weather, timeout)
    }

    /// Current conditions, or [`WeatherReading::FALLBACK`].
    pub async fn current_weather(&self, location: &str) -> Fetched<WeatherReading> {
        match bounded(self.timeout, "weather lookup", self.provider.current_weather(location)).await
        {
            Ok(reading) => Fetched::Live(reading),
            Err(e) => {
                warn!(location, error = %e, "weather unavailable, using default payload");
                Fetched::Fallback {
                    value: WeatherReading::FALLBACK,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Scorer inputs for `location`.
    ///
    /// Falls back if either the reading or the hot streak could not be
    /// fetched; a missing streak counts as zero.
    pub async fn conditions(&self, location: &str) -> Fetched<HeatInputs> {
        let reading = self.current_weather(location).await;
        let today_max = reading.value().temperature_max;

        let streak = bounded(
            self.timeout,
            "hot streak lookup",
            self.streaks.consecutive_hot_days(location, today_max),
        )
        .await;

        match (reading, streak) {
            (Fetched::Live(reading), Ok(days)) => Fetched::Live(reading.heat_inputs(days)),
            (Fetched::Live(reading), Err(e)) => {
                warn!(location, error = %e, "hot streak unavailable, counting zero");
                Fetched::Fallback {
                    value: reading.heat_inputs(0),
                    reason: e.to_string(),
                }
            }
            (Fetched::Fallback { value, reason }, streak) => Fetched::Fallback {
                value: value.heat_inputs(streak.unwrap_or(0)),
                reason,
            },
        }
    }

    /// Cooling resources for a community, or none.
    pub async fn cooling_resources(&self, community_code: &str) -> Fetched<Vec<CoolingResource>> {
        match bounded(
            self.timeout,
            "cooling resource lookup",
            self.directory.resources(community_code),
        )
        .await
        {
            Ok(resources) => Fetched::Live(resources),
            Err(e) => {
                warn!(community_code, error = %e, "cooling resources unavailable");
                Fetched::Fallback {
                    value: Vec::new(),
                    reason: e.to_string(),
                }
            }
        }
    }
}

async fn bounded<T>(
    timeout: Duration,
    operation: &str,
    fut: impl Future<Output = Result<T>> + Send,
) -> Result<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| Error::Timeout {
            operation: operation.to_string(),
        })?
}

/// Fixed readings for one location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticLocation {
    /// Current conditions.
    #[serde(flatten)]
    pub reading: WeatherReading,
    /// Daily maxima before today, most recent first.
    pub recent_max: Vec<f64>,
    /// Cooling resources in this community.
    pub resources: Vec<CoolingResource>,
}

/// In-memory collaborator backed by fixed data.
///
/// Loaded from a JSON fixture for the CLI, or built directly in tests:
///
/// ```json
/// { "locations": { "harbor": { "temperature": 38, "humidity": 70,
///   "temperature_max": 39, "temperature_min": 26,
///   "recent_max": [37, 36, 36],
///   "resources": [{ "name": "Library", "address_hint": "Main St" }] } } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticWeather {
    /// Data per location.
    pub locations: HashMap<String, StaticLocation>,
    /// Daily maximum at or above which a day counts as hot.
    #[serde(skip)]
    pub hot_day_threshold: f64,
    /// Longest streak counted.
    #[serde(skip)]
    pub max_streak_days: u32,
}

impl Default for StaticWeather {
    fn default() -> Self {
        let defaults = WeatherConfig::default();
        Self {
            locations: HashMap::new(),
            hot_day_threshold: defaults.hot_day_threshold,
            max_streak_days: defaults.max_streak_days,
        }
    }
}

impl StaticWeather {
    /// Empty data with thresholds from `config`.
    #[must_use]
    pub fn new(config: &WeatherConfig) -> Self {
        Self {
            locations: HashMap::new(),
            hot_day_threshold: config.hot_day_threshold,
            max_streak_days: config.max_streak_days,
        }
    }

    /// Load locations from a JSON fixture, with thresholds from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path, config: &WeatherConfig) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut weather: Self = serde_json::from_str(&raw)?;
        weather.hot_day_threshold = config.hot_day_threshold;
        weather.max_streak_days = config.max_streak_days;
        Ok(weather)
    }

    /// Add or replace a location.
    #[must_use]
    pub fn with_location(mut self, name: impl Into<String>, location: StaticLocation) -> Self {
        self.locations.insert(name.into(), location);
        self
    }

    fn location(&self, name: &str) -> Result<&StaticLocation> {
        self.locations
            .get(name.trim())
            .ok_or_else(|| Error::WeatherUnavailable {
                location: name.to_string(),
            })
    }

    /// Hot days in a row ending today.
    ///
    /// Zero if today is not hot. Otherwise today plus each earlier hot day
    /// until the first cool one, capped at `max_streak_days`.
    #[must_use]
    pub fn streak(&self, today_max: Option<f64>, recent_max: &[f64]) -> u32 {
        let Some(today_max) = today_max else {
            return 0;
        };
        if today_max < self.hot_day_threshold || self.max_streak_days == 0 {
            return 0;
        }
        let lookback = self.max_streak_days.saturating_sub(1) as usize;
        let earlier = recent_max
            .iter()
            .take(lookback)
            .take_while(|max| **max >= self.hot_day_threshold)
            .count();
        1 + u32::try_from(earlier).unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl WeatherProvider for StaticWeather {
    async fn current_weather(&self, location: &str) -> Result<WeatherReading> {
        Ok(self.location(location)?.reading)
    }
}

#[async_trait::async_trait]
impl HotStreakSource for StaticWeather {
    async fn consecutive_hot_days(&self, location: &str, today_max: Option<f64>) -> Result<u32> {
        let recent = self
            .locations
            .get(location.trim())
            .map(|l| l.recent_max.as_slice())
            .unwrap_or_default();
        Ok(self.streak(today_max, recent))
    }
}

#[async_trait::async_trait]
impl CoolingResourceDirectory for StaticWeather {
    async fn resources(&self, community_code: &str) -> Result<Vec<CoolingResource>> {
        Ok(self
            .locations
            .get(community_code.trim())
            .map(|l| l.resources.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heatwave() -> StaticLocation {
        StaticLocation {
            reading: WeatherReading {
                temperature: Some(38.0),
                humidity: Some(70.0),
                temperature_max: Some(39.0),
                temperature_min: Some(26.0),
            },
            recent_max: vec![37.0, 36.0, 35.0, 30.0, 36.0],
            resources: vec![CoolingResource {
                name: "Library".to_string(),
                address_hint: Some("Main St".to_string()),
            }],
        }
    }

    #[derive(Debug)]
    struct SlowProvider;

    #[async_trait::async_trait]
    impl WeatherProvider for SlowProvider {
        async fn current_weather(&self, _location: &str) -> Result<WeatherReading> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(WeatherReading::default())
        }
    }

    #[test]
    fn test_streak_counts_back_to_first_cool_day() {
        let weather = StaticWeather::default();
        assert_eq!(weather.streak(Some(39.0), &[37.0, 36.0, 35.0, 30.0, 36.0]), 4);
        assert_eq!(weather.streak(Some(34.9), &[37.0, 36.0]), 0);
        assert_eq!(weather.streak(None, &[37.0]), 0);
        assert_eq!(weather.streak(Some(35.0), &[]), 1);
    }

    #[test]
    fn test_streak_is_capped() {
        let weather = StaticWeather::default();
        let history = vec![40.0; 30];
        assert_eq!(weather.streak(Some(40.0), &history), 7);
    }

    #[test]
    fn test_resource_display() {
        let resource = heatwave().resources.remove(0);
        assert_eq!(resource.to_string(), "Library (Main St)");
        let bare = CoolingResource {
            name: "Pool".to_string(),
            address_hint: None,
        };
        assert_eq!(bare.to_string(), "Pool");
    }

    #[test]
    fn test_load_fixture() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("weather.json");
        std::fs::write(
            &path,
            r#"{"locations": {"harbor": {"temperature": 38, "humidity": 70,
                "temperature_max": 39, "temperature_min": 26, "recent_max": [36]}}}"#,
        )
        .unwrap();

        let config = WeatherConfig::default();
        let weather = StaticWeather::load(&path, &config).unwrap();
        let harbor = &weather.locations["harbor"];
        assert_eq!(harbor.reading.temperature, Some(38.0));
        assert_eq!(harbor.recent_max, vec![36.0]);
        assert!(harbor.resources.is_empty());
        assert_eq!(weather.max_streak_days, 7);
    }

    #[tokio::test]
    async fn test_conditions_live() {
        let weather = StaticWeather::default().with_location("harbor", heatwave());
        let gateway = WeatherGateway::from_static(weather, Duration::from_secs(1));

        let fetched = gateway.conditions("harbor").await;
        assert!(!fetched.is_fallback());
        let inputs = fetched.into_value();
        assert_eq!(inputs.temperature, Some(38.0));
        assert_eq!(inputs.night_min, Some(26.0));
        assert_eq!(inputs.hot_streak, 4);
    }

    #[tokio::test]
    async fn test_unknown_location_falls_back() {
        let gateway = WeatherGateway::from_static(StaticWeather::default(), Duration::from_secs(1));

        let fetched = gateway.current_weather("nowhere").await;
        match fetched {
            Fetched::Fallback { value, reason } => {
                assert_eq!(value, WeatherReading::FALLBACK);
                assert!(reason.contains("nowhere"));
            }
            Fetched::Live(_) => panic!("expected fallback"),
        }

        let resources = gateway.cooling_resources("nowhere").await;
        assert!(!resources.is_fallback());
        assert!(resources.into_value().is_empty());
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let directory = Arc::new(StaticWeather::default());
        let gateway = WeatherGateway::new(
            Arc::new(SlowProvider),
            directory.clone(),
            directory,
            Duration::from_millis(100),
        );

        let fetched = gateway.conditions("harbor").await;
        let Fetched::Fallback { value, reason } = fetched else {
            panic!("expected fallback");
        };
        assert!(reason.contains("timed out"));
        assert_eq!(value.temperature, Some(20.0));
        assert_eq!(value.night_min, Some(15.0));
        assert_eq!(value.hot_streak, 0);
    }
}
