//! Heat risk scoring.
//!
//! Converts ambient temperature, humidity, the overnight minimum and the
//! current hot-day streak into a `0..=100` score, a four-level
//! [`RiskLevel`], and a per-factor breakdown for display.

use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Weight of the heat-index factor.
pub const HEAT_INDEX_WEIGHT: f64 = 0.5;
/// Weight of the overnight-minimum factor.
pub const NIGHT_MIN_WEIGHT: f64 = 0.3;
/// Weight of the hot-streak factor.
pub const HOT_STREAK_WEIGHT: f64 = 0.2;

/// Heat index (°C) normalization range.
const HEAT_INDEX_RANGE: (f64, f64) = (30.0, 42.0);
/// Overnight minimum (°C) normalization range.
const NIGHT_MIN_RANGE: (f64, f64) = (24.0, 30.0);
/// Hot streak (days) normalization range.
const HOT_STREAK_RANGE: (f64, f64) = (1.0, 5.0);

/// Coarse heat risk level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Score below 35.
    Low,
    /// Score from 35.
    Medium,
    /// Score from 55.
    High,
    /// Score from 75.
    Extreme,
}

impl RiskLevel {
    /// Every level, lowest first.
    pub const ALL: [RiskLevel; 4] = [Self::Low, Self::Medium, Self::High, Self::Extreme];

    /// Map a `0..=100` score onto a level.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 75.0 {
            Self::Extreme
        } else if score >= 55.0 {
            Self::High
        } else if score >= 35.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// Stored and serialized name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Extreme => "extreme",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| Error::UnknownRiskLevel(s.to_string()))
    }
}

impl ToSql for RiskLevel {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for RiskLevel {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: Error| FromSqlError::Other(Box::new(e)))
    }
}

/// Weather inputs for one location and day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HeatInputs {
    /// Ambient temperature (°C).
    pub temperature: Option<f64>,
    /// Relative humidity (%).
    pub humidity: Option<f64>,
    /// Overnight minimum temperature (°C). Falls back to `temperature`.
    pub night_min: Option<f64>,
    /// Consecutive hot days including today.
    pub hot_streak: u32,
}

/// Which input a factor score came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    /// Combined temperature and humidity.
    HeatIndex,
    /// Overnight minimum temperature.
    NightMin,
    /// Consecutive hot days.
    HotStreak,
}

impl Factor {
    /// Human-readable label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::HeatIndex => "Feels-like heat",
            Self::NightMin => "Overnight low",
            Self::HotStreak => "Consecutive hot days",
        }
    }
}

/// One normalized, weighted factor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorScore {
    /// The factor.
    pub factor: Factor,
    /// Raw input value, if known.
    pub value: Option<f64>,
    /// Normalized score in `[0, 1]`.
    pub score: f64,
    /// Weight applied to `score`.
    pub weight: f64,
}

impl FactorScore {
    /// `score * weight`.
    #[must_use]
    pub fn weighted(&self) -> f64 {
        self.score * self.weight
    }

    /// Display string for the raw value.
    #[must_use]
    pub fn display_value(&self) -> String {
        match (self.factor, self.value) {
            (_, None) => "--".to_string(),
            (Factor::HotStreak, Some(days)) => format!("{days:.0} days"),
            (_, Some(celsius)) => format!("{celsius:.1}°C"),
        }
    }
}

/// Result of scoring one set of inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Coarse level.
    pub risk_level: RiskLevel,
    /// Score in `[0, 100]`, one decimal.
    pub risk_score: f64,
    /// Heat index used, one decimal.
    pub heat_index: Option<f64>,
    /// Overnight minimum used.
    pub night_min: Option<f64>,
    /// Hot streak used.
    pub hot_streak: u32,
    /// Per-factor scores in fixed order.
    pub factors: Vec<FactorScore>,
}

/// A factor's share of the total score, in whole percent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorShare {
    /// The factor.
    pub factor: Factor,
    /// Display label.
    pub label: String,
    /// Display value.
    pub value: String,
    /// Share of the total; all shares sum to exactly 100.
    pub percent: u32,
}

/// Stateless heat risk scorer.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeatRiskScorer;

impl HeatRiskScorer {
    /// Score a set of weather inputs.
    #[must_use]
    pub fn assess(&self, inputs: &HeatInputs) -> RiskAssessment {
        let heat_index = heat_index_c(inputs.temperature, inputs.humidity);
        let night_min = inputs.night_min.or(inputs.temperature);

        let factors = vec![
            FactorScore {
                factor: Factor::HeatIndex,
                value: heat_index,
                score: heat_index.map_or(0.0, |v| normalize(v, HEAT_INDEX_RANGE)),
                weight: HEAT_INDEX_WEIGHT,
            },
            FactorScore {
                factor: Factor::NightMin,
                value: night_min,
                score: night_min.map_or(0.0, |v| normalize(v, NIGHT_MIN_RANGE)),
                weight: NIGHT_MIN_WEIGHT,
            },
            FactorScore {
                factor: Factor::HotStreak,
                value: Some(f64::from(inputs.hot_streak)),
                score: normalize(f64::from(inputs.hot_streak), HOT_STREAK_RANGE),
                weight: HOT_STREAK_WEIGHT,
            },
        ];

        let weighted_sum: f64 = factors.iter().map(FactorScore::weighted).sum();
        let risk_score = round_to((weighted_sum * 100.0).clamp(0.0, 100.0), 1);

        RiskAssessment {
            risk_level: RiskLevel::from_score(risk_score),
            risk_score,
            heat_index,
            night_min,
            hot_streak: inputs.hot_streak,
            factors,
        }
    }

    /// Each factor's contribution as whole percentages summing to 100.
    ///
    /// Rounding remainder goes to the largest share. With no contribution at
    /// all, the first factor takes the full 100.
    #[must_use]
    pub fn breakdown(&self, assessment: &RiskAssessment) -> Vec<FactorShare> {
        if assessment.factors.is_empty() {
            return Vec::new();
        }

        let weighted: Vec<f64> = assessment
            .factors
            .iter()
            .map(FactorScore::weighted)
            .collect();
        let total: f64 = weighted.iter().sum();
        let total = if total > 0.0 { total } else { 1.0 };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let mut percents: Vec<i64> = weighted
            .iter()
            .map(|w| (w / total * 100.0).round().max(0.0) as i64)
            .collect();

        let diff = 100 - percents.iter().sum::<i64>();
        let dominant = percents
            .iter()
            .enumerate()
            .fold(0, |best, (i, p)| if *p > percents[best] { i } else { best });
        percents[dominant] = (percents[dominant] + diff).max(0);

        assessment
            .factors
            .iter()
            .zip(percents)
            .map(|(factor, percent)| FactorShare {
                factor: factor.factor,
                label: factor.factor.label().to_string(),
                value: factor.display_value(),
                percent: u32::try_from(percent).unwrap_or(0),
            })
            .collect()
    }
}

/// Bio-meteorological heat index in °C, rounded to one decimal.
///
/// Degrades to the raw temperature when humidity is unknown.
#[must_use]
pub fn heat_index_c(temperature: Option<f64>, humidity: Option<f64>) -> Option<f64> {
    let t = temperature?;
    let Some(r) = humidity else {
        return Some(t);
    };
    let hi = -8.784_695 + 1.611_394_11 * t + 2.338_549 * r
        - 0.146_116_05 * t * r
        - 0.012_308_094 * t * t
        - 0.016_424_828 * r * r
        + 0.002_211_732 * t * t * r
        + 0.000_725_46 * t * r * r
        - 0.000_003_582 * t * t * r * r;
    Some(round_to(hi, 1))
}

fn normalize(value: f64, (low, high): (f64, f64)) -> f64 {
    ((value - low) / (high - low)).clamp(0.0, 1.0)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(temperature: f64, humidity: f64, night_min: f64, hot_streak: u32) -> HeatInputs {
        HeatInputs {
            temperature: Some(temperature),
            humidity: Some(humidity),
            night_min: Some(night_min),
            hot_streak,
        }
    }

    #[test]
    fn test_extreme_scenario() {
        let assessment = HeatRiskScorer.assess(&inputs(38.0, 70.0, 26.0, 4));
        assert_eq!(assessment.risk_level, RiskLevel::Extreme);
        assert!((assessment.risk_score - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_mild_day_is_low() {
        let assessment = HeatRiskScorer.assess(&inputs(24.0, 50.0, 18.0, 0));
        assert_eq!(assessment.risk_level, RiskLevel::Low);
        assert!(assessment.risk_score.abs() < f64::EPSILON);
    }

    #[test]
    fn test_level_thresholds() {
        assert_eq!(RiskLevel::from_score(34.9), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(35.0), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(55.0), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(75.0), RiskLevel::Extreme);
        assert_eq!(RiskLevel::from_score(100.0), RiskLevel::Extreme);
    }

    #[test]
    fn test_heat_index_without_humidity_is_temperature() {
        assert_eq!(heat_index_c(Some(33.3), None), Some(33.3));
        assert_eq!(heat_index_c(None, Some(80.0)), None);
    }

    #[test]
    fn test_night_min_falls_back_to_temperature() {
        let assessment = HeatRiskScorer.assess(&HeatInputs {
            temperature: Some(27.0),
            humidity: None,
            night_min: None,
            hot_streak: 1,
        });
        assert_eq!(assessment.night_min, Some(27.0));
        let night = &assessment.factors[1];
        assert!((night.score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_missing_everything_scores_zero() {
        let assessment = HeatRiskScorer.assess(&HeatInputs::default());
        assert_eq!(assessment.risk_level, RiskLevel::Low);
        assert!(assessment.heat_index.is_none());
        assert!(assessment.factors.iter().all(|f| f.score.abs() < f64::EPSILON));
    }

    #[test]
    fn test_scores_are_clamped() {
        let assessment = HeatRiskScorer.assess(&inputs(50.0, 90.0, 35.0, 30));
        assert!((assessment.risk_score - 100.0).abs() < f64::EPSILON);
        for factor in &assessment.factors {
            assert!((0.0..=1.0).contains(&factor.score));
        }
    }

    #[test]
    fn test_breakdown_sums_to_100() {
        let cases = [
            inputs(38.0, 70.0, 26.0, 4),
            inputs(31.0, 40.0, 25.0, 2),
            inputs(33.0, 55.0, 29.0, 1),
            inputs(20.0, 30.0, 10.0, 0),
            inputs(36.0, 60.0, 24.5, 3),
        ];
        for case in &cases {
            let assessment = HeatRiskScorer.assess(case);
            let shares = HeatRiskScorer.breakdown(&assessment);
            assert_eq!(shares.len(), 3);
            assert_eq!(shares.iter().map(|s| s.percent).sum::<u32>(), 100, "{case:?}");
        }
    }

    #[test]
    fn test_breakdown_all_zero_goes_to_first_factor() {
        let assessment = HeatRiskScorer.assess(&inputs(20.0, 30.0, 10.0, 0));
        let shares = HeatRiskScorer.breakdown(&assessment);
        assert_eq!(shares[0].percent, 100);
        assert_eq!(shares[0].factor, Factor::HeatIndex);
    }

    #[test]
    fn test_breakdown_labels_and_values() {
        let assessment = HeatRiskScorer.assess(&inputs(38.0, 70.0, 26.0, 4));
        let shares = HeatRiskScorer.breakdown(&assessment);
        assert_eq!(shares[1].value, "26.0°C");
        assert_eq!(shares[2].value, "4 days");
    }

    #[test]
    fn test_risk_level_round_trips_through_str() {
        for level in RiskLevel::ALL {
            assert_eq!(level.as_str().parse::<RiskLevel>().unwrap(), level);
        }
        assert!("scorching".parse::<RiskLevel>().is_err());
    }
}
