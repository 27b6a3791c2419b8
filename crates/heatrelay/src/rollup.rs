//! Per-community, per-day aggregates.
//!
//! A [`CommunityDaily`] is derived entirely from the active pairs and daily
//! statuses of one community on one date. It is rebuilt from scratch on every
//! trigger and upserted, so whichever writer commits last leaves a record that
//! matches the rows it saw.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::daily::DailyStatus;
use crate::error::Result;
use crate::risk::RiskLevel;
use crate::storage::{community, pairs, statuses};

/// Most outreach suggestions returned at once.
pub const MAX_SUGGESTIONS: usize = 3;

/// Count of a day's statuses per snapshot risk level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskDistribution {
    /// Low risk.
    pub low: u32,
    /// Medium risk.
    pub medium: u32,
    /// High risk.
    pub high: u32,
    /// Extreme risk.
    pub extreme: u32,
}

impl RiskDistribution {
    /// Count one status at `level`.
    pub fn record(&mut self, level: RiskLevel) {
        let bucket = match level {
            RiskLevel::Low => &mut self.low,
            RiskLevel::Medium => &mut self.medium,
            RiskLevel::High => &mut self.high,
            RiskLevel::Extreme => &mut self.extreme,
        };
        *bucket += 1;
    }

    /// Count at `level`.
    #[must_use]
    pub const fn get(&self, level: RiskLevel) -> u32 {
        match level {
            RiskLevel::Low => self.low,
            RiskLevel::Medium => self.medium,
            RiskLevel::High => self.high,
            RiskLevel::Extreme => self.extreme,
        }
    }

    /// Statuses at high risk or above.
    #[must_use]
    pub const fn high_or_above(&self) -> u32 {
        self.high + self.extreme
    }
}

/// Aggregate for one community on one date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommunityDaily {
    /// Community.
    pub community_code: String,
    /// Local date.
    pub date: NaiveDate,
    /// Active pairs in the community.
    pub total_people: u32,
    /// Statuses with a confirmation.
    pub confirmed_count: u32,
    /// Statuses with help raised.
    pub help_count: u32,
    /// Statuses escalated to backup or beyond.
    pub escalation_count: u32,
    /// Active pairs not yet confirmed.
    pub pending_count: u32,
    /// `confirmed_count / total_people`, 0 when there is nobody.
    pub confirm_rate: f64,
    /// `escalation_count / total_people`, 0 when there is nobody.
    pub escalation_rate: f64,
    /// `help_count / total_people`, 0 when there is nobody.
    pub help_rate: f64,
    /// Statuses per snapshot risk level.
    pub risk_distribution: RiskDistribution,
    /// One-line status for community workers.
    pub outreach_summary: String,
    /// When the record was computed.
    pub updated_at: DateTime<Utc>,
}

impl CommunityDaily {
    /// Build the aggregate from the active pair count and the day's statuses.
    #[must_use]
    pub fn compute(
        community_code: &str,
        date: NaiveDate,
        total_people: u32,
        day: &[DailyStatus],
        now: DateTime<Utc>,
    ) -> Self {
        let mut confirmed_count = 0;
        let mut help_count = 0;
        let mut escalation_count = 0;
        let mut risk_distribution = RiskDistribution::default();

        for status in day {
            if status.is_confirmed() {
                confirmed_count += 1;
            }
            if status.help_flag {
                help_count += 1;
            }
            if status.relay_stage.is_escalated() {
                escalation_count += 1;
            }
            if let Some(level) = status.risk_level {
                risk_distribution.record(level);
            }
        }

        let pending_count = total_people.saturating_sub(confirmed_count);
        Self {
            community_code: community_code.to_string(),
            date,
            total_people,
            confirmed_count,
            help_count,
            escalation_count,
            pending_count,
            confirm_rate: rate(confirmed_count, total_people),
            escalation_rate: rate(escalation_count, total_people),
            help_rate: rate(help_count, total_people),
            risk_distribution,
            outreach_summary: summarize(total_people, pending_count, help_count, escalation_count),
            updated_at: now,
        }
    }

    /// Up to [`MAX_SUGGESTIONS`] prioritized outreach lines.
    #[must_use]
    pub fn outreach_suggestions(&self) -> Vec<String> {
        if self.total_people == 0 {
            return vec!["Finish short-code pairing first to build the outreach list.".to_string()];
        }

        let dist = &self.risk_distribution;
        let mut lines = Vec::new();
        if self.pending_count > 0 {
            lines.push(format!(
                "{} households have not confirmed yet; contact high-risk ones first.",
                self.pending_count
            ));
        }
        if dist.extreme > 0 {
            lines.push(format!(
                "{} households at extreme risk; confirm with them today.",
                dist.extreme
            ));
        }
        if dist.high_or_above() > 0 {
            lines.push(format!(
                "{} households at high risk or above; visit or call today.",
                dist.high_or_above()
            ));
        }
        if self.escalation_count > 0 {
            lines.push(
                "The relay chain has been triggered; assign community staff and log progress."
                    .to_string(),
            );
        }
        if self.help_count > 0 {
            lines.push("Some households asked for help; handle them first and follow up.".to_string());
        }
        if lines.is_empty() {
            lines.push(
                "Confirmation rate is good; keep watching the weather and action completion."
                    .to_string(),
            );
        }
        lines.truncate(MAX_SUGGESTIONS);
        lines
    }
}

/// `part / whole` rounded to 4 decimals and capped at 1, or 0 for an empty whole.
fn rate(part: u32, whole: u32) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    let value = (f64::from(part) / f64::from(whole)).min(1.0);
    (value * 10_000.0).round() / 10_000.0
}

fn summarize(total: u32, pending: u32, help: u32, escalated: u32) -> String {
    if total == 0 {
        "No action data available yet.".to_string()
    } else if escalated > 0 {
        format!("{escalated} households are in the relay chain; arrange community follow-up first.")
    } else if help > 0 {
        format!("{help} households asked for help; contact them as soon as possible.")
    } else if pending > 0 {
        format!("{pending} households have not confirmed; send reminders in batches.")
    } else {
        "All households have confirmed; keep watching the heat.".to_string()
    }
}

/// Rebuild and store the rollup for a community and date.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn recompute(
    conn: &Connection,
    community_code: &str,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<CommunityDaily> {
    let total_people = pairs::count_active_in(conn, community_code)?;
    let day = statuses::for_community(conn, community_code, date)?;
    let record = CommunityDaily::compute(community_code, date, total_people, &day, now);
    community::upsert(conn, &record)?;
    Ok(record)
}

/// The stored rollup, computing and storing it first if there is none.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn snapshot(
    conn: &Connection,
    community_code: &str,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<CommunityDaily> {
    match community::find(conn, community_code, date)? {
        Some(record) => Ok(record),
        None => recompute(conn, community_code, date, now),
    }
}
