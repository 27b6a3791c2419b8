//! Per-pair, per-day action state.
//!
//! A [`DailyStatus`] row is created lazily the first time a pair is touched on
//! a local calendar day. After that it only ever moves forward: confirmation
//! and help are sticky, and the relay stage climbs the escalation ladder one
//! way. Requests that would move state backwards come back as
//! [`Outcome::Unchanged`] rather than as errors.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::pairing::Pair;
use crate::risk::RiskLevel;
use crate::storage::statuses;

/// Longest caregiver note kept, in characters.
pub const MAX_CAREGIVER_NOTE_CHARS: usize = 300;

/// How far an unconfirmed day has been escalated.
///
/// Variants are declared in ladder order so the derived `Ord` is the rank.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RelayStage {
    /// Nobody has been alerted.
    #[default]
    None,
    /// The paired caregiver.
    Caregiver,
    /// A backup contact.
    Backup,
    /// Community workers.
    Community,
    /// Emergency services.
    Emergency,
}

impl RelayStage {
    /// Every stage, lowest first.
    pub const ALL: [Self; 5] = [
        Self::None,
        Self::Caregiver,
        Self::Backup,
        Self::Community,
        Self::Emergency,
    ];

    /// Position on the ladder, starting at 0.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Caregiver => 1,
            Self::Backup => 2,
            Self::Community => 3,
            Self::Emergency => 4,
        }
    }

    /// Stored and displayed name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Caregiver => "caregiver",
            Self::Backup => "backup",
            Self::Community => "community",
            Self::Emergency => "emergency",
        }
    }

    /// The next rung up, or `None` at the top of the ladder.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::None => Some(Self::Caregiver),
            Self::Caregiver => Some(Self::Backup),
            Self::Backup => Some(Self::Community),
            Self::Community => Some(Self::Emergency),
            Self::Emergency => None,
        }
    }

    /// Stages strictly below `self`.
    #[must_use]
    pub fn below(self) -> Vec<Self> {
        Self::ALL.into_iter().filter(|s| *s < self).collect()
    }

    /// Whether the day counts as escalated in community rollups.
    #[must_use]
    pub fn is_escalated(self) -> bool {
        self >= Self::Backup
    }
}

impl fmt::Display for RelayStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelayStage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == needle)
            .ok_or_else(|| Error::UnknownRelayStage(s.to_string()))
    }
}

impl ToSql for RelayStage {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for RelayStage {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: Error| FromSqlError::Other(Box::new(e)))
    }
}

/// Follow-up a caregiver can record against a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CareAction {
    /// Phoned or messaged a reminder.
    Remind,
    /// Asked a neighbor to check in.
    Neighbor,
    /// Contacted the community office.
    Community,
}

impl CareAction {
    /// Every recognised action.
    pub const ALL: [Self; 3] = [Self::Remind, Self::Neighbor, Self::Community];

    /// Stable identifier used in storage and on the CLI.
    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::Remind => "remind",
            Self::Neighbor => "neighbor",
            Self::Community => "community",
        }
    }

    /// Human-readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Remind => "Reminder sent",
            Self::Neighbor => "Neighbor asked to check in",
            Self::Community => "Community office contacted",
        }
    }

    /// Parse a list of ids, silently dropping unknown ones and duplicates.
    #[must_use]
    pub fn parse_known<S: AsRef<str>>(ids: &[S]) -> Vec<Self> {
        let mut actions = Vec::new();
        for id in ids {
            let id = id.as_ref().trim();
            if let Some(action) = Self::ALL.into_iter().find(|a| a.id() == id) {
                if !actions.contains(&action) {
                    actions.push(action);
                }
            } else {
                debug!(id, "ignoring unknown caregiver action");
            }
        }
        actions
    }
}

/// One pair's state for one local calendar day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyStatus {
    /// Row id.
    pub id: i64,
    /// Owning pair.
    pub pair_id: i64,
    /// Local calendar date.
    pub status_date: NaiveDate,
    /// Community of the pair when the row was created.
    pub community_code: String,
    /// Risk level captured on first touch.
    pub risk_level: Option<RiskLevel>,
    /// When the individual first responded.
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Help was requested today.
    pub help_flag: bool,
    /// Current escalation rung.
    pub relay_stage: RelayStage,
    /// Number of action-plan items reported done.
    pub actions_done_count: u32,
    /// Caregiver follow-ups recorded today.
    pub caregiver_actions: Vec<CareAction>,
    /// Free-text caregiver note.
    pub caregiver_note: Option<String>,
    /// Row creation time; the auto-escalation clock starts here.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl DailyStatus {
    /// A fresh, untouched row for `pair` on `date`.
    #[must_use]
    pub fn new(
        pair: &Pair,
        status_date: NaiveDate,
        risk_level: Option<RiskLevel>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            pair_id: pair.id,
            status_date,
            community_code: pair.community_code.clone(),
            risk_level,
            confirmed_at: None,
            help_flag: false,
            relay_stage: RelayStage::None,
            actions_done_count: 0,
            caregiver_actions: Vec::new(),
            caregiver_note: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the individual has responded today.
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.confirmed_at.is_some()
    }
}

/// Why a request left state as it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NoChange {
    /// `confirmed_at` was already set; only the action count moved.
    AlreadyConfirmed,
    /// Help had already been raised today.
    HelpAlreadyRaised,
    /// The requested stage is not above the current one.
    StageNotHigher {
        /// Stage before the request.
        current: RelayStage,
        /// Stage that was asked for.
        requested: RelayStage,
    },
    /// There is no rung above the current stage.
    AtTopStage,
}

impl fmt::Display for NoChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyConfirmed => f.write_str("already confirmed today"),
            Self::HelpAlreadyRaised => f.write_str("help already raised today"),
            Self::StageNotHigher { current, requested } => {
                write!(f, "relay stage {current} is already at or above {requested}")
            }
            Self::AtTopStage => f.write_str("relay stage is already at the top of the ladder"),
        }
    }
}

/// Whether a request changed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// State moved forward.
    Applied,
    /// Informational no-op.
    Unchanged(NoChange),
}

/// A value together with whether producing it changed anything.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition<T> {
    /// Resulting value.
    pub value: T,
    /// What happened.
    pub outcome: Outcome,
}

impl<T> Transition<T> {
    /// The request took effect.
    pub const fn applied(value: T) -> Self {
        Self {
            value,
            outcome: Outcome::Applied,
        }
    }

    /// The request was a no-op.
    pub const fn unchanged(value: T, reason: NoChange) -> Self {
        Self {
            value,
            outcome: Outcome::Unchanged(reason),
        }
    }

    /// Whether state moved.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self.outcome, Outcome::Applied)
    }

    /// Map the carried value, keeping the outcome.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Transition<U> {
        Transition {
            value: f(self.value),
            outcome: self.outcome,
        }
    }
}

/// One day of a pair's recent history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayEntry {
    /// Local date.
    pub date: NaiveDate,
    /// Snapshot risk level, if a row exists and captured one.
    pub risk_level: Option<RiskLevel>,
    /// Whether the individual responded that day.
    pub confirmed: bool,
}

/// Today's row for `pair`, created on first touch.
///
/// An existing row only has its risk level filled in if it was still empty;
/// a snapshot, once taken, is kept for the rest of the day.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn touch(
    conn: &Connection,
    pair: &Pair,
    date: NaiveDate,
    risk: Option<RiskLevel>,
    now: DateTime<Utc>,
) -> Result<DailyStatus> {
    if let Some(mut status) = statuses::find(conn, pair.id, date)? {
        if status.risk_level.is_none() && risk.is_some() {
            status.risk_level = risk;
            status.updated_at = now;
            statuses::save(conn, &status)?;
        }
        return Ok(status);
    }

    let mut status = DailyStatus::new(pair, date, risk, now);
    status.id = statuses::insert(conn, &status)?;
    debug!(pair_id = pair.id, %date, "created daily status");
    Ok(status)
}

/// Record that the individual has responded and how many actions they took.
///
/// The action count always follows the latest report; `confirmed_at` is
/// written once and never cleared.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn confirm(
    conn: &Connection,
    pair: &Pair,
    date: NaiveDate,
    risk: Option<RiskLevel>,
    actions_done: usize,
    now: DateTime<Utc>,
) -> Result<Transition<DailyStatus>> {
    let mut status = touch(conn, pair, date, risk, now)?;
    status.actions_done_count = u32::try_from(actions_done).unwrap_or(u32::MAX);
    status.updated_at = now;

    let first = status.confirmed_at.is_none();
    if first {
        status.confirmed_at = Some(now);
    }
    statuses::save(conn, &status)?;

    if first {
        Ok(Transition::applied(status))
    } else {
        Ok(Transition::unchanged(status, NoChange::AlreadyConfirmed))
    }
}

/// Raise the help flag.
///
/// Asking for help is a response, so `confirmed_at` is set if it was empty,
/// and the relay moves to at least the caregiver.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn raise_help(
    conn: &Connection,
    pair: &Pair,
    date: NaiveDate,
    risk: Option<RiskLevel>,
    now: DateTime<Utc>,
) -> Result<Transition<DailyStatus>> {
    let mut status = touch(conn, pair, date, risk, now)?;
    if status.help_flag {
        return Ok(Transition::unchanged(status, NoChange::HelpAlreadyRaised));
    }

    status.help_flag = true;
    if status.confirmed_at.is_none() {
        status.confirmed_at = Some(now);
    }
    status.relay_stage = status.relay_stage.max(RelayStage::Caregiver);
    status.updated_at = now;
    statuses::save(conn, &status)?;
    Ok(Transition::applied(status))
}

/// Move the relay to `target`, or one rung up when no target is given.
///
/// Equal or lower targets, and stepping past the top, are informational
/// no-ops.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn escalate(
    conn: &Connection,
    pair: &Pair,
    date: NaiveDate,
    risk: Option<RiskLevel>,
    target: Option<RelayStage>,
    now: DateTime<Utc>,
) -> Result<Transition<DailyStatus>> {
    let mut status = touch(conn, pair, date, risk, now)?;
    let current = status.relay_stage;

    let next = match target {
        Some(requested) if requested <= current => {
            return Ok(Transition::unchanged(
                status,
                NoChange::StageNotHigher { current, requested },
            ));
        }
        Some(requested) => requested,
        None => match current.next() {
            Some(next) => next,
            None => return Ok(Transition::unchanged(status, NoChange::AtTopStage)),
        },
    };

    status.relay_stage = next;
    status.updated_at = now;
    statuses::save(conn, &status)?;
    debug!(pair_id = pair.id, from = %current, to = %next, "relay stage advanced");
    Ok(Transition::applied(status))
}

/// Replace today's caregiver follow-up record.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn log_caregiver_actions(
    conn: &Connection,
    pair: &Pair,
    date: NaiveDate,
    risk: Option<RiskLevel>,
    actions: Vec<CareAction>,
    note: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Transition<DailyStatus>> {
    let mut status = touch(conn, pair, date, risk, now)?;
    status.caregiver_actions = actions;
    status.caregiver_note = note
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(|n| n.chars().take(MAX_CAREGIVER_NOTE_CHARS).collect());
    status.updated_at = now;
    statuses::save(conn, &status)?;
    Ok(Transition::applied(status))
}

/// The `days` days ending at `end`, oldest first.
///
/// Days without a row are reported as unconfirmed with no risk level.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn recent_series(
    conn: &Connection,
    pair_id: i64,
    end: NaiveDate,
    days: u32,
) -> Result<Vec<DayEntry>> {
    if days == 0 {
        return Ok(Vec::new());
    }
    let start = end - chrono::Duration::days(i64::from(days) - 1);
    let rows = statuses::range(conn, pair_id, start, end)?;

    Ok(start
        .iter_days()
        .take_while(|d| *d <= end)
        .map(|date| {
            let row = rows.iter().find(|s| s.status_date == date);
            DayEntry {
                date,
                risk_level: row.and_then(|s| s.risk_level),
                confirmed: row.is_some_and(DailyStatus::is_confirmed),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{pairs, Storage};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, 2, 0, 0).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 1).unwrap()
    }

    fn setup() -> (Storage, Pair) {
        let storage = Storage::open_in_memory().unwrap();
        let pair = pairs::insert(storage.connection(), "hash-a", "elder-a", "harbor", now()).unwrap();
        (storage, pair)
    }

    #[test]
    fn test_relay_stage_order_and_rank() {
        for window in RelayStage::ALL.windows(2) {
            assert!(window[0] < window[1]);
            assert_eq!(window[0].rank() + 1, window[1].rank());
            assert_eq!(window[0].next(), Some(window[1]));
        }
        assert_eq!(RelayStage::Emergency.next(), None);
    }

    #[test]
    fn test_relay_stage_parse() {
        assert_eq!("backup".parse::<RelayStage>().unwrap(), RelayStage::Backup);
        assert_eq!(" Community ".parse::<RelayStage>().unwrap(), RelayStage::Community);
        assert!(matches!(
            "police".parse::<RelayStage>(),
            Err(Error::UnknownRelayStage(_))
        ));
    }

    #[test]
    fn test_relay_stage_below() {
        assert_eq!(
            RelayStage::Backup.below(),
            vec![RelayStage::None, RelayStage::Caregiver]
        );
        assert!(RelayStage::None.below().is_empty());
        assert!(!RelayStage::Caregiver.is_escalated());
        assert!(RelayStage::Backup.is_escalated());
    }

    #[test]
    fn test_care_action_parse_known() {
        let actions = CareAction::parse_known(&["remind", "bogus", "neighbor", "remind"]);
        assert_eq!(actions, vec![CareAction::Remind, CareAction::Neighbor]);
    }

    #[test]
    fn test_touch_creates_once() {
        let (storage, pair) = setup();
        let conn = storage.connection();

        let first = touch(conn, &pair, today(), Some(RiskLevel::High), now()).unwrap();
        let second = touch(conn, &pair, today(), Some(RiskLevel::Low), now()).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.risk_level, Some(RiskLevel::High));
    }

    #[test]
    fn test_touch_fills_missing_snapshot() {
        let (storage, pair) = setup();
        let conn = storage.connection();

        touch(conn, &pair, today(), None, now()).unwrap();
        let filled = touch(conn, &pair, today(), Some(RiskLevel::Medium), now()).unwrap();
        assert_eq!(filled.risk_level, Some(RiskLevel::Medium));
    }

    #[test]
    fn test_confirm_is_idempotent() {
        let (storage, pair) = setup();
        let conn = storage.connection();

        let first = confirm(conn, &pair, today(), None, 2, now()).unwrap();
        assert!(first.is_applied());
        let stamp = first.value.confirmed_at;

        let later = now() + Duration::minutes(30);
        let second = confirm(conn, &pair, today(), None, 3, later).unwrap();
        assert_eq!(second.outcome, Outcome::Unchanged(NoChange::AlreadyConfirmed));
        assert_eq!(second.value.confirmed_at, stamp);
        assert_eq!(second.value.actions_done_count, 3);
    }

    #[test]
    fn test_raise_help_moves_to_caregiver() {
        let (storage, pair) = setup();
        let conn = storage.connection();

        let result = raise_help(conn, &pair, today(), None, now()).unwrap();
        assert!(result.is_applied());
        assert!(result.value.help_flag);
        assert!(result.value.confirmed_at.is_some());
        assert_eq!(result.value.relay_stage, RelayStage::Caregiver);

        let again = raise_help(conn, &pair, today(), None, now()).unwrap();
        assert_eq!(again.outcome, Outcome::Unchanged(NoChange::HelpAlreadyRaised));
    }

    #[test]
    fn test_raise_help_keeps_higher_stage() {
        let (storage, pair) = setup();
        let conn = storage.connection();

        escalate(conn, &pair, today(), None, Some(RelayStage::Community), now()).unwrap();
        let result = raise_help(conn, &pair, today(), None, now()).unwrap();
        assert_eq!(result.value.relay_stage, RelayStage::Community);
    }

    #[test]
    fn test_escalate_never_decreases() {
        let (storage, pair) = setup();
        let conn = storage.connection();

        let up = escalate(conn, &pair, today(), None, Some(RelayStage::Backup), now()).unwrap();
        assert!(up.is_applied());

        for requested in [RelayStage::None, RelayStage::Caregiver, RelayStage::Backup] {
            let result = escalate(conn, &pair, today(), None, Some(requested), now()).unwrap();
            assert_eq!(
                result.outcome,
                Outcome::Unchanged(NoChange::StageNotHigher {
                    current: RelayStage::Backup,
                    requested,
                })
            );
            assert_eq!(result.value.relay_stage, RelayStage::Backup);
        }
    }

    #[test]
    fn test_escalate_steps_one_rung() {
        let (storage, pair) = setup();
        let conn = storage.connection();

        for expected in &RelayStage::ALL[1..] {
            let result = escalate(conn, &pair, today(), None, None, now()).unwrap();
            assert_eq!(result.value.relay_stage, *expected);
        }
        let top = escalate(conn, &pair, today(), None, None, now()).unwrap();
        assert_eq!(top.outcome, Outcome::Unchanged(NoChange::AtTopStage));
    }

    #[test]
    fn test_log_caregiver_actions_truncates_note() {
        let (storage, pair) = setup();
        let conn = storage.connection();
        let note = "x".repeat(400);

        let result = log_caregiver_actions(
            conn,
            &pair,
            today(),
            None,
            vec![CareAction::Remind],
            Some(&note),
            now(),
        )
        .unwrap();
        assert_eq!(result.value.caregiver_actions, vec![CareAction::Remind]);
        assert_eq!(
            result.value.caregiver_note.as_deref().map(str::len),
            Some(MAX_CAREGIVER_NOTE_CHARS)
        );

        let stored = statuses::find(conn, pair.id, today()).unwrap().unwrap();
        assert_eq!(stored.caregiver_actions, vec![CareAction::Remind]);
    }

    #[test]
    fn test_recent_series_fills_gaps() {
        let (storage, pair) = setup();
        let conn = storage.connection();
        let yesterday = today() - Duration::days(1);

        confirm(conn, &pair, yesterday, Some(RiskLevel::High), 1, now()).unwrap();
        touch(conn, &pair, today(), Some(RiskLevel::Low), now()).unwrap();

        let series = recent_series(conn, pair.id, today(), 7).unwrap();
        assert_eq!(series.len(), 7);
        assert_eq!(series[6].date, today());
        assert!(!series[6].confirmed);
        assert_eq!(series[5].risk_level, Some(RiskLevel::High));
        assert!(series[5].confirmed);
        assert!(series[0].risk_level.is_none());

        assert!(recent_series(conn, pair.id, today(), 0).unwrap().is_empty());
    }
}
