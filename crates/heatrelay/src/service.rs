//! The transport-neutral service.
//!
//! [`HeatRelayService`] owns the database and every collaborator and exposes
//! the operations a presentation layer needs. Each mutating call commits as a
//! single `BEGIN IMMEDIATE` transaction, and any change to a day's status
//! recomputes the owning community's rollup inside that same transaction.
//!
//! Weather is fetched before a transaction opens, so a slow provider never
//! holds the write lock. If the provider falls back to its default payload
//! no risk snapshot is taken; the next touch that sees live data fills it in.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

use crate::audit::{SecurityAction, SecurityEvent};
use crate::clock::{local_date, Clock};
use crate::config::{Config, PairingConfig};
use crate::daily::{self, CareAction, DailyStatus, DayEntry, RelayStage, Transition};
use crate::error::{Error, Result};
use crate::lockout::{LockoutGuard, LockoutPolicy};
use crate::message;
use crate::pairing::{self, IssuedLink, Pair, Redemption};
use crate::risk::{HeatInputs, HeatRiskScorer, RiskAssessment, RiskLevel};
use crate::rollup::{self, CommunityDaily};
use crate::scheduler::{self, SweepPolicy, SweepReport};
use crate::secret::SecretHasher;
use crate::storage::{pairs, statuses, Storage};
use crate::weather::{CoolingResource, Fetched, WeatherGateway};

/// Days of history returned when the caller does not ask for a number.
pub const DEFAULT_SERIES_DAYS: u32 = 7;

/// A successful short-code lookup.
#[derive(Debug, Clone, Serialize)]
pub struct Lookup {
    /// How the pair was reached.
    pub redemption: Redemption,
    /// Today's status row, created if this was the first touch.
    pub today: DailyStatus,
}

impl Lookup {
    /// The pair that was found.
    #[must_use]
    pub const fn pair(&self) -> &Pair {
        self.redemption.pair()
    }
}

/// Conditions and score for a location.
#[derive(Debug, Clone, Serialize)]
pub struct RiskReport {
    /// Scorer inputs as fetched.
    pub inputs: HeatInputs,
    /// Whether the inputs are the default payload.
    pub fallback: bool,
    /// The score.
    pub assessment: RiskAssessment,
}

/// Pairing, daily state, escalation and rollups over one database.
#[derive(Debug)]
pub struct HeatRelayService {
    storage: Storage,
    pairing: PairingConfig,
    sweep_policy: SweepPolicy,
    hasher: SecretHasher,
    lockout: LockoutGuard,
    weather: WeatherGateway,
    scorer: HeatRiskScorer,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
}

impl HeatRelayService {
    /// Build the service from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`] if the configuration is invalid.
    pub fn new(
        storage: Storage,
        config: &Config,
        weather: WeatherGateway,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let hasher = SecretHasher::new(&config.security.pepper);
        Ok(Self {
            storage,
            pairing: config.pairing.clone(),
            sweep_policy: SweepPolicy::from(&config.escalation),
            lockout: LockoutGuard::new(LockoutPolicy::from(&config.security), hasher.clone()),
            hasher,
            weather,
            scorer: HeatRiskScorer,
            clock,
            offset: config.local_offset()?,
        })
    }

    /// The underlying storage.
    #[must_use]
    pub const fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Current instant from the injected clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// The local calendar date right now.
    #[must_use]
    pub fn today(&self) -> NaiveDate {
        local_date(self.clock.now(), self.offset)
    }

    /// Issue a new pair link for a community.
    ///
    /// # Errors
    ///
    /// Returns an error if the community is blank, the code space is
    /// exhausted, or the database operation fails.
    pub fn issue_link(&mut self, community_code: &str) -> Result<IssuedLink> {
        let now = self.clock.now();
        let tx = self.storage.transaction()?;
        let issued = pairing::issue_link(&tx, &self.hasher, &self.pairing, community_code, now)?;
        tx.commit()?;

        SecurityEvent::success(SecurityAction::ShortCodeGenerated, "pair_link", issued.link_id)
            .emit();
        info!(
            link_id = issued.link_id,
            community = %issued.community_code,
            expires_at = %issued.expires_at,
            "pair link issued"
        );
        Ok(issued)
    }

    /// Find the pair for a short code, redeeming its link if a token is given.
    ///
    /// `actor` identifies the caller for the lockout (an address or session
    /// id); only its hash is stored. A locked actor is refused before the
    /// code is looked at. Redemption, today's row and the rollup commit
    /// together or not at all. A failed attempt commits only its lockout
    /// counter and, for a lapsed link, the expiry marking.
    ///
    /// # Errors
    ///
    /// Returns a redemption error (see [`Error::is_redemption_failure`]) or an
    /// error if the database operation fails.
    pub async fn lookup_by_code(
        &mut self,
        actor: &str,
        short_code: &str,
        token: Option<&str>,
    ) -> Result<Lookup> {
        let now = self.clock.now();
        let date = local_date(now, self.offset);
        let actor_hash = self.lockout.actor_key(actor);

        let target = pairing::peek(
            self.storage.connection(),
            &self.hasher,
            &self.pairing,
            short_code,
            token,
        )?;
        let risk = match &target {
            Some(target) => {
                self.risk_snapshot(target.pair_id, &target.community_code, date)
                    .await?
            }
            None => None,
        };

        let tx = self.storage.transaction()?;
        let outcome = self.lockout.check(&tx, &actor_hash, now).and_then(|()| {
            pairing::redeem(&tx, &self.hasher, &self.pairing, short_code, token, now)
        });

        match outcome {
            Ok(redemption) => {
                self.lockout.clear(&tx, &actor_hash)?;
                let pair = redemption.pair();
                let today = daily::touch(&tx, pair, date, risk, now)?;
                rollup::recompute(&tx, &pair.community_code, date, now)?;
                tx.commit()?;

                SecurityEvent::success(SecurityAction::ShortCodeRedeemed, "pair", pair.id)
                    .by(&actor_hash)
                    .emit();
                Ok(Lookup { redemption, today })
            }
            Err(e) if e.counts_as_failed_attempt() => {
                self.lockout.record_failure(&tx, &actor_hash, now)?;
                tx.commit()?;
                SecurityEvent::failure(SecurityAction::ShortCodeFailed, "pair_link", e.kind())
                    .by(&actor_hash)
                    .emit();
                Err(e)
            }
            Err(e) => {
                drop(tx);
                if e.is_locked() {
                    SecurityEvent::failure(SecurityAction::ShortCodeFailed, "pair_link", e.kind())
                        .by(&actor_hash)
                        .emit();
                }
                Err(e)
            }
        }
    }

    /// Confirm today for a pair.
    ///
    /// Only ids from today's action plan are counted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PairNotFound`] or [`Error::PairInactive`], or an error
    /// if the database operation fails.
    pub async fn confirm<S: AsRef<str> + Sync>(
        &mut self,
        pair_id: i64,
        actions: &[S],
    ) -> Result<Transition<DailyStatus>> {
        let (date, risk) = self.prepare_day(pair_id).await?;
        self.apply(pair_id, date, |conn, pair, now| {
            let level = statuses::find(conn, pair.id, date)?
                .and_then(|s| s.risk_level)
                .or(risk);
            let done = message::known_action_ids(level, actions).len();
            daily::confirm(conn, pair, date, risk, done, now)
        })
    }

    /// Raise the help flag for today.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PairNotFound`] or [`Error::PairInactive`], or an error
    /// if the database operation fails.
    pub async fn raise_help(&mut self, pair_id: i64) -> Result<Transition<DailyStatus>> {
        let (date, risk) = self.prepare_day(pair_id).await?;
        let transition = self.apply(pair_id, date, |conn, pair, now| {
            daily::raise_help(conn, pair, date, risk, now)
        })?;
        if transition.is_applied() {
            info!(pair_id, "help requested");
        }
        Ok(transition)
    }

    /// Move today's relay stage forward, one rung when `target` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PairNotFound`] or [`Error::PairInactive`], or an error
    /// if the database operation fails.
    pub async fn escalate(
        &mut self,
        pair_id: i64,
        target: Option<RelayStage>,
    ) -> Result<Transition<DailyStatus>> {
        let (date, risk) = self.prepare_day(pair_id).await?;
        self.apply(pair_id, date, |conn, pair, now| {
            daily::escalate(conn, pair, date, risk, target, now)
        })
    }

    /// Record today's caregiver follow-up. Unknown action ids are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PairNotFound`] or [`Error::PairInactive`], or an error
    /// if the database operation fails.
    pub async fn log_caregiver_actions<S: AsRef<str> + Sync>(
        &mut self,
        pair_id: i64,
        actions: &[S],
        note: Option<&str>,
    ) -> Result<Transition<DailyStatus>> {
        let (date, risk) = self.prepare_day(pair_id).await?;
        let actions = CareAction::parse_known(actions);
        self.apply(pair_id, date, |conn, pair, now| {
            daily::log_caregiver_actions(conn, pair, date, risk, actions, note, now)
        })
    }

    /// Retire a pair and drop it from today's rollup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PairNotFound`], or an error if the database operation
    /// fails.
    pub fn deactivate_pair(&mut self, pair_id: i64) -> Result<Pair> {
        let now = self.clock.now();
        let date = local_date(now, self.offset);
        let tx = self.storage.transaction()?;
        let (pair, changed) = pairing::deactivate(&tx, pair_id)?;
        if changed {
            rollup::recompute(&tx, &pair.community_code, date, now)?;
        }
        tx.commit()?;

        if changed {
            SecurityEvent::success(SecurityAction::PairDeactivated, "pair", pair_id).emit();
        }
        Ok(pair)
    }

    /// The rollup for a community, today unless `date` is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn community_snapshot(
        &mut self,
        community_code: &str,
        date: Option<NaiveDate>,
    ) -> Result<CommunityDaily> {
        let now = self.clock.now();
        let date = date.unwrap_or_else(|| local_date(now, self.offset));
        let tx = self.storage.transaction()?;
        let snapshot = rollup::snapshot(&tx, community_code.trim(), date, now)?;
        tx.commit()?;
        Ok(snapshot)
    }

    /// The last `days` days of a pair, ending today.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PairNotFound`], or an error if the database operation
    /// fails.
    pub fn recent_series(&self, pair_id: i64, days: u32) -> Result<Vec<DayEntry>> {
        let conn = self.storage.connection();
        pairs::get(conn, pair_id)?.ok_or(Error::PairNotFound(pair_id))?;
        daily::recent_series(conn, pair_id, self.today(), days)
    }

    /// Run one escalation sweep over today.
    ///
    /// Rows the sweep seeds carry the community's risk level when live
    /// weather is available; it is fetched before the transaction opens.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails; nothing is committed.
    pub async fn sweep(&mut self) -> Result<SweepReport> {
        let now = self.clock.now();
        let date = local_date(now, self.offset);

        let mut risk = BTreeMap::new();
        if self.sweep_policy.seed_daily_rows {
            let communities: BTreeSet<String> = pairs::list_active(self.storage.connection())?
                .into_iter()
                .map(|pair| pair.community_code)
                .collect();
            for community_code in communities {
                if let Some(level) = self.live_risk(&community_code).await {
                    risk.insert(community_code, level);
                }
            }
        }

        let tx = self.storage.transaction()?;
        let report = scheduler::sweep(&tx, self.sweep_policy, &risk, date, now)?;
        tx.commit()?;
        Ok(report)
    }

    /// Score current conditions for a location.
    pub async fn assess(&self, location: &str) -> RiskReport {
        let fetched = self.weather.conditions(location).await;
        let fallback = fetched.is_fallback();
        let inputs = fetched.into_value();
        RiskReport {
            assessment: self.scorer.assess(&inputs),
            inputs,
            fallback,
        }
    }

    /// Cooling resources near a community, empty if the directory failed.
    pub async fn cooling_resources(&self, community_code: &str) -> Vec<CoolingResource> {
        self.weather
            .cooling_resources(community_code)
            .await
            .into_value()
    }

    /// Risk level to snapshot for today, if one is still needed.
    async fn risk_snapshot(
        &self,
        pair_id: Option<i64>,
        community_code: &str,
        date: NaiveDate,
    ) -> Result<Option<RiskLevel>> {
        if let Some(pair_id) = pair_id {
            if statuses::has_risk_snapshot(self.storage.connection(), pair_id, date)? {
                return Ok(None);
            }
        }
        Ok(self.live_risk(community_code).await)
    }

    async fn live_risk(&self, community_code: &str) -> Option<RiskLevel> {
        let conditions: Fetched<HeatInputs> = self.weather.conditions(community_code).await;
        let Some(inputs) = conditions.live() else {
            debug!(community = community_code, "no live weather, leaving risk snapshot empty");
            return None;
        };
        Some(self.scorer.assess(&inputs).risk_level)
    }

    async fn prepare_day(&self, pair_id: i64) -> Result<(NaiveDate, Option<RiskLevel>)> {
        let pair = pairing::require_active(self.storage.connection(), pair_id)?;
        let date = self.today();
        let risk = self
            .risk_snapshot(Some(pair.id), &pair.community_code, date)
            .await?;
        Ok((date, risk))
    }

    fn apply(
        &mut self,
        pair_id: i64,
        date: NaiveDate,
        change: impl FnOnce(&Connection, &Pair, DateTime<Utc>) -> Result<Transition<DailyStatus>>,
    ) -> Result<Transition<DailyStatus>> {
        let now = self.clock.now();
        let tx = self.storage.transaction()?;
        let pair = pairing::require_active(&tx, pair_id)?;
        let transition = change(&tx, &pair, now)?;
        if transition.is_applied() {
            rollup::recompute(&tx, &pair.community_code, date, now)?;
        }
        tx.commit()?;
        Ok(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::daily::{NoChange, Outcome};
    use crate::weather::{StaticLocation, StaticWeather, WeatherReading};
    use chrono::{Duration, TimeZone};
    use std::time::Duration as StdDuration;

    fn config() -> Config {
        let mut config = Config::default();
        config.security.pepper = "service-test-pepper".to_string();
        config
    }

    fn hot_weather() -> StaticWeather {
        StaticWeather::new(&config().weather).with_location(
            "north",
            StaticLocation {
                reading: WeatherReading {
                    temperature: Some(38.0),
                    humidity: Some(70.0),
                    temperature_max: Some(39.0),
                    temperature_min: Some(26.0),
                },
                recent_max: vec![37.0, 36.5, 35.5],
                resources: vec![CoolingResource {
                    name: "Library".to_string(),
                    address_hint: Some("Main St".to_string()),
                }],
            },
        )
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, 1, 0, 0).unwrap()
    }

    fn service() -> (HeatRelayService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let service = HeatRelayService::new(
            Storage::open_in_memory().unwrap(),
            &config(),
            WeatherGateway::from_static(hot_weather(), StdDuration::from_secs(1)),
            clock.clone(),
        )
        .unwrap();
        (service, clock)
    }

    async fn paired(service: &mut HeatRelayService) -> Pair {
        let issued = service.issue_link("north").unwrap();
        service
            .lookup_by_code("actor", &issued.short_code, Some(&issued.token))
            .await
            .unwrap()
            .pair()
            .clone()
    }

    #[test]
    fn test_rejects_missing_pepper() {
        let err = HeatRelayService::new(
            Storage::open_in_memory().unwrap(),
            &Config::default(),
            WeatherGateway::from_static(StaticWeather::default(), StdDuration::from_secs(1)),
            Arc::new(ManualClock::new(start())),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ConfigValidation { .. }));
    }

    #[tokio::test]
    async fn test_lookup_snapshots_risk() {
        let (mut service, _) = service();
        let issued = service.issue_link("north").unwrap();
        let lookup = service
            .lookup_by_code("actor", &issued.short_code, Some(&issued.token))
            .await
            .unwrap();
        assert!(matches!(lookup.redemption, Redemption::Redeemed { created: true, .. }));
        assert_eq!(lookup.today.risk_level, Some(RiskLevel::Extreme));

        let snapshot = service.community_snapshot("north", None).unwrap();
        assert_eq!(snapshot.total_people, 1);
        assert_eq!(snapshot.risk_distribution.extreme, 1);
    }

    #[tokio::test]
    async fn test_unknown_location_leaves_snapshot_empty() {
        let (mut service, _) = service();
        let issued = service.issue_link("south").unwrap();
        let lookup = service
            .lookup_by_code("actor", &issued.short_code, Some(&issued.token))
            .await
            .unwrap();
        assert_eq!(lookup.today.risk_level, None);
    }

    #[tokio::test]
    async fn test_return_visit_without_token() {
        let (mut service, _) = service();
        let issued = service.issue_link("north").unwrap();
        let first = service
            .lookup_by_code("actor", &issued.short_code, Some(&issued.token))
            .await
            .unwrap();
        let again = service
            .lookup_by_code("actor", &issued.short_code, None)
            .await
            .unwrap();
        assert!(matches!(again.redemption, Redemption::Returning { .. }));
        assert_eq!(again.pair().id, first.pair().id);
        assert_eq!(again.today.id, first.today.id);
    }

    #[tokio::test]
    async fn test_failed_attempts_are_committed() {
        let (mut service, _) = service();
        let issued = service.issue_link("north").unwrap();
        for _ in 0..5 {
            let err = service
                .lookup_by_code("actor", &issued.short_code, Some("wrong"))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::TokenMismatch));
        }
        let err = service
            .lookup_by_code("actor", &issued.short_code, Some(&issued.token))
            .await
            .unwrap_err();
        assert!(err.is_locked());
        assert_eq!(service.storage().stats().unwrap().locked_actors, 1);

        service
            .lookup_by_code("other", &issued.short_code, Some(&issued.token))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_expired_link_is_marked() {
        let (mut service, clock) = service();
        let issued = service.issue_link("north").unwrap();
        clock.advance(Duration::days(3));
        let err = service
            .lookup_by_code("actor", &issued.short_code, Some(&issued.token))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LinkExpired));
        assert_eq!(service.storage().stats().unwrap().open_links, 0);
    }

    #[tokio::test]
    async fn test_confirm_counts_known_actions() {
        let (mut service, _) = service();
        let pair = paired(&mut service).await;

        let first = service
            .confirm(pair.id, &["stay_cool", "contact_now", "made_up"])
            .await
            .unwrap();
        assert!(first.is_applied());
        assert_eq!(first.value.actions_done_count, 2);

        let second = service.confirm(pair.id, &["cooling_center"]).await.unwrap();
        assert_eq!(second.outcome, Outcome::Unchanged(NoChange::AlreadyConfirmed));
        assert_eq!(second.value.actions_done_count, 1);
        assert_eq!(second.value.confirmed_at, first.value.confirmed_at);

        let snapshot = service.community_snapshot("north", None).unwrap();
        assert_eq!(snapshot.confirmed_count, 1);
    }

    #[tokio::test]
    async fn test_help_and_escalate_update_rollup() {
        let (mut service, _) = service();
        let pair = paired(&mut service).await;

        let help = service.raise_help(pair.id).await.unwrap();
        assert_eq!(help.value.relay_stage, RelayStage::Caregiver);

        let step = service.escalate(pair.id, None).await.unwrap();
        assert_eq!(step.value.relay_stage, RelayStage::Backup);

        let back = service
            .escalate(pair.id, Some(RelayStage::Caregiver))
            .await
            .unwrap();
        assert!(!back.is_applied());
        assert_eq!(back.value.relay_stage, RelayStage::Backup);

        let snapshot = service.community_snapshot("north", None).unwrap();
        assert_eq!(snapshot.help_count, 1);
        assert_eq!(snapshot.escalation_count, 1);
    }

    #[tokio::test]
    async fn test_caregiver_log_drops_unknown_ids() {
        let (mut service, _) = service();
        let pair = paired(&mut service).await;
        let logged = service
            .log_caregiver_actions(pair.id, &["remind", "teleport"], Some("called at noon"))
            .await
            .unwrap();
        assert_eq!(logged.value.caregiver_actions, vec![CareAction::Remind]);
        assert_eq!(logged.value.caregiver_note.as_deref(), Some("called at noon"));
    }

    #[tokio::test]
    async fn test_deactivated_pair_is_refused() {
        let (mut service, _) = service();
        let pair = paired(&mut service).await;

        let retired = service.deactivate_pair(pair.id).unwrap();
        assert!(!retired.is_active());
        let err = service.confirm(pair.id, &["water"]).await.unwrap_err();
        assert!(matches!(err, Error::PairInactive(_)));

        let snapshot = service.community_snapshot("north", None).unwrap();
        assert_eq!(snapshot.total_people, 0);
        assert!(snapshot.confirm_rate.abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_recent_series_ends_today() {
        let (mut service, _) = service();
        let pair = paired(&mut service).await;
        service.confirm(pair.id, &["water"]).await.unwrap();

        let series = service.recent_series(pair.id, DEFAULT_SERIES_DAYS).unwrap();
        assert_eq!(series.len(), 7);
        let last = series.last().unwrap();
        assert_eq!(last.date, service.today());
        assert!(last.confirmed);
        assert!(!series[0].confirmed);

        assert!(matches!(
            service.recent_series(999, 7),
            Err(Error::PairNotFound(999))
        ));
    }

    #[tokio::test]
    async fn test_sweep_promotes_after_two_hours() {
        let (mut service, clock) = service();
        let pair = paired(&mut service).await;

        assert_eq!(service.sweep().await.unwrap().promoted, 0);
        clock.advance(Duration::minutes(121));
        assert_eq!(service.sweep().await.unwrap().promoted, 1);
        assert!(service.sweep().await.unwrap().is_noop());

        let status = statuses::find(service.storage().connection(), pair.id, service.today())
            .unwrap()
            .unwrap();
        assert_eq!(status.relay_stage, RelayStage::Backup);
    }

    fn fail_on(service: &HeatRelayService, event: &str) {
        service
            .storage()
            .connection()
            .execute_batch(&format!(
                "CREATE TRIGGER fail_daily BEFORE {event} ON daily_statuses \
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;"
            ))
            .unwrap();
    }

    fn heal(service: &HeatRelayService) {
        service
            .storage()
            .connection()
            .execute_batch("DROP TRIGGER fail_daily;")
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_daily_write_rolls_back_redemption() {
        let (mut service, _) = service();
        let issued = service.issue_link("north").unwrap();
        fail_on(&service, "INSERT");

        let err = service
            .lookup_by_code("actor", &issued.short_code, Some(&issued.token))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DatabaseQuery(_)));
        assert!(!err.counts_as_failed_attempt());
        assert_eq!(err.public_message(), Error::internal("x").public_message());

        let stats = service.storage().stats().unwrap();
        assert_eq!(stats.active_pairs, 0);
        assert_eq!(stats.open_links, 1);
        assert_eq!(stats.daily_rows, 0);
        assert!(
            crate::storage::community::find(service.storage().connection(), "north", service.today())
                .unwrap()
                .is_none()
        );

        heal(&service);
        let retry = service
            .lookup_by_code("actor", &issued.short_code, Some(&issued.token))
            .await
            .unwrap();
        assert!(matches!(retry.redemption, Redemption::Redeemed { created: true, .. }));
        assert_eq!(service.storage().stats().unwrap().active_pairs, 1);
    }

    #[tokio::test]
    async fn test_failed_confirm_leaves_day_untouched() {
        let (mut service, _) = service();
        let pair = paired(&mut service).await;
        let conn = service.storage().connection();
        let before = statuses::find(conn, pair.id, service.today()).unwrap().unwrap();
        let rollup_before = crate::storage::community::find(conn, "north", service.today())
            .unwrap()
            .unwrap();
        fail_on(&service, "UPDATE");

        assert!(service.confirm(pair.id, &["stay_cool"]).await.is_err());

        let conn = service.storage().connection();
        let after = statuses::find(conn, pair.id, service.today()).unwrap().unwrap();
        assert_eq!(after, before);
        assert_eq!(after.confirmed_at, None);
        let rollup_after = crate::storage::community::find(conn, "north", service.today())
            .unwrap()
            .unwrap();
        assert_eq!(rollup_after, rollup_before);
        assert_eq!(rollup_after.confirmed_count, 0);
    }

    #[tokio::test]
    async fn test_sweep_seeds_with_live_risk() {
        let (mut service, clock) = service();
        let pair = paired(&mut service).await;
        clock.advance(Duration::days(1));

        let report = service.sweep().await.unwrap();
        assert_eq!(report.seeded, 1);
        let seeded = statuses::find(service.storage().connection(), pair.id, service.today())
            .unwrap()
            .unwrap();
        assert_eq!(seeded.risk_level, Some(RiskLevel::Extreme));

        let snapshot = service.community_snapshot("north", None).unwrap();
        assert_eq!(snapshot.risk_distribution.extreme, 1);
    }

    #[tokio::test]
    async fn test_assess_reports_fallback() {
        let (service, _) = service();
        let live = service.assess("north").await;
        assert!(!live.fallback);
        assert_eq!(live.assessment.risk_level, RiskLevel::Extreme);

        let unknown = service.assess("nowhere").await;
        assert!(unknown.fallback);
        assert_eq!(unknown.assessment.risk_level, RiskLevel::Low);
    }
}
