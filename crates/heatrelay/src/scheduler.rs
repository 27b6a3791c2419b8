//! Auto-escalation sweep.
//!
//! A sweep looks at one local day. It can first make sure every active pair
//! has a row for that day, then promotes rows that are still unconfirmed
//! after the configured wait. Each promotion is a conditional UPDATE, so
//! overlapping sweeps from several workers promote a row at most once and a
//! repeated sweep finds nothing to do.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::EscalationConfig;
use crate::daily::{DailyStatus, RelayStage};
use crate::error::Result;
use crate::risk::RiskLevel;
use crate::rollup;
use crate::service::HeatRelayService;
use crate::storage::{pairs, statuses};

/// When and how far overdue days are promoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepPolicy {
    /// Wait after a row's creation before it counts as overdue.
    pub after: Duration,
    /// Stage overdue rows are promoted to.
    pub target: RelayStage,
    /// Create missing rows for active pairs before promoting.
    pub seed_daily_rows: bool,
}

impl From<&EscalationConfig> for SweepPolicy {
    fn from(config: &EscalationConfig) -> Self {
        Self {
            after: Duration::minutes(i64::from(config.auto_escalate_after_minutes)),
            target: config.auto_escalate_stage,
            seed_daily_rows: config.seed_daily_rows,
        }
    }
}

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Rows created for pairs that had none.
    pub seeded: usize,
    /// Rows promoted by this sweep.
    pub promoted: usize,
    /// Communities whose rollup was recomputed.
    pub communities: Vec<String>,
}

impl SweepReport {
    /// Whether the sweep changed anything.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.seeded == 0 && self.promoted == 0
    }
}

/// Run one sweep over `date`.
///
/// Seeded rows take their risk level from `risk`, keyed by community code;
/// communities missing from it are seeded without one.
///
/// # Errors
///
/// Returns an error if a database operation fails.
pub fn sweep(
    conn: &Connection,
    policy: SweepPolicy,
    risk: &BTreeMap<String, RiskLevel>,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<SweepReport> {
    let mut touched = BTreeSet::new();
    let mut report = SweepReport::default();

    if policy.seed_daily_rows {
        for pair in pairs::list_active(conn)? {
            let level = risk.get(&pair.community_code).copied();
            let status = DailyStatus::new(&pair, date, level, now);
            if statuses::insert_if_absent(conn, &status)? {
                report.seeded += 1;
                touched.insert(pair.community_code);
            }
        }
    }

    let cutoff = now - policy.after;
    for (id, community_code) in statuses::overdue(conn, date, cutoff, policy.target)? {
        if statuses::promote_if_below(conn, id, policy.target, now)? {
            debug!(status_id = id, stage = %policy.target, "auto-escalated");
            report.promoted += 1;
            touched.insert(community_code);
        }
    }

    for community_code in &touched {
        rollup::recompute(conn, community_code, date, now)?;
    }
    report.communities = touched.into_iter().collect();
    Ok(report)
}

/// Sweep every `every` until `shutdown` resolves.
///
/// A failed sweep is logged and the loop keeps going.
pub async fn run(
    service: &mut HeatRelayService,
    every: StdDuration,
    shutdown: impl Future<Output = ()>,
) {
    let mut tick = interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    info!(interval_secs = every.as_secs(), "escalation sweeper started");
    loop {
        tokio::select! {
            _ = tick.tick() => {
                match service.sweep().await {
                    Ok(report) if report.is_noop() => debug!("sweep found nothing to do"),
                    Ok(report) => info!(
                        seeded = report.seeded,
                        promoted = report.promoted,
                        communities = report.communities.len(),
                        "sweep finished"
                    ),
                    Err(e) => error!(error = %e, "sweep failed"),
                }
            }
            () = &mut shutdown => {
                info!("escalation sweeper stopping");
                break;
            }
        }
    }
}
