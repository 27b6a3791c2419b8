//! Failed-attempt lockout for short-code redemption.
//!
//! Counters are keyed by the peppered hash of an actor identifier (a client
//! address, a session id, a CLI user) so the raw identifier is never stored.
//! The guard is consulted before a redemption is looked at, and a locked key
//! is refused without touching the code or token it supplied.

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use tracing::{debug, warn};

use crate::config::SecurityConfig;
use crate::error::{Error, Result};
use crate::secret::SecretHasher;
use crate::storage::attempts;

/// Stored failure counter for one actor key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortCodeAttempt {
    /// Hash of the actor identifier.
    pub key_hash: String,
    /// Failures in the current window.
    pub failed_count: u32,
    /// First failure in the current window.
    pub first_failed_at: Option<DateTime<Utc>>,
    /// Most recent failure.
    pub last_failed_at: Option<DateTime<Utc>>,
    /// The key is refused until this instant.
    pub locked_until: Option<DateTime<Utc>>,
}

impl ShortCodeAttempt {
    fn fresh(key_hash: &str) -> Self {
        Self {
            key_hash: key_hash.to_string(),
            failed_count: 0,
            first_failed_at: None,
            last_failed_at: None,
            locked_until: None,
        }
    }

    fn reset(&mut self) {
        self.failed_count = 0;
        self.first_failed_at = None;
        self.last_failed_at = None;
        self.locked_until = None;
    }

    /// Whether the key is locked at `now`.
    #[must_use]
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }
}

/// Thresholds for the lockout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// Failures within the window that trigger a lock.
    pub max_failures: u32,
    /// Quiet period after which the failure count starts over.
    pub window: Duration,
    /// How long a lock lasts.
    pub lock: Duration,
}

impl From<&SecurityConfig> for LockoutPolicy {
    fn from(config: &SecurityConfig) -> Self {
        Self {
            max_failures: config.max_failures,
            window: Duration::minutes(i64::from(config.window_minutes)),
            lock: Duration::minutes(i64::from(config.lock_minutes)),
        }
    }
}

/// Applies a [`LockoutPolicy`] to counters in storage.
#[derive(Debug, Clone)]
pub struct LockoutGuard {
    policy: LockoutPolicy,
    hasher: SecretHasher,
}

impl LockoutGuard {
    /// Create a guard.
    #[must_use]
    pub const fn new(policy: LockoutPolicy, hasher: SecretHasher) -> Self {
        Self { policy, hasher }
    }

    /// The policy in force.
    #[must_use]
    pub const fn policy(&self) -> LockoutPolicy {
        self.policy
    }

    /// Storage key for an actor identifier.
    #[must_use]
    pub fn actor_key(&self, actor: &str) -> String {
        self.hasher.hash(actor)
    }

    /// Refuse a locked key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Locked`] while a lock is in force, or an error if the
    /// database operation fails.
    pub fn check(&self, conn: &Connection, key_hash: &str, now: DateTime<Utc>) -> Result<()> {
        match attempts::find(conn, key_hash)? {
            Some(attempt) if attempt.is_locked_at(now) => Err(Error::Locked {
                until: attempt.locked_until.unwrap_or(now),
            }),
            _ => Ok(()),
        }
    }

    /// Count one failed redemption, locking the key once the threshold is hit.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn record_failure(
        &self,
        conn: &Connection,
        key_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<ShortCodeAttempt> {
        let mut attempt =
            attempts::find(conn, key_hash)?.unwrap_or_else(|| ShortCodeAttempt::fresh(key_hash));

        let lock_lapsed = attempt.locked_until.is_some_and(|until| until <= now);
        let window_lapsed = attempt
            .last_failed_at
            .is_some_and(|last| now - last > self.policy.window);
        if lock_lapsed || window_lapsed {
            attempt.reset();
        }

        attempt.failed_count = attempt.failed_count.saturating_add(1);
        attempt.first_failed_at.get_or_insert(now);
        attempt.last_failed_at = Some(now);

        if attempt.failed_count >= self.policy.max_failures {
            let until = now + self.policy.lock;
            attempt.locked_until = Some(until);
            warn!(
                failed_count = attempt.failed_count,
                %until,
                "short code attempts locked"
            );
        } else {
            debug!(failed_count = attempt.failed_count, "short code attempt failed");
        }

        attempts::upsert(conn, &attempt)?;
        Ok(attempt)
    }

    /// Forget a key's failures after a successful redemption.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn clear(&self, conn: &Connection, key_hash: &str) -> Result<()> {
        attempts::delete(conn, key_hash)?;
        Ok(())
    }
}
