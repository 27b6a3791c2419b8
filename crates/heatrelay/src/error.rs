//! Error types for heatrelay.
//!
//! This module defines all error types used throughout the heatrelay crate.
//! Redemption failures carry their precise cause for the security log, but
//! callers facing the public should only ever show [`Error::public_message`].

use std::path::PathBuf;
use thiserror::Error;

/// Generic text shown for any failed short-code redemption.
pub const REDEMPTION_FAILED_MESSAGE: &str =
    "The short code or token is invalid. Please check with your caregiver.";

/// Generic text shown when an operation failed for an unexpected reason.
pub const TRY_AGAIN_MESSAGE: &str = "Something went wrong. Please try again.";

/// The main error type for heatrelay operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Redemption Errors ===
    /// No active pair or link matches the short code.
    #[error("short code is invalid or no longer active")]
    InvalidShortCode,

    /// The link matched but its time-to-live has passed.
    #[error("pair link has expired")]
    LinkExpired,

    /// The link requires a companion token and none was supplied.
    #[error("pair token is required")]
    TokenMissing,

    /// The supplied token does not match the link.
    #[error("pair token does not match")]
    TokenMismatch,

    /// The link was already redeemed once.
    #[error("pair link has already been redeemed")]
    AlreadyRedeemed,

    /// Too many failed attempts from this actor.
    #[error("too many failed attempts, locked until {until}")]
    Locked {
        /// When the lock lifts.
        until: chrono::DateTime<chrono::Utc>,
    },

    // === Lifecycle Errors ===
    /// No pair exists with this id.
    #[error("pair {0} not found")]
    PairNotFound(i64),

    /// The pair exists but is no longer active.
    #[error("pair {0} is inactive")]
    PairInactive(i64),

    /// A relay stage name could not be parsed.
    #[error("unknown relay stage: {0}")]
    UnknownRelayStage(String),

    /// A risk level name could not be parsed.
    #[error("unknown risk level: {0}")]
    UnknownRiskLevel(String),

    /// Random code generation kept colliding with existing codes.
    #[error("could not generate a unique {kind} after {attempts} attempts")]
    CodeSpaceExhausted {
        /// Which kind of code was being generated.
        kind: &'static str,
        /// How many candidates were tried.
        attempts: u32,
    },

    /// Caller input was rejected before reaching storage.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Collaborator Errors ===
    /// The weather collaborator has no data for a location.
    #[error("no weather data for {location}")]
    WeatherUnavailable {
        /// Location that was asked for.
        location: String,
    },

    // === Generic Errors ===
    /// An operation timed out.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
    },

    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for heatrelay operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a new input validation error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Check if this error is a failed short-code redemption of any cause.
    #[must_use]
    pub fn is_redemption_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidShortCode
                | Self::LinkExpired
                | Self::TokenMissing
                | Self::TokenMismatch
                | Self::AlreadyRedeemed
                | Self::Locked { .. }
        )
    }

    /// Check if this error should count against the actor's lockout budget.
    ///
    /// A lockout rejection itself does not count, otherwise a locked actor
    /// would extend its own lock just by retrying.
    #[must_use]
    pub fn counts_as_failed_attempt(&self) -> bool {
        self.is_redemption_failure() && !matches!(self, Self::Locked { .. })
    }

    /// Check if this error is the lockout guard rejecting the actor.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }

    /// Short machine-readable name for the security log.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidShortCode => "invalid_short_code",
            Self::LinkExpired => "link_expired",
            Self::TokenMissing => "token_missing",
            Self::TokenMismatch => "token_mismatch",
            Self::AlreadyRedeemed => "already_redeemed",
            Self::Locked { .. } => "locked",
            Self::PairNotFound(_) => "pair_not_found",
            Self::PairInactive(_) => "pair_inactive",
            Self::UnknownRelayStage(_) => "unknown_relay_stage",
            Self::UnknownRiskLevel(_) => "unknown_risk_level",
            Self::CodeSpaceExhausted { .. } => "code_space_exhausted",
            Self::InvalidInput(_) => "invalid_input",
            Self::WeatherUnavailable { .. } => "weather_unavailable",
            Self::Timeout { .. } => "timeout",
            _ => "internal",
        }
    }

    /// The text a public-facing transport should display for this error.
    ///
    /// Every redemption failure collapses to the same message so the response
    /// never tells an attacker which half of the secret was wrong.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            _ if self.is_redemption_failure() => REDEMPTION_FAILED_MESSAGE.to_string(),
            Self::PairNotFound(_) | Self::PairInactive(_) => {
                "This pairing is no longer active.".to_string()
            }
            Self::UnknownRelayStage(_) | Self::UnknownRiskLevel(_) | Self::InvalidInput(_) => {
                self.to_string()
            }
            _ => TRY_AGAIN_MESSAGE.to_string(),
        }
    }
}
