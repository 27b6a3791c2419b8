//! CLI command definitions.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Subcommand, ValueEnum};

use crate::daily::RelayStage;

/// Pair link commands.
#[derive(Debug, Subcommand)]
pub enum LinkCommand {
    /// Issue a new short code and token for a community
    Issue {
        /// Community code the link belongs to
        community: String,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },
}

/// Lookup command arguments.
#[derive(Debug, Args)]
pub struct LookupCommand {
    /// Short code, spaces and dashes allowed
    pub code: String,

    /// Companion token; needed the first time a link is used
    #[arg(short, long)]
    pub token: Option<String>,

    /// Identifier the lockout counts failures against
    #[arg(long, default_value = "cli")]
    pub actor: String,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Arguments for commands that act on one pair.
#[derive(Debug, Args)]
pub struct PairArgs {
    /// Pair id
    pub pair_id: i64,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Confirm command arguments.
#[derive(Debug, Args)]
pub struct ConfirmCommand {
    /// Pair id
    pub pair_id: i64,

    /// Action id from today's plan that was done (repeatable)
    #[arg(short, long = "action", value_name = "ID")]
    pub actions: Vec<String>,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Escalate command arguments.
#[derive(Debug, Args)]
pub struct EscalateCommand {
    /// Pair id
    pub pair_id: i64,

    /// Stage to move to; one rung up if omitted
    #[arg(long, value_enum)]
    pub to: Option<StageArg>,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Caregiver follow-up arguments.
#[derive(Debug, Args)]
pub struct CareLogCommand {
    /// Pair id
    pub pair_id: i64,

    /// Follow-up done: remind, neighbor or community (repeatable)
    #[arg(short, long = "action", value_name = "ID")]
    pub actions: Vec<String>,

    /// Free-text note
    #[arg(short, long)]
    pub note: Option<String>,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// History command arguments.
#[derive(Debug, Args)]
pub struct HistoryCommand {
    /// Pair id
    pub pair_id: i64,

    /// Number of days ending today
    #[arg(short, long, default_value = "7")]
    pub days: u32,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Snapshot command arguments.
#[derive(Debug, Args)]
pub struct SnapshotCommand {
    /// Community code
    pub community: String,

    /// Local date (YYYY-MM-DD); today if omitted
    #[arg(short, long)]
    pub date: Option<NaiveDate>,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Sweep command arguments.
#[derive(Debug, Args)]
pub struct SweepCommand {
    /// Keep sweeping until interrupted
    #[arg(short, long)]
    pub watch: bool,

    /// Seconds between sweeps in watch mode; from config if omitted
    #[arg(short, long)]
    pub interval: Option<u64>,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Message text commands.
#[derive(Debug, Subcommand)]
pub enum MessageCommand {
    /// Reminder for a caregiver to forward
    Caregiver {
        /// Community code
        community: String,

        /// Short code to include
        #[arg(long)]
        code: Option<String>,

        /// Action page link to include
        #[arg(long)]
        link: Option<String>,
    },

    /// Notice for community staff
    Community {
        /// Community code
        community: String,

        /// Action page link to include
        #[arg(long)]
        link: Option<String>,
    },
}

/// Risk command arguments.
#[derive(Debug, Args)]
pub struct RiskCommand {
    /// Location to score
    pub location: String,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Stats command arguments.
#[derive(Debug, Args)]
pub struct StatsCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration (pepper masked)
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Relay stage an escalation may target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StageArg {
    /// The paired caregiver
    Caregiver,
    /// A backup contact
    Backup,
    /// Community staff
    Community,
    /// Emergency services
    Emergency,
}

impl From<StageArg> for RelayStage {
    fn from(arg: StageArg) -> Self {
        match arg {
            StageArg::Caregiver => Self::Caregiver,
            StageArg::Backup => Self::Backup,
            StageArg::Community => Self::Community,
            StageArg::Emergency => Self::Emergency,
        }
    }
}
