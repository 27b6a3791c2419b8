//! Command-line interface for heatrelay.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    CareLogCommand, ConfigCommand, ConfirmCommand, EscalateCommand, HistoryCommand, LinkCommand,
    LookupCommand, MessageCommand, PairArgs, RiskCommand, SnapshotCommand, StageArg, StatsCommand,
    SweepCommand,
};

use crate::logging::Verbosity;

/// heatrelay - Daily heat-action check-ins relayed between elders and caregivers
///
/// Issues short codes that pair an elder with a caregiver, records daily
/// confirmations and help requests, escalates days nobody answered, and
/// summarizes each community's day.
#[derive(Debug, Parser)]
#[command(name = "heatrelay")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true, disable_help_subcommand = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Issue pair links
    #[command(subcommand)]
    Link(LinkCommand),

    /// Look up (and on first use, redeem) a short code
    Lookup(LookupCommand),

    /// Confirm today for a pair
    Confirm(ConfirmCommand),

    /// Raise the help flag for a pair
    Help(PairArgs),

    /// Move a pair's relay stage forward
    Escalate(EscalateCommand),

    /// Retire a pair
    Deactivate(PairArgs),

    /// Record today's caregiver follow-up
    CareLog(CareLogCommand),

    /// Show a pair's recent days
    History(HistoryCommand),

    /// Show a community's rollup
    Snapshot(SnapshotCommand),

    /// Auto-escalate overdue days
    Sweep(SweepCommand),

    /// Compose message text
    #[command(subcommand)]
    Message(MessageCommand),

    /// Score current heat risk for a location
    Risk(RiskCommand),

    /// Show database statistics
    Stats(StatsCommand),

    /// View or check configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub const fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.verbose, self.quiet)
    }
}
