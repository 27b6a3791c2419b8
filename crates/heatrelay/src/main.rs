//! `heatrelay` - CLI for the heat-action relay
//!
//! Every command opens the configured database, runs one service operation
//! and prints the result, as text or with `--json`.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use serde::Serialize;

use heatrelay::cli::{
    CareLogCommand, Cli, Command, ConfigCommand, ConfirmCommand, EscalateCommand,
    HistoryCommand, LinkCommand, LookupCommand, MessageCommand, PairArgs, RiskCommand,
    SnapshotCommand, SweepCommand,
};
use heatrelay::daily::{DailyStatus, Outcome, Transition};
use heatrelay::message::{action_plan, caregiver_message, community_message};
use heatrelay::{
    init_logging, scheduler, Config, Error, HeatRelayService, StaticWeather, Storage,
    SystemClock, WeatherGateway,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbosity());
    let path = cli.config;

    match cli.command {
        Command::Config(cmd) => handle_config(path, cmd),
        Command::Link(LinkCommand::Issue { community, json }) => {
            let (_, mut service) = connect(path)?;
            handle_link_issue(&mut service, &community, json)
        }
        Command::Lookup(cmd) => {
            let (_, mut service) = connect(path)?;
            handle_lookup(&mut service, cmd).await
        }
        Command::Confirm(cmd) => {
            let (_, mut service) = connect(path)?;
            handle_confirm(&mut service, cmd).await
        }
        Command::Help(PairArgs { pair_id, json }) => {
            let (_, mut service) = connect(path)?;
            let transition = service.raise_help(pair_id).await.map_err(public)?;
            print_transition("help", &transition, json)
        }
        Command::Escalate(cmd) => {
            let (_, mut service) = connect(path)?;
            handle_escalate(&mut service, cmd).await
        }
        Command::Deactivate(PairArgs { pair_id, json }) => {
            let (_, mut service) = connect(path)?;
            let pair = service.deactivate_pair(pair_id).map_err(public)?;
            if json {
                print_json(&pair)
            } else {
                println!("Pair {} ({}) is now inactive.", pair.id, pair.elder_code);
                Ok(())
            }
        }
        Command::CareLog(cmd) => {
            let (_, mut service) = connect(path)?;
            handle_care_log(&mut service, cmd).await
        }
        Command::History(cmd) => {
            let (_, service) = connect(path)?;
            handle_history(&service, &cmd)
        }
        Command::Snapshot(cmd) => {
            let (_, mut service) = connect(path)?;
            handle_snapshot(&mut service, cmd)
        }
        Command::Sweep(cmd) => {
            let (config, mut service) = connect(path)?;
            handle_sweep(&mut service, &config, &cmd).await
        }
        Command::Message(cmd) => {
            let (_, service) = connect(path)?;
            handle_message(&service, cmd).await
        }
        Command::Risk(cmd) => {
            let (_, service) = connect(path)?;
            handle_risk(&service, &cmd).await
        }
        Command::Stats(cmd) => {
            let (_, service) = connect(path)?;
            handle_stats(&service, cmd.json)
        }
    }
}

/// Load and validate configuration, then open the service it describes.
fn connect(path: Option<PathBuf>) -> anyhow::Result<(Config, HeatRelayService)> {
    let config = Config::load_from(path)?;
    let storage = Storage::open(config.database_path())
        .with_context(|| format!("opening {}", config.database_path().display()))?;
    let weather = match &config.weather.fixture_path {
        Some(fixture) => StaticWeather::load(fixture, &config.weather)
            .with_context(|| format!("loading weather fixture {}", fixture.display()))?,
        None => StaticWeather::new(&config.weather),
    };
    let gateway = WeatherGateway::from_static(weather, config.weather_timeout());
    let service = HeatRelayService::new(storage, &config, gateway, Arc::new(SystemClock))?;
    Ok((config, service))
}

/// Swap the detailed error for the text a caller is allowed to see.
fn public(err: Error) -> anyhow::Error {
    tracing::debug!(kind = err.kind(), "operation failed");
    anyhow!(err.public_message())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_status(status: &DailyStatus) {
    println!("Pair:        {}", status.pair_id);
    println!("Date:        {}", status.status_date);
    println!(
        "Risk:        {}",
        status.risk_level.map_or("unknown", |level| level.as_str())
    );
    println!(
        "Confirmed:   {}",
        status
            .confirmed_at
            .map_or_else(|| "no".to_string(), |at| at.to_rfc3339())
    );
    println!("Actions:     {}", status.actions_done_count);
    println!("Help:        {}", if status.help_flag { "yes" } else { "no" });
    println!("Relay stage: {}", status.relay_stage);
}

fn print_transition(
    what: &str,
    transition: &Transition<DailyStatus>,
    json: bool,
) -> anyhow::Result<()> {
    if json {
        return print_json(transition);
    }
    match transition.outcome {
        Outcome::Applied => println!("{what}: recorded"),
        Outcome::Unchanged(reason) => println!("{what}: no change ({reason})"),
    }
    print_status(&transition.value);
    Ok(())
}

fn handle_stats(service: &HeatRelayService, json: bool) -> anyhow::Result<()> {
    let stats = service.storage().stats()?;
    if json {
        return print_json(&stats);
    }
    println!("heatrelay stats");
    println!("---------------");
    println!("Database:        {}", service.storage().path().display());
    println!("Active pairs:    {}", stats.active_pairs);
    println!("Inactive pairs:  {}", stats.inactive_pairs);
    println!("Open links:      {}", stats.open_links);
    println!("Daily rows:      {}", stats.daily_rows);
    println!("Locked actors:   {}", stats.locked_actors);
    println!("Size (bytes):    {}", stats.db_size_bytes);
    Ok(())
}

fn handle_link_issue(
    service: &mut HeatRelayService,
    community: &str,
    json: bool,
) -> anyhow::Result<()> {
    let issued = service.issue_link(community)?;
    if json {
        return print_json(&issued);
    }
    println!("Short code: {}", issued.short_code);
    println!("Token:      {}", issued.token);
    println!("Community:  {}", issued.community_code);
    println!("Expires:    {}", issued.expires_at.to_rfc3339());
    println!();
    println!("The code and token are shown once and are not stored.");
    Ok(())
}

async fn handle_lookup(service: &mut HeatRelayService, cmd: LookupCommand) -> anyhow::Result<()> {
    let lookup = service
        .lookup_by_code(&cmd.actor, &cmd.code, cmd.token.as_deref())
        .await
        .map_err(public)?;
    if cmd.json {
        return print_json(&lookup);
    }
    let pair = lookup.pair();
    println!("Pair:        {} ({})", pair.id, pair.elder_code);
    println!("Community:   {}", pair.community_code);
    print_status(&lookup.today);
    println!();
    println!("Today's actions:");
    for item in action_plan(lookup.today.risk_level) {
        println!("  [{}] {}: {}", item.id, item.title, item.detail);
    }
    Ok(())
}

async fn handle_confirm(service: &mut HeatRelayService, cmd: ConfirmCommand) -> anyhow::Result<()> {
    let transition = service
        .confirm(cmd.pair_id, &cmd.actions)
        .await
        .map_err(public)?;
    print_transition("confirm", &transition, cmd.json)
}

async fn handle_escalate(
    service: &mut HeatRelayService,
    cmd: EscalateCommand,
) -> anyhow::Result<()> {
    let transition = service
        .escalate(cmd.pair_id, cmd.to.map(Into::into))
        .await
        .map_err(public)?;
    print_transition("escalate", &transition, cmd.json)
}

async fn handle_care_log(
    service: &mut HeatRelayService,
    cmd: CareLogCommand,
) -> anyhow::Result<()> {
    let transition = service
        .log_caregiver_actions(cmd.pair_id, &cmd.actions, cmd.note.as_deref())
        .await
        .map_err(public)?;
    if cmd.json {
        return print_json(&transition);
    }
    let status = &transition.value;
    let ids: Vec<_> = status.caregiver_actions.iter().map(|a| a.id()).collect();
    println!("Caregiver follow-up for pair {} on {}", status.pair_id, status.status_date);
    println!("Actions: {}", if ids.is_empty() { "-".to_string() } else { ids.join(", ") });
    if let Some(note) = &status.caregiver_note {
        println!("Note:    {note}");
    }
    Ok(())
}

fn handle_history(service: &HeatRelayService, cmd: &HistoryCommand) -> anyhow::Result<()> {
    let series = service
        .recent_series(cmd.pair_id, cmd.days)
        .map_err(public)?;
    if cmd.json {
        return print_json(&series);
    }
    for day in &series {
        println!(
            "{}  {:<8}  {}",
            day.date,
            day.risk_level.map_or("-", |level| level.as_str()),
            if day.confirmed { "confirmed" } else { "-" }
        );
    }
    Ok(())
}

fn handle_snapshot(service: &mut HeatRelayService, cmd: SnapshotCommand) -> anyhow::Result<()> {
    let snapshot = service.community_snapshot(&cmd.community, cmd.date)?;
    if cmd.json {
        #[derive(Serialize)]
        struct Output<'a> {
            #[serde(flatten)]
            snapshot: &'a heatrelay::CommunityDaily,
            suggestions: Vec<String>,
        }
        return print_json(&Output {
            suggestions: snapshot.outreach_suggestions(),
            snapshot: &snapshot,
        });
    }

    let dist = &snapshot.risk_distribution;
    println!("Community {} on {}", snapshot.community_code, snapshot.date);
    println!("----------------------------------");
    println!("People:       {}", snapshot.total_people);
    println!(
        "Confirmed:    {} ({:.0}%)",
        snapshot.confirmed_count,
        snapshot.confirm_rate * 100.0
    );
    println!("Pending:      {}", snapshot.pending_count);
    println!(
        "Help:         {} ({:.0}%)",
        snapshot.help_count,
        snapshot.help_rate * 100.0
    );
    println!(
        "Escalated:    {} ({:.0}%)",
        snapshot.escalation_count,
        snapshot.escalation_rate * 100.0
    );
    println!(
        "Risk:         low {} / medium {} / high {} / extreme {}",
        dist.low, dist.medium, dist.high, dist.extreme
    );
    println!();
    println!("{}", snapshot.outreach_summary);
    for line in snapshot.outreach_suggestions() {
        println!("  - {line}");
    }
    Ok(())
}

async fn handle_sweep(
    service: &mut HeatRelayService,
    config: &Config,
    cmd: &SweepCommand,
) -> anyhow::Result<()> {
    if cmd.watch {
        let every = cmd
            .interval
            .map_or_else(|| config.sweep_interval(), std::time::Duration::from_secs);
        if every.is_zero() {
            return Err(anyhow!("--interval must be greater than 0"));
        }
        scheduler::run(service, every, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
        })
        .await;
        return Ok(());
    }

    let report = service.sweep().await?;
    if cmd.json {
        return print_json(&report);
    }
    println!("Seeded:      {}", report.seeded);
    println!("Promoted:    {}", report.promoted);
    println!(
        "Communities: {}",
        if report.communities.is_empty() {
            "-".to_string()
        } else {
            report.communities.join(", ")
        }
    );
    Ok(())
}

async fn handle_message(service: &HeatRelayService, cmd: MessageCommand) -> anyhow::Result<()> {
    let text = match cmd {
        MessageCommand::Caregiver {
            community,
            code,
            link,
        } => {
            let report = service.assess(&community).await;
            let level = (!report.fallback).then_some(report.assessment.risk_level);
            caregiver_message(&community, level, code.as_deref(), link.as_deref())
        }
        MessageCommand::Community { community, link } => {
            let report = service.assess(&community).await;
            let level = (!report.fallback).then_some(report.assessment.risk_level);
            let resources = service.cooling_resources(&community).await;
            community_message(&community, level, &resources, link.as_deref())
        }
    };
    println!("{text}");
    Ok(())
}

async fn handle_risk(service: &HeatRelayService, cmd: &RiskCommand) -> anyhow::Result<()> {
    let report = service.assess(&cmd.location).await;
    if cmd.json {
        #[derive(Serialize)]
        struct Output<'a> {
            #[serde(flatten)]
            report: &'a heatrelay::service::RiskReport,
            breakdown: Vec<heatrelay::risk::FactorShare>,
        }
        return print_json(&Output {
            breakdown: heatrelay::HeatRiskScorer.breakdown(&report.assessment),
            report: &report,
        });
    }

    let assessment = &report.assessment;
    println!("Location:   {}", cmd.location);
    if report.fallback {
        println!("Weather:    unavailable, default conditions used");
    }
    println!("Risk level: {}", assessment.risk_level);
    println!("Score:      {:.1}", assessment.risk_score);
    for share in heatrelay::HeatRiskScorer.breakdown(assessment) {
        println!("  {:<16} {:>8}  {:>3}%", share.label, share.value, share.percent);
    }
    Ok(())
}

fn handle_config(path: Option<PathBuf>, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = Config::extract(path)?.redacted();
            if json {
                return print_json(&config);
            }
            println!("Current Configuration");
            println!("=====================");
            println!();
            println!("[Storage]");
            println!("  Database path:        {}", config.database_path().display());
            println!();
            println!("[Security]");
            println!("  Pepper:               {}", config.security.pepper);
            println!("  Max failures:         {}", config.security.max_failures);
            println!("  Window (minutes):     {}", config.security.window_minutes);
            println!("  Lock (minutes):       {}", config.security.lock_minutes);
            println!();
            println!("[Pairing]");
            println!("  Link TTL (days):      {}", config.pairing.link_ttl_days);
            println!("  Short code digits:    {}", config.pairing.short_code_digits);
            println!();
            println!("[Escalation]");
            println!(
                "  After (minutes):      {}",
                config.escalation.auto_escalate_after_minutes
            );
            println!(
                "  Target stage:         {}",
                config.escalation.auto_escalate_stage
            );
            println!(
                "  Sweep interval (s):   {}",
                config.escalation.sweep_interval_seconds
            );
            println!("  Seed daily rows:      {}", config.escalation.seed_daily_rows);
            println!();
            println!("[Time]");
            println!("  UTC offset:           {}", config.time.utc_offset);
            println!();
            println!("[Weather]");
            println!("  Timeout (ms):         {}", config.weather.timeout_ms);
            println!("  Hot day threshold:    {}", config.weather.hot_day_threshold);
            match &config.weather.fixture_path {
                Some(fixture) => println!("  Fixture:              {}", fixture.display()),
                None => println!("  Fixture:              -"),
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.or(path).unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
