// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `coopfleet` subcommands and their terminal output.

use std::fmt::Write as _;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::config::FleetConfig;
use crate::credential::{self, reconcile::PassReport};
use crate::display::{DisplayMode, Ranked};
use crate::fleet::{epoch_ms, Fleet, Snapshot};
use crate::ops::{SandboxDetails, StopReport};
use crate::registry::ListScope;
use crate::whitelist::FleetDomainReport;

/// Default redraw interval for `watch`.
pub const DEFAULT_WATCH_INTERVAL_MS: u64 = 5000;

#[derive(Debug, Parser)]
#[command(name = "coopfleet", version, about = "Status and credential upkeep for a fleet of agent sandboxes.")]
pub struct Cli {
    #[command(flatten)]
    pub config: FleetConfig,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the status table
    List {
        /// Include stopped sandboxes
        #[arg(long)]
        all: bool,
    },
    /// Pick a sandbox from a numbered table and print its name
    Select {
        #[arg(long)]
        all: bool,
    },
    /// Redraw the status table until interrupted
    Watch {
        #[arg(long)]
        all: bool,
        #[arg(long, default_value_t = DEFAULT_WATCH_INTERVAL_MS, env = "COOP_FLEET_WATCH_INTERVAL_MS")]
        interval_ms: u64,
    },
    /// Show resources, environment, probes and recent logs for one sandbox
    Inspect { name: String },
    /// Propagate the freshest credentials to the host and every running sandbox
    RefreshTokens,
    /// Push the freshest credentials into one sandbox
    SyncTo { name: String },
    /// Whitelist a domain in one sandbox's resolver
    AddDomain {
        name: String,
        domain: String,
        /// Also record the domain in the config file
        #[arg(long)]
        persist: bool,
    },
    /// Whitelist a domain in every running sandbox
    AddDomainAll { domain: String },
    Stop { name: String },
    /// Stop every running sandbox whose agent has exited
    StopDormant {
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },
    /// Restart a sandbox's agent, or the whole sandbox with --full
    Restart {
        name: String,
        /// Restart the sandbox itself and push credentials into it
        #[arg(long)]
        full: bool,
    },
    /// Remove a sandbox and its volumes
    Remove { name: String },
}

fn scope(all: bool) -> ListScope {
    if all {
        ListScope::All
    } else {
        ListScope::Running
    }
}

/// Run one subcommand to completion.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let fleet = Fleet::from_config(&cli.config)?;
    let width = fleet.settings().width;

    match cli.command {
        Command::List { all } => {
            let ranked = fleet.list(scope(all)).await?;
            print!("{}", table(&ranked, DisplayMode::Plain, width));
        }
        Command::Select { all } => {
            let ranked = fleet.list_selectable(scope(all)).await?;
            if ranked.is_empty() {
                anyhow::bail!("no sandboxes to select from");
            }
            print!("{}", table(&ranked, DisplayMode::Numbered, width));
            let answer = prompt(&format!("select [1-{}]: ", ranked.len())).await?;
            println!("{}", ranked.select(&answer)?.name);
        }
        Command::Watch { all, interval_ms } => {
            watch(&fleet, scope(all), Duration::from_millis(interval_ms), width).await?;
        }
        Command::Inspect { name } => {
            print!("{}", format_details(&fleet.inspect(&name).await?));
        }
        Command::RefreshTokens => {
            let report = fleet.refresh_tokens().await?;
            print!("{}", format_pass(&report, epoch_ms()));
        }
        Command::SyncTo { name } => {
            let report = fleet.sync_to(&name).await?;
            print!("{}", format_pass(&report, epoch_ms()));
        }
        Command::AddDomain { name, domain, persist } => {
            let outcome = fleet.add_domain(&name, &domain, persist).await?;
            let report = &outcome.report;
            if report.added {
                println!("{domain}: whitelisted in {}", report.sandbox);
            } else {
                println!("{domain}: already whitelisted in {}", report.sandbox);
            }
            if let Some(warning) = &report.warning {
                println!("  warning: {warning}");
            }
            if outcome.persisted {
                println!("{domain}: saved to {}", fleet.settings().config_path.display());
            }
        }
        Command::AddDomainAll { domain } => {
            print!("{}", format_domain_report(&fleet.add_domain_all(&domain).await?, &domain));
        }
        Command::Stop { name } => {
            fleet.stop(&name).await?;
            println!("stopped {}", fleet.resolve_name(&name));
        }
        Command::StopDormant { yes } => {
            let names = fleet.dormant().await?;
            if names.is_empty() {
                println!("no dormant sandboxes");
                return Ok(());
            }
            for name in &names {
                println!("  {name}");
            }
            if !yes && !confirmed(&prompt(&format!("stop {} dormant sandbox(es)? [y/N] ", names.len())).await?) {
                println!("aborted");
                return Ok(());
            }
            print!("{}", format_stop_report(&fleet.stop_all(&names).await));
        }
        Command::Restart { name, full: false } => {
            fleet.restart_agent(&name).await?;
            println!("restarted agent in {}", fleet.resolve_name(&name));
        }
        Command::Restart { name, full: true } => {
            let resolved = fleet.resolve_name(&name);
            match fleet.restart(&name).await? {
                Some(report) => println!("restarted {resolved} ({})", report.sync),
                None => println!("restarted {resolved} (credentials not synced)"),
            }
        }
        Command::Remove { name } => {
            let volumes = fleet.remove(&name).await?;
            println!("removed {}", fleet.resolve_name(&name));
            for volume in volumes {
                println!("  volume {volume}");
            }
        }
    }
    Ok(())
}

/// Redraw every `interval` until Ctrl-C. The cached snapshot is shown while
/// the next listing runs.
async fn watch(fleet: &Fleet, scope: ListScope, interval: Duration, width: usize) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        });
    }

    while !shutdown.is_cancelled() {
        if let Some(snapshot) = fleet.cached().await {
            redraw(&snapshot, width, true);
        }
        let listed = tokio::select! {
            _ = shutdown.cancelled() => break,
            listed = fleet.list(scope) => listed,
        };
        match listed {
            Ok(_) => {
                if let Some(snapshot) = fleet.cached().await {
                    redraw(&snapshot, width, false);
                }
            }
            Err(e) => tracing::warn!(err = %e, "watch: refresh failed"),
        }
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    tracing::debug!("watch: stopped");
    Ok(())
}

fn redraw(snapshot: &Snapshot, width: usize, refreshing: bool) {
    let age = (epoch_ms() - snapshot.fetched_at_ms).max(0) / 1000;
    print!("\x1b[2J\x1b[H{}", table(&snapshot.records, DisplayMode::Plain, width));
    if refreshing {
        println!("\n(as of {age}s ago, refreshing...)");
    } else {
        println!("\n(updated, Ctrl-C to exit)");
    }
}

async fn prompt(question: &str) -> anyhow::Result<String> {
    eprint!("{question}");
    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    Ok(line.trim().to_owned())
}

fn confirmed(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn table(ranked: &Ranked, mode: DisplayMode, width: usize) -> String {
    if ranked.is_empty() {
        return "no sandboxes found\n".to_owned();
    }
    ranked.render(mode, width)
}

/// Per-location scan results, the chosen source and the propagation tally.
pub fn format_pass(report: &PassReport, now_ms: i64) -> String {
    let mut out = String::new();
    for outcome in &report.outcomes {
        let line = match &outcome.result {
            Ok(expires) => credential::format_expiration(*expires, now_ms),
            Err(reason) => format!("unreadable ({reason})"),
        };
        let _ = writeln!(out, "  {:<24} {line}", outcome.location.to_string());
    }
    let _ = writeln!(
        out,
        "source: {} ({})",
        report.winner,
        credential::format_expiration(report.expires_at_ms, now_ms)
    );
    if report.expires_soon {
        let _ = writeln!(out, "warning: credentials expire within a day; re-authenticate soon");
    }
    for target in &report.sync.targets {
        match (&target.result, &target.warning) {
            (Err(reason), _) => {
                let _ = writeln!(out, "  {} failed: {reason}", target.location);
            }
            (Ok(()), Some(warning)) => {
                let _ = writeln!(out, "  {} warning: {warning}", target.location);
            }
            (Ok(()), None) => {}
        }
    }
    let _ = writeln!(out, "{}", report.sync);
    out
}

pub fn format_domain_report(report: &FleetDomainReport, domain: &str) -> String {
    let mut out = String::new();
    for (sandbox, result) in &report.outcomes {
        match result {
            Ok(done) if done.added => {
                let _ = writeln!(out, "  {sandbox}: added");
            }
            Ok(_) => {
                let _ = writeln!(out, "  {sandbox}: already present");
            }
            Err(reason) => {
                let _ = writeln!(out, "  {sandbox}: failed: {reason}");
            }
        }
    }
    let _ = writeln!(out, "{domain}: {report}");
    out
}

pub fn format_stop_report(report: &StopReport) -> String {
    let mut out = String::new();
    for (name, result) in &report.outcomes {
        if let Err(reason) = result {
            let _ = writeln!(out, "  {name}: {reason}");
        }
    }
    let _ = writeln!(out, "{report}");
    out
}

pub fn format_details(d: &SandboxDetails) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} ({})", d.short_name, d.name);
    let fields = [
        ("status", &d.status),
        ("uptime", &d.uptime),
        ("cpus", &d.cpus),
        ("memory", &d.memory),
        ("ip", &d.ip_address),
        ("branch", &d.branch),
        ("git", &d.git_status),
        ("auth", &d.auth_status),
        ("activity", &d.last_activity),
    ];
    for (label, value) in fields {
        let _ = writeln!(out, "  {label:<10} {value}");
    }
    for (title, items) in [("ports", &d.ports), ("volumes", &d.volumes), ("environment", &d.environment)] {
        if items.is_empty() {
            continue;
        }
        let _ = writeln!(out, "{title}:");
        for item in items {
            let _ = writeln!(out, "  {item}");
        }
    }
    let _ = writeln!(out, "recent logs:");
    for line in d.recent_logs.lines() {
        let _ = writeln!(out, "  {line}");
    }
    out
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
