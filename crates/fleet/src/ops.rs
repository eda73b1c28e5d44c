// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle operations and the detailed single-sandbox view.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use futures_util::future::BoxFuture;
use serde::Deserialize;

use crate::detail::{self, ProbeConfig, SandboxRecord, NOT_AVAILABLE};
use crate::engine::{self, Engine, ExecOutput};
use crate::error::FleetError;
use crate::registry::short_name;

/// Named volumes created alongside each sandbox, as `<name>-<suffix>`.
pub const VOLUME_SUFFIXES: [&str; 3] = ["npm", "uv", "history"];

/// Pause after a restart so the sandbox's services come up.
pub const RESTART_SETTLE: Duration = Duration::from_secs(2);

/// Pause between agent restart steps so tmux catches up.
pub const AGENT_SETTLE: Duration = Duration::from_millis(500);

/// Seconds of agent silence before tmux flags the window.
const MONITOR_SILENCE_SECS: &str = "10";

/// Log lines included in [`SandboxDetails`].
pub const DETAIL_LOG_LINES: usize = 50;

const LOGS_UNAVAILABLE: &str = "(logs unavailable)";
const UNLIMITED: &str = "unlimited";

/// Environment entries containing any of these are never shown.
const SENSITIVE_ENV: [&str; 3] = ["TOKEN", "SECRET", "PASSWORD"];

async fn lifecycle(
    op: &'static str,
    call: BoxFuture<'_, anyhow::Result<ExecOutput>>,
    name: &str,
) -> Result<(), FleetError> {
    call.await
        .and_then(|o| o.check())
        .map_err(|e| FleetError::operation(op, name, format!("{e:#}")))?;
    tracing::info!(sandbox = name, op, "ops: done");
    Ok(())
}

pub async fn stop(engine: &dyn Engine, name: &str) -> Result<(), FleetError> {
    lifecycle("stop", engine.stop(name), name).await
}

pub async fn start(engine: &dyn Engine, name: &str) -> Result<(), FleetError> {
    lifecycle("start", engine.start(name), name).await
}

/// Stop, start, then wait `settle` for the sandbox to come up.
pub async fn restart(engine: &dyn Engine, name: &str, settle: Duration) -> Result<(), FleetError> {
    stop(engine, name).await?;
    start(engine, name).await?;
    tokio::time::sleep(settle).await;
    Ok(())
}

/// Restart only the agent inside a running sandbox.
///
/// Kills the agent process, recreates its tmux window and re-arms the
/// bell/silence monitors. Only failing to open the new window is an error;
/// the other steps are best effort.
pub async fn restart_agent(
    engine: &dyn Engine,
    probes: &ProbeConfig,
    name: &str,
    settle: Duration,
) -> Result<(), FleetError> {
    let window = format!("{}:0", probes.session);

    // pkill exits 1 when nothing matched.
    if let Err(e) = engine
        .exec(name, None, &["pkill", "-9", probes.process_pattern.as_str()])
        .await
        .and_then(|o| if o.code == Some(1) { Ok(o) } else { o.check() })
    {
        tracing::warn!(sandbox = name, err = %e, "ops: agent kill failed");
    }
    tokio::time::sleep(settle).await;

    if let Err(e) = engine
        .exec(name, None, &["tmux", "kill-window", "-t", window.as_str()])
        .await
        .and_then(|o| o.check())
    {
        tracing::debug!(sandbox = name, err = %e, "ops: agent window already closed");
    }

    let script = format!(
        "cd {workspace} && HOME=/home/{user} tmux new-window -t {window} -n {pattern} '{command}'",
        workspace = probes.workspace,
        user = probes.agent_user,
        pattern = probes.process_pattern,
        command = probes.agent_command,
    );
    engine::sh(engine, name, Some(probes.agent_user.as_str()), &script)
        .await
        .and_then(|o| o.check())
        .map_err(|e| FleetError::operation("restart-agent", name, format!("cannot open agent window: {e:#}")))?;
    tokio::time::sleep(settle).await;

    let steps: [(&str, &[&str]); 3] = [
        ("monitor-bell", &["tmux", "set-window-option", "-t", window.as_str(), "monitor-bell", "on"]),
        (
            "monitor-silence",
            &["tmux", "set-window-option", "-t", window.as_str(), "monitor-silence", MONITOR_SILENCE_SECS],
        ),
        ("select-window", &["tmux", "select-window", "-t", window.as_str()]),
    ];
    for (step, argv) in steps {
        if let Err(e) = engine.exec(name, None, argv).await.and_then(|o| o.check()) {
            tracing::warn!(sandbox = name, step, err = %e, "ops: agent window setup failed");
        }
    }
    tracing::info!(sandbox = name, op = "restart-agent", "ops: done");
    Ok(())
}

/// Force-remove a sandbox and its anonymous volumes, then its named volumes.
///
/// Named volumes that do not exist are ignored. Returns the volumes removed.
pub async fn remove(engine: &dyn Engine, name: &str) -> Result<Vec<String>, FleetError> {
    lifecycle("remove", engine.remove(name), name).await?;

    let mut removed = Vec::new();
    for suffix in VOLUME_SUFFIXES {
        let volume = format!("{name}-{suffix}");
        match engine.remove_volume(&volume).await.and_then(|o| o.check()) {
            Ok(_) => removed.push(volume),
            Err(e) => tracing::debug!(volume, err = %e, "ops: volume not removed"),
        }
    }
    Ok(removed)
}

/// Running sandboxes whose agent process is gone.
pub fn dormant(records: &[SandboxRecord]) -> Vec<&SandboxRecord> {
    records.iter().filter(|r| r.state.is_running() && r.dormant).collect()
}

/// Per-sandbox results of a bulk stop.
#[derive(Debug, Clone, Default)]
pub struct StopReport {
    pub outcomes: Vec<(String, Result<(), String>)>,
}

impl StopReport {
    pub fn stopped(&self) -> usize {
        self.outcomes.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }
}

impl fmt::Display for StopReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stopped {}/{}", self.stopped(), self.attempted())
    }
}

/// Stop every sandbox in `names` concurrently. One failure never blocks the rest.
pub async fn stop_all(engine: Arc<dyn Engine>, names: &[String]) -> StopReport {
    let handles: Vec<_> = names
        .iter()
        .map(|name| {
            let engine = Arc::clone(&engine);
            let name = name.clone();
            tokio::spawn(async move { stop(&*engine, &name).await })
        })
        .collect();

    let mut report = StopReport::default();
    for (name, handle) in names.iter().zip(handles) {
        let result = match handle.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(reason) = &result {
            tracing::warn!(sandbox = %name, err = %reason, "ops: stop failed");
        }
        report.outcomes.push((name.clone(), result));
    }
    report
}

// -- Inspect ------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectDoc {
    state: InspectState,
    host_config: InspectHostConfig,
    network_settings: InspectNetwork,
    mounts: Option<Vec<InspectMount>>,
    config: InspectConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectState {
    status: String,
    started_at: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectHostConfig {
    nano_cpus: i64,
    memory: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectNetwork {
    #[serde(rename = "IPAddress")]
    ip_address: String,
    ports: Option<BTreeMap<String, Option<Vec<PortBinding>>>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct PortBinding {
    host_port: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectMount {
    source: String,
    destination: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectConfig {
    env: Option<Vec<String>>,
}

/// Full view of one sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxDetails {
    pub name: String,
    pub short_name: String,
    pub status: String,
    pub uptime: String,
    pub cpus: String,
    pub memory: String,
    pub ip_address: String,
    /// `host -> container` port bindings.
    pub ports: Vec<String>,
    /// `source -> destination` mounts.
    pub volumes: Vec<String>,
    /// Environment with secrets removed.
    pub environment: Vec<String>,
    pub branch: String,
    pub git_status: String,
    pub auth_status: String,
    pub last_activity: String,
    pub recent_logs: String,
}

/// Parse `docker inspect` output. Probe fields are left at their sentinels.
pub fn parse_inspect(
    json: &str,
    name: &str,
    prefix: &str,
    now_ms: i64,
) -> Result<SandboxDetails, FleetError> {
    let docs: Vec<InspectDoc> = serde_json::from_str(json)
        .map_err(|e| FleetError::operation("inspect", name, format!("malformed inspect output: {e}")))?;
    let doc = docs
        .into_iter()
        .next()
        .ok_or_else(|| FleetError::operation("inspect", name, "no sandbox data returned"))?;

    let uptime = DateTime::parse_from_rfc3339(&doc.state.started_at)
        .map(|started| detail::format_age((now_ms / 1000).saturating_sub(started.timestamp())))
        .unwrap_or_else(|_| NOT_AVAILABLE.to_owned());

    let cpus = if doc.host_config.nano_cpus > 0 {
        format!("{:.1}", doc.host_config.nano_cpus as f64 / 1e9)
    } else {
        UNLIMITED.to_owned()
    };
    let memory = if doc.host_config.memory > 0 {
        format!("{:.1} GB", doc.host_config.memory as f64 / (1024.0 * 1024.0 * 1024.0))
    } else {
        UNLIMITED.to_owned()
    };

    let mut ports = Vec::new();
    for (container_port, bindings) in doc.network_settings.ports.unwrap_or_default() {
        for binding in bindings.unwrap_or_default() {
            ports.push(format!("{} -> {container_port}", binding.host_port));
        }
    }

    Ok(SandboxDetails {
        name: name.to_owned(),
        short_name: short_name(name, prefix).to_owned(),
        status: doc.state.status,
        uptime,
        cpus,
        memory,
        ip_address: doc.network_settings.ip_address,
        ports,
        volumes: doc
            .mounts
            .unwrap_or_default()
            .iter()
            .map(|m| format!("{} -> {}", m.source, m.destination))
            .collect(),
        environment: doc
            .config
            .env
            .unwrap_or_default()
            .into_iter()
            .filter(|e| !SENSITIVE_ENV.iter().any(|s| e.contains(s)))
            .collect(),
        branch: detail::UNKNOWN_BRANCH.to_owned(),
        git_status: NOT_AVAILABLE.to_owned(),
        auth_status: NOT_AVAILABLE.to_owned(),
        last_activity: NOT_AVAILABLE.to_owned(),
        recent_logs: LOGS_UNAVAILABLE.to_owned(),
    })
}

/// Inspect a sandbox and run its status probes and log tail concurrently.
pub async fn inspect(
    engine: &dyn Engine,
    probes: &ProbeConfig,
    name: &str,
    prefix: &str,
    now_ms: i64,
) -> Result<SandboxDetails, FleetError> {
    let out = engine
        .inspect(name)
        .await
        .and_then(|o| o.check())
        .map_err(|e| FleetError::operation("inspect", name, format!("{e:#}")))?;
    let mut details = parse_inspect(&out.stdout, name, prefix, now_ms)?;
    let running = details.status == "running";

    let branch = async {
        detail::probe_branch(engine, probes, name)
            .await
            .unwrap_or_else(|_| detail::UNKNOWN_BRANCH.to_owned())
    };
    let git = async {
        if !running {
            return NOT_AVAILABLE.to_owned();
        }
        detail::probe_git(engine, probes, name).await.unwrap_or_else(|_| NOT_AVAILABLE.to_owned())
    };
    let auth = async {
        if !running {
            return NOT_AVAILABLE.to_owned();
        }
        detail::probe_auth(engine, probes, name, now_ms).await
    };
    let activity = async {
        if !running {
            return NOT_AVAILABLE.to_owned();
        }
        detail::probe_activity(engine, probes, name, now_ms)
            .await
            .unwrap_or_else(|_| NOT_AVAILABLE.to_owned())
    };
    let logs = async {
        match engine.logs(name, DETAIL_LOG_LINES).await.and_then(|o| o.check()) {
            Ok(out) => format!("{}{}", out.stdout, out.stderr),
            Err(_) => LOGS_UNAVAILABLE.to_owned(),
        }
    };

    let (branch, git, auth, activity, logs) = tokio::join!(branch, git, auth, activity, logs);
    details.branch = branch;
    details.git_status = git;
    details.auth_status = auth;
    details.last_activity = activity;
    details.recent_logs = logs;
    Ok(details)
}

#[cfg(test)]
#[path = "ops_tests.rs"]
mod tests;
