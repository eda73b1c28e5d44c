// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Detail fetcher: composite status records for every listed sandbox.
//!
//! Every row runs as its own task, and every probe within a row runs as its
//! own task. Probes write into the row's record under a per-row lock; rows
//! land in fixed slots in registry order. A probe that fails leaves its
//! field at the documented sentinel and never fails the row.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::credential::{self, Credentials};
use crate::engine::{self, Engine};
use crate::error::FleetError;
use crate::registry::{short_name, LifecycleState, RegistryRow};

pub const UNKNOWN_BRANCH: &str = "unknown";
pub const NO_AUTH: &str = "✗ NO AUTH";
pub const INVALID_AUTH: &str = "✗ INVALID";
/// Placeholder for fields that were not probed or could not be read.
pub const NOT_AVAILABLE: &str = "-";

/// Where probes look inside a sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Git working tree.
    pub workspace: String,
    /// tmux session holding the agent.
    pub session: String,
    /// Substring identifying the supervised agent process.
    pub process_pattern: String,
    /// Credential artifact path inside the sandbox.
    pub remote_credentials: String,
    /// Unprivileged user the agent runs as.
    pub agent_user: String,
    /// Command launched in the agent window.
    pub agent_command: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            workspace: "/workspace".to_owned(),
            session: "main".to_owned(),
            process_pattern: "claude".to_owned(),
            remote_credentials: format!("/home/node/.claude/{}", credential::CREDENTIALS_FILE),
            agent_user: "node".to_owned(),
            agent_command: "claude --dangerously-skip-permissions".to_owned(),
        }
    }
}

/// Composite status of one sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxRecord {
    pub name: String,
    pub short_name: String,
    pub state: LifecycleState,
    /// Human status from the registry, e.g. `Up 2 hours`.
    pub status: String,
    pub created_at: Option<DateTime<FixedOffset>>,
    pub branch: String,
    /// The supervised agent process is not running.
    pub dormant: bool,
    /// A bell or silence flag is set on some window.
    pub needs_attention: bool,
    pub auth_status: String,
    pub last_activity: String,
    pub git_status: String,
}

impl SandboxRecord {
    /// A record with every probed field at its sentinel.
    pub fn from_row(row: &RegistryRow, prefix: &str) -> Self {
        Self {
            name: row.name.clone(),
            short_name: short_name(&row.name, prefix).to_owned(),
            state: row.state.clone(),
            status: row.status.clone(),
            created_at: row.created_at,
            branch: UNKNOWN_BRANCH.to_owned(),
            dormant: true,
            needs_attention: false,
            auth_status: NOT_AVAILABLE.to_owned(),
            last_activity: NOT_AVAILABLE.to_owned(),
            git_status: NOT_AVAILABLE.to_owned(),
        }
    }
}

/// Fetch composite records for `rows`, preserving their order.
///
/// Returns only after every probe of every row has finished or failed.
pub async fn fetch_details(
    engine: Arc<dyn Engine>,
    probes: Arc<ProbeConfig>,
    rows: &[RegistryRow],
    prefix: &str,
    now_ms: i64,
) -> Vec<SandboxRecord> {
    let mut slots: Vec<Option<SandboxRecord>> = vec![None; rows.len()];
    let mut handles = Vec::with_capacity(rows.len());
    for row in rows {
        let record = SandboxRecord::from_row(row, prefix);
        handles.push(tokio::spawn(fetch_row(
            Arc::clone(&engine),
            Arc::clone(&probes),
            record,
            now_ms,
        )));
    }

    for (idx, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(record) => slots[idx] = Some(record),
            Err(e) => tracing::warn!(sandbox = %rows[idx].name, err = %e, "detail: row task failed"),
        }
    }

    slots
        .into_iter()
        .zip(rows)
        .map(|(slot, row)| slot.unwrap_or_else(|| SandboxRecord::from_row(row, prefix)))
        .collect()
}

/// Run all probes for one sandbox concurrently and merge the results.
async fn fetch_row(
    engine: Arc<dyn Engine>,
    probes: Arc<ProbeConfig>,
    record: SandboxRecord,
    now_ms: i64,
) -> SandboxRecord {
    let name = record.name.clone();
    let running = record.state.is_running();
    let slot = Arc::new(Mutex::new(record));
    let mut handles = Vec::new();

    {
        let (engine, probes, name) = (Arc::clone(&engine), Arc::clone(&probes), name.clone());
        handles.push(spawn_probe(&slot, async move {
            let branch = probe_branch(&*engine, &probes, &name).await;
            degrade("branch", &name, branch, UNKNOWN_BRANCH.to_owned())
        }, |r, v| r.branch = v));
    }

    // Stopped sandboxes cannot exec; everything but the branch keeps its sentinel.
    if running {
        {
            let (engine, probes, name) = (Arc::clone(&engine), Arc::clone(&probes), name.clone());
            handles.push(spawn_probe(&slot, async move {
                let flags = probe_attention(&*engine, &probes, &name).await;
                degrade("attention", &name, flags, false)
            }, |r, v| r.needs_attention = v));
        }
        {
            let (engine, probes, name) = (Arc::clone(&engine), Arc::clone(&probes), name.clone());
            handles.push(spawn_probe(&slot, async move {
                let live = probe_liveness(&*engine, &probes, &name).await;
                !degrade("liveness", &name, live, false)
            }, |r, dormant| r.dormant = dormant));
        }
        {
            let (engine, probes, name) = (Arc::clone(&engine), Arc::clone(&probes), name.clone());
            handles.push(spawn_probe(&slot, async move {
                probe_auth(&*engine, &probes, &name, now_ms).await
            }, |r, v| r.auth_status = v));
        }
        {
            let (engine, probes, name) = (Arc::clone(&engine), Arc::clone(&probes), name.clone());
            handles.push(spawn_probe(&slot, async move {
                let activity = probe_activity(&*engine, &probes, &name, now_ms).await;
                degrade("activity", &name, activity, NOT_AVAILABLE.to_owned())
            }, |r, v| r.last_activity = v));
        }
        {
            let (engine, probes, name) = (Arc::clone(&engine), Arc::clone(&probes), name.clone());
            handles.push(spawn_probe(&slot, async move {
                let git = probe_git(&*engine, &probes, &name).await;
                degrade("git", &name, git, NOT_AVAILABLE.to_owned())
            }, |r, v| r.git_status = v));
        }
    }

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::warn!(sandbox = %name, err = %e, "detail: probe task failed");
        }
    }

    let record = slot.lock().clone();
    record
}

/// Spawn a probe whose result is applied to the shared record under its lock.
fn spawn_probe<T, F, A>(slot: &Arc<Mutex<SandboxRecord>>, probe: F, apply: A) -> JoinHandle<()>
where
    T: Send + 'static,
    F: Future<Output = T> + Send + 'static,
    A: FnOnce(&mut SandboxRecord, T) + Send + 'static,
{
    let slot = Arc::clone(slot);
    tokio::spawn(async move {
        let value = probe.await;
        apply(&mut slot.lock(), value);
    })
}

fn degrade<T>(probe: &'static str, sandbox: &str, result: Result<T, FleetError>, sentinel: T) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(sandbox, probe, err = %e, "detail: probe degraded to sentinel");
            sentinel
        }
    }
}

/// Run `argv` and return stdout, treating a nonzero exit as a probe failure.
async fn exec_stdout(
    engine: &dyn Engine,
    probe: &'static str,
    name: &str,
    argv: &[&str],
) -> Result<String, FleetError> {
    let out = engine
        .exec(name, None, argv)
        .await
        .and_then(|o| o.check())
        .map_err(|e| FleetError::probe(probe, format!("{e:#}")))?;
    Ok(out.stdout)
}

pub async fn probe_branch(
    engine: &dyn Engine,
    probes: &ProbeConfig,
    name: &str,
) -> Result<String, FleetError> {
    let out = exec_stdout(
        engine,
        "branch",
        name,
        &["git", "-C", probes.workspace.as_str(), "branch", "--show-current"],
    )
    .await?;
    // Detached HEAD prints nothing and renders as an empty cell.
    Ok(out.trim().to_owned())
}

pub async fn probe_attention(
    engine: &dyn Engine,
    probes: &ProbeConfig,
    name: &str,
) -> Result<bool, FleetError> {
    let out = exec_stdout(
        engine,
        "attention",
        name,
        &[
            "tmux",
            "list-windows",
            "-t",
            probes.session.as_str(),
            "-F",
            "#{window_bell_flag}:#{window_silence_flag}",
        ],
    )
    .await?;
    Ok(parse_attention_flags(&out))
}

/// True when any `bell:silence` line has either flag set.
pub fn parse_attention_flags(output: &str) -> bool {
    output.lines().any(|line| {
        matches!(line.trim().split(':').collect::<Vec<_>>().as_slice(), [bell, silence] if *bell == "1" || *silence == "1")
    })
}

pub async fn probe_liveness(
    engine: &dyn Engine,
    probes: &ProbeConfig,
    name: &str,
) -> Result<bool, FleetError> {
    let out = exec_stdout(engine, "liveness", name, &["ps", "-eo", "stat=,args="]).await?;
    Ok(has_live_process(&out, &probes.process_pattern))
}

/// True when a `STAT ARGS` line mentions `pattern` and is not a zombie.
pub fn has_live_process(ps_output: &str, pattern: &str) -> bool {
    ps_output.lines().any(|line| {
        let Some((stat, args)) = line.trim().split_once(char::is_whitespace) else {
            return false;
        };
        !stat.starts_with('Z') && args.contains(pattern)
    })
}

/// Auth badge for the sandbox's credential replica. Never fails.
pub async fn probe_auth(
    engine: &dyn Engine,
    probes: &ProbeConfig,
    name: &str,
    now_ms: i64,
) -> String {
    // Removed on drop, whatever happens below.
    let temp = match tempfile::Builder::new().prefix("fleet-creds-").suffix(".json").tempfile() {
        Ok(t) => t,
        Err(e) => {
            tracing::debug!(sandbox = name, err = %e, "detail: cannot create temp file");
            return NO_AUTH.to_owned();
        }
    };
    let copied = engine
        .copy_out(name, &probes.remote_credentials, temp.path())
        .await
        .and_then(|o| o.check());
    if let Err(e) = copied {
        tracing::debug!(sandbox = name, err = %e, "detail: no credentials in sandbox");
        return NO_AUTH.to_owned();
    }
    match Credentials::read(temp.path()) {
        Ok(creds) => credential::auth_badge(creds.expires_at_ms(), now_ms),
        Err(e) => {
            tracing::debug!(sandbox = name, err = %e, "detail: unreadable credentials");
            INVALID_AUTH.to_owned()
        }
    }
}

pub async fn probe_activity(
    engine: &dyn Engine,
    probes: &ProbeConfig,
    name: &str,
    now_ms: i64,
) -> Result<String, FleetError> {
    let target = format!("{}:0", probes.session);
    let out = exec_stdout(
        engine,
        "activity",
        name,
        &["tmux", "display-message", "-t", target.as_str(), "-p", "#{pane_active_since}"],
    )
    .await?;
    let since: i64 = out
        .trim()
        .parse()
        .map_err(|e| FleetError::probe("activity", format!("bad timestamp {:?}: {e}", out.trim())))?;
    Ok(format_age((now_ms / 1000).saturating_sub(since)))
}

/// Render an age in seconds: `42s`, `17m`, `3.5h`, `2.0d`.
pub fn format_age(secs: i64) -> String {
    let secs = secs.max(0) as f64;
    if secs < 60.0 {
        format!("{secs:.0}s")
    } else if secs < 3600.0 {
        format!("{:.0}m", secs / 60.0)
    } else if secs < 86_400.0 {
        format!("{:.1}h", secs / 3600.0)
    } else {
        format!("{:.1}d", secs / 86_400.0)
    }
}

pub async fn probe_git(
    engine: &dyn Engine,
    probes: &ProbeConfig,
    name: &str,
) -> Result<String, FleetError> {
    let git_dir = format!("{}/.git", probes.workspace);
    exec_stdout(engine, "git", name, &["test", "-d", git_dir.as_str()]).await?;

    let ws = &probes.workspace;
    let dirty = format!("cd {ws} && git status --porcelain 2>/dev/null | wc -l");
    let ahead = format!("cd {ws} && git rev-list --count @{{u}}..HEAD 2>/dev/null");
    let behind = format!("cd {ws} && git rev-list --count HEAD..@{{u}} 2>/dev/null");
    let (dirty, ahead, behind) = tokio::join!(
        shell_count(engine, name, &dirty),
        shell_count(engine, name, &ahead),
        shell_count(engine, name, &behind),
    );
    Ok(format_git_status(dirty, ahead, behind))
}

async fn shell_count(engine: &dyn Engine, name: &str, script: &str) -> Option<u64> {
    let out = engine::sh(engine, name, None, script).await.ok()?;
    if !out.success() {
        return None;
    }
    out.stdout.trim().parse().ok()
}

/// `Δdirty ↑ahead ↓behind` with zero or unknown parts omitted, `✓` when clean.
pub fn format_git_status(dirty: Option<u64>, ahead: Option<u64>, behind: Option<u64>) -> String {
    let mut parts = Vec::new();
    for (symbol, count) in [("Δ", dirty), ("↑", ahead), ("↓", behind)] {
        if let Some(n) = count.filter(|n| *n > 0) {
            parts.push(format!("{symbol}{n}"));
        }
    }
    if parts.is_empty() {
        "✓".to_owned()
    } else {
        parts.join(" ")
    }
}

#[cfg(test)]
#[path = "detail_tests.rs"]
mod tests;
