// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Freshness reconciler: keeps one credential artifact consistent across the
//! host and every running sandbox.
//!
//! A pass runs `Scan → Select → Validate → Propagate`:
//! - **Scan** reads the host replica and extracts each sandbox replica to a
//!   temporary file. Every read is independent and best-effort.
//! - **Select** picks the replica with the latest expiry. Ties go to the
//!   first replica in scan order (host, then sandboxes in registry order).
//! - **Validate** refuses to propagate an expired winner.
//! - **Propagate** writes the winner to every other location and tallies
//!   the outcomes. One target's failure never blocks the rest.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::credential::{self, persist, Credentials};
use crate::engine::Engine;
use crate::error::FleetError;
use crate::registry::{self, ListScope};

/// Ownership applied to the artifact after each sandbox write.
pub const DEFAULT_REMOTE_OWNER: &str = "node:node";

/// Where the reconciler reads and writes replicas.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Host replica, usually `<auth_dir>/.credentials.json`.
    pub host_path: PathBuf,
    /// Replica path inside each sandbox.
    pub remote_path: String,
    /// `user:group` for `chown` after a sandbox write.
    pub remote_owner: String,
    /// Sandbox name prefixes to scan, configured prefix first.
    pub prefixes: Vec<String>,
}

/// A replica location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReplicaLocation {
    Host,
    Sandbox(String),
}

impl fmt::Display for ReplicaLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => f.write_str("host"),
            Self::Sandbox(name) => f.write_str(name),
        }
    }
}

/// A successfully read replica. The raw bytes are held in memory so the
/// extraction copy can be removed as soon as it has been read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replica {
    pub location: ReplicaLocation,
    pub path: PathBuf,
    pub expires_at_ms: i64,
    pub raw: Vec<u8>,
}

/// Result of reading one location during the scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    pub location: ReplicaLocation,
    /// Expiry on success, the read failure otherwise.
    pub result: Result<i64, String>,
}

/// Everything a scan found.
#[derive(Debug, Clone, Default)]
pub struct Scan {
    /// Readable replicas in scan order.
    pub replicas: Vec<Replica>,
    /// One outcome per location attempted, in scan order.
    pub outcomes: Vec<ScanOutcome>,
    /// Running sandboxes seen by the scan. These are the propagation targets.
    pub sandboxes: Vec<String>,
}

/// Result of writing to one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetOutcome {
    pub location: ReplicaLocation,
    pub result: Result<(), String>,
    /// Non-fatal problem, e.g. ownership could not be fixed.
    pub warning: Option<String>,
}

/// Propagation tally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub targets: Vec<TargetOutcome>,
}

impl SyncReport {
    pub fn synced(&self) -> usize {
        self.targets.iter().filter(|t| t.result.is_ok()).count()
    }

    pub fn attempted(&self) -> usize {
        self.targets.len()
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "synced {}/{}", self.synced(), self.attempted())
    }
}

/// Outcome of a full reconciliation pass.
#[derive(Debug, Clone)]
pub struct PassReport {
    pub outcomes: Vec<ScanOutcome>,
    pub winner: ReplicaLocation,
    pub expires_at_ms: i64,
    /// The winner has less than a day left.
    pub expires_soon: bool,
    pub sync: SyncReport,
}

pub struct Reconciler {
    engine: Arc<dyn Engine>,
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(engine: Arc<dyn Engine>, config: ReconcileConfig) -> Self {
        Self { engine, config }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Read the host replica and every running sandbox's replica.
    ///
    /// Fails only when the sandbox listing itself cannot be obtained.
    pub async fn scan(&self) -> Result<Scan, FleetError> {
        let mut scan = Scan::default();

        match Credentials::read(&self.config.host_path) {
            Ok(creds) => {
                scan.outcomes.push(ScanOutcome {
                    location: ReplicaLocation::Host,
                    result: Ok(creds.expires_at_ms()),
                });
                scan.replicas.push(Replica {
                    location: ReplicaLocation::Host,
                    path: self.config.host_path.clone(),
                    expires_at_ms: creds.expires_at_ms(),
                    raw: creds.into_raw(),
                });
            }
            Err(e) => {
                tracing::warn!(err = %e, "reconcile: host replica unreadable");
                scan.outcomes
                    .push(ScanOutcome { location: ReplicaLocation::Host, result: Err(e.to_string()) });
            }
        }

        let prefixes: Vec<&str> = self.config.prefixes.iter().map(String::as_str).collect();
        let rows = registry::query_prefixes(&*self.engine, &prefixes, ListScope::Running).await?;
        scan.sandboxes = rows.into_iter().map(|r| r.name).collect();

        let mut handles = Vec::with_capacity(scan.sandboxes.len());
        for name in &scan.sandboxes {
            let engine = Arc::clone(&self.engine);
            let remote = self.config.remote_path.clone();
            let name = name.clone();
            handles.push(tokio::spawn(async move {
                read_sandbox_replica(&*engine, &name, &remote).await
            }));
        }

        for (name, handle) in scan.sandboxes.iter().zip(handles) {
            let location = ReplicaLocation::Sandbox(name.clone());
            let read = match handle.await {
                Ok(read) => read,
                Err(e) => Err(e.to_string()),
            };
            match read {
                Ok(creds) => {
                    scan.outcomes
                        .push(ScanOutcome { location: location.clone(), result: Ok(creds.expires_at_ms()) });
                    scan.replicas.push(Replica {
                        location,
                        path: PathBuf::from(&self.config.remote_path),
                        expires_at_ms: creds.expires_at_ms(),
                        raw: creds.into_raw(),
                    });
                }
                Err(reason) => {
                    tracing::warn!(sandbox = %name, err = %reason, "reconcile: replica dropped");
                    scan.outcomes.push(ScanOutcome { location, result: Err(reason) });
                }
            }
        }

        tracing::debug!(
            readable = scan.replicas.len(),
            attempted = scan.outcomes.len(),
            "reconcile: scan complete"
        );
        Ok(scan)
    }

    /// Write `winner` to `targets`, skipping the winner's own location.
    pub async fn propagate(&self, winner: &Replica, targets: &[ReplicaLocation]) -> SyncReport {
        let targets: Vec<ReplicaLocation> =
            targets.iter().filter(|t| **t != winner.location).cloned().collect();
        if targets.is_empty() {
            tracing::info!(source = %winner.location, "reconcile: no other replicas to sync");
            return SyncReport::default();
        }

        // One shared local copy feeds every sandbox copy-in. Removed on drop.
        let staged = match stage(&winner.raw) {
            Ok(staged) => Some(Arc::new(staged)),
            Err(e) => {
                tracing::warn!(err = %e, "reconcile: cannot stage credentials for sandboxes");
                None
            }
        };

        let ok = Arc::new(AtomicU32::new(0));
        let failed = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::with_capacity(targets.len());

        for target in &targets {
            let ok = Arc::clone(&ok);
            let failed = Arc::clone(&failed);
            let engine = Arc::clone(&self.engine);
            let staged = staged.clone();
            let target = target.clone();
            let raw = winner.raw.clone();
            let host_path = self.config.host_path.clone();
            let remote = self.config.remote_path.clone();
            let owner = self.config.remote_owner.clone();

            handles.push(tokio::spawn(async move {
                let outcome = match &target {
                    ReplicaLocation::Host => write_host(&host_path, &raw),
                    ReplicaLocation::Sandbox(name) => match staged {
                        Some(staged) => {
                            write_sandbox(&*engine, name, staged.path(), &remote, &owner).await
                        }
                        None => TargetOutcome::failed(target.clone(), "credentials could not be staged"),
                    },
                };
                if outcome.result.is_ok() {
                    ok.fetch_add(1, Ordering::Relaxed);
                } else {
                    failed.fetch_add(1, Ordering::Relaxed);
                }
                outcome
            }));
        }

        let mut report = SyncReport::default();
        for (target, handle) in targets.into_iter().zip(handles) {
            match handle.await {
                Ok(outcome) => report.targets.push(outcome),
                Err(e) => report.targets.push(TargetOutcome::failed(target, e)),
            }
        }

        let ok = ok.load(Ordering::Relaxed);
        let failed = failed.load(Ordering::Relaxed);
        tracing::info!(source = %winner.location, ok, failed, "reconcile: propagation complete");
        report
    }

    /// Run a full pass at time `now_ms`.
    pub async fn run(&self, now_ms: i64) -> Result<PassReport, FleetError> {
        let scan = self.scan().await?;
        let winner = validate(select(&scan.replicas)?, now_ms)?;
        tracing::info!(
            source = %winner.location,
            status = %credential::format_expiration(winner.expires_at_ms, now_ms),
            "reconcile: freshest replica selected"
        );

        let mut targets = vec![ReplicaLocation::Host];
        targets.extend(scan.sandboxes.iter().cloned().map(ReplicaLocation::Sandbox));
        let sync = self.propagate(winner, &targets).await;
        finish(scan.outcomes, winner, now_ms, sync)
    }

    /// Like [`Reconciler::run`], but only writes to the sandbox `name`.
    pub async fn sync_to(&self, name: &str, now_ms: i64) -> Result<PassReport, FleetError> {
        let scan = self.scan().await?;
        let winner = validate(select(&scan.replicas)?, now_ms)?;
        let sync = self.propagate(winner, &[ReplicaLocation::Sandbox(name.to_owned())]).await;
        finish(scan.outcomes, winner, now_ms, sync)
    }
}

/// The replica with the strictly greatest expiry; the first one on ties.
pub fn select(replicas: &[Replica]) -> Result<&Replica, FleetError> {
    let mut best: Option<&Replica> = None;
    for replica in replicas {
        match best {
            Some(b) if replica.expires_at_ms <= b.expires_at_ms => {}
            _ => best = Some(replica),
        }
    }
    best.ok_or(FleetError::NoCredentialsFound)
}

/// Reject an expired winner.
pub fn validate(winner: &Replica, now_ms: i64) -> Result<&Replica, FleetError> {
    if credential::is_expired(winner.expires_at_ms, now_ms) {
        return Err(FleetError::AllCredentialsExpired {
            latest: credential::format_expiration(winner.expires_at_ms, now_ms),
        });
    }
    Ok(winner)
}

fn finish(
    outcomes: Vec<ScanOutcome>,
    winner: &Replica,
    now_ms: i64,
    sync: SyncReport,
) -> Result<PassReport, FleetError> {
    if sync.attempted() > 0 && sync.synced() == 0 {
        return Err(FleetError::PropagationFailed { attempted: sync.attempted() });
    }
    Ok(PassReport {
        outcomes,
        winner: winner.location.clone(),
        expires_at_ms: winner.expires_at_ms,
        expires_soon: credential::expires_within_day(winner.expires_at_ms, now_ms),
        sync,
    })
}

/// Extract a sandbox replica to a temp file and parse it. The temp file is
/// removed when this returns.
async fn read_sandbox_replica(
    engine: &dyn Engine,
    name: &str,
    remote: &str,
) -> Result<Credentials, String> {
    let temp = tempfile::Builder::new()
        .prefix("fleet-creds-")
        .suffix(".json")
        .tempfile()
        .map_err(|e| format!("cannot create temp file: {e}"))?;
    engine
        .copy_out(name, remote, temp.path())
        .await
        .and_then(|o| o.check())
        .map_err(|e| format!("could not read credentials: {e:#}"))?;
    Credentials::read(temp.path()).map_err(|e| e.to_string())
}

fn stage(raw: &[u8]) -> anyhow::Result<tempfile::NamedTempFile> {
    use std::io::Write;
    let mut file = tempfile::Builder::new().prefix("fleet-sync-").suffix(".json").tempfile()?;
    file.write_all(raw)?;
    file.flush()?;
    Ok(file)
}

fn write_host(path: &std::path::Path, raw: &[u8]) -> TargetOutcome {
    match persist::write_atomic(path, raw, Some(persist::CREDENTIALS_MODE)) {
        Ok(()) => {
            tracing::info!(target_location = "host", "reconcile: synced");
            TargetOutcome { location: ReplicaLocation::Host, result: Ok(()), warning: None }
        }
        Err(e) => {
            tracing::warn!(target_location = "host", err = %e, "reconcile: sync failed");
            TargetOutcome::failed(ReplicaLocation::Host, e)
        }
    }
}

async fn write_sandbox(
    engine: &dyn Engine,
    name: &str,
    local: &std::path::Path,
    remote: &str,
    owner: &str,
) -> TargetOutcome {
    let location = ReplicaLocation::Sandbox(name.to_owned());
    let copied = engine.copy_in(local, name, remote).await.and_then(|o| o.check());
    if let Err(e) = copied {
        tracing::warn!(sandbox = %name, err = %e, "reconcile: sync failed");
        return TargetOutcome::failed(location, format!("{e:#}"));
    }

    let chown = engine
        .exec(name, Some("root"), &["chown", owner, remote])
        .await
        .and_then(|o| o.check());
    let warning = match chown {
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(sandbox = %name, err = %e, "reconcile: synced but ownership not fixed");
            Some(format!("failed to fix ownership: {e:#}"))
        }
    };
    tracing::info!(sandbox = %name, "reconcile: synced");
    TargetOutcome { location, result: Ok(()), warning }
}

impl TargetOutcome {
    fn failed(location: ReplicaLocation, reason: impl fmt::Display) -> Self {
        Self { location, result: Err(reason.to_string()), warning: None }
    }
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;
