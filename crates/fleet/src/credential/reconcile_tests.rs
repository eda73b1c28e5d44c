// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::*;
use crate::engine::ExecOutput;
use crate::error::ErrorCode;
use crate::test_support::{credential_json, EngineCall, FakeEngine};

const NOW: i64 = 1_750_000_000_000;
const HOUR: i64 = 3_600_000;
const REMOTE: &str = "/home/node/.claude/.credentials.json";

fn config(host_path: &Path) -> ReconcileConfig {
    ReconcileConfig {
        host_path: host_path.to_path_buf(),
        remote_path: REMOTE.to_owned(),
        remote_owner: DEFAULT_REMOTE_OWNER.to_owned(),
        prefixes: vec!["mcl-".to_owned()],
    }
}

fn chown_ok(engine: FakeEngine) -> FakeEngine {
    engine.with_exec(|req| {
        if req.argv.first().map(String::as_str) == Some("chown") {
            ExecOutput::ok("")
        } else {
            ExecOutput::failed(1, "unexpected")
        }
    })
}

fn replica(location: ReplicaLocation, expires_at_ms: i64) -> Replica {
    Replica { location, path: PathBuf::from("/x"), expires_at_ms, raw: Vec::new() }
}

fn sandbox(name: &str) -> ReplicaLocation {
    ReplicaLocation::Sandbox(name.to_owned())
}

#[tokio::test]
async fn freshest_sandbox_wins_and_syncs_everywhere() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let host = dir.path().join(".credentials.json");
    std::fs::write(&host, credential_json(NOW - 2 * HOUR))?;
    let fresh = credential_json(NOW + 147 * HOUR);

    let engine = Arc::new(chown_ok(
        FakeEngine::new()
            .with_row("mcl-a", "running")
            .with_row("mcl-b", "running")
            .with_file("mcl-a", REMOTE, fresh.clone())
            .with_file("mcl-b", REMOTE, credential_json(NOW - 3 * HOUR)),
    ));
    let reconciler = Reconciler::new(engine.clone(), config(&host));

    let report = reconciler.run(NOW).await?;
    assert_eq!(report.winner, sandbox("mcl-a"));
    assert!(!report.expires_soon);
    assert_eq!(report.sync.to_string(), "synced 2/2");
    assert_eq!(std::fs::read_to_string(&host)?, fresh);
    assert_eq!(engine.file("mcl-b", REMOTE), Some(fresh.into_bytes()));
    assert_eq!(engine.count(|c| matches!(c, EngineCall::CopyIn { sandbox, .. } if sandbox == "mcl-a")), 0);
    assert!(engine.calls().contains(&EngineCall::Exec {
        sandbox: "mcl-b".into(),
        user: Some("root".into()),
        argv: vec!["chown".into(), "node:node".into(), REMOTE.into()],
    }));
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn host_write_is_owner_only() -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let dir = tempfile::tempdir()?;
    let host = dir.path().join("auth/.credentials.json");
    let engine = Arc::new(
        FakeEngine::new()
            .with_row("mcl-a", "running")
            .with_file("mcl-a", REMOTE, credential_json(NOW + 30 * HOUR)),
    );
    Reconciler::new(engine, config(&host)).run(NOW).await?;
    assert_eq!(std::fs::metadata(&host)?.permissions().mode() & 0o777, 0o600);
    Ok(())
}

#[tokio::test]
async fn nothing_readable_is_no_credentials_found() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = Arc::new(FakeEngine::new().with_row("mcl-a", "running"));
    let reconciler = Reconciler::new(engine.clone(), config(&dir.path().join(".credentials.json")));

    let err = reconciler.run(NOW).await.err();
    assert_eq!(err.map(|e| e.code()), Some(ErrorCode::NoCredentialsFound));
    assert_eq!(engine.count(|c| matches!(c, EngineCall::CopyIn { .. })), 0);
    assert!(!dir.path().join(".credentials.json").exists());
    Ok(())
}

#[tokio::test]
async fn expired_winner_stops_before_propagation() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let host = dir.path().join(".credentials.json");
    std::fs::write(&host, credential_json(NOW - 5 * HOUR))?;
    let engine = Arc::new(
        FakeEngine::new()
            .with_row("mcl-a", "running")
            .with_file("mcl-a", REMOTE, credential_json(NOW - HOUR)),
    );
    let reconciler = Reconciler::new(engine.clone(), config(&host));

    match reconciler.run(NOW).await {
        Err(FleetError::AllCredentialsExpired { latest }) => assert_eq!(latest, "EXPIRED 1.0h ago"),
        other => anyhow::bail!("unexpected result: {other:?}"),
    }
    assert_eq!(engine.count(|c| matches!(c, EngineCall::CopyIn { .. })), 0);
    assert_eq!(std::fs::read_to_string(&host)?, credential_json(NOW - 5 * HOUR));
    Ok(())
}

#[test]
fn select_picks_strict_maximum() -> anyhow::Result<()> {
    let replicas = vec![
        replica(ReplicaLocation::Host, NOW - HOUR),
        replica(sandbox("mcl-a"), NOW + 5 * HOUR),
        replica(sandbox("mcl-b"), NOW + 2 * HOUR),
    ];
    assert_eq!(select(&replicas)?.location, sandbox("mcl-a"));
    Ok(())
}

#[yare::parameterized(
    host_first = { vec![ReplicaLocation::Host, sandbox("mcl-a")], ReplicaLocation::Host },
    registry_order = { vec![sandbox("mcl-b"), sandbox("mcl-a")], sandbox("mcl-b") },
)]
fn select_ties_go_to_scan_order(order: Vec<ReplicaLocation>, expected: ReplicaLocation) {
    let replicas: Vec<Replica> = order.into_iter().map(|l| replica(l, NOW + HOUR)).collect();
    assert_eq!(select(&replicas).ok().map(|r| r.location.clone()), Some(expected));
}

#[test]
fn select_empty_is_no_credentials() {
    assert_eq!(select(&[]).err().map(|e| e.code()), Some(ErrorCode::NoCredentialsFound));
}

#[test]
fn validate_treats_now_as_expired() {
    let at_now = replica(ReplicaLocation::Host, NOW);
    assert_eq!(validate(&at_now, NOW).err().map(|e| e.code()), Some(ErrorCode::AllCredentialsExpired));
    let later = replica(ReplicaLocation::Host, NOW + 1);
    assert!(validate(&later, NOW).is_ok());
}

#[tokio::test]
async fn one_failed_target_does_not_block_others() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let host = dir.path().join(".credentials.json");
    std::fs::write(&host, credential_json(NOW + 10 * HOUR))?;
    let engine = Arc::new(chown_ok(
        FakeEngine::new()
            .with_row("mcl-a", "running")
            .with_row("mcl-b", "running")
            .with_copy_in_failure("mcl-a"),
    ));
    let report = Reconciler::new(engine.clone(), config(&host)).run(NOW).await?;

    assert_eq!(report.winner, ReplicaLocation::Host);
    assert!(report.expires_soon);
    assert_eq!(report.sync.to_string(), "synced 1/2");
    assert!(engine.file("mcl-b", REMOTE).is_some());
    let failed: Vec<_> = report.sync.targets.iter().filter(|t| t.result.is_err()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].location, sandbox("mcl-a"));
    // Both sandbox reads failed but the pass still scanned them.
    assert_eq!(report.outcomes.iter().filter(|o| o.result.is_err()).count(), 2);
    Ok(())
}

#[tokio::test]
async fn every_target_failing_is_propagation_failed() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    // A regular file where the auth directory should be makes the host unwritable.
    let blocker = dir.path().join("auth");
    std::fs::write(&blocker, "not a directory")?;
    let host = blocker.join(".credentials.json");
    let engine = Arc::new(
        FakeEngine::new()
            .with_row("mcl-a", "running")
            .with_row("mcl-b", "running")
            .with_file("mcl-a", REMOTE, credential_json(NOW + 48 * HOUR))
            .with_copy_in_failure("mcl-b"),
    );

    match Reconciler::new(engine, config(&host)).run(NOW).await {
        Err(FleetError::PropagationFailed { attempted }) => assert_eq!(attempted, 2),
        other => anyhow::bail!("unexpected result: {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn failed_chown_still_counts_as_synced() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let host = dir.path().join(".credentials.json");
    std::fs::write(&host, credential_json(NOW + 30 * HOUR))?;
    // Default exec handler exits 1, so chown fails.
    let engine = Arc::new(FakeEngine::new().with_row("mcl-a", "running"));

    let report = Reconciler::new(engine, config(&host)).run(NOW).await?;
    assert_eq!(report.sync.to_string(), "synced 1/1");
    assert!(report.sync.targets[0].warning.is_some());
    Ok(())
}

#[tokio::test]
async fn only_source_means_nothing_to_sync() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let host = dir.path().join(".credentials.json");
    std::fs::write(&host, credential_json(NOW + 30 * HOUR))?;
    let engine = Arc::new(FakeEngine::new());

    let report = Reconciler::new(engine, config(&host)).run(NOW).await?;
    assert_eq!(report.sync.to_string(), "synced 0/0");
    Ok(())
}

#[tokio::test]
async fn sync_to_writes_one_sandbox() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let host = dir.path().join(".credentials.json");
    std::fs::write(&host, credential_json(NOW + 30 * HOUR))?;
    let engine = Arc::new(chown_ok(
        FakeEngine::new().with_row("mcl-a", "running").with_row("mcl-b", "running"),
    ));

    let report = Reconciler::new(engine.clone(), config(&host)).sync_to("mcl-b", NOW).await?;
    assert_eq!(report.sync.to_string(), "synced 1/1");
    assert!(engine.file("mcl-b", REMOTE).is_some());
    assert!(engine.file("mcl-a", REMOTE).is_none());
    Ok(())
}

#[tokio::test]
async fn scan_failure_is_engine_unavailable() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = Arc::new(FakeEngine::new().with_list_failure());
    let err = Reconciler::new(engine, config(&dir.path().join("c.json"))).scan().await.err();
    assert_eq!(err.map(|e| e.code()), Some(ErrorCode::EngineUnavailable));
    Ok(())
}

#[tokio::test]
async fn scan_records_every_location_in_order() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = Arc::new(
        FakeEngine::new()
            .with_row("mcl-a", "running")
            .with_row("mcl-b", "running")
            .with_row("mcl-c", "exited")
            .with_file("mcl-b", REMOTE, credential_json(NOW + HOUR))
            .with_file("mcl-a", REMOTE, "{not json"),
    );
    let scan = Reconciler::new(engine, config(&dir.path().join("c.json"))).scan().await?;

    let locations: Vec<_> = scan.outcomes.iter().map(|o| o.location.to_string()).collect();
    assert_eq!(locations, vec!["host", "mcl-a", "mcl-b"]);
    assert_eq!(scan.sandboxes, vec!["mcl-a".to_owned(), "mcl-b".to_owned()]);
    assert_eq!(scan.replicas.len(), 1);
    assert_eq!(scan.replicas[0].location, sandbox("mcl-b"));
    assert_eq!(scan.outcomes[2].result, Ok(NOW + HOUR));
    Ok(())
}

#[tokio::test]
async fn far_past_expiry_is_reported_not_overflowed() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let host = dir.path().join(".credentials.json");
    std::fs::write(&host, credential_json(i64::MIN + 1))?;
    let engine = Arc::new(FakeEngine::new());
    let reconciler = Reconciler::new(engine, config(&host));

    match reconciler.run(NOW).await {
        Err(FleetError::AllCredentialsExpired { latest }) => {
            assert!(latest.starts_with("EXPIRED "), "{latest}");
        }
        other => anyhow::bail!("unexpected result: {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn extraction_copies_are_removed_after_scan() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = Arc::new(
        FakeEngine::new()
            .with_row("mcl-good", "running")
            .with_row("mcl-bad", "running")
            .with_row("mcl-none", "running")
            .with_file("mcl-good", REMOTE, credential_json(NOW + HOUR))
            .with_file("mcl-bad", REMOTE, "{not json"),
    );
    let scan = Reconciler::new(engine.clone(), config(&dir.path().join("c.json"))).scan().await?;
    assert_eq!(scan.replicas.len(), 1);

    let copies = engine.copied_out_paths();
    assert_eq!(copies.len(), 3);
    for path in copies {
        assert!(!path.exists(), "left behind: {}", path.display());
    }
    Ok(())
}
