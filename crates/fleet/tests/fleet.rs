// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end passes through the public fleet API against a scripted engine.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use coopfleet::config::{FileConfig, Settings};
use coopfleet::credential::reconcile::ReplicaLocation;
use coopfleet::credential::Credentials;
use coopfleet::detail::ProbeConfig;
use coopfleet::display::DisplayMode;
use coopfleet::engine::{Engine, ExecOutput};
use coopfleet::error::ErrorCode;
use coopfleet::fleet::{epoch_ms, Fleet};
use coopfleet::registry::ListScope;
use coopfleet::test_support::{credential_json, EngineCall, FakeEngine};

const HOUR_MS: i64 = 3_600_000;

fn settings(dir: &Path) -> Settings {
    Settings {
        prefix: "mcl-".to_owned(),
        prefixes: vec!["mcl-".to_owned()],
        auth_dir: dir.join("auth"),
        config_path: dir.join("config.toml"),
        width: 120,
        file: FileConfig::default(),
    }
}

fn fleet(engine: &Arc<FakeEngine>, dir: &Path) -> Fleet {
    let engine: Arc<dyn Engine> = Arc::clone(engine) as Arc<dyn Engine>;
    Fleet::new(engine, settings(dir)).with_settle(Duration::ZERO)
}

#[tokio::test]
async fn freshest_replica_reaches_host_and_stale_sandbox() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let now = epoch_ms();
    let remote = ProbeConfig::default().remote_credentials;
    let host = dir.path().join("auth/.credentials.json");
    std::fs::create_dir_all(dir.path().join("auth"))?;
    std::fs::write(&host, credential_json(now - 2 * HOUR_MS))?;

    let fresh = now + 147 * HOUR_MS;
    let engine = Arc::new(
        FakeEngine::new()
            .with_row("mcl-a", "running")
            .with_row("mcl-b", "running")
            .with_file("mcl-a", &remote, credential_json(fresh))
            .with_file("mcl-b", &remote, credential_json(now - 3 * HOUR_MS))
            .with_exec(|_| ExecOutput::ok("")),
    );

    let report = fleet(&engine, dir.path()).refresh_tokens().await?;
    assert_eq!(report.winner, ReplicaLocation::Sandbox("mcl-a".into()));
    assert_eq!(report.sync.to_string(), "synced 2/2");
    assert!(!report.expires_soon);

    assert_eq!(Credentials::read(&host)?.expires_at_ms(), fresh);
    let b = engine.file("mcl-b", &remote).ok_or_else(|| anyhow::anyhow!("mcl-b not written"))?;
    assert_eq!(b, credential_json(fresh).into_bytes());
    Ok(())
}

#[tokio::test]
async fn no_readable_replica_writes_nothing() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = Arc::new(FakeEngine::new().with_row("mcl-a", "running"));

    let err = fleet(&engine, dir.path()).refresh_tokens().await.err();
    assert_eq!(err.map(|e| e.code()), Some(ErrorCode::NoCredentialsFound));
    assert_eq!(engine.count(|c| matches!(c, EngineCall::CopyIn { .. })), 0);
    assert!(!dir.path().join("auth/.credentials.json").exists());
    Ok(())
}

#[tokio::test]
async fn listing_filters_by_prefix_and_renders() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = Arc::new(
        FakeEngine::new()
            .with_row("mcl-foo", "running")
            .with_row("other-bar", "running")
            .with_row("mcl-baz", "running")
            .with_exec(|req| {
                if req.line().starts_with("git ") {
                    ExecOutput::ok("main\n")
                } else {
                    ExecOutput::ok("")
                }
            }),
    );

    let ranked = fleet(&engine, dir.path()).list(ListScope::Running).await?;
    let mut names: Vec<&str> = ranked.records().iter().map(|r| r.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["mcl-baz", "mcl-foo"]);

    let table = ranked.render(DisplayMode::Numbered, 120);
    assert!(table.contains("1)"), "{table}");
    assert!(table.contains("2)"), "{table}");
    assert!(!table.contains("other-bar"), "{table}");
    Ok(())
}
