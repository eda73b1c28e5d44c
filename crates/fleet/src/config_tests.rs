// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;

use clap::Parser;

use super::*;
use crate::error::ErrorCode;

#[derive(Parser)]
struct TestCli {
    #[command(flatten)]
    config: FleetConfig,
}

fn parse(args: &[&str]) -> anyhow::Result<FleetConfig> {
    let argv = std::iter::once("coopfleet").chain(args.iter().copied());
    Ok(TestCli::try_parse_from(argv)?.config)
}

fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> =
        pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
    move |key| map.get(key).cloned()
}

#[test]
fn flags_parse() -> anyhow::Result<()> {
    let config = parse(&[
        "--prefix",
        "fleet-",
        "--max-concurrent-calls",
        "4",
        "--call-timeout-ms",
        "2500",
        "--width",
        "200",
    ])?;
    assert_eq!(config.prefix.as_deref(), Some("fleet-"));
    assert_eq!(config.max_concurrent_calls, 4);
    assert_eq!(config.call_timeout(), Some(Duration::from_millis(2500)));
    assert_eq!(config.width, Some(200));
    Ok(())
}

#[test]
fn timeout_is_off_by_default() -> anyhow::Result<()> {
    let config = parse(&[])?;
    assert_eq!(config.call_timeout(), None);
    assert_eq!(config.max_concurrent_calls, DEFAULT_MAX_CONCURRENT_CALLS);
    Ok(())
}

#[yare::parameterized(
    explicit = { &[("COOP_FLEET_CONFIG_DIR", "/etc/fleet"), ("HOME", "/home/u")], "/etc/fleet" },
    xdg = { &[("XDG_CONFIG_HOME", "/x"), ("HOME", "/home/u")], "/x/coop/fleet" },
    home = { &[("HOME", "/home/u")], "/home/u/.config/coop/fleet" },
    nothing = { &[], ".coop/fleet" },
)]
fn config_dir_precedence(env: &[(&str, &str)], expected: &str) {
    assert_eq!(config_dir_with(env_of(env)), PathBuf::from(expected));
}

#[test]
fn flags_beat_file_beats_defaults() -> anyhow::Result<()> {
    let file: FileConfig = toml::from_str(
        r#"
        [containers]
        prefix = "team-"

        [auth]
        dir = "/srv/auth"
        "#,
    )?;

    let defaults = parse(&[])?.resolve_with(FileConfig::default(), "c.toml".into(), env_of(&[("HOME", "/h")]));
    assert_eq!(defaults.prefix, DEFAULT_PREFIX);
    assert_eq!(defaults.prefixes, vec![DEFAULT_PREFIX.to_owned()]);
    assert_eq!(defaults.auth_dir, PathBuf::from("/h/.config/coop/fleet/auth"));
    assert_eq!(defaults.width, DEFAULT_WIDTH);

    let from_file = parse(&[])?.resolve_with(file.clone(), "c.toml".into(), env_of(&[]));
    assert_eq!(from_file.prefix, "team-");
    assert_eq!(from_file.prefixes, vec!["team-".to_owned(), LEGACY_PREFIX.to_owned()]);
    assert_eq!(from_file.host_credentials(), PathBuf::from("/srv/auth/.credentials.json"));

    let from_flag = parse(&["--prefix", "cli-", "--auth-dir", "/tmp/a"])?.resolve_with(
        file,
        "c.toml".into(),
        env_of(&[("COLUMNS", "90")]),
    );
    assert_eq!(from_flag.prefix, "cli-");
    assert_eq!(from_flag.auth_dir, PathBuf::from("/tmp/a"));
    assert_eq!(from_flag.width, 90);
    Ok(())
}

#[test]
fn missing_file_is_defaults() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let file = FileConfig::load(&dir.path().join("nope.toml"))?;
    assert_eq!(file, FileConfig::default());
    assert_eq!(file.allowed_domains().len(), DEFAULT_ALLOWED_DOMAINS.len());
    Ok(())
}

#[test]
fn malformed_file_is_config_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[containers\nprefix = 1")?;
    assert_eq!(FileConfig::load(&path).err().map(|e| e.code()), Some(ErrorCode::Config));
    Ok(())
}

#[test]
fn bindings_round_trip_through_save() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nested/config.toml");
    let mut file = FileConfig::default();
    file.bindings.insert("dotfiles".into(), PathBuf::from("/home/u/dotfiles"));
    file.save(&path)?;
    assert_eq!(FileConfig::load(&path)?, file);
    Ok(())
}

#[test]
fn persist_seeds_defaults_then_dedupes() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("config.toml");

    assert!(persist_allowed_domain(&path, "example.com")?);
    let domains = FileConfig::load(&path)?.allowed_domains();
    assert_eq!(domains.len(), DEFAULT_ALLOWED_DOMAINS.len() + 1);
    assert_eq!(domains.last().map(String::as_str), Some("example.com"));

    assert!(!persist_allowed_domain(&path, "example.com")?);
    assert!(!persist_allowed_domain(&path, "github.com")?);
    assert_eq!(FileConfig::load(&path)?.allowed_domains(), domains);
    Ok(())
}

#[test]
fn persist_keeps_other_sections() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[containers]\nprefix = \"team-\"\n\n[firewall]\nallowed_domains = [\"a.dev\"]\n",
    )?;

    persist_allowed_domain(&path, "b.dev")?;
    let file = FileConfig::load(&path)?;
    assert_eq!(file.containers.prefix.as_deref(), Some("team-"));
    assert_eq!(file.allowed_domains(), vec!["a.dev".to_owned(), "b.dev".to_owned()]);
    Ok(())
}
