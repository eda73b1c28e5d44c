// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command-line configuration and the persisted config file.
//!
//! Flags fall back to `COOP_FLEET_*` environment variables. Values not given
//! on the command line come from the TOML config file, then from defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::credential::{persist, CREDENTIALS_FILE};
use crate::engine::throttle::DEFAULT_MAX_CONCURRENT_CALLS;
use crate::error::FleetError;

/// Prefix used when neither the flag nor the file sets one.
pub const DEFAULT_PREFIX: &str = "mcl-";

/// Prefix of sandboxes created before the prefix was configurable.
pub const LEGACY_PREFIX: &str = "mcl-";

/// Table width when the terminal size is unknown.
pub const DEFAULT_WIDTH: usize = 120;

/// Allowed domains written when a config file has none yet.
pub const DEFAULT_ALLOWED_DOMAINS: &[&str] = &[
    "api.anthropic.com",
    "statsig.anthropic.com",
    "sentry.io",
    "github.com",
    "api.github.com",
    "registry.npmjs.org",
    "pypi.org",
    "files.pythonhosted.org",
];

/// Global flags shared by every subcommand.
#[derive(Debug, Clone, clap::Args)]
pub struct FleetConfig {
    /// Sandbox name prefix. Defaults to `[containers] prefix` from the config file.
    #[arg(long, global = true, env = "COOP_FLEET_PREFIX")]
    pub prefix: Option<String>,

    /// Extra prefix scanned for credentials and name lookups.
    #[arg(long, global = true, env = "COOP_FLEET_LEGACY_PREFIX")]
    pub legacy_prefix: Option<String>,

    /// Directory holding the host credential replica.
    #[arg(long, global = true, env = "COOP_FLEET_AUTH_DIR")]
    pub auth_dir: Option<PathBuf>,

    /// Path to the TOML config file.
    #[arg(long, global = true, env = "COOP_FLEET_CONFIG")]
    pub config_file: Option<PathBuf>,

    /// Container engine CLI.
    #[arg(long, global = true, default_value = "docker", env = "COOP_FLEET_DOCKER")]
    pub docker: String,

    /// Maximum concurrent engine calls across the whole fleet.
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_CONCURRENT_CALLS, env = "COOP_FLEET_MAX_CONCURRENT_CALLS")]
    pub max_concurrent_calls: usize,

    /// Fail any single engine call that runs longer than this. Off by default.
    #[arg(long, global = true, env = "COOP_FLEET_CALL_TIMEOUT_MS")]
    pub call_timeout_ms: Option<u64>,

    /// Terminal width for table rendering. Falls back to `$COLUMNS`.
    #[arg(long, global = true, env = "COOP_FLEET_WIDTH")]
    pub width: Option<usize>,

    /// Log format (json or text).
    #[arg(long, global = true, default_value = "text", env = "COOP_FLEET_LOG_FORMAT")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn", env = "COOP_FLEET_LOG_LEVEL")]
    pub log_level: String,
}

impl FleetConfig {
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_file.clone().unwrap_or_else(|| config_dir().join("config.toml"))
    }

    /// Merge flags with the config file at [`FleetConfig::config_path`].
    pub fn resolve(&self) -> Result<Settings, FleetError> {
        let config_path = self.config_path();
        let file = FileConfig::load(&config_path)?;
        Ok(self.resolve_with(file, config_path, |key| std::env::var(key).ok()))
    }

    fn resolve_with(
        &self,
        file: FileConfig,
        config_path: PathBuf,
        env: impl Fn(&str) -> Option<String>,
    ) -> Settings {
        let prefix = self
            .prefix
            .clone()
            .or_else(|| file.containers.prefix.clone())
            .unwrap_or_else(|| DEFAULT_PREFIX.to_owned());
        let legacy = self
            .legacy_prefix
            .clone()
            .or_else(|| file.containers.legacy_prefix.clone())
            .unwrap_or_else(|| LEGACY_PREFIX.to_owned());
        let auth_dir = self
            .auth_dir
            .clone()
            .or_else(|| file.auth.dir.clone())
            .unwrap_or_else(|| config_dir_with(&env).join("auth"));
        let width = self
            .width
            .or_else(|| env("COLUMNS").and_then(|c| c.trim().parse().ok()))
            .unwrap_or(DEFAULT_WIDTH);

        let mut prefixes = vec![prefix.clone()];
        if !legacy.is_empty() && legacy != prefix {
            prefixes.push(legacy);
        }
        Settings { prefix, prefixes, auth_dir, config_path, width, file }
    }
}

/// Effective settings after merging flags, file and defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub prefix: String,
    /// Configured prefix first, then the legacy prefix when it differs.
    pub prefixes: Vec<String>,
    pub auth_dir: PathBuf,
    pub config_path: PathBuf,
    pub width: usize,
    pub file: FileConfig,
}

impl Settings {
    pub fn host_credentials(&self) -> PathBuf {
        self.auth_dir.join(CREDENTIALS_FILE)
    }
}

/// Config directory: `$COOP_FLEET_CONFIG_DIR`, then XDG, then `$HOME`.
pub fn config_dir() -> PathBuf {
    config_dir_with(|key| std::env::var(key).ok())
}

fn config_dir_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(dir) = env("COOP_FLEET_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(xdg) = env("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("coop/fleet");
    }
    if let Some(home) = env("HOME") {
        return PathBuf::from(home).join(".config/coop/fleet");
    }
    PathBuf::from(".coop/fleet")
}

// -- Config file ----------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub containers: ContainersSection,
    pub firewall: FirewallSection,
    pub auth: AuthSection,
    /// Named paths (`name = "path"`) for tooling that extends the fleet.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub bindings: BTreeMap<String, PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainersSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallSection {
    /// `None` until the file lists domains explicitly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_domains: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl FileConfig {
    /// Load `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, FleetError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::debug!(path = %path.display(), "config: loaded");
                toml::from_str(&contents)
                    .map_err(|e| FleetError::Config(format!("{}: {e}", path.display())))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(FleetError::Config(format!("{}: {e}", path.display()))),
        }
    }

    /// Write atomically, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), FleetError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| FleetError::Config(e.to_string()))?;
        persist::write_atomic(path, contents.as_bytes(), None)
            .map_err(|e| FleetError::Config(format!("{}: {e:#}", path.display())))
    }

    /// Allowed domains, falling back to [`DEFAULT_ALLOWED_DOMAINS`].
    pub fn allowed_domains(&self) -> Vec<String> {
        match &self.firewall.allowed_domains {
            Some(domains) => domains.clone(),
            None => DEFAULT_ALLOWED_DOMAINS.iter().map(|d| (*d).to_owned()).collect(),
        }
    }
}

/// Add `domain` to the file's allowed domains unless already listed.
///
/// Returns whether the file changed.
pub fn persist_allowed_domain(path: &Path, domain: &str) -> Result<bool, FleetError> {
    let mut file = FileConfig::load(path)?;
    let mut domains = file.allowed_domains();
    if domains.iter().any(|d| d == domain) {
        return Ok(false);
    }
    domains.push(domain.to_owned());
    file.firewall.allowed_domains = Some(domains);
    file.save(path)?;
    tracing::info!(path = %path.display(), domain, "config: allowed domain persisted");
    Ok(true)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
