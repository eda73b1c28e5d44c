// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sandbox registry: one bulk list call, parsed into rows.

use std::fmt;

use chrono::{DateTime, FixedOffset};

use crate::engine::Engine;
use crate::error::FleetError;

/// Creation timestamp layout printed by the engine's list call,
/// e.g. `2025-01-15 10:30:00 +0000 UTC`.
pub const CREATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z %Z";

/// Which sandboxes a list call includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListScope {
    /// Running sandboxes only.
    Running,
    /// Running and stopped sandboxes.
    All,
}

/// Lifecycle state reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Running,
    Exited,
    Other(String),
}

impl LifecycleState {
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "running" => Self::Running,
            "exited" => Self::Exited,
            other => Self::Other(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Running => "running",
            Self::Exited => "exited",
            Self::Other(s) => s,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed row of the bulk list call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryRow {
    pub name: String,
    /// Human status, e.g. `Up 2 hours`.
    pub status: String,
    pub state: LifecycleState,
    /// `None` when the engine's timestamp did not parse.
    pub created_at: Option<DateTime<FixedOffset>>,
}

/// Strip one leading occurrence of `prefix`; names without it pass through.
pub fn short_name<'a>(name: &'a str, prefix: &str) -> &'a str {
    name.strip_prefix(prefix).unwrap_or(name)
}

/// Expand a user-supplied short name to a full sandbox name.
pub fn resolve_name(input: &str, prefix: &str) -> String {
    if input.starts_with(prefix) {
        input.to_owned()
    } else {
        format!("{prefix}{input}")
    }
}

pub fn parse_created_at(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(raw.trim(), CREATED_AT_FORMAT).ok()
}

/// Parse list output, keeping rows whose name starts with `prefix`.
///
/// Blank lines and rows with fewer than four columns are skipped.
pub fn parse_rows(output: &str, prefix: &str) -> Vec<RegistryRow> {
    let mut rows = Vec::new();
    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 4 {
            tracing::debug!(line, "registry: skipping malformed row");
            continue;
        }
        let name = parts[0].trim();
        if !name.starts_with(prefix) {
            continue;
        }
        let created_at = parse_created_at(parts[3]);
        if created_at.is_none() {
            tracing::debug!(name, raw = parts[3], "registry: unparsable creation time");
        }
        rows.push(RegistryRow {
            name: name.to_owned(),
            status: parts[1].to_owned(),
            state: LifecycleState::parse(parts[2]),
            created_at,
        });
    }
    rows
}

/// List sandboxes whose names start with `prefix`.
pub async fn query(
    engine: &dyn Engine,
    prefix: &str,
    scope: ListScope,
) -> Result<Vec<RegistryRow>, FleetError> {
    query_prefixes(engine, &[prefix], scope).await
}

/// List sandboxes matching any of `prefixes` from a single bulk call.
///
/// Rows are grouped by prefix in the order given and de-duplicated by name,
/// so a name matching two prefixes appears once, under the first.
pub async fn query_prefixes(
    engine: &dyn Engine,
    prefixes: &[&str],
    scope: ListScope,
) -> Result<Vec<RegistryRow>, FleetError> {
    let output = engine
        .list(scope == ListScope::All)
        .await
        .map_err(|e| FleetError::EngineUnavailable(format!("{e:#}")))?
        .check()
        .map_err(|e| FleetError::EngineUnavailable(format!("{e:#}")))?;

    let mut rows: Vec<RegistryRow> = Vec::new();
    for prefix in prefixes {
        for row in parse_rows(&output.stdout, prefix) {
            if !rows.iter().any(|r| r.name == row.name) {
                rows.push(row);
            }
        }
    }
    tracing::debug!(count = rows.len(), ?scope, "registry: query complete");
    Ok(rows)
}

/// Look up one sandbox by full name, including stopped ones.
pub async fn find(engine: &dyn Engine, name: &str) -> Result<Option<RegistryRow>, FleetError> {
    let rows = query(engine, name, ListScope::All).await?;
    Ok(rows.into_iter().find(|r| r.name == name))
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
