// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential artifact reading and expiry math.
//!
//! The artifact is the agent's OAuth credentials file. Only the nested
//! `claudeAiOauth.expiresAt` field (epoch milliseconds) is interpreted; the
//! raw bytes are kept so propagation copies the file verbatim.

pub mod persist;
pub mod reconcile;

use std::path::Path;

use serde::Deserialize;

use crate::error::FleetError;

/// File name of the artifact, both on the host and inside sandboxes.
pub const CREDENTIALS_FILE: &str = ".credentials.json";

const MS_PER_HOUR: f64 = 3_600_000.0;
const DAY_MS: i64 = 24 * 3_600_000;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactDoc {
    claude_ai_oauth: OAuthSection,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OAuthSection {
    expires_at: i64,
}

/// A parsed credential artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    raw: Vec<u8>,
    expires_at_ms: i64,
}

impl Credentials {
    /// Parse artifact bytes. `origin` names the source in errors.
    pub fn parse(raw: Vec<u8>, origin: &Path) -> Result<Self, FleetError> {
        let doc: ArtifactDoc = serde_json::from_slice(&raw).map_err(|e| FleetError::ReadError {
            path: origin.to_path_buf(),
            reason: format!("malformed credentials: {e}"),
        })?;
        Ok(Self { raw, expires_at_ms: doc.claude_ai_oauth.expires_at })
    }

    /// Read and parse the artifact at `path`.
    pub fn read(path: &Path) -> Result<Self, FleetError> {
        let raw = std::fs::read(path).map_err(|e| FleetError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse(raw, path)
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.raw
    }

    pub fn expires_at_ms(&self) -> i64 {
        self.expires_at_ms
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        is_expired(self.expires_at_ms, now_ms)
    }

    pub fn time_until_expiration(&self, now_ms: i64) -> i64 {
        time_until_expiration(self.expires_at_ms, now_ms)
    }

    pub fn format_expiration(&self, now_ms: i64) -> String {
        format_expiration(self.expires_at_ms, now_ms)
    }
}

/// Expiry at exactly `now` counts as expired.
pub fn is_expired(expires_at_ms: i64, now_ms: i64) -> bool {
    expires_at_ms <= now_ms
}

/// Milliseconds until expiry; negative once expired.
pub fn time_until_expiration(expires_at_ms: i64, now_ms: i64) -> i64 {
    expires_at_ms.saturating_sub(now_ms)
}

/// `EXPIRED {h}h ago`, `Valid for {h}h` under a day, else `Valid for {d}d`.
pub fn format_expiration(expires_at_ms: i64, now_ms: i64) -> String {
    let remaining = time_until_expiration(expires_at_ms, now_ms);
    if is_expired(expires_at_ms, now_ms) {
        return format!("EXPIRED {:.1}h ago", remaining.saturating_neg() as f64 / MS_PER_HOUR);
    }
    if remaining < DAY_MS {
        return format!("Valid for {:.1}h", remaining as f64 / MS_PER_HOUR);
    }
    format!("Valid for {:.1}d", remaining as f64 / MS_PER_HOUR / 24.0)
}

/// Compact table badge: `✓ 147.0h`, `⚠ 3.5h` under a day, `✗ EXPIRED`.
pub fn auth_badge(expires_at_ms: i64, now_ms: i64) -> String {
    if is_expired(expires_at_ms, now_ms) {
        return "✗ EXPIRED".to_owned();
    }
    let remaining = time_until_expiration(expires_at_ms, now_ms);
    let hours = remaining as f64 / MS_PER_HOUR;
    if remaining < DAY_MS {
        format!("⚠ {hours:.1}h")
    } else {
        format!("✓ {hours:.1}h")
    }
}

/// True when a valid token has less than a day left.
pub fn expires_within_day(expires_at_ms: i64, now_ms: i64) -> bool {
    time_until_expiration(expires_at_ms, now_ms) < DAY_MS
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
