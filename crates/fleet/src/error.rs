// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;
use std::path::PathBuf;

/// Machine-readable error codes for fleet operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    EngineUnavailable,
    ReadError,
    NoCredentialsFound,
    AllCredentialsExpired,
    ProbeFailure,
    PropagationFailed,
    InvalidSelection,
    InvalidDomain,
    SandboxNotRunning,
    ResolverUpdate,
    Operation,
    Config,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EngineUnavailable => "ENGINE_UNAVAILABLE",
            Self::ReadError => "READ_ERROR",
            Self::NoCredentialsFound => "NO_CREDENTIALS_FOUND",
            Self::AllCredentialsExpired => "ALL_CREDENTIALS_EXPIRED",
            Self::ProbeFailure => "PROBE_FAILURE",
            Self::PropagationFailed => "PROPAGATION_FAILED",
            Self::InvalidSelection => "INVALID_SELECTION",
            Self::InvalidDomain => "INVALID_DOMAIN",
            Self::SandboxNotRunning => "SANDBOX_NOT_RUNNING",
            Self::ResolverUpdate => "RESOLVER_UPDATE",
            Self::Operation => "OPERATION",
            Self::Config => "CONFIG",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remediation shown alongside terminal credential outcomes.
const REAUTH_HINT: &str = "re-authenticate in any sandbox or on the host, then run refresh-tokens again";

/// Errors surfaced by the fleet core.
///
/// Unit-level failures (a single probe, a single replica, a single
/// propagation target) are recovered where they happen; only the variants
/// below ever reach a caller.
#[derive(Debug)]
pub enum FleetError {
    /// The bulk registry query could not run or exited nonzero.
    EngineUnavailable(String),
    /// A credential replica is missing or malformed.
    ReadError { path: PathBuf, reason: String },
    /// No replica could be read during a reconciliation pass.
    NoCredentialsFound,
    /// The freshest replica is itself expired.
    AllCredentialsExpired { latest: String },
    /// A single detail probe failed. Degraded to a sentinel by the fetcher.
    ProbeFailure { probe: &'static str, reason: String },
    /// Every propagation target failed.
    PropagationFailed { attempted: usize },
    /// A 1-based selection did not map to a listed sandbox.
    InvalidSelection(String),
    /// A domain contains characters that cannot be used in a resolver rule.
    InvalidDomain(String),
    /// The named sandbox does not exist or is not running.
    SandboxNotRunning(String),
    /// The remote resolver config could not be updated or restarted.
    ResolverUpdate { sandbox: String, reason: String },
    /// A lifecycle operation (stop, start, remove, inspect) failed.
    Operation { op: &'static str, sandbox: String, reason: String },
    /// The local configuration file could not be read or written.
    Config(String),
}

impl FleetError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::EngineUnavailable(_) => ErrorCode::EngineUnavailable,
            Self::ReadError { .. } => ErrorCode::ReadError,
            Self::NoCredentialsFound => ErrorCode::NoCredentialsFound,
            Self::AllCredentialsExpired { .. } => ErrorCode::AllCredentialsExpired,
            Self::ProbeFailure { .. } => ErrorCode::ProbeFailure,
            Self::PropagationFailed { .. } => ErrorCode::PropagationFailed,
            Self::InvalidSelection(_) => ErrorCode::InvalidSelection,
            Self::InvalidDomain(_) => ErrorCode::InvalidDomain,
            Self::SandboxNotRunning(_) => ErrorCode::SandboxNotRunning,
            Self::ResolverUpdate { .. } => ErrorCode::ResolverUpdate,
            Self::Operation { .. } => ErrorCode::Operation,
            Self::Config(_) => ErrorCode::Config,
        }
    }

    /// Suggested next step for the user, if there is one.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::NoCredentialsFound | Self::AllCredentialsExpired { .. } => Some(REAUTH_HINT),
            Self::EngineUnavailable(_) => Some("is the container engine running?"),
            _ => None,
        }
    }

    pub(crate) fn probe(probe: &'static str, reason: impl fmt::Display) -> Self {
        Self::ProbeFailure { probe, reason: reason.to_string() }
    }

    pub(crate) fn operation(op: &'static str, sandbox: &str, reason: impl fmt::Display) -> Self {
        Self::Operation { op, sandbox: sandbox.to_owned(), reason: reason.to_string() }
    }
}

impl fmt::Display for FleetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EngineUnavailable(reason) => {
                write!(f, "container engine unavailable: {reason}")
            }
            Self::ReadError { path, reason } => {
                write!(f, "cannot read credentials at {}: {reason}", path.display())
            }
            Self::NoCredentialsFound => f.write_str("no valid credentials found in host or sandboxes"),
            Self::AllCredentialsExpired { latest } => {
                write!(f, "all credentials are expired (latest: {latest})")
            }
            Self::ProbeFailure { probe, reason } => write!(f, "{probe} probe failed: {reason}"),
            Self::PropagationFailed { attempted } => {
                write!(f, "credential sync failed for all {attempted} target(s)")
            }
            Self::InvalidSelection(input) => write!(f, "invalid selection: {input:?}"),
            Self::InvalidDomain(domain) => write!(f, "invalid domain: {domain:?}"),
            Self::SandboxNotRunning(name) => write!(f, "sandbox {name} is not running"),
            Self::ResolverUpdate { sandbox, reason } => {
                write!(f, "failed to update resolver in {sandbox}: {reason}")
            }
            Self::Operation { op, sandbox, reason } => {
                write!(f, "failed to {op} {sandbox}: {reason}")
            }
            Self::Config(reason) => write!(f, "config error: {reason}"),
        }
    }
}

impl std::error::Error for FleetError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
