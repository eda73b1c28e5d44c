// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Execution boundary: every read or write against the container engine.
//!
//! The rest of the crate talks to sandboxes only through [`Engine`]. The
//! production implementation shells out to the `docker` CLI
//! ([`docker::DockerCli`]); [`throttle::Throttle`] wraps any engine to cap
//! concurrent process spawns and optionally bound each call with a timeout.

pub mod docker;
pub mod throttle;

use std::path::Path;

use futures_util::future::BoxFuture;

/// Captured result of one engine call.
///
/// A nonzero exit is not an `Err`: callers decide whether a failed command
/// is fatal, a sentinel, or a meaningful answer (e.g. `grep -q`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self { code: Some(0), stdout: stdout.into(), stderr: String::new() }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self { code: Some(code), stdout: String::new(), stderr: stderr.into() }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Convert a nonzero exit into an error carrying the trimmed stderr.
    pub fn check(self) -> anyhow::Result<Self> {
        if self.success() {
            return Ok(self);
        }
        let stderr = self.stderr.trim();
        match self.code {
            Some(code) if stderr.is_empty() => anyhow::bail!("exit status {code}"),
            Some(code) => anyhow::bail!("exit status {code}: {stderr}"),
            None => anyhow::bail!("terminated by signal"),
        }
    }
}

/// The container engine as seen by the fleet core.
///
/// Every method returns `Err` only when the call itself could not be made
/// (binary missing, spawn failure, timeout). Methods take borrowed arguments
/// and return futures that own copies of them.
pub trait Engine: Send + Sync {
    /// Bulk list: one `name\tstatus\tstate\tcreated` row per sandbox.
    fn list(&self, all: bool) -> BoxFuture<'_, anyhow::Result<ExecOutput>>;

    /// Structured inspect document for one sandbox.
    fn inspect(&self, name: &str) -> BoxFuture<'_, anyhow::Result<ExecOutput>>;

    /// The last `tail` lines of the sandbox's log.
    fn logs(&self, name: &str, tail: usize) -> BoxFuture<'_, anyhow::Result<ExecOutput>>;

    /// Run `argv` inside the sandbox, optionally as `user`.
    fn exec(
        &self,
        name: &str,
        user: Option<&str>,
        argv: &[&str],
    ) -> BoxFuture<'_, anyhow::Result<ExecOutput>>;

    /// Copy a file out of the sandbox to a local path.
    fn copy_out(
        &self,
        name: &str,
        remote: &str,
        local: &Path,
    ) -> BoxFuture<'_, anyhow::Result<ExecOutput>>;

    /// Copy a local file into the sandbox.
    fn copy_in(
        &self,
        local: &Path,
        name: &str,
        remote: &str,
    ) -> BoxFuture<'_, anyhow::Result<ExecOutput>>;

    fn stop(&self, name: &str) -> BoxFuture<'_, anyhow::Result<ExecOutput>>;

    fn start(&self, name: &str) -> BoxFuture<'_, anyhow::Result<ExecOutput>>;

    /// Force-remove the sandbox together with its anonymous volumes.
    fn remove(&self, name: &str) -> BoxFuture<'_, anyhow::Result<ExecOutput>>;

    fn remove_volume(&self, volume: &str) -> BoxFuture<'_, anyhow::Result<ExecOutput>>;
}

/// Run a shell snippet inside the sandbox via `sh -c`.
pub async fn sh(
    engine: &dyn Engine,
    name: &str,
    user: Option<&str>,
    script: &str,
) -> anyhow::Result<ExecOutput> {
    engine.exec(name, user, &["sh", "-c", script]).await
}
