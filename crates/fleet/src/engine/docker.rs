// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::Path;
use std::process::Stdio;

use anyhow::Context;
use futures_util::future::{BoxFuture, FutureExt};

use super::{Engine, ExecOutput};

/// Go template for the bulk list call. Column order is parsed by `registry`.
pub const LIST_FORMAT: &str = "{{.Names}}\t{{.Status}}\t{{.State}}\t{{.CreatedAt}}";

/// [`Engine`] backed by the `docker` command-line client.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerCli {
    pub fn new() -> Self {
        Self::with_program("docker")
    }

    /// Use a different client binary (e.g. `podman`, or an absolute path).
    pub fn with_program(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn run(&self, args: Vec<String>) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        async move {
            tracing::trace!(program = %self.program, ?args, "engine call");
            let output = tokio::process::Command::new(&self.program)
                .args(&args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .with_context(|| format!("failed to run {}", self.program))?;
            Ok(ExecOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
        .boxed()
    }
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_owned()).collect()
}

impl Engine for DockerCli {
    fn list(&self, all: bool) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        let mut argv = args(&["ps"]);
        if all {
            argv.push("-a".to_owned());
        }
        argv.extend(args(&["--format", LIST_FORMAT]));
        self.run(argv)
    }

    fn inspect(&self, name: &str) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        self.run(args(&["inspect", name]))
    }

    fn logs(&self, name: &str, tail: usize) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        self.run(args(&["logs", "--tail", &tail.to_string(), name]))
    }

    fn exec(
        &self,
        name: &str,
        user: Option<&str>,
        argv: &[&str],
    ) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        let mut full = args(&["exec"]);
        if let Some(user) = user {
            full.extend(args(&["-u", user]));
        }
        full.push(name.to_owned());
        full.extend(args(argv));
        self.run(full)
    }

    fn copy_out(
        &self,
        name: &str,
        remote: &str,
        local: &Path,
    ) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        let source = format!("{name}:{remote}");
        self.run(vec!["cp".to_owned(), source, local.to_string_lossy().into_owned()])
    }

    fn copy_in(
        &self,
        local: &Path,
        name: &str,
        remote: &str,
    ) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        let dest = format!("{name}:{remote}");
        self.run(vec!["cp".to_owned(), local.to_string_lossy().into_owned(), dest])
    }

    fn stop(&self, name: &str) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        self.run(args(&["stop", name]))
    }

    fn start(&self, name: &str) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        self.run(args(&["start", name]))
    }

    fn remove(&self, name: &str) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        self.run(args(&["rm", "-f", "-v", name]))
    }

    fn remove_volume(&self, volume: &str) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        self.run(args(&["volume", "rm", volume]))
    }
}
