// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: a scripted engine and assertion helpers.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;

use crate::engine::{Engine, ExecOutput};

/// One recorded call against a [`FakeEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    List { all: bool },
    Inspect(String),
    Logs(String),
    Exec { sandbox: String, user: Option<String>, argv: Vec<String> },
    CopyOut { sandbox: String, remote: String, local: PathBuf },
    CopyIn { sandbox: String, remote: String },
    Stop(String),
    Start(String),
    Remove(String),
    RemoveVolume(String),
}

/// An exec invocation as seen by a scripted handler.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub sandbox: String,
    pub user: Option<String>,
    pub argv: Vec<String>,
}

impl ExecRequest {
    /// The script passed to `sh -c`, if this is a shell exec.
    pub fn script(&self) -> Option<&str> {
        match self.argv.as_slice() {
            [sh, flag, script] if sh == "sh" && flag == "-c" => Some(script),
            _ => None,
        }
    }

    /// The argv joined with spaces, for substring matching.
    pub fn line(&self) -> String {
        self.argv.join(" ")
    }
}

type ExecHandler = Arc<dyn Fn(&ExecRequest) -> ExecOutput + Send + Sync>;

/// In-memory [`Engine`] with scripted responses.
///
/// - `list` answers from the rows added with [`FakeEngine::with_row`], or
///   fails when [`FakeEngine::with_list_failure`] was set.
/// - `copy_out`/`copy_in` read and write an in-memory file table keyed by
///   `(sandbox, remote path)`.
/// - `exec` is answered by the handler from [`FakeEngine::with_exec`]; the
///   default handler exits 1.
pub struct FakeEngine {
    rows: Mutex<Vec<String>>,
    list_fails: Mutex<bool>,
    files: Mutex<HashMap<(String, String), Vec<u8>>>,
    inspect: Mutex<HashMap<String, String>>,
    logs: Mutex<HashMap<String, String>>,
    exec: Mutex<ExecHandler>,
    copy_in_failures: Mutex<HashSet<String>>,
    op_failures: Mutex<HashSet<String>>,
    calls: Mutex<Vec<EngineCall>>,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            list_fails: Mutex::new(false),
            files: Mutex::new(HashMap::new()),
            inspect: Mutex::new(HashMap::new()),
            logs: Mutex::new(HashMap::new()),
            exec: Mutex::new(Arc::new(|_| ExecOutput::failed(1, "no handler"))),
            copy_in_failures: Mutex::new(HashSet::new()),
            op_failures: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Add a registry row with a fixed creation timestamp.
    pub fn with_row(self, name: &str, state: &str) -> Self {
        let status = if state == "running" { "Up 2 hours" } else { "Exited (0) 1 hour ago" };
        self.with_raw_row(&format!("{name}\t{status}\t{state}\t2025-01-15 10:30:00 +0000 UTC"))
    }

    /// Add a raw, unparsed registry line.
    pub fn with_raw_row(self, line: &str) -> Self {
        self.rows.lock().push(line.to_owned());
        self
    }

    pub fn with_list_failure(self) -> Self {
        *self.list_fails.lock() = true;
        self
    }

    /// Seed a file inside a sandbox.
    pub fn with_file(self, sandbox: &str, remote: &str, content: impl Into<Vec<u8>>) -> Self {
        self.files.lock().insert((sandbox.to_owned(), remote.to_owned()), content.into());
        self
    }

    pub fn with_inspect(self, sandbox: &str, json: &str) -> Self {
        self.inspect.lock().insert(sandbox.to_owned(), json.to_owned());
        self
    }

    pub fn with_logs(self, sandbox: &str, logs: &str) -> Self {
        self.logs.lock().insert(sandbox.to_owned(), logs.to_owned());
        self
    }

    pub fn with_exec<F>(self, handler: F) -> Self
    where
        F: Fn(&ExecRequest) -> ExecOutput + Send + Sync + 'static,
    {
        *self.exec.lock() = Arc::new(handler);
        self
    }

    /// Make every copy into `sandbox` fail.
    pub fn with_copy_in_failure(self, sandbox: &str) -> Self {
        self.copy_in_failures.lock().insert(sandbox.to_owned());
        self
    }

    /// Make stop/start/remove fail for `sandbox`.
    pub fn with_op_failure(self, sandbox: &str) -> Self {
        self.op_failures.lock().insert(sandbox.to_owned());
        self
    }

    /// Delay every call, to observe concurrency.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock() = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }

    /// Number of recorded calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&EngineCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    /// Host-side destinations of every `copy_out`, in call order.
    pub fn copied_out_paths(&self) -> Vec<PathBuf> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                EngineCall::CopyOut { local, .. } => Some(local.clone()),
                _ => None,
            })
            .collect()
    }

    /// Current content of a sandbox file.
    pub fn file(&self, sandbox: &str, remote: &str) -> Option<Vec<u8>> {
        self.files.lock().get(&(sandbox.to_owned(), remote.to_owned())).cloned()
    }

    /// Highest number of calls observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record<T: Send + 'static>(
        &self,
        call: EngineCall,
        respond: impl FnOnce(&Self) -> anyhow::Result<T> + Send + 'static,
    ) -> BoxFuture<'_, anyhow::Result<T>> {
        self.calls.lock().push(call);
        let delay = *self.delay.lock();
        async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let result = respond(self);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
        .boxed()
    }

    fn lifecycle(&self, call: EngineCall, name: &str) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        let name = name.to_owned();
        self.record(call, move |engine| {
            if engine.op_failures.lock().contains(&name) {
                Ok(ExecOutput::failed(1, format!("Error response from daemon: {name}")))
            } else {
                Ok(ExecOutput::ok(format!("{name}\n")))
            }
        })
    }
}

impl Engine for FakeEngine {
    fn list(&self, all: bool) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        self.record(EngineCall::List { all }, move |engine| {
            if *engine.list_fails.lock() {
                return Ok(ExecOutput::failed(1, "Cannot connect to the Docker daemon"));
            }
            let rows = engine.rows.lock();
            let visible: Vec<&String> = rows
                .iter()
                .filter(|line| all || line.split('\t').nth(2) == Some("running"))
                .collect();
            let mut out = String::new();
            for line in visible {
                out.push_str(line);
                out.push('\n');
            }
            Ok(ExecOutput::ok(out))
        })
    }

    fn inspect(&self, name: &str) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        let name = name.to_owned();
        self.record(EngineCall::Inspect(name.clone()), move |engine| {
            Ok(match engine.inspect.lock().get(&name) {
                Some(json) => ExecOutput::ok(json.clone()),
                None => ExecOutput::failed(1, format!("Error: No such object: {name}")),
            })
        })
    }

    fn logs(&self, name: &str, _tail: usize) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        let name = name.to_owned();
        self.record(EngineCall::Logs(name.clone()), move |engine| {
            Ok(match engine.logs.lock().get(&name) {
                Some(logs) => ExecOutput::ok(logs.clone()),
                None => ExecOutput::failed(1, "no logs"),
            })
        })
    }

    fn exec(
        &self,
        name: &str,
        user: Option<&str>,
        argv: &[&str],
    ) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        let request = ExecRequest {
            sandbox: name.to_owned(),
            user: user.map(str::to_owned),
            argv: argv.iter().map(|s| (*s).to_owned()).collect(),
        };
        let call = EngineCall::Exec {
            sandbox: request.sandbox.clone(),
            user: request.user.clone(),
            argv: request.argv.clone(),
        };
        self.record(call, move |engine| {
            let handler = Arc::clone(&engine.exec.lock());
            Ok(handler(&request))
        })
    }

    fn copy_out(
        &self,
        name: &str,
        remote: &str,
        local: &Path,
    ) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        let key = (name.to_owned(), remote.to_owned());
        let local = local.to_path_buf();
        let call =
            EngineCall::CopyOut { sandbox: key.0.clone(), remote: key.1.clone(), local: local.clone() };
        self.record(call, move |engine| {
            let content = engine.files.lock().get(&key).cloned();
            match content {
                Some(bytes) => {
                    std::fs::write(&local, bytes)?;
                    Ok(ExecOutput::ok(""))
                }
                None => Ok(ExecOutput::failed(1, "Could not find the file")),
            }
        })
    }

    fn copy_in(
        &self,
        local: &Path,
        name: &str,
        remote: &str,
    ) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        let key = (name.to_owned(), remote.to_owned());
        let local = local.to_path_buf();
        let call = EngineCall::CopyIn { sandbox: key.0.clone(), remote: key.1.clone() };
        self.record(call, move |engine| {
            if engine.copy_in_failures.lock().contains(&key.0) {
                return Ok(ExecOutput::failed(1, "container not running"));
            }
            let bytes = std::fs::read(&local)?;
            engine.files.lock().insert(key, bytes);
            Ok(ExecOutput::ok(""))
        })
    }

    fn stop(&self, name: &str) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        self.lifecycle(EngineCall::Stop(name.to_owned()), name)
    }

    fn start(&self, name: &str) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        self.lifecycle(EngineCall::Start(name.to_owned()), name)
    }

    fn remove(&self, name: &str) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        self.lifecycle(EngineCall::Remove(name.to_owned()), name)
    }

    fn remove_volume(&self, volume: &str) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        self.lifecycle(EngineCall::RemoveVolume(volume.to_owned()), volume)
    }
}

/// Credential artifact JSON expiring at `expires_at_ms`.
pub fn credential_json(expires_at_ms: i64) -> String {
    format!(
        r#"{{"claudeAiOauth":{{"accessToken":"tok-{expires_at_ms}","refreshToken":"ref","expiresAt":{expires_at_ms},"scopes":["user:inference"]}}}}"#
    )
}

/// Assert that `$expr` is `Err` and its display contains `$substr`.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
