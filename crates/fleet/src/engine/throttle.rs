// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded access to an [`Engine`].
//!
//! Detail fetches and reconciliation passes fan out one task per sandbox and
//! several per probe. Every one of those ends in an external process, so the
//! throttle holds a semaphore permit for the duration of each call. The cap
//! applies to the whole fleet, not per row.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_util::future::{BoxFuture, FutureExt};
use tokio::sync::Semaphore;

use super::{Engine, ExecOutput};

/// Default maximum number of concurrent engine calls.
pub const DEFAULT_MAX_CONCURRENT_CALLS: usize = 16;

/// [`Engine`] wrapper that caps concurrent calls and optionally times them out.
pub struct Throttle {
    inner: Arc<dyn Engine>,
    permits: Arc<Semaphore>,
    timeout: Option<Duration>,
}

impl Throttle {
    pub fn new(inner: Arc<dyn Engine>, max_concurrent: usize) -> Self {
        Self { inner, permits: Arc::new(Semaphore::new(max_concurrent.max(1))), timeout: None }
    }

    /// Fail any single call that runs longer than `timeout`.
    ///
    /// The child process is killed when its future is dropped.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Permits currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    fn guarded<'a>(
        &'a self,
        call: BoxFuture<'a, anyhow::Result<ExecOutput>>,
    ) -> BoxFuture<'a, anyhow::Result<ExecOutput>> {
        async move {
            let _permit = self.permits.acquire().await.context("engine throttle closed")?;
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, call)
                    .await
                    .map_err(|_| anyhow::anyhow!("engine call timed out after {limit:?}"))?,
                None => call.await,
            }
        }
        .boxed()
    }
}

impl Engine for Throttle {
    fn list(&self, all: bool) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        self.guarded(self.inner.list(all))
    }

    fn inspect(&self, name: &str) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        self.guarded(self.inner.inspect(name))
    }

    fn logs(&self, name: &str, tail: usize) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        self.guarded(self.inner.logs(name, tail))
    }

    fn exec(
        &self,
        name: &str,
        user: Option<&str>,
        argv: &[&str],
    ) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        self.guarded(self.inner.exec(name, user, argv))
    }

    fn copy_out(
        &self,
        name: &str,
        remote: &str,
        local: &Path,
    ) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        self.guarded(self.inner.copy_out(name, remote, local))
    }

    fn copy_in(
        &self,
        local: &Path,
        name: &str,
        remote: &str,
    ) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        self.guarded(self.inner.copy_in(local, name, remote))
    }

    fn stop(&self, name: &str) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        self.guarded(self.inner.stop(name))
    }

    fn start(&self, name: &str) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        self.guarded(self.inner.start(name))
    }

    fn remove(&self, name: &str) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        self.guarded(self.inner.remove(name))
    }

    fn remove_volume(&self, volume: &str) -> BoxFuture<'_, anyhow::Result<ExecOutput>> {
        self.guarded(self.inner.remove_volume(volume))
    }
}

#[cfg(test)]
#[path = "throttle_tests.rs"]
mod tests;
