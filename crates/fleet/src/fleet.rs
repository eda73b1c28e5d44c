// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The fleet facade: one engine, one set of settings, one snapshot cache.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::config::{self, FleetConfig, Settings};
use crate::credential::reconcile::{PassReport, ReconcileConfig, Reconciler, DEFAULT_REMOTE_OWNER};
use crate::detail::{self, ProbeConfig};
use crate::display::Ranked;
use crate::engine::docker::DockerCli;
use crate::engine::throttle::Throttle;
use crate::engine::Engine;
use crate::error::FleetError;
use crate::ops::{self, SandboxDetails, StopReport, AGENT_SETTLE, RESTART_SETTLE};
use crate::registry::{self, ListScope};
use crate::whitelist::{self, DomainReport, FleetDomainReport, ResolverConfig};

/// Return current epoch millis.
pub fn epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// The most recent listing.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub records: Ranked,
    pub fetched_at_ms: i64,
}

/// Outcome of whitelisting a domain in one sandbox, plus the config write.
#[derive(Debug, Clone)]
pub struct AddDomainOutcome {
    pub report: DomainReport,
    /// Whether the local config file gained the domain.
    pub persisted: bool,
}

pub struct Fleet {
    engine: Arc<dyn Engine>,
    settings: Settings,
    probes: Arc<ProbeConfig>,
    resolver: ResolverConfig,
    reconciler: Reconciler,
    settle: Duration,
    agent_settle: Duration,
    snapshot: RwLock<Option<Snapshot>>,
}

impl Fleet {
    pub fn new(engine: Arc<dyn Engine>, settings: Settings) -> Self {
        let probes = ProbeConfig::default();
        let reconciler = Reconciler::new(
            Arc::clone(&engine),
            ReconcileConfig {
                host_path: settings.host_credentials(),
                remote_path: probes.remote_credentials.clone(),
                remote_owner: DEFAULT_REMOTE_OWNER.to_owned(),
                prefixes: settings.prefixes.clone(),
            },
        );
        Self {
            engine,
            settings,
            probes: Arc::new(probes),
            resolver: ResolverConfig::default(),
            reconciler,
            settle: RESTART_SETTLE,
            agent_settle: AGENT_SETTLE,
            snapshot: RwLock::new(None),
        }
    }

    /// Build a fleet backed by the docker CLI behind the call throttle.
    pub fn from_config(config: &FleetConfig) -> Result<Self, FleetError> {
        let settings = config.resolve()?;
        let docker: Arc<dyn Engine> = Arc::new(DockerCli::with_program(config.docker.clone()));
        let engine = Throttle::new(docker, config.max_concurrent_calls)
            .with_timeout(config.call_timeout());
        tracing::debug!(
            prefix = %settings.prefix,
            max_concurrent_calls = config.max_concurrent_calls,
            config = %settings.config_path.display(),
            "fleet: configured"
        );
        Ok(Self::new(Arc::new(engine), settings))
    }

    /// Override the pauses taken during restarts.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self.agent_settle = settle;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Full sandbox name for a short or full `input`.
    pub fn resolve_name(&self, input: &str) -> String {
        registry::resolve_name(input, &self.settings.prefix)
    }

    /// Query the registry, fetch every record's details and rank them.
    ///
    /// The result replaces the cached snapshot.
    pub async fn list(&self, scope: ListScope) -> Result<Ranked, FleetError> {
        self.fetch(&[self.settings.prefix.as_str()], scope).await
    }

    /// Like [`Fleet::list`], but also includes sandboxes carrying the legacy prefix.
    pub async fn list_selectable(&self, scope: ListScope) -> Result<Ranked, FleetError> {
        let prefixes: Vec<&str> = self.settings.prefixes.iter().map(String::as_str).collect();
        self.fetch(&prefixes, scope).await
    }

    async fn fetch(&self, prefixes: &[&str], scope: ListScope) -> Result<Ranked, FleetError> {
        let prefix = &self.settings.prefix;
        let rows = registry::query_prefixes(&*self.engine, prefixes, scope).await?;
        let now_ms = epoch_ms();
        let records = detail::fetch_details(
            Arc::clone(&self.engine),
            Arc::clone(&self.probes),
            &rows,
            prefix,
            now_ms,
        )
        .await;

        let ranked = Ranked::new(records);
        *self.snapshot.write().await =
            Some(Snapshot { records: ranked.clone(), fetched_at_ms: now_ms });
        Ok(ranked)
    }

    /// The last listing, if any, without touching the engine.
    pub async fn cached(&self) -> Option<Snapshot> {
        self.snapshot.read().await.clone()
    }

    /// Reconcile credentials across the host and every running sandbox.
    pub async fn refresh_tokens(&self) -> Result<PassReport, FleetError> {
        self.reconciler.run(epoch_ms()).await
    }

    /// Push the freshest credentials into one sandbox.
    pub async fn sync_to(&self, input: &str) -> Result<PassReport, FleetError> {
        self.reconciler.sync_to(&self.resolve_name(input), epoch_ms()).await
    }

    /// Whitelist `domain` in one sandbox, optionally recording it in the config file.
    pub async fn add_domain(
        &self,
        input: &str,
        domain: &str,
        persist: bool,
    ) -> Result<AddDomainOutcome, FleetError> {
        let name = self.resolve_name(input);
        let report = whitelist::add_domain(&*self.engine, &self.resolver, &name, domain).await?;
        let persisted = persist
            && config::persist_allowed_domain(&self.settings.config_path, domain)?;
        Ok(AddDomainOutcome { report, persisted })
    }

    /// Whitelist `domain` in every running sandbox.
    pub async fn add_domain_all(&self, domain: &str) -> Result<FleetDomainReport, FleetError> {
        whitelist::add_domain_all(
            Arc::clone(&self.engine),
            &self.resolver,
            &self.settings.prefix,
            domain,
        )
        .await
    }

    pub async fn stop(&self, input: &str) -> Result<(), FleetError> {
        ops::stop(&*self.engine, &self.resolve_name(input)).await
    }

    /// Restart only the agent process, leaving the sandbox running.
    pub async fn restart_agent(&self, input: &str) -> Result<(), FleetError> {
        ops::restart_agent(&*self.engine, &self.probes, &self.resolve_name(input), self.agent_settle).await
    }

    /// Restart the whole sandbox, then push the freshest credentials into it.
    ///
    /// Returns `None` when the credential push failed; the restart itself
    /// still succeeded.
    pub async fn restart(&self, input: &str) -> Result<Option<PassReport>, FleetError> {
        let name = self.resolve_name(input);
        ops::restart(&*self.engine, &name, self.settle).await?;
        match self.reconciler.sync_to(&name, epoch_ms()).await {
            Ok(report) => Ok(Some(report)),
            Err(e) => {
                tracing::warn!(sandbox = %name, err = %e, "fleet: credentials not synced after restart");
                Ok(None)
            }
        }
    }

    /// Remove a sandbox and its named volumes.
    pub async fn remove(&self, input: &str) -> Result<Vec<String>, FleetError> {
        ops::remove(&*self.engine, &self.resolve_name(input)).await
    }

    /// Names of running sandboxes with no live agent process.
    pub async fn dormant(&self) -> Result<Vec<String>, FleetError> {
        let ranked = self.list(ListScope::Running).await?;
        Ok(ops::dormant(ranked.records()).into_iter().map(|r| r.name.clone()).collect())
    }

    pub async fn stop_all(&self, names: &[String]) -> StopReport {
        ops::stop_all(Arc::clone(&self.engine), names).await
    }

    pub async fn inspect(&self, input: &str) -> Result<SandboxDetails, FleetError> {
        let name = self.resolve_name(input);
        ops::inspect(&*self.engine, &self.probes, &name, &self.settings.prefix, epoch_ms()).await
    }
}

#[cfg(test)]
#[path = "fleet_tests.rs"]
mod tests;
