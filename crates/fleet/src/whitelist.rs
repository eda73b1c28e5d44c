// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Domain whitelist propagation into a sandbox's DNS resolver.
//!
//! The resolver routes whitelisted domains into a shared allow-set. Adding a
//! domain appends two rules (allow-set routing and an upstream server) only
//! when the domain is not already routed, then restarts the resolver against
//! the same config file and resolves the domain once to seed the set.

use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::engine::{self, Engine};
use crate::error::FleetError;
use crate::registry::{self, ListScope};

pub const DEFAULT_RESOLVER_CONF: &str = "/tmp/dnsmasq-firewall.conf";
pub const DEFAULT_ALLOW_SET: &str = "allowed-domains";
pub const DEFAULT_UPSTREAM: &str = "8.8.8.8";

/// Longest name DNS accepts.
const MAX_DOMAIN_LEN: usize = 253;

static DOMAIN_RE: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9-]*(\.[A-Za-z0-9][A-Za-z0-9-]*)*\.?$")
});

/// Resolver layout inside a sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    pub conf_path: String,
    pub allow_set: String,
    pub upstream: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            conf_path: DEFAULT_RESOLVER_CONF.to_owned(),
            allow_set: DEFAULT_ALLOW_SET.to_owned(),
            upstream: DEFAULT_UPSTREAM.to_owned(),
        }
    }
}

impl ResolverConfig {
    fn marker(&self, domain: &str) -> String {
        format!("ipset=/{domain}/")
    }

    fn append_script(&self, domain: &str) -> String {
        let conf = &self.conf_path;
        format!(
            "echo 'ipset=/{domain}/{set}' >> {conf} && echo 'server=/{domain}/{up}' >> {conf}",
            set = self.allow_set,
            up = self.upstream,
        )
    }

    fn restart_script(&self) -> String {
        format!(
            "pkill -9 dnsmasq 2>/dev/null || true; sleep 0.2; dnsmasq --conf-file={}",
            self.conf_path
        )
    }
}

/// Reject anything that is not a plain hostname before it reaches a shell.
pub fn validate_domain(domain: &str) -> Result<(), FleetError> {
    let re = DOMAIN_RE
        .as_ref()
        .map_err(|e| FleetError::InvalidDomain(format!("{domain} ({e})")))?;
    if domain.is_empty() || domain.len() > MAX_DOMAIN_LEN || !re.is_match(domain) {
        return Err(FleetError::InvalidDomain(domain.to_owned()));
    }
    Ok(())
}

/// Outcome of whitelisting a domain in one sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainReport {
    pub sandbox: String,
    /// False when the rule was already present.
    pub added: bool,
    /// Addresses returned by the seeding lookup.
    pub resolved: usize,
    /// Set when the seeding lookup failed or returned nothing.
    pub warning: Option<String>,
}

/// Whitelist `domain` in the running sandbox `sandbox`.
pub async fn add_domain(
    engine: &dyn Engine,
    resolver: &ResolverConfig,
    sandbox: &str,
    domain: &str,
) -> Result<DomainReport, FleetError> {
    validate_domain(domain)?;
    let row = registry::find(engine, sandbox).await?;
    if !row.is_some_and(|r| r.state.is_running()) {
        return Err(FleetError::SandboxNotRunning(sandbox.to_owned()));
    }
    apply(engine, resolver, sandbox, domain).await
}

/// Config mutation, restart and seeding for a sandbox known to be running.
async fn apply(
    engine: &dyn Engine,
    resolver: &ResolverConfig,
    sandbox: &str,
    domain: &str,
) -> Result<DomainReport, FleetError> {
    let update_err = |reason: String| FleetError::ResolverUpdate { sandbox: sandbox.to_owned(), reason };

    let marker = resolver.marker(domain);
    let present = engine
        .exec(sandbox, None, &["grep", "-q", marker.as_str(), resolver.conf_path.as_str()])
        .await
        .map_err(|e| update_err(format!("{e:#}")))?
        .success();

    if present {
        tracing::info!(sandbox, domain, "whitelist: domain already routed");
    } else {
        engine::sh(engine, sandbox, Some("root"), &resolver.append_script(domain))
            .await
            .and_then(|o| o.check())
            .map_err(|e| update_err(format!("append failed: {e:#}")))?;
        tracing::info!(sandbox, domain, "whitelist: rule appended");
    }

    engine::sh(engine, sandbox, Some("root"), &resolver.restart_script())
        .await
        .and_then(|o| o.check())
        .map_err(|e| update_err(format!("resolver restart failed: {e:#}")))?;

    let (resolved, warning) = seed(engine, sandbox, domain).await;
    if let Some(warning) = &warning {
        tracing::warn!(sandbox, domain, warning = %warning, "whitelist: seeding lookup");
    }
    Ok(DomainReport { sandbox: sandbox.to_owned(), added: !present, resolved, warning })
}

async fn seed(engine: &dyn Engine, sandbox: &str, domain: &str) -> (usize, Option<String>) {
    let script = format!("dig +short {domain} | head -5");
    match engine::sh(engine, sandbox, None, &script).await.and_then(|o| o.check()) {
        Ok(out) => {
            let count = out.stdout.lines().filter(|l| !l.trim().is_empty()).count();
            if count == 0 {
                (0, Some("initial resolution returned no addresses".to_owned()))
            } else {
                (count, None)
            }
        }
        Err(e) => (0, Some(format!("initial resolution failed: {e:#}"))),
    }
}

/// Per-sandbox results of a fleet-wide whitelist.
#[derive(Debug, Clone, Default)]
pub struct FleetDomainReport {
    pub outcomes: Vec<(String, Result<DomainReport, String>)>,
}

impl FleetDomainReport {
    pub fn applied(&self) -> usize {
        self.outcomes.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }
}

impl fmt::Display for FleetDomainReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "applied {}/{}", self.applied(), self.attempted())
    }
}

/// Whitelist `domain` in every running sandbox carrying `prefix`.
///
/// Failures are logged and tallied; only a failed listing is an error.
pub async fn add_domain_all(
    engine: Arc<dyn Engine>,
    resolver: &ResolverConfig,
    prefix: &str,
    domain: &str,
) -> Result<FleetDomainReport, FleetError> {
    validate_domain(domain)?;
    let rows = registry::query(&*engine, prefix, ListScope::Running).await?;

    let mut handles = Vec::with_capacity(rows.len());
    for row in &rows {
        let engine = Arc::clone(&engine);
        let resolver = resolver.clone();
        let name = row.name.clone();
        let domain = domain.to_owned();
        handles.push(tokio::spawn(async move {
            apply(&*engine, &resolver, &name, &domain).await
        }));
    }

    let mut report = FleetDomainReport::default();
    for (row, handle) in rows.into_iter().zip(handles) {
        let result = match handle.await {
            Ok(Ok(done)) => Ok(done),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(reason) = &result {
            tracing::warn!(sandbox = %row.name, domain, err = %reason, "whitelist: sandbox skipped");
        }
        report.outcomes.push((row.name, result));
    }
    tracing::info!(
        domain,
        applied = report.applied(),
        attempted = report.attempted(),
        "whitelist: fleet update complete"
    );
    Ok(report)
}

#[cfg(test)]
#[path = "whitelist_tests.rs"]
mod tests;
