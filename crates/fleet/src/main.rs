// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

use coopfleet::cli::{self, Cli};
use coopfleet::config::FleetConfig;
use coopfleet::error::FleetError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.config);

    if let Err(e) = cli::run(cli).await {
        tracing::debug!("fatal: {e:#}");
        eprintln!("error: {e:#}");
        if let Some(hint) = e.downcast_ref::<FleetError>().and_then(FleetError::hint) {
            eprintln!("hint: {hint}");
        }
        std::process::exit(1);
    }
}

/// Logs go to stderr so tables on stdout stay clean.
fn init_tracing(config: &FleetConfig) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init(),
    };
    drop(result);
}
