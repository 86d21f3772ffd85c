//! # igw
//!
//! Entry point for the Ceph iSCSI gateway operator. The host invokes the
//! binary once per stimulus:
//!
//! ```text
//! igw hook cluster-relation-changed
//! igw action add-trusted-ip --ips "10.0.0.5 10.0.0.6"
//! igw status
//! ```
//!
//! Logs go to stderr; results are printed to stdout as JSON.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;
mod commands;

use std::process;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Cli;

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    if let Err(err) = commands::execute(cli) {
        tracing::error!(error = %format!("{err:#}"), "Invocation failed");
        eprintln!("Error: {err:#}");
        process::exit(1);
    }
}

/// Initialize tracing subscriber; an explicit level beats `RUST_LOG`.
fn init_tracing(level: Option<&str>) {
    let filter = level
        .map(EnvFilter::new)
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
