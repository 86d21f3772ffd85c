//! CLI command handlers.
//!
//! Every command builds a [`Reconciler`] over the host snapshot, runs one
//! stimulus, saves the snapshot back and prints the outcome as JSON.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use igw_core::{Config, SystemRunner, load_config};
use igw_reconciler::{Action, CreateTargetParams, Event, Reconciler, ReconcilerBuilder};
use serde::Serialize;
use tracing::info;

use igw::substrate::{JsonStateStore, SnapshotFile};
use igw::templates::FileTemplates;

use crate::cli::{ActionCommands, Cli, Commands, CreateTargetArgs};

#[derive(Debug, Serialize)]
struct StatusOutput {
    status: igw_reconciler::UnitStatus,
    phase: igw_reconciler::Phase,
}

/// Execute a parsed command line.
pub fn execute(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli)?;
    let snapshot = SnapshotFile::load(&config.paths.snapshot_file).with_context(|| {
        format!(
            "Failed to load host snapshot {}",
            config.paths.snapshot_file.display()
        )
    })?;
    let reconciler = build_reconciler(config, &snapshot)?;

    match cli.command {
        Commands::Hook { event } => {
            let event = Event::from_str(&event)
                .with_context(|| format!("Unknown hook '{event}'"))?;
            let report = reconciler.dispatch(event)?;
            snapshot.save().context("Failed to save host snapshot")?;
            print_json(&report)
        }
        Commands::Action { action } => {
            let outcome = reconciler.run_action(to_action(action)?)?;
            snapshot.save().context("Failed to save host snapshot")?;
            print_json(&outcome)
        }
        Commands::Status => print_json(&StatusOutput {
            status: reconciler.status()?,
            phase: reconciler.phase()?,
        }),
    }
}

fn resolve_config(cli: &Cli) -> Result<Config> {
    let mut config = load_config(cli.config.as_deref(), |key| std::env::var(key).ok())
        .context("Failed to load configuration")?;
    if let Some(root) = &cli.root {
        info!(root = %root.display(), "Rooting host paths");
        config.paths = config.paths.rooted_at(root);
    }
    Ok(config)
}

fn build_reconciler(config: Config, snapshot: &SnapshotFile) -> Result<Reconciler> {
    let templates = FileTemplates::new(&config.paths.templates_dir);
    let store = JsonStateStore::new(&config.paths.state_file);

    ReconcilerBuilder::new()
        .with_unit(snapshot.unit())
        .with_peer_bus(Arc::new(snapshot.peer_bus()))
        .with_broker(Arc::new(snapshot.broker()))
        .with_authority(Arc::new(snapshot.authority()))
        .with_templates(Arc::new(templates))
        .with_state_store(Arc::new(store))
        .with_runner(Arc::new(SystemRunner))
        .with_config(config)
        .build()
        .context("Failed to assemble reconciler")
}

fn to_action(command: ActionCommands) -> Result<Action> {
    let action = match command {
        ActionCommands::CreateTarget(args) => Action::CreateTarget(create_target_params(args)?),
        ActionCommands::AddTrustedIp { ips, overwrite } => Action::AddTrustedIp {
            ips: ips.split_whitespace().map(ToString::to_string).collect(),
            overwrite,
        },
        ActionCommands::Pause => Action::Pause,
        ActionCommands::Resume => Action::Resume,
    };
    Ok(action)
}

/// Decode create-target arguments the same way as an action parameter map,
/// omitting the optional values that were not given.
fn create_target_params(args: CreateTargetArgs) -> Result<CreateTargetParams> {
    let params: BTreeMap<String, String> = [
        ("iqn", args.iqn),
        ("gateway-units", args.gateway_units),
        ("pool-name", args.pool_name),
        ("image-name", Some(args.image_name)),
        ("image-size", Some(args.image_size)),
        ("client-initiatorname", Some(args.client_initiatorname)),
        ("client-username", Some(args.client_username)),
        ("client-password", Some(args.client_password)),
    ]
    .into_iter()
    .filter_map(|(key, value)| value.map(|value| (key.to_string(), value)))
    .collect();

    CreateTargetParams::from_params(&params).context("Invalid create-target parameters")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to encode output")?;
    println!("{rendered}");
    Ok(())
}
