//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// igw - Ceph iSCSI gateway operator
#[derive(Parser, Debug)]
#[command(name = "igw")]
#[command(version)]
#[command(about = "Lifecycle operator for clustered Ceph iSCSI gateways")]
#[command(
    long_about = "igw handles one stimulus per invocation: a hook delivered by the host, an administrative action, or a status query. Units coordinate through the peer relation recorded in the host snapshot."
)]
pub struct Cli {
    /// Config file (defaults to /etc/igw/config.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `igw_reconciler=debug`
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Prefix every host path with this directory
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Handle a hook delivered by the host
    Hook {
        /// Hook name, e.g. `install` or `cluster-relation-changed`
        event: String,
    },

    /// Run an administrative action
    Action {
        #[command(subcommand)]
        action: ActionCommands,
    },

    /// Print the unit status and lifecycle phase
    Status,
}

#[derive(Subcommand, Debug)]
pub enum ActionCommands {
    /// Create an iSCSI target with one disk and one client
    CreateTarget(CreateTargetArgs),

    /// Add IPs to the gateway API allowlist (leader only)
    AddTrustedIp {
        /// Space separated IP addresses
        #[arg(long)]
        ips: String,

        /// Replace the allowlist instead of extending it
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },

    /// Stop and disable the gateway services
    Pause,

    /// Enable and start the gateway services
    Resume,
}

#[derive(Args, Debug)]
pub struct CreateTargetArgs {
    /// Target IQN
    #[arg(long)]
    pub iqn: Option<String>,

    /// Space separated gateway units; all ready gateways when omitted
    #[arg(long)]
    pub gateway_units: Option<String>,

    /// Pool for the image; the configured metadata pool when omitted
    #[arg(long)]
    pub pool_name: Option<String>,

    #[arg(long)]
    pub image_name: String,

    /// Image size, e.g. `5G`
    #[arg(long)]
    pub image_size: String,

    #[arg(long)]
    pub client_initiatorname: String,

    #[arg(long)]
    pub client_username: String,

    #[arg(long)]
    pub client_password: String,
}
