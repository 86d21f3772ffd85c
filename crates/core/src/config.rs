//! Configuration loading and management
//!
//! # Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Config file: `/etc/igw/config.toml` or the path given on the command line
//! 3. Environment variables: `IGW_*`
//! 4. CLI flags (command-specific)
//!
//! # Example Config
//!
//! ```toml
//! [charm]
//! rbd_metadata_pool = "iscsi"
//! ceph_osd_replication_count = 3
//! loglevel = 1
//! release = "octopus"
//!
//! [paths]
//! state_file = "/var/lib/igw/state.json"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{Error, Result};

/// Default location of the operator config file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/igw/config.toml";

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION STRUCTURES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub charm: CharmConfig,
    pub paths: PathsConfig,
}

/// Ceph release the gateway packages target.
///
/// Only affects labelling; both releases share one implementation.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Release {
    Jewel,
    #[default]
    Octopus,
}

/// Operator-facing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CharmConfig {
    /// Pool holding the gateway metadata and default images.
    pub rbd_metadata_pool: String,
    pub ceph_osd_replication_count: u32,
    /// Gateway daemon log level.
    pub loglevel: u32,
    pub use_syslog: bool,
    pub release: Release,
    /// Cluster sizes the gateway supports.
    pub allowed_unit_counts: Vec<usize>,
    /// Provision the default target once all gateways are ready.
    pub create_default_target: bool,
}

/// Locations of everything the operator reads or writes on the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub ceph_config_dir: PathBuf,
    pub ceph_conf: PathBuf,
    pub gateway_cfg: PathBuf,
    pub keyring: PathBuf,
    pub tls_cert: PathBuf,
    pub tls_key: PathBuf,
    pub tls_key_and_cert: PathBuf,
    pub tls_pub_key: PathBuf,
    pub tls_ca_cert: PathBuf,
    pub templates_dir: PathBuf,
    pub state_file: PathBuf,
    pub snapshot_file: PathBuf,
}

// ═══════════════════════════════════════════════════════════════════════════
// DEFAULT IMPLEMENTATIONS
// ═══════════════════════════════════════════════════════════════════════════

impl Default for CharmConfig {
    fn default() -> Self {
        Self {
            rbd_metadata_pool: "iscsi".to_string(),
            ceph_osd_replication_count: 3,
            loglevel: 1,
            use_syslog: false,
            release: Release::default(),
            allowed_unit_counts: vec![2],
            create_default_target: false,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            ceph_config_dir: PathBuf::from("/etc/ceph/iscsi"),
            ceph_conf: PathBuf::from("/etc/ceph/iscsi/ceph.conf"),
            gateway_cfg: PathBuf::from("/etc/ceph/iscsi-gateway.cfg"),
            keyring: PathBuf::from("/etc/ceph/iscsi/ceph.client.ceph-iscsi.keyring"),
            tls_cert: PathBuf::from("/etc/ceph/iscsi-gateway.crt"),
            tls_key: PathBuf::from("/etc/ceph/iscsi-gateway.key"),
            tls_key_and_cert: PathBuf::from("/etc/ceph/iscsi-gateway.pem"),
            tls_pub_key: PathBuf::from("/etc/ceph/iscsi-gateway-pub.key"),
            tls_ca_cert: PathBuf::from("/usr/local/share/ca-certificates/vault_ca_cert.crt"),
            templates_dir: PathBuf::from("/usr/share/igw/templates"),
            state_file: PathBuf::from("/var/lib/igw/state.json"),
            snapshot_file: PathBuf::from("/var/lib/igw/snapshot.json"),
        }
    }
}

impl PathsConfig {
    /// Root every path under `root`, keeping file names and layout.
    ///
    /// Used to run the operator against a scratch directory.
    #[must_use]
    pub fn rooted_at(&self, root: &Path) -> Self {
        let reroot = |path: &Path| {
            root.join(
                path.strip_prefix("/")
                    .map_or_else(|_| path.to_path_buf(), Path::to_path_buf),
            )
        };
        Self {
            ceph_config_dir: reroot(&self.ceph_config_dir),
            ceph_conf: reroot(&self.ceph_conf),
            gateway_cfg: reroot(&self.gateway_cfg),
            keyring: reroot(&self.keyring),
            tls_cert: reroot(&self.tls_cert),
            tls_key: reroot(&self.tls_key),
            tls_key_and_cert: reroot(&self.tls_key_and_cert),
            tls_pub_key: reroot(&self.tls_pub_key),
            tls_ca_cert: reroot(&self.tls_ca_cert),
            templates_dir: self.templates_dir.clone(),
            state_file: reroot(&self.state_file),
            snapshot_file: reroot(&self.snapshot_file),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PUBLIC API
// ═══════════════════════════════════════════════════════════════════════════

/// Load configuration from all sources with hierarchy
///
/// `env` resolves environment variables; pass `|key| std::env::var(key).ok()`
/// in production.
///
/// # Errors
///
/// Returns error if:
/// - An explicitly given config file does not exist or cannot be read
/// - Config file is malformed TOML
/// - An environment override cannot be parsed
/// - Config values fail validation
pub fn load_config<F>(path: Option<&Path>, env: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    // 1. Start with built-in defaults, 2. overlay the file if any
    let mut config = match path {
        Some(explicit) => load_toml_file(explicit)?,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                load_toml_file(default_path)?
            } else {
                Config::default()
            }
        }
    };

    // 3. Apply environment variable overrides
    config.apply_env_vars(env)?;

    // 4. Validate
    config.validate()?;

    Ok(config)
}

impl Config {
    /// Parse a config document. Missing keys fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns error if the document is malformed TOML.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::toml_parse_failed(e.to_string()))
    }

    /// Apply `IGW_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns error if an override value cannot be parsed.
    pub fn apply_env_vars<F>(&mut self, env: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(pool) = env("IGW_RBD_METADATA_POOL") {
            self.charm.rbd_metadata_pool = pool;
        }
        if let Some(level) = env("IGW_LOGLEVEL") {
            self.charm.loglevel = level
                .parse()
                .map_err(|e| Error::invalid_config(format!("IGW_LOGLEVEL={level}: {e}")))?;
        }
        if let Some(flag) = env("IGW_USE_SYSLOG") {
            self.charm.use_syslog = flag
                .parse()
                .map_err(|e| Error::invalid_config(format!("IGW_USE_SYSLOG={flag}: {e}")))?;
        }
        if let Some(release) = env("IGW_RELEASE") {
            self.charm.release = release
                .parse()
                .map_err(|e| Error::invalid_config(format!("IGW_RELEASE={release}: {e}")))?;
        }
        if let Some(dir) = env("IGW_TEMPLATES_DIR") {
            self.paths.templates_dir = PathBuf::from(dir);
        }
        if let Some(file) = env("IGW_STATE_FILE") {
            self.paths.state_file = PathBuf::from(file);
        }
        if let Some(file) = env("IGW_SNAPSHOT_FILE") {
            self.paths.snapshot_file = PathBuf::from(file);
        }
        Ok(())
    }

    /// Validate config values.
    ///
    /// # Errors
    ///
    /// Returns error if any value is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.charm.rbd_metadata_pool.trim().is_empty() {
            return Err(Error::invalid_config("rbd_metadata_pool must not be empty"));
        }
        if self.charm.ceph_osd_replication_count == 0 {
            return Err(Error::invalid_config(
                "ceph_osd_replication_count must be at least 1",
            ));
        }
        if self.charm.allowed_unit_counts.is_empty() {
            return Err(Error::invalid_config(
                "allowed_unit_counts must list at least one cluster size",
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HELPER FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════

/// Load a TOML file into a Config
///
/// # Errors
///
/// Returns error if:
/// - File cannot be read
/// - TOML is malformed
fn load_toml_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::file_read_failed(path, e.to_string()))?;

    Config::from_toml_str(&content).map_err(|e| {
        Error::toml_parse_failed(format!("failed to parse config {}: {e}", path.display()))
    })
}
