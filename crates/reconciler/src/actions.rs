//! Administrative actions.
//!
//! Action parameters use the operator's kebab-case names so they can be
//! decoded straight from an action parameter document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::gateway::{DEFAULT_TARGET, GatewayClient};
use crate::peers::PeerDetails;

/// Parameters of `create-target`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CreateTargetParams {
    /// Target IQN; [`DEFAULT_TARGET`] when absent.
    #[serde(default)]
    pub iqn: Option<String>,
    /// Space separated unit names; every ready gateway when absent.
    #[serde(default)]
    pub gateway_units: Option<String>,
    /// Pool holding the image; the configured metadata pool when absent.
    #[serde(default)]
    pub pool_name: Option<String>,
    pub image_name: String,
    pub image_size: String,
    pub client_initiatorname: String,
    pub client_username: String,
    pub client_password: String,
}

impl CreateTargetParams {
    /// Decode from a string-keyed parameter map.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` when a required parameter is missing or empty.
    pub fn from_params(params: &BTreeMap<String, String>) -> Result<Self> {
        let value = serde_json::to_value(params)?;
        let parsed: Self =
            serde_json::from_value(value).map_err(|e| Error::invalid_params(e.to_string()))?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Reject empty required values.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` naming the first empty parameter.
    pub fn validate(&self) -> Result<()> {
        [
            ("image-name", &self.image_name),
            ("image-size", &self.image_size),
            ("client-initiatorname", &self.client_initiatorname),
            ("client-username", &self.client_username),
            ("client-password", &self.client_password),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map_or(Ok(()), |(name, _)| {
            Err(Error::invalid_params(format!("'{name}' must not be empty")))
        })
    }

    /// Target IQN to use.
    pub fn resolved_iqn(&self) -> &str {
        self.iqn
            .as_deref()
            .filter(|iqn| !iqn.is_empty())
            .unwrap_or(DEFAULT_TARGET)
    }

    /// Requested unit names, `None` when every ready gateway is wanted.
    pub fn requested_units(&self) -> Option<Vec<&str>> {
        self.gateway_units
            .as_deref()
            .map(|units| units.split_whitespace().collect())
            .filter(|units: &Vec<&str>| !units.is_empty())
    }
}

/// An administrative request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    CreateTarget(CreateTargetParams),
    AddTrustedIp { ips: Vec<String>, overwrite: bool },
    Pause,
    Resume,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateTarget(_) => "create-target",
            Self::AddTrustedIp { .. } => "add-trusted-ip",
            Self::Pause => "pause",
            Self::Resume => "resume",
        }
    }
}

/// Values an action reports back.
pub type ActionResult = BTreeMap<String, String>;

/// Provision a target, its gateways, one disk and one client.
///
/// Calls run in a fixed order and the first failure aborts the rest.
/// Requested units that are not ready are skipped.
///
/// # Errors
///
/// Returns the first `gwcli` failure.
pub fn create_target(
    gateway: &GatewayClient,
    params: &CreateTargetParams,
    ready_peers: &BTreeMap<String, PeerDetails>,
    default_pool: &str,
) -> Result<String> {
    let iqn = params.resolved_iqn();
    let pool = params
        .pool_name
        .as_deref()
        .filter(|pool| !pool.is_empty())
        .unwrap_or(default_pool);
    info!(iqn, pool, image = %params.image_name, "Creating target");

    gateway.create_target(iqn)?;

    match params.requested_units() {
        Some(units) => {
            for unit in units {
                match ready_peers.get(unit) {
                    Some(peer) => gateway.add_gateway(iqn, &peer.fqdn, &peer.ip)?,
                    None => warn!(unit, "Requested gateway is not ready, skipping"),
                }
            }
        }
        None => {
            for peer in ready_peers.values() {
                gateway.add_gateway(iqn, &peer.fqdn, &peer.ip)?;
            }
        }
    }

    gateway.create_disk(pool, &params.image_name, &params.image_size)?;
    gateway.add_client(iqn, &params.client_initiatorname)?;
    gateway.set_client_auth(
        iqn,
        &params.client_initiatorname,
        &params.client_username,
        &params.client_password,
    )?;
    gateway.add_disk_to_client(iqn, &params.client_initiatorname, pool, &params.image_name)?;

    Ok(iqn.to_string())
}
