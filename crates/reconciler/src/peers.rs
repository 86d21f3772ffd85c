//! Peer coordination over the shared peer bus.
//!
//! Projects the raw `cluster` relation into typed operations and derives the
//! `has-peers`, `ready-peers` and `allowed-ips-changed` signals. Group-level
//! keys (`admin_password`, `allowed_ips`) are written by the leader only;
//! every unit owns its per-unit keys.

use std::collections::BTreeMap;
use std::sync::Arc;

use igw_core::UnitInfo;
use itertools::Itertools;
use tracing::{debug, info};

use crate::collaborators::PeerBus;
use crate::error::{Error, Result};
use crate::events::Event;

pub const PASSWORD_KEY: &str = "admin_password";
pub const ALLOWED_IPS_KEY: &str = "allowed_ips";
pub const READY_KEY: &str = "gateway_ready";
pub const FQDN_KEY: &str = "gateway_fqdn";
pub const INGRESS_KEY: &str = "ingress-address";

const READY_VALUE: &str = "True";

/// Where a ready gateway can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerDetails {
    pub fqdn: String,
    pub ip: String,
}

/// Outcome of observing a peer bus change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerChange {
    /// Signals to raise, in order.
    pub signals: Vec<Event>,
    /// Allowlist as read now; becomes the new cached view.
    pub allowed_ips: Vec<String>,
}

/// Typed view of the peer bus for one unit.
pub struct PeerCoordinator {
    bus: Arc<dyn PeerBus>,
    unit: UnitInfo,
}

impl PeerCoordinator {
    /// Create a coordinator for `unit`.
    pub fn new(bus: Arc<dyn PeerBus>, unit: UnitInfo) -> Self {
        Self { bus, unit }
    }

    /// Whether the peer relation exists.
    pub fn is_joined(&self) -> bool {
        self.bus.relation().is_some()
    }

    /// Publish this unit as ready along with its FQDN.
    ///
    /// # Errors
    ///
    /// Returns error if the peer bus write fails.
    pub fn announce_ready(&self) -> Result<()> {
        info!(unit = %self.unit.name, "Announcing ready");
        self.bus.set_local(READY_KEY, READY_VALUE)?;
        self.bus.set_local(FQDN_KEY, &self.unit.fqdn)
    }

    /// Publish the shared admin password. The first value set wins; later
    /// calls leave it untouched.
    ///
    /// # Errors
    ///
    /// Returns `NotLeader` on a non-leader, or the peer bus write error.
    pub fn set_admin_password(&self, password: &str) -> Result<()> {
        self.ensure_leader("set admin password")?;
        if self.admin_password().is_some() {
            debug!("Admin password already set, keeping it");
            return Ok(());
        }
        info!("Setting admin password");
        self.bus.set_app(PASSWORD_KEY, password)
    }

    /// Publish the allowlist, merged with the current one when `append`.
    ///
    /// The stored list is deduplicated and sorted.
    ///
    /// # Errors
    ///
    /// Returns `NotLeader` on a non-leader, a parse error if the stored list
    /// is malformed, or the peer bus write error.
    pub fn set_allowed_ips(&self, ips: &[String], append: bool) -> Result<()> {
        self.ensure_leader("set allowed ips")?;
        info!(append, count = ips.len(), "Setting allowed ips");

        let existing = if append {
            self.allowed_ips()?.unwrap_or_default()
        } else {
            Vec::new()
        };
        let merged = merge_ips(existing, ips);
        let encoded = serde_json::to_string(&merged)?;
        self.bus.set_app(ALLOWED_IPS_KEY, &encoded)
    }

    /// Shared admin password; `None` without a relation or before it is set.
    pub fn admin_password(&self) -> Option<String> {
        self.bus
            .relation()
            .and_then(|rel| rel.app.get(PASSWORD_KEY).cloned())
            .filter(|password| !password.is_empty())
    }

    /// Shared allowlist; `None` without a relation or before it is set.
    ///
    /// # Errors
    ///
    /// Returns error if the stored value is not a JSON array of strings.
    pub fn allowed_ips(&self) -> Result<Option<Vec<String>>> {
        self.bus
            .relation()
            .and_then(|rel| rel.app.get(ALLOWED_IPS_KEY).cloned())
            .map(|encoded| serde_json::from_str::<Vec<String>>(&encoded))
            .transpose()
            .map_err(Error::from)
    }

    /// Self plus every peer that announced readiness, keyed by unit name.
    pub fn ready_peer_details(&self) -> BTreeMap<String, PeerDetails> {
        let mut peers = BTreeMap::new();
        peers.insert(
            self.unit.name.clone(),
            PeerDetails {
                fqdn: self.unit.fqdn.clone(),
                ip: self.unit.cluster_bind_address().to_string(),
            },
        );

        if let Some(rel) = self.bus.relation() {
            for (name, bag) in &rel.units {
                if bag.get(READY_KEY).map(String::as_str) != Some(READY_VALUE) {
                    continue;
                }
                match (bag.get(FQDN_KEY), bag.get(INGRESS_KEY)) {
                    (Some(fqdn), Some(ip)) => {
                        peers.insert(
                            name.clone(),
                            PeerDetails {
                                fqdn: fqdn.clone(),
                                ip: ip.clone(),
                            },
                        );
                    }
                    _ => debug!(unit = %name, "Ready peer has not published its address"),
                }
            }
        }
        peers
    }

    /// Cluster addresses of self and every peer, sorted.
    pub fn peer_addresses(&self) -> Vec<String> {
        let remote = self
            .bus
            .relation()
            .map(|rel| {
                rel.units
                    .values()
                    .filter_map(|bag| bag.get(INGRESS_KEY).cloned())
                    .collect_vec()
            })
            .unwrap_or_default();

        std::iter::once(self.unit.cluster_bind_address().to_string())
            .chain(remote)
            .sorted()
            .collect()
    }

    /// Number of remote peers.
    pub fn peer_count(&self) -> usize {
        self.bus
            .relation()
            .map_or(0, |rel| rel.unit_count())
    }

    /// Number of units in the group, self included.
    pub fn unit_count(&self) -> usize {
        self.peer_count().saturating_add(1)
    }

    /// Derive signals for a peer bus change against the cached allowlist.
    ///
    /// # Errors
    ///
    /// Returns error if the stored allowlist is malformed.
    pub fn observe_change(&self, cached_allowed_ips: &[String]) -> Result<PeerChange> {
        let mut signals = vec![Event::HasPeers];
        if !self.ready_peer_details().is_empty() {
            signals.push(Event::ReadyPeers);
        }

        let allowed_ips = self.allowed_ips()?.unwrap_or_default();
        if allowed_ips != cached_allowed_ips {
            signals.push(Event::AllowedIpsChanged);
        }

        debug!(signals = ?signals, "Peer bus changed");
        Ok(PeerChange {
            signals,
            allowed_ips,
        })
    }

    /// Whether this unit is the leader.
    pub fn is_leader(&self) -> bool {
        self.unit.is_leader
    }

    fn ensure_leader(&self, operation: &str) -> Result<()> {
        if self.unit.is_leader {
            Ok(())
        } else {
            Err(Error::not_leader(operation))
        }
    }
}

/// Union of `existing` and `ips`, deduplicated and sorted.
pub fn merge_ips(existing: Vec<String>, ips: &[String]) -> Vec<String> {
    existing
        .into_iter()
        .chain(ips.iter().cloned())
        .sorted()
        .dedup()
        .collect()
}
