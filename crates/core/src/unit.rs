//! Facts about the unit this invocation runs on.

use serde::{Deserialize, Serialize};

/// Addresses a unit exposes on one network space.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Binding {
    /// Address peers use to reach the unit.
    pub ingress_address: String,
    /// Address the unit binds services to.
    pub bind_address: String,
}

/// Identity, leadership and network facts for the local unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnitInfo {
    /// Unit name, e.g. `ceph-iscsi/0`.
    pub name: String,
    /// Whether this unit currently holds leadership.
    #[serde(default)]
    pub is_leader: bool,
    pub fqdn: String,
    pub hostname: String,
    /// Set when running inside a container, where the gateway cannot run.
    #[serde(default)]
    pub in_container: bool,
    /// Client-facing network space.
    #[serde(default)]
    pub public: Binding,
    /// Gateway-to-gateway network space.
    #[serde(default)]
    pub cluster: Binding,
}

impl UnitInfo {
    /// Application name, derived from the unit name.
    #[must_use]
    pub fn app_name(&self) -> &str {
        self.name
            .split_once('/')
            .map_or(self.name.as_str(), |(app, _)| app)
    }

    /// Address this unit binds gateway traffic to.
    #[must_use]
    pub fn cluster_bind_address(&self) -> &str {
        &self.cluster.bind_address
    }
}
