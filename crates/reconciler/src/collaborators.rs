//! Interfaces to the systems the reconciler depends on but does not own.
//!
//! Each trait is an explicit read-only view plus the few writes the
//! reconciler needs. Readers document what they return while the backing
//! relation or value does not exist yet; none of them fail in that case.

use std::collections::BTreeMap;

use igw_core::RelationData;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::render::RenderContext;
use crate::state::StoredState;

/// The shared peer data bus.
pub trait PeerBus: Send + Sync {
    /// Current peer relation data, `None` until the relation exists.
    fn relation(&self) -> Option<RelationData>;

    /// Write a key into this unit's own bag.
    ///
    /// # Errors
    ///
    /// Returns error if the relation does not exist or the write fails.
    fn set_local(&self, key: &str, value: &str) -> Result<()>;

    /// Write a key into the application bag. Callers gate on leadership.
    ///
    /// # Errors
    ///
    /// Returns error if the relation does not exist or the write fails.
    fn set_app(&self, key: &str, value: &str) -> Result<()>;
}

/// Connection data published by the storage cluster once pools exist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolData {
    /// Monitor addresses, sorted.
    pub mon_hosts: Vec<String>,
    /// Cephx key for the gateway client.
    pub key: String,
}

/// The storage cluster's pool and permission broker.
///
/// Requests are declarative; re-issuing one is a no-op for the broker.
pub trait CephBroker: Send + Sync {
    /// Whether the broker relation exists.
    fn is_related(&self) -> bool;

    /// Ask for a replicated pool.
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be published.
    fn create_replicated_pool(&self, name: &str, replicas: u32) -> Result<()>;

    /// Ask for key capabilities for `client`.
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be published.
    fn request_permissions(&self, client: &str, capabilities: &[&str]) -> Result<()>;

    /// Ask for OSD tunables.
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be published.
    fn request_osd_settings(&self, settings: &BTreeMap<String, u32>) -> Result<()>;

    /// `false` until the broker has completed the requests.
    fn pools_available(&self) -> bool;

    /// `None` until pools are available.
    fn pool_data(&self) -> Option<PoolData>;
}

/// Certificate and key issued for this unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationCert {
    pub cert: String,
    pub key: String,
}

/// The certificate authority.
pub trait CertificateAuthority: Send + Sync {
    /// Whether the certificates relation exists.
    fn is_related(&self) -> bool;

    /// Request a certificate. Re-requesting the same common name is ignored.
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be published.
    fn request_application_cert(&self, common_name: &str, sans: &[String]) -> Result<()>;

    /// `None` until the CA has published its root.
    fn root_ca_cert(&self) -> Option<String>;

    /// Intermediate chain, `None` when the CA signs directly.
    fn chain(&self) -> Option<String>;

    /// `None` until the certificate for this unit has been issued.
    fn application_cert(&self) -> Option<ApplicationCert>;
}

/// Expands a named template into file content.
pub trait TemplateRenderer: Send + Sync {
    /// Render `template` with `context`.
    ///
    /// # Errors
    ///
    /// Returns error if the template is missing or references unknown values.
    fn render(&self, template: &str, context: &RenderContext) -> Result<String>;
}

/// Persistence for state that survives between invocations.
pub trait StateStore: Send + Sync {
    /// Load stored state; a store that was never written yields defaults.
    ///
    /// # Errors
    ///
    /// Returns error if stored data cannot be read or decoded.
    fn load(&self) -> Result<StoredState>;

    /// Replace stored state.
    ///
    /// # Errors
    ///
    /// Returns error if the state cannot be written.
    fn save(&self, state: &StoredState) -> Result<()>;
}
