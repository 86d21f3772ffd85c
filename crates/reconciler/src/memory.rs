//! In-memory collaborators for tests and dry runs.
//!
//! Each type keeps its data behind a `Mutex` so it can be shared through
//! `Arc<dyn Trait>` with the reconciler while the test keeps a handle to
//! drive it.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use igw_core::relation::CLUSTER;
use igw_core::{DataBag, RelationData};

use crate::collaborators::{
    ApplicationCert, CephBroker, CertificateAuthority, PeerBus, PoolData, StateStore,
    TemplateRenderer,
};
use crate::error::Result;
use crate::render::{RenderContext, render_placeholders};
use crate::state::StoredState;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn insert_pairs(bag: &mut DataBag, pairs: &[(&str, &str)]) {
    for (key, value) in pairs {
        bag.insert((*key).to_string(), (*value).to_string());
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PEER BUS
// ═══════════════════════════════════════════════════════════════════════════

/// Peer bus backed by one in-memory relation.
#[derive(Debug, Default)]
pub struct InMemoryPeerBus {
    relation: Mutex<Option<RelationData>>,
}

impl InMemoryPeerBus {
    /// A bus whose relation does not exist yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus with an empty, established relation.
    pub fn joined() -> Self {
        Self {
            relation: Mutex::new(Some(RelationData::new())),
        }
    }

    /// Establish the relation if it is missing.
    pub fn join(&self) {
        lock(&self.relation).get_or_insert_with(RelationData::new);
    }

    /// Merge `pairs` into a remote unit's bag, adding the unit if needed.
    pub fn update_unit(&self, unit: &str, pairs: &[(&str, &str)]) {
        let mut guard = lock(&self.relation);
        let rel = guard.get_or_insert_with(RelationData::new);
        insert_pairs(rel.units.entry(unit.to_string()).or_default(), pairs);
    }

    /// Merge `pairs` into the application bag.
    pub fn update_app(&self, pairs: &[(&str, &str)]) {
        let mut guard = lock(&self.relation);
        insert_pairs(&mut guard.get_or_insert_with(RelationData::new).app, pairs);
    }

    fn write(&self, f: impl FnOnce(&mut RelationData)) -> Result<()> {
        let mut guard = lock(&self.relation);
        let rel = guard
            .as_mut()
            .ok_or_else(|| igw_core::Error::relation_not_found(CLUSTER))?;
        f(rel);
        Ok(())
    }
}

impl PeerBus for InMemoryPeerBus {
    fn relation(&self) -> Option<RelationData> {
        lock(&self.relation).clone()
    }

    fn set_local(&self, key: &str, value: &str) -> Result<()> {
        self.write(|rel| {
            rel.local.insert(key.to_string(), value.to_string());
        })
    }

    fn set_app(&self, key: &str, value: &str) -> Result<()> {
        self.write(|rel| {
            rel.app.insert(key.to_string(), value.to_string());
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// BROKER
// ═══════════════════════════════════════════════════════════════════════════

/// A request received by [`InMemoryBroker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerRequest {
    CreatePool { name: String, replicas: u32 },
    Permissions { client: String, capabilities: Vec<String> },
    OsdSettings(BTreeMap<String, u32>),
}

#[derive(Debug, Default)]
struct BrokerState {
    related: bool,
    requests: Vec<BrokerRequest>,
    pool_data: Option<PoolData>,
}

/// Broker that records requests and reports pools once told to.
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn related() -> Self {
        let broker = Self::new();
        lock(&broker.state).related = true;
        broker
    }

    /// Complete the requests and publish connection data.
    pub fn make_available(&self, data: PoolData) {
        let mut state = lock(&self.state);
        state.related = true;
        state.pool_data = Some(data);
    }

    pub fn requests(&self) -> Vec<BrokerRequest> {
        lock(&self.state).requests.clone()
    }

    fn record(&self, request: BrokerRequest) -> Result<()> {
        lock(&self.state).requests.push(request);
        Ok(())
    }
}

impl CephBroker for InMemoryBroker {
    fn is_related(&self) -> bool {
        lock(&self.state).related
    }

    fn create_replicated_pool(&self, name: &str, replicas: u32) -> Result<()> {
        self.record(BrokerRequest::CreatePool {
            name: name.to_string(),
            replicas,
        })
    }

    fn request_permissions(&self, client: &str, capabilities: &[&str]) -> Result<()> {
        self.record(BrokerRequest::Permissions {
            client: client.to_string(),
            capabilities: capabilities.iter().map(ToString::to_string).collect(),
        })
    }

    fn request_osd_settings(&self, settings: &BTreeMap<String, u32>) -> Result<()> {
        self.record(BrokerRequest::OsdSettings(settings.clone()))
    }

    fn pools_available(&self) -> bool {
        lock(&self.state).pool_data.is_some()
    }

    fn pool_data(&self) -> Option<PoolData> {
        lock(&self.state).pool_data.clone()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CERTIFICATE AUTHORITY
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct AuthorityState {
    related: bool,
    requests: BTreeMap<String, Vec<String>>,
    root: Option<String>,
    chain: Option<String>,
    app: Option<ApplicationCert>,
}

/// CA that hands out whatever the test publishes.
#[derive(Debug, Default)]
pub struct InMemoryAuthority {
    state: Mutex<AuthorityState>,
}

impl InMemoryAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn related() -> Self {
        let ca = Self::new();
        lock(&ca.state).related = true;
        ca
    }

    pub fn publish_root(&self, root: &str) {
        lock(&self.state).root = Some(root.to_string());
    }

    pub fn publish_chain(&self, chain: &str) {
        lock(&self.state).chain = Some(chain.to_string());
    }

    pub fn issue(&self, cert: &str, key: &str) {
        lock(&self.state).app = Some(ApplicationCert {
            cert: cert.to_string(),
            key: key.to_string(),
        });
    }

    /// Certificate requests keyed by common name.
    pub fn requests(&self) -> BTreeMap<String, Vec<String>> {
        lock(&self.state).requests.clone()
    }
}

impl CertificateAuthority for InMemoryAuthority {
    fn is_related(&self) -> bool {
        lock(&self.state).related
    }

    fn request_application_cert(&self, common_name: &str, sans: &[String]) -> Result<()> {
        lock(&self.state)
            .requests
            .entry(common_name.to_string())
            .or_insert_with(|| sans.to_vec());
        Ok(())
    }

    fn root_ca_cert(&self) -> Option<String> {
        lock(&self.state).root.clone()
    }

    fn chain(&self) -> Option<String> {
        lock(&self.state).chain.clone()
    }

    fn application_cert(&self) -> Option<ApplicationCert> {
        lock(&self.state).app.clone()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// STATE AND TEMPLATES
// ═══════════════════════════════════════════════════════════════════════════

/// State store that lives as long as the value.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    state: Mutex<StoredState>,
    saves: Mutex<usize>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current stored state.
    pub fn snapshot(&self) -> StoredState {
        lock(&self.state).clone()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        *lock(&self.saves)
    }
}

impl StateStore for InMemoryStateStore {
    fn load(&self) -> Result<StoredState> {
        Ok(self.snapshot())
    }

    fn save(&self, state: &StoredState) -> Result<()> {
        *lock(&self.state) = state.clone();
        let mut saves = lock(&self.saves);
        *saves = saves.saturating_add(1);
        Ok(())
    }
}

/// Templates held in a map, rendered with `{{ key }}` placeholders.
#[derive(Debug, Clone, Default)]
pub struct MapTemplates {
    templates: BTreeMap<String, String>,
}

impl MapTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: &str, text: &str) -> Self {
        self.templates.insert(name.to_string(), text.to_string());
        self
    }
}

impl TemplateRenderer for MapTemplates {
    fn render(&self, template: &str, context: &RenderContext) -> Result<String> {
        let text = self
            .templates
            .get(template)
            .ok_or_else(|| igw_core::Error::file_read_failed(template, "no such template"))?;
        render_placeholders(template, text, context)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_peer_bus_writes_need_relation() {
        let bus = InMemoryPeerBus::new();
        assert!(bus.set_local("k", "v").is_err());

        bus.join();
        bus.set_local("k", "v").unwrap();
        assert_eq!(
            bus.relation().unwrap().local.get("k").map(String::as_str),
            Some("v")
        );
    }

    #[test]
    fn test_broker_availability() {
        let broker = InMemoryBroker::related();
        assert!(!broker.pools_available());

        broker.make_available(PoolData {
            mon_hosts: vec!["10.0.0.1".to_string()],
            key: "AQD".to_string(),
        });
        assert!(broker.pools_available());
        assert_eq!(broker.pool_data().unwrap().key, "AQD");
    }

    #[test]
    fn test_authority_keeps_first_request() {
        let ca = InMemoryAuthority::related();
        ca.request_application_cert("gw0", &["a".to_string()]).unwrap();
        ca.request_application_cert("gw0", &["b".to_string()]).unwrap();

        assert_eq!(ca.requests().get("gw0"), Some(&vec!["a".to_string()]));
    }

    #[test]
    fn test_state_store_counts_saves() {
        let store = InMemoryStateStore::new();
        let mut state = store.load().unwrap();
        state.unit.is_started = true;
        store.save(&state).unwrap();

        assert!(store.snapshot().unit.is_started);
        assert_eq!(store.save_count(), 1);
    }
}
