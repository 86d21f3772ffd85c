//! File-backed host substrate.
//!
//! The host hands each invocation a JSON snapshot describing the local unit
//! and the data on its relations. The adapters here read that snapshot and
//! write the local unit's (and, on the leader, the application's) bags back
//! into it; the caller saves it once dispatch succeeds. Lifecycle state
//! lives in a separate JSON document.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use igw_core::relation::{CEPH_CLIENT, CERTIFICATES, CLUSTER};
use igw_core::{RelationData, ResultExt, UnitInfo};
use igw_reconciler::{
    ApplicationCert, CephBroker, CertificateAuthority, PeerBus, PoolData, StateStore, StoredState,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

type Result<T> = igw_reconciler::Result<T>;

const BROKER_REQUEST_KEY: &str = "broker_req";
const BROKER_RESPONSE_KEY: &str = "broker_rsp";
const OSD_SETTINGS_KEY: &str = "osd-settings";
const CEPH_KEY: &str = "key";
const MON_ADDRESS_KEY: &str = "ceph-public-address";
const CERT_REQUESTS_KEY: &str = "application_cert_requests";
const CA_KEY: &str = "ca";
const CHAIN_KEY: &str = "chain";

/// Everything the host knows about this unit for one invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    pub unit: UnitInfo,
    /// Established relations keyed by relation name.
    #[serde(default)]
    pub relations: BTreeMap<String, RelationData>,
}

/// A snapshot loaded from disk, shared by the relation adapters.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
    snapshot: Arc<Mutex<Snapshot>>,
}

impl SnapshotFile {
    /// Load the snapshot at `path`.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or decoded.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| igw_core::Error::file_read_failed(path, e.to_string()))?;
        let snapshot: Snapshot = serde_json::from_str(&content)?;
        Ok(Self {
            path: path.to_path_buf(),
            snapshot: Arc::new(Mutex::new(snapshot)),
        })
    }

    /// Write the snapshot back to where it was loaded from.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written.
    pub fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&*self.lock())?;
        write_atomic(&self.path, &content)
    }

    pub fn unit(&self) -> UnitInfo {
        self.lock().unit.clone()
    }

    pub fn peer_bus(&self) -> SnapshotPeerBus {
        SnapshotPeerBus {
            file: self.clone(),
        }
    }

    pub fn broker(&self) -> SnapshotBroker {
        SnapshotBroker {
            file: self.clone(),
        }
    }

    pub fn authority(&self) -> SnapshotAuthority {
        SnapshotAuthority {
            file: self.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Snapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn relation(&self, name: &str) -> Option<RelationData> {
        self.lock().relations.get(name).cloned()
    }

    fn update<F>(&self, name: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut RelationData) -> Result<()>,
    {
        let mut guard = self.lock();
        let rel = guard
            .relations
            .get_mut(name)
            .ok_or_else(|| igw_core::Error::relation_not_found(name))?;
        f(rel)
    }

    fn set_local(&self, relation: &str, key: &str, value: String) -> Result<()> {
        self.update(relation, |rel| {
            rel.local.insert(key.to_string(), value);
            Ok(())
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PEER BUS
// ═══════════════════════════════════════════════════════════════════════════

/// Peer bus over the snapshot's `cluster` relation.
#[derive(Debug, Clone)]
pub struct SnapshotPeerBus {
    file: SnapshotFile,
}

impl PeerBus for SnapshotPeerBus {
    fn relation(&self) -> Option<RelationData> {
        self.file.relation(CLUSTER)
    }

    fn set_local(&self, key: &str, value: &str) -> Result<()> {
        self.file.set_local(CLUSTER, key, value.to_string())
    }

    fn set_app(&self, key: &str, value: &str) -> Result<()> {
        self.file.update(CLUSTER, |rel| {
            rel.app.insert(key.to_string(), value.to_string());
            Ok(())
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// STORAGE BROKER
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Serialize, Deserialize)]
struct BrokerRequest {
    #[serde(rename = "api-version")]
    api_version: u32,
    ops: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct BrokerResponse {
    #[serde(rename = "exit-code")]
    exit_code: i32,
    #[serde(default)]
    stderr: Option<String>,
}

/// Storage broker over the snapshot's `ceph-client` relation.
///
/// Requests accumulate as ops in one `broker_req` document; an op already
/// present is not added twice.
#[derive(Debug, Clone)]
pub struct SnapshotBroker {
    file: SnapshotFile,
}

impl SnapshotBroker {
    fn add_op(&self, op: Value) -> Result<()> {
        self.file.update(CEPH_CLIENT, |rel| {
            let mut request: BrokerRequest = match rel.local.get(BROKER_REQUEST_KEY) {
                Some(existing) => serde_json::from_str(existing)?,
                None => BrokerRequest {
                    api_version: 1,
                    ops: Vec::new(),
                },
            };
            if !request.ops.contains(&op) {
                request.ops.push(op);
            }
            rel.local
                .insert(BROKER_REQUEST_KEY.to_string(), serde_json::to_string(&request)?);
            Ok(())
        })
    }

    fn response_ok(rel: &RelationData) -> bool {
        rel.first_unit_value(BROKER_RESPONSE_KEY)
            .and_then(|raw| {
                serde_json::from_str::<BrokerResponse>(raw)
                    .map_err(|e| igw_core::Error::json_parse_failed(e.to_string()))
                    .into_option_logged()
            })
            .is_some_and(|rsp| {
                if rsp.exit_code != 0 {
                    debug!(exit_code = rsp.exit_code, stderr = ?rsp.stderr, "Broker request not complete");
                }
                rsp.exit_code == 0
            })
    }
}

impl CephBroker for SnapshotBroker {
    fn is_related(&self) -> bool {
        self.file.relation(CEPH_CLIENT).is_some()
    }

    fn create_replicated_pool(&self, name: &str, replicas: u32) -> Result<()> {
        self.add_op(json!({"op": "create-pool", "name": name, "replicas": replicas}))
    }

    fn request_permissions(&self, client: &str, capabilities: &[&str]) -> Result<()> {
        self.add_op(json!({
            "op": "set-key-permissions",
            "permissions": capabilities,
            "client": client,
        }))
    }

    fn request_osd_settings(&self, settings: &BTreeMap<String, u32>) -> Result<()> {
        let encoded = serde_json::to_string(settings)?;
        self.file.set_local(CEPH_CLIENT, OSD_SETTINGS_KEY, encoded)
    }

    fn pools_available(&self) -> bool {
        self.file
            .relation(CEPH_CLIENT)
            .is_some_and(|rel| Self::response_ok(&rel))
            && self.pool_data().is_some()
    }

    fn pool_data(&self) -> Option<PoolData> {
        let rel = self.file.relation(CEPH_CLIENT)?;
        let key = rel.first_unit_value(CEPH_KEY)?.to_string();
        let mon_hosts: Vec<String> = rel
            .units
            .values()
            .filter_map(|bag| bag.get(MON_ADDRESS_KEY))
            .filter(|addr| !addr.is_empty())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if mon_hosts.is_empty() {
            return None;
        }
        Some(PoolData { mon_hosts, key })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CERTIFICATE AUTHORITY
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct ProcessedRequest {
    app_data: ApplicationCert,
}

/// Certificate authority over the snapshot's `certificates` relation.
#[derive(Debug, Clone)]
pub struct SnapshotAuthority {
    file: SnapshotFile,
}

impl SnapshotAuthority {
    /// Key the CA publishes this unit's issued certificates under.
    fn processed_key(&self) -> String {
        format!(
            "{}.processed_application_requests",
            self.file.unit().name.replace('/', "_")
        )
    }
}

impl CertificateAuthority for SnapshotAuthority {
    fn is_related(&self) -> bool {
        self.file.relation(CERTIFICATES).is_some()
    }

    fn request_application_cert(&self, common_name: &str, sans: &[String]) -> Result<()> {
        self.file.update(CERTIFICATES, |rel| {
            let mut requests: BTreeMap<String, Value> = match rel.local.get(CERT_REQUESTS_KEY) {
                Some(existing) => serde_json::from_str(existing)?,
                None => BTreeMap::new(),
            };
            requests
                .entry(common_name.to_string())
                .or_insert_with(|| json!({ "sans": sans }));
            rel.local
                .insert(CERT_REQUESTS_KEY.to_string(), serde_json::to_string(&requests)?);
            Ok(())
        })
    }

    fn root_ca_cert(&self) -> Option<String> {
        self.file
            .relation(CERTIFICATES)?
            .first_unit_value(CA_KEY)
            .map(ToString::to_string)
    }

    fn chain(&self) -> Option<String> {
        self.file
            .relation(CERTIFICATES)?
            .first_unit_value(CHAIN_KEY)
            .map(ToString::to_string)
    }

    fn application_cert(&self) -> Option<ApplicationCert> {
        let rel = self.file.relation(CERTIFICATES)?;
        let raw = rel.first_unit_value(&self.processed_key())?;
        serde_json::from_str::<ProcessedRequest>(raw)
            .map_err(|e| igw_core::Error::json_parse_failed(e.to_string()))
            .into_option_logged()
            .map(|processed| processed.app_data)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// STATE STORE
// ═══════════════════════════════════════════════════════════════════════════

/// Lifecycle state as a JSON document on disk.
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StateStore for JsonStateStore {
    fn load(&self) -> Result<StoredState> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No stored state, starting fresh");
                Ok(StoredState::default())
            }
            Err(e) => Err(igw_core::Error::file_read_failed(&self.path, e.to_string()).into()),
        }
    }

    fn save(&self, state: &StoredState) -> Result<()> {
        write_atomic(&self.path, &serde_json::to_string_pretty(state)?)
    }
}

/// Write through a sibling temp file and rename over `path`.
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| igw_core::Error::directory_creation_failed(parent, e.to_string()))?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, content).map_err(|e| igw_core::Error::file_write_failed(&tmp, e.to_string()))?;
    fs::rename(&tmp, path).map_err(|e| igw_core::Error::file_write_failed(path, e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use igw_core::DataBag;
    use tempfile::TempDir;

    use super::*;

    fn bag(pairs: &[(&str, &str)]) -> DataBag {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn write_snapshot(dir: &TempDir, relations: serde_json::Value) -> PathBuf {
        let path = dir.path().join("snapshot.json");
        let doc = json!({
            "unit": {
                "name": "ceph-iscsi/0",
                "is_leader": true,
                "fqdn": "gw0.example",
                "hostname": "gw0",
                "cluster": {"ingress_address": "10.0.0.10", "bind_address": "10.0.0.10"}
            },
            "relations": relations,
        });
        fs::write(&path, doc.to_string()).unwrap();
        path
    }

    #[test]
    fn test_peer_bus_round_trip_through_file() {
        let dir = TempDir::new().unwrap();
        let path = write_snapshot(&dir, json!({"cluster": {}}));
        let file = SnapshotFile::load(&path).unwrap();

        file.peer_bus().set_local("gateway_ready", "True").unwrap();
        file.peer_bus().set_app("admin_password", "pw").unwrap();
        file.save().unwrap();

        let reloaded = SnapshotFile::load(&path).unwrap();
        let rel = reloaded.peer_bus().relation().unwrap();
        assert_eq!(rel.local, bag(&[("gateway_ready", "True")]));
        assert_eq!(rel.app, bag(&[("admin_password", "pw")]));
    }

    #[test]
    fn test_peer_bus_without_relation() {
        let dir = TempDir::new().unwrap();
        let file = SnapshotFile::load(&write_snapshot(&dir, json!({}))).unwrap();

        assert!(file.peer_bus().relation().is_none());
        assert!(file.peer_bus().set_local("k", "v").is_err());
    }

    #[test]
    fn test_broker_ops_accumulate_once() {
        let dir = TempDir::new().unwrap();
        let file = SnapshotFile::load(&write_snapshot(&dir, json!({"ceph-client": {}}))).unwrap();
        let broker = file.broker();

        broker.create_replicated_pool("iscsi", 3).unwrap();
        broker.create_replicated_pool("iscsi", 3).unwrap();
        broker
            .request_permissions("ceph-iscsi", &["osd", "allow *"])
            .unwrap();

        let rel = file.relation(CEPH_CLIENT).unwrap();
        let request: BrokerRequest =
            serde_json::from_str(rel.local.get(BROKER_REQUEST_KEY).unwrap()).unwrap();
        assert_eq!(request.api_version, 1);
        assert_eq!(request.ops.len(), 2);
        assert_eq!(
            request.ops.first().unwrap(),
            &json!({"op": "create-pool", "name": "iscsi", "replicas": 3})
        );
    }

    #[test]
    fn test_broker_availability() {
        let dir = TempDir::new().unwrap();
        let relations = json!({
            "ceph-client": {
                "units": {
                    "ceph-mon/0": {"ceph-public-address": "10.20.0.2", "key": "AQD=", "broker_rsp": "{\"exit-code\": 0}"},
                    "ceph-mon/1": {"ceph-public-address": "10.20.0.1"}
                }
            }
        });
        let file = SnapshotFile::load(&write_snapshot(&dir, relations)).unwrap();
        let broker = file.broker();

        assert!(broker.pools_available());
        assert_eq!(
            broker.pool_data().unwrap(),
            PoolData {
                mon_hosts: vec!["10.20.0.1".to_string(), "10.20.0.2".to_string()],
                key: "AQD=".to_string(),
            }
        );
    }

    #[test]
    fn test_broker_failed_response() {
        let dir = TempDir::new().unwrap();
        let relations = json!({
            "ceph-client": {
                "units": {
                    "ceph-mon/0": {"ceph-public-address": "10.20.0.2", "key": "AQD=", "broker_rsp": "{\"exit-code\": 1, \"stderr\": \"no\"}"}
                }
            }
        });
        let file = SnapshotFile::load(&write_snapshot(&dir, relations)).unwrap();
        assert!(!file.broker().pools_available());
    }

    #[test]
    fn test_authority_reads_processed_requests() {
        let dir = TempDir::new().unwrap();
        let relations = json!({
            "certificates": {
                "units": {
                    "vault/0": {
                        "ca": "ROOT",
                        "ceph-iscsi_0.processed_application_requests":
                            "{\"app_data\": {\"cert\": \"CERT\", \"key\": \"KEY\"}}"
                    }
                }
            }
        });
        let file = SnapshotFile::load(&write_snapshot(&dir, relations)).unwrap();
        let ca = file.authority();

        assert_eq!(ca.root_ca_cert().as_deref(), Some("ROOT"));
        assert_eq!(ca.chain(), None);
        assert_eq!(
            ca.application_cert(),
            Some(ApplicationCert {
                cert: "CERT".to_string(),
                key: "KEY".to_string(),
            })
        );
    }

    #[test]
    fn test_authority_request_format() {
        let dir = TempDir::new().unwrap();
        let file = SnapshotFile::load(&write_snapshot(&dir, json!({"certificates": {}}))).unwrap();

        file.authority()
            .request_application_cert("gw0.example", &["10.0.0.10".to_string()])
            .unwrap();

        let rel = file.relation(CERTIFICATES).unwrap();
        let requests: Value =
            serde_json::from_str(rel.local.get(CERT_REQUESTS_KEY).unwrap()).unwrap();
        assert_eq!(requests, json!({"gw0.example": {"sans": ["10.0.0.10"]}}));
    }

    #[test]
    fn test_state_store_defaults_then_persists() {
        let dir = TempDir::new().unwrap();
        let store = JsonStateStore::new(dir.path().join("state/state.json"));

        let mut state = store.load().unwrap();
        assert_eq!(state, StoredState::default());

        state.unit.is_started = true;
        store.save(&state).unwrap();
        assert!(store.load().unwrap().unit.is_started);
    }
}
