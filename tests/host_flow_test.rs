//! End-to-end flow through the file-backed host substrate.
//!
//! Tests verify that:
//! - A unit bootstraps from snapshot relation data to rendered config
//! - Writes to the peer relation reach the saved snapshot
//! - Lifecycle state survives between reconciler instances

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use igw::substrate::{JsonStateStore, SnapshotFile};
use igw::templates::FileTemplates;
use igw_core::{Config, PathsConfig, RecordingRunner};
use igw_reconciler::{Event, PeerBus, Reconciler, ReconcilerBuilder, UnitStatus};
use serde_json::json;
use tempfile::TempDir;

fn write_snapshot(path: &Path, leader: bool) {
    let doc = json!({
        "unit": {
            "name": "ceph-iscsi/0",
            "is_leader": leader,
            "fqdn": "ceph-iscsi-0.example",
            "hostname": "ceph-iscsi-0",
            "public": {"ingress_address": "10.5.0.10", "bind_address": "10.5.0.10"},
            "cluster": {"ingress_address": "10.0.0.10", "bind_address": "10.0.0.10"}
        },
        "relations": {
            "cluster": {
                "units": {
                    "ceph-iscsi/1": {
                        "ingress-address": "10.0.0.2",
                        "gateway_ready": "True",
                        "gateway_fqdn": "ceph-iscsi-1.example"
                    }
                }
            },
            "ceph-client": {
                "units": {
                    "ceph-mon/0": {
                        "ceph-public-address": "10.20.0.1",
                        "key": "AQDkey==",
                        "broker_rsp": "{\"exit-code\": 0}"
                    }
                }
            }
        }
    });
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, doc.to_string()).unwrap();
}

fn paths(dir: &TempDir) -> PathsConfig {
    let mut paths = PathsConfig::default().rooted_at(dir.path());
    paths.templates_dir = PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/templates"));
    paths
}

fn reconciler(config: &Config, snapshot: &SnapshotFile, runner: Arc<RecordingRunner>) -> Reconciler {
    ReconcilerBuilder::new()
        .with_config(config.clone())
        .with_unit(snapshot.unit())
        .with_peer_bus(Arc::new(snapshot.peer_bus()))
        .with_broker(Arc::new(snapshot.broker()))
        .with_authority(Arc::new(snapshot.authority()))
        .with_templates(Arc::new(FileTemplates::new(&config.paths.templates_dir)))
        .with_state_store(Arc::new(JsonStateStore::new(&config.paths.state_file)))
        .with_runner(runner)
        .build()
        .expect("reconciler should build")
}

#[test]
fn leader_bootstraps_from_snapshot() {
    // GIVEN: a leader with one ready peer and a completed broker request
    let dir = TempDir::new().unwrap();
    let config = Config {
        paths: paths(&dir),
        ..Config::default()
    };
    write_snapshot(&config.paths.snapshot_file, true);
    let runner = Arc::new(RecordingRunner::new());

    // WHEN: the peer relation changes
    let snapshot = SnapshotFile::load(&config.paths.snapshot_file).unwrap();
    let report = reconciler(&config, &snapshot, runner.clone())
        .dispatch(Event::ClusterRelationChanged)
        .unwrap();
    snapshot.save().unwrap();

    // THEN: the password is generated, config rendered and the unit is ready
    assert!(report.deferred.is_empty());
    assert_eq!(report.status, UnitStatus::Active("Unit is ready".to_string()));

    let reloaded = SnapshotFile::load(&config.paths.snapshot_file).unwrap();
    let rel = reloaded.peer_bus().relation().unwrap();
    let password = rel.app.get("admin_password").cloned().unwrap();
    assert_eq!(password.len(), 8);
    assert_eq!(rel.local.get("gateway_ready").map(String::as_str), Some("True"));

    let cfg = fs::read_to_string(&config.paths.gateway_cfg).unwrap();
    assert!(cfg.contains(&format!("api_password = {password}")));
    assert!(cfg.contains("trusted_ip_list = 10.0.0.10,10.0.0.2"));
    assert!(cfg.contains("pool = iscsi"));
    let conf = fs::read_to_string(&config.paths.ceph_conf).unwrap();
    assert!(conf.contains("mon host = 10.20.0.1"));

    // Rooted runs point the rendered config at the rooted directory.
    let config_dir = config.paths.ceph_config_dir.display().to_string();
    assert!(config_dir.starts_with(&dir.path().display().to_string()));
    assert!(cfg.contains(&format!("ceph_config_dir = {config_dir}\n")));
    assert!(conf.contains(&format!("keyring = {config_dir}/$cluster.$name.keyring")));

    assert_eq!(
        runner.command_lines(),
        vec![
            "systemctl daemon-reload".to_string(),
            "systemctl restart rbd-target-api".to_string(),
        ]
    );
}

#[test]
fn state_persists_between_invocations() {
    let dir = TempDir::new().unwrap();
    let config = Config {
        paths: paths(&dir),
        ..Config::default()
    };
    write_snapshot(&config.paths.snapshot_file, false);

    // Non-leader without a password defers its render.
    let snapshot = SnapshotFile::load(&config.paths.snapshot_file).unwrap();
    let runner = Arc::new(RecordingRunner::new());
    let first = reconciler(&config, &snapshot, runner.clone())
        .dispatch(Event::ClusterRelationChanged)
        .unwrap();
    assert_eq!(first.deferred, vec![Event::ReadyPeers]);

    // The leader publishes a password; the next invocation replays the render.
    snapshot.peer_bus().set_app("admin_password", "fromlead").unwrap();
    snapshot.save().unwrap();
    let snapshot = SnapshotFile::load(&config.paths.snapshot_file).unwrap();
    let second = reconciler(&config, &snapshot, runner)
        .dispatch(Event::UpdateStatus)
        .unwrap();

    assert_eq!(second.handled.first(), Some(&Event::ReadyPeers));
    assert!(second.deferred.is_empty());
    let stored = fs::read_to_string(&config.paths.state_file).unwrap();
    assert!(stored.contains("\"is_started\": true"));
}
