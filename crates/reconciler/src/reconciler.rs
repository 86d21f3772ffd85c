//! Event dispatch and the gateway lifecycle.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use igw_core::relation::{CEPH_CLIENT, CLUSTER};
use igw_core::{CommandRunner, Config, UnitInfo};
use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use crate::actions::{Action, ActionResult, create_target};
use crate::collaborators::{
    CephBroker, CertificateAuthority, PeerBus, PoolData, StateStore, TemplateRenderer,
};
use crate::error::{Error, Result};
use crate::events::{Event, Flow};
use crate::gateway::{DEFAULT_TARGET, GatewayClient};
use crate::peers::PeerCoordinator;
use crate::render::{
    ConfigFile, ConfigRenderer, RenderContext, RestartMap, RestartProcedure, ensure_config_dir,
    restart_set,
};
use crate::services::ServiceManager;
use crate::state::{Phase, StoredState, UnitState};
use crate::status::{StatusInputs, UnitStatus, assess};
use crate::tls::{TlsMaterial, certificate_sans};

/// Packages the gateway needs.
pub const PACKAGES: &[&str] = &["ceph-iscsi", "tcmu-runner", "ceph-common"];

/// Ceph client the gateway authenticates as.
pub const CLIENT_NAME: &str = "ceph-iscsi";

/// Key capabilities requested for [`CLIENT_NAME`].
pub const CEPH_CAPABILITIES: &[&str] = &["osd", "allow *", "mon", "allow *", "mgr", "allow r"];

/// Relations without which the gateway cannot work.
pub const REQUIRED_RELATIONS: &[&str] = &[CEPH_CLIENT, CLUSTER];

/// The gateway API daemon.
pub const GATEWAY_SERVICE: &str = "rbd-target-api";

pub const PASSWORD_LENGTH: usize = 8;

const OSD_SETTINGS: [(&str, u32); 2] = [("osd heartbeat grace", 20), ("osd heartbeat interval", 5)];

/// What a dispatch did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Events handled in order, replayed and raised ones included.
    pub handled: Vec<Event>,
    /// Events waiting for re-delivery after this dispatch.
    pub deferred: Vec<Event>,
    pub status: UnitStatus,
}

/// What an action returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub results: ActionResult,
    pub status: UnitStatus,
}

/// Drives one unit of the gateway through its lifecycle.
///
/// Each call loads stored state, handles one stimulus and saves the state
/// only when handling succeeded, so a failed invocation leaves the previous
/// state (deferred events included) in place.
pub struct Reconciler {
    config: Config,
    unit: UnitInfo,
    peers: PeerCoordinator,
    broker: Arc<dyn CephBroker>,
    ca: Arc<dyn CertificateAuthority>,
    store: Arc<dyn StateStore>,
    runner: Arc<dyn CommandRunner>,
    services: ServiceManager,
    gateway: GatewayClient,
    renderer: ConfigRenderer,
    restart_map: RestartMap,
}

impl Reconciler {
    /// Handle one event, after replaying deferred events for hooks.
    ///
    /// # Errors
    ///
    /// Returns the first collaborator or command failure. Stored state is
    /// left untouched in that case.
    pub fn dispatch(&self, event: Event) -> Result<DispatchReport> {
        let span = info_span!("dispatch", unit = %self.unit.name, app = self.unit.app_name(), %event);
        let _guard = span.enter();

        let mut state = self.store.load()?;
        let mut queue: VecDeque<Event> = VecDeque::new();
        if event.is_hook() && !state.deferred.is_empty() {
            debug!(deferred = ?state.deferred, "Replaying deferred events");
            queue.extend(state.deferred.drain(..));
        }
        queue.push_back(event);

        let mut handled = Vec::new();
        while let Some(next) = queue.pop_front() {
            match self.handle(next, &mut state)? {
                Flow::Done => {}
                Flow::Defer => {
                    info!(event = %next, "Deferring");
                    state.defer(next);
                }
                Flow::Emit(signals) => queue.extend(signals),
            }
            handled.push(next);
        }

        let status = self.assess_status(&state.unit);
        self.store.save(&state)?;
        info!(%status, deferred = state.deferred.len(), "Dispatch complete");

        Ok(DispatchReport {
            handled,
            deferred: state.deferred,
            status,
        })
    }

    /// Run an administrative action.
    ///
    /// # Errors
    ///
    /// Returns `NotLeader` for leader-only actions on other units, or the
    /// first collaborator or command failure.
    pub fn run_action(&self, action: Action) -> Result<ActionOutcome> {
        let span = info_span!("action", unit = %self.unit.name, action = action.name());
        let _guard = span.enter();

        let mut state = self.store.load()?;
        let mut results = ActionResult::new();

        match action {
            Action::CreateTarget(params) => {
                let iqn = create_target(
                    &self.gateway,
                    &params,
                    &self.peers.ready_peer_details(),
                    &self.config.charm.rbd_metadata_pool,
                )?;
                results.insert("iqn".to_string(), iqn);
            }
            Action::AddTrustedIp { ips, overwrite } => {
                if !self.peers.is_leader() {
                    return Err(Error::not_leader("add-trusted-ip"));
                }
                self.peers.set_allowed_ips(&ips, !overwrite)?;
                let allowed = self.peers.allowed_ips()?.unwrap_or_default();
                state.unit.additional_trusted_ips.clone_from(&allowed);
                if self.render(&mut state)? == Flow::Defer {
                    info!("Allowlist stored; render waits for prerequisites");
                }
                results.insert("allowed-ips".to_string(), allowed.join(" "));
            }
            Action::Pause => {
                self.services.pause(&self.managed_services())?;
                state.unit.is_paused = true;
            }
            Action::Resume => {
                self.services.resume(&self.managed_services())?;
                state.unit.is_paused = false;
                state.unit.pending_restarts.clear();
            }
        }

        let status = self.assess_status(&state.unit);
        self.store.save(&state)?;
        Ok(ActionOutcome { results, status })
    }

    /// Current status from stored flags and topology.
    ///
    /// # Errors
    ///
    /// Returns error if stored state cannot be loaded.
    pub fn status(&self) -> Result<UnitStatus> {
        Ok(self.assess_status(&self.store.load()?.unit))
    }

    /// Coarse lifecycle position.
    ///
    /// # Errors
    ///
    /// Returns error if stored state cannot be loaded.
    pub fn phase(&self) -> Result<Phase> {
        let unit = self.store.load()?.unit;
        let phase = if unit.is_started && unit.enable_tls {
            Phase::TlsEnabled
        } else if unit.is_started {
            Phase::Started
        } else if !self.peers.is_joined() {
            Phase::AwaitingPeers
        } else if !self.broker.pools_available() {
            Phase::AwaitingPool
        } else if self.peers.admin_password().is_none() {
            Phase::AwaitingSecret
        } else {
            Phase::AwaitingRender
        };
        Ok(phase)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // HANDLERS
    // ═══════════════════════════════════════════════════════════════════════

    fn handle(&self, event: Event, state: &mut StoredState) -> Result<Flow> {
        debug!(%event, "Handling");
        match event {
            Event::Install => self.on_install(),
            Event::UpdateStatus => Ok(Flow::Done),
            Event::ConfigChanged | Event::UpgradeCharm => self.on_config_changed(state),
            Event::ClusterRelationChanged => self.on_peers_changed(state),
            Event::HasPeers => self.on_has_peers(),
            Event::ReadyPeers => self.on_ready_peers(state),
            Event::AllowedIpsChanged => self.on_allowed_ips_changed(state),
            Event::CephClientRelationJoined => {
                self.request_ceph_pool()?;
                Ok(Flow::Done)
            }
            Event::CephClientRelationChanged => Ok(if self.broker.pools_available() {
                Flow::Emit(vec![Event::PoolsAvailable])
            } else {
                Flow::Done
            }),
            Event::PoolsAvailable => self.render(state),
            Event::CertificatesRelationJoined => self.on_certificates_joined(),
            Event::CertificatesRelationChanged => self.on_certificates_changed(state),
        }
    }

    fn on_install(&self) -> Result<Flow> {
        if self.unit.in_container {
            warn!("Running in a container, skipping install");
            return Ok(Flow::Done);
        }
        self.services.install_packages(PACKAGES)?;
        Ok(Flow::Done)
    }

    fn on_config_changed(&self, state: &mut StoredState) -> Result<Flow> {
        if !state.unit.is_started {
            debug!("Not started, nothing to refresh");
            return Ok(Flow::Done);
        }
        let flow = self.render(state)?;
        self.request_ceph_pool()?;
        Ok(flow)
    }

    fn on_peers_changed(&self, state: &mut StoredState) -> Result<Flow> {
        let change = self
            .peers
            .observe_change(&state.unit.additional_trusted_ips)?;
        state.unit.additional_trusted_ips = change.allowed_ips;
        Ok(Flow::Emit(change.signals))
    }

    fn on_has_peers(&self) -> Result<Flow> {
        if self.peers.is_leader() && self.peers.admin_password().is_none() {
            info!("Generating admin password");
            self.peers.set_admin_password(&generate_password(PASSWORD_LENGTH))?;
        }
        Ok(Flow::Done)
    }

    fn on_ready_peers(&self, state: &mut StoredState) -> Result<Flow> {
        if self.render(state)? == Flow::Defer {
            return Ok(Flow::Defer);
        }
        self.setup_default_target(state)
    }

    fn on_allowed_ips_changed(&self, state: &mut StoredState) -> Result<Flow> {
        state.unit.additional_trusted_ips = self.peers.allowed_ips()?.unwrap_or_default();
        self.render(state)
    }

    fn on_certificates_joined(&self) -> Result<Flow> {
        let sans = certificate_sans(&self.unit);
        info!(cn = %self.unit.fqdn, sans = ?sans, "Requesting certificate");
        self.ca.request_application_cert(&self.unit.fqdn, &sans)?;
        Ok(Flow::Done)
    }

    fn on_certificates_changed(&self, state: &mut StoredState) -> Result<Flow> {
        let Some(material) = TlsMaterial::collect(self.ca.as_ref()) else {
            debug!("Certificate material incomplete, waiting");
            return Ok(Flow::Done);
        };
        material.install(&self.config.paths, self.runner.as_ref())?;
        state.unit.enable_tls = true;

        let flow = self.render(state)?;
        self.request_ceph_pool()?;
        Ok(flow)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // LIFECYCLE STEPS
    // ═══════════════════════════════════════════════════════════════════════

    fn request_ceph_pool(&self) -> Result<()> {
        if !self.broker.is_related() {
            debug!("No storage broker yet, skipping pool request");
            return Ok(());
        }
        let charm = &self.config.charm;
        info!(pool = %charm.rbd_metadata_pool, replicas = charm.ceph_osd_replication_count, "Requesting pool");
        self.broker
            .create_replicated_pool(&charm.rbd_metadata_pool, charm.ceph_osd_replication_count)?;
        self.broker.request_permissions(CLIENT_NAME, CEPH_CAPABILITIES)?;

        let settings: BTreeMap<String, u32> = OSD_SETTINGS
            .iter()
            .map(|(key, value)| ((*key).to_string(), *value))
            .collect();
        self.broker.request_osd_settings(&settings)
    }

    fn render(&self, state: &mut StoredState) -> Result<Flow> {
        let Some(password) = self.peers.admin_password() else {
            info!("Admin password not set yet, deferring render");
            return Ok(Flow::Defer);
        };
        let Some(pool) = self.broker.pool_data().filter(|_| self.broker.pools_available()) else {
            info!("Pools not available yet, deferring render");
            return Ok(Flow::Defer);
        };

        ensure_config_dir(&self.config.paths.ceph_config_dir)?;
        let context = self.render_context(&state.unit, &password, &pool)?;
        let changed = self.renderer.render_all(&self.restart_map, &context)?;
        let restarts: BTreeSet<String> = restart_set(&changed, &self.restart_map)
            .union(&state.unit.pending_restarts)
            .cloned()
            .collect();

        if state.unit.is_paused {
            info!(services = ?restarts, "Paused, not restarting");
        } else {
            if let Err(err) = self.services.restart_all(&restarts, &self.restart_map) {
                self.record_pending_restarts(&restarts)?;
                return Err(err);
            }
            state.unit.pending_restarts.clear();
        }

        self.peers.announce_ready()?;
        state.unit.is_started = true;
        info!(changed = changed.len(), restarted = restarts.len(), "Rendered configuration");
        Ok(Flow::Done)
    }

    /// Remember restarts that must be retried. Files were already written,
    /// so the next render sees no change and relies on this set.
    fn record_pending_restarts(&self, restarts: &BTreeSet<String>) -> Result<()> {
        warn!(services = ?restarts, "Restart failed, keeping it pending");
        let mut stored = self.store.load()?;
        stored.unit.pending_restarts.clone_from(restarts);
        self.store.save(&stored)
    }

    fn render_context(&self, unit: &UnitState, password: &str, pool: &PoolData) -> Result<RenderContext> {
        let charm = &self.config.charm;
        let allowed = self.peers.allowed_ips()?.unwrap_or_else(|| unit.additional_trusted_ips.clone());
        let mut trusted = self.peers.peer_addresses();
        trusted.extend(allowed);
        trusted.sort();
        trusted.dedup();

        Ok([
            ("admin_password", password.to_string()),
            ("ceph_config_dir", self.config.paths.ceph_config_dir.display().to_string()),
            ("ceph_key", pool.key.clone()),
            ("client_name", CLIENT_NAME.to_string()),
            ("enable_tls", unit.enable_tls.to_string()),
            ("gateway_ip", self.unit.cluster_bind_address().to_string()),
            ("loglevel", charm.loglevel.to_string()),
            ("mon_hosts", pool.mon_hosts.join(" ")),
            ("pool_name", charm.rbd_metadata_pool.clone()),
            ("release", charm.release.to_string()),
            ("trusted_ips", trusted.join(",")),
            ("use_syslog", charm.use_syslog.to_string()),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect())
    }

    fn setup_default_target(&self, state: &mut StoredState) -> Result<Flow> {
        if !self.config.charm.create_default_target || !self.peers.is_leader() {
            return Ok(Flow::Done);
        }
        if state.unit.target_created {
            debug!("Default target already created");
            return Ok(Flow::Done);
        }
        if !state.unit.is_started {
            return Ok(Flow::Defer);
        }

        info!(iqn = DEFAULT_TARGET, "Creating default target");
        self.gateway.create_target(DEFAULT_TARGET)?;
        for peer in self.peers.ready_peer_details().values() {
            self.gateway.add_gateway(DEFAULT_TARGET, &peer.fqdn, &peer.ip)?;
        }
        state.unit.target_created = true;
        Ok(Flow::Done)
    }

    fn managed_services(&self) -> Vec<String> {
        self.restart_map
            .files
            .iter()
            .flat_map(|file| file.services.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn assess_status(&self, unit: &UnitState) -> UnitStatus {
        let missing_relations: Vec<&str> = REQUIRED_RELATIONS
            .iter()
            .copied()
            .filter(|name| match *name {
                CEPH_CLIENT => !self.broker.is_related(),
                CLUSTER => !self.peers.is_joined(),
                _ => false,
            })
            .collect();

        assess(&StatusInputs {
            in_container: self.unit.in_container,
            unit_count: self.peers.unit_count(),
            allowed_unit_counts: &self.config.charm.allowed_unit_counts,
            is_paused: unit.is_paused,
            missing_relations,
            is_started: unit.is_started,
        })
    }
}

/// Random alphanumeric secret drawn from the OS CSPRNG.
pub fn generate_password(length: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Files rendered for the gateway and the services they feed.
pub fn gateway_restart_map(config: &Config) -> RestartMap {
    let paths = &config.paths;
    RestartMap {
        files: vec![
            ConfigFile::new(&paths.ceph_conf, "ceph.conf", 0o644).restarts(GATEWAY_SERVICE),
            ConfigFile::new(&paths.gateway_cfg, "iscsi-gateway.cfg", 0o640)
                .restarts(GATEWAY_SERVICE),
            ConfigFile::new(&paths.keyring, "ceph.client.ceph-iscsi.keyring", 0o600)
                .restarts(GATEWAY_SERVICE),
        ],
        procedures: [(GATEWAY_SERVICE.to_string(), RestartProcedure::ReloadThenRestart)].into(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// BUILDER
// ═══════════════════════════════════════════════════════════════════════════

/// Builder for [`Reconciler`].
#[derive(Default)]
pub struct ReconcilerBuilder {
    config: Config,
    unit: Option<UnitInfo>,
    peer_bus: Option<Arc<dyn PeerBus>>,
    broker: Option<Arc<dyn CephBroker>>,
    ca: Option<Arc<dyn CertificateAuthority>>,
    templates: Option<Arc<dyn TemplateRenderer>>,
    store: Option<Arc<dyn StateStore>>,
    runner: Option<Arc<dyn CommandRunner>>,
}

impl ReconcilerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_unit(mut self, unit: UnitInfo) -> Self {
        self.unit = Some(unit);
        self
    }

    #[must_use]
    pub fn with_peer_bus(mut self, bus: Arc<dyn PeerBus>) -> Self {
        self.peer_bus = Some(bus);
        self
    }

    #[must_use]
    pub fn with_broker(mut self, broker: Arc<dyn CephBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    #[must_use]
    pub fn with_authority(mut self, ca: Arc<dyn CertificateAuthority>) -> Self {
        self.ca = Some(ca);
        self
    }

    #[must_use]
    pub fn with_templates(mut self, templates: Arc<dyn TemplateRenderer>) -> Self {
        self.templates = Some(templates);
        self
    }

    #[must_use]
    pub fn with_state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Build the reconciler.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first missing collaborator.
    pub fn build(self) -> Result<Reconciler> {
        let unit = required(self.unit, "unit info")?;
        let peer_bus = required(self.peer_bus, "peer bus")?;
        let broker = required(self.broker, "storage broker")?;
        let ca = required(self.ca, "certificate authority")?;
        let templates = required(self.templates, "template renderer")?;
        let store = required(self.store, "state store")?;
        let runner = required(self.runner, "command runner")?;

        Ok(Reconciler {
            restart_map: gateway_restart_map(&self.config),
            peers: PeerCoordinator::new(peer_bus, unit.clone()),
            services: ServiceManager::new(runner.clone()),
            gateway: GatewayClient::new(runner.clone()),
            renderer: ConfigRenderer::new(templates),
            config: self.config,
            unit,
            broker,
            ca,
            store,
            runner,
        })
    }
}

fn required<T>(value: Option<T>, what: &str) -> Result<T> {
    value.ok_or_else(|| igw_core::Error::invalid_config(format!("{what} is required")).into())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use igw_core::{Binding, RecordingRunner};

    use super::*;
    use crate::memory::{InMemoryAuthority, InMemoryBroker, InMemoryPeerBus, InMemoryStateStore, MapTemplates};

    fn unit() -> UnitInfo {
        UnitInfo {
            name: "ceph-iscsi/0".to_string(),
            is_leader: true,
            fqdn: "ceph-iscsi-0.example".to_string(),
            hostname: "ceph-iscsi-0".to_string(),
            in_container: false,
            public: Binding::default(),
            cluster: Binding {
                ingress_address: "10.0.0.10".to_string(),
                bind_address: "10.0.0.10".to_string(),
            },
        }
    }

    fn builder() -> ReconcilerBuilder {
        ReconcilerBuilder::new()
            .with_unit(unit())
            .with_peer_bus(Arc::new(InMemoryPeerBus::joined()))
            .with_broker(Arc::new(InMemoryBroker::related()))
            .with_authority(Arc::new(InMemoryAuthority::new()))
            .with_templates(Arc::new(MapTemplates::new()))
            .with_state_store(Arc::new(InMemoryStateStore::new()))
            .with_runner(Arc::new(RecordingRunner::new()))
    }

    #[test]
    fn test_builder_requires_collaborators() {
        let result = ReconcilerBuilder::new().with_unit(unit()).build();
        assert!(result.is_err());
        assert!(builder().build().is_ok());
    }

    #[test]
    fn test_generate_password() {
        let password = generate_password(PASSWORD_LENGTH);
        assert_eq!(password.len(), 8);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_gateway_restart_map() {
        let map = gateway_restart_map(&Config::default());
        assert_eq!(map.files.len(), 3);
        assert!(map.files.iter().all(|f| f.services.contains(GATEWAY_SERVICE)));
        assert_eq!(map.procedure(GATEWAY_SERVICE), RestartProcedure::ReloadThenRestart);
    }

    #[test]
    fn test_phase_progression() {
        let reconciler = builder().build().unwrap();
        assert_eq!(reconciler.phase().unwrap(), Phase::AwaitingPool);
    }

    #[test]
    fn test_update_status_reports_missing_relations() {
        let reconciler = builder()
            .with_peer_bus(Arc::new(InMemoryPeerBus::new()))
            .with_broker(Arc::new(InMemoryBroker::new()))
            .with_config(Config {
                charm: igw_core::CharmConfig {
                    allowed_unit_counts: vec![1, 2],
                    ..Default::default()
                },
                ..Default::default()
            })
            .build()
            .unwrap();

        let report = reconciler.dispatch(Event::UpdateStatus).unwrap();
        assert_eq!(
            report.status,
            UnitStatus::Blocked("Missing relations: ceph-client, cluster".to_string())
        );
    }

    #[test]
    fn test_render_context_merges_trusted_ips() {
        let bus = Arc::new(InMemoryPeerBus::joined());
        bus.update_unit("ceph-iscsi/1", &[("ingress-address", "10.0.0.2")]);
        bus.update_app(&[("allowed_ips", r#"["10.0.0.2","192.168.1.1"]"#)]);
        let reconciler = builder().with_peer_bus(bus).build().unwrap();

        let ctx = reconciler
            .render_context(
                &UnitState::default(),
                "pw",
                &PoolData {
                    mon_hosts: vec!["10.5.0.1".to_string(), "10.5.0.2".to_string()],
                    key: "AQD".to_string(),
                },
            )
            .unwrap();

        assert_eq!(
            ctx.get("trusted_ips").map(String::as_str),
            Some("10.0.0.10,10.0.0.2,192.168.1.1")
        );
        assert_eq!(ctx.get("mon_hosts").map(String::as_str), Some("10.5.0.1 10.5.0.2"));
        assert_eq!(ctx.get("use_syslog").map(String::as_str), Some("false"));
        assert_eq!(ctx.get("release").map(String::as_str), Some("octopus"));
    }
}
