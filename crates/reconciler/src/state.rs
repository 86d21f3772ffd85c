//! Per-unit lifecycle state persisted across invocations.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::events::Event;

/// Lifecycle flags owned by the reconciler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitState {
    /// A render + restart cycle has completed at least once.
    pub is_started: bool,
    /// Services were stopped by the pause action.
    pub is_paused: bool,
    /// The default target has been provisioned.
    pub target_created: bool,
    /// TLS material is installed.
    pub enable_tls: bool,
    /// Last allowlist read from the peer bus.
    pub additional_trusted_ips: Vec<String>,
    /// Services whose configuration changed but whose restart has not
    /// succeeded yet.
    pub pending_restarts: BTreeSet<String>,
}

/// Everything kept between invocations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredState {
    pub unit: UnitState,
    /// Events awaiting re-delivery, oldest first.
    pub deferred: Vec<Event>,
}

impl StoredState {
    /// Queue `event` for re-delivery unless it is already queued.
    pub fn defer(&mut self, event: Event) {
        if !self.deferred.contains(&event) {
            self.deferred.push(event);
        }
    }
}

/// Coarse lifecycle position derived from flags and collaborator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    AwaitingPeers,
    AwaitingPool,
    AwaitingSecret,
    /// Every prerequisite is present; the next render starts the unit.
    AwaitingRender,
    Started,
    TlsEnabled,
}
