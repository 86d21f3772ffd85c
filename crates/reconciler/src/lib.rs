//! Reconciliation and peer coordination for a clustered iSCSI gateway.
//!
//! One [`Reconciler`] handles one stimulus for one unit and then exits. Units
//! never talk to each other directly; they coordinate through the shared peer
//! bus, where the leader publishes the admin password and the trusted-IP
//! allowlist and every unit announces its own readiness.
//!
//! # Lifecycle
//!
//! ```text
//! install → awaiting peers → awaiting pool → awaiting secret → started → (tls)
//! ```
//!
//! Every event re-evaluates from persisted flags. When a prerequisite is
//! missing (no admin password, pools not created) the event is deferred:
//! it is persisted and replayed before the next hook, and its handler
//! checks everything again from scratch.
//!
//! # Collaborators
//!
//! - [`PeerBus`] - shared key/value relation between gateways
//! - [`CephBroker`] - pool and key permission requests
//! - [`CertificateAuthority`] - TLS certificate issuance
//! - [`TemplateRenderer`] - configuration file text
//! - [`StateStore`] - flags and deferred events between invocations
//! - [`igw_core::CommandRunner`] - `apt-get`, `systemctl`, `gwcli`, `openssl`
//!
//! [`memory`] provides in-memory versions of each for tests.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod actions;
pub mod collaborators;
pub mod error;
pub mod events;
pub mod gateway;
pub mod memory;
pub mod peers;
pub mod reconciler;
pub mod render;
pub mod services;
pub mod state;
pub mod status;
pub mod tls;

// Re-export main types
pub use actions::{Action, ActionResult, CreateTargetParams};
pub use collaborators::{
    ApplicationCert, CephBroker, CertificateAuthority, PeerBus, PoolData, StateStore,
    TemplateRenderer,
};
pub use error::{Error, Result};
pub use events::{Event, Flow};
pub use peers::{PeerCoordinator, PeerDetails};
pub use reconciler::{
    ActionOutcome, DispatchReport, Reconciler, ReconcilerBuilder, generate_password,
};
pub use render::{RenderContext, RestartMap, RestartProcedure, render_placeholders};
pub use state::{Phase, StoredState, UnitState};
pub use status::UnitStatus;
