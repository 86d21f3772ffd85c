//! Stimuli the reconciler reacts to.
//!
//! Hook events come from the host substrate; signal events are raised by
//! the reconciler itself while handling a hook (for example a peer relation
//! change fans out into `has-peers` and `ready-peers`). Events carry no
//! payload: handlers always read current state, so a re-delivered event is
//! handled exactly like a fresh one.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Anything that can trigger reconciliation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Event {
    // Hooks delivered by the host substrate
    Install,
    UpdateStatus,
    ConfigChanged,
    UpgradeCharm,
    ClusterRelationChanged,
    CephClientRelationJoined,
    CephClientRelationChanged,
    CertificatesRelationJoined,
    CertificatesRelationChanged,

    // Signals raised while handling hooks
    HasPeers,
    ReadyPeers,
    AllowedIpsChanged,
    PoolsAvailable,
}

impl Event {
    /// Whether the host substrate delivers this event directly.
    #[must_use]
    pub const fn is_hook(self) -> bool {
        !matches!(
            self,
            Self::HasPeers | Self::ReadyPeers | Self::AllowedIpsChanged | Self::PoolsAvailable
        )
    }
}

/// What a handler decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Handled; nothing further.
    Done,
    /// Preconditions missing; re-deliver later.
    Defer,
    /// Handled; these signals follow.
    Emit(Vec<Event>),
}
