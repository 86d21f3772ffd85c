//! Workload status, computed from flags and topology alone.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const CONTAINER_MESSAGE: &str = "Charm cannot be deployed into a container";
pub const PAUSED_MESSAGE: &str = "Paused. Use 'resume' action to resume normal service.";
pub const READY_MESSAGE: &str = "Unit is ready";
pub const WAITING_MESSAGE: &str = "Charm configuration in progress";

/// Status reported to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum UnitStatus {
    Active(String),
    Waiting(String),
    Maintenance(String),
    Blocked(String),
}

impl UnitStatus {
    pub fn message(&self) -> &str {
        match self {
            Self::Active(m) | Self::Waiting(m) | Self::Maintenance(m) | Self::Blocked(m) => m,
        }
    }

    pub const fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked(_))
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            Self::Active(_) => "active",
            Self::Waiting(_) => "waiting",
            Self::Maintenance(_) => "maintenance",
            Self::Blocked(_) => "blocked",
        };
        write!(f, "{state}: {}", self.message())
    }
}

/// Everything status depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusInputs<'a> {
    pub in_container: bool,
    pub unit_count: usize,
    pub allowed_unit_counts: &'a [usize],
    pub is_paused: bool,
    pub missing_relations: Vec<&'a str>,
    pub is_started: bool,
}

/// Topology checks that block the unit regardless of progress.
pub fn custom_check(inputs: &StatusInputs<'_>) -> Option<UnitStatus> {
    if inputs.in_container {
        return Some(UnitStatus::Blocked(CONTAINER_MESSAGE.to_string()));
    }
    if !inputs.allowed_unit_counts.contains(&inputs.unit_count) {
        return Some(UnitStatus::Blocked(format!(
            "{} is an invalid unit count",
            inputs.unit_count
        )));
    }
    None
}

/// Compute the unit's status. The first matching rule wins: topology
/// check, paused, missing relations, not started, ready.
pub fn assess(inputs: &StatusInputs<'_>) -> UnitStatus {
    if let Some(blocked) = custom_check(inputs) {
        return blocked;
    }
    if inputs.is_paused {
        return UnitStatus::Maintenance(PAUSED_MESSAGE.to_string());
    }
    if !inputs.missing_relations.is_empty() {
        return UnitStatus::Blocked(format!(
            "Missing relations: {}",
            inputs.missing_relations.join(", ")
        ));
    }
    if inputs.is_started {
        UnitStatus::Active(READY_MESSAGE.to_string())
    } else {
        UnitStatus::Waiting(WAITING_MESSAGE.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALLOWED: &[usize] = &[2];

    fn healthy() -> StatusInputs<'static> {
        StatusInputs {
            in_container: false,
            unit_count: 2,
            allowed_unit_counts: ALLOWED,
            is_paused: false,
            missing_relations: Vec::new(),
            is_started: true,
        }
    }

    #[test]
    fn test_active_when_started() {
        assert_eq!(assess(&healthy()), UnitStatus::Active("Unit is ready".to_string()));
    }

    #[test]
    fn test_waiting_before_start() {
        let inputs = StatusInputs {
            is_started: false,
            ..healthy()
        };
        assert_eq!(
            assess(&inputs),
            UnitStatus::Waiting("Charm configuration in progress".to_string())
        );
    }

    #[test]
    fn test_invalid_unit_count() {
        let inputs = StatusInputs {
            unit_count: 1,
            ..healthy()
        };
        assert_eq!(
            assess(&inputs),
            UnitStatus::Blocked("1 is an invalid unit count".to_string())
        );
    }

    #[test]
    fn test_container_beats_everything() {
        let inputs = StatusInputs {
            in_container: true,
            unit_count: 5,
            is_paused: true,
            ..healthy()
        };
        assert_eq!(assess(&inputs).message(), CONTAINER_MESSAGE);
    }

    #[test]
    fn test_paused_before_missing_relations() {
        let inputs = StatusInputs {
            is_paused: true,
            missing_relations: vec!["ceph-client"],
            ..healthy()
        };
        assert!(matches!(assess(&inputs), UnitStatus::Maintenance(_)));
    }

    #[test]
    fn test_missing_relations() {
        let inputs = StatusInputs {
            missing_relations: vec!["ceph-client", "cluster"],
            ..healthy()
        };
        let status = assess(&inputs);
        assert!(status.is_blocked());
        assert_eq!(status.to_string(), "blocked: Missing relations: ceph-client, cluster");
    }
}
