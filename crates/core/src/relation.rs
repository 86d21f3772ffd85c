//! Relation data as delivered by the host substrate.
//!
//! A relation carries one application-level data bag (written only by the
//! leader), the local unit's own bag, and one read-only bag per remote unit.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Key/value bag published by a unit or application.
pub type DataBag = BTreeMap<String, String>;

/// Peer relation name.
pub const CLUSTER: &str = "cluster";
/// Storage broker relation name.
pub const CEPH_CLIENT: &str = "ceph-client";
/// Certificate authority relation name.
pub const CERTIFICATES: &str = "certificates";

/// Data visible on one established relation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelationData {
    /// Application-level bag.
    #[serde(default)]
    pub app: DataBag,
    /// This unit's bag.
    #[serde(default)]
    pub local: DataBag,
    /// Remote units keyed by unit name.
    #[serde(default)]
    pub units: BTreeMap<String, DataBag>,
}

impl RelationData {
    /// Create an empty relation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read one key from a remote unit's bag.
    #[must_use]
    pub fn unit_value(&self, unit: &str, key: &str) -> Option<&str> {
        self.units
            .get(unit)
            .and_then(|bag| bag.get(key))
            .map(String::as_str)
    }

    /// First non-empty value for `key` across remote units, in unit order.
    #[must_use]
    pub fn first_unit_value(&self, key: &str) -> Option<&str> {
        self.units
            .values()
            .filter_map(|bag| bag.get(key))
            .map(String::as_str)
            .find(|value| !value.is_empty())
    }

    /// Number of remote units.
    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bag(pairs: &[(&str, &str)]) -> DataBag {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_unit_value() {
        let mut rel = RelationData::new();
        rel.units
            .insert("vault/0".to_string(), bag(&[("ca", "PEM")]));

        assert_eq!(rel.unit_value("vault/0", "ca"), Some("PEM"));
        assert_eq!(rel.unit_value("vault/0", "chain"), None);
        assert_eq!(rel.unit_value("vault/1", "ca"), None);
    }

    #[test]
    fn test_first_unit_value_skips_empty() {
        let mut rel = RelationData::new();
        rel.units.insert("vault/0".to_string(), bag(&[("ca", "")]));
        rel.units
            .insert("vault/1".to_string(), bag(&[("ca", "ROOT")]));

        assert_eq!(rel.first_unit_value("ca"), Some("ROOT"));
        assert_eq!(rel.unit_count(), 2);
    }

    #[test]
    fn test_deserialize_partial() {
        let rel: RelationData =
            serde_json::from_str(r#"{"units": {"ceph-iscsi/1": {"gateway_ready": "True"}}}"#)
                .unwrap_or_default();
        assert!(rel.app.is_empty());
        assert_eq!(rel.unit_value("ceph-iscsi/1", "gateway_ready"), Some("True"));
    }
}
