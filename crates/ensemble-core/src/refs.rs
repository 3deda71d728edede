//! Resource references and deterministic naming.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one managed resource instance.
///
/// Uniqueness is the (kind, namespace, name) tuple; two resources of
/// different kinds may legitimately share a namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Resource kind, e.g. `StatefulSet` or `ConfigMap`.
    pub kind: String,
    /// Namespace the resource lives in.
    pub namespace: String,
    /// Resource name within the namespace.
    pub name: String,
}

impl ResourceRef {
    /// Create a reference from its three components.
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Name of the pod backing replica `index` of a scalable workload.
///
/// Pod naming is deterministic from (workload name, index); no two replicas
/// share an index at a given instant under correct operation.
#[must_use]
pub fn pod_name(workload: &str, index: i32) -> String {
    format!("{workload}-{index}")
}

/// Name of the persistent volume claim for one replica of a workload.
///
/// Follows the platform convention `<template>-<workload>-<index>` for
/// claims stamped out of a volume claim template.
#[must_use]
pub fn claim_name(template: &str, workload: &str, index: i32) -> String {
    format!("{template}-{workload}-{index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_ref_display() {
        let r = ResourceRef::new("StatefulSet", "ns", "quorum");
        assert_eq!(r.to_string(), "StatefulSet ns/quorum");
    }

    #[test]
    fn resource_ref_uniqueness_includes_kind() {
        let a = ResourceRef::new("Service", "ns", "x");
        let b = ResourceRef::new("ConfigMap", "ns", "x");
        assert_ne!(a, b);
    }

    #[test]
    fn pod_names_are_deterministic() {
        assert_eq!(pod_name("broker", 0), "broker-0");
        assert_eq!(pod_name("broker", 12), "broker-12");
    }

    #[test]
    fn claim_names_follow_platform_convention() {
        assert_eq!(claim_name("data", "broker", 2), "data-broker-2");
    }

    #[test]
    fn resource_ref_serde_round_trip() {
        let r = ResourceRef::new("StatefulSet", "ns", "quorum");
        let json = serde_json::to_string(&r).unwrap();
        let back: ResourceRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
