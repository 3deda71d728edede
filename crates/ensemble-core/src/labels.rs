//! Label conventions tying managed resources to their assembly.
//!
//! Every resource the operator creates carries [`MANAGED_BY_LABEL`] and
//! [`ASSEMBLY_LABEL`]. The marker resource additionally carries
//! [`KIND_LABEL`] set to [`KIND_ASSEMBLY`], which is how the desired set is
//! discovered during namespace-wide reconciliation.

use std::collections::BTreeMap;

/// Label naming the component that manages a resource.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`] for resources owned by this operator.
pub const MANAGED_BY_VALUE: &str = "ensemble-operator";

/// Label carrying the name of the owning assembly.
pub const ASSEMBLY_LABEL: &str = "ensemble.io/assembly";

/// Label distinguishing marker resources from auxiliary ones.
pub const KIND_LABEL: &str = "ensemble.io/kind";

/// [`KIND_LABEL`] value marking the declarative source of truth.
pub const KIND_ASSEMBLY: &str = "assembly";

/// Annotation on a workload that marks its storage claims as reclaimable:
/// when the assembly is torn down, per-replica claims are deleted too.
pub const RECLAIM_STORAGE_ANNOTATION: &str = "ensemble.io/reclaim-storage";

/// Selector matching every marker resource in a namespace.
#[must_use]
pub fn marker_selector() -> String {
    format!("{KIND_LABEL}={KIND_ASSEMBLY}")
}

/// Selector matching every resource managed by this operator.
#[must_use]
pub fn managed_selector() -> String {
    format!("{MANAGED_BY_LABEL}={MANAGED_BY_VALUE}")
}

/// Selector matching every resource belonging to one assembly.
#[must_use]
pub fn assembly_selector(assembly: &str) -> String {
    format!("{ASSEMBLY_LABEL}={assembly}")
}

/// Read the owning assembly name out of a resource's label map.
#[must_use]
pub fn assembly_of(labels: &BTreeMap<String, String>) -> Option<&str> {
    labels.get(ASSEMBLY_LABEL).map(String::as_str)
}

/// True if the label map identifies a marker resource.
#[must_use]
pub fn is_marker(labels: &BTreeMap<String, String>) -> bool {
    labels.get(KIND_LABEL).is_some_and(|v| v == KIND_ASSEMBLY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors() {
        assert_eq!(marker_selector(), "ensemble.io/kind=assembly");
        assert_eq!(
            managed_selector(),
            "app.kubernetes.io/managed-by=ensemble-operator"
        );
        assert_eq!(assembly_selector("payments"), "ensemble.io/assembly=payments");
    }

    #[test]
    fn assembly_lookup() {
        let mut labels = BTreeMap::new();
        assert_eq!(assembly_of(&labels), None);
        labels.insert(ASSEMBLY_LABEL.to_string(), "payments".to_string());
        assert_eq!(assembly_of(&labels), Some("payments"));
    }

    #[test]
    fn marker_detection() {
        let mut labels = BTreeMap::new();
        assert!(!is_marker(&labels));
        labels.insert(KIND_LABEL.to_string(), KIND_ASSEMBLY.to_string());
        assert!(is_marker(&labels));
    }
}
