//! Structural diff between two workload snapshots.
//!
//! The diff is a pure function of its two inputs: both snapshots are
//! serialized to JSON trees and compared structurally, producing the set of
//! JSON-pointer paths that differ. Paths the platform rewrites on its own
//! (injected defaults, server-stamped metadata, the status subtree) are
//! filtered out by a static ignore-list. No surviving paths means no-op.
//!
//! Survivors are partitioned into named predicates by prefix match against
//! known semantic roots. A pod-template change calls for a rolling restart;
//! a replica-count change calls for a plain scale.

use std::collections::BTreeSet;

use k8s_openapi::api::apps::v1::StatefulSet;
use serde_json::Value;
use tracing::debug;

use crate::error::Result;

/// Paths the platform mutates on its own; differences under these never
/// trigger action.
const IGNORABLE_PATHS: &[&str] = &[
    "/metadata/creationTimestamp",
    "/metadata/generation",
    "/metadata/managedFields",
    "/metadata/resourceVersion",
    "/metadata/uid",
    "/spec/revisionHistoryLimit",
    "/spec/template/spec/containers/0/imagePullPolicy",
    "/spec/template/spec/containers/0/livenessProbe/failureThreshold",
    "/spec/template/spec/containers/0/livenessProbe/periodSeconds",
    "/spec/template/spec/containers/0/livenessProbe/successThreshold",
    "/spec/template/spec/containers/0/readinessProbe/failureThreshold",
    "/spec/template/spec/containers/0/readinessProbe/periodSeconds",
    "/spec/template/spec/containers/0/readinessProbe/successThreshold",
    "/spec/template/spec/containers/0/resources",
    "/spec/template/spec/containers/0/terminationMessagePath",
    "/spec/template/spec/containers/0/terminationMessagePolicy",
    "/spec/template/spec/dnsPolicy",
    "/spec/template/spec/restartPolicy",
    "/spec/template/spec/schedulerName",
    "/spec/template/spec/securityContext",
    "/spec/template/spec/terminationGracePeriodSeconds",
    "/spec/template/spec/volumes/1/configMap/defaultMode",
    "/status",
];

const REPLICAS_ROOT: &str = "/spec/replicas";
const POD_TEMPLATE_ROOT: &str = "/spec/template/spec";
const LABELS_ROOT: &str = "/metadata/labels";
const VOLUME_CLAIMS_ROOT: &str = "/spec/volumeClaimTemplates";

/// Result of structurally comparing a current and a desired workload.
///
/// Read-only; lives for one reconcile invocation.
#[derive(Debug, Clone)]
pub struct WorkloadDiff {
    paths: BTreeSet<String>,
    changes_replicas: bool,
    changes_pod_template: bool,
    changes_labels: bool,
    changes_volume_claim_templates: bool,
}

impl WorkloadDiff {
    /// Compute the filtered structural diff between two snapshots.
    ///
    /// # Errors
    ///
    /// Returns an error if either snapshot cannot be serialized for
    /// comparison.
    pub fn between(current: &StatefulSet, desired: &StatefulSet) -> Result<Self> {
        let current_tree = serde_json::to_value(current)?;
        let desired_tree = serde_json::to_value(desired)?;

        let mut all = BTreeSet::new();
        collect_paths(&current_tree, &desired_tree, "", &mut all);

        let mut paths = BTreeSet::new();
        for path in all {
            if is_ignorable(&path) {
                debug!(path, "ignoring platform-owned diff path");
            } else {
                debug!(path, "workload differs");
                paths.insert(path);
            }
        }

        let changes_replicas = contains_path_or_child(&paths, REPLICAS_ROOT);
        let changes_pod_template = contains_path_or_child(&paths, POD_TEMPLATE_ROOT);
        let changes_labels = contains_path_or_child(&paths, LABELS_ROOT);
        let changes_volume_claim_templates = contains_path_or_child(&paths, VOLUME_CLAIMS_ROOT);

        Ok(Self {
            paths,
            changes_replicas,
            changes_pod_template,
            changes_labels,
            changes_volume_claim_templates,
        })
    }

    /// True iff no differences survive ignore-list filtering.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Any survivor under the replica-count path.
    #[must_use]
    pub const fn changes_replicas(&self) -> bool {
        self.changes_replicas
    }

    /// Any survivor under the pod-template subtree. A change here requires
    /// a rolling restart to take effect.
    #[must_use]
    pub const fn changes_pod_template(&self) -> bool {
        self.changes_pod_template
    }

    /// Any survivor under the label map.
    #[must_use]
    pub const fn changes_labels(&self) -> bool {
        self.changes_labels
    }

    /// Any survivor under the persistent-storage-template subtree.
    #[must_use]
    pub const fn changes_volume_claim_templates(&self) -> bool {
        self.changes_volume_claim_templates
    }

    /// The surviving difference paths, for logging and diagnostics.
    #[must_use]
    pub const fn paths(&self) -> &BTreeSet<String> {
        &self.paths
    }
}

fn is_ignorable(path: &str) -> bool {
    IGNORABLE_PATHS
        .iter()
        .any(|entry| path == *entry || path.starts_with(&format!("{entry}/")))
}

fn contains_path_or_child(paths: &BTreeSet<String>, root: &str) -> bool {
    let child_prefix = format!("{root}/");
    paths
        .iter()
        .any(|p| p == root || p.starts_with(&child_prefix))
}

/// Scrub the fields the API server stamps on every object, plus status.
/// Used for whole-object material-equality checks on non-workload kinds.
pub(crate) fn scrub(mut value: Value) -> Value {
    if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.remove("creationTimestamp");
        meta.remove("generation");
        meta.remove("managedFields");
        meta.remove("resourceVersion");
        meta.remove("uid");
    }
    if let Some(obj) = value.as_object_mut() {
        obj.remove("status");
    }
    value
}

fn pointer_token(raw: &str) -> String {
    // JSON pointer escaping; label keys like app.kubernetes.io/name need it.
    raw.replace('~', "~0").replace('/', "~1")
}

fn collect_paths(current: &Value, desired: &Value, prefix: &str, out: &mut BTreeSet<String>) {
    match (current, desired) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, current_child) in a {
                let child = format!("{prefix}/{}", pointer_token(key));
                match b.get(key) {
                    Some(desired_child) => collect_paths(current_child, desired_child, &child, out),
                    None => {
                        out.insert(child);
                    }
                }
            }
            for key in b.keys() {
                if !a.contains_key(key) {
                    out.insert(format!("{prefix}/{}", pointer_token(key)));
                }
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            for (i, (current_child, desired_child)) in a.iter().zip(b.iter()).enumerate() {
                collect_paths(current_child, desired_child, &format!("{prefix}/{i}"), out);
            }
            for i in a.len().min(b.len())..a.len().max(b.len()) {
                out.insert(format!("{prefix}/{i}"));
            }
        }
        (a, b) => {
            if a != b {
                out.insert(if prefix.is_empty() {
                    "/".to_string()
                } else {
                    prefix.to_string()
                });
            }
        }
    }
}
