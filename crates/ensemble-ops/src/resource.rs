//! Generic idempotent resource operator.
//!
//! [`ResourceOperator`] knows nothing about business semantics: it fetches
//! the current state, compares it against the desired manifest through a
//! [`KindSemantics`] capability, and performs at most one mutating API call.
//! Kind-specific behavior is layered on by composition, not inheritance:
//! most kinds use [`FullCompare`] (material whole-object equality), while
//! scalable workloads plug in their structural diff via
//! `workload::WorkloadSemantics`.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::client::ResourceClient;
use crate::diff::scrub;
use crate::error::Result;

/// What a `reconcile` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The resource was absent and has been created.
    Created,
    /// The resource existed and was patched.
    Patched {
        /// True when the patch was disruptive enough that the caller must
        /// follow up (for scalable workloads: a rolling restart).
        needs_follow_up: bool,
    },
    /// The resource existed and no desired manifest was supplied, so it was
    /// deleted.
    Deleted,
    /// Nothing needed to change.
    Noop,
}

impl fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Patched { needs_follow_up } => {
                write!(f, "patched(needs_follow_up={needs_follow_up})")
            }
            Self::Deleted => write!(f, "deleted"),
            Self::Noop => write!(f, "noop"),
        }
    }
}

/// Verdict of comparing a current and a desired snapshot of one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchAssessment {
    /// No material difference; reconcile is a no-op.
    Unchanged,
    /// A patch is warranted.
    Patch {
        /// Whether the patch requires disruptive follow-up action.
        needs_follow_up: bool,
    },
}

/// Kind-specific comparison and patch preparation.
///
/// Both snapshots are immutable; `prepare` returns a fresh manifest rather
/// than mutating the desired one in place.
pub trait KindSemantics<K>: Send + Sync {
    /// Resource kind name, for logging and error reporting.
    fn kind(&self) -> &'static str;

    /// Decide whether `desired` materially differs from `current`.
    ///
    /// # Errors
    ///
    /// Returns an error if either snapshot cannot be compared.
    fn assess(&self, current: &K, desired: &K) -> Result<PatchAssessment>;

    /// Build the manifest actually sent in the patch.
    fn prepare(&self, current: &K, desired: &K) -> K;
}

/// Default semantics: material whole-object equality after scrubbing the
/// fields the API server owns.
pub struct FullCompare {
    kind: &'static str,
}

impl FullCompare {
    /// Semantics for one resource kind.
    #[must_use]
    pub const fn new(kind: &'static str) -> Self {
        Self { kind }
    }
}

impl<K> KindSemantics<K> for FullCompare
where
    K: Serialize + Clone + Send + Sync,
{
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn assess(&self, current: &K, desired: &K) -> Result<PatchAssessment> {
        let current_tree = scrub(serde_json::to_value(current)?);
        let desired_tree = scrub(serde_json::to_value(desired)?);
        Ok(if current_tree == desired_tree {
            PatchAssessment::Unchanged
        } else {
            PatchAssessment::Patch {
                needs_follow_up: false,
            }
        })
    }

    fn prepare(&self, _current: &K, desired: &K) -> K {
        desired.clone()
    }
}

/// Generic idempotent operations over one resource kind.
pub struct ResourceOperator<K> {
    client: Arc<dyn ResourceClient<K>>,
    semantics: Arc<dyn KindSemantics<K>>,
}

impl<K> ResourceOperator<K>
where
    K: Clone + Send + Sync + 'static,
{
    /// Compose an operator from a client and kind semantics.
    pub fn new(client: Arc<dyn ResourceClient<K>>, semantics: Arc<dyn KindSemantics<K>>) -> Self {
        Self { client, semantics }
    }

    /// Resource kind this operator manages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.semantics.kind()
    }

    /// The underlying client.
    #[must_use]
    pub fn client(&self) -> &Arc<dyn ResourceClient<K>> {
        &self.client
    }

    /// Fetch one resource; absence is a valid result, not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        self.client.get(namespace, name).await
    }

    /// List resources matching a label selector; an empty result is valid.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn list(&self, namespace: &str, selector: &str) -> Result<Vec<K>> {
        self.client.list(namespace, selector).await
    }

    /// Converge one resource toward `desired`.
    ///
    /// Current state is re-fetched on every call; nothing is cached across
    /// invocations, which is the defense against concurrent external
    /// mutation. Exactly one mutating API call is made per branch:
    ///
    /// - desired absent, resource exists → delete
    /// - desired present, resource absent → create
    /// - both present → patch only if the kind semantics find a material
    ///   difference, otherwise no-op
    ///
    /// # Errors
    ///
    /// API failures surface verbatim; they are not retried here.
    pub async fn reconcile(
        &self,
        namespace: &str,
        name: &str,
        desired: Option<&K>,
    ) -> Result<ReconcileOutcome> {
        let kind = self.kind();
        let current = self.client.get(namespace, name).await?;
        let outcome = match (current, desired) {
            (None, None) => ReconcileOutcome::Noop,
            (None, Some(d)) => {
                self.client.create(namespace, d).await?;
                ReconcileOutcome::Created
            }
            (Some(_), None) => {
                self.client.delete(namespace, name).await?;
                ReconcileOutcome::Deleted
            }
            (Some(current), Some(desired)) => match self.semantics.assess(&current, desired)? {
                PatchAssessment::Unchanged => ReconcileOutcome::Noop,
                PatchAssessment::Patch { needs_follow_up } => {
                    let prepared = self.semantics.prepare(&current, desired);
                    self.client.patch(namespace, name, &prepared, false).await?;
                    ReconcileOutcome::Patched { needs_follow_up }
                }
            },
        };
        match outcome {
            ReconcileOutcome::Noop => debug!(kind, namespace, name, %outcome, "reconciled"),
            _ => info!(kind, namespace, name, %outcome, "reconciled"),
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::{Call, MockClient};
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn config_map(name: &str, value: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            data: Some(
                [("key".to_string(), value.to_string())]
                    .into_iter()
                    .collect(),
            ),
            ..ConfigMap::default()
        }
    }

    fn operator(client: Arc<MockClient<ConfigMap>>) -> ResourceOperator<ConfigMap> {
        ResourceOperator::new(client, Arc::new(FullCompare::new("ConfigMap")))
    }

    #[tokio::test]
    async fn absent_with_no_desired_is_noop() {
        let client = Arc::new(MockClient::new("ConfigMap"));
        let op = operator(client.clone());
        let outcome = op.reconcile("ns", "cm", None).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Noop);
        assert_eq!(client.calls().len(), 1); // just the get
    }

    #[tokio::test]
    async fn absent_with_desired_creates() {
        let client = Arc::new(MockClient::new("ConfigMap"));
        let op = operator(client.clone());
        let outcome = op
            .reconcile("ns", "cm", Some(&config_map("cm", "v1")))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Created);
        assert!(client.stored("ns", "cm").is_some());
    }

    #[tokio::test]
    async fn present_with_no_desired_deletes() {
        let client = Arc::new(MockClient::new("ConfigMap"));
        client.insert("ns", config_map("cm", "v1"));
        let op = operator(client.clone());
        let outcome = op.reconcile("ns", "cm", None).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Deleted);
        assert!(client.stored("ns", "cm").is_none());
    }

    #[tokio::test]
    async fn identical_resource_is_noop_without_patch() {
        let client = Arc::new(MockClient::new("ConfigMap"));
        let mut live = config_map("cm", "v1");
        // Server-stamped noise must not trigger a patch.
        live.metadata.resource_version = Some("77".to_string());
        client.insert("ns", live);
        let op = operator(client.clone());
        let outcome = op
            .reconcile("ns", "cm", Some(&config_map("cm", "v1")))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Noop);
        assert!(client.patches().is_empty());
    }

    #[tokio::test]
    async fn changed_resource_is_patched() {
        let client = Arc::new(MockClient::new("ConfigMap"));
        client.insert("ns", config_map("cm", "v1"));
        let op = operator(client.clone());
        let outcome = op
            .reconcile("ns", "cm", Some(&config_map("cm", "v2")))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Patched {
                needs_follow_up: false
            }
        );
        assert!(client.calls().contains(&Call::Patch {
            namespace: "ns".to_string(),
            name: "cm".to_string(),
            cascading: false,
        }));
    }
}
