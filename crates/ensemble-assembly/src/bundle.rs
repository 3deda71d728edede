//! Desired-state bundles and the model seam.
//!
//! Translating declarative configuration into concrete manifests is not
//! this crate's business: a [`BundleProvider`] is supplied at construction
//! time as a pure function from a marker resource to an [`AssemblyBundle`].
//! Bundles are immutable snapshots; reconciliation never mutates them in
//! place.

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::ResourceExt;

/// Fully-specified target manifests for one assembly.
///
/// The marker is the declarative source of truth; every other resource's
/// existence is conditioned on it. Creation order is fixed: marker,
/// services, workloads, auxiliary config, companion. Deletion runs the
/// inverse order.
#[derive(Debug, Clone, Default)]
pub struct AssemblyBundle {
    /// The marker resource, named after the assembly.
    pub marker: ConfigMap,
    /// Network endpoints for the assembly's components.
    pub services: Vec<Service>,
    /// Scalable workloads (quorum ensemble, worker fleet).
    pub workloads: Vec<StatefulSet>,
    /// Auxiliary configuration consumed by the workloads.
    pub aux_configs: Vec<ConfigMap>,
    /// Optional companion deployment.
    pub companion: Option<Deployment>,
}

impl AssemblyBundle {
    /// Name of the assembly this bundle describes (the marker's name).
    #[must_use]
    pub fn assembly_name(&self) -> String {
        self.marker.name_any()
    }
}

/// Pure translation from a marker resource to the assembly's desired state.
///
/// Returning `None` means the marker carries no usable configuration; the
/// reconciler reports it as a failed branch rather than guessing.
pub trait BundleProvider: Send + Sync {
    /// Build the desired manifests for the assembly the marker describes.
    fn desired_state(&self, marker: &ConfigMap) -> Option<AssemblyBundle>;
}

impl<F> BundleProvider for F
where
    F: Fn(&ConfigMap) -> Option<AssemblyBundle> + Send + Sync,
{
    fn desired_state(&self, marker: &ConfigMap) -> Option<AssemblyBundle> {
        self(marker)
    }
}
