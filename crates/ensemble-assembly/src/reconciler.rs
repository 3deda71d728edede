//! Top-level assembly reconciliation.
//!
//! [`AssemblyReconciler`] sequences creation, patching, scaling, rolling
//! restarts and deletion across every resource kind belonging to one
//! assembly, and performs namespace-wide drift detection: any workload
//! instance whose marker resource has disappeared is torn down.
//!
//! Every invocation re-fetches live state; nothing is cached across calls.
//! That is the sole defense against concurrent external mutation of managed
//! resources, and it is what makes every operation safe to re-invoke after
//! a partial failure.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use ensemble_core::{claim_name, labels, OperatorConfig, ResourceRef};
use ensemble_ops::readiness::ReadinessCheck;
use ensemble_ops::{
    FullCompare, KubeResourceClient, ReconcileOutcome, ResourceClient, ResourceOperator,
    WorkloadOperator,
};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Service};
use kube::ResourceExt;
use tracing::{debug, error, info};

use crate::bundle::{AssemblyBundle, BundleProvider};
use crate::error::{AssemblyError, Result};

/// Clients for every resource kind an assembly is made of.
pub struct AssemblyClients {
    /// Marker and auxiliary configuration resources.
    pub config_maps: Arc<dyn ResourceClient<ConfigMap>>,
    /// Network endpoints.
    pub services: Arc<dyn ResourceClient<Service>>,
    /// Scalable workloads.
    pub workloads: Arc<dyn ResourceClient<StatefulSet>>,
    /// Per-replica pods, for rolling updates and readiness.
    pub pods: Arc<dyn ResourceClient<Pod>>,
    /// Companion deployments.
    pub deployments: Arc<dyn ResourceClient<Deployment>>,
    /// Per-replica storage claims.
    pub claims: Arc<dyn ResourceClient<PersistentVolumeClaim>>,
}

impl AssemblyClients {
    /// Build clients over a live cluster connection.
    #[must_use]
    pub fn from_kube(client: kube::Client) -> Self {
        Self {
            config_maps: Arc::new(KubeResourceClient::new(client.clone(), "ConfigMap")),
            services: Arc::new(KubeResourceClient::new(client.clone(), "Service")),
            workloads: Arc::new(KubeResourceClient::new(client.clone(), "StatefulSet")),
            pods: Arc::new(KubeResourceClient::new(client.clone(), "Pod")),
            deployments: Arc::new(KubeResourceClient::new(client.clone(), "Deployment")),
            claims: Arc::new(KubeResourceClient::new(client, "PersistentVolumeClaim")),
        }
    }
}

/// What one `reconcile_all` branch did with its assembly.
enum Action {
    Converged,
    Removed,
}

/// Summary of one namespace-wide reconciliation pass.
#[derive(Debug, Default)]
pub struct ReconcileAllSummary {
    /// Assemblies that were created or updated.
    pub converged: Vec<String>,
    /// Assemblies torn down because no marker remained.
    pub removed: Vec<String>,
    /// Assemblies whose branch failed; siblings were unaffected.
    pub failed: Vec<(String, AssemblyError)>,
}

/// Converges whole assemblies toward desired-state bundles.
pub struct AssemblyReconciler {
    configs: ResourceOperator<ConfigMap>,
    services: ResourceOperator<Service>,
    deployments: ResourceOperator<Deployment>,
    claims: ResourceOperator<PersistentVolumeClaim>,
    workloads: WorkloadOperator,
    provider: Arc<dyn BundleProvider>,
}

impl AssemblyReconciler {
    /// Compose a reconciler with the default pod-condition readiness check.
    #[must_use]
    pub fn new(
        clients: AssemblyClients,
        provider: Arc<dyn BundleProvider>,
        config: OperatorConfig,
    ) -> Self {
        let workloads = WorkloadOperator::new(clients.workloads, clients.pods, config);
        Self::assemble(clients.config_maps, clients.services, clients.deployments, clients.claims, workloads, provider)
    }

    /// Compose a reconciler with a custom replica readiness check.
    #[must_use]
    pub fn with_readiness(
        clients: AssemblyClients,
        provider: Arc<dyn BundleProvider>,
        readiness: Arc<dyn ReadinessCheck>,
        config: OperatorConfig,
    ) -> Self {
        let workloads =
            WorkloadOperator::with_readiness(clients.workloads, clients.pods, readiness, config);
        Self::assemble(clients.config_maps, clients.services, clients.deployments, clients.claims, workloads, provider)
    }

    fn assemble(
        config_maps: Arc<dyn ResourceClient<ConfigMap>>,
        services: Arc<dyn ResourceClient<Service>>,
        deployments: Arc<dyn ResourceClient<Deployment>>,
        claims: Arc<dyn ResourceClient<PersistentVolumeClaim>>,
        workloads: WorkloadOperator,
        provider: Arc<dyn BundleProvider>,
    ) -> Self {
        Self {
            configs: ResourceOperator::new(config_maps, Arc::new(FullCompare::new("ConfigMap"))),
            services: ResourceOperator::new(services, Arc::new(FullCompare::new("Service"))),
            deployments: ResourceOperator::new(
                deployments,
                Arc::new(FullCompare::new("Deployment")),
            ),
            claims: ResourceOperator::new(
                claims,
                Arc::new(FullCompare::new("PersistentVolumeClaim")),
            ),
            workloads,
            provider,
        }
    }

    /// Converge one assembly toward `bundle`.
    ///
    /// If the marker resource is absent in the live cluster, the full
    /// create path runs in fixed dependency order. Otherwise every
    /// constituent resource is reconciled, replica-count deltas are routed
    /// through scale up/down, and workloads whose pod template changed are
    /// rolling-restarted after all patches have been applied.
    ///
    /// # Errors
    ///
    /// The first failing step aborts this assembly's convergence; every
    /// already-applied step is safe to reapply on the next invocation.
    pub async fn create_or_update(
        &self,
        namespace: &str,
        name: &str,
        bundle: &AssemblyBundle,
    ) -> Result<()> {
        if self.configs.get(namespace, name).await?.is_none() {
            self.create_assembly(namespace, name, bundle).await
        } else {
            self.update_assembly(namespace, name, bundle).await
        }
    }

    async fn create_assembly(
        &self,
        namespace: &str,
        name: &str,
        bundle: &AssemblyBundle,
    ) -> Result<()> {
        info!(namespace, assembly = name, "creating assembly");
        self.configs
            .reconcile(namespace, name, Some(&bundle.marker))
            .await?;
        for service in &bundle.services {
            self.services
                .reconcile(namespace, &service.name_any(), Some(service))
                .await?;
        }
        for workload in &bundle.workloads {
            // Creation blocks until the workload and all its replicas are
            // ready.
            self.workloads
                .reconcile(namespace, &workload.name_any(), Some(workload))
                .await?;
        }
        for aux in &bundle.aux_configs {
            self.configs
                .reconcile(namespace, &aux.name_any(), Some(aux))
                .await?;
        }
        if let Some(companion) = &bundle.companion {
            self.deployments
                .reconcile(namespace, &companion.name_any(), Some(companion))
                .await?;
        }
        info!(namespace, assembly = name, "assembly created");
        Ok(())
    }

    async fn update_assembly(
        &self,
        namespace: &str,
        name: &str,
        bundle: &AssemblyBundle,
    ) -> Result<()> {
        info!(namespace, assembly = name, "updating assembly");
        self.configs
            .reconcile(namespace, name, Some(&bundle.marker))
            .await?;
        for service in &bundle.services {
            self.services
                .reconcile(namespace, &service.name_any(), Some(service))
                .await?;
        }

        let mut needs_roll = Vec::new();
        for workload in &bundle.workloads {
            let workload_name = workload.name_any();
            let desired_replicas = ensemble_ops::replica_count_of(workload);
            match self.workloads.get(namespace, &workload_name).await? {
                None => {
                    self.workloads
                        .reconcile(namespace, &workload_name, Some(workload))
                        .await?;
                }
                Some(current) => {
                    let current_replicas = ensemble_ops::replica_count_of(&current);
                    if desired_replicas < current_replicas {
                        self.workloads
                            .scale_down(namespace, &workload_name, desired_replicas)
                            .await?;
                    }
                    if let ReconcileOutcome::Patched {
                        needs_follow_up: true,
                    } = self
                        .workloads
                        .reconcile(namespace, &workload_name, Some(workload))
                        .await?
                    {
                        needs_roll.push(workload_name.clone());
                    }
                    if desired_replicas > current_replicas {
                        self.workloads
                            .scale_up(namespace, &workload_name, desired_replicas)
                            .await?;
                    }
                }
            }
        }

        for aux in &bundle.aux_configs {
            self.configs
                .reconcile(namespace, &aux.name_any(), Some(aux))
                .await?;
        }
        if let Some(companion) = &bundle.companion {
            self.deployments
                .reconcile(namespace, &companion.name_any(), Some(companion))
                .await?;
        }

        // Rolling restarts run only after every patch has been applied.
        for workload_name in needs_roll {
            self.workloads.rolling_update(namespace, &workload_name).await?;
        }
        info!(namespace, assembly = name, "assembly updated");
        Ok(())
    }

    /// Tear down one assembly: dependents first, marker last.
    ///
    /// Storage claims are deleted only for workloads whose manifest marks
    /// storage as reclaimable, and only after the owning workload itself is
    /// gone.
    ///
    /// # Errors
    ///
    /// The first failing deletion aborts this assembly's teardown; the
    /// remaining resources are picked up by the next invocation.
    pub async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        info!(namespace, assembly = name, "deleting assembly");
        let selector = labels::assembly_selector(name);

        for companion in self.deployments.list(namespace, &selector).await? {
            self.deployments
                .reconcile(namespace, &companion.name_any(), None)
                .await?;
        }
        for aux in self.configs.list(namespace, &selector).await? {
            if labels::is_marker(aux.labels()) {
                continue; // the marker goes last
            }
            self.configs
                .reconcile(namespace, &aux.name_any(), None)
                .await?;
        }
        for workload in self.workloads.list(namespace, &selector).await? {
            self.delete_workload(namespace, &workload).await?;
        }
        for service in self.services.list(namespace, &selector).await? {
            self.services
                .reconcile(namespace, &service.name_any(), None)
                .await?;
        }
        self.configs.reconcile(namespace, name, None).await?;
        info!(namespace, assembly = name, "assembly deleted");
        Ok(())
    }

    async fn delete_workload(&self, namespace: &str, workload: &StatefulSet) -> Result<()> {
        let workload_name = workload.name_any();
        let reclaim = workload
            .annotations()
            .get(labels::RECLAIM_STORAGE_ANNOTATION)
            .is_some_and(|v| v == "true");
        let replicas = ensemble_ops::replica_count_of(workload);
        let templates: Vec<String> = workload
            .spec
            .as_ref()
            .and_then(|s| s.volume_claim_templates.as_ref())
            .map(|ts| ts.iter().map(ResourceExt::name_any).collect())
            .unwrap_or_default();

        self.workloads.reconcile(namespace, &workload_name, None).await?;

        if reclaim {
            // Claims are only removed once the owning workload is gone.
            for template in &templates {
                for index in 0..replicas {
                    let claim = claim_name(template, &workload_name, index);
                    self.claims.reconcile(namespace, &claim, None).await?;
                }
            }
        } else if !templates.is_empty() {
            debug!(
                namespace,
                workload = workload_name,
                "storage not reclaimable, leaving claims in place"
            );
        }
        Ok(())
    }

    /// Namespace-wide drift detection.
    ///
    /// Lists all marker resources (the desired set) and all managed
    /// workload instances (the observed set, which may include assemblies
    /// whose marker was deleted out-of-band). For every name in the union:
    /// present in the desired set → converge; present only in the observed
    /// set → tear down. Branches run concurrently and independently; one
    /// branch's failure never cancels the others.
    ///
    /// # Errors
    ///
    /// Fails only if the initial desired/observed listing fails; per-branch
    /// failures are reported in the summary instead.
    pub async fn reconcile_all(
        &self,
        trigger: &str,
        namespace: &str,
    ) -> Result<ReconcileAllSummary> {
        info!(trigger, namespace, "namespace-wide reconciliation");

        let mut desired: BTreeMap<String, ConfigMap> = BTreeMap::new();
        for marker in self
            .configs
            .list(namespace, &labels::marker_selector())
            .await?
        {
            desired.insert(marker.name_any(), marker);
        }

        let mut names: BTreeSet<String> = desired.keys().cloned().collect();
        for workload in self
            .workloads
            .list(namespace, &labels::managed_selector())
            .await?
        {
            if let Some(assembly) = labels::assembly_of(workload.labels()) {
                names.insert(assembly.to_string());
            }
        }

        let branches = names.into_iter().map(|name| {
            let marker = desired.get(&name).cloned();
            async move {
                let action = match marker {
                    Some(marker) => match self.provider.desired_state(&marker) {
                        Some(bundle) => self
                            .create_or_update(namespace, &name, &bundle)
                            .await
                            .map(|()| Action::Converged),
                        None => Err(AssemblyError::InvalidMarker(ResourceRef::new(
                            "ConfigMap",
                            namespace,
                            name.clone(),
                        ))),
                    },
                    None => self.delete(namespace, &name).await.map(|()| Action::Removed),
                };
                (name, action)
            }
        });

        let mut summary = ReconcileAllSummary::default();
        for (name, action) in futures::future::join_all(branches).await {
            match action {
                Ok(Action::Converged) => summary.converged.push(name),
                Ok(Action::Removed) => summary.removed.push(name),
                Err(e) => {
                    error!(
                        assembly = name,
                        error = %e,
                        retriable = e.is_retriable(),
                        "assembly branch failed"
                    );
                    summary.failed.push((name, e));
                }
            }
        }
        info!(
            trigger,
            namespace,
            converged = summary.converged.len(),
            removed = summary.removed.len(),
            failed = summary.failed.len(),
            "namespace-wide reconciliation finished"
        );
        Ok(summary)
    }
}
