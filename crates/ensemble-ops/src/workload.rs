//! Scalable workload operator: scale up/down and rolling updates.
//!
//! A scalable workload owns exactly `replicas` numbered pod identities
//! `name-0 .. name-(replicas-1)`. This operator layers three state machines
//! over the generic [`ResourceOperator`], each gated by replica readiness:
//!
//! - **Scale up**: raise the replica count, then wait for each newly
//!   introduced index to report ready. A replica that never becomes ready
//!   fails the operation; partial progress is left in place for the next
//!   reconcile pass.
//! - **Scale down**: lower the replica count and return; the platform owns
//!   teardown of the removed replicas.
//! - **Rolling update**: restart replicas strictly in ascending index
//!   order, one at a time, so quorum-based ensembles never lose two members
//!   simultaneously. Each step deletes the pod, confirms the deletion via a
//!   pod-scoped watch joined with the delete call, then polls readiness
//!   before advancing. The session fails fast on the first index that does
//!   not converge; remaining indices are left for the next reconcile.
//!
//! Replica count changes are routed exclusively through scale up/down:
//! patches force the desired manifest's replica count back to the current
//! one so the platform's own scaling reconciler never races this operator,
//! and patches request non-cascading semantics so per-replica resources are
//! left untouched.

use std::sync::Arc;

use ensemble_core::{pod_name, OperatorConfig, ResourceRef};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, info};

use crate::client::ResourceClient;
use crate::diff::WorkloadDiff;
use crate::error::{OpsError, Result};
use crate::readiness::{
    await_pod_ready, wait_for, workload_is_ready, PodReadiness, ReadinessCheck,
};
use crate::resource::{KindSemantics, PatchAssessment, ReconcileOutcome, ResourceOperator};

/// Structural-diff semantics for scalable workloads.
///
/// A patch is flagged for follow-up (rolling restart) iff the pod-template
/// subtree changed; the prepared patch always carries the *current* replica
/// count regardless of the desired manifest's.
pub struct WorkloadSemantics;

impl KindSemantics<StatefulSet> for WorkloadSemantics {
    fn kind(&self) -> &'static str {
        "StatefulSet"
    }

    fn assess(&self, current: &StatefulSet, desired: &StatefulSet) -> Result<PatchAssessment> {
        let diff = WorkloadDiff::between(current, desired)?;
        Ok(if diff.is_empty() {
            PatchAssessment::Unchanged
        } else {
            PatchAssessment::Patch {
                needs_follow_up: diff.changes_pod_template(),
            }
        })
    }

    fn prepare(&self, current: &StatefulSet, desired: &StatefulSet) -> StatefulSet {
        let mut prepared = desired.clone();
        // Never scale via patch.
        if let (Some(current_spec), Some(prepared_spec)) =
            (current.spec.as_ref(), prepared.spec.as_mut())
        {
            prepared_spec.replicas = current_spec.replicas;
        }
        prepared
    }
}

/// Operator for scalable workload resources.
pub struct WorkloadOperator {
    inner: ResourceOperator<StatefulSet>,
    pods: Arc<dyn ResourceClient<Pod>>,
    readiness: Arc<dyn ReadinessCheck>,
    config: OperatorConfig,
}

impl WorkloadOperator {
    /// Compose a workload operator from clients for the workload kind and
    /// its pods, with the default pod-condition readiness check.
    pub fn new(
        workloads: Arc<dyn ResourceClient<StatefulSet>>,
        pods: Arc<dyn ResourceClient<Pod>>,
        config: OperatorConfig,
    ) -> Self {
        let readiness = Arc::new(PodReadiness::new(pods.clone()));
        Self::with_readiness(workloads, pods, readiness, config)
    }

    /// Same as [`WorkloadOperator::new`] but with a custom default
    /// readiness check.
    pub fn with_readiness(
        workloads: Arc<dyn ResourceClient<StatefulSet>>,
        pods: Arc<dyn ResourceClient<Pod>>,
        readiness: Arc<dyn ReadinessCheck>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            inner: ResourceOperator::new(workloads, Arc::new(WorkloadSemantics)),
            pods,
            readiness,
            config,
        }
    }

    /// Fetch one workload; absence is a valid result.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn get(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>> {
        self.inner.get(namespace, name).await
    }

    /// List workloads matching a label selector.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn list(&self, namespace: &str, selector: &str) -> Result<Vec<StatefulSet>> {
        self.inner.list(namespace, selector).await
    }

    /// Converge one workload toward `desired`.
    ///
    /// On first creation the call additionally blocks until the workload
    /// itself reports ready and then until every declared replica reports
    /// ready — joined in parallel, since nothing depends on ordering before
    /// the workload has ever served.
    ///
    /// A `Patched { needs_follow_up: true }` outcome means the pod template
    /// changed and the caller must schedule a rolling update.
    ///
    /// # Errors
    ///
    /// API failures surface verbatim; a creation readiness wait that does
    /// not converge fails with [`OpsError::ReadinessTimeout`].
    pub async fn reconcile(
        &self,
        namespace: &str,
        name: &str,
        desired: Option<&StatefulSet>,
    ) -> Result<ReconcileOutcome> {
        let outcome = self.inner.reconcile(namespace, name, desired).await?;
        if let (ReconcileOutcome::Created, Some(desired)) = (outcome, desired) {
            self.await_initial_readiness(namespace, name, desired).await?;
        }
        Ok(outcome)
    }

    async fn await_initial_readiness(
        &self,
        namespace: &str,
        name: &str,
        desired: &StatefulSet,
    ) -> Result<()> {
        let target = ResourceRef::new("StatefulSet", namespace, name);
        debug!(%target, "waiting for created workload to become ready");
        wait_for(
            &target,
            self.config.poll_interval(),
            self.config.operation_timeout(),
            move || async move {
                Ok(self
                    .inner
                    .get(namespace, name)
                    .await?
                    .is_some_and(|w| workload_is_ready(&w)))
            },
        )
        .await?;

        let replicas = replica_count_of(desired);
        debug!(%target, replicas, "waiting for all replicas of created workload");
        let waits = (0..replicas).map(|index| {
            let pod = pod_name(name, index);
            async move {
                await_pod_ready(
                    self.readiness.as_ref(),
                    namespace,
                    &pod,
                    self.config.poll_interval(),
                    self.config.operation_timeout(),
                )
                .await
            }
        });
        futures::future::try_join_all(waits).await?;
        info!(%target, replicas, "created workload is ready");
        Ok(())
    }

    /// Raise the replica count to `desired_replicas`, waiting for each new
    /// index to report ready. Returns the resulting replica count.
    ///
    /// # Errors
    ///
    /// Fails with [`OpsError::Missing`] if the workload does not exist and
    /// with [`OpsError::ReadinessTimeout`] if a new replica never becomes
    /// ready; already-started replicas are left in place either way.
    pub async fn scale_up(
        &self,
        namespace: &str,
        name: &str,
        desired_replicas: i32,
    ) -> Result<i32> {
        let current = self.current_scale(namespace, name).await?;
        if current >= desired_replicas {
            return Ok(current);
        }
        info!(namespace, name, current, desired_replicas, "scaling up");
        self.patch_scale(namespace, name, desired_replicas).await?;
        for index in current..desired_replicas {
            await_pod_ready(
                self.readiness.as_ref(),
                namespace,
                &pod_name(name, index),
                self.config.poll_interval(),
                self.config.operation_timeout(),
            )
            .await?;
        }
        Ok(desired_replicas)
    }

    /// Lower the replica count to `desired_replicas`. Does not wait for
    /// terminated replicas to vanish; the platform owns teardown. Returns
    /// the resulting replica count.
    ///
    /// # Errors
    ///
    /// Fails with [`OpsError::Missing`] if the workload does not exist.
    pub async fn scale_down(
        &self,
        namespace: &str,
        name: &str,
        desired_replicas: i32,
    ) -> Result<i32> {
        let current = self.current_scale(namespace, name).await?;
        if current <= desired_replicas {
            return Ok(current);
        }
        info!(namespace, name, current, desired_replicas, "scaling down");
        self.patch_scale(namespace, name, desired_replicas).await?;
        Ok(desired_replicas)
    }

    /// Restart every replica of the workload, one at a time in ascending
    /// index order, gated by the default readiness check.
    ///
    /// # Errors
    ///
    /// Fails fast on the first index that cannot be restarted or never
    /// becomes ready; remaining indices are not attempted.
    pub async fn rolling_update(&self, namespace: &str, name: &str) -> Result<()> {
        self.rolling_update_with(namespace, name, self.readiness.as_ref())
            .await
    }

    /// Like [`WorkloadOperator::rolling_update`] but gated by a
    /// caller-supplied readiness predicate, e.g. a protocol-level health
    /// check.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`WorkloadOperator::rolling_update`].
    pub async fn rolling_update_with(
        &self,
        namespace: &str,
        name: &str,
        is_ready: &dyn ReadinessCheck,
    ) -> Result<()> {
        let replicas = self.current_scale(namespace, name).await?;
        info!(namespace, name, replicas, "starting rolling update");
        for index in 0..replicas {
            self.restart_pod(namespace, name, index, is_ready).await?;
        }
        info!(namespace, name, "rolling update complete");
        Ok(())
    }

    /// Delete one replica's pod, confirm the deletion, then wait for the
    /// recreated pod to report ready.
    async fn restart_pod(
        &self,
        namespace: &str,
        name: &str,
        index: i32,
        is_ready: &dyn ReadinessCheck,
    ) -> Result<()> {
        let pod = pod_name(name, index);
        info!(namespace, name, pod, "rolling pod");

        // The watch must exist before the delete is issued so the deletion
        // event cannot be missed; it is closed on every exit path below.
        let watch = self.pods.watch_deleted(namespace, &pod);
        let (delete_call, observed) =
            tokio::join!(self.pods.delete(namespace, &pod), watch.deleted());
        delete_call?;
        observed?;
        debug!(namespace, name, pod, "pod deleted, waiting for readiness");

        await_pod_ready(
            is_ready,
            namespace,
            &pod,
            self.config.poll_interval(),
            self.config.operation_timeout(),
        )
        .await?;
        debug!(namespace, name, pod, "pod ready");
        Ok(())
    }

    async fn current_scale(&self, namespace: &str, name: &str) -> Result<i32> {
        self.inner
            .get(namespace, name)
            .await?
            .map(|w| replica_count_of(&w))
            .ok_or_else(|| OpsError::Missing(ResourceRef::new("StatefulSet", namespace, name)))
    }

    async fn patch_scale(&self, namespace: &str, name: &str, replicas: i32) -> Result<()> {
        let Some(mut workload) = self.inner.get(namespace, name).await? else {
            return Err(OpsError::Missing(ResourceRef::new(
                "StatefulSet",
                namespace,
                name,
            )));
        };
        if let Some(spec) = workload.spec.as_mut() {
            spec.replicas = Some(replicas);
        }
        self.inner
            .client()
            .patch(namespace, name, &workload, false)
            .await?;
        Ok(())
    }
}

/// Declared replica count of a workload manifest.
#[must_use]
pub fn replica_count_of(workload: &StatefulSet) -> i32 {
    workload.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::{Call, MockClient};
    use crate::readiness::mock::StaticReadiness;
    use k8s_openapi::api::apps::v1::{StatefulSetSpec, StatefulSetStatus};
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn workload(name: &str, replicas: i32, image: &str) -> StatefulSet {
        StatefulSet {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ns".to_string()),
                ..ObjectMeta::default()
            },
            spec: Some(StatefulSetSpec {
                replicas: Some(replicas),
                template: PodTemplateSpec {
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "main".to_string(),
                            image: Some(image.to_string()),
                            ..Container::default()
                        }],
                        ..PodSpec::default()
                    }),
                    ..PodTemplateSpec::default()
                },
                ..StatefulSetSpec::default()
            }),
            ..StatefulSet::default()
        }
    }

    fn ready_workload(name: &str, replicas: i32, image: &str) -> StatefulSet {
        let mut w = workload(name, replicas, image);
        w.status = Some(StatefulSetStatus {
            ready_replicas: Some(replicas),
            ..StatefulSetStatus::default()
        });
        w
    }

    struct Harness {
        workloads: Arc<MockClient<StatefulSet>>,
        pods: Arc<MockClient<Pod>>,
        readiness: Arc<StaticReadiness>,
        operator: WorkloadOperator,
    }

    fn harness(readiness: StaticReadiness) -> Harness {
        let workloads = Arc::new(MockClient::<StatefulSet>::new("StatefulSet"));
        let pods = Arc::new(MockClient::<Pod>::new("Pod"));
        let readiness = Arc::new(readiness);
        let operator = WorkloadOperator::with_readiness(
            workloads.clone(),
            pods.clone(),
            readiness.clone(),
            OperatorConfig::default(),
        );
        Harness {
            workloads,
            pods,
            readiness,
            operator,
        }
    }

    #[tokio::test]
    async fn patch_never_changes_replica_count() {
        let h = harness(StaticReadiness::always_ready());
        h.workloads.insert("ns", workload("w", 3, "img:1"));

        // Desired asks for 5 replicas and a new image; the patch must carry
        // the current count of 3.
        let outcome = h
            .operator
            .reconcile("ns", "w", Some(&workload("w", 5, "img:2")))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Patched {
                needs_follow_up: true
            }
        );
        let patches = h.workloads.patches();
        assert_eq!(patches.len(), 1);
        assert_eq!(replica_count_of(&patches[0]), 3);
        assert!(h
            .workloads
            .calls()
            .iter()
            .all(|c| !matches!(c, Call::Patch { cascading: true, .. })));
    }

    #[tokio::test]
    async fn image_change_flags_follow_up_replica_change_does_not() {
        let h = harness(StaticReadiness::always_ready());
        h.workloads.insert("ns", workload("w", 3, "img:1"));

        let outcome = h
            .operator
            .reconcile("ns", "w", Some(&workload("w", 5, "img:1")))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Patched {
                needs_follow_up: false
            }
        );
    }

    #[tokio::test]
    async fn unchanged_workload_is_noop() {
        let h = harness(StaticReadiness::always_ready());
        h.workloads.insert("ns", workload("w", 3, "img:1"));

        let outcome = h
            .operator
            .reconcile("ns", "w", Some(&workload("w", 3, "img:1")))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Noop);
        assert!(h.workloads.patches().is_empty());
    }

    #[tokio::test]
    async fn creation_waits_for_workload_and_all_replicas() {
        let h = harness(StaticReadiness::always_ready());

        // Simulates a workload whose platform status reports ready as soon
        // as it exists.
        let outcome = h
            .operator
            .reconcile("ns", "w", Some(&ready_workload("w", 3, "img:1")))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Created);
        assert!(h.workloads.stored("ns", "w").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn creation_fails_when_a_replica_never_readies() {
        let h = harness(StaticReadiness::always_ready());
        h.readiness.set("w-2", false);

        let err = h
            .operator
            .reconcile("ns", "w", Some(&ready_workload("w", 3, "img:1")))
            .await
            .unwrap_err();
        assert!(matches!(err, OpsError::ReadinessTimeout { .. }));
    }

    #[tokio::test]
    async fn rolling_update_deletes_in_ascending_order() {
        let h = harness(StaticReadiness::always_ready());
        h.workloads.insert("ns", workload("w", 3, "img:1"));

        h.operator.rolling_update("ns", "w").await.unwrap();
        assert_eq!(h.pods.deleted_names(), vec!["w-0", "w-1", "w-2"]);

        // Each delete is observed through a watch opened beforehand.
        let calls = h.pods.calls();
        for index in 0..3 {
            let pod = format!("w-{index}");
            let watch_at = calls
                .iter()
                .position(|c| {
                    matches!(c, Call::WatchDeleted { name, .. } if *name == pod)
                })
                .unwrap();
            let delete_at = calls
                .iter()
                .position(|c| matches!(c, Call::Delete { name, .. } if *name == pod))
                .unwrap();
            assert!(watch_at < delete_at, "watch for {pod} opened after delete");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rolling_update_aborts_on_first_unready_index() {
        let h = harness(StaticReadiness::always_ready());
        h.workloads.insert("ns", workload("w", 3, "img:1"));
        h.readiness.set("w-1", false);

        let err = h.operator.rolling_update("ns", "w").await.unwrap_err();
        assert!(matches!(err, OpsError::ReadinessTimeout { .. }));
        // Index 2 was never attempted.
        assert_eq!(h.pods.deleted_names(), vec!["w-0", "w-1"]);
    }

    #[tokio::test]
    async fn rolling_update_with_custom_predicate() {
        let h = harness(StaticReadiness::never_ready());
        h.workloads.insert("ns", workload("w", 2, "img:1"));

        let custom = StaticReadiness::always_ready();
        h.operator
            .rolling_update_with("ns", "w", &custom)
            .await
            .unwrap();
        assert_eq!(h.pods.deleted_names(), vec!["w-0", "w-1"]);
    }

    #[tokio::test]
    async fn scale_up_patches_then_waits_for_new_replicas() {
        let h = harness(StaticReadiness::always_ready());
        h.workloads.insert("ns", workload("w", 3, "img:1"));

        let result = h.operator.scale_up("ns", "w", 5).await.unwrap();
        assert_eq!(result, 5);
        assert_eq!(
            replica_count_of(&h.workloads.stored("ns", "w").unwrap()),
            5
        );
    }

    #[tokio::test(start_paused = true)]
    async fn scale_up_fails_but_keeps_partial_progress() {
        let h = harness(StaticReadiness::always_ready());
        h.workloads.insert("ns", workload("w", 3, "img:1"));
        h.readiness.set("w-4", false);

        let err = h.operator.scale_up("ns", "w", 5).await.unwrap_err();
        assert!(matches!(err, OpsError::ReadinessTimeout { .. }));
        // No auto-rollback: the raised count stays for the next pass.
        assert_eq!(
            replica_count_of(&h.workloads.stored("ns", "w").unwrap()),
            5
        );
    }

    #[tokio::test]
    async fn scale_down_does_not_wait() {
        let h = harness(StaticReadiness::never_ready());
        h.workloads.insert("ns", workload("w", 5, "img:1"));

        // Never-ready readiness proves no wait happens on the way down.
        let result = h.operator.scale_down("ns", "w", 3).await.unwrap();
        assert_eq!(result, 3);
        assert_eq!(
            replica_count_of(&h.workloads.stored("ns", "w").unwrap()),
            3
        );
    }

    #[tokio::test]
    async fn scaling_to_current_count_is_noop() {
        let h = harness(StaticReadiness::never_ready());
        h.workloads.insert("ns", workload("w", 3, "img:1"));

        assert_eq!(h.operator.scale_up("ns", "w", 3).await.unwrap(), 3);
        assert_eq!(h.operator.scale_down("ns", "w", 3).await.unwrap(), 3);
        assert!(h.workloads.patches().is_empty());
    }

    #[tokio::test]
    async fn scaling_missing_workload_is_an_error() {
        let h = harness(StaticReadiness::always_ready());
        let err = h.operator.scale_up("ns", "w", 3).await.unwrap_err();
        assert!(matches!(err, OpsError::Missing(_)));
    }
}
