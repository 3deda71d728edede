//! Readiness signals and bounded readiness waits.
//!
//! [`ReadinessCheck`] is the seam for the replica-health collaborator: a
//! boolean predicate over (namespace, replica identity). The default
//! implementation checks the platform's own `Ready` condition on the pod;
//! callers may substitute a protocol-level health check for rolling updates.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ensemble_core::ResourceRef;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;

use crate::client::ResourceClient;
use crate::error::{OpsError, Result};

/// Boolean readiness predicate over one replica identity.
#[async_trait]
pub trait ReadinessCheck: Send + Sync {
    /// True once the replica is ready to serve.
    ///
    /// # Errors
    ///
    /// Returns an error if the readiness state cannot be determined; this
    /// aborts the owning wait rather than being treated as "not ready".
    async fn is_ready(&self, namespace: &str, pod_name: &str) -> Result<bool>;
}

/// Default readiness: the pod exists and its `Ready` condition is `True`.
pub struct PodReadiness {
    pods: Arc<dyn ResourceClient<Pod>>,
}

impl PodReadiness {
    /// Build the default check over a pod client.
    pub fn new(pods: Arc<dyn ResourceClient<Pod>>) -> Self {
        Self { pods }
    }
}

#[async_trait]
impl ReadinessCheck for PodReadiness {
    async fn is_ready(&self, namespace: &str, pod_name: &str) -> Result<bool> {
        Ok(self
            .pods
            .get(namespace, pod_name)
            .await?
            .is_some_and(|pod| pod_is_ready(&pod)))
    }
}

/// True if the pod's `Ready` condition is `True`.
#[must_use]
pub fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// True if every declared replica of the workload reports ready.
#[must_use]
pub fn workload_is_ready(workload: &StatefulSet) -> bool {
    let declared = workload.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
    let ready = workload
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    ready >= declared
}

/// Poll `probe` every `poll` until it returns true, bounded by `deadline`.
///
/// Every tick is a suspension point; the timer is dropped exactly once, on
/// success, probe failure or deadline.
///
/// # Errors
///
/// Returns [`OpsError::ReadinessTimeout`] for `target` when the deadline is
/// exceeded, or the probe's own error if it fails.
pub async fn wait_for<F, Fut>(
    target: &ResourceRef,
    poll: Duration,
    deadline: Duration,
    mut probe: F,
) -> Result<()>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<bool>> + Send,
{
    let polling = async {
        let mut tick = tokio::time::interval(poll);
        loop {
            tick.tick().await;
            if probe().await? {
                return Ok(());
            }
        }
    };
    match tokio::time::timeout(deadline, polling).await {
        Ok(outcome) => outcome,
        Err(_) => Err(OpsError::ReadinessTimeout {
            target: target.clone(),
            after: deadline,
        }),
    }
}

/// Poll a [`ReadinessCheck`] for one pod until ready, bounded by `deadline`.
///
/// # Errors
///
/// Returns [`OpsError::ReadinessTimeout`] when the deadline is exceeded, or
/// the check's own error if it fails.
pub async fn await_pod_ready(
    check: &dyn ReadinessCheck,
    namespace: &str,
    pod_name: &str,
    poll: Duration,
    deadline: Duration,
) -> Result<()> {
    let target = ResourceRef::new("Pod", namespace, pod_name);
    wait_for(&target, poll, deadline, move || {
        check.is_ready(namespace, pod_name)
    })
    .await
}

/// Scriptable readiness for tests: a per-pod readiness table with a default.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use std::collections::HashMap;

    use parking_lot::Mutex;

    use super::{async_trait, ReadinessCheck, Result};

    /// A readiness check driven entirely by the test.
    pub struct StaticReadiness {
        default: bool,
        overrides: Mutex<HashMap<String, bool>>,
    }

    impl StaticReadiness {
        /// Every pod reports ready unless overridden.
        #[must_use]
        pub fn always_ready() -> Self {
            Self {
                default: true,
                overrides: Mutex::new(HashMap::new()),
            }
        }

        /// No pod reports ready unless overridden.
        #[must_use]
        pub fn never_ready() -> Self {
            Self {
                default: false,
                overrides: Mutex::new(HashMap::new()),
            }
        }

        /// Override readiness for one pod name.
        pub fn set(&self, pod_name: &str, ready: bool) {
            self.overrides.lock().insert(pod_name.to_string(), ready);
        }
    }

    #[async_trait]
    impl ReadinessCheck for StaticReadiness {
        async fn is_ready(&self, _namespace: &str, pod_name: &str) -> Result<bool> {
            Ok(self
                .overrides
                .lock()
                .get(pod_name)
                .copied()
                .unwrap_or(self.default))
        }
    }
}
