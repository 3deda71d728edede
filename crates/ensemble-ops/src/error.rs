//! Error types for the operator engine.

use std::time::Duration;

use ensemble_core::ResourceRef;
use thiserror::Error;

/// Errors that can occur during resource operations.
///
/// Absence of a resource is never an error here: `get` and `list` report it
/// as `None`/empty. Failures below abort only the owning session (one
/// reconcile, one scale, one rolling update); siblings are unaffected.
#[derive(Error, Debug)]
pub enum OpsError {
    /// The orchestration API rejected a call. Surfaced verbatim, never
    /// retried at this layer.
    #[error("Kubernetes API error: {0}")]
    Client(#[from] kube::Error),

    /// A resource snapshot could not be converted for structural comparison.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An operation required a resource that does not exist, e.g. scaling a
    /// workload that was never created.
    #[error("{0} does not exist")]
    Missing(ResourceRef),

    /// A readiness wait did not converge within its deadline.
    #[error("{target} not ready after {after:?}")]
    ReadinessTimeout {
        /// The resource whose readiness never arrived.
        target: ResourceRef,
        /// The deadline that was exceeded.
        after: Duration,
    },

    /// The delete-observation watch closed before deletion was confirmed.
    #[error("watch on {0} closed before deletion was observed")]
    WatchClosed(ResourceRef),
}

impl OpsError {
    /// Check if this error is retriable by re-invoking reconciliation.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Client(_) | Self::ReadinessTimeout { .. } | Self::WatchClosed(_)
        )
    }
}

/// A specialized Result type for operator engine operations.
pub type Result<T> = std::result::Result<T, OpsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_failures_are_retriable() {
        let target = ResourceRef::new("Pod", "ns", "w-0");
        assert!(OpsError::ReadinessTimeout {
            target: target.clone(),
            after: Duration::from_secs(60),
        }
        .is_retriable());
        assert!(OpsError::WatchClosed(target.clone()).is_retriable());
        assert!(!OpsError::Missing(target).is_retriable());
    }
}
