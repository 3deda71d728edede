//! Reconciliation engine for the ensemble operator.
//!
//! This crate provides the generic machinery that converges individual
//! Kubernetes resources toward desired manifests:
//!
//! - [`ResourceClient`]: the narrow orchestration-API seam (get, list,
//!   create, patch, delete, delete-observation watch), implemented over
//!   `kube::Api` and by an in-memory mock for tests
//! - [`ResourceOperator`]: idempotent create/patch/delete reconciliation
//!   with drift detection, parameterized by [`KindSemantics`]
//! - [`WorkloadDiff`]: structural diff deciding whether two workload
//!   versions are materially different, with platform-owned paths filtered
//!   by a static ignore-list
//! - [`WorkloadOperator`]: scale up/down and pod-by-pod rolling restarts,
//!   gated by replica readiness
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                  AssemblyReconciler                     │
//! │                 (ensemble-assembly)                     │
//! └────────────────────────────────────────────────────────┘
//!              │                          │
//!              ▼                          ▼
//! ┌──────────────────────┐   ┌─────────────────────────────┐
//! │  ResourceOperator<K> │◄──│      WorkloadOperator       │
//! │  ┌────────────────┐  │   │  ┌────────┐ ┌────────────┐  │
//! │  │ KindSemantics  │  │   │  │ Scale  │ │  Rolling   │  │
//! │  └────────────────┘  │   │  │ Up/Down│ │  Update    │  │
//! └──────────────────────┘   │  └────────┘ └────────────┘  │
//!              │             │        │ WorkloadDiff       │
//!              │             └─────────────────────────────┘
//!              ▼                          │
//! ┌────────────────────────────────────────────────────────┐
//! │              ResourceClient<K>  (trait)                 │
//! │      KubeResourceClient  /  mock::MockClient            │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Testing
//!
//! Enable the `test-utils` feature to drive the operators against
//! [`mock::MockClient`](client::mock::MockClient) and
//! [`mock::StaticReadiness`](readiness::mock::StaticReadiness) without a
//! cluster.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod diff;
pub mod error;
pub mod readiness;
pub mod resource;
pub mod workload;

pub use client::{DeleteWatch, KubeResourceClient, ResourceClient};
pub use diff::WorkloadDiff;
pub use error::{OpsError, Result};
pub use readiness::{PodReadiness, ReadinessCheck};
pub use resource::{FullCompare, KindSemantics, PatchAssessment, ReconcileOutcome, ResourceOperator};
pub use workload::{replica_count_of, WorkloadOperator, WorkloadSemantics};

#[cfg(any(test, feature = "test-utils"))]
pub use client::mock::MockClient;
#[cfg(any(test, feature = "test-utils"))]
pub use readiness::mock::StaticReadiness;
