//! Assembly-level orchestration for the ensemble operator.
//!
//! An *assembly* is a named group of resources deployed and operated as a
//! unit: a marker resource carrying the declarative configuration, network
//! endpoints, scalable workloads with per-replica storage, auxiliary
//! configuration and an optional companion deployment.
//!
//! This crate composes the per-resource operators from `ensemble-ops` into
//! two entry points:
//!
//! - [`AssemblyReconciler::create_or_update`] / [`AssemblyReconciler::delete`]:
//!   converge or tear down one assembly, in fixed dependency order
//! - [`AssemblyReconciler::reconcile_all`]: namespace-wide drift detection —
//!   every marker resource is converged and every managed workload whose
//!   marker has disappeared is torn down, concurrently and independently
//!
//! Desired state comes from a [`BundleProvider`] supplied at construction
//! time, keeping configuration translation out of the reconciliation engine.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod bundle;
pub mod error;
pub mod reconciler;

pub use bundle::{AssemblyBundle, BundleProvider};
pub use error::{AssemblyError, Result};
pub use reconciler::{AssemblyClients, AssemblyReconciler, ReconcileAllSummary};
