//! Core types and utilities for the ensemble operator.
//!
//! This crate provides the foundational types used throughout the operator:
//!
//! - **References**: [`ResourceRef`] identifies one managed resource, and the
//!   deterministic naming helpers map a workload to its per-replica pods and
//!   storage claims
//! - **Labels**: the label conventions that tie marker resources, workloads
//!   and auxiliary resources to their owning assembly
//! - **Configuration**: [`OperatorConfig`] with poll/timeout tuning and
//!   environment loading
//!
//! # Example
//!
//! ```
//! use ensemble_core::{pod_name, OperatorConfig, ResourceRef};
//!
//! let target = ResourceRef::new("StatefulSet", "prod", "payments-broker");
//! assert_eq!(target.to_string(), "StatefulSet prod/payments-broker");
//!
//! // Replica identities are deterministic from (workload name, index).
//! assert_eq!(pod_name("payments-broker", 2), "payments-broker-2");
//!
//! let config = OperatorConfig::default();
//! assert_eq!(config.poll_interval().as_secs(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod labels;
pub mod refs;

pub use config::OperatorConfig;
pub use refs::{claim_name, pod_name, ResourceRef};
