//! Error types for assembly reconciliation.

use ensemble_core::ResourceRef;
use ensemble_ops::OpsError;
use thiserror::Error;

/// Errors that can occur while converging one assembly.
#[derive(Error, Debug)]
pub enum AssemblyError {
    /// A resource operation failed.
    #[error(transparent)]
    Ops(#[from] OpsError),

    /// A marker resource exists but yields no usable desired state.
    #[error("marker {0} has no usable desired state")]
    InvalidMarker(ResourceRef),
}

impl AssemblyError {
    /// Check if this error is retriable by re-invoking reconciliation.
    ///
    /// An invalid marker is not: it stays invalid until the marker itself
    /// changes.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Ops(e) => e.is_retriable(),
            Self::InvalidMarker(_) => false,
        }
    }
}

/// A specialized Result type for assembly operations.
pub type Result<T> = std::result::Result<T, AssemblyError>;
