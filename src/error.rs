//! Error types for the Cumulus provider

use thiserror::Error;

use crate::cloud::{CloudError, CloudErrorKind};
use crate::crd::reason;

/// Main error type for Cumulus operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error (registry reads/writes)
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Classified cloud gateway error
    #[error("cloud gateway error: {0}")]
    Cloud(#[from] CloudError),

    /// A cross-reference declaration could not be resolved
    #[error("cannot resolve reference {field}: {reason}")]
    Reference {
        /// Field path of the declaration, e.g. `spec.forProvider.roleName`
        field: String,
        /// Why resolution failed
        reason: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Schema or invariant violation that retrying cannot fix
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl Error {
    /// Create a reference-resolution error for the given field path
    pub fn reference(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Reference {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create an unexpected (fatal) error with the given message
    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self::Unexpected(msg.into())
    }

    /// Fatal errors bubble to the host runtime instead of being recorded
    /// as a `Synced=False` condition.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unexpected(_))
    }

    /// True when the error is a registry write conflict (stale
    /// resourceVersion). The tick simply re-enqueues.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(ae)) if ae.code == 409)
    }

    /// True when the cloud reported absence of the external resource.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Cloud(e) if e.is_not_found())
    }

    /// Condition reason used when this error is recorded on `Synced=False`.
    ///
    /// Cloud validation failures get their own reason so users can tell a
    /// rejected spec apart from a flaky network.
    pub fn condition_reason(&self) -> &'static str {
        match self {
            Self::Reference { .. } => reason::REFERENCE_ERROR,
            Self::Cloud(e) if e.kind() == CloudErrorKind::InvalidParameter => {
                reason::INVALID_PARAMETER
            }
            _ => reason::RECONCILE_ERROR,
        }
    }
}
