//! Error types for clusterflow.
//!
//! Three layers:
//! - [`StepError`] is returned by step bodies and classified by the engine.
//! - [`StoreError`] is returned by the document store adapter.
//! - [`ClusterflowError`] is what lifecycle entry points surface to callers.

use crate::api::ProvisioningState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message used when a condition step exhausts its timeout.
pub const CONDITION_TIMEOUT_MESSAGE: &str = "timed out waiting for the condition";

/// Cloud error codes that indicate freshly granted permissions have not yet
/// propagated.
const AUTHORIZATION_FAILURE_CODES: &[&str] = &[
    "AuthorizationFailed",
    "LinkedAuthorizationFailed",
    "AADSTS700016",
    "AADSTS7000215",
];

/// The main error type for lifecycle operations.
#[derive(Debug, Error)]
pub enum ClusterflowError {
    /// A step in a pipeline failed; the pipeline was aborted.
    #[error("step {step} encountered error: {source}")]
    StepFailed {
        /// Canonical string form of the failing step.
        step: String,
        /// The underlying step error.
        #[source]
        source: StepError,
    },

    /// The run was cancelled before it finished.
    #[error("pipeline cancelled: {0}")]
    Cancelled(String),

    /// A document store operation failed outside of a step.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The cluster version on the record could not be parsed.
    #[error("invalid cluster version {version:?}: {reason}")]
    InvalidVersion {
        /// The raw version string.
        version: String,
        /// Why parsing failed.
        reason: String,
    },

    /// The record's install block points at a phase with no step list.
    #[error("unrecognised install phase {0}")]
    UnrecognisedInstallPhase(String),

    /// Install via orchestrator was requested but no orchestrator is configured.
    #[error("installViaHive was requested but the hive cluster manager is unavailable")]
    HiveUnavailable,

    /// The record is not in a state any lifecycle entry point handles.
    #[error("provisioning state {0} is not actionable")]
    NotActionable(ProvisioningState),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ClusterflowError {
    /// Returns the canonical name of the failing step, if any.
    #[must_use]
    pub fn failed_step(&self) -> Option<&str> {
        match self {
            Self::StepFailed { step, .. } => Some(step),
            _ => None,
        }
    }
}

/// Error returned by a step body.
#[derive(Debug, Error)]
pub enum StepError {
    /// A cloud platform API returned an error.
    #[error(transparent)]
    Cloud(#[from] CloudError),

    /// The document store rejected an operation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A condition did not become true within its timeout.
    #[error("timed out waiting for the condition")]
    ConditionTimeout,

    /// The run was cancelled while the step was in flight.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// A step ran before the state it depends on was prepared.
    #[error("precondition not met: {0}")]
    Precondition(String),

    /// Any other failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StepError {
    /// Creates a cloud error.
    #[must_use]
    pub fn cloud(status_code: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Cloud(CloudError::new(status_code, code, message))
    }

    /// Creates a precondition error.
    #[must_use]
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }

    /// Returns true if the error means permissions have not propagated yet.
    #[must_use]
    pub fn is_authorization_failure(&self) -> bool {
        match self {
            Self::Cloud(err) => err.is_authorization_failure(),
            _ => false,
        }
    }

    /// Returns true if the error is a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// An error reported by a cloud platform API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("StatusCode={status_code} Code={code:?} Message={message:?}")]
pub struct CloudError {
    /// HTTP status code.
    pub status_code: u16,
    /// Service error code.
    pub code: String,
    /// Service error message.
    pub message: String,
}

impl CloudError {
    /// Creates a new cloud error.
    #[must_use]
    pub fn new(status_code: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status_code,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Returns true for authorization errors that are expected to clear once
    /// role assignments propagate.
    #[must_use]
    pub fn is_authorization_failure(&self) -> bool {
        AUTHORIZATION_FAILURE_CODES
            .iter()
            .any(|code| self.code == *code || self.message.contains(code))
    }
}

/// Errors raised by the document store adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No record exists for the key.
    #[error("document {0} not found")]
    NotFound(String),

    /// The key is malformed or not lower case.
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey {
        /// The offending key.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A record with the same key already exists.
    #[error("document {0} already exists")]
    AlreadyExists(String),

    /// The caller's lease was taken over by another owner.
    #[error("lost lease")]
    LostLease,

    /// Another owner holds an unexpired lease on the record.
    #[error("lease on {key} is held by {owner}")]
    LeaseHeld {
        /// The record key.
        key: String,
        /// The current lease owner.
        owner: String,
    },

    /// Optimistic concurrency retries were exhausted.
    #[error("conflicting write to {key} after {attempts} attempts")]
    Conflict {
        /// The record key.
        key: String,
        /// Number of attempts made.
        attempts: usize,
    },

    /// The mutation function rejected the record.
    #[error("{0}")]
    Mutation(String),
}

impl StoreError {
    /// Creates a mutation error.
    #[must_use]
    pub fn mutation(message: impl Into<String>) -> Self {
        Self::Mutation(message.into())
    }

    /// Returns true for conflicts that a caller may retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LeaseHeld { .. } | Self::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_failed_names_step() {
        let err = ClusterflowError::StepFailed {
            step: "[Action ensure_defaults-fm]".to_string(),
            source: StepError::Other(anyhow::anyhow!("oh no!")),
        };

        assert_eq!(
            err.to_string(),
            "step [Action ensure_defaults-fm] encountered error: oh no!"
        );
        assert_eq!(err.failed_step(), Some("[Action ensure_defaults-fm]"));
    }

    #[test]
    fn test_condition_timeout_message() {
        assert_eq!(StepError::ConditionTimeout.to_string(), CONDITION_TIMEOUT_MESSAGE);
    }

    #[test]
    fn test_authorization_classification() {
        assert!(StepError::cloud(403, "AuthorizationFailed", "failed").is_authorization_failure());
        assert!(StepError::cloud(400, "InvalidClient", "AADSTS700016: app not found")
            .is_authorization_failure());
        assert!(!StepError::cloud(500, "InternalServerError", "boom").is_authorization_failure());
        assert!(!StepError::Other(anyhow::anyhow!("AuthorizationFailed")).is_authorization_failure());
    }

    #[test]
    fn test_store_error_retryable() {
        assert!(StoreError::Conflict { key: "k".into(), attempts: 5 }.is_retryable());
        assert!(StoreError::LeaseHeld { key: "k".into(), owner: "o".into() }.is_retryable());
        assert!(!StoreError::LostLease.is_retryable());
        assert!(!StoreError::NotFound("k".into()).is_retryable());
    }
}
