//! Error types for the consent engine.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! the specific condition (bad input at the ingestion boundary, a failed
//! recompute, a saturated runtime) and decide whether to retry.

use thiserror::Error;

use crate::consent::ConsentId;

/// Validation errors raised at the ingestion boundary.
///
/// Nothing that fails validation ever reaches the resolution functions.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Unrecognized {kind} tag '{value}'")]
    UnknownTag {
        kind: &'static str,
        value: String,
    },

    #[error("Vaccine method '{method}' appears more than once")]
    DuplicateVaccineMethod {
        method: String,
    },

    #[error("Vaccine methods were supplied with a '{decision}' decision")]
    MethodsWithoutConsent {
        decision: String,
    },

    #[error("Consent {id} is already invalidated and cannot be submitted")]
    SubmittedInvalidated {
        id: ConsentId,
    },

    #[error("Invalid runtime configuration: {reason}")]
    InvalidRuntimeConfig {
        reason: String,
    },
}

/// Execution errors raised while running a workflow operation.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Consent not found: {id}")]
    ConsentNotFound {
        id: ConsentId,
    },

    #[error("Consent {id} has already been submitted")]
    DuplicateConsent {
        id: ConsentId,
    },

    #[error("Storage error: {message}")]
    Storage {
        message: String,
    },

    #[error("Runtime queue full for shard {shard} (capacity {capacity})")]
    QueueFull {
        shard: usize,
        capacity: usize,
    },

    #[error("Runtime shard {shard} is disconnected")]
    Disconnected {
        shard: usize,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },
}

/// Top-level error type for the consent engine.
#[derive(Debug, Error)]
pub enum ConsentError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl ConsentError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if the failed operation may succeed when retried.
    ///
    /// A failed recompute never leaves a partial status behind, so callers
    /// can simply call `recompute` again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Internal { .. } => false,
            Self::Execution(e) => matches!(
                e,
                ExecutionError::Storage { .. }
                    | ExecutionError::Timeout { .. }
                    | ExecutionError::QueueFull { .. }
            ),
        }
    }
}

/// Result type alias for consent engine operations.
pub type ConsentResult<T> = Result<T, ConsentError>;
