//! Error types for the Collector Operator
//!
//! Two layers of errors exist: [`StoreError`] is the vocabulary of the
//! managed resource store contract, [`Error`] is what a reconciliation pass
//! (and the rest of the operator) reports.

use crate::domain::ports::{ChildKind, Operation};
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Store Errors
// =============================================================================

/// Errors returned by a [`ResourceStore`](crate::domain::ports::ResourceStore)
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("object not found")]
    NotFound,

    #[error("object already exists")]
    AlreadyExists,

    #[error("resource version conflict (expected {expected})")]
    VersionConflict { expected: String },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Check if retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::VersionConflict { .. } | StoreError::Kube(_) | StoreError::Backend(_)
        )
    }
}

// =============================================================================
// Operator Errors
// =============================================================================

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Invalid collector {namespace}/{name}: {reason}")]
    Validation {
        namespace: String,
        name: String,
        reason: String,
    },

    // =========================================================================
    // Ownership Errors
    // =========================================================================
    #[error("{kind} {name} is already controlled by {owner}")]
    AlreadyOwned {
        kind: ChildKind,
        name: String,
        owner: String,
    },

    #[error("{kind} {namespace}/{name} exists but is not owned by this collector")]
    OwnershipConflict {
        kind: ChildKind,
        namespace: String,
        name: String,
    },

    // =========================================================================
    // Store Errors
    // =========================================================================
    #[error("failed to {operation} {kind}: {source}")]
    Store {
        kind: ChildKind,
        operation: Operation,
        #[source]
        source: StoreError,
    },

    #[error("failed to load collector {namespace}/{name}: {source}")]
    Lookup {
        namespace: String,
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // =========================================================================
    // Metrics Errors
    // =========================================================================
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Wrap a store failure with the kind and operation it happened in
    pub fn store(kind: ChildKind, operation: Operation, source: StoreError) -> Self {
        Error::Store {
            kind,
            operation,
            source,
        }
    }

    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            Error::Store { source, .. } | Error::Lookup { source, .. }
                if source.is_transient() =>
            {
                ErrorAction::RequeueWithBackoff
            }
            Error::Kube(_) => ErrorAction::RequeueWithBackoff,

            // Someone else holds the name; check back later
            Error::OwnershipConflict { .. } | Error::AlreadyOwned { .. } => {
                ErrorAction::RequeueAfter(Duration::from_secs(60))
            }

            // Only a spec edit can fix these
            Error::Validation { .. } | Error::Configuration(_) | Error::Yaml(_) => {
                ErrorAction::NoRequeue
            }

            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Store { source, .. } | Error::Lookup { source, .. } => source.is_transient(),
            Error::Kube(_) => true,
            _ => false,
        }
    }

    /// The child kind this error is scoped to, if any
    pub fn kind(&self) -> Option<ChildKind> {
        match self {
            Error::Store { kind, .. }
            | Error::AlreadyOwned { kind, .. }
            | Error::OwnershipConflict { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;
