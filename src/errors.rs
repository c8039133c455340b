// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error taxonomy for the turndown controller.
//!
//! Errors are classified by kind rather than by origin: every failure that can
//! reach the scheduler maps onto one of these variants, which in turn decides
//! whether the operation is retried, surfaced as `ScheduleFailed`, or treated
//! as fatal (the process exits and the orchestrator restarts it with clean
//! state).

use thiserror::Error;

/// Convenience alias used throughout the turndown core.
pub type TurndownResult<T> = Result<T, TurndownError>;

/// All error kinds produced by the turndown control plane.
#[derive(Debug, Error)]
pub enum TurndownError {
    /// Invalid schedule: malformed timestamps, `start >= end`, or a past
    /// `start` without a repeat. Reported synchronously, never retried.
    #[error("invalid schedule: {0}")]
    Configuration(String),

    /// Transient cloud API failure. Retried with bounded backoff before it is
    /// surfaced as `ScheduleFailed`.
    #[error("cloud provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The cluster runs on a provider this controller has no backend for.
    /// Fatal at startup.
    #[error("cloud provider unsupported: {0}")]
    ProviderUnsupported(String),

    /// A turndown node pool already exists. Callers ensuring the pool treat
    /// this as success.
    #[error("turndown node pool already exists: {0}")]
    AlreadyExists(String),

    /// `PodDisruptionBudget`s prevented a drain from completing within the
    /// deadline. The turndown aborts with the cluster partially cordoned.
    #[error("drain deadline exceeded on node {node}: {reason}")]
    DrainBudgetExceeded {
        /// Node that could not be drained
        node: String,
        /// What blocked the drain
        reason: String,
    },

    /// The schedule resource changed underneath an update after the retry was
    /// exhausted.
    #[error("turndown schedule was modified concurrently")]
    ConcurrentModification,

    /// State machine contradiction, e.g. a turnup with no recorded original
    /// sizes. Fatal: the controller exits so it restarts with clean state.
    #[error("internal invariant violation: {0}")]
    InvariantViolation(String),

    /// Kubernetes API failure.
    #[error(transparent)]
    Kube(#[from] kube::Error),
}

impl TurndownError {
    /// Whether the scheduler may retry the failed operation.
    ///
    /// Kubernetes API errors follow the usual rule: rate limiting (429) and
    /// server errors (5xx) are transient, client errors are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            TurndownError::ProviderUnavailable(_) => true,
            TurndownError::Kube(kube::Error::Api(api_err)) => {
                api_err.code == 429 || (api_err.code >= 500 && api_err.code < 600)
            }
            TurndownError::Kube(kube::Error::Service(_)) => true,
            _ => false,
        }
    }

    /// Whether the controller must exit on this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TurndownError::ProviderUnsupported(_) | TurndownError::InvariantViolation(_)
        )
    }

    /// Short `CamelCase` identifier for metrics labels and status reasons.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            TurndownError::Configuration(_) => "ConfigurationError",
            TurndownError::ProviderUnavailable(_) => "ProviderUnavailable",
            TurndownError::ProviderUnsupported(_) => "ProviderUnsupported",
            TurndownError::AlreadyExists(_) => "AlreadyExists",
            TurndownError::DrainBudgetExceeded { .. } => "DrainBudgetExceeded",
            TurndownError::ConcurrentModification => "ConcurrentModification",
            TurndownError::InvariantViolation(_) => "InternalInvariantViolation",
            TurndownError::Kube(_) => "KubernetesError",
        }
    }
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
