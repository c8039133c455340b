// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the cluster-turndown controller.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// API group for the turndown CRD
pub const API_GROUP: &str = "turndown.firestoned.io";

/// API version for the turndown CRD
pub const API_VERSION: &str = "v1alpha1";

/// Fully qualified API version (group/version)
pub const API_GROUP_VERSION: &str = "turndown.firestoned.io/v1alpha1";

/// Kind name for the `TurndownSchedule` resource
pub const KIND_TURNDOWN_SCHEDULE: &str = "TurndownSchedule";

/// Resource name used for the singleton schedule created through the HTTP API.
///
/// Schedules created directly with `kubectl` may carry any name; when more than
/// one exists, only the lexicographically-first is honoured.
pub const DEFAULT_SCHEDULE_NAME: &str = "turndown-schedule";

// ============================================================================
// HTTP API Constants
// ============================================================================

/// Bind address for the schedule/cancel HTTP API
pub const HTTP_API_BIND_ADDRESS: &str = "0.0.0.0";

/// Port for the schedule/cancel HTTP API
pub const HTTP_API_PORT: u16 = 9731;

// ============================================================================
// Metrics Server Constants
// ============================================================================

/// Port for Prometheus metrics HTTP server
pub const METRICS_SERVER_PORT: u16 = 8080;

/// Path for Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";

/// Bind address for metrics HTTP server
pub const METRICS_SERVER_BIND_ADDRESS: &str = "0.0.0.0";

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

// ============================================================================
// Controller Error Handling Constants
// ============================================================================

/// Requeue duration for controller errors (30 seconds)
pub const ERROR_REQUEUE_DURATION_SECS: u64 = 30;

/// Periodic requeue for healthy schedules, a safety net under the timer (5 minutes)
pub const ACTIVE_REQUEUE_DURATION_SECS: u64 = 300;

// ============================================================================
// Provider Retry Constants
// ============================================================================

/// Initial retry interval for cloud provider mutations (2 seconds)
pub const PROVIDER_RETRY_INITIAL_INTERVAL_SECS: u64 = 2;

/// Maximum interval between provider retries (60 seconds)
pub const PROVIDER_RETRY_MAX_INTERVAL_SECS: u64 = 60;

/// Backoff multiplier for provider retries (exponential growth factor)
pub const PROVIDER_RETRY_MULTIPLIER: f64 = 2.0;

/// Maximum number of attempts for a provider mutation
pub const PROVIDER_RETRY_MAX_ATTEMPTS: u32 = 5;

/// Randomization factor applied to retry intervals (±10%)
pub const RETRY_RANDOMIZATION_FACTOR: f64 = 0.1;

/// Number of readiness probes issued against the cloud API at startup
pub const PROVIDER_VALIDATE_PROBES: u32 = 5;

// ============================================================================
// Scale Operation Constants
// ============================================================================

/// Top-level deadline for a single turndown or turnup (30 minutes)
pub const SCALE_OPERATION_TIMEOUT_SECS: u64 = 1800;

/// Deadline for draining a single node (10 minutes)
pub const DRAIN_TIMEOUT_SECS: u64 = 600;

/// Interval between eviction retries when a `PodDisruptionBudget` blocks (5 seconds)
pub const EVICTION_RETRY_INTERVAL_SECS: u64 = 5;

/// Interval between polls while waiting for drained pods to terminate (5 seconds)
pub const DRAIN_POLL_INTERVAL_SECS: u64 = 5;

/// Deadline for the turndown pool node to become Ready (10 minutes)
pub const NODE_READY_TIMEOUT_SECS: u64 = 600;

/// Interval between node readiness polls (10 seconds)
pub const NODE_READY_POLL_INTERVAL_SECS: u64 = 10;

// ============================================================================
// Turndown Pool Constants
// ============================================================================

/// Name of the singleton node pool that hosts the controller during turndown
pub const TURNDOWN_POOL_NAME: &str = "cluster-turndown";

/// Machine type used for the GKE turndown pool
pub const GKE_TURNDOWN_MACHINE_TYPE: &str = "e2-small";

// ============================================================================
// Environment Variable Names
// ============================================================================

/// Name of the node the controller pod is currently scheduled on
pub const ENV_NODE_NAME: &str = "NODE_NAME";

/// Name of the controller's own Deployment, used for self-relocation
pub const ENV_DEPLOYMENT_NAME: &str = "TURNDOWN_DEPLOYMENT";

/// Namespace the controller pod runs in
pub const ENV_POD_NAMESPACE: &str = "POD_NAMESPACE";

/// EKS cluster name override for the managed node-group backend
pub const ENV_CLUSTER_NAME: &str = "TURNDOWN_CLUSTER_NAME";

/// Default Deployment name when `TURNDOWN_DEPLOYMENT` is unset
pub const DEFAULT_DEPLOYMENT_NAME: &str = "cluster-turndown";

/// Default namespace when `POD_NAMESPACE` is unset
pub const DEFAULT_NAMESPACE: &str = "turndown-system";

// ============================================================================
// Cloud Metadata Constants
// ============================================================================

/// User agent sent on every metadata and cloud REST request
pub const CLOUD_USER_AGENT: &str = "cluster-turndown";

/// Timeout for the GCE metadata reachability probe (2 seconds)
pub const METADATA_PROBE_TIMEOUT_SECS: u64 = 2;

// ============================================================================
// Leader Election Constants
// ============================================================================

/// Default leader election lease duration (15 seconds)
pub const DEFAULT_LEASE_DURATION_SECS: u64 = 15;

/// Default leader election retry period (2 seconds)
pub const DEFAULT_LEASE_RETRY_PERIOD_SECS: u64 = 2;
