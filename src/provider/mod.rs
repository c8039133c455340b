// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cloud provider abstraction for node-pool manipulation.
//!
//! A [`TurndownProvider`] is a stateless wrapper over one cloud's node-pool
//! APIs: enumerate pools, resize them, create the singleton turndown pool,
//! and associate cluster nodes with the pool that owns them. Adapters carry
//! no turndown state of their own; original sizes live in the schedule
//! status, owned by the manager.
//!
//! Backend selection happens exactly once at startup ([`detect_provider`])
//! and is a pure function of the observed environment, so repeated startups
//! against the same cluster always pick the same adapter.
//!
//! # Backends
//!
//! - [`gke::GkeProvider`] - GKE node pools over the container REST API
//! - [`eks::EksProvider`] - EKS managed node groups
//! - [`aws::AwsProvider`] - self-managed auto-scaling groups

pub mod aws;
pub mod eks;
pub mod gke;
pub mod gke_metadata;

#[cfg(test)]
pub mod testing;

use crate::constants::{
    PROVIDER_RETRY_INITIAL_INTERVAL_SECS, PROVIDER_RETRY_MAX_INTERVAL_SECS,
    PROVIDER_RETRY_MULTIPLIER,
};
use crate::crd::PoolSnapshot;
use crate::errors::{TurndownError, TurndownResult};
use crate::labels::{EKS_NODEGROUP_LABEL, TURNDOWN_NODE_LABEL, TURNDOWN_NODE_LABEL_VALUE};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::{api::ListParams, Api, Client};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Static capability declaration an adapter advertises at startup.
///
/// Strategy selection is a pure function of these flags, never of the
/// adapter's concrete type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProviderCapabilities {
    /// The cloud manages the control plane, so the controller may live on any
    /// node it creates for itself
    pub managed_control_plane: bool,

    /// The adapter can pin a survivor node inside an existing pool instead of
    /// creating a dedicated turndown pool
    pub supports_self_host: bool,
}

/// A cloud-managed set of homogeneous nodes sharing a resize API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodePool {
    /// Human-facing pool name
    pub name: String,

    /// Stable provider-scoped identifier (full resource path on GKE,
    /// node-group name on EKS, ASG name on AWS)
    pub id: String,

    /// Current node count
    pub node_count: i32,

    /// Whether pool-level autoscaling is currently enabled
    pub autoscaling_enabled: bool,

    /// Autoscaler lower bound, when bounds are set
    pub min_count: Option<i32>,

    /// Autoscaler upper bound, when bounds are set
    pub max_count: Option<i32>,

    /// Whether this is the singleton pool hosting the controller
    pub is_turndown_pool: bool,
}

impl NodePool {
    /// Capture the pool's pre-scaledown shape for later restoration.
    #[must_use]
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            node_count: self.node_count,
            min_count: self.min_count,
            max_count: self.max_count,
            autoscaling_enabled: self.autoscaling_enabled,
        }
    }
}

/// Capability set required of any cloud backend.
#[async_trait]
pub trait TurndownProvider: Send + Sync {
    /// Short backend name used in logs and metrics (`gke`, `eks`, `aws`).
    fn name(&self) -> &'static str;

    /// Static capability declaration; drives strategy selection.
    fn capabilities(&self) -> ProviderCapabilities;

    /// True iff the controller is currently scheduled on a node labeled
    /// `cluster-turndown-node=true`.
    async fn is_turndown_node_pool(&self) -> TurndownResult<bool>;

    /// Create (idempotently) a node pool of size 1 carrying the turndown
    /// label merged into `labels`.
    ///
    /// # Errors
    ///
    /// [`TurndownError::AlreadyExists`] when a turndown pool is present,
    /// [`TurndownError::ProviderUnavailable`] on transient cloud failures.
    async fn create_singleton_node_pool(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> TurndownResult<()>;

    /// Enumerate all pools with current size, bounds, and autoscaling flag.
    async fn list_node_pools(&self) -> TurndownResult<Vec<NodePool>>;

    /// Stable identifier of the pool the given node belongs to, or `None`
    /// when the node carries no pool association.
    async fn pool_id_for_node(&self, node: &Node) -> TurndownResult<Option<String>>;

    /// Resize every listed pool to `size`, disabling pool-level autoscaling
    /// first. Blocks until the cloud API has accepted each request.
    ///
    /// Partial success is allowed; every failed pool is reported in the
    /// returned error.
    async fn set_node_pool_sizes(&self, pools: &[NodePool], size: i32) -> TurndownResult<()>;

    /// Restore each recorded pool to its snapshot and re-enable autoscaling
    /// with the recorded bounds.
    async fn reset_node_pool_sizes(
        &self,
        originals: &BTreeMap<String, PoolSnapshot>,
    ) -> TurndownResult<()>;

    /// Pin `node_name` as the turndown survivor and flatten its pool to a
    /// single node, returning the pool id and its pre-flatten snapshot.
    ///
    /// Only meaningful for self-hosting backends.
    async fn prepare_survivor_pool(&self, node_name: &str) -> TurndownResult<(String, PoolSnapshot)> {
        let _ = node_name;
        Err(TurndownError::ProviderUnsupported(format!(
            "{} does not support survivor-node pinning",
            self.name()
        )))
    }

    /// Release the survivor pin taken by [`Self::prepare_survivor_pool`].
    async fn release_survivor_pool(&self, node_name: &str) -> TurndownResult<()> {
        let _ = node_name;
        Err(TurndownError::ProviderUnsupported(format!(
            "{} does not support survivor-node pinning",
            self.name()
        )))
    }
}

/// Outcome of the startup environment classification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    /// GKE: the GCE metadata service is reachable
    Gke,
    /// EKS managed node groups
    Eks,
    /// Self-managed AWS auto-scaling groups
    Aws,
    /// A recognized but unimplemented provider (e.g. Azure), or none at all
    Unsupported(String),
}

/// Classify the cluster's provider from the observed environment.
///
/// Pure function of `(on_gce, provider_id, node labels)` so that repeated
/// startups against the same cluster provably select the same backend:
/// GCE metadata reachable wins; otherwise the node's `spec.providerID`
/// prefix decides, with the `eks.amazonaws.com/nodegroup` label separating
/// EKS from self-managed AWS.
#[must_use]
pub fn classify_provider(
    on_gce: bool,
    provider_id: &str,
    node_labels: &BTreeMap<String, String>,
) -> ProviderKind {
    if on_gce {
        return ProviderKind::Gke;
    }

    let provider_id = provider_id.to_lowercase();
    if provider_id.starts_with("aws") {
        if node_labels.contains_key(EKS_NODEGROUP_LABEL) {
            ProviderKind::Eks
        } else {
            ProviderKind::Aws
        }
    } else if provider_id.starts_with("azure") {
        ProviderKind::Unsupported("azure".to_string())
    } else {
        ProviderKind::Unsupported(format!("unrecognized providerID {provider_id:?}"))
    }
}

/// Detect the cloud provider and construct the matching adapter.
///
/// Runs exactly once at startup; selection is never retried afterwards.
///
/// # Errors
///
/// Returns [`TurndownError::ProviderUnsupported`] for unrecognized clouds or
/// an empty cluster, or a Kubernetes error when nodes cannot be listed.
pub async fn detect_provider(client: Client) -> TurndownResult<Arc<dyn TurndownProvider>> {
    let metadata = gke_metadata::GkeMetadata::new();
    let on_gce = metadata.on_gce().await;

    let nodes: Api<Node> = Api::all(client.clone());
    let node_list = nodes.list(&ListParams::default()).await?;
    let first = node_list.items.first().ok_or_else(|| {
        TurndownError::ProviderUnsupported("could not locate any nodes in the cluster".to_string())
    })?;

    let provider_id = first
        .spec
        .as_ref()
        .and_then(|s| s.provider_id.clone())
        .unwrap_or_default();
    let labels = first.metadata.labels.clone().unwrap_or_default();

    match classify_provider(on_gce, &provider_id, &labels) {
        ProviderKind::Gke => {
            info!("GCE metadata reachable, using GKE provider");
            Ok(Arc::new(gke::GkeProvider::new(client, metadata)))
        }
        ProviderKind::Eks => {
            info!("Found providerID starting with \"aws\" and an EKS node group, using EKS provider");
            Ok(Arc::new(eks::EksProvider::new(client).await?))
        }
        ProviderKind::Aws => {
            info!("Found providerID starting with \"aws\", using AWS provider");
            Ok(Arc::new(aws::AwsProvider::new(client).await?))
        }
        ProviderKind::Unsupported(which) => Err(TurndownError::ProviderUnsupported(which)),
    }
}

/// Run up to `probes` readiness probes against the cloud API.
///
/// Fails fast on non-retryable errors (missing credentials surface as client
/// errors, not timeouts); transient failures back off between probes.
///
/// # Errors
///
/// Returns the final probe error when all probes fail.
pub async fn validate(provider: &dyn TurndownProvider, probes: u32) -> TurndownResult<()> {
    let mut interval = Duration::from_secs(PROVIDER_RETRY_INITIAL_INTERVAL_SECS);

    for attempt in 1..=probes {
        match provider.list_node_pools().await {
            Ok(pools) => {
                info!(
                    provider = provider.name(),
                    pools = pools.len(),
                    "Provider validation succeeded"
                );
                return Ok(());
            }
            Err(e) if e.is_retryable() && attempt < probes => {
                warn!(
                    provider = provider.name(),
                    attempt,
                    error = %e,
                    "Provider validation probe failed, will retry"
                );
                tokio::time::sleep(interval).await;
                interval = interval
                    .mul_f64(PROVIDER_RETRY_MULTIPLIER)
                    .min(Duration::from_secs(PROVIDER_RETRY_MAX_INTERVAL_SECS));
            }
            Err(e) => return Err(e),
        }
    }

    Err(TurndownError::ProviderUnavailable(format!(
        "provider {} failed {} validation probes",
        provider.name(),
        probes
    )))
}

/// Whether the given node carries the turndown label.
///
/// Shared by every adapter's `is_turndown_node_pool` implementation.
pub(crate) async fn node_has_turndown_label(
    client: &Client,
    node_name: &str,
) -> TurndownResult<bool> {
    let nodes: Api<Node> = Api::all(client.clone());
    let node = nodes.get(node_name).await?;
    Ok(node
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(TURNDOWN_NODE_LABEL))
        .is_some_and(|v| v == TURNDOWN_NODE_LABEL_VALUE))
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod provider_tests;
