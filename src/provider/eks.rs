// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! EKS backend over managed node groups.
//!
//! Pool identifiers are node-group names scoped to the cluster discovered at
//! construction time (`TURNDOWN_CLUSTER_NAME` env, falling back to the
//! `alpha.eksctl.io/cluster-name` node label). Managed node groups have no
//! pool-level autoscaler toggle; the recorded `{min,max,desired}` scaling
//! config is the snapshot and its restoration the reset.

use super::{node_has_turndown_label, NodePool, ProviderCapabilities, TurndownProvider};
use crate::constants::{ENV_CLUSTER_NAME, ENV_NODE_NAME, TURNDOWN_POOL_NAME};
use crate::crd::PoolSnapshot;
use crate::errors::{TurndownError, TurndownResult};
use crate::labels::{EKSCTL_CLUSTER_LABEL, EKS_NODEGROUP_LABEL, TURNDOWN_NODE_LABEL};
use async_trait::async_trait;
use aws_sdk_eks::types::{Nodegroup, NodegroupScalingConfig};
use k8s_openapi::api::core::v1::Node;
use kube::{api::ListParams, Api, Client};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Instance type used for the EKS turndown node group
const EKS_TURNDOWN_INSTANCE_TYPE: &str = "t3.small";

/// EKS managed node-group adapter.
pub struct EksProvider {
    kube: Client,
    eks: aws_sdk_eks::Client,
    cluster_name: String,
    node_name: Option<String>,
}

impl EksProvider {
    /// Create an EKS adapter, loading AWS credentials from the default chain
    /// and discovering the cluster name.
    ///
    /// # Errors
    ///
    /// Returns [`TurndownError::ProviderUnsupported`] when the cluster name
    /// cannot be determined.
    pub async fn new(kube: Client) -> TurndownResult<Self> {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let eks = aws_sdk_eks::Client::new(&config);
        let cluster_name = Self::discover_cluster_name(&kube).await?;

        info!(cluster = %cluster_name, "EKS provider initialized");
        Ok(Self {
            kube,
            eks,
            cluster_name,
            node_name: std::env::var(ENV_NODE_NAME).ok(),
        })
    }

    /// Cluster name from the environment, else from any node's eksctl label.
    async fn discover_cluster_name(kube: &Client) -> TurndownResult<String> {
        if let Ok(name) = std::env::var(ENV_CLUSTER_NAME) {
            if !name.is_empty() {
                return Ok(name);
            }
        }

        let nodes: Api<Node> = Api::all(kube.clone());
        let list = nodes.list(&ListParams::default()).await?;
        for node in &list.items {
            if let Some(name) = node
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(EKSCTL_CLUSTER_LABEL))
            {
                return Ok(name.clone());
            }
        }

        Err(TurndownError::ProviderUnsupported(format!(
            "EKS cluster name not found: set {ENV_CLUSTER_NAME} or label nodes with {EKSCTL_CLUSTER_LABEL}"
        )))
    }

    /// All node-group names in the cluster, following pagination.
    async fn nodegroup_names(&self) -> TurndownResult<Vec<String>> {
        let mut names = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let resp = self
                .eks
                .list_nodegroups()
                .cluster_name(&self.cluster_name)
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|e| {
                    TurndownError::ProviderUnavailable(format!("ListNodegroups: {e}"))
                })?;

            names.extend(resp.nodegroups().iter().cloned());
            next_token = resp.next_token().map(ToString::to_string);
            if next_token.is_none() {
                break;
            }
        }

        Ok(names)
    }

    /// Describe one node group.
    async fn describe(&self, name: &str) -> TurndownResult<Nodegroup> {
        let resp = self
            .eks
            .describe_nodegroup()
            .cluster_name(&self.cluster_name)
            .nodegroup_name(name)
            .send()
            .await
            .map_err(|e| {
                TurndownError::ProviderUnavailable(format!("DescribeNodegroup {name}: {e}"))
            })?;

        resp.nodegroup().cloned().ok_or_else(|| {
            TurndownError::ProviderUnavailable(format!("DescribeNodegroup {name}: empty response"))
        })
    }

    fn to_pool(nodegroup: &Nodegroup) -> NodePool {
        let name = nodegroup.nodegroup_name().unwrap_or_default().to_string();
        let scaling = nodegroup.scaling_config();
        let is_turndown_pool = nodegroup
            .labels()
            .is_some_and(|l| l.contains_key(TURNDOWN_NODE_LABEL));

        NodePool {
            id: name.clone(),
            name,
            node_count: scaling.and_then(|s| s.desired_size()).unwrap_or(0),
            // Managed node groups have no pool-level autoscaler toggle; the
            // scaling config bounds are what gets recorded and restored.
            autoscaling_enabled: false,
            min_count: scaling.and_then(|s| s.min_size()),
            max_count: scaling.and_then(|s| s.max_size()),
            is_turndown_pool,
        }
    }

    /// Apply a scaling config to one node group.
    async fn scale(&self, name: &str, min: i32, max: i32, desired: i32) -> TurndownResult<()> {
        let scaling = NodegroupScalingConfig::builder()
            .min_size(min)
            .max_size(max)
            .desired_size(desired)
            .build();

        self.eks
            .update_nodegroup_config()
            .cluster_name(&self.cluster_name)
            .nodegroup_name(name)
            .scaling_config(scaling)
            .send()
            .await
            .map_err(|e| {
                TurndownError::ProviderUnavailable(format!("UpdateNodegroupConfig {name}: {e}"))
            })?;
        Ok(())
    }
}

#[async_trait]
impl TurndownProvider for EksProvider {
    fn name(&self) -> &'static str {
        "eks"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            managed_control_plane: true,
            supports_self_host: false,
        }
    }

    async fn is_turndown_node_pool(&self) -> TurndownResult<bool> {
        let Some(node_name) = &self.node_name else {
            return Ok(false);
        };
        node_has_turndown_label(&self.kube, node_name).await
    }

    async fn create_singleton_node_pool(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> TurndownResult<()> {
        let pools = self.list_node_pools().await?;
        if let Some(pool) = pools.iter().find(|p| p.is_turndown_pool) {
            return Err(TurndownError::AlreadyExists(pool.id.clone()));
        }

        // Borrow networking and the node role from an existing group; a
        // managed node group cannot be created without them.
        let template = pools.first().ok_or_else(|| {
            TurndownError::ProviderUnavailable(
                "cannot create turndown node group: no existing node groups to copy networking from"
                    .to_string(),
            )
        })?;
        let template = self.describe(&template.id).await?;

        let mut request = self
            .eks
            .create_nodegroup()
            .cluster_name(&self.cluster_name)
            .nodegroup_name(TURNDOWN_POOL_NAME)
            .instance_types(EKS_TURNDOWN_INSTANCE_TYPE)
            .scaling_config(
                NodegroupScalingConfig::builder()
                    .min_size(1)
                    .max_size(1)
                    .desired_size(1)
                    .build(),
            );

        if let Some(role) = template.node_role() {
            request = request.node_role(role);
        }
        for subnet in template.subnets() {
            request = request.subnets(subnet);
        }
        for (key, value) in crate::labels::turndown_pool_labels(labels) {
            request = request.labels(key, value);
        }

        info!(cluster = %self.cluster_name, "Creating EKS turndown node group");
        request.send().await.map_err(|e| {
            let service_error = e.into_service_error();
            if service_error.is_resource_in_use_exception() {
                TurndownError::AlreadyExists(TURNDOWN_POOL_NAME.to_string())
            } else {
                TurndownError::ProviderUnavailable(format!("CreateNodegroup: {service_error}"))
            }
        })?;
        Ok(())
    }

    async fn list_node_pools(&self) -> TurndownResult<Vec<NodePool>> {
        let mut pools = Vec::new();
        for name in self.nodegroup_names().await? {
            let nodegroup = self.describe(&name).await?;
            pools.push(Self::to_pool(&nodegroup));
        }
        Ok(pools)
    }

    async fn pool_id_for_node(&self, node: &Node) -> TurndownResult<Option<String>> {
        Ok(node
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(EKS_NODEGROUP_LABEL))
            .cloned())
    }

    async fn set_node_pool_sizes(&self, pools: &[NodePool], size: i32) -> TurndownResult<()> {
        let mut failures = Vec::new();

        for pool in pools {
            // EKS requires maxSize >= 1, so the recorded maximum is kept.
            let max = pool.max_count.unwrap_or(pool.node_count).max(1);
            match self.scale(&pool.id, size.min(max), max, size.min(max)).await {
                Ok(()) => {
                    info!(nodegroup = %pool.id, size, "EKS node group resize accepted");
                    crate::metrics::record_pool_resized(self.name(), "down");
                }
                Err(e) => {
                    warn!(nodegroup = %pool.id, error = %e, "Failed to resize node group");
                    failures.push(format!("{}: {e}", pool.id));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TurndownError::ProviderUnavailable(format!(
                "failed to resize {} of {} node groups: {}",
                failures.len(),
                pools.len(),
                failures.join("; ")
            )))
        }
    }

    async fn reset_node_pool_sizes(
        &self,
        originals: &BTreeMap<String, PoolSnapshot>,
    ) -> TurndownResult<()> {
        let mut failures = Vec::new();

        for (name, snapshot) in originals {
            let min = snapshot.min_count.unwrap_or(snapshot.node_count);
            let max = snapshot
                .max_count
                .unwrap_or(snapshot.node_count)
                .max(1);
            if let Err(e) = self.scale(name, min, max, snapshot.node_count).await {
                warn!(nodegroup = %name, error = %e, "Failed to restore node group");
                failures.push(format!("{name}: {e}"));
            } else {
                crate::metrics::record_pool_resized(self.name(), "up");
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TurndownError::ProviderUnavailable(format!(
                "failed to restore {} node groups: {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }
}
