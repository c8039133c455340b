// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Self-managed AWS backend over auto-scaling groups.
//!
//! Pool identifiers are ASG names, discovered by resolving cluster node
//! instance IDs (parsed from `spec.providerID`, `aws:///zone/i-...`) through
//! `DescribeAutoScalingInstances`. There is no cloud-managed control plane:
//! the controller survives a turndown by protecting its host instance from
//! scale-in and flattening the host's ASG to a single node.

use super::{node_has_turndown_label, NodePool, ProviderCapabilities, TurndownProvider};
use crate::constants::ENV_NODE_NAME;
use crate::crd::PoolSnapshot;
use crate::errors::{TurndownError, TurndownResult};
use crate::labels::{TURNDOWN_NODE_LABEL, TURNDOWN_NODE_LABEL_VALUE};
use async_trait::async_trait;
use aws_sdk_autoscaling::types::{AutoScalingGroup, Tag};
use k8s_openapi::api::core::v1::Node;
use kube::{api::ListParams, Api, Client};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// `DescribeAutoScalingInstances` accepts at most 50 instance IDs per call
const ASG_DESCRIBE_BATCH: usize = 50;

/// Scaling processes suspended while a turndown holds the group at zero
const SUSPENDED_PROCESSES: [&str; 3] = ["AlarmNotification", "ScheduledActions", "AZRebalance"];

/// Self-managed ASG adapter.
pub struct AwsProvider {
    kube: Client,
    asg: aws_sdk_autoscaling::Client,
    node_name: Option<String>,
}

impl AwsProvider {
    /// Create an AWS adapter, loading credentials from the default chain.
    ///
    /// # Errors
    ///
    /// Currently infallible beyond credential-chain setup; kept fallible to
    /// match the other backends' constructors.
    pub async fn new(kube: Client) -> TurndownResult<Self> {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let asg = aws_sdk_autoscaling::Client::new(&config);

        Ok(Self {
            kube,
            asg,
            node_name: std::env::var(ENV_NODE_NAME).ok(),
        })
    }

    /// Resolve the ASG name owning the given instance.
    async fn asg_for_instance(&self, instance_id: &str) -> TurndownResult<String> {
        let resp = self
            .asg
            .describe_auto_scaling_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| {
                TurndownError::ProviderUnavailable(format!(
                    "DescribeAutoScalingInstances {instance_id}: {e}"
                ))
            })?;

        resp.auto_scaling_instances()
            .first()
            .and_then(|i| i.auto_scaling_group_name())
            .map(ToString::to_string)
            .ok_or_else(|| {
                TurndownError::ProviderUnavailable(format!(
                    "instance {instance_id} belongs to no auto-scaling group"
                ))
            })
    }

    /// Resolve the instance ID and ASG name behind a cluster node.
    async fn locate_node(&self, node_name: &str) -> TurndownResult<(String, String)> {
        let nodes: Api<Node> = Api::all(self.kube.clone());
        let node = nodes.get(node_name).await?;
        let provider_id = node
            .spec
            .as_ref()
            .and_then(|s| s.provider_id.clone())
            .unwrap_or_default();
        let instance_id = parse_instance_id(&provider_id).ok_or_else(|| {
            TurndownError::ProviderUnavailable(format!(
                "node {node_name} has no parseable providerID ({provider_id:?})"
            ))
        })?;
        let group = self.asg_for_instance(&instance_id).await?;
        Ok((instance_id, group))
    }

    /// Describe the named groups (all cluster-backing groups when empty).
    async fn describe_groups(&self, names: &[String]) -> TurndownResult<Vec<AutoScalingGroup>> {
        let mut request = self.asg.describe_auto_scaling_groups();
        for name in names {
            request = request.auto_scaling_group_names(name);
        }
        let resp = request.send().await.map_err(|e| {
            TurndownError::ProviderUnavailable(format!("DescribeAutoScalingGroups: {e}"))
        })?;
        Ok(resp.auto_scaling_groups().to_vec())
    }

    /// Names of every ASG backing a current cluster node.
    async fn cluster_group_names(&self) -> TurndownResult<Vec<String>> {
        let nodes: Api<Node> = Api::all(self.kube.clone());
        let list = nodes.list(&ListParams::default()).await?;

        let instance_ids: Vec<String> = list
            .items
            .iter()
            .filter_map(|n| n.spec.as_ref().and_then(|s| s.provider_id.as_deref()))
            .filter_map(parse_instance_id)
            .collect();

        let mut groups = BTreeSet::new();
        for chunk in instance_ids.chunks(ASG_DESCRIBE_BATCH) {
            let resp = self
                .asg
                .describe_auto_scaling_instances()
                .set_instance_ids(Some(chunk.to_vec()))
                .send()
                .await
                .map_err(|e| {
                    TurndownError::ProviderUnavailable(format!(
                        "DescribeAutoScalingInstances: {e}"
                    ))
                })?;
            for instance in resp.auto_scaling_instances() {
                if let Some(name) = instance.auto_scaling_group_name() {
                    groups.insert(name.to_string());
                }
            }
        }

        Ok(groups.into_iter().collect())
    }

    fn to_pool(group: &AutoScalingGroup) -> NodePool {
        let name = group.auto_scaling_group_name().unwrap_or_default().to_string();
        let is_turndown_pool = group.tags().iter().any(|t| {
            t.key() == Some(TURNDOWN_NODE_LABEL) && t.value() == Some(TURNDOWN_NODE_LABEL_VALUE)
        });

        NodePool {
            id: name.clone(),
            name,
            node_count: group.desired_capacity().unwrap_or(0),
            // Scaling processes are what fight a manual resize; a group with
            // nothing suspended is treated as autoscaling-enabled.
            autoscaling_enabled: group.suspended_processes().is_empty(),
            min_count: group.min_size(),
            max_count: group.max_size(),
            is_turndown_pool,
        }
    }

    /// Suspend or resume the scaling processes of one group.
    async fn set_processes_suspended(&self, group: &str, suspended: bool) -> TurndownResult<()> {
        if suspended {
            let mut request = self.asg.suspend_processes().auto_scaling_group_name(group);
            for process in SUSPENDED_PROCESSES {
                request = request.scaling_processes(process);
            }
            request.send().await.map_err(|e| {
                TurndownError::ProviderUnavailable(format!("SuspendProcesses {group}: {e}"))
            })?;
        } else {
            let mut request = self.asg.resume_processes().auto_scaling_group_name(group);
            for process in SUSPENDED_PROCESSES {
                request = request.scaling_processes(process);
            }
            request.send().await.map_err(|e| {
                TurndownError::ProviderUnavailable(format!("ResumeProcesses {group}: {e}"))
            })?;
        }
        Ok(())
    }

    /// Apply min size and desired capacity to one group.
    async fn resize_group(&self, group: &str, min: i32, desired: i32) -> TurndownResult<()> {
        self.asg
            .update_auto_scaling_group()
            .auto_scaling_group_name(group)
            .min_size(min)
            .desired_capacity(desired)
            .send()
            .await
            .map_err(|e| {
                TurndownError::ProviderUnavailable(format!("UpdateAutoScalingGroup {group}: {e}"))
            })?;
        Ok(())
    }

    fn survivor_tag(group: &str) -> TurndownResult<Tag> {
        Ok(Tag::builder()
            .key(TURNDOWN_NODE_LABEL)
            .value(TURNDOWN_NODE_LABEL_VALUE)
            .resource_id(group)
            .resource_type("auto-scaling-group")
            .propagate_at_launch(false)
            .build())
    }
}

#[async_trait]
impl TurndownProvider for AwsProvider {
    fn name(&self) -> &'static str {
        "aws"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            managed_control_plane: false,
            supports_self_host: true,
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
        _labels: &BTreeMap<String, String>,
    ) -> TurndownResult<()> {
        // Self-managed clusters keep the controller on a pinned survivor node
        // inside an existing group instead of creating a dedicated pool.
        Err(TurndownError::ProviderUnsupported(
            "self-managed AWS pins a survivor node; it does not create a turndown pool".to_string(),
        ))
    }

    async fn list_node_pools(&self) -> TurndownResult<Vec<NodePool>> {
        let names = self.cluster_group_names().await?;
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let groups = self.describe_groups(&names).await?;
        Ok(groups.iter().map(Self::to_pool).collect())
    }

    async fn pool_id_for_node(&self, node: &Node) -> TurndownResult<Option<String>> {
        let Some(instance_id) = node
            .spec
            .as_ref()
            .and_then(|s| s.provider_id.as_deref())
            .and_then(parse_instance_id)
        else {
            return Ok(None);
        };
        self.asg_for_instance(&instance_id).await.map(Some)
    }

    async fn set_node_pool_sizes(&self, pools: &[NodePool], size: i32) -> TurndownResult<()> {
        let mut failures = Vec::new();

        for pool in pools {
            if pool.autoscaling_enabled {
                if let Err(e) = self.set_processes_suspended(&pool.id, true).await {
                    warn!(group = %pool.id, error = %e, "Failed to suspend scaling processes");
                    failures.push(format!("{}: {e}", pool.id));
                    continue;
                }
            }

            match self.resize_group(&pool.id, size, size).await {
                Ok(()) => {
                    info!(group = %pool.id, size, "ASG resize accepted");
                    crate::metrics::record_pool_resized(self.name(), "down");
                }
                Err(e) => {
                    warn!(group = %pool.id, error = %e, "Failed to resize group");
                    failures.push(format!("{}: {e}", pool.id));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TurndownError::ProviderUnavailable(format!(
                "failed to resize {} of {} groups: {}",
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

        for (group, snapshot) in originals {
            let min = snapshot.min_count.unwrap_or(snapshot.node_count);
            if let Err(e) = self.resize_group(group, min, snapshot.node_count).await {
                warn!(group = %group, error = %e, "Failed to restore group");
                failures.push(format!("{group}: {e}"));
                continue;
            }
            crate::metrics::record_pool_resized(self.name(), "up");

            if snapshot.autoscaling_enabled {
                if let Err(e) = self.set_processes_suspended(group, false).await {
                    warn!(group = %group, error = %e, "Failed to resume scaling processes");
                    failures.push(format!("{group}: {e}"));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TurndownError::ProviderUnavailable(format!(
                "failed to restore {} groups: {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }

    async fn prepare_survivor_pool(&self, node_name: &str) -> TurndownResult<(String, PoolSnapshot)> {
        let (instance_id, group_name) = self.locate_node(node_name).await?;
        let group = self
            .describe_groups(&[group_name.clone()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                TurndownError::ProviderUnavailable(format!("group {group_name} disappeared"))
            })?;
        let snapshot = Self::to_pool(&group).snapshot();

        self.asg
            .create_or_update_tags()
            .tags(Self::survivor_tag(&group_name)?)
            .send()
            .await
            .map_err(|e| {
                TurndownError::ProviderUnavailable(format!("CreateOrUpdateTags {group_name}: {e}"))
            })?;

        self.asg
            .set_instance_protection()
            .auto_scaling_group_name(&group_name)
            .instance_ids(&instance_id)
            .protected_from_scale_in(true)
            .send()
            .await
            .map_err(|e| {
                TurndownError::ProviderUnavailable(format!(
                    "SetInstanceProtection {instance_id}: {e}"
                ))
            })?;

        self.set_processes_suspended(&group_name, true).await?;
        // Flatten to one node; scale-in protection keeps the host instance.
        self.resize_group(&group_name, 1, 1).await?;

        info!(group = %group_name, instance = %instance_id, "Survivor pool pinned and flattened");
        Ok((group_name, snapshot))
    }

    async fn release_survivor_pool(&self, node_name: &str) -> TurndownResult<()> {
        let (instance_id, group_name) = self.locate_node(node_name).await?;

        self.asg
            .set_instance_protection()
            .auto_scaling_group_name(&group_name)
            .instance_ids(&instance_id)
            .protected_from_scale_in(false)
            .send()
            .await
            .map_err(|e| {
                TurndownError::ProviderUnavailable(format!(
                    "SetInstanceProtection {instance_id}: {e}"
                ))
            })?;

        self.asg
            .delete_tags()
            .tags(Self::survivor_tag(&group_name)?)
            .send()
            .await
            .map_err(|e| {
                TurndownError::ProviderUnavailable(format!("DeleteTags {group_name}: {e}"))
            })?;

        info!(group = %group_name, instance = %instance_id, "Survivor pin released");
        Ok(())
    }
}

/// Parse the EC2 instance ID out of a node `providerID`
/// (`aws:///us-east-2a/i-0abc123`).
#[must_use]
pub fn parse_instance_id(provider_id: &str) -> Option<String> {
    if !provider_id.to_lowercase().starts_with("aws") {
        return None;
    }
    provider_id
        .rsplit('/')
        .next()
        .filter(|id| id.starts_with("i-"))
        .map(ToString::to_string)
}
