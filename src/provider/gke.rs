// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! GKE backend over the container REST API.
//!
//! Pool identifiers are full resource paths
//! (`projects/{p}/locations/{z}/clusters/{c}/nodePools/{name}`); the cluster
//! identity is discovered once through the instance metadata service. Current
//! pool sizes are computed from cluster nodes via the
//! `cloud.google.com/gke-nodepool` label, autoscaling flags come from the
//! container API.

use super::gke_metadata::GkeMetadata;
use super::{node_has_turndown_label, NodePool, ProviderCapabilities, TurndownProvider};
use crate::constants::{CLOUD_USER_AGENT, ENV_NODE_NAME, GKE_TURNDOWN_MACHINE_TYPE, TURNDOWN_POOL_NAME};
use crate::crd::PoolSnapshot;
use crate::errors::{TurndownError, TurndownResult};
use crate::labels::{GKE_NODEPOOL_LABEL, TURNDOWN_NODE_LABEL, TURNDOWN_NODE_LABEL_VALUE};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::{api::ListParams, Api, Client};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Base URL of the container API; overridable for tests
const DEFAULT_CONTAINER_API_BASE: &str = "https://container.googleapis.com/v1";

/// GKE node-pool adapter.
pub struct GkeProvider {
    kube: Client,
    http: reqwest::Client,
    metadata: GkeMetadata,
    api_base: String,
    node_name: Option<String>,
}

impl GkeProvider {
    /// Create a GKE adapter using the given metadata client for identity
    /// discovery.
    #[must_use]
    pub fn new(kube: Client, metadata: GkeMetadata) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(CLOUD_USER_AGENT)
            .build()
            .unwrap_or_default();

        Self {
            kube,
            http,
            metadata,
            api_base: DEFAULT_CONTAINER_API_BASE.to_string(),
            node_name: std::env::var(ENV_NODE_NAME).ok(),
        }
    }

    /// The cluster's resource path, `projects/{p}/locations/{z}/clusters/{c}`.
    async fn cluster_path(&self) -> TurndownResult<String> {
        let project = self.metadata.project_id().await;
        let zone = self.metadata.zone().await;
        let cluster = self.metadata.cluster_name().await;

        if project.is_empty() || zone.is_empty() || cluster.is_empty() {
            return Err(TurndownError::ProviderUnavailable(format!(
                "incomplete GKE identity: project={project:?} zone={zone:?} cluster={cluster:?}"
            )));
        }

        Ok(format!("projects/{project}/locations/{zone}/clusters/{cluster}"))
    }

    /// Issue an authenticated GET against the container API.
    async fn api_get(&self, path: &str) -> TurndownResult<Value> {
        let token = self.metadata.access_token().await?;
        let url = format!("{}/{path}", self.api_base);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| TurndownError::ProviderUnavailable(format!("GET {path}: {e}")))?;

        Self::into_json(path, resp).await
    }

    /// Issue an authenticated POST against the container API.
    async fn api_post(&self, path: &str, body: &Value) -> TurndownResult<Value> {
        let token = self.metadata.access_token().await?;
        let url = format!("{}/{path}", self.api_base);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| TurndownError::ProviderUnavailable(format!("POST {path}: {e}")))?;

        Self::into_json(path, resp).await
    }

    /// Decode a container API response, mapping HTTP errors onto the error
    /// taxonomy (409 means the resource already exists).
    async fn into_json(path: &str, resp: reqwest::Response) -> TurndownResult<Value> {
        let status = resp.status();
        if status == reqwest::StatusCode::CONFLICT {
            return Err(TurndownError::AlreadyExists(path.to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TurndownError::ProviderUnavailable(format!(
                "{path}: HTTP {status}: {body}"
            )));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| TurndownError::ProviderUnavailable(format!("{path}: {e}")))
    }

    /// Count Ready-or-not cluster nodes per GKE node pool name.
    async fn node_counts_by_pool(&self) -> TurndownResult<BTreeMap<String, i32>> {
        let nodes: Api<Node> = Api::all(self.kube.clone());
        let list = nodes.list(&ListParams::default()).await?;

        let mut counts: BTreeMap<String, i32> = BTreeMap::new();
        for node in list.items {
            if let Some(pool) = node
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(GKE_NODEPOOL_LABEL))
            {
                *counts.entry(pool.clone()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    /// Parse one `nodePools[]` entry from the container API.
    fn parse_pool(cluster_path: &str, pool: &Value, node_counts: &BTreeMap<String, i32>) -> Option<NodePool> {
        let name = pool.get("name")?.as_str()?.to_string();
        let autoscaling = pool.get("autoscaling");
        let autoscaling_enabled = autoscaling
            .and_then(|a| a.get("enabled"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let min_count = autoscaling
            .and_then(|a| a.get("minNodeCount"))
            .and_then(Value::as_i64)
            .map(|v| v as i32);
        let max_count = autoscaling
            .and_then(|a| a.get("maxNodeCount"))
            .and_then(Value::as_i64)
            .map(|v| v as i32);
        let is_turndown_pool = pool
            .pointer(&format!("/config/labels/{TURNDOWN_NODE_LABEL}"))
            .and_then(Value::as_str)
            .is_some_and(|v| v == TURNDOWN_NODE_LABEL_VALUE);

        let node_count = node_counts.get(&name).copied().unwrap_or_else(|| {
            pool.get("initialNodeCount")
                .and_then(Value::as_i64)
                .unwrap_or(0) as i32
        });

        Some(NodePool {
            id: format!("{cluster_path}/nodePools/{name}"),
            name,
            node_count,
            autoscaling_enabled,
            min_count,
            max_count,
            is_turndown_pool,
        })
    }
}

#[async_trait]
impl TurndownProvider for GkeProvider {
    fn name(&self) -> &'static str {
        "gke"
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
        let cluster_path = self.cluster_path().await?;

        // A labeled pool from a previous cycle is reused as-is.
        let existing = self.list_node_pools().await?;
        if let Some(pool) = existing.iter().find(|p| p.is_turndown_pool) {
            return Err(TurndownError::AlreadyExists(pool.id.clone()));
        }

        let pool_labels = crate::labels::turndown_pool_labels(labels);
        let body = json!({
            "nodePool": {
                "name": TURNDOWN_POOL_NAME,
                "initialNodeCount": 1,
                "config": {
                    "machineType": GKE_TURNDOWN_MACHINE_TYPE,
                    "labels": pool_labels,
                },
            }
        });

        info!(cluster = %cluster_path, "Creating GKE turndown node pool");
        self.api_post(&format!("{cluster_path}/nodePools"), &body)
            .await?;
        Ok(())
    }

    async fn list_node_pools(&self) -> TurndownResult<Vec<NodePool>> {
        let cluster_path = self.cluster_path().await?;
        let node_counts = self.node_counts_by_pool().await?;
        let body = self.api_get(&format!("{cluster_path}/nodePools")).await?;

        let pools = body
            .get("nodePools")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|p| Self::parse_pool(&cluster_path, p, &node_counts))
                    .collect()
            })
            .unwrap_or_default();

        Ok(pools)
    }

    async fn pool_id_for_node(&self, node: &Node) -> TurndownResult<Option<String>> {
        let Some(pool) = node
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(GKE_NODEPOOL_LABEL))
        else {
            return Ok(None);
        };
        let cluster_path = self.cluster_path().await?;
        Ok(Some(format!("{cluster_path}/nodePools/{pool}")))
    }

    async fn set_node_pool_sizes(&self, pools: &[NodePool], size: i32) -> TurndownResult<()> {
        let mut failures = Vec::new();

        for pool in pools {
            if pool.autoscaling_enabled {
                debug!(pool = %pool.name, "Disabling GKE pool autoscaling before resize");
                let body = json!({ "autoscaling": { "enabled": false } });
                if let Err(e) = self
                    .api_post(&format!("{}:setAutoscaling", pool.id), &body)
                    .await
                {
                    warn!(pool = %pool.name, error = %e, "Failed to disable autoscaling");
                    failures.push(format!("{}: {e}", pool.name));
                    continue;
                }
            }

            let body = json!({ "nodeCount": size });
            match self.api_post(&format!("{}:setSize", pool.id), &body).await {
                Ok(_) => {
                    info!(pool = %pool.name, size, "GKE pool resize accepted");
                    crate::metrics::record_pool_resized(self.name(), "down");
                }
                Err(e) => {
                    warn!(pool = %pool.name, error = %e, "Failed to resize pool");
                    failures.push(format!("{}: {e}", pool.name));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TurndownError::ProviderUnavailable(format!(
                "failed to resize {} of {} pools: {}",
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

        for (pool_id, snapshot) in originals {
            let body = json!({ "nodeCount": snapshot.node_count });
            if let Err(e) = self.api_post(&format!("{pool_id}:setSize"), &body).await {
                warn!(pool = %pool_id, error = %e, "Failed to restore pool size");
                failures.push(format!("{pool_id}: {e}"));
                continue;
            }
            crate::metrics::record_pool_resized(self.name(), "up");

            if snapshot.autoscaling_enabled {
                let body = json!({
                    "autoscaling": {
                        "enabled": true,
                        "minNodeCount": snapshot.min_count.unwrap_or(0),
                        "maxNodeCount": snapshot.max_count.unwrap_or(snapshot.node_count),
                    }
                });
                if let Err(e) = self
                    .api_post(&format!("{pool_id}:setAutoscaling"), &body)
                    .await
                {
                    warn!(pool = %pool_id, error = %e, "Failed to re-enable autoscaling");
                    failures.push(format!("{pool_id}: {e}"));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TurndownError::ProviderUnavailable(format!(
                "failed to restore {} pools: {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }
}
