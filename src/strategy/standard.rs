// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Strategy for self-managed clusters (AWS auto-scaling groups).
//!
//! No cloud keeps the API server alive here, so control-plane nodes must
//! stay, and the controller stays alive on the node it already occupies:
//! that node is labeled as the turndown survivor, protected from scale-in,
//! and its auto-scaling group flattened to a single node rather than a new
//! pool being created.

use super::{Prepared, TurndownPlan, TurndownStrategy};
use crate::constants::{DRAIN_TIMEOUT_SECS, ENV_NODE_NAME};
use crate::draining;
use crate::errors::{TurndownError, TurndownResult};
use crate::labels::{TURNDOWN_NODE_LABEL, TURNDOWN_NODE_LABEL_VALUE};
use crate::provider::TurndownProvider;
use crate::reconcilers::retry::retry_provider;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::{
    api::{ListParams, Patch, PatchParams},
    Api, Client, ResourceExt,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Standard (self-managed) teardown/restore strategy.
pub struct StandardStrategy {
    client: Client,
    provider: Arc<dyn TurndownProvider>,
}

impl StandardStrategy {
    /// Create a standard strategy.
    #[must_use]
    pub fn new(client: Client, provider: Arc<dyn TurndownProvider>) -> Self {
        Self { client, provider }
    }

    /// The node this controller pod runs on, from `NODE_NAME`.
    fn host_node(&self) -> TurndownResult<String> {
        std::env::var(ENV_NODE_NAME).map_err(|_| {
            TurndownError::InvariantViolation(format!(
                "{ENV_NODE_NAME} is unset; the standard strategy cannot pin a survivor node"
            ))
        })
    }

    /// Label the host node as the turndown survivor.
    async fn label_host_node(&self, node_name: &str) -> TurndownResult<()> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let patch = json!({
            "metadata": { "labels": { TURNDOWN_NODE_LABEL: TURNDOWN_NODE_LABEL_VALUE } }
        });
        nodes
            .patch(node_name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        info!(node = node_name, "Host node labeled as turndown survivor");
        Ok(())
    }

    /// Cordon and drain every node that is neither the host nor control plane.
    async fn evacuate_cluster(&self, host_node: &str) -> TurndownResult<()> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes.list(&ListParams::default()).await?;

        for node in &list.items {
            let name = node.name_any();
            if name == host_node || draining::is_control_plane(node) {
                continue;
            }

            draining::cordon_node(&self.client, &name).await?;
            draining::drain_node(
                &self.client,
                &name,
                Duration::from_secs(DRAIN_TIMEOUT_SECS),
            )
            .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl TurndownStrategy for StandardStrategy {
    fn name(&self) -> &'static str {
        "standard"
    }

    async fn prepare_turndown(&self) -> TurndownResult<Prepared> {
        let host = self.host_node()?;

        self.label_host_node(&host).await?;

        let (pool_id, snapshot) =
            retry_provider(self.provider.name(), "prepare_survivor_pool", || {
                self.provider.prepare_survivor_pool(&host)
            })
            .await?;

        self.evacuate_cluster(&host).await?;

        let mut plan = TurndownPlan::default();
        plan.exclude_pool_ids.insert(pool_id.clone());
        plan.extra_snapshots.insert(pool_id, snapshot);
        Ok(Prepared::Ready(plan))
    }

    async fn finish_turnup(&self) -> TurndownResult<()> {
        let host = self.host_node()?;

        retry_provider(self.provider.name(), "release_survivor_pool", || {
            self.provider.release_survivor_pool(&host)
        })
        .await?;

        let uncordoned = draining::uncordon_marked_nodes(&self.client).await?;
        info!(nodes = uncordoned, "Turnup uncordon complete");
        Ok(())
    }
}
