// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Strategy for clusters with a cloud-managed control plane (GKE, EKS).
//!
//! The cloud keeps the API server alive no matter what happens to the node
//! pools, so the controller only needs one schedulable node for itself: a
//! dedicated singleton "turndown pool". Scaledown is a two-visit affair.
//! On the first visit the controller creates the pool and repins its own
//! Deployment onto it (the pod moves, the process restarts); on the second
//! visit, now running on the turndown node, it cordons and drains the rest
//! of the cluster so the manager can zero every other pool.

use super::{Prepared, TurndownPlan, TurndownStrategy};
use crate::constants::{
    DEFAULT_DEPLOYMENT_NAME, DEFAULT_NAMESPACE, DRAIN_TIMEOUT_SECS, ENV_DEPLOYMENT_NAME,
    ENV_POD_NAMESPACE, NODE_READY_TIMEOUT_SECS,
};
use crate::draining;
use crate::errors::{TurndownError, TurndownResult};
use crate::labels::{TURNDOWN_NODE_LABEL, TURNDOWN_NODE_LABEL_SELECTOR, TURNDOWN_NODE_LABEL_VALUE};
use crate::provider::TurndownProvider;
use crate::reconcilers::retry::retry_provider;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Node;
use kube::{
    api::{ListParams, Patch, PatchParams},
    Api, Client, ResourceExt,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Masterless teardown/restore strategy.
pub struct MasterlessStrategy {
    client: Client,
    provider: Arc<dyn TurndownProvider>,
    pool_labels: BTreeMap<String, String>,
}

impl MasterlessStrategy {
    /// Create a masterless strategy; `pool_labels` are merged into the
    /// turndown pool's node labels.
    #[must_use]
    pub fn new(
        client: Client,
        provider: Arc<dyn TurndownProvider>,
        pool_labels: BTreeMap<String, String>,
    ) -> Self {
        Self {
            client,
            provider,
            pool_labels,
        }
    }

    /// Ensure the singleton turndown pool exists; an existing pool is reused.
    async fn ensure_turndown_pool(&self) -> TurndownResult<()> {
        let result = retry_provider(self.provider.name(), "create_singleton_node_pool", || {
            self.provider.create_singleton_node_pool(&self.pool_labels)
        })
        .await;

        match result {
            Ok(()) => {
                info!("Turndown node pool created");
                Ok(())
            }
            Err(TurndownError::AlreadyExists(pool)) => {
                debug!(pool = %pool, "Reusing existing turndown node pool");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Repin the controller's own Deployment onto the turndown pool.
    ///
    /// The rescheduled pod resumes from the persisted schedule, so no state
    /// is lost across the move.
    async fn relocate_controller(&self) -> TurndownResult<()> {
        let namespace =
            std::env::var(ENV_POD_NAMESPACE).unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string());
        let name = std::env::var(ENV_DEPLOYMENT_NAME)
            .unwrap_or_else(|_| DEFAULT_DEPLOYMENT_NAME.to_string());

        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), &namespace);
        let patch = json!({
            "spec": {
                "template": {
                    "spec": {
                        "nodeSelector": { TURNDOWN_NODE_LABEL: TURNDOWN_NODE_LABEL_VALUE }
                    }
                }
            }
        });

        deployments
            .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        info!(
            deployment = %name,
            namespace = %namespace,
            "Controller repinned to the turndown node; pod will be rescheduled"
        );
        Ok(())
    }

    /// Cordon and drain every node outside the turndown pool.
    async fn evacuate_cluster(&self) -> TurndownResult<()> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes.list(&ListParams::default()).await?;

        for node in &list.items {
            let is_turndown_node = node
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(TURNDOWN_NODE_LABEL))
                .is_some_and(|v| v == TURNDOWN_NODE_LABEL_VALUE);
            if is_turndown_node {
                continue;
            }

            let name = node.name_any();
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
impl TurndownStrategy for MasterlessStrategy {
    fn name(&self) -> &'static str {
        "masterless"
    }

    async fn prepare_turndown(&self) -> TurndownResult<Prepared> {
        if !self.provider.is_turndown_node_pool().await? {
            self.ensure_turndown_pool().await?;
            draining::wait_for_labeled_node_ready(
                &self.client,
                TURNDOWN_NODE_LABEL_SELECTOR,
                Duration::from_secs(NODE_READY_TIMEOUT_SECS),
            )
            .await?;
            self.relocate_controller().await?;
            return Ok(Prepared::Relocating);
        }

        self.evacuate_cluster().await?;
        Ok(Prepared::Ready(TurndownPlan::default()))
    }

    async fn finish_turnup(&self) -> TurndownResult<()> {
        let uncordoned = draining::uncordon_marked_nodes(&self.client).await?;
        info!(nodes = uncordoned, "Turnup uncordon complete");
        Ok(())
    }
}
