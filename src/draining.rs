// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Node cordon, drain, and uncordon primitives.
//!
//! Draining goes through the eviction subresource so `PodDisruptionBudget`s
//! are honoured: a budget-blocked eviction answers 429 and is retried until
//! the drain deadline, after which the turndown aborts with
//! `DrainBudgetExceeded` and the cluster left partially cordoned (a
//! recoverable, not rolled-back, state).
//!
//! Every node this controller cordons is marked with the
//! `turndown.firestoned.io/cordoned` annotation so that turnup uncordons
//! exactly the nodes turndown touched.

use crate::constants::{DRAIN_POLL_INTERVAL_SECS, EVICTION_RETRY_INTERVAL_SECS};
use crate::errors::{TurndownError, TurndownResult};
use crate::labels::{CONTROL_PLANE_LABELS, CORDONED_ANNOTATION, MIRROR_POD_ANNOTATION};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::{
    api::{EvictParams, ListParams, Patch, PatchParams},
    Api, Client, ResourceExt,
};
use serde_json::json;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Mark a node unschedulable and annotate it as cordoned by this controller.
///
/// # Errors
///
/// Surfaces Kubernetes API errors.
pub async fn cordon_node(client: &Client, node_name: &str) -> TurndownResult<()> {
    let nodes: Api<Node> = Api::all(client.clone());
    let patch = json!({
        "metadata": { "annotations": { CORDONED_ANNOTATION: "true" } },
        "spec": { "unschedulable": true },
    });
    nodes
        .patch(node_name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    info!(node = node_name, "Cordoned node");
    Ok(())
}

/// Mark a node schedulable again and clear the cordon annotation.
///
/// # Errors
///
/// Surfaces Kubernetes API errors.
pub async fn uncordon_node(client: &Client, node_name: &str) -> TurndownResult<()> {
    let nodes: Api<Node> = Api::all(client.clone());
    let patch = json!({
        "metadata": { "annotations": { CORDONED_ANNOTATION: null } },
        "spec": { "unschedulable": false },
    });
    nodes
        .patch(node_name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    info!(node = node_name, "Uncordoned node");
    Ok(())
}

/// Uncordon every node still carrying the cordon annotation.
///
/// Nodes that were resized away since the cordon simply no longer appear.
/// Returns how many nodes were uncordoned.
///
/// # Errors
///
/// Surfaces Kubernetes API errors.
pub async fn uncordon_marked_nodes(client: &Client) -> TurndownResult<u32> {
    let nodes: Api<Node> = Api::all(client.clone());
    let list = nodes.list(&ListParams::default()).await?;

    let mut count = 0;
    for node in &list.items {
        let marked = node
            .metadata
            .annotations
            .as_ref()
            .is_some_and(|a| a.contains_key(CORDONED_ANNOTATION));
        if marked {
            uncordon_node(client, &node.name_any()).await?;
            count += 1;
        }
    }
    Ok(count)
}

/// Whether a pod must be evicted as part of a drain.
///
/// Mirror pods and `DaemonSet`-owned pods are left alone (they come back on
/// any schedulable node anyway), as are pods that already ran to completion.
#[must_use]
pub fn is_drainable(pod: &Pod) -> bool {
    let is_mirror = pod
        .metadata
        .annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(MIRROR_POD_ANNOTATION));
    if is_mirror {
        return false;
    }

    let daemonset_owned = pod
        .metadata
        .owner_references
        .as_ref()
        .is_some_and(|owners| owners.iter().any(|o| o.kind == "DaemonSet"));
    if daemonset_owned {
        return false;
    }

    let phase = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or_default();
    !matches!(phase, "Succeeded" | "Failed")
}

/// Whether a node carries a control-plane role label.
#[must_use]
pub fn is_control_plane(node: &Node) -> bool {
    node.metadata.labels.as_ref().is_some_and(|labels| {
        CONTROL_PLANE_LABELS
            .iter()
            .any(|role| labels.contains_key(*role))
    })
}

/// Whether the node reports a `Ready=True` condition.
#[must_use]
pub fn node_is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// Drainable pods currently scheduled on a node.
async fn pods_on_node(client: &Client, node_name: &str) -> TurndownResult<Vec<Pod>> {
    let pods: Api<Pod> = Api::all(client.clone());
    let params = ListParams::default().fields(&format!("spec.nodeName={node_name}"));
    let list = pods.list(&params).await?;
    Ok(list.items.into_iter().filter(is_drainable).collect())
}

/// Evict every drainable pod from a node and wait for them to terminate.
///
/// The node must already be cordoned, or evicted pods may land right back.
///
/// # Errors
///
/// Returns [`TurndownError::DrainBudgetExceeded`] when evictions stay blocked
/// or pods fail to terminate within `deadline`; surfaces other API errors.
pub async fn drain_node(client: &Client, node_name: &str, deadline: Duration) -> TurndownResult<()> {
    let started = Instant::now();

    let targets = pods_on_node(client, node_name).await?;
    debug!(node = node_name, pods = targets.len(), "Draining node");

    for pod in &targets {
        let namespace = pod.namespace().unwrap_or_default();
        let name = pod.name_any();
        let namespaced: Api<Pod> = Api::namespaced(client.clone(), &namespace);

        loop {
            match namespaced.evict(&name, &EvictParams::default()).await {
                Ok(_) => {
                    debug!(pod = %name, namespace = %namespace, "Evicted pod");
                    break;
                }
                // A PodDisruptionBudget holding the eviction back answers 429.
                Err(kube::Error::Api(api_err)) if api_err.code == 429 => {
                    if started.elapsed() >= deadline {
                        return Err(TurndownError::DrainBudgetExceeded {
                            node: node_name.to_string(),
                            reason: format!(
                                "disruption budget still blocks {namespace}/{name}: {}",
                                api_err.message
                            ),
                        });
                    }
                    warn!(
                        pod = %name,
                        namespace = %namespace,
                        "Eviction blocked by disruption budget, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(EVICTION_RETRY_INTERVAL_SECS)).await;
                }
                // Already gone is fine.
                Err(kube::Error::Api(api_err)) if api_err.code == 404 => break,
                Err(e) => return Err(e.into()),
            }
        }
    }

    // Wait for the evicted pods to actually terminate.
    loop {
        let remaining = pods_on_node(client, node_name).await?;
        if remaining.is_empty() {
            break;
        }
        if started.elapsed() >= deadline {
            return Err(TurndownError::DrainBudgetExceeded {
                node: node_name.to_string(),
                reason: format!("{} pods still terminating", remaining.len()),
            });
        }
        debug!(
            node = node_name,
            remaining = remaining.len(),
            "Waiting for pods to terminate"
        );
        tokio::time::sleep(Duration::from_secs(DRAIN_POLL_INTERVAL_SECS)).await;
    }

    crate::metrics::record_node_drained();
    info!(node = node_name, "Node drained");
    Ok(())
}

/// Wait until some node matching `label_selector` reports Ready, returning
/// its name.
///
/// # Errors
///
/// Returns [`TurndownError::ProviderUnavailable`] when no matching node is
/// Ready within `deadline`.
pub async fn wait_for_labeled_node_ready(
    client: &Client,
    label_selector: &str,
    deadline: Duration,
) -> TurndownResult<String> {
    let nodes: Api<Node> = Api::all(client.clone());
    let params = ListParams::default().labels(label_selector);
    let started = Instant::now();

    loop {
        let list = nodes.list(&params).await?;
        if let Some(ready) = list.items.iter().find(|n| node_is_ready(n)) {
            return Ok(ready.name_any());
        }

        if started.elapsed() >= deadline {
            return Err(TurndownError::ProviderUnavailable(format!(
                "no Ready node matching {label_selector:?} after {}s",
                deadline.as_secs()
            )));
        }
        debug!(selector = label_selector, "Waiting for a Ready node");
        tokio::time::sleep(Duration::from_secs(
            crate::constants::NODE_READY_POLL_INTERVAL_SECS,
        ))
        .await;
    }
}

#[cfg(test)]
#[path = "draining_tests.rs"]
mod draining_tests;
