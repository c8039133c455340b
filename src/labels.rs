// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common label and annotation constants used across the controller.
//!
//! This module defines the turndown node label, standard Kubernetes labels,
//! and the provider-specific labels used to associate nodes with node pools.

use std::collections::BTreeMap;

// ============================================================================
// Turndown Labels
// ============================================================================

/// Label carried by every node in the turndown pool
pub const TURNDOWN_NODE_LABEL: &str = "cluster-turndown-node";

/// Value of the turndown node label
pub const TURNDOWN_NODE_LABEL_VALUE: &str = "true";

/// Canonical selector for locating turndown pool nodes
pub const TURNDOWN_NODE_LABEL_SELECTOR: &str = "cluster-turndown-node=true";

/// Annotation placed on nodes the controller cordons, so turnup uncordons
/// exactly the nodes this controller touched
pub const CORDONED_ANNOTATION: &str = "turndown.firestoned.io/cordoned";

/// Finalizer on `TurndownSchedule` resources; guarantees a cluster that is
/// down is scaled back up before the schedule disappears
pub const FINALIZER_TURNDOWN_SCHEDULE: &str = "turndownschedule.turndown.firestoned.io/finalizer";

// ============================================================================
// Kubernetes Standard Labels
// https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
// ============================================================================

/// Standard label for the tool being used to manage the operation of an application
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Standard label for the name of a higher-level application this one is part of
pub const K8S_PART_OF: &str = "app.kubernetes.io/part-of";

/// Value for `app.kubernetes.io/managed-by` on resources this controller creates
pub const MANAGED_BY_TURNDOWN: &str = "cluster-turndown";

// ============================================================================
// Provider Node Labels
// ============================================================================

/// GKE node label carrying the owning node pool name
pub const GKE_NODEPOOL_LABEL: &str = "cloud.google.com/gke-nodepool";

/// EKS node label carrying the owning managed node-group name
pub const EKS_NODEGROUP_LABEL: &str = "eks.amazonaws.com/nodegroup";

/// eksctl-provisioned clusters carry their cluster name on every node
pub const EKSCTL_CLUSTER_LABEL: &str = "alpha.eksctl.io/cluster-name";

/// Control-plane node role labels; nodes carrying either are never drained
pub const CONTROL_PLANE_LABELS: [&str; 2] = [
    "node-role.kubernetes.io/control-plane",
    "node-role.kubernetes.io/master",
];

/// Annotation identifying static mirror pods, which cannot be evicted
pub const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

/// Build the label set applied to the turndown node pool: the turndown marker
/// merged over any caller-provided labels.
#[must_use]
pub fn turndown_pool_labels(extra: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut labels = extra.clone();
    labels.insert(
        TURNDOWN_NODE_LABEL.to_string(),
        TURNDOWN_NODE_LABEL_VALUE.to_string(),
    );
    labels.insert(K8S_MANAGED_BY.to_string(), MANAGED_BY_TURNDOWN.to_string());
    labels
}

#[cfg(test)]
#[path = "labels_tests.rs"]
mod labels_tests;
