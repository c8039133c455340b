// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Physical teardown/restore strategies.
//!
//! A strategy prepares the cluster for the manager's resize: it secures a
//! place for the controller to live (a dedicated turndown pool on managed
//! control planes, a pinned survivor node on self-managed clusters), then
//! cordons and drains everything else. Strategy selection is a pure function
//! of the provider's capability declaration, never of its concrete type.

pub mod masterless;
pub mod standard;

use crate::crd::PoolSnapshot;
use crate::errors::{TurndownError, TurndownResult};
use crate::provider::TurndownProvider;
use async_trait::async_trait;
use kube::Client;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// What the manager must know after a strategy prepared the cluster.
#[derive(Debug, Default)]
pub struct TurndownPlan {
    /// Pools the manager must not zero (beyond the turndown pool itself)
    pub exclude_pool_ids: BTreeSet<String>,

    /// Snapshots the strategy already recorded, merged into the
    /// original-sizes map (e.g. the flattened survivor pool)
    pub extra_snapshots: BTreeMap<String, PoolSnapshot>,
}

/// Outcome of preparing a turndown.
#[derive(Debug)]
pub enum Prepared {
    /// The controller deployment was repinned to the turndown node and the
    /// pod is about to move; the schedule stays due so the restarted pod
    /// re-enters the turndown and proceeds from persisted state.
    Relocating,

    /// The cluster is cordoned and drained; the manager may resize.
    Ready(TurndownPlan),
}

/// The physical teardown/restore sequence for one provider class.
#[async_trait]
pub trait TurndownStrategy: Send + Sync {
    /// Strategy name for logs.
    fn name(&self) -> &'static str;

    /// Secure the controller's survival, then cordon and drain every node
    /// that is about to be resized away.
    async fn prepare_turndown(&self) -> TurndownResult<Prepared>;

    /// Reverse the strategy-owned turndown steps after pools are restored
    /// (uncordon; release survivor pins). The turndown pool is left in place
    /// for the next cycle.
    async fn finish_turnup(&self) -> TurndownResult<()>;
}

/// The strategy family a capability declaration maps onto.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrategyKind {
    /// Managed control plane: dedicated turndown pool
    Masterless,
    /// Self-managed: pinned survivor node
    Standard,
}

/// Map a capability declaration onto a strategy family.
///
/// Managed control planes take the masterless path; self-hosting providers
/// take the standard path. A provider declaring neither cannot be turned
/// down safely.
///
/// # Errors
///
/// Returns [`TurndownError::ProviderUnsupported`] when no strategy fits the
/// declared capabilities.
pub fn strategy_kind_for(
    capabilities: crate::provider::ProviderCapabilities,
) -> TurndownResult<StrategyKind> {
    if capabilities.managed_control_plane {
        Ok(StrategyKind::Masterless)
    } else if capabilities.supports_self_host {
        Ok(StrategyKind::Standard)
    } else {
        Err(TurndownError::ProviderUnsupported(
            "provider declares neither a managed control plane nor self-hosting".to_string(),
        ))
    }
}

/// Select and construct a strategy from the provider's capability
/// declaration.
///
/// # Errors
///
/// Returns [`TurndownError::ProviderUnsupported`] when no strategy fits the
/// declared capabilities.
pub fn strategy_for_capabilities(
    client: Client,
    provider: Arc<dyn TurndownProvider>,
) -> TurndownResult<Arc<dyn TurndownStrategy>> {
    match strategy_kind_for(provider.capabilities())? {
        StrategyKind::Masterless => Ok(Arc::new(masterless::MasterlessStrategy::new(
            client,
            provider,
            BTreeMap::new(),
        ))),
        StrategyKind::Standard => Ok(Arc::new(standard::StandardStrategy::new(client, provider))),
    }
}

#[cfg(test)]
#[path = "strategy_tests.rs"]
mod strategy_tests;
