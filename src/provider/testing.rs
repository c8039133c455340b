// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory provider used by state-machine and invariant tests.

use super::{NodePool, ProviderCapabilities, TurndownProvider};
use crate::crd::PoolSnapshot;
use crate::errors::{TurndownError, TurndownResult};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

/// A fake cloud: a mutable set of pools plus failure injection.
pub struct FakeProvider {
    pools: Mutex<BTreeMap<String, NodePool>>,
    capabilities: ProviderCapabilities,
    on_turndown_node: AtomicBool,
    /// Number of upcoming mutations that fail with `ProviderUnavailable`
    transient_failures: AtomicU32,
    /// Mutation counter, for asserting call volume
    pub mutations: AtomicU32,
}

impl FakeProvider {
    /// A masterless fake with the given pools.
    pub fn masterless(pools: Vec<NodePool>) -> Self {
        Self {
            pools: Mutex::new(pools.into_iter().map(|p| (p.id.clone(), p)).collect()),
            capabilities: ProviderCapabilities {
                managed_control_plane: true,
                supports_self_host: false,
            },
            on_turndown_node: AtomicBool::new(true),
            transient_failures: AtomicU32::new(0),
            mutations: AtomicU32::new(0),
        }
    }

    /// Make the next `n` mutations fail with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    /// Simulate the controller pod sitting on / off the turndown node.
    pub fn set_on_turndown_node(&self, on: bool) {
        self.on_turndown_node.store(on, Ordering::SeqCst);
    }

    /// Current pool state, keyed by id.
    pub fn pools(&self) -> BTreeMap<String, NodePool> {
        self.pools.lock().unwrap().clone()
    }

    /// Build a plain pool for tests.
    pub fn pool(id: &str, node_count: i32, min: i32, max: i32, autoscaling: bool) -> NodePool {
        NodePool {
            name: id.to_string(),
            id: id.to_string(),
            node_count,
            autoscaling_enabled: autoscaling,
            min_count: Some(min),
            max_count: Some(max),
            is_turndown_pool: false,
        }
    }

    fn maybe_fail(&self) -> TurndownResult<()> {
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TurndownError::ProviderUnavailable(
                "injected transient failure".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl TurndownProvider for FakeProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities
    }

    async fn is_turndown_node_pool(&self) -> TurndownResult<bool> {
        Ok(self.on_turndown_node.load(Ordering::SeqCst))
    }

    async fn create_singleton_node_pool(
        &self,
        _labels: &BTreeMap<String, String>,
    ) -> TurndownResult<()> {
        let mut pools = self.pools.lock().unwrap();
        if pools.values().any(|p| p.is_turndown_pool) {
            return Err(TurndownError::AlreadyExists("cluster-turndown".to_string()));
        }
        pools.insert(
            "cluster-turndown".to_string(),
            NodePool {
                name: "cluster-turndown".to_string(),
                id: "cluster-turndown".to_string(),
                node_count: 1,
                autoscaling_enabled: false,
                min_count: None,
                max_count: None,
                is_turndown_pool: true,
            },
        );
        Ok(())
    }

    async fn list_node_pools(&self) -> TurndownResult<Vec<NodePool>> {
        Ok(self.pools.lock().unwrap().values().cloned().collect())
    }

    async fn pool_id_for_node(&self, node: &Node) -> TurndownResult<Option<String>> {
        Ok(node
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get("pool"))
            .cloned())
    }

    async fn set_node_pool_sizes(&self, pools: &[NodePool], size: i32) -> TurndownResult<()> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail()?;

        let mut state = self.pools.lock().unwrap();
        for pool in pools {
            if let Some(entry) = state.get_mut(&pool.id) {
                entry.node_count = size;
                entry.autoscaling_enabled = false;
            }
        }
        Ok(())
    }

    async fn reset_node_pool_sizes(
        &self,
        originals: &BTreeMap<String, PoolSnapshot>,
    ) -> TurndownResult<()> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail()?;

        let mut state = self.pools.lock().unwrap();
        for (id, snapshot) in originals {
            if let Some(entry) = state.get_mut(id) {
                entry.node_count = snapshot.node_count;
                entry.min_count = snapshot.min_count;
                entry.max_count = snapshot.max_count;
                entry.autoscaling_enabled = snapshot.autoscaling_enabled;
            }
        }
        Ok(())
    }
}
