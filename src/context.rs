// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context passed to the controller and the HTTP surface.

use crate::manager::TurndownManager;
use crate::scheduler::TurndownScheduler;
use crate::store::ScheduleStore;
use kube::Client;
use std::sync::Arc;

/// Everything a reconciliation needs: the Kubernetes client, the schedule
/// store, the timer-owning scheduler, and the single-flight manager.
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client for API operations
    pub client: Client,

    /// Durable schedule persistence
    pub store: Arc<dyn ScheduleStore>,

    /// Owner of the single outstanding timer
    pub scheduler: Arc<TurndownScheduler>,

    /// Single-flight strategy executor
    pub manager: Arc<TurndownManager>,
}
