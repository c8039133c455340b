// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Durable persistence for the turndown schedule.
//!
//! The schedule lives exclusively in the cluster-scoped `TurndownSchedule`
//! resource; durability is the orchestrator's problem, so the controller
//! needs no recovery logic beyond reading the schedule back after a restart.
//!
//! Status writes use optimistic concurrency: the resource is re-read, the
//! status replaced against the observed `resourceVersion`, and a write
//! conflict retried once before surfacing `ConcurrentModification`.

use crate::crd::{TurndownSchedule, TurndownScheduleStatus};
use crate::errors::{TurndownError, TurndownResult};
use async_trait::async_trait;
use chrono::Utc;
use kube::{
    api::{ListParams, PostParams},
    Api, Client, ResourceExt,
};
use tracing::{debug, warn};

/// Persistence seam for the schedule singleton.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// The authoritative schedule, or `None` when none exists.
    ///
    /// When several schedules exist, the lexicographically-first by name is
    /// authoritative; the reconciler fails the rest.
    async fn get(&self) -> TurndownResult<Option<TurndownSchedule>>;

    /// Replace the status of the named schedule.
    ///
    /// Stamps `lastUpdated` and returns the stored object.
    async fn update_status(
        &self,
        name: &str,
        status: TurndownScheduleStatus,
    ) -> TurndownResult<TurndownSchedule>;
}

/// Store backed by the Kubernetes API.
pub struct KubernetesScheduleStore {
    client: Client,
}

impl KubernetesScheduleStore {
    /// Create a store over the given client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self) -> Api<TurndownSchedule> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl ScheduleStore for KubernetesScheduleStore {
    async fn get(&self) -> TurndownResult<Option<TurndownSchedule>> {
        let list = self.api().list(&ListParams::default()).await?;
        let mut items = list.items;
        items.sort_by_key(|s| s.name_any());
        Ok(items.into_iter().next())
    }

    async fn update_status(
        &self,
        name: &str,
        status: TurndownScheduleStatus,
    ) -> TurndownResult<TurndownSchedule> {
        let api = self.api();
        let mut status = status;
        status.last_updated = Some(Utc::now().to_rfc3339());

        // One conflict retry: re-read, reapply, write again.
        for attempt in 0..2 {
            let mut current = api.get(name).await?;
            current.status = Some(status.clone());
            current.metadata.managed_fields = None;

            let body = serde_json::to_vec(&current).map_err(|e| {
                TurndownError::InvariantViolation(format!("schedule serialization failed: {e}"))
            })?;

            match api
                .replace_status(name, &PostParams::default(), body)
                .await
            {
                Ok(updated) => {
                    debug!(schedule = name, "Schedule status updated");
                    return Ok(updated);
                }
                Err(kube::Error::Api(api_err)) if api_err.code == 409 && attempt == 0 => {
                    warn!(schedule = name, "Write conflict on schedule status, retrying once");
                }
                Err(kube::Error::Api(api_err)) if api_err.code == 409 => {
                    return Err(TurndownError::ConcurrentModification);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(TurndownError::ConcurrentModification)
    }
}

/// In-memory store used by scheduler and manager tests.
#[cfg(test)]
pub struct MemoryScheduleStore {
    schedule: std::sync::Mutex<Option<TurndownSchedule>>,
}

#[cfg(test)]
impl MemoryScheduleStore {
    /// A store holding the given schedule.
    pub fn with(schedule: Option<TurndownSchedule>) -> Self {
        Self {
            schedule: std::sync::Mutex::new(schedule),
        }
    }

    /// Snapshot of the stored schedule.
    pub fn current(&self) -> Option<TurndownSchedule> {
        self.schedule.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl ScheduleStore for MemoryScheduleStore {
    async fn get(&self) -> TurndownResult<Option<TurndownSchedule>> {
        Ok(self.schedule.lock().unwrap().clone())
    }

    async fn update_status(
        &self,
        name: &str,
        status: TurndownScheduleStatus,
    ) -> TurndownResult<TurndownSchedule> {
        let mut guard = self.schedule.lock().unwrap();
        let Some(schedule) = guard.as_mut() else {
            return Err(TurndownError::ConcurrentModification);
        };
        if schedule.name_any() != name {
            return Err(TurndownError::ConcurrentModification);
        }
        let mut status = status;
        status.last_updated = Some(Utc::now().to_rfc3339());
        schedule.status = Some(status);
        Ok(schedule.clone())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod store_tests;
