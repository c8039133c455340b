// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Turndown manager: serializes strategy invocations and owns the
//! original-sizes map.
//!
//! The manager is a small state machine guarded by a mutex:
//!
//! ```text
//!   IDLE ──scale_down()──▶ TURNING_DOWN ──success──▶ DOWN
//!    ▲                          │                      │
//!    │                          │ fail                 │ scale_up()
//!    │                          ▼                      ▼
//!    └──────────── IDLE ◀── FAILED           TURNING_UP ──success──▶ IDLE
//!                                                 │ fail
//!                                                 ▼
//!                                              FAILED
//! ```
//!
//! Re-entering `scale_down` while turning down or already down is a no-op
//! that reports success, as is `scale_up` from idle; a new operation resets
//! a failed manager. Pre-scaledown pool shapes are persisted into the
//! schedule status *before* any resize is issued, so a controller restart
//! mid-turndown resumes from durable state.

use crate::crd::{PoolSnapshot, TurndownScheduleStatus};
use crate::errors::{TurndownError, TurndownResult};
use crate::provider::TurndownProvider;
use crate::reconcilers::retry::retry_provider;
use crate::store::ScheduleStore;
use crate::strategy::{Prepared, TurndownStrategy};
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Manager lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManagerState {
    /// No turndown in effect
    Idle,
    /// A scaledown is in flight
    TurningDown,
    /// The cluster is scaled down
    Down,
    /// A scaleup is in flight
    TurningUp,
    /// The last operation failed; the next operation resets
    Failed,
}

/// Outcome of a scaledown request.
#[derive(Debug, PartialEq, Eq)]
pub enum ScaleDownOutcome {
    /// Every non-turndown pool is at zero
    Completed,
    /// The controller repinned itself and the pod is about to move; retry
    /// after the restart
    Relocating,
    /// A scaledown was already in flight or complete
    AlreadyDown,
}

/// Outcome of a scaleup request.
#[derive(Debug, PartialEq, Eq)]
pub enum ScaleUpOutcome {
    /// Every recorded pool is back at its original shape
    Completed,
    /// No turndown was in effect
    AlreadyUp,
}

/// Serializes strategy invocations and records original pool sizes.
pub struct TurndownManager {
    state: Mutex<ManagerState>,
    provider: Arc<dyn TurndownProvider>,
    strategy: Arc<dyn TurndownStrategy>,
    store: Arc<dyn ScheduleStore>,
    /// In-memory copy of the persisted original-sizes map; the durable copy
    /// in the schedule status is authoritative across restarts
    originals: Mutex<Option<BTreeMap<String, PoolSnapshot>>>,
}

impl TurndownManager {
    /// Create a manager over the given provider, strategy, and store.
    #[must_use]
    pub fn new(
        provider: Arc<dyn TurndownProvider>,
        strategy: Arc<dyn TurndownStrategy>,
        store: Arc<dyn ScheduleStore>,
    ) -> Self {
        Self {
            state: Mutex::new(ManagerState::Idle),
            provider,
            strategy,
            store,
            originals: Mutex::new(None),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ManagerState {
        *self.state.lock().expect("manager state poisoned")
    }

    /// Whether a turndown is in effect or in flight.
    #[must_use]
    pub fn is_down(&self) -> bool {
        matches!(self.state(), ManagerState::Down | ManagerState::TurningDown)
    }

    fn set_state(&self, next: ManagerState) {
        *self.state.lock().expect("manager state poisoned") = next;
    }

    /// Scale the cluster down to its minimal footprint.
    ///
    /// Single-flight: a concurrent or completed scaledown returns
    /// [`ScaleDownOutcome::AlreadyDown`] without touching the cluster.
    ///
    /// # Errors
    ///
    /// Any strategy or provider error moves the manager to `Failed` and is
    /// surfaced to the scheduler. A scaledown requested while a scaleup is
    /// in flight is an invariant violation.
    pub async fn scale_down(&self) -> TurndownResult<ScaleDownOutcome> {
        {
            let mut state = self.state.lock().expect("manager state poisoned");
            match *state {
                ManagerState::TurningDown | ManagerState::Down => {
                    debug!("Scaledown requested but already {:?}", *state);
                    return Ok(ScaleDownOutcome::AlreadyDown);
                }
                ManagerState::TurningUp => {
                    return Err(TurndownError::InvariantViolation(
                        "scaledown requested while a scaleup is in flight".to_string(),
                    ));
                }
                ManagerState::Idle | ManagerState::Failed => *state = ManagerState::TurningDown,
            }
        }

        match self.run_scale_down().await {
            Ok(ScaleDownOutcome::Relocating) => {
                // The pod is about to move; nothing is torn down yet.
                self.set_state(ManagerState::Idle);
                Ok(ScaleDownOutcome::Relocating)
            }
            Ok(outcome) => {
                self.set_state(ManagerState::Down);
                Ok(outcome)
            }
            Err(e) => {
                self.set_state(ManagerState::Failed);
                Err(e)
            }
        }
    }

    /// Restore the cluster to its recorded shape.
    ///
    /// Single-flight: a scaleup with no turndown in effect returns
    /// [`ScaleUpOutcome::AlreadyUp`].
    ///
    /// # Errors
    ///
    /// A scaleup with no recorded original sizes is an invariant violation;
    /// strategy and provider errors move the manager to `Failed`.
    pub async fn scale_up(&self) -> TurndownResult<ScaleUpOutcome> {
        {
            let mut state = self.state.lock().expect("manager state poisoned");
            match *state {
                ManagerState::Idle => {
                    debug!("Scaleup requested but no turndown is in effect");
                    return Ok(ScaleUpOutcome::AlreadyUp);
                }
                ManagerState::TurningUp => return Ok(ScaleUpOutcome::AlreadyUp),
                ManagerState::TurningDown => {
                    return Err(TurndownError::InvariantViolation(
                        "scaleup requested while a scaledown is in flight".to_string(),
                    ));
                }
                ManagerState::Down | ManagerState::Failed => *state = ManagerState::TurningUp,
            }
        }

        match self.run_scale_up().await {
            Ok(outcome) => {
                self.set_state(ManagerState::Idle);
                Ok(outcome)
            }
            Err(e) => {
                self.set_state(ManagerState::Failed);
                Err(e)
            }
        }
    }

    async fn run_scale_down(&self) -> TurndownResult<ScaleDownOutcome> {
        let prepared = self.strategy.prepare_turndown().await?;
        let plan = match prepared {
            Prepared::Relocating => {
                info!("Controller relocation initiated; scaledown resumes after restart");
                return Ok(ScaleDownOutcome::Relocating);
            }
            Prepared::Ready(plan) => plan,
        };

        let pools = self.provider.list_node_pools().await?;
        let targets: Vec<_> = pools
            .into_iter()
            .filter(|p| !p.is_turndown_pool && !plan.exclude_pool_ids.contains(&p.id))
            .collect();

        // Record every pool's shape before anything is resized: recovery
        // after a crash must know what to restore. A pool already recorded
        // (an interrupted scaledown being retried) keeps its original
        // snapshot; observing it half-zeroed must not overwrite it.
        let existing = self.peek_recorded_originals().await;
        let mut originals: BTreeMap<String, PoolSnapshot> = targets
            .iter()
            .map(|p| {
                let snapshot = existing
                    .as_ref()
                    .and_then(|m| m.get(&p.id).cloned())
                    .unwrap_or_else(|| p.snapshot());
                (p.id.clone(), snapshot)
            })
            .collect();
        for (id, snapshot) in plan.extra_snapshots {
            originals.entry(id).or_insert(snapshot);
        }
        self.persist_originals(&originals).await?;

        info!(pools = targets.len(), "Scaling node pools to zero");
        retry_provider(self.provider.name(), "set_node_pool_sizes", || {
            self.provider.set_node_pool_sizes(&targets, 0)
        })
        .await?;

        Ok(ScaleDownOutcome::Completed)
    }

    async fn run_scale_up(&self) -> TurndownResult<ScaleUpOutcome> {
        let originals = self.recorded_originals().await?;

        info!(pools = originals.len(), "Restoring node pools");
        retry_provider(self.provider.name(), "reset_node_pool_sizes", || {
            self.provider.reset_node_pool_sizes(&originals)
        })
        .await?;

        self.strategy.finish_turnup().await?;
        self.clear_originals().await;

        Ok(ScaleUpOutcome::Completed)
    }

    /// Write the original-sizes map into the schedule status and keep an
    /// in-memory copy.
    async fn persist_originals(
        &self,
        originals: &BTreeMap<String, PoolSnapshot>,
    ) -> TurndownResult<()> {
        *self.originals.lock().expect("originals poisoned") = Some(originals.clone());

        if let Some(schedule) = self.store.get().await? {
            let mut status = schedule.status_or_default();
            status.original_pool_sizes = Some(originals.clone());
            self.store
                .update_status(&schedule.name_any(), status)
                .await?;
            debug!("Original pool sizes persisted to schedule status");
        } else {
            // Ad-hoc turndown with no schedule resource: the in-memory copy
            // is all there is, and a restart cannot recover it.
            warn!("No schedule resource; original pool sizes held in memory only");
        }
        Ok(())
    }

    /// The recorded original sizes, from memory or the durable copy.
    async fn recorded_originals(&self) -> TurndownResult<BTreeMap<String, PoolSnapshot>> {
        self.peek_recorded_originals()
            .await
            .ok_or_else(|| {
                TurndownError::InvariantViolation(
                    "scaleup requested but no original pool sizes are recorded".to_string(),
                )
            })
    }

    /// The recorded original sizes if any exist, memory first, then the
    /// durable copy in the schedule status.
    async fn peek_recorded_originals(&self) -> Option<BTreeMap<String, PoolSnapshot>> {
        if let Some(map) = self.originals.lock().expect("originals poisoned").clone() {
            return Some(map);
        }

        match self.store.get().await {
            Ok(Some(schedule)) => schedule.status.and_then(|s| s.original_pool_sizes),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read schedule while looking up originals");
                None
            }
        }
    }

    async fn clear_originals(&self) {
        *self.originals.lock().expect("originals poisoned") = None;

        match self.store.get().await {
            Ok(Some(schedule)) => {
                let mut status = schedule.status_or_default();
                status.original_pool_sizes = None;
                if let Err(e) = self.store.update_status(&schedule.name_any(), status).await {
                    warn!(error = %e, "Failed to clear original pool sizes from status");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to re-read schedule while clearing originals"),
        }
    }

    /// Force the manager into `Down`. Used at startup recovery when the
    /// persisted schedule says a turndown is in effect.
    pub fn mark_down(&self) {
        self.set_state(ManagerState::Down);
    }

    /// Re-run the teardown sequence while already down, converging any pool
    /// the interrupted scaledown missed. Recorded originals are preserved,
    /// so pools observed half-zeroed keep their true pre-turndown shape.
    ///
    /// No-op unless the manager is in `Down`.
    ///
    /// # Errors
    ///
    /// Strategy and provider errors move the manager to `Failed`.
    pub async fn converge_down(&self) -> TurndownResult<()> {
        {
            let mut state = self.state.lock().expect("manager state poisoned");
            if *state != ManagerState::Down {
                return Ok(());
            }
            *state = ManagerState::TurningDown;
        }

        match self.run_scale_down().await {
            Ok(_) => {
                self.set_state(ManagerState::Down);
                Ok(())
            }
            Err(e) => {
                self.set_state(ManagerState::Failed);
                Err(e)
            }
        }
    }
}

/// Whether a persisted schedule status shows a turndown in effect: the
/// scaledown completed (`current` already points at `scaleup`) and the
/// original sizes were never consumed by a turnup.
#[must_use]
pub fn turndown_in_effect(status: &TurndownScheduleStatus) -> bool {
    status.original_pool_sizes.is_some() && status.current == Some(crate::crd::ScalePhase::ScaleUp)
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod manager_tests;
