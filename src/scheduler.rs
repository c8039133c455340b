// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The turndown scheduler: one authoritative timer for the next action.
//!
//! Exactly one timer is outstanding at any time; arming with a different
//! `(fire time, phase)` replaces the previous timer, arming with the same one
//! is a no-op. At fire time a dedicated task runs the manager operation under
//! the 30-minute deadline and writes the advanced schedule back through the
//! store; the resulting watch event flows through the reconciler, which arms
//! the next timer. The reconciler never blocks on a running operation.

use crate::constants::SCALE_OPERATION_TIMEOUT_SECS;
use crate::crd::{
    parse_rfc3339, Repeat, ScalePhase, ScheduleState, TurndownSchedule, TurndownScheduleStatus,
};
use crate::errors::{TurndownError, TurndownResult};
use crate::manager::{ScaleDownOutcome, TurndownManager};
use crate::store::ScheduleStore;
use chrono::{DateTime, Utc};
use kube::ResourceExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// The armed timer: what will fire, when, and the task waiting for it.
struct ArmedTimer {
    fire_at: DateTime<Utc>,
    phase: ScalePhase,
    handle: JoinHandle<()>,
}

/// Owns the single outstanding timer and drives the manager at fire time.
pub struct TurndownScheduler {
    manager: Arc<TurndownManager>,
    store: Arc<dyn ScheduleStore>,
    timer: Mutex<Option<ArmedTimer>>,
}

impl TurndownScheduler {
    /// Create a scheduler over the given manager and store.
    #[must_use]
    pub fn new(manager: Arc<TurndownManager>, store: Arc<dyn ScheduleStore>) -> Self {
        Self {
            manager,
            store,
            timer: Mutex::new(None),
        }
    }

    /// Arm (or re-arm) the timer for the schedule's next transition.
    ///
    /// # Errors
    ///
    /// Returns [`TurndownError::Configuration`] when the status timestamps
    /// are malformed.
    pub fn arm(&self, schedule: &TurndownSchedule) -> TurndownResult<()> {
        let status = schedule.status_or_default();
        let Some((fire_at, phase)) = next_fire(&status)? else {
            debug!("Schedule has no next transition; cancelling timer");
            self.cancel();
            return Ok(());
        };

        let mut guard = self.timer.lock().expect("timer poisoned");
        if let Some(armed) = guard.as_ref() {
            if armed.fire_at == fire_at && armed.phase == phase && !armed.handle.is_finished() {
                return Ok(());
            }
            armed.handle.abort();
        }

        info!(fire_at = %fire_at.to_rfc3339(), phase = ?phase, "Arming turndown timer");
        let manager = self.manager.clone();
        let store = self.store.clone();
        let name = schedule.name_any();
        let repeat = schedule.spec.repeat;

        let handle = tokio::spawn(async move {
            let delay = (fire_at - Utc::now()).num_milliseconds().max(0) as u64;
            tokio::time::sleep(Duration::from_millis(delay)).await;
            execute_fire(&manager, store.as_ref(), &name, repeat, phase).await;
        });

        *guard = Some(ArmedTimer {
            fire_at,
            phase,
            handle,
        });
        Ok(())
    }

    /// Cancel any pending timer.
    pub fn cancel(&self) {
        if let Some(armed) = self.timer.lock().expect("timer poisoned").take() {
            debug!(phase = ?armed.phase, "Cancelling pending turndown timer");
            armed.handle.abort();
        }
    }
}

/// Compute the next `(fire time, phase)` from a schedule status.
///
/// `current` always points at the next transition, so its timestamp wins;
/// when `current` is unset the earlier of the two pending transitions is
/// taken. A one-shot schedule between scaledown and scaleup keeps its stale
/// `nextScaleDownTime`, which must not re-fire. Terminal schedules have no
/// next fire.
///
/// # Errors
///
/// Returns [`TurndownError::Configuration`] when a status timestamp fails to
/// parse.
pub fn next_fire(
    status: &TurndownScheduleStatus,
) -> TurndownResult<Option<(DateTime<Utc>, ScalePhase)>> {
    if status.finished {
        return Ok(None);
    }

    let down = status
        .next_scale_down_time
        .as_deref()
        .map(|s| parse_rfc3339("status.nextScaleDownTime", s))
        .transpose()?;
    let up = status
        .next_scale_up_time
        .as_deref()
        .map(|s| parse_rfc3339("status.nextScaleUpTime", s))
        .transpose()?;

    Ok(match (status.current, down, up) {
        (Some(ScalePhase::ScaleDown), Some(d), _) => Some((d, ScalePhase::ScaleDown)),
        (Some(ScalePhase::ScaleUp), _, Some(u)) => Some((u, ScalePhase::ScaleUp)),
        (_, Some(d), Some(u)) => {
            if d <= u {
                Some((d, ScalePhase::ScaleDown))
            } else {
                Some((u, ScalePhase::ScaleUp))
            }
        }
        (_, Some(d), None) => Some((d, ScalePhase::ScaleDown)),
        (_, None, Some(u)) => Some((u, ScalePhase::ScaleUp)),
        (_, None, None) => None,
    })
}

/// Run the manager operation for a fired timer and write the outcome back.
async fn execute_fire(
    manager: &TurndownManager,
    store: &dyn ScheduleStore,
    schedule_name: &str,
    repeat: Repeat,
    phase: ScalePhase,
) {
    info!(schedule = schedule_name, phase = ?phase, "Turndown timer fired");
    let started = std::time::Instant::now();
    let deadline = Duration::from_secs(SCALE_OPERATION_TIMEOUT_SECS);
    let operation = match phase {
        ScalePhase::ScaleDown => "scaledown",
        ScalePhase::ScaleUp => "scaleup",
    };

    let result: TurndownResult<bool> = match phase {
        ScalePhase::ScaleDown => match tokio::time::timeout(deadline, manager.scale_down()).await {
            Ok(Ok(ScaleDownOutcome::Relocating)) => {
                // The pod is moving; the schedule stays due and the restarted
                // controller re-enters the scaledown.
                info!("Scaledown deferred for controller relocation");
                crate::metrics::record_scale_operation(operation, "noop", started.elapsed());
                return;
            }
            Ok(Ok(_)) => Ok(true),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TurndownError::ProviderUnavailable(format!(
                "scaledown exceeded its {}s deadline",
                deadline.as_secs()
            ))),
        },
        ScalePhase::ScaleUp => match tokio::time::timeout(deadline, manager.scale_up()).await {
            Ok(Ok(_)) => Ok(true),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TurndownError::ProviderUnavailable(format!(
                "scaleup exceeded its {}s deadline",
                deadline.as_secs()
            ))),
        },
    };

    match result {
        Ok(_) => {
            crate::metrics::record_scale_operation(operation, "success", started.elapsed());
            if let Err(e) = advance_schedule(store, schedule_name, repeat, phase).await {
                error!(schedule = schedule_name, error = %e, "Failed to advance schedule");
            }
        }
        Err(e) => {
            crate::metrics::record_scale_operation(operation, "error", started.elapsed());
            crate::metrics::record_error(e.reason());
            error!(schedule = schedule_name, phase = ?phase, error = %e, "Scale operation failed");

            if let Err(write_err) = write_failure(store, schedule_name, &e).await {
                error!(schedule = schedule_name, error = %write_err, "Failed to record failure status");
            }

            // Fatal kinds terminate the process so the orchestrator restarts
            // it with clean state.
            if e.is_fatal() {
                error!(error = %e, "Fatal turndown error; exiting");
                std::process::exit(1);
            }
        }
    }
}

/// Advance the schedule after a completed operation: flip `current`, move a
/// repeating schedule one period forward at scaleup completion, or mark a
/// one-shot schedule finished.
async fn advance_schedule(
    store: &dyn ScheduleStore,
    schedule_name: &str,
    repeat: Repeat,
    completed: ScalePhase,
) -> TurndownResult<()> {
    let Some(schedule) = store.get().await? else {
        warn!("Schedule disappeared before its status could be advanced");
        return Ok(());
    };
    if schedule.name_any() != schedule_name {
        warn!(
            expected = schedule_name,
            found = %schedule.name_any(),
            "Authoritative schedule changed mid-operation; not advancing"
        );
        return Ok(());
    }

    let mut status = schedule.status_or_default();
    status.error = None;
    status.state = Some(ScheduleState::ScheduleSuccess);

    match completed {
        ScalePhase::ScaleDown => {
            status.current = Some(ScalePhase::ScaleUp);
        }
        ScalePhase::ScaleUp => match repeat.period() {
            None => {
                status.finished = true;
                status.state = Some(ScheduleState::ScheduleCompleted);
                info!(schedule = schedule_name, "One-shot schedule completed");
            }
            Some(period) => {
                status.current = Some(ScalePhase::ScaleDown);
                status.next_scale_down_time =
                    advance_timestamp(status.next_scale_down_time.as_deref(), period)?;
                status.next_scale_up_time =
                    advance_timestamp(status.next_scale_up_time.as_deref(), period)?;
                info!(
                    schedule = schedule_name,
                    next_scale_down = ?status.next_scale_down_time,
                    "Repeating schedule advanced one period"
                );
            }
        },
    }

    store.update_status(schedule_name, status).await?;
    Ok(())
}

/// Shift an RFC 3339 status timestamp forward by one period.
fn advance_timestamp(
    value: Option<&str>,
    period: chrono::Duration,
) -> TurndownResult<Option<String>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let parsed = parse_rfc3339("status timestamp", value)?;
    Ok(Some((parsed + period).to_rfc3339()))
}

/// Record a failed operation in the schedule status.
async fn write_failure(
    store: &dyn ScheduleStore,
    schedule_name: &str,
    error: &TurndownError,
) -> TurndownResult<()> {
    let Some(schedule) = store.get().await? else {
        return Ok(());
    };
    if schedule.name_any() != schedule_name {
        return Ok(());
    }

    let mut status = schedule.status_or_default();
    status.state = Some(ScheduleState::ScheduleFailed);
    status.error = Some(error.to_string());
    store.update_status(schedule_name, status).await?;
    Ok(())
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod scheduler_tests;
