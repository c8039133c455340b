// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `TurndownSchedule` reconciliation logic.
//!
//! The reconciler is the single writer on the schedule resource. On every
//! watch event it validates the spec, enforces the singleton rule, seeds the
//! status on first sight, recovers from a restart mid-turndown, and arms the
//! scheduler's timer. Deletion runs through a finalizer so that a cluster
//! that is down is scaled back up before the schedule disappears.

use crate::constants::ACTIVE_REQUEUE_DURATION_SECS;
use crate::context::Context;
use crate::crd::{roll_forward, ScalePhase, ScheduleState, TurndownSchedule};
use crate::errors::{TurndownError, TurndownResult};
use crate::manager::{turndown_in_effect, ManagerState};
use chrono::Utc;
use kube::{
    api::{ListParams, Patch, PatchParams},
    runtime::controller::Action,
    Api, Client, ResourceExt,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Reconcile one `TurndownSchedule` event.
///
/// Returns the requeue action: a periodic safety-net requeue for the
/// authoritative schedule, `await_change` for losers and terminal schedules.
///
/// # Errors
///
/// Surfaces Kubernetes and store errors so the controller's error policy can
/// requeue.
pub async fn reconcile_turndown_schedule(
    ctx: Arc<Context>,
    schedule: &TurndownSchedule,
) -> TurndownResult<Action> {
    let name = schedule.name_any();
    debug!(schedule = %name, "Reconciling TurndownSchedule");

    // Singleton rule: only the lexicographically-first schedule is honoured.
    if let Some(authoritative) = authoritative_schedule_name(&ctx.client).await? {
        if name != authoritative {
            mark_conflicting(&ctx.client, schedule, &authoritative).await?;
            return Ok(Action::await_change());
        }
    }

    if schedule.metadata.deletion_timestamp.is_some() {
        // The finalizer wrapper drives cleanup; nothing to arm.
        return Ok(Action::await_change());
    }

    apply_schedule(&ctx, schedule).await
}

/// Name of the schedule the controller honours, when any exists.
async fn authoritative_schedule_name(client: &Client) -> TurndownResult<Option<String>> {
    let api: Api<TurndownSchedule> = Api::all(client.clone());
    let list = api.list(&ListParams::default()).await?;
    Ok(list
        .items
        .iter()
        .map(kube::ResourceExt::name_any)
        .min())
}

/// Fail a schedule that lost the singleton race (idempotently).
async fn mark_conflicting(
    client: &Client,
    schedule: &TurndownSchedule,
    authoritative: &str,
) -> TurndownResult<()> {
    let already_failed = schedule
        .status
        .as_ref()
        .and_then(|s| s.state)
        .is_some_and(|state| state == ScheduleState::ScheduleFailed);
    if already_failed {
        return Ok(());
    }

    let name = schedule.name_any();
    warn!(
        schedule = %name,
        authoritative = %authoritative,
        "Multiple turndown schedules present; failing the extra one"
    );

    let api: Api<TurndownSchedule> = Api::all(client.clone());
    let patch = json!({
        "status": {
            "state": ScheduleState::ScheduleFailed,
            "error": format!("multiple schedules: only {authoritative} is honoured"),
            "lastUpdated": Utc::now().to_rfc3339(),
        }
    });
    api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Normal-path reconciliation of the authoritative schedule.
async fn apply_schedule(ctx: &Context, schedule: &TurndownSchedule) -> TurndownResult<Action> {
    let name = schedule.name_any();
    let now = Utc::now();
    let mut status = schedule.status_or_default();

    if status.finished {
        debug!(schedule = %name, "Schedule is finished; nothing to arm");
        ctx.scheduler.cancel();
        return Ok(Action::await_change());
    }

    // First sight: validate the spec, then seed the transition times,
    // rolling a repeating schedule forward past missed occurrences.
    // Configuration errors are terminal: recorded once, never retried.
    let needs_seed =
        status.next_scale_down_time.is_none() || status.next_scale_up_time.is_none();
    if needs_seed {
        if let Err(e) = schedule.validate_spec(now) {
            ctx.scheduler.cancel();
            record_validation_failure(ctx, schedule, &e).await?;
            return Ok(Action::await_change());
        }

        let (down, up) = roll_forward(
            schedule.parsed_start()?,
            schedule.parsed_end()?,
            schedule.spec.repeat,
            now,
        );
        status.state = Some(ScheduleState::ScheduleSuccess);
        status.current = Some(ScalePhase::ScaleDown);
        status.next_scale_down_time = Some(down.to_rfc3339());
        status.next_scale_up_time = Some(up.to_rfc3339());
        status.error = None;
        info!(
            schedule = %name,
            scale_down = %down.to_rfc3339(),
            scale_up = %up.to_rfc3339(),
            "Schedule accepted"
        );

        let updated = ctx.store.update_status(&name, status).await?;
        ctx.scheduler.arm(&updated)?;
        return Ok(Action::requeue(Duration::from_secs(
            ACTIVE_REQUEUE_DURATION_SECS,
        )));
    }

    // Restart recovery: the persisted status says the cluster is down but
    // this process has never seen it. Resume from Down and converge any pool
    // the interrupted scaledown missed.
    if turndown_in_effect(&status) && ctx.manager.state() == ManagerState::Idle {
        info!(schedule = %name, "Recovering turndown state after restart");
        ctx.manager.mark_down();
        let manager = ctx.manager.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.converge_down().await {
                error!(error = %e, "Turndown convergence failed");
            }
        });
    }

    ctx.scheduler.arm(schedule)?;
    Ok(Action::requeue(Duration::from_secs(
        ACTIVE_REQUEUE_DURATION_SECS,
    )))
}

/// Write a terminal validation failure into the status (idempotently).
async fn record_validation_failure(
    ctx: &Context,
    schedule: &TurndownSchedule,
    error: &TurndownError,
) -> TurndownResult<()> {
    let message = error.to_string();
    let unchanged = schedule
        .status
        .as_ref()
        .is_some_and(|s| s.error.as_deref() == Some(message.as_str()));
    if unchanged {
        return Ok(());
    }

    warn!(schedule = %schedule.name_any(), error = %message, "Schedule rejected");
    crate::metrics::record_error(error.reason());

    let mut status = schedule.status_or_default();
    status.state = Some(ScheduleState::ScheduleFailed);
    status.error = Some(message);
    ctx.store
        .update_status(&schedule.name_any(), status)
        .await?;
    Ok(())
}

/// Finalizer cleanup: a deleted schedule must not leave the cluster down.
///
/// A turndown in effect triggers an immediate scaleup before the finalizer
/// is released; an operation in flight defers the cleanup so it is retried.
///
/// # Errors
///
/// Returns a retryable error while a scale operation is in flight, and
/// surfaces scaleup failures (deletion is blocked until the cluster is
/// restored).
pub async fn cleanup_schedule(ctx: Arc<Context>, schedule: &TurndownSchedule) -> TurndownResult<Action> {
    let name = schedule.name_any();
    info!(schedule = %name, "Schedule deleted; cancelling turndown");
    ctx.scheduler.cancel();

    let status = schedule.status_or_default();
    match ctx.manager.state() {
        ManagerState::TurningDown | ManagerState::TurningUp => {
            return Err(TurndownError::ProviderUnavailable(
                "scale operation in flight; cancel will be retried".to_string(),
            ));
        }
        ManagerState::Down => {
            info!(schedule = %name, "Cluster is down; scaling up before releasing the schedule");
            ctx.manager.scale_up().await?;
        }
        ManagerState::Failed if turndown_in_effect(&status) => {
            info!(schedule = %name, "Retrying scaleup for failed turndown before release");
            ctx.manager.scale_up().await?;
        }
        ManagerState::Idle if turndown_in_effect(&status) => {
            // Deleted right after a restart: resume and restore.
            ctx.manager.mark_down();
            ctx.manager.scale_up().await?;
        }
        _ => {}
    }

    Ok(Action::await_change())
}

#[cfg(test)]
#[path = "turndown_schedule_tests.rs"]
mod turndown_schedule_tests;
