// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definition for the turndown schedule.
//!
//! A [`TurndownSchedule`] is a cluster-scoped resource describing when the
//! cluster should be shrunk to its minimal footprint and when it should be
//! restored. At most one schedule is honoured at a time; when several exist,
//! the reconciler keeps the lexicographically-first by name and fails the
//! rest.
//!
//! # Example
//!
//! ```yaml
//! apiVersion: turndown.firestoned.io/v1alpha1
//! kind: TurndownSchedule
//! metadata:
//!   name: nightly
//! spec:
//!   start: "2024-06-01T22:00:00Z"
//!   end: "2024-06-02T06:00:00Z"
//!   repeat: daily
//! ```

use crate::errors::TurndownError;
use chrono::{DateTime, Duration, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How often a schedule recurs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Repeat {
    /// One-shot: the schedule completes after a single scaledown/scaleup cycle
    #[default]
    None,
    /// Both timestamps advance by 24 hours after each completed cycle
    Daily,
    /// Both timestamps advance by 7 days after each completed cycle
    Weekly,
}

impl Repeat {
    /// The period this repeat advances by, or `None` for one-shot schedules.
    #[must_use]
    pub fn period(&self) -> Option<Duration> {
        match self {
            Repeat::None => None,
            Repeat::Daily => Some(Duration::hours(24)),
            Repeat::Weekly => Some(Duration::days(7)),
        }
    }
}

/// Outcome-level state of a schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ScheduleState {
    /// The schedule is accepted and its next action is armed
    ScheduleSuccess,
    /// Validation or a scale operation failed; see `status.error`
    ScheduleFailed,
    /// A non-repeating schedule finished its cycle
    ScheduleCompleted,
}

/// The next transition a schedule will perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ScalePhase {
    /// The next action shrinks the cluster
    ScaleDown,
    /// The next action restores the cluster
    ScaleUp,
}

impl ScalePhase {
    /// The opposite phase.
    #[must_use]
    pub fn flipped(&self) -> Self {
        match self {
            ScalePhase::ScaleDown => ScalePhase::ScaleUp,
            ScalePhase::ScaleUp => ScalePhase::ScaleDown,
        }
    }
}

/// Recorded pre-scaledown shape of a node pool, keyed by pool identifier in
/// `status.originalPoolSizes`.
///
/// A pool appears here if and only if it existed at scaledown time; pools
/// created mid-turndown are left untouched at scaleup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolSnapshot {
    /// Node count before the scaledown
    pub node_count: i32,

    /// Autoscaler minimum before the scaledown, if bounds were set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_count: Option<i32>,

    /// Autoscaler maximum before the scaledown, if bounds were set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_count: Option<i32>,

    /// Whether pool-level autoscaling was enabled before the scaledown
    #[serde(default)]
    pub autoscaling_enabled: bool,
}

/// `TurndownSchedule` status, mutated only by the reconciler.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TurndownScheduleStatus {
    /// Outcome-level state of the schedule
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<ScheduleState>,

    /// The next transition (`scaledown` or `scaleup`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<ScalePhase>,

    /// When the next scaledown fires (RFC 3339)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_scale_down_time: Option<String>,

    /// When the next scaleup fires (RFC 3339)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_scale_up_time: Option<String>,

    /// Last time the reconciler touched this status (RFC 3339)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,

    /// Terminal flag set when a non-repeating schedule completes
    #[serde(default)]
    pub finished: bool,

    /// Message of the most recent failure, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Pre-scaledown pool shapes, present exactly while a turndown owned by
    /// this controller is in effect
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_pool_sizes: Option<BTreeMap<String, PoolSnapshot>>,
}

/// `TurndownSchedule` declares the off-hours window during which the cluster
/// is scaled down to a minimal footprint.
///
/// The `start` timestamp triggers a scaledown, `end` triggers the matching
/// scaleup. With `repeat: daily` or `repeat: weekly` both timestamps advance
/// by one period after each completed cycle; with `repeat: none` the schedule
/// finishes after a single cycle.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "turndown.firestoned.io",
    version = "v1alpha1",
    kind = "TurndownSchedule",
    shortname = "td",
    shortname = "tds",
    doc = "TurndownSchedule declares a window during which the cluster is scaled down to a minimal footprint and restored afterwards. Cluster-scoped; only one schedule is honoured at a time.",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Next","type":"string","jsonPath":".status.current"}"#,
    printcolumn = r#"{"name":"ScaleDownAt","type":"string","jsonPath":".status.nextScaleDownTime"}"#,
    printcolumn = r#"{"name":"ScaleUpAt","type":"string","jsonPath":".status.nextScaleUpTime"}"#,
    printcolumn = r#"{"name":"Finished","type":"boolean","jsonPath":".status.finished"}"#
)]
#[kube(status = "TurndownScheduleStatus")]
#[serde(rename_all = "camelCase")]
pub struct TurndownScheduleSpec {
    /// When the scaledown begins (RFC 3339, e.g. `2024-06-01T22:00:00Z`)
    #[schemars(regex(pattern = r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})$"))]
    pub start: String,

    /// When the cluster is restored (RFC 3339); must be after `start`
    #[schemars(regex(pattern = r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})$"))]
    pub end: String,

    /// Recurrence: `none`, `daily`, or `weekly`
    #[serde(default)]
    pub repeat: Repeat,
}

/// Parse an RFC 3339 timestamp from a schedule field.
///
/// # Errors
///
/// Returns [`TurndownError::Configuration`] when the value is not a valid
/// RFC 3339 timestamp.
pub fn parse_rfc3339(field: &str, value: &str) -> Result<DateTime<Utc>, TurndownError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| TurndownError::Configuration(format!("{field}: {value:?} is not RFC 3339: {e}")))
}

impl TurndownSchedule {
    /// Parsed `spec.start`.
    ///
    /// # Errors
    ///
    /// Returns [`TurndownError::Configuration`] on a malformed timestamp.
    pub fn parsed_start(&self) -> Result<DateTime<Utc>, TurndownError> {
        parse_rfc3339("spec.start", &self.spec.start)
    }

    /// Parsed `spec.end`.
    ///
    /// # Errors
    ///
    /// Returns [`TurndownError::Configuration`] on a malformed timestamp.
    pub fn parsed_end(&self) -> Result<DateTime<Utc>, TurndownError> {
        parse_rfc3339("spec.end", &self.spec.end)
    }

    /// Validate the spec against `now`.
    ///
    /// Enforces well-formed timestamps, `start < end`, and rejects one-shot
    /// schedules whose window is already over.
    ///
    /// # Errors
    ///
    /// Returns [`TurndownError::Configuration`] describing the first violation.
    pub fn validate_spec(&self, now: DateTime<Utc>) -> Result<(), TurndownError> {
        let start = self.parsed_start()?;
        let end = self.parsed_end()?;

        if start >= end {
            return Err(TurndownError::Configuration(format!(
                "start ({start}) must be before end ({end})"
            )));
        }

        if self.spec.repeat == Repeat::None && end <= now {
            return Err(TurndownError::Configuration(format!(
                "non-repeating schedule is entirely in the past (end {end} <= now {now})"
            )));
        }

        Ok(())
    }

    /// The status, or a default when none has been written yet.
    #[must_use]
    pub fn status_or_default(&self) -> TurndownScheduleStatus {
        self.status.clone().unwrap_or_default()
    }
}

/// Roll a repeating schedule's `(scale_down, scale_up)` pair forward past
/// missed occurrences so the next scaledown is in the future.
///
/// One-shot schedules are returned unchanged; a one-shot schedule whose
/// window has already opened fires immediately instead.
#[must_use]
pub fn roll_forward(
    scale_down: DateTime<Utc>,
    scale_up: DateTime<Utc>,
    repeat: Repeat,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let Some(period) = repeat.period() else {
        return (scale_down, scale_up);
    };

    let (mut down, mut up) = (scale_down, scale_up);
    // Advance whole cycles, keeping a window that is currently open (down in
    // the past, up in the future) so an in-progress occurrence still runs.
    while up <= now {
        down += period;
        up += period;
    }
    (down, up)
}

#[cfg(test)]
#[path = "crd_tests.rs"]
mod crd_tests;
