// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `scheduler.rs`: next-fire computation and schedule
//! advancement, run against the in-memory provider and store.

#[cfg(test)]
mod tests {
    use super::super::{advance_schedule, next_fire, write_failure};
    use crate::crd::{
        Repeat, ScalePhase, ScheduleState, TurndownSchedule, TurndownScheduleSpec,
        TurndownScheduleStatus,
    };
    use crate::errors::TurndownError;
    use crate::store::{MemoryScheduleStore, ScheduleStore};
    use chrono::{DateTime, Utc};
    use kube::core::ObjectMeta;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn status(down: &str, up: &str, current: ScalePhase) -> TurndownScheduleStatus {
        TurndownScheduleStatus {
            state: Some(ScheduleState::ScheduleSuccess),
            current: Some(current),
            next_scale_down_time: Some(down.to_string()),
            next_scale_up_time: Some(up.to_string()),
            ..Default::default()
        }
    }

    fn schedule(repeat: Repeat, status: TurndownScheduleStatus) -> TurndownSchedule {
        TurndownSchedule {
            metadata: ObjectMeta {
                name: Some("nightly".to_string()),
                ..Default::default()
            },
            spec: TurndownScheduleSpec {
                start: "2024-06-01T22:00:00Z".to_string(),
                end: "2024-06-02T06:00:00Z".to_string(),
                repeat,
            },
            status: Some(status),
        }
    }

    #[test]
    fn test_next_fire_picks_earlier_transition() {
        let s = status(
            "2024-06-01T22:00:00Z",
            "2024-06-02T06:00:00Z",
            ScalePhase::ScaleDown,
        );
        let (at, phase) = next_fire(&s).unwrap().unwrap();
        assert_eq!(at, utc("2024-06-01T22:00:00Z"));
        assert_eq!(phase, ScalePhase::ScaleDown);
    }

    #[test]
    fn test_next_fire_after_scaledown_is_the_scaleup() {
        let s = status(
            "2024-06-02T22:00:00Z",
            "2024-06-02T06:00:00Z",
            ScalePhase::ScaleUp,
        );
        let (at, phase) = next_fire(&s).unwrap().unwrap();
        assert_eq!(at, utc("2024-06-02T06:00:00Z"));
        assert_eq!(phase, ScalePhase::ScaleUp);
    }

    /// A one-shot schedule between its scaledown and scaleup keeps the stale
    /// past scaledown timestamp; the scaleup must still be what fires next.
    #[test]
    fn test_next_fire_one_shot_mid_window_ignores_stale_scaledown() {
        let s = status(
            "2024-06-01T22:00:00Z",
            "2024-06-02T06:00:00Z",
            ScalePhase::ScaleUp,
        );
        let (at, phase) = next_fire(&s).unwrap().unwrap();
        assert_eq!(at, utc("2024-06-02T06:00:00Z"));
        assert_eq!(phase, ScalePhase::ScaleUp);
    }

    #[test]
    fn test_next_fire_tie_follows_current() {
        let s = status(
            "2024-06-01T22:00:00Z",
            "2024-06-01T22:00:00Z",
            ScalePhase::ScaleUp,
        );
        let (_, phase) = next_fire(&s).unwrap().unwrap();
        assert_eq!(phase, ScalePhase::ScaleUp);
    }

    #[test]
    fn test_next_fire_finished_schedule_has_none() {
        let mut s = status(
            "2024-06-01T22:00:00Z",
            "2024-06-02T06:00:00Z",
            ScalePhase::ScaleDown,
        );
        s.finished = true;
        assert!(next_fire(&s).unwrap().is_none());
    }

    #[test]
    fn test_next_fire_empty_status_has_none() {
        assert!(next_fire(&TurndownScheduleStatus::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_next_fire_rejects_malformed_timestamp() {
        let mut s = status(
            "2024-06-01T22:00:00Z",
            "2024-06-02T06:00:00Z",
            ScalePhase::ScaleDown,
        );
        s.next_scale_up_time = Some("soon".to_string());
        assert!(next_fire(&s).is_err());
    }

    #[tokio::test]
    async fn test_scaledown_completion_flips_current() {
        let store = MemoryScheduleStore::with(Some(schedule(
            Repeat::None,
            status(
                "2024-06-01T22:00:00Z",
                "2024-06-02T06:00:00Z",
                ScalePhase::ScaleDown,
            ),
        )));

        advance_schedule(&store, "nightly", Repeat::None, ScalePhase::ScaleDown)
            .await
            .unwrap();

        let stored = store.current().unwrap().status.unwrap();
        assert_eq!(stored.current, Some(ScalePhase::ScaleUp));
        assert_eq!(stored.state, Some(ScheduleState::ScheduleSuccess));
        assert!(!stored.finished);
        // The scaleup instant is untouched.
        assert_eq!(
            stored.next_scale_up_time.as_deref(),
            Some("2024-06-02T06:00:00Z")
        );
    }

    #[tokio::test]
    async fn test_one_shot_scaleup_completion_finishes() {
        let store = MemoryScheduleStore::with(Some(schedule(
            Repeat::None,
            status(
                "2024-06-01T22:00:00Z",
                "2024-06-02T06:00:00Z",
                ScalePhase::ScaleUp,
            ),
        )));

        advance_schedule(&store, "nightly", Repeat::None, ScalePhase::ScaleUp)
            .await
            .unwrap();

        let stored = store.current().unwrap().status.unwrap();
        assert!(stored.finished);
        assert_eq!(stored.state, Some(ScheduleState::ScheduleCompleted));
    }

    /// A repeating schedule advances both timestamps by exactly one period
    /// after the scaleup completes.
    #[tokio::test]
    async fn test_daily_scaleup_completion_advances_one_period() {
        let store = MemoryScheduleStore::with(Some(schedule(
            Repeat::Daily,
            status(
                "2024-06-01T22:00:00Z",
                "2024-06-02T06:00:00Z",
                ScalePhase::ScaleUp,
            ),
        )));

        advance_schedule(&store, "nightly", Repeat::Daily, ScalePhase::ScaleUp)
            .await
            .unwrap();

        let stored = store.current().unwrap().status.unwrap();
        assert!(!stored.finished);
        assert_eq!(stored.current, Some(ScalePhase::ScaleDown));
        assert_eq!(
            stored.next_scale_down_time.map(|t| utc(&t)),
            Some(utc("2024-06-02T22:00:00Z"))
        );
        assert_eq!(
            stored.next_scale_up_time.map(|t| utc(&t)),
            Some(utc("2024-06-03T06:00:00Z"))
        );
    }

    #[tokio::test]
    async fn test_weekly_advances_seven_days() {
        let store = MemoryScheduleStore::with(Some(schedule(
            Repeat::Weekly,
            status(
                "2024-06-01T22:00:00Z",
                "2024-06-02T06:00:00Z",
                ScalePhase::ScaleUp,
            ),
        )));

        advance_schedule(&store, "nightly", Repeat::Weekly, ScalePhase::ScaleUp)
            .await
            .unwrap();

        let stored = store.current().unwrap().status.unwrap();
        assert_eq!(
            stored.next_scale_down_time.map(|t| utc(&t)),
            Some(utc("2024-06-08T22:00:00Z"))
        );
    }

    #[tokio::test]
    async fn test_write_failure_marks_schedule_failed() {
        let store = MemoryScheduleStore::with(Some(schedule(
            Repeat::None,
            status(
                "2024-06-01T22:00:00Z",
                "2024-06-02T06:00:00Z",
                ScalePhase::ScaleDown,
            ),
        )));

        let err = TurndownError::ProviderUnavailable("cloud melted".to_string());
        write_failure(&store, "nightly", &err).await.unwrap();

        let stored = store.current().unwrap().status.unwrap();
        assert_eq!(stored.state, Some(ScheduleState::ScheduleFailed));
        assert!(stored.error.unwrap().contains("cloud melted"));
    }

    #[tokio::test]
    async fn test_advance_ignores_vanished_schedule() {
        let store = MemoryScheduleStore::with(None);
        advance_schedule(&store, "nightly", Repeat::None, ScalePhase::ScaleDown)
            .await
            .unwrap();
        assert!(store.current().is_none());
    }
}
