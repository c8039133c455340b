// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `crd.rs`

#[cfg(test)]
mod tests {
    use super::super::{
        parse_rfc3339, roll_forward, Repeat, ScalePhase, TurndownSchedule, TurndownScheduleSpec,
    };
    use chrono::{DateTime, Duration, Utc};
    use kube::core::ObjectMeta;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn schedule(start: &str, end: &str, repeat: Repeat) -> TurndownSchedule {
        TurndownSchedule {
            metadata: ObjectMeta {
                name: Some("nightly".to_string()),
                ..Default::default()
            },
            spec: TurndownScheduleSpec {
                start: start.to_string(),
                end: end.to_string(),
                repeat,
            },
            status: None,
        }
    }

    #[test]
    fn test_repeat_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Repeat::Daily).unwrap(), "\"daily\"");
        assert_eq!(serde_json::to_string(&Repeat::None).unwrap(), "\"none\"");
        let parsed: Repeat = serde_json::from_str("\"weekly\"").unwrap();
        assert_eq!(parsed, Repeat::Weekly);
    }

    #[test]
    fn test_repeat_defaults_to_none() {
        let spec: TurndownScheduleSpec = serde_json::from_str(
            r#"{"start":"2024-06-01T22:00:00Z","end":"2024-06-02T06:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(spec.repeat, Repeat::None);
    }

    #[test]
    fn test_scale_phase_serializes_lowercase_and_flips() {
        assert_eq!(
            serde_json::to_string(&ScalePhase::ScaleDown).unwrap(),
            "\"scaledown\""
        );
        assert_eq!(ScalePhase::ScaleDown.flipped(), ScalePhase::ScaleUp);
        assert_eq!(ScalePhase::ScaleUp.flipped(), ScalePhase::ScaleDown);
    }

    #[test]
    fn test_repeat_periods() {
        assert_eq!(Repeat::None.period(), None);
        assert_eq!(Repeat::Daily.period(), Some(Duration::hours(24)));
        assert_eq!(Repeat::Weekly.period(), Some(Duration::days(7)));
    }

    #[test]
    fn test_parse_rfc3339_rejects_garbage() {
        assert!(parse_rfc3339("spec.start", "2024-06-01T22:00:00Z").is_ok());
        assert!(parse_rfc3339("spec.start", "tomorrow").is_err());
        assert!(parse_rfc3339("spec.start", "2024-06-01 22:00").is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_window() {
        let s = schedule("2024-06-02T06:00:00Z", "2024-06-01T22:00:00Z", Repeat::None);
        let err = s.validate_spec(utc("2024-05-01T00:00:00Z")).unwrap_err();
        assert!(err.to_string().contains("before end"), "{err}");
    }

    #[test]
    fn test_validate_rejects_past_one_shot() {
        let s = schedule("2024-06-01T22:00:00Z", "2024-06-02T06:00:00Z", Repeat::None);
        assert!(s.validate_spec(utc("2024-07-01T00:00:00Z")).is_err());
    }

    #[test]
    fn test_validate_accepts_past_start_when_repeating() {
        let s = schedule("2024-06-01T22:00:00Z", "2024-06-02T06:00:00Z", Repeat::Daily);
        assert!(s.validate_spec(utc("2024-07-01T00:00:00Z")).is_ok());
    }

    #[test]
    fn test_validate_accepts_open_one_shot_window() {
        // Start has passed but the window is still open: scaledown fires late.
        let s = schedule("2024-06-01T22:00:00Z", "2024-06-02T06:00:00Z", Repeat::None);
        assert!(s.validate_spec(utc("2024-06-02T00:00:00Z")).is_ok());
    }

    #[test]
    fn test_roll_forward_noop_for_future_window() {
        let down = utc("2024-06-01T22:00:00Z");
        let up = utc("2024-06-02T06:00:00Z");
        let now = utc("2024-06-01T00:00:00Z");
        assert_eq!(roll_forward(down, up, Repeat::Daily, now), (down, up));
    }

    #[test]
    fn test_roll_forward_skips_missed_occurrences() {
        let down = utc("2024-06-01T22:00:00Z");
        let up = utc("2024-06-02T06:00:00Z");
        let now = utc("2024-06-10T12:00:00Z");

        let (next_down, next_up) = roll_forward(down, up, Repeat::Daily, now);

        assert_eq!(next_down, utc("2024-06-10T22:00:00Z"));
        assert_eq!(next_up, utc("2024-06-11T06:00:00Z"));
    }

    #[test]
    fn test_roll_forward_keeps_open_window() {
        // Inside an occurrence: scaledown stays due so the cluster goes down.
        let down = utc("2024-06-01T22:00:00Z");
        let up = utc("2024-06-02T06:00:00Z");
        let now = utc("2024-06-02T01:00:00Z");

        let (next_down, next_up) = roll_forward(down, up, Repeat::Daily, now);

        assert_eq!(next_down, down);
        assert_eq!(next_up, up);
    }

    #[test]
    fn test_roll_forward_ignores_one_shot() {
        let down = utc("2024-06-01T22:00:00Z");
        let up = utc("2024-06-02T06:00:00Z");
        let now = utc("2024-08-01T00:00:00Z");
        assert_eq!(roll_forward(down, up, Repeat::None, now), (down, up));
    }

    #[test]
    fn test_status_round_trips_camel_case() {
        use super::super::{PoolSnapshot, ScheduleState, TurndownScheduleStatus};
        use std::collections::BTreeMap;

        let mut originals = BTreeMap::new();
        originals.insert(
            "projects/p/zones/z/clusters/c/nodePools/a".to_string(),
            PoolSnapshot {
                node_count: 3,
                min_count: Some(1),
                max_count: Some(5),
                autoscaling_enabled: true,
            },
        );

        let status = TurndownScheduleStatus {
            state: Some(ScheduleState::ScheduleSuccess),
            current: Some(ScalePhase::ScaleUp),
            next_scale_down_time: Some("2024-06-02T22:00:00Z".to_string()),
            next_scale_up_time: Some("2024-06-02T06:00:00Z".to_string()),
            last_updated: None,
            finished: false,
            error: None,
            original_pool_sizes: Some(originals),
        };

        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["state"], "ScheduleSuccess");
        assert_eq!(value["current"], "scaleup");
        assert!(value["nextScaleDownTime"].is_string());
        let back: TurndownScheduleStatus = serde_json::from_value(value).unwrap();
        assert_eq!(
            back.original_pool_sizes.unwrap()
                ["projects/p/zones/z/clusters/c/nodePools/a"]
                .node_count,
            3
        );
    }
}
