// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `api.rs`

#[cfg(test)]
mod tests {
    use super::super::ScheduleRequest;
    use crate::constants::DEFAULT_SCHEDULE_NAME;
    use crate::crd::Repeat;
    use chrono::{DateTime, Utc};

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_request_parses_with_default_repeat() {
        let request: ScheduleRequest = serde_json::from_str(
            r#"{"start":"2024-06-01T22:00:00Z","end":"2024-06-02T06:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(request.repeat, Repeat::None);
    }

    #[test]
    fn test_request_parses_repeat_values() {
        let request: ScheduleRequest = serde_json::from_str(
            r#"{"start":"2024-06-01T22:00:00Z","end":"2024-06-02T06:00:00Z","repeat":"daily"}"#,
        )
        .unwrap();
        assert_eq!(request.repeat, Repeat::Daily);
    }

    #[test]
    fn test_request_builds_singleton_resource() {
        let request = ScheduleRequest {
            start: "2024-06-01T22:00:00Z".to_string(),
            end: "2024-06-02T06:00:00Z".to_string(),
            repeat: Repeat::Weekly,
        };

        let schedule = request.into_schedule();
        assert_eq!(
            schedule.metadata.name.as_deref(),
            Some(DEFAULT_SCHEDULE_NAME)
        );
        assert_eq!(schedule.spec.repeat, Repeat::Weekly);
        assert!(schedule.status.is_none());
    }

    #[test]
    fn test_built_schedule_validates_like_the_reconciler() {
        let request = ScheduleRequest {
            start: "2024-06-02T06:00:00Z".to_string(),
            end: "2024-06-01T22:00:00Z".to_string(),
            repeat: Repeat::None,
        };

        let schedule = request.into_schedule();
        assert!(schedule.validate_spec(utc("2024-05-01T00:00:00Z")).is_err());
    }
}
