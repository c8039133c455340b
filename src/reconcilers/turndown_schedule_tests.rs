// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the schedule reconciler's pure pieces.
//!
//! The watch-driven paths need an API server and live in the integration
//! tests; what is covered here is the status seeding math the reconciler
//! applies on first sight of a schedule.

#[cfg(test)]
mod tests {
    use crate::crd::{roll_forward, Repeat};
    use chrono::{DateTime, Utc};

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    /// The seeding behavior for S2-style daily schedules observed late:
    /// the whole window shifts forward, never just one edge.
    #[test]
    fn test_late_daily_schedule_seeds_future_window() {
        let (down, up) = roll_forward(
            utc("2024-06-01T22:00:00Z"),
            utc("2024-06-02T06:00:00Z"),
            Repeat::Daily,
            utc("2024-06-05T12:00:00Z"),
        );
        assert_eq!(down, utc("2024-06-05T22:00:00Z"));
        assert_eq!(up, utc("2024-06-06T06:00:00Z"));
        assert!(down < up);
    }

    /// A one-shot schedule observed mid-window keeps its past scaledown so
    /// the timer fires immediately.
    #[test]
    fn test_open_one_shot_window_fires_immediately() {
        let now = utc("2024-06-02T00:00:00Z");
        let (down, up) = roll_forward(
            utc("2024-06-01T22:00:00Z"),
            utc("2024-06-02T06:00:00Z"),
            Repeat::None,
            now,
        );
        assert!(down <= now);
        assert!(up > now);
    }
}
