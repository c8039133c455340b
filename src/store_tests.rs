// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `store.rs`

#[cfg(test)]
mod tests {
    use super::super::{MemoryScheduleStore, ScheduleStore};
    use crate::crd::{
        Repeat, ScalePhase, ScheduleState, TurndownSchedule, TurndownScheduleSpec,
        TurndownScheduleStatus,
    };
    use kube::core::ObjectMeta;

    fn schedule(name: &str) -> TurndownSchedule {
        TurndownSchedule {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: TurndownScheduleSpec {
                start: "2024-06-01T22:00:00Z".to_string(),
                end: "2024-06-02T06:00:00Z".to_string(),
                repeat: Repeat::None,
            },
            status: None,
        }
    }

    #[tokio::test]
    async fn test_get_returns_stored_schedule() {
        let store = MemoryScheduleStore::with(Some(schedule("nightly")));
        let got = store.get().await.unwrap().unwrap();
        assert_eq!(got.metadata.name.as_deref(), Some("nightly"));
    }

    #[tokio::test]
    async fn test_get_empty_store() {
        let store = MemoryScheduleStore::with(None);
        assert!(store.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_status_stamps_last_updated() {
        let store = MemoryScheduleStore::with(Some(schedule("nightly")));

        let status = TurndownScheduleStatus {
            state: Some(ScheduleState::ScheduleSuccess),
            current: Some(ScalePhase::ScaleDown),
            ..Default::default()
        };
        let updated = store.update_status("nightly", status).await.unwrap();

        let stored = updated.status.unwrap();
        assert_eq!(stored.state, Some(ScheduleState::ScheduleSuccess));
        assert!(stored.last_updated.is_some(), "lastUpdated must be stamped");
    }

    #[tokio::test]
    async fn test_update_status_unknown_name_conflicts() {
        let store = MemoryScheduleStore::with(Some(schedule("nightly")));
        let err = store
            .update_status("other", TurndownScheduleStatus::default())
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "ConcurrentModification");
    }
}
