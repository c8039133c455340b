// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for strategy selection.

#[cfg(test)]
mod tests {
    use super::super::{strategy_kind_for, StrategyKind, TurndownPlan};
    use crate::provider::ProviderCapabilities;

    #[test]
    fn test_managed_control_plane_selects_masterless() {
        let kind = strategy_kind_for(ProviderCapabilities {
            managed_control_plane: true,
            supports_self_host: false,
        })
        .unwrap();
        assert_eq!(kind, StrategyKind::Masterless);
    }

    #[test]
    fn test_managed_control_plane_wins_over_self_host() {
        // A hypothetical provider declaring both still gets the simpler path.
        let kind = strategy_kind_for(ProviderCapabilities {
            managed_control_plane: true,
            supports_self_host: true,
        })
        .unwrap();
        assert_eq!(kind, StrategyKind::Masterless);
    }

    #[test]
    fn test_self_host_selects_standard() {
        let kind = strategy_kind_for(ProviderCapabilities {
            managed_control_plane: false,
            supports_self_host: true,
        })
        .unwrap();
        assert_eq!(kind, StrategyKind::Standard);
    }

    #[test]
    fn test_neither_capability_is_unsupported() {
        let err = strategy_kind_for(ProviderCapabilities {
            managed_control_plane: false,
            supports_self_host: false,
        })
        .unwrap_err();
        assert_eq!(err.reason(), "ProviderUnsupported");
    }

    #[test]
    fn test_default_plan_excludes_nothing() {
        let plan = TurndownPlan::default();
        assert!(plan.exclude_pool_ids.is_empty());
        assert!(plan.extra_snapshots.is_empty());
    }
}
