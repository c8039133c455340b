// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the provider module: classification, pool snapshots, and
//! the set/reset round trip.

#[cfg(test)]
mod tests {
    use super::super::aws::parse_instance_id;
    use super::super::testing::FakeProvider;
    use super::super::{classify_provider, ProviderKind, TurndownProvider};
    use crate::labels::EKS_NODEGROUP_LABEL;
    use std::collections::BTreeMap;

    fn eks_labels() -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(EKS_NODEGROUP_LABEL.to_string(), "workers".to_string());
        labels
    }

    #[test]
    fn test_gce_metadata_wins() {
        let kind = classify_provider(true, "aws:///us-east-2a/i-0abc", &eks_labels());
        assert_eq!(kind, ProviderKind::Gke);
    }

    #[test]
    fn test_aws_prefix_with_nodegroup_label_is_eks() {
        let kind = classify_provider(false, "aws:///us-east-2a/i-0abc", &eks_labels());
        assert_eq!(kind, ProviderKind::Eks);
    }

    #[test]
    fn test_aws_prefix_without_label_is_self_managed() {
        let kind = classify_provider(false, "AWS:///us-east-2a/i-0abc", &BTreeMap::new());
        assert_eq!(kind, ProviderKind::Aws);
    }

    #[test]
    fn test_azure_is_unsupported() {
        let kind = classify_provider(false, "azure:///sub/vm-1", &BTreeMap::new());
        assert_eq!(kind, ProviderKind::Unsupported("azure".to_string()));
    }

    #[test]
    fn test_unknown_prefix_is_unsupported() {
        assert!(matches!(
            classify_provider(false, "openstack:///vm-1", &BTreeMap::new()),
            ProviderKind::Unsupported(_)
        ));
        assert!(matches!(
            classify_provider(false, "", &BTreeMap::new()),
            ProviderKind::Unsupported(_)
        ));
    }

    /// Selection must be stable: the same observations always yield the same
    /// backend.
    #[test]
    fn test_classification_is_deterministic() {
        for _ in 0..10 {
            assert_eq!(
                classify_provider(false, "aws:///zone/i-1", &eks_labels()),
                ProviderKind::Eks
            );
        }
    }

    #[test]
    fn test_parse_instance_id() {
        assert_eq!(
            parse_instance_id("aws:///us-east-2a/i-0123456789abcdef0"),
            Some("i-0123456789abcdef0".to_string())
        );
        assert_eq!(parse_instance_id("gce://proj/zone/instance"), None);
        assert_eq!(parse_instance_id("aws:///us-east-2a/not-an-instance"), None);
        assert_eq!(parse_instance_id(""), None);
    }

    #[test]
    fn test_snapshot_captures_pool_shape() {
        let pool = FakeProvider::pool("a", 3, 1, 5, true);
        let snapshot = pool.snapshot();
        assert_eq!(snapshot.node_count, 3);
        assert_eq!(snapshot.min_count, Some(1));
        assert_eq!(snapshot.max_count, Some(5));
        assert!(snapshot.autoscaling_enabled);
    }

    /// Round trip: zeroing pools then resetting them restores size, bounds,
    /// and the autoscaling flag.
    #[tokio::test]
    async fn test_set_then_reset_round_trip() {
        let pools = vec![
            FakeProvider::pool("a", 3, 1, 5, true),
            FakeProvider::pool("b", 5, 2, 8, false),
        ];
        let provider = FakeProvider::masterless(pools.clone());

        let originals: std::collections::BTreeMap<_, _> = pools
            .iter()
            .map(|p| (p.id.clone(), p.snapshot()))
            .collect();

        provider.set_node_pool_sizes(&pools, 0).await.unwrap();
        for pool in provider.pools().values() {
            assert_eq!(pool.node_count, 0);
            assert!(!pool.autoscaling_enabled);
        }

        provider.reset_node_pool_sizes(&originals).await.unwrap();
        let state = provider.pools();
        assert_eq!(state["a"].node_count, 3);
        assert_eq!(state["a"].min_count, Some(1));
        assert_eq!(state["a"].max_count, Some(5));
        assert!(state["a"].autoscaling_enabled);
        assert_eq!(state["b"].node_count, 5);
        assert!(!state["b"].autoscaling_enabled);
    }

    #[tokio::test]
    async fn test_singleton_pool_is_idempotent_via_already_exists() {
        let provider = FakeProvider::masterless(vec![FakeProvider::pool("a", 3, 1, 5, true)]);
        let labels = BTreeMap::new();

        provider.create_singleton_node_pool(&labels).await.unwrap();
        let err = provider
            .create_singleton_node_pool(&labels)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "AlreadyExists");
    }
}
