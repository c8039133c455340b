// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `labels.rs`

#[cfg(test)]
mod tests {
    use super::super::{
        turndown_pool_labels, K8S_MANAGED_BY, TURNDOWN_NODE_LABEL, TURNDOWN_NODE_LABEL_SELECTOR,
        TURNDOWN_NODE_LABEL_VALUE,
    };
    use std::collections::BTreeMap;

    #[test]
    fn test_selector_matches_label_pair() {
        assert_eq!(
            TURNDOWN_NODE_LABEL_SELECTOR,
            format!("{TURNDOWN_NODE_LABEL}={TURNDOWN_NODE_LABEL_VALUE}")
        );
    }

    #[test]
    fn test_pool_labels_merge_extras() {
        let mut extra = BTreeMap::new();
        extra.insert("team".to_string(), "infra".to_string());

        let labels = turndown_pool_labels(&extra);

        assert_eq!(labels.get("team").map(String::as_str), Some("infra"));
        assert_eq!(
            labels.get(TURNDOWN_NODE_LABEL).map(String::as_str),
            Some("true")
        );
        assert!(labels.contains_key(K8S_MANAGED_BY));
    }

    #[test]
    fn test_pool_labels_marker_wins_over_extras() {
        let mut extra = BTreeMap::new();
        extra.insert(TURNDOWN_NODE_LABEL.to_string(), "false".to_string());

        let labels = turndown_pool_labels(&extra);

        assert_eq!(
            labels.get(TURNDOWN_NODE_LABEL).map(String::as_str),
            Some("true"),
            "turndown marker must not be overridable"
        );
    }
}
