// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `gke_metadata.rs`

#[cfg(test)]
mod tests {
    use super::super::parse_kube_env_zone;

    #[test]
    fn test_parse_kube_env_extracts_zone() {
        let kube_env = "CLUSTER_NAME: prod\nZONE: us-central1-a\nNODE_TAINTS: []\n";
        assert_eq!(
            parse_kube_env_zone(kube_env),
            Some("us-central1-a".to_string())
        );
    }

    #[test]
    fn test_parse_kube_env_ignores_other_keys() {
        let kube_env = "AUTOSCALER_ZONE: nope\nKUBELET_ARGS: --zone=fake\n";
        assert_eq!(parse_kube_env_zone(kube_env), None);
    }

    #[test]
    fn test_parse_kube_env_trims_whitespace() {
        let kube_env = "ZONE: europe-west1-b \n";
        assert_eq!(
            parse_kube_env_zone(kube_env),
            Some("europe-west1-b".to_string())
        );
    }

    #[test]
    fn test_parse_kube_env_empty_input() {
        assert_eq!(parse_kube_env_zone(""), None);
        assert_eq!(parse_kube_env_zone("ZONE: \n"), None);
    }
}
