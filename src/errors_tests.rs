// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `errors.rs`

#[cfg(test)]
mod tests {
    use super::super::TurndownError;

    fn api_error(code: u16) -> TurndownError {
        TurndownError::Kube(kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: "Test".to_string(),
            code,
        }))
    }

    #[test]
    fn test_provider_unavailable_is_retryable() {
        let err = TurndownError::ProviderUnavailable("throttled".to_string());
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_configuration_is_not_retryable() {
        let err = TurndownError::Configuration("start >= end".to_string());
        assert!(!err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_fatal_kinds() {
        assert!(TurndownError::ProviderUnsupported("azure".to_string()).is_fatal());
        assert!(TurndownError::InvariantViolation("no original sizes".to_string()).is_fatal());
        assert!(!TurndownError::ConcurrentModification.is_fatal());
    }

    #[test]
    fn test_kube_429_and_5xx_are_retryable() {
        assert!(api_error(429).is_retryable());
        assert!(api_error(503).is_retryable());
        assert!(!api_error(404).is_retryable());
        assert!(!api_error(400).is_retryable());
    }

    #[test]
    fn test_reason_strings_are_camel_case_kinds() {
        assert_eq!(
            TurndownError::DrainBudgetExceeded {
                node: "node-1".to_string(),
                reason: "pdb".to_string(),
            }
            .reason(),
            "DrainBudgetExceeded"
        );
        assert_eq!(
            TurndownError::ConcurrentModification.reason(),
            "ConcurrentModification"
        );
    }
}
