// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `retry.rs`

#[cfg(test)]
mod tests {
    use super::super::{provider_backoff, retry_provider};
    use crate::errors::{TurndownError, TurndownResult};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[test]
    fn test_backoff_configuration() {
        let backoff = provider_backoff();

        assert_eq!(
            backoff.current_interval,
            Duration::from_secs(2),
            "Initial interval should be 2 seconds"
        );
        assert_eq!(
            backoff.max_interval,
            Duration::from_secs(60),
            "Max interval should be 60 seconds"
        );
        assert_eq!(backoff.max_attempts, 5, "Attempt cap should be 5");

        #[allow(clippy::float_cmp)]
        {
            assert_eq!(backoff.multiplier, 2.0, "Multiplier should double intervals");
        }
    }

    #[test]
    fn test_backoff_caps_at_max_interval() {
        let mut backoff = provider_backoff();
        backoff.randomization_factor = 0.0;

        let mut last = Duration::ZERO;
        for _ in 0..10 {
            last = backoff.next_backoff();
        }
        assert_eq!(last, Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_doubles_without_jitter() {
        let mut backoff = provider_backoff();
        backoff.randomization_factor = 0.0;

        assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(4));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_retry_until_success() {
        let calls = AtomicU32::new(0);

        let result: TurndownResult<u32> = retry_provider("fake", "resize", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 4 {
                    Err(TurndownError::ProviderUnavailable("throttled".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_cap_is_enforced() {
        let calls = AtomicU32::new(0);

        let result: TurndownResult<()> = retry_provider("fake", "resize", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TurndownError::ProviderUnavailable("still down".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 5, "exactly max_attempts calls");
    }

    #[tokio::test]
    async fn test_permanent_errors_fail_immediately() {
        let calls = AtomicU32::new(0);

        let result: TurndownResult<()> = retry_provider("fake", "resize", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TurndownError::Configuration("bad".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
