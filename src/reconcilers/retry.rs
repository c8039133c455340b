// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Retry logic with bounded exponential backoff for cloud provider mutations.
//!
//! Transient provider failures (throttling, 5xx, DNS hiccups) are retried
//! with exponential backoff; permanent errors fail immediately. A mutation
//! that enters retries increments the provider retry metric exactly once,
//! however many attempts it takes.

use crate::constants::{
    PROVIDER_RETRY_INITIAL_INTERVAL_SECS, PROVIDER_RETRY_MAX_ATTEMPTS,
    PROVIDER_RETRY_MAX_INTERVAL_SECS, PROVIDER_RETRY_MULTIPLIER, RETRY_RANDOMIZATION_FACTOR,
};
use crate::errors::{TurndownError, TurndownResult};
use rand::Rng;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Exponential backoff with jitter and an attempt cap.
pub struct ExponentialBackoff {
    /// Interval the next backoff will be derived from
    pub current_interval: Duration,
    /// Maximum interval between attempts
    pub max_interval: Duration,
    /// Growth factor (typically 2.0 for doubling)
    pub multiplier: f64,
    /// Randomization factor (e.g. 0.1 for ±10%)
    pub randomization_factor: f64,
    /// Total attempts allowed, including the first
    pub max_attempts: u32,
}

impl ExponentialBackoff {
    fn new(
        initial_interval: Duration,
        max_interval: Duration,
        multiplier: f64,
        randomization_factor: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            current_interval: initial_interval,
            max_interval,
            multiplier,
            randomization_factor,
            max_attempts,
        }
    }

    /// The next backoff interval with jitter applied.
    pub fn next_backoff(&mut self) -> Duration {
        let interval = self.current_interval;
        let jittered = self.apply_jitter(interval);

        let next = interval.as_secs_f64() * self.multiplier;
        self.current_interval = Duration::from_secs_f64(next).min(self.max_interval);

        jittered
    }

    /// Apply randomization (jitter) to an interval.
    fn apply_jitter(&self, interval: Duration) -> Duration {
        if self.randomization_factor == 0.0 {
            return interval;
        }

        let secs = interval.as_secs_f64();
        let delta = secs * self.randomization_factor;
        let min = secs - delta;
        let max = secs + delta;

        let mut rng = rand::thread_rng();
        let jittered = rng.gen_range(min..=max);

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Default backoff for cloud provider mutations.
///
/// # Configuration
///
/// - **Initial interval**: 2 seconds
/// - **Multiplier**: 2.0 (exponential growth)
/// - **Max interval**: 60 seconds
/// - **Max attempts**: 5
/// - **Randomization**: ±10%
///
/// The resulting schedule is roughly 2s, 4s, 8s, 16s between the five
/// attempts.
#[must_use]
pub fn provider_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_secs(PROVIDER_RETRY_INITIAL_INTERVAL_SECS),
        Duration::from_secs(PROVIDER_RETRY_MAX_INTERVAL_SECS),
        PROVIDER_RETRY_MULTIPLIER,
        RETRY_RANDOMIZATION_FACTOR,
        PROVIDER_RETRY_MAX_ATTEMPTS,
    )
}

/// Run a provider mutation with bounded retries.
///
/// Retries only errors whose kind is retryable; a mutation that needs any
/// retries increments the provider retry metric once, labeled with
/// `provider` and `operation`.
///
/// # Arguments
///
/// * `provider` - backend name for logs and metrics
/// * `operation` - short operation name (e.g. `set_node_pool_sizes`)
/// * `body` - async closure performing the mutation
///
/// # Errors
///
/// Returns the first non-retryable error, or the final error once the
/// attempt cap is reached.
pub async fn retry_provider<T, F, Fut>(
    provider: &str,
    operation: &str,
    mut body: F,
) -> TurndownResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = TurndownResult<T>>,
{
    let mut backoff = provider_backoff();
    let max_attempts = backoff.max_attempts;

    for attempt in 1..=max_attempts {
        match body().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(provider, operation, attempt, "Provider call succeeded after retries");
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = backoff.next_backoff();
                warn!(
                    provider,
                    operation,
                    attempt,
                    retry_after = ?delay,
                    error = %e,
                    "Transient provider error, will retry"
                );
                if attempt == 1 {
                    crate::metrics::record_provider_retry(provider, operation);
                }
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!(provider, operation, attempt, error = %e, "Provider call failed");
                return Err(e);
            }
        }
    }

    // The loop always returns from its final iteration.
    Err(TurndownError::InvariantViolation(format!(
        "retry loop for {operation} exited without a result"
    )))
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
