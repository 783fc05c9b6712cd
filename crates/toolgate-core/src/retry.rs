//! Retry/backoff controller for connector invocations
//!
//! Policy is driven entirely by the normalized error kind and the
//! operation's idempotency: transient errors on idempotent operations
//! retry with exponential backoff and jitter; transient errors on
//! non-idempotent operations are only retried when the backend honors
//! an idempotency key, otherwise the side-effect status is unknown and
//! the attempt surfaces as ambiguous. Permanent and auth failures never
//! retry.

use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use toolgate_connectors::{ConnectorError, ErrorKind};
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (first try included)
    pub max_attempts: u32,
    /// Initial delay between attempts, in milliseconds
    pub base_delay_ms: u64,
    /// Ceiling on the computed delay, in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Add random jitter to delays
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Create a new policy with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum attempts
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set initial delay
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Enable or disable jitter
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the attempt following `attempt` (1-based)
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms as f64 * self.multiplier.powi(attempt as i32 - 1);
        let capped = base.min(self.max_delay_ms as f64) as u64;
        let delay_ms = if self.jitter {
            // Up to 25% jitter; spacing stays strictly increasing for
            // any multiplier >= 2.
            capped + clock_jitter(capped / 4)
        } else {
            capped
        };
        Duration::from_millis(delay_ms)
    }
}

/// Clock-seeded jitter; rand is not a dependency of this crate
fn clock_jitter(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos()))
        .unwrap_or(0);
    nanos % max
}

/// Terminal outcome of an operation driven through retry policy
#[derive(Debug)]
pub enum RetryOutcome {
    /// Operation succeeded
    Success {
        /// Operation output
        value: serde_json::Value,
        /// Attempts made, including the successful one
        attempts: u32,
    },
    /// Operation failed terminally (non-retryable or policy exhausted)
    Failure {
        /// Last underlying error
        error: ConnectorError,
        /// Attempts made
        attempts: u32,
    },
    /// A non-idempotent operation failed transiently without a provable
    /// no-side-effect guarantee; it was not re-invoked.
    Ambiguous {
        /// The transient error that triggered the ambiguity
        error: ConnectorError,
        /// Attempts made (always 1 by construction)
        attempts: u32,
    },
}

/// Retry controller applying one policy to connector operations
#[derive(Debug, Clone)]
pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    /// Create a controller with the given policy
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// The configured policy
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Drive one operation to a terminal outcome.
    ///
    /// `idempotent` and `key_protected` come from the connector's
    /// operation metadata; `key_protected` means the backend honors an
    /// idempotency key, making re-sends of a non-idempotent operation
    /// provably safe.
    pub async fn execute<F, Fut>(
        &self,
        idempotent: bool,
        key_protected: bool,
        mut operation: F,
    ) -> RetryOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<serde_json::Value, ConnectorError>>,
    {
        let retry_safe = idempotent || key_protected;

        for attempt in 1..=self.policy.max_attempts {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt = attempt, "Operation succeeded after retry");
                    }
                    return RetryOutcome::Success { value, attempts: attempt };
                }
                Err(error) => {
                    if error.kind != ErrorKind::Transient {
                        debug!(
                            attempt = attempt,
                            kind = %error.kind,
                            "Operation failed, not retryable"
                        );
                        return RetryOutcome::Failure { error, attempts: attempt };
                    }
                    if !retry_safe {
                        warn!(
                            attempt = attempt,
                            error = %error,
                            "Transient failure on unprotected non-idempotent operation, not retrying"
                        );
                        return RetryOutcome::Ambiguous { error, attempts: attempt };
                    }
                    if attempt == self.policy.max_attempts {
                        debug!(attempt = attempt, "Retry policy exhausted");
                        return RetryOutcome::Failure { error, attempts: attempt };
                    }
                    let delay = self.policy.calculate_delay(attempt);
                    warn!(
                        attempt = attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Transient failure, retrying"
                    );
                    sleep(delay).await;
                }
            }
        }

        unreachable!("retry loop always returns from the final attempt")
    }
}
