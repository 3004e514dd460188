//! Exponential backoff for transient transport failures

use std::{future::Future, time::Duration};

use crate::protocol::error::A2AError;

/// Reconnect and retry policy
///
/// Attempt `n` (zero-based) waits `min(cap, base * 2^n)` before retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub base: Duration,

    /// Upper bound for any single delay
    pub cap: Duration,

    /// Maximum number of consecutive retries
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(8),
            max_retries: 5,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy
    pub fn new(base: Duration, cap: Duration, max_retries: u32) -> Self {
        Self {
            base,
            cap,
            max_retries,
        }
    }

    /// A policy that never retries
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (zero-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.cap, |delay| delay.min(self.cap))
    }
}

/// Run `operation`, retrying transient failures according to `policy`.
///
/// Non-transient errors are returned immediately. Once the budget is spent the
/// last transient error is promoted to [`A2AError::Unreachable`].
pub async fn retry_transient<T, Op, Fut>(
    policy: &BackoffPolicy,
    what: &str,
    mut operation: Op,
) -> Result<T, A2AError>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, A2AError>>,
{
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && attempt < policy.max_retries => {
                let delay = policy.delay(attempt);
                attempt += 1;
                tracing::warn!(
                    operation = what,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient transport failure; retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) => return Err(error.into_unreachable()),
        }
    }
}
