//! Bounded retry with deterministic backoff for upstream calls.
//!
//! Every network call in the pipeline (indexing API, node RPC, remote cache
//! tier) goes through [`retry`]. Backoff is deterministic — no jitter — so
//! tests can assert exact wait sequences.
//!
//! Rate-limit responses are special-cased: once the last attempt fails with a
//! rate-limit error there is no point burning the remaining budget, so the
//! loop short-circuits into [`RetryError::RateLimited`] and callers can
//! surface the condition distinctly instead of as a generic exhaustion.

use std::{future::Future, time::Duration};
use tracing::{debug, warn};

/// Retry policy: attempt count and wait computation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Number of retries after the initial attempt.
    pub retries: u32,
    /// Base delay between attempts.
    pub delay: Duration,
    /// Exponential backoff (`delay * 2^(attempt-1)`) when set; otherwise
    /// linear capped at 3x (`delay * min(attempt, 3)`).
    pub backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { retries: 3, delay: Duration::from_millis(500), backoff: true }
    }
}

impl RetryPolicy {
    /// Wait before retry number `attempt` (1-based).
    #[must_use]
    pub fn wait_for(&self, attempt: u32) -> Duration {
        if self.backoff {
            self.delay.saturating_mul(1u32 << (attempt.saturating_sub(1)).min(16))
        } else {
            self.delay.saturating_mul(attempt.min(3))
        }
    }
}

/// Failure modes of a retried operation.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The final attempt failed with a rate-limit condition; remaining
    /// attempts were not consumed.
    #[error("rate limit exceeded: {0}")]
    RateLimited(E),

    /// All attempts failed; carries the last error.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    /// The underlying error from the last attempt.
    pub fn into_source(self) -> E {
        match self {
            RetryError::RateLimited(e) | RetryError::Exhausted { last: e, .. } => e,
        }
    }
}

/// Heuristic for upstream rate-limit conditions.
///
/// Matches the strings the indexing service and public RPC endpoints actually
/// return; checked against the error's `Display` output.
#[must_use]
pub fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("rate limit") ||
        lower.contains("too many requests") ||
        lower.contains("429") ||
        lower.contains("-32005")
}

/// Runs `op` up to `1 + policy.retries` times.
///
/// The operation is a closure returning a fresh future per attempt. Waits
/// between attempts follow [`RetryPolicy::wait_for`]. A rate-limit error on
/// the final attempt fails fast as [`RetryError::RateLimited`]; every other
/// error is rethrown unchanged inside [`RetryError::Exhausted`] once attempts
/// run out.
///
/// # Errors
///
/// Returns [`RetryError`] when every attempt failed.
pub async fn retry<T, E, F, Fut>(mut op: F, policy: &RetryPolicy) -> Result<T, RetryError<E>>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.retries.saturating_add(1);

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                let rate_limited = is_rate_limit_message(&err.to_string());

                if rate_limited {
                    warn!(attempt, error = %err, "rate limited, aborting remaining retries");
                    return Err(RetryError::RateLimited(err));
                }

                if attempt == attempts {
                    return Err(RetryError::Exhausted { attempts, last: err });
                }

                let wait = policy.wait_for(attempt);
                warn!(attempt, wait_ms = wait.as_millis() as u64, error = %err, "retrying");
                tokio::time::sleep(wait).await;
            }
        }
    }

    unreachable!("retry loop always returns within the attempt range")
}
