use std::env;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Bounded retry with linear backoff, configured independently of the
/// business logic that uses it. Applied to message publishes and to
/// compensating ledger releases; on exhaustion the caller escalates by
/// logging the operation it could not complete.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, backoff: Duration::from_millis(200) }
    }
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self { max_attempts, backoff }
    }

    /// `PUBLISH_RETRY_MAX_ATTEMPTS` / `PUBLISH_RETRY_BACKOFF_MS`, with the
    /// defaults above. At least one attempt is always made.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_attempts = env::var("PUBLISH_RETRY_MAX_ATTEMPTS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(defaults.max_attempts)
            .max(1);
        let backoff = env::var("PUBLISH_RETRY_BACKOFF_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.backoff);
        Self { max_attempts, backoff }
    }
}

/// Run `op` until it succeeds or the policy is exhausted, sleeping
/// `backoff * attempt` between tries. Returns the last error untouched so
/// the caller decides how to escalate.
pub async fn with_retry<T, E, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt: u32 = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts => {
                tracing::warn!(attempt, error = %err, "{what} failed; retrying");
                tokio::time::sleep(policy.backoff * attempt).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
