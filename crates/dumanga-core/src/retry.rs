//! Per-attempt timeout and bounded retry for remote calls.

use std::future::Future;
use std::time::Duration;

use crate::remote::ClientError;

/// How long one attempt may take and how often a retryable failure is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    /// Base delay, doubled on each retry.
    pub backoff: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

impl FetchPolicy {
    /// Same timeout, no retries.
    pub fn single_attempt(self) -> Self {
        Self {
            max_retries: 0,
            ..self
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// Delay before retry number `attempt` (0-based): exponential plus up to
    /// half a base period of jitter.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let base = self.backoff.saturating_mul(1u32 << attempt.min(10));
        let half = (self.backoff.as_millis() / 2) as u64;
        let jitter = if half == 0 { 0 } else { fastrand::u64(0..=half) };
        base + Duration::from_millis(jitter)
    }
}

/// Run `op` under `policy`. `what` names the operation in logs.
pub async fn with_policy<T, F, Fut>(
    policy: &FetchPolicy,
    what: &str,
    mut op: F,
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut attempt = 0;
    loop {
        let result = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout),
        };
        match result {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_retries && e.is_retryable() => {
                let delay = policy.backoff_for(attempt);
                tracing::debug!(
                    what,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
