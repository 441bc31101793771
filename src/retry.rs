use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio::time::sleep;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: usize, delay: Duration) -> Self {
        Self { attempts, delay }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Runs `op` until it succeeds or `policy.attempts` runs fail, sleeping
/// `policy.delay` between attempts. The delay does not grow.
pub async fn retry<T, F>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: AsyncFnMut() -> Result<T>,
{
    let attempts = policy.attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        match op().await {
            Ok(v) => return Ok(v),
            Err(err) => {
                warn!("{what} failed (attempt {attempt}/{attempts}): {err:#}");
                last_err = Some(err);
            }
        }

        if attempt < attempts {
            sleep(policy.delay).await;
        }
    }

    let err = last_err.unwrap_or_else(|| anyhow!("no attempts made"));
    Err(err.context(format!("{what} failed after {attempts} attempts")))
}
