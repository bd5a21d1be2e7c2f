//! Bounded polling for eventually-consistent cluster state.
//!
//! Pods, deployments, and domain servers become ready some time after the
//! command that created them returns. Waits use exponential backoff and
//! always end: either the condition holds or the bound elapses.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Timeout and backoff for one readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub timeout: Duration,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl PollPolicy {
    /// Backoff starting at 500ms, doubling, capped at 30s per sleep.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(600))
    }
}

/// The condition never held within the policy's timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed {
    pub waited: Duration,
    pub attempts: u32,
}

/// Poll `condition` until it returns true or the policy times out.
///
/// Strategy:
/// - Initial delay from the policy (500ms by default)
/// - Exponential multiplier: 2x, capped at `max_delay`
/// - Sleep never overshoots the remaining time
/// - The condition is checked once more after the final sleep
pub async fn poll_until<F, Fut>(policy: PollPolicy, mut condition: F) -> Result<u32, Elapsed>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    let mut delay = policy.initial_delay;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if condition().await {
            return Ok(attempts);
        }

        let elapsed = start.elapsed();
        if elapsed >= policy.timeout {
            return Err(Elapsed {
                waited: elapsed,
                attempts,
            });
        }

        let remaining = policy.timeout.saturating_sub(elapsed);
        sleep(delay.min(remaining)).await;

        delay = (delay * 2).min(policy.max_delay);
    }
}
