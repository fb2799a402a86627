use std::thread;
use std::time::Duration;

use tracing::warn;

/// Linear backoff: attempt `n` (0-based) waits `base_delay * (n + 1)` before the next try.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * (attempt + 1)
    }
}

/// Runs `op` until it succeeds, fails with an error `is_transient` rejects, or the policy's
/// attempts are used up. The last error is returned as is.
pub fn retry_with_backoff<T, E, F, P>(policy: &RetryPolicy, is_transient: P, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 < policy.attempts && is_transient(&err) => {
                let delay = policy.delay_for(attempt);
                warn!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "transient store failure, retrying");
                thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
