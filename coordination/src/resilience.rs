//! Resilience - flat retry policy for every network call site
//!
//! Backends, the health prober, the tool gateway and the session protocol
//! all retry through the same abstraction: a bounded number of attempts
//! separated by a fixed delay. No exponential growth, no cancellation: a
//! stuck attempt is bounded only by the transport's own timeout.
//!
//! ```text
//! attempt 1 ──fail──▶ sleep(delay) ──▶ attempt 2 ──fail──▶ … ──▶ attempt N ──fail──▶ Err(last)
//!     └─ok──▶ Ok(value)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use coordination::resilience::RetryPolicy;
//!
//! let policy = RetryPolicy::new(3, Duration::from_millis(500));
//! let models = policy.run("list_models", |_| backend.list_models()).await?;
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Bounded attempts with a fixed inter-attempt delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero is treated as one.
    pub max_attempts: u32,
    /// Sleep between consecutive attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// A single attempt, no sleeping.
    pub const fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Effective number of attempts (never zero).
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Same policy with a different delay. Handy for tests that must not sleep.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Run `op` until it succeeds or the attempts are exhausted.
    ///
    /// `op` receives the 1-based attempt number. The error of the final
    /// attempt is returned on exhaustion.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let attempts = self.attempts();
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(label, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if attempt >= attempts => {
                    warn!(label, attempts, error = %e, "Retries exhausted");
                    return Err(e);
                }
                Err(e) => {
                    debug!(label, attempt, error = %e, "Attempt failed, retrying");
                }
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}
