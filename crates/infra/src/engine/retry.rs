//! Bounded retry of operations that lost an optimistic-concurrency race.

use std::thread;
use std::time::Duration;

use tracing::warn;

use branchstock_core::EngineResult;

use crate::config::RetryConfig;

/// Exponential backoff policy: `base * 2^(attempt - 1)`, capped at `max_backoff`.
///
/// Only `ConcurrentConflict` is retried; every other error is returned unchanged
/// on the first occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&crate::config::EngineConfig::default().retry)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: config.base_backoff(),
            max_backoff: config.max_backoff(),
        }
    }
}

impl RetryPolicy {
    /// A policy that surfaces the first conflict.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are exhausted. `op` must re-read whatever it depends on.
    pub fn run<T>(
        &self,
        operation: &'static str,
        mut op: impl FnMut() -> EngineResult<T>,
    ) -> EngineResult<T> {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "concurrent conflict, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_retryable() {
                        warn!(operation, attempts = attempt, error = %err, "retries exhausted");
                    }
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use branchstock_core::{EngineError, VariantId};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[test]
    fn backoff_doubles_and_is_capped() {
        let p = policy(5);
        assert_eq!(p.delay_for_attempt(1), Duration::from_millis(1));
        assert_eq!(p.delay_for_attempt(2), Duration::from_millis(2));
        assert_eq!(p.delay_for_attempt(3), Duration::from_millis(4));
        assert_eq!(p.delay_for_attempt(9), Duration::from_millis(4));
        assert_eq!(p.delay_for_attempt(200), Duration::from_millis(4));
    }

    #[test]
    fn conflicts_are_retried_until_success() {
        let mut calls = 0;
        let result = policy(3).run("test", || {
            calls += 1;
            if calls < 3 {
                Err(EngineError::conflict("stale"))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn attempts_are_bounded() {
        let mut calls = 0;
        let result: EngineResult<()> = policy(2).run("test", || {
            calls += 1;
            Err(EngineError::conflict("stale"))
        });
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls, 2);
    }

    #[test]
    fn other_errors_are_not_retried() {
        let mut calls = 0;
        let result: EngineResult<()> = policy(5).run("test", || {
            calls += 1;
            Err(EngineError::NotAParent(VariantId::new()))
        });
        assert!(matches!(result, Err(EngineError::NotAParent(_))));
        assert_eq!(calls, 1);
    }
}
