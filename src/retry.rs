//! ==============================================================================
//! retry.rs - retry policy for network-facing waits
//! ==============================================================================
//!
//! purpose:
//!     one description of "try again later" shared by time sync (unbounded)
//!     and delivery (bounded, one attempt by default).
//!
//! cancellation:
//!     the retry loop only ever awaits the operation and `tokio::time::sleep`,
//!     so dropping the future stops it between attempts.
//!
//! ==============================================================================

use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// 0 retries forever
    pub max_attempts: u32,
    pub interval_ms: u64,
    /// multiplier applied to the interval after each failed attempt
    pub backoff: f64,
    pub max_interval_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::once()
    }
}

impl RetryPolicy {
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            max_attempts: 0,
            interval_ms: interval.as_millis() as u64,
            backoff: 1.0,
            max_interval_ms: interval.as_millis() as u64,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_attempts == 0
    }

    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            interval_ms: 0,
            backoff: 1.0,
            max_interval_ms: 0,
        }
    }

    pub fn attempts(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval_ms: interval.as_millis() as u64,
            backoff: 1.0,
            max_interval_ms: interval.as_millis() as u64,
        }
    }

    pub fn with_backoff(mut self, factor: f64, max_interval: Duration) -> Self {
        self.backoff = factor;
        self.max_interval_ms = max_interval.as_millis() as u64;
        self
    }

    /// delay to wait after the given (1-based) failed attempt
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let base = self.interval_ms as f64;
        let factor = if self.backoff > 1.0 {
            self.backoff.powi(attempt.saturating_sub(1).min(64) as i32)
        } else {
            1.0
        };
        let cap = self.max_interval_ms.max(self.interval_ms) as f64;
        Duration::from_millis((base * factor).min(cap) as u64)
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts != 0 && attempt >= self.max_attempts
    }

    /// run `op` until it yields `Some` or the attempts run out
    pub async fn retry_until_some<T, F, Fut>(&self, mut op: F) -> Option<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt = attempt.saturating_add(1);
            if let Some(value) = op(attempt).await {
                return Some(value);
            }
            if self.exhausted(attempt) {
                return None;
            }
            tokio::time::sleep(self.delay_after(attempt)).await;
        }
    }

    /// like `retry_until_some` but for fallible operations; `retryable`
    /// decides which errors are worth another attempt
    pub async fn retry_result<T, E, F, Fut>(&self, mut op: F, retryable: impl Fn(&E) -> bool) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt = attempt.saturating_add(1);
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !retryable(&e) || self.exhausted(attempt) => return Err(e),
                Err(_) => tokio::time::sleep(self.delay_after(attempt)).await,
            }
        }
    }
}
