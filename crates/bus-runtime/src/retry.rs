//! Retry decision engine with exponential backoff, jitter, and a shared
//! server-busy cooldown window.
//!
//! A [`RetryPolicy`] classifies failures through [`BusError`] and decides
//! whether an operation is retried and how long to wait first. The
//! server-busy timestamp is shared by every caller of one policy instance;
//! cloning a policy snapshots the current busy value into an independent
//! flag so per-entity policies inherit an active cooldown without staying
//! coupled afterwards.

use crate::error::BusError;
use crate::options::RetryOptions;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Boxed future returned by retryable operations
pub type OperationFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BusError>> + Send + 'a>>;

/// Retry policy with exponential backoff and server-busy circuit breaking
pub struct RetryPolicy {
    options: RetryOptions,
    /// Shared across concurrent users of this instance; snapshotted on clone
    server_busy_until: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl RetryPolicy {
    /// Create new retry policy from options
    pub fn new(options: RetryOptions) -> Self {
        Self {
            options,
            server_busy_until: Arc::new(RwLock::new(None)),
        }
    }

    /// Get the configured options
    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    /// Check whether the server-busy cooldown window is active.
    ///
    /// Reads false once the window elapses; no explicit reset is required.
    pub fn is_server_busy(&self) -> bool {
        self.server_busy_remaining().is_some()
    }

    /// Time left in the server-busy window, if active
    pub fn server_busy_remaining(&self) -> Option<Duration> {
        let guard = self
            .server_busy_until
            .read()
            .unwrap_or_else(|e| e.into_inner());
        let until = (*guard)?;
        let now = Utc::now();
        if now < until {
            Some(until - now)
        } else {
            None
        }
    }

    /// Record a broker overload signal.
    ///
    /// The first busy error opens a cooldown window; further busy errors
    /// inside the window do not extend it.
    pub fn mark_server_busy(&self) {
        let mut guard = self
            .server_busy_until
            .write()
            .unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        match *guard {
            Some(until) if now < until => {}
            _ => {
                let until = now + self.options.server_busy_window;
                debug!(busy_until = %until, "entering server-busy cooldown");
                *guard = Some(until);
            }
        }
    }

    /// Clear the server-busy window on this instance only
    pub fn reset_server_busy(&self) {
        let mut guard = self
            .server_busy_until
            .write()
            .unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }

    /// Deterministic backoff for an attempt: `min(max, min * 2^attempt)`.
    ///
    /// Monotonic non-decreasing in the attempt number.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.options.min_backoff.num_milliseconds().max(0);
        let max_ms = self.options.max_backoff.num_milliseconds().max(0);
        let factor = 1i64.checked_shl(attempt.min(32)).unwrap_or(i64::MAX);
        let delay_ms = base_ms.saturating_mul(factor).min(max_ms);
        Duration::milliseconds(delay_ms)
    }

    /// Apply bounded jitter (uniform over +/-20%) to a backoff value
    fn jittered(&self, backoff: Duration) -> Duration {
        let ms = backoff.num_milliseconds().max(0) as f64;
        let factor: f64 = rand::rng().random_range(0.8..1.2);
        Duration::milliseconds((ms * factor) as i64)
    }

    /// Decide whether to retry after `error` at `attempt`, and how long to
    /// wait. `None` means the error must be surfaced to the caller.
    pub fn should_retry(
        &self,
        remaining: Duration,
        attempt: u32,
        error: &BusError,
    ) -> Option<Duration> {
        if !error.should_retry() {
            return None;
        }
        if attempt >= self.options.max_retry_count {
            return None;
        }
        if remaining <= Duration::zero() {
            return None;
        }

        let mut wait = self.jittered(self.backoff_for_attempt(attempt));
        if let Some(busy) = self.server_busy_remaining() {
            wait = wait.max(busy);
        }
        Some(wait.min(remaining))
    }

    /// Run `operation` until it succeeds, a non-retryable error occurs, the
    /// timeout budget is exhausted, or the attempt cap is reached.
    ///
    /// The operation receives the remaining time budget on each invocation.
    ///
    /// # Examples
    ///
    /// ```
    /// use bus_runtime::{BusError, RetryOptions, RetryPolicy};
    /// use chrono::Duration;
    ///
    /// # tokio_test::block_on(async {
    /// let policy = RetryPolicy::new(RetryOptions::new());
    /// let value = policy
    ///     .run_operation(Duration::seconds(5), |_remaining| {
    ///         Box::pin(async { Ok::<u32, BusError>(42) })
    ///     })
    ///     .await
    ///     .unwrap();
    /// assert_eq!(value, 42);
    /// # });
    /// ```
    pub async fn run_operation<'a, T, F>(
        &self,
        timeout: Duration,
        mut operation: F,
    ) -> Result<T, BusError>
    where
        T: Send,
        F: FnMut(Duration) -> OperationFuture<'a, T> + Send,
    {
        let deadline = Utc::now() + timeout;
        let mut attempt: u32 = 0;
        let mut last_error: Option<BusError> = None;

        loop {
            let remaining = deadline - Utc::now();
            if remaining <= Duration::zero() {
                return Err(last_error.unwrap_or(BusError::Timeout { duration: timeout }));
            }

            // An active busy window defers the attempt, whatever the backoff
            // schedule would have allowed.
            if let Some(busy) = self.server_busy_remaining() {
                if busy >= remaining {
                    return Err(last_error.unwrap_or(BusError::Timeout { duration: timeout }));
                }
                debug!(wait_ms = busy.num_milliseconds(), "waiting out server-busy window");
                sleep(busy).await;
            }

            let remaining = deadline - Utc::now();
            match operation(remaining).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if error.is_server_busy() {
                        self.mark_server_busy();
                    }

                    let remaining = deadline - Utc::now();
                    match self.should_retry(remaining, attempt, &error) {
                        Some(wait) => {
                            warn!(
                                attempt,
                                wait_ms = wait.num_milliseconds(),
                                error = %error,
                                "operation failed, retrying"
                            );
                            sleep(wait).await;
                            attempt += 1;
                            last_error = Some(error);
                        }
                        None => return Err(error),
                    }
                }
            }
        }
    }
}

impl Clone for RetryPolicy {
    /// Clone propagates the current busy value as a snapshot; subsequent
    /// sets and clears on either instance are independent.
    fn clone(&self) -> Self {
        let snapshot = *self
            .server_busy_until
            .read()
            .unwrap_or_else(|e| e.into_inner());
        Self {
            options: self.options.clone(),
            server_busy_until: Arc::new(RwLock::new(snapshot)),
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("options", &self.options)
            .field("server_busy", &self.is_server_busy())
            .finish()
    }
}

async fn sleep(duration: Duration) {
    let duration = duration.to_std().unwrap_or(std::time::Duration::ZERO);
    tokio::time::sleep(duration).await;
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
