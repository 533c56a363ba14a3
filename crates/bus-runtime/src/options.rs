//! Configuration options for clients, receivers, and the receive pump.

use crate::message::{ReceiveMode, SessionId};
use chrono::Duration;

/// Retry and backoff configuration
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Backoff for the first retry attempt
    pub min_backoff: Duration,
    /// Upper bound on any single backoff wait
    pub max_backoff: Duration,
    /// Maximum number of retry attempts per operation
    pub max_retry_count: u32,
    /// Cooldown window applied after the broker signals overload
    pub server_busy_window: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            min_backoff: Duration::seconds(1),
            max_backoff: Duration::seconds(30),
            max_retry_count: 5,
            server_busy_window: Duration::seconds(10),
        }
    }
}

impl RetryOptions {
    /// Create new retry options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set minimum backoff
    pub fn with_min_backoff(mut self, min_backoff: Duration) -> Self {
        self.min_backoff = min_backoff;
        self
    }

    /// Set maximum backoff
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Set maximum retry count
    pub fn with_max_retry_count(mut self, max_retry_count: u32) -> Self {
        self.max_retry_count = max_retry_count;
        self
    }

    /// Set server-busy cooldown window
    pub fn with_server_busy_window(mut self, window: Duration) -> Self {
        self.server_busy_window = window;
        self
    }
}

/// Configuration for client initialization
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Overall timeout applied to each public operation, retries included
    pub operation_timeout: Duration,
    pub retry: RetryOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::seconds(30),
            retry: RetryOptions::default(),
        }
    }
}

impl ClientOptions {
    /// Create new client options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set per-operation timeout
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set retry options
    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }
}

/// Configuration for a single receiver
#[derive(Debug, Clone, Default)]
pub struct ReceiverOptions {
    pub receive_mode: ReceiveMode,
    /// Credit granted to the receive link ahead of demand
    pub prefetch_count: u32,
    /// Session affinity; session-scoped receivers surface session-lock errors
    pub session_id: Option<SessionId>,
    /// Per-receiver override of the client operation timeout
    pub operation_timeout: Option<Duration>,
}

impl ReceiverOptions {
    /// Create new receiver options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set receive mode
    pub fn with_receive_mode(mut self, mode: ReceiveMode) -> Self {
        self.receive_mode = mode;
        self
    }

    /// Set prefetch count
    pub fn with_prefetch_count(mut self, prefetch_count: u32) -> Self {
        self.prefetch_count = prefetch_count;
        self
    }

    /// Scope receiver to a session
    pub fn with_session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Override the client operation timeout
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }
}

/// How pump shutdown treats in-flight handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Stop issuing receives, then wait for in-flight handlers to finish
    Graceful,
    /// Stop issuing receives and return without awaiting in-flight handlers
    Immediate,
}

impl Default for ShutdownMode {
    fn default() -> Self {
        Self::Graceful
    }
}

/// Configuration for the message receive pump
#[derive(Debug, Clone)]
pub struct PumpOptions {
    /// Upper bound on concurrently in-flight handler invocations
    pub max_concurrent_calls: usize,
    /// Complete messages automatically after the handler succeeds (PeekLock)
    pub auto_complete: bool,
    /// Renew message locks while the handler runs (PeekLock)
    pub auto_renew_lock: bool,
    /// Interval between lock renewals; must be below the lock duration
    pub renew_interval: Duration,
    /// Wait budget for each receive call issued by the pump
    pub receive_wait: Duration,
    /// Pause applied when a receive returns no messages
    pub idle_backoff: Duration,
    pub shutdown_mode: ShutdownMode,
}

impl Default for PumpOptions {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 1,
            auto_complete: true,
            auto_renew_lock: false,
            renew_interval: Duration::seconds(10),
            receive_wait: Duration::seconds(5),
            idle_backoff: Duration::milliseconds(100),
            shutdown_mode: ShutdownMode::Graceful,
        }
    }
}

impl PumpOptions {
    /// Create new pump options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set handler concurrency limit
    pub fn with_max_concurrent_calls(mut self, max_concurrent_calls: usize) -> Self {
        self.max_concurrent_calls = max_concurrent_calls.max(1);
        self
    }

    /// Enable or disable auto-complete
    pub fn with_auto_complete(mut self, auto_complete: bool) -> Self {
        self.auto_complete = auto_complete;
        self
    }

    /// Enable lock renewal with the given interval
    pub fn with_auto_renew_lock(mut self, renew_interval: Duration) -> Self {
        self.auto_renew_lock = true;
        self.renew_interval = renew_interval;
        self
    }

    /// Set receive wait budget
    pub fn with_receive_wait(mut self, receive_wait: Duration) -> Self {
        self.receive_wait = receive_wait;
        self
    }

    /// Set idle backoff
    pub fn with_idle_backoff(mut self, idle_backoff: Duration) -> Self {
        self.idle_backoff = idle_backoff;
        self
    }

    /// Set shutdown mode
    pub fn with_shutdown_mode(mut self, shutdown_mode: ShutdownMode) -> Self {
        self.shutdown_mode = shutdown_mode;
        self
    }
}

#[cfg(test)]
#[path = "options_tests.rs"]
mod tests;
