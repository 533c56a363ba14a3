//! Error types for broker client operations.

use chrono::Duration;
use thiserror::Error;

/// Comprehensive error type for all broker client operations
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Connection lost: {message}")]
    ConnectionLost { message: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Server busy: {message}")]
    ServerBusy { message: String },

    #[error("Link detached: {message}")]
    LinkDetached { message: String },

    #[error("Lock for message '{lock_token}' was lost or has expired")]
    MessageLockLost { lock_token: String },

    #[error("Lock for session '{session_id}' was lost or has expired")]
    SessionLockLost { session_id: String },

    #[error("Entity not found: {entity}")]
    EntityNotFound { entity: String },

    #[error("Entity is disabled: {entity}")]
    EntityDisabled { entity: String },

    #[error("Quota exceeded for {entity}: {message}")]
    QuotaExceeded { entity: String, message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Message too large: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Batch size {size} exceeds maximum {max_size}")]
    BatchTooLarge { size: usize, max_size: usize },

    #[error("A message handler is already registered for this receiver")]
    HandlerAlreadyRegistered,

    #[error("Client for '{entity}' is closed")]
    ClientClosed { entity: String },

    #[error("Management request failed with status {status}: {condition}")]
    Management { status: u16, condition: String },

    #[error("Plugin '{name}' failed: {message}")]
    Plugin { name: String, message: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl BusError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionLost { .. } => true,
            Self::Timeout { .. } => true,
            Self::ServerBusy { .. } => true,
            // A detached link is recreated on the next attempt
            Self::LinkDetached { .. } => true,
            Self::MessageLockLost { .. } => false,
            Self::SessionLockLost { .. } => false,
            Self::EntityNotFound { .. } => false,
            Self::EntityDisabled { .. } => false,
            Self::QuotaExceeded { .. } => false,
            Self::AuthenticationFailed { .. } => false,
            Self::MessageTooLarge { .. } => false,
            Self::BatchTooLarge { .. } => false,
            Self::HandlerAlreadyRegistered => false,
            Self::ClientClosed { .. } => false,
            Self::Management { status, .. } => *status >= 500,
            Self::Plugin { .. } => false,
            Self::Validation(_) => false,
        }
    }

    /// Check if error signals broker overload
    pub fn is_server_busy(&self) -> bool {
        matches!(self, Self::ServerBusy { .. })
    }

    /// Check if error should be retried
    pub fn should_retry(&self) -> bool {
        self.is_transient()
    }

    /// Get suggested retry delay
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::ServerBusy { .. } => Some(Duration::seconds(10)),
            Self::Timeout { .. } => Some(Duration::seconds(1)),
            Self::ConnectionLost { .. } => Some(Duration::seconds(5)),
            Self::LinkDetached { .. } => Some(Duration::seconds(1)),
            _ => None,
        }
    }
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
