//! Tests for the error taxonomy.

use super::*;

#[test]
fn test_transient_errors_are_retryable() {
    let errors = [
        BusError::ConnectionLost {
            message: "socket reset".to_string(),
        },
        BusError::Timeout {
            duration: Duration::seconds(30),
        },
        BusError::ServerBusy {
            message: "throttled".to_string(),
        },
        BusError::LinkDetached {
            message: "detach frame".to_string(),
        },
    ];

    for error in errors {
        assert!(error.is_transient(), "{error} should be transient");
        assert!(error.should_retry());
    }
}

#[test]
fn test_terminal_errors_are_not_retryable() {
    let errors = [
        BusError::MessageLockLost {
            lock_token: "token".to_string(),
        },
        BusError::SessionLockLost {
            session_id: "session".to_string(),
        },
        BusError::EntityNotFound {
            entity: "orders".to_string(),
        },
        BusError::EntityDisabled {
            entity: "orders".to_string(),
        },
        BusError::QuotaExceeded {
            entity: "orders".to_string(),
            message: "full".to_string(),
        },
        BusError::AuthenticationFailed {
            message: "bad token".to_string(),
        },
        BusError::HandlerAlreadyRegistered,
        BusError::ClientClosed {
            entity: "orders".to_string(),
        },
        BusError::Validation(ValidationError::Required {
            field: "session_id".to_string(),
        }),
    ];

    for error in errors {
        assert!(!error.is_transient(), "{error} should not be transient");
        assert!(!error.should_retry());
    }
}

#[test]
fn test_server_busy_classification() {
    let busy = BusError::ServerBusy {
        message: "throttled".to_string(),
    };
    assert!(busy.is_server_busy());

    let timeout = BusError::Timeout {
        duration: Duration::seconds(1),
    };
    assert!(!timeout.is_server_busy());
}

#[test]
fn test_management_status_classification() {
    let server_side = BusError::Management {
        status: 503,
        condition: "unavailable".to_string(),
    };
    assert!(server_side.is_transient());

    let client_side = BusError::Management {
        status: 404,
        condition: "not found".to_string(),
    };
    assert!(!client_side.is_transient());
}

#[test]
fn test_retry_after_hints() {
    let busy = BusError::ServerBusy {
        message: "throttled".to_string(),
    };
    assert_eq!(busy.retry_after(), Some(Duration::seconds(10)));

    let lock_lost = BusError::MessageLockLost {
        lock_token: "token".to_string(),
    };
    assert_eq!(lock_lost.retry_after(), None);
}
