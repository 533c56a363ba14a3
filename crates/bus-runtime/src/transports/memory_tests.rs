//! Tests for the in-memory broker simulation.

use super::*;
use crate::message::SessionId;

fn entity(name: &str) -> EntityPath {
    EntityPath::new(name.to_string()).unwrap()
}

fn raw_message(id: &str, body: &str) -> RawMessage {
    RawMessage {
        message_id: id.to_string(),
        body: Bytes::from(body.to_string()),
        properties: HashMap::new(),
        session_id: None,
        partition_key: None,
        correlation_id: None,
        content_type: None,
        sequence_number: 0,
        delivery_count: 0,
        enqueued_at: Timestamp::now(),
        lock_token: None,
        locked_until: None,
    }
}

fn peek_lock_settings() -> ReceiveLinkSettings {
    ReceiveLinkSettings {
        mode: ReceiveMode::PeekLock,
        prefetch: 0,
        session_id: None,
    }
}

fn timeout() -> Duration {
    Duration::seconds(5)
}

async fn send_one(transport: &InMemoryTransport, path: &EntityPath, id: &str) {
    let link = transport.open_send_link(path, timeout()).await.unwrap();
    let tag = LockToken::new().as_delivery_tag();
    transport
        .send(&link, &[raw_message(id, "payload")], &tag, timeout())
        .await
        .unwrap();
    transport.close_link(&link).await;
}

async fn receive_one(
    transport: &InMemoryTransport,
    link: &LinkHandle,
) -> RawMessage {
    let mut messages = transport
        .receive(link, 1, Duration::milliseconds(20), timeout())
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    messages.remove(0)
}

// ============================================================================
// Send and receive
// ============================================================================

#[tokio::test]
async fn test_send_assigns_increasing_sequence_numbers() {
    let transport = InMemoryTransport::new();
    let path = entity("orders");
    send_one(&transport, &path, "m1").await;
    send_one(&transport, &path, "m2").await;

    let link = transport
        .open_receive_link(&path, &peek_lock_settings(), timeout())
        .await
        .unwrap();
    let messages = transport
        .receive(&link, 10, Duration::milliseconds(20), timeout())
        .await
        .unwrap();

    assert_eq!(messages.len(), 2);
    assert!(messages[0].sequence_number < messages[1].sequence_number);
    assert_eq!(messages[0].message_id, "m1");
}

#[tokio::test]
async fn test_receive_and_delete_removes_immediately() {
    let transport = InMemoryTransport::new();
    let path = entity("orders");
    send_one(&transport, &path, "m1").await;

    let settings = ReceiveLinkSettings {
        mode: ReceiveMode::ReceiveAndDelete,
        prefetch: 0,
        session_id: None,
    };
    let link = transport
        .open_receive_link(&path, &settings, timeout())
        .await
        .unwrap();
    let message = receive_one(&transport, &link).await;

    assert!(message.lock_token.is_none());
    assert!(message.locked_until.is_none());
    assert_eq!(transport.ready_count(&path), 0);
    assert_eq!(transport.in_flight_count(&path), 0);
}

#[tokio::test]
async fn test_peek_lock_tracks_in_flight() {
    let transport = InMemoryTransport::new();
    let path = entity("orders");
    send_one(&transport, &path, "m1").await;

    let link = transport
        .open_receive_link(&path, &peek_lock_settings(), timeout())
        .await
        .unwrap();
    let message = receive_one(&transport, &link).await;

    assert!(message.lock_token.is_some());
    assert!(message.locked_until.is_some());
    assert_eq!(message.delivery_count, 1);
    assert_eq!(transport.ready_count(&path), 0);
    assert_eq!(transport.in_flight_count(&path), 1);
}

#[tokio::test]
async fn test_empty_receive_returns_after_timeout() {
    let transport = InMemoryTransport::new();
    let path = entity("orders");
    let link = transport
        .open_receive_link(&path, &peek_lock_settings(), timeout())
        .await
        .unwrap();

    let messages = transport
        .receive(&link, 1, Duration::milliseconds(20), Duration::milliseconds(60))
        .await
        .unwrap();
    assert!(messages.is_empty());
}

#[tokio::test]
async fn test_partial_batch_flushes_early() {
    let transport = InMemoryTransport::new();
    let path = entity("orders");
    send_one(&transport, &path, "m1").await;

    let link = transport
        .open_receive_link(&path, &peek_lock_settings(), timeout())
        .await
        .unwrap();

    // Asking for 10 with one available returns after the flush interval,
    // well before the receive timeout.
    let started = std::time::Instant::now();
    let messages = transport
        .receive(&link, 10, Duration::milliseconds(30), Duration::seconds(10))
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert!(started.elapsed() < std::time::Duration::from_secs(2));
}

#[tokio::test]
async fn test_session_filter() {
    let transport = InMemoryTransport::new();
    let path = entity("orders");

    let link = transport.open_send_link(&path, timeout()).await.unwrap();
    let mut for_a = raw_message("a1", "payload");
    for_a.session_id = Some("session-a".to_string());
    let mut for_b = raw_message("b1", "payload");
    for_b.session_id = Some("session-b".to_string());
    let tag = LockToken::new().as_delivery_tag();
    transport
        .send(&link, &[for_b, for_a], &tag, timeout())
        .await
        .unwrap();

    let settings = ReceiveLinkSettings {
        mode: ReceiveMode::PeekLock,
        prefetch: 0,
        session_id: Some(SessionId::new("session-a".to_string()).unwrap()),
    };
    let session_link = transport
        .open_receive_link(&path, &settings, timeout())
        .await
        .unwrap();
    let message = receive_one(&transport, &session_link).await;
    assert_eq!(message.message_id, "a1");
    assert_eq!(transport.ready_count(&path), 1);
}

// ============================================================================
// Dispositions
// ============================================================================

async fn locked_delivery(
    transport: &InMemoryTransport,
    path: &EntityPath,
) -> (LinkHandle, RawMessage) {
    send_one(transport, path, "m1").await;
    let link = transport
        .open_receive_link(path, &peek_lock_settings(), timeout())
        .await
        .unwrap();
    let message = receive_one(transport, &link).await;
    (link, message)
}

#[tokio::test]
async fn test_complete_removes_message() {
    let transport = InMemoryTransport::new();
    let path = entity("orders");
    let (link, message) = locked_delivery(&transport, &path).await;

    let tag = message.lock_token.unwrap().as_delivery_tag();
    transport
        .dispose(&link, &tag, Disposition::Complete, timeout())
        .await
        .unwrap();

    assert_eq!(transport.ready_count(&path), 0);
    assert_eq!(transport.in_flight_count(&path), 0);
}

#[tokio::test]
async fn test_abandon_requeues_at_front() {
    let transport = InMemoryTransport::new();
    let path = entity("orders");
    let (link, message) = locked_delivery(&transport, &path).await;

    let tag = message.lock_token.unwrap().as_delivery_tag();
    transport
        .dispose(&link, &tag, Disposition::Abandon, timeout())
        .await
        .unwrap();

    assert_eq!(transport.ready_count(&path), 1);
    let redelivered = receive_one(&transport, &link).await;
    assert_eq!(redelivered.delivery_count, 2);
}

#[tokio::test]
async fn test_defer_and_receive_by_sequence() {
    let transport = InMemoryTransport::new();
    let path = entity("orders");
    let (link, message) = locked_delivery(&transport, &path).await;

    let tag = message.lock_token.unwrap().as_delivery_tag();
    transport
        .dispose(&link, &tag, Disposition::Defer, timeout())
        .await
        .unwrap();
    assert_eq!(transport.deferred_count(&path), 1);

    let management = transport
        .open_management_link(&path, timeout())
        .await
        .unwrap();
    let mut request = PropertyMap::new();
    request.insert(
        properties::SEQUENCE_NUMBERS.to_string(),
        serde_json::json!([message.sequence_number]),
    );
    let response = transport
        .execute_management_request(&management, operations::RECEIVE_BY_SEQUENCE, request, timeout())
        .await
        .unwrap();

    let raws =
        crate::transport::decode_raw_messages(&response.properties[properties::MESSAGES]).unwrap();
    assert_eq!(raws.len(), 1);
    assert_eq!(raws[0].message_id, "m1");
    assert!(raws[0].lock_token.is_some());
    assert_eq!(transport.deferred_count(&path), 0);
    assert_eq!(transport.in_flight_count(&path), 1);
}

#[tokio::test]
async fn test_receive_by_unknown_sequence_is_not_found() {
    let transport = InMemoryTransport::new();
    let path = entity("orders");
    let management = transport
        .open_management_link(&path, timeout())
        .await
        .unwrap();

    let mut request = PropertyMap::new();
    request.insert(
        properties::SEQUENCE_NUMBERS.to_string(),
        serde_json::json!([999]),
    );
    let result = transport
        .execute_management_request(&management, operations::RECEIVE_BY_SEQUENCE, request, timeout())
        .await;
    assert!(matches!(result, Err(BusError::Management { status: 404, .. })));
}

#[tokio::test]
async fn test_dead_letter_records_reason() {
    let transport = InMemoryTransport::new();
    let path = entity("orders");
    let (link, message) = locked_delivery(&transport, &path).await;

    let tag = message.lock_token.unwrap().as_delivery_tag();
    transport
        .dispose(
            &link,
            &tag,
            Disposition::DeadLetter {
                reason: "poison".to_string(),
                description: Some("parse failure".to_string()),
            },
            timeout(),
        )
        .await
        .unwrap();

    assert_eq!(transport.dead_letter_count(&path), 1);
    let storage = transport.storage_ref();
    let dead = &storage.entities[path.as_str()].dead_letter[0];
    assert_eq!(
        dead.properties.get(properties::DEADLETTER_REASON).map(String::as_str),
        Some("poison")
    );
}

#[tokio::test]
async fn test_settle_unknown_token_is_lock_lost() {
    let transport = InMemoryTransport::new();
    let path = entity("orders");
    send_one(&transport, &path, "m1").await;
    let link = transport
        .open_receive_link(&path, &peek_lock_settings(), timeout())
        .await
        .unwrap();

    let tag = LockToken::new().as_delivery_tag();
    let result = transport
        .dispose(&link, &tag, Disposition::Complete, timeout())
        .await;
    assert!(matches!(result, Err(BusError::MessageLockLost { .. })));
}

// ============================================================================
// Lock expiry
// ============================================================================

#[tokio::test]
async fn test_expired_lock_requeues_message() {
    let transport = InMemoryTransport::with_config(InMemoryTransportConfig {
        lock_duration: Duration::milliseconds(30),
        ..Default::default()
    });
    let path = entity("orders");
    let (link, message) = locked_delivery(&transport, &path).await;

    tokio::time::sleep(std::time::Duration::from_millis(60)).await;

    // Settling after expiry fails and the message becomes available again.
    let tag = message.lock_token.unwrap().as_delivery_tag();
    let result = transport
        .dispose(&link, &tag, Disposition::Complete, timeout())
        .await;
    assert!(matches!(result, Err(BusError::MessageLockLost { .. })));

    let redelivered = receive_one(&transport, &link).await;
    assert_eq!(redelivered.message_id, "m1");
    assert_eq!(redelivered.delivery_count, 2);
}

#[tokio::test]
async fn test_poison_message_dead_letters_after_max_deliveries() {
    let transport = InMemoryTransport::with_config(InMemoryTransportConfig {
        lock_duration: Duration::seconds(30),
        max_delivery_count: 2,
        default_message_ttl: None,
    });
    let path = entity("orders");
    send_one(&transport, &path, "m1").await;
    let link = transport
        .open_receive_link(&path, &peek_lock_settings(), timeout())
        .await
        .unwrap();

    for _ in 0..3 {
        let message = receive_one(&transport, &link).await;
        let tag = message.lock_token.unwrap().as_delivery_tag();
        transport
            .dispose(&link, &tag, Disposition::Abandon, timeout())
            .await
            .unwrap();
    }

    assert_eq!(transport.ready_count(&path), 0);
    assert_eq!(transport.dead_letter_count(&path), 1);
}

#[tokio::test]
async fn test_renew_lock_extends_expiry() {
    let transport = InMemoryTransport::new();
    let path = entity("orders");
    let (_link, message) = locked_delivery(&transport, &path).await;
    let token = message.lock_token.unwrap();

    let management = transport
        .open_management_link(&path, timeout())
        .await
        .unwrap();
    let mut request = PropertyMap::new();
    request.insert(
        properties::LOCK_TOKEN.to_string(),
        serde_json::to_value(token).unwrap(),
    );
    let response = transport
        .execute_management_request(&management, operations::RENEW_LOCK, request, timeout())
        .await
        .unwrap();

    let renewed: Timestamp =
        serde_json::from_value(response.properties[properties::LOCKED_UNTIL].clone()).unwrap();
    assert!(renewed >= message.locked_until.unwrap());
}

// ============================================================================
// TTL
// ============================================================================

#[tokio::test]
async fn test_expired_message_is_dropped() {
    let transport = InMemoryTransport::with_config(InMemoryTransportConfig {
        lock_duration: Duration::seconds(30),
        max_delivery_count: 10,
        default_message_ttl: Some(Duration::milliseconds(20)),
    });
    let path = entity("orders");
    send_one(&transport, &path, "m1").await;

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let link = transport
        .open_receive_link(&path, &peek_lock_settings(), timeout())
        .await
        .unwrap();
    let messages = transport
        .receive(&link, 1, Duration::milliseconds(20), Duration::milliseconds(60))
        .await
        .unwrap();
    assert!(messages.is_empty());
    assert_eq!(transport.ready_count(&path), 0);
}

// ============================================================================
// Scheduling
// ============================================================================

#[tokio::test]
async fn test_schedule_and_deliver_when_due() {
    let transport = InMemoryTransport::new();
    let path = entity("orders");
    let management = transport
        .open_management_link(&path, timeout())
        .await
        .unwrap();

    let mut request = PropertyMap::new();
    request.insert(
        properties::MESSAGE.to_string(),
        serde_json::to_value(raw_message("m1", "later")).unwrap(),
    );
    request.insert(
        properties::SCHEDULED_ENQUEUE_TIME.to_string(),
        serde_json::to_value(Timestamp::now() + Duration::milliseconds(50)).unwrap(),
    );
    let response = transport
        .execute_management_request(&management, operations::SCHEDULE_MESSAGE, request, timeout())
        .await
        .unwrap();
    assert!(response.properties[properties::SEQUENCE_NUMBER].as_i64().unwrap() > 0);
    assert_eq!(transport.scheduled_count(&path), 1);

    let link = transport
        .open_receive_link(&path, &peek_lock_settings(), timeout())
        .await
        .unwrap();
    let message = receive_one(&transport, &link).await;
    assert_eq!(message.message_id, "m1");
    assert_eq!(transport.scheduled_count(&path), 0);
}

#[tokio::test]
async fn test_cancel_scheduled_message() {
    let transport = InMemoryTransport::new();
    let path = entity("orders");
    let management = transport
        .open_management_link(&path, timeout())
        .await
        .unwrap();

    let mut request = PropertyMap::new();
    request.insert(
        properties::MESSAGE.to_string(),
        serde_json::to_value(raw_message("m1", "later")).unwrap(),
    );
    request.insert(
        properties::SCHEDULED_ENQUEUE_TIME.to_string(),
        serde_json::to_value(Timestamp::now() + Duration::seconds(60)).unwrap(),
    );
    let response = transport
        .execute_management_request(&management, operations::SCHEDULE_MESSAGE, request, timeout())
        .await
        .unwrap();
    let sequence = response.properties[properties::SEQUENCE_NUMBER].as_i64().unwrap();

    let mut cancel = PropertyMap::new();
    cancel.insert(
        properties::SEQUENCE_NUMBER.to_string(),
        serde_json::Value::from(sequence),
    );
    transport
        .execute_management_request(
            &management,
            operations::CANCEL_SCHEDULED_MESSAGE,
            cancel.clone(),
            timeout(),
        )
        .await
        .unwrap();
    assert_eq!(transport.scheduled_count(&path), 0);

    // Cancelling again reports not found.
    let result = transport
        .execute_management_request(&management, operations::CANCEL_SCHEDULED_MESSAGE, cancel, timeout())
        .await;
    assert!(matches!(result, Err(BusError::Management { status: 404, .. })));
}

// ============================================================================
// Peek
// ============================================================================

#[tokio::test]
async fn test_peek_does_not_consume() {
    let transport = InMemoryTransport::new();
    let path = entity("orders");
    send_one(&transport, &path, "m1").await;
    send_one(&transport, &path, "m2").await;

    let management = transport
        .open_management_link(&path, timeout())
        .await
        .unwrap();
    let mut request = PropertyMap::new();
    request.insert(properties::FROM_SEQUENCE.to_string(), serde_json::Value::from(0));
    request.insert(properties::COUNT.to_string(), serde_json::Value::from(10));
    let response = transport
        .execute_management_request(&management, operations::PEEK, request, timeout())
        .await
        .unwrap();

    let raws =
        crate::transport::decode_raw_messages(&response.properties[properties::MESSAGES]).unwrap();
    assert_eq!(raws.len(), 2);
    assert!(raws.iter().all(|raw| raw.lock_token.is_none()));
    assert_eq!(transport.ready_count(&path), 2);
}

// ============================================================================
// Fault injection
// ============================================================================

#[tokio::test]
async fn test_detached_link_fails_structurally() {
    let transport = InMemoryTransport::new();
    let path = entity("orders");
    let link = transport.open_send_link(&path, timeout()).await.unwrap();
    transport.inject_detach(&link);

    let tag = LockToken::new().as_delivery_tag();
    let result = transport
        .send(&link, &[raw_message("m1", "payload")], &tag, timeout())
        .await;
    assert!(matches!(result, Err(BusError::LinkDetached { .. })));
}

#[tokio::test]
async fn test_closed_link_reads_as_detached() {
    let transport = InMemoryTransport::new();
    let path = entity("orders");
    let link = transport.open_send_link(&path, timeout()).await.unwrap();
    transport.close_link(&link).await;

    let tag = LockToken::new().as_delivery_tag();
    let result = transport
        .send(&link, &[raw_message("m1", "payload")], &tag, timeout())
        .await;
    assert!(matches!(result, Err(BusError::LinkDetached { .. })));
}

#[tokio::test]
async fn test_injected_send_failures_are_consumed() {
    let transport = InMemoryTransport::new();
    let path = entity("orders");
    let link = transport.open_send_link(&path, timeout()).await.unwrap();
    transport.inject_send_failures(FailureKind::ConnectionLost, 1);

    let tag = LockToken::new().as_delivery_tag();
    let first = transport
        .send(&link, &[raw_message("m1", "payload")], &tag, timeout())
        .await;
    assert!(matches!(first, Err(BusError::ConnectionLost { .. })));

    let second = transport
        .send(&link, &[raw_message("m1", "payload")], &tag, timeout())
        .await;
    assert!(second.is_ok());
    assert_eq!(transport.ready_count(&path), 1);
}

#[tokio::test]
async fn test_injected_receive_failure() {
    let transport = InMemoryTransport::new();
    let path = entity("orders");
    let link = transport
        .open_receive_link(&path, &peek_lock_settings(), timeout())
        .await
        .unwrap();
    transport.inject_receive_failures(FailureKind::ServerBusy, 1);

    let result = transport
        .receive(&link, 1, Duration::milliseconds(20), timeout())
        .await;
    assert!(matches!(result, Err(BusError::ServerBusy { .. })));
}
