//! In-memory transport implementation for testing and development.
//!
//! This module provides a fully functional in-memory broker simulation that:
//! - Assigns sequence numbers and tracks delivery counts
//! - Implements PeekLock in-flight tracking with lock expiry
//! - Supports scheduled, deferred, and dead-lettered messages
//! - Executes the management operations the receiver/sender cores rely on
//! - Allows fault injection (link detach, failing calls) for resilience tests
//!
//! This transport is intended for:
//! - Unit testing of bus-runtime consumers
//! - Development and prototyping
//! - Reference behavior for wire-protocol transports

use crate::error::BusError;
use crate::message::{EntityPath, LockToken, ReceiveMode, Timestamp};
use crate::transport::{
    operations, properties, Disposition, LinkHandle, LinkRole, ManagementResponse, PropertyMap,
    RawMessage, ReceiveLinkSettings, SendOutcome, Transport,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Duration;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// Poll interval for the receive wait loop
const RECEIVE_POLL_MS: u64 = 10;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the in-memory transport
#[derive(Debug, Clone)]
pub struct InMemoryTransportConfig {
    /// Lock duration granted to PeekLock deliveries and renewals
    pub lock_duration: Duration,
    /// Deliveries beyond this count are dead-lettered instead of requeued
    pub max_delivery_count: u32,
    /// TTL applied to messages that carry none of their own
    pub default_message_ttl: Option<Duration>,
}

impl Default for InMemoryTransportConfig {
    fn default() -> Self {
        Self {
            lock_duration: Duration::seconds(30),
            max_delivery_count: 10,
            default_message_ttl: None,
        }
    }
}

/// Kind of failure injected into upcoming transport calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ConnectionLost,
    ServerBusy,
    Timeout,
}

impl FailureKind {
    fn to_error(self) -> BusError {
        match self {
            Self::ConnectionLost => BusError::ConnectionLost {
                message: "injected connection failure".to_string(),
            },
            Self::ServerBusy => BusError::ServerBusy {
                message: "injected server busy".to_string(),
            },
            Self::Timeout => BusError::Timeout {
                duration: Duration::zero(),
            },
        }
    }
}

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// A message stored in an entity with broker metadata
#[derive(Clone)]
struct StoredMessage {
    message_id: String,
    body: Bytes,
    properties: HashMap<String, String>,
    session_id: Option<String>,
    partition_key: Option<String>,
    correlation_id: Option<String>,
    content_type: Option<String>,
    sequence_number: i64,
    delivery_count: u32,
    enqueued_at: Timestamp,
    available_at: Timestamp,
    expires_at: Option<Timestamp>,
}

impl StoredMessage {
    fn from_raw(raw: &RawMessage, sequence_number: i64, config: &InMemoryTransportConfig) -> Self {
        let now = Timestamp::now();
        let expires_at = config.default_message_ttl.map(|ttl| now + ttl);

        Self {
            message_id: raw.message_id.clone(),
            body: raw.body.clone(),
            properties: raw.properties.clone(),
            session_id: raw.session_id.clone(),
            partition_key: raw.partition_key.clone(),
            correlation_id: raw.correlation_id.clone(),
            content_type: raw.content_type.clone(),
            sequence_number,
            delivery_count: 0,
            enqueued_at: now,
            available_at: now,
            expires_at,
        }
    }

    fn to_raw(&self, lock_token: Option<LockToken>, locked_until: Option<Timestamp>) -> RawMessage {
        RawMessage {
            message_id: self.message_id.clone(),
            body: self.body.clone(),
            properties: self.properties.clone(),
            session_id: self.session_id.clone(),
            partition_key: self.partition_key.clone(),
            correlation_id: self.correlation_id.clone(),
            content_type: self.content_type.clone(),
            sequence_number: self.sequence_number,
            delivery_count: self.delivery_count,
            enqueued_at: self.enqueued_at,
            lock_token,
            locked_until,
        }
    }

    /// Check if message is expired based on TTL
    fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at.has_elapsed(),
            None => false,
        }
    }
}

/// A PeekLock delivery currently held by a receiver
struct InFlightMessage {
    message: StoredMessage,
    locked_until: Timestamp,
}

impl InFlightMessage {
    fn is_expired(&self) -> bool {
        self.locked_until.has_elapsed()
    }
}

/// Internal state for a single broker entity
#[derive(Default)]
struct EntityStore {
    next_sequence: i64,
    /// Main message store (FIFO order)
    ready: VecDeque<StoredMessage>,
    /// Messages awaiting their scheduled enqueue time
    scheduled: Vec<StoredMessage>,
    /// Messages set aside until received by sequence number
    deferred: HashMap<i64, StoredMessage>,
    /// PeekLock deliveries being processed
    in_flight: HashMap<LockToken, InFlightMessage>,
    /// Dead letter store for poisoned messages
    dead_letter: VecDeque<StoredMessage>,
}

impl EntityStore {
    fn assign_sequence(&mut self) -> i64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    /// Move due scheduled messages into the ready store, drop expired ones,
    /// and requeue or dead-letter deliveries whose lock expired.
    fn reap(&mut self, max_delivery_count: u32) {
        let mut due = Vec::new();
        self.scheduled.retain(|message| {
            if message.available_at.has_elapsed() {
                due.push(message.clone());
                false
            } else {
                true
            }
        });
        due.sort_by_key(|m| m.sequence_number);
        for message in due {
            self.ready.push_back(message);
        }

        self.ready.retain(|message| !message.is_expired());

        let expired: Vec<LockToken> = self
            .in_flight
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(token, _)| *token)
            .collect();
        for token in expired {
            if let Some(entry) = self.in_flight.remove(&token) {
                self.requeue_or_dead_letter(entry.message, max_delivery_count);
            }
        }
    }

    fn requeue_or_dead_letter(&mut self, message: StoredMessage, max_delivery_count: u32) {
        if message.delivery_count > max_delivery_count {
            self.dead_letter.push_back(message);
        } else {
            self.ready.push_front(message);
        }
    }

    /// Pop the next ready message, honoring an optional session filter
    fn pop_ready(&mut self, session_filter: Option<&str>) -> Option<StoredMessage> {
        match session_filter {
            None => self.ready.pop_front(),
            Some(session) => {
                let index = self
                    .ready
                    .iter()
                    .position(|m| m.session_id.as_deref() == Some(session))?;
                self.ready.remove(index)
            }
        }
    }

    /// Settle an in-flight delivery by token
    fn settle(
        &mut self,
        token: &LockToken,
        disposition: &Disposition,
        max_delivery_count: u32,
    ) -> Result<(), BusError> {
        let entry = self
            .in_flight
            .remove(token)
            .ok_or_else(|| BusError::MessageLockLost {
                lock_token: token.to_string(),
            })?;

        if entry.is_expired() {
            self.requeue_or_dead_letter(entry.message, max_delivery_count);
            return Err(BusError::MessageLockLost {
                lock_token: token.to_string(),
            });
        }

        match disposition {
            Disposition::Complete => {}
            Disposition::Abandon => {
                self.requeue_or_dead_letter(entry.message, max_delivery_count);
            }
            Disposition::Defer => {
                self.deferred
                    .insert(entry.message.sequence_number, entry.message);
            }
            Disposition::DeadLetter {
                reason,
                description,
            } => {
                let mut message = entry.message;
                message
                    .properties
                    .insert(properties::DEADLETTER_REASON.to_string(), reason.clone());
                if let Some(description) = description {
                    message.properties.insert(
                        properties::DEADLETTER_DESCRIPTION.to_string(),
                        description.clone(),
                    );
                }
                self.dead_letter.push_back(message);
            }
        }
        Ok(())
    }
}

/// State of one open link
struct LinkInfo {
    entity: String,
    detached: bool,
    settings: Option<ReceiveLinkSettings>,
}

/// Thread-safe storage for the simulated broker
struct BrokerStorage {
    config: InMemoryTransportConfig,
    entities: HashMap<String, EntityStore>,
    links: HashMap<uuid::Uuid, LinkInfo>,
    send_failures: Vec<FailureKind>,
    receive_failures: Vec<FailureKind>,
}

impl BrokerStorage {
    fn new(config: InMemoryTransportConfig) -> Self {
        Self {
            config,
            entities: HashMap::new(),
            links: HashMap::new(),
            send_failures: Vec::new(),
            receive_failures: Vec::new(),
        }
    }

    fn entity_mut(&mut self, name: &str) -> &mut EntityStore {
        self.entities.entry(name.to_string()).or_default()
    }

    /// Look up an open, attached link; detached links signal a structural
    /// fault so the consumer recreates them.
    fn link(&self, handle: &LinkHandle) -> Result<&LinkInfo, BusError> {
        let info = self
            .links
            .get(&handle.id())
            .ok_or_else(|| BusError::LinkDetached {
                message: format!("link {} is not open", handle.id()),
            })?;
        if info.detached {
            return Err(BusError::LinkDetached {
                message: format!("link {} was detached", handle.id()),
            });
        }
        Ok(info)
    }
}

// ============================================================================
// InMemoryTransport
// ============================================================================

/// In-memory transport implementation
pub struct InMemoryTransport {
    storage: Arc<RwLock<BrokerStorage>>,
}

impl InMemoryTransport {
    /// Create new in-memory transport with default configuration
    pub fn new() -> Self {
        Self::with_config(InMemoryTransportConfig::default())
    }

    /// Create new in-memory transport with configuration
    pub fn with_config(config: InMemoryTransportConfig) -> Self {
        Self {
            storage: Arc::new(RwLock::new(BrokerStorage::new(config))),
        }
    }

    fn storage_mut(&self) -> std::sync::RwLockWriteGuard<'_, BrokerStorage> {
        self.storage.write().unwrap_or_else(|e| e.into_inner())
    }

    fn storage_ref(&self) -> std::sync::RwLockReadGuard<'_, BrokerStorage> {
        self.storage.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark a link as detached; subsequent calls on it fail structurally
    pub fn inject_detach(&self, link: &LinkHandle) {
        let mut storage = self.storage_mut();
        if let Some(info) = storage.links.get_mut(&link.id()) {
            info.detached = true;
        }
    }

    /// Fail the next `count` send calls with the given kind
    pub fn inject_send_failures(&self, kind: FailureKind, count: u32) {
        let mut storage = self.storage_mut();
        for _ in 0..count {
            storage.send_failures.push(kind);
        }
    }

    /// Fail the next `count` receive calls with the given kind
    pub fn inject_receive_failures(&self, kind: FailureKind, count: u32) {
        let mut storage = self.storage_mut();
        for _ in 0..count {
            storage.receive_failures.push(kind);
        }
    }

    /// Number of immediately available messages in an entity
    pub fn ready_count(&self, entity: &EntityPath) -> usize {
        let storage = self.storage_ref();
        storage
            .entities
            .get(entity.as_str())
            .map_or(0, |store| store.ready.len())
    }

    /// Number of scheduled (not yet due) messages in an entity
    pub fn scheduled_count(&self, entity: &EntityPath) -> usize {
        let storage = self.storage_ref();
        storage
            .entities
            .get(entity.as_str())
            .map_or(0, |store| store.scheduled.len())
    }

    /// Number of deferred messages in an entity
    pub fn deferred_count(&self, entity: &EntityPath) -> usize {
        let storage = self.storage_ref();
        storage
            .entities
            .get(entity.as_str())
            .map_or(0, |store| store.deferred.len())
    }

    /// Number of locked in-flight deliveries in an entity
    pub fn in_flight_count(&self, entity: &EntityPath) -> usize {
        let storage = self.storage_ref();
        storage
            .entities
            .get(entity.as_str())
            .map_or(0, |store| store.in_flight.len())
    }

    /// Number of dead-lettered messages in an entity
    pub fn dead_letter_count(&self, entity: &EntityPath) -> usize {
        let storage = self.storage_ref();
        storage
            .entities
            .get(entity.as_str())
            .map_or(0, |store| store.dead_letter.len())
    }

    /// Drain available messages for one receive iteration
    fn drain(
        &self,
        link: &LinkHandle,
        max_count: usize,
        out: &mut Vec<RawMessage>,
    ) -> Result<(), BusError> {
        let mut storage = self.storage_mut();

        if let Some(kind) = storage.receive_failures.pop() {
            return Err(kind.to_error());
        }

        let info = storage.link(link)?;
        let settings = info
            .settings
            .clone()
            .ok_or_else(|| BusError::LinkDetached {
                message: "link was not opened for receiving".to_string(),
            })?;
        let entity = info.entity.clone();

        let config = storage.config.clone();
        let store = storage.entity_mut(&entity);
        store.reap(config.max_delivery_count);

        let session_filter = settings.session_id.as_ref().map(|s| s.as_str().to_string());
        while out.len() < max_count {
            let Some(mut message) = store.pop_ready(session_filter.as_deref()) else {
                break;
            };
            match settings.mode {
                ReceiveMode::ReceiveAndDelete => {
                    message.delivery_count += 1;
                    out.push(message.to_raw(None, None));
                }
                ReceiveMode::PeekLock => {
                    message.delivery_count += 1;
                    let token = LockToken::new();
                    let locked_until = Timestamp::now() + config.lock_duration;
                    let raw = message.to_raw(Some(token), Some(locked_until));
                    store.in_flight.insert(
                        token,
                        InFlightMessage {
                            message,
                            locked_until,
                        },
                    );
                    out.push(raw);
                }
            }
        }
        Ok(())
    }

    fn handle_management(
        &self,
        link: &LinkHandle,
        operation: &str,
        request: PropertyMap,
    ) -> Result<ManagementResponse, BusError> {
        let mut storage = self.storage_mut();
        let info = storage.link(link)?;
        let entity = info.entity.clone();
        let config = storage.config.clone();
        let store = storage.entity_mut(&entity);
        store.reap(config.max_delivery_count);

        match operation {
            operations::PEEK => {
                let from = get_i64(&request, properties::FROM_SEQUENCE).unwrap_or(0);
                let count = get_i64(&request, properties::COUNT).unwrap_or(1).max(1) as usize;

                let mut messages: Vec<&StoredMessage> = store
                    .ready
                    .iter()
                    .filter(|m| m.sequence_number >= from)
                    .collect();
                messages.sort_by_key(|m| m.sequence_number);
                let raws: Vec<RawMessage> = messages
                    .into_iter()
                    .take(count)
                    .map(|m| m.to_raw(None, None))
                    .collect();

                let mut response = PropertyMap::new();
                response.insert(
                    properties::MESSAGES.to_string(),
                    crate::transport::encode_raw_messages(&raws)?,
                );
                Ok(ManagementResponse {
                    status: 200,
                    properties: response,
                })
            }
            operations::RECEIVE_BY_SEQUENCE => {
                let sequences = get_i64_list(&request, properties::SEQUENCE_NUMBERS)?;
                let mut raws = Vec::with_capacity(sequences.len());
                for sequence in sequences {
                    let mut message = store.deferred.remove(&sequence).ok_or_else(|| {
                        BusError::Management {
                            status: 404,
                            condition: format!("sequence number {} not found", sequence),
                        }
                    })?;
                    message.delivery_count += 1;
                    let token = LockToken::new();
                    let locked_until = Timestamp::now() + config.lock_duration;
                    raws.push(message.to_raw(Some(token), Some(locked_until)));
                    store.in_flight.insert(
                        token,
                        InFlightMessage {
                            message,
                            locked_until,
                        },
                    );
                }

                let mut response = PropertyMap::new();
                response.insert(
                    properties::MESSAGES.to_string(),
                    crate::transport::encode_raw_messages(&raws)?,
                );
                Ok(ManagementResponse {
                    status: 200,
                    properties: response,
                })
            }
            operations::RENEW_LOCK => {
                let token = get_token(&request)?;
                let entry =
                    store
                        .in_flight
                        .get_mut(&token)
                        .ok_or_else(|| BusError::MessageLockLost {
                            lock_token: token.to_string(),
                        })?;
                let locked_until = Timestamp::now() + config.lock_duration;
                entry.locked_until = locked_until;

                let mut response = PropertyMap::new();
                response.insert(
                    properties::LOCKED_UNTIL.to_string(),
                    timestamp_value(locked_until)?,
                );
                Ok(ManagementResponse {
                    status: 200,
                    properties: response,
                })
            }
            operations::RENEW_SESSION_LOCK => {
                let locked_until = Timestamp::now() + config.lock_duration;
                let mut response = PropertyMap::new();
                response.insert(
                    properties::LOCKED_UNTIL.to_string(),
                    timestamp_value(locked_until)?,
                );
                Ok(ManagementResponse {
                    status: 200,
                    properties: response,
                })
            }
            operations::UPDATE_DISPOSITION => {
                let token = get_token(&request)?;
                let disposition = get_disposition(&request)?;
                store.settle(&token, &disposition, config.max_delivery_count)?;
                Ok(ManagementResponse {
                    status: 200,
                    properties: PropertyMap::new(),
                })
            }
            operations::SCHEDULE_MESSAGE => {
                let value =
                    request
                        .get(properties::MESSAGE)
                        .ok_or_else(|| BusError::Management {
                            status: 400,
                            condition: "missing message property".to_string(),
                        })?;
                let raw: RawMessage =
                    serde_json::from_value(value.clone()).map_err(|e| BusError::Management {
                        status: 400,
                        condition: format!("invalid message property: {}", e),
                    })?;
                let enqueue_at = get_timestamp(&request, properties::SCHEDULED_ENQUEUE_TIME)?;

                let sequence = store.assign_sequence();
                let mut message = StoredMessage::from_raw(&raw, sequence, &config);
                message.available_at = enqueue_at;
                store.scheduled.push(message);

                let mut response = PropertyMap::new();
                response.insert(
                    properties::SEQUENCE_NUMBER.to_string(),
                    serde_json::Value::from(sequence),
                );
                Ok(ManagementResponse {
                    status: 200,
                    properties: response,
                })
            }
            operations::CANCEL_SCHEDULED_MESSAGE => {
                let sequence =
                    get_i64(&request, properties::SEQUENCE_NUMBER).ok_or_else(|| {
                        BusError::Management {
                            status: 400,
                            condition: "missing sequence-number property".to_string(),
                        }
                    })?;
                let before = store.scheduled.len();
                store
                    .scheduled
                    .retain(|message| message.sequence_number != sequence);
                if store.scheduled.len() == before {
                    return Err(BusError::Management {
                        status: 404,
                        condition: format!("scheduled message {} not found", sequence),
                    });
                }
                Ok(ManagementResponse {
                    status: 200,
                    properties: PropertyMap::new(),
                })
            }
            other => Err(BusError::Management {
                status: 400,
                condition: format!("unknown operation '{}'", other),
            }),
        }
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn open_send_link(
        &self,
        target: &EntityPath,
        _timeout: Duration,
    ) -> Result<LinkHandle, BusError> {
        let handle = LinkHandle::new(LinkRole::Sender, target.clone());
        let mut storage = self.storage_mut();
        storage.entity_mut(target.as_str());
        storage.links.insert(
            handle.id(),
            LinkInfo {
                entity: target.as_str().to_string(),
                detached: false,
                settings: None,
            },
        );
        Ok(handle)
    }

    async fn open_receive_link(
        &self,
        source: &EntityPath,
        settings: &ReceiveLinkSettings,
        _timeout: Duration,
    ) -> Result<LinkHandle, BusError> {
        let handle = LinkHandle::new(LinkRole::Receiver, source.clone());
        let mut storage = self.storage_mut();
        storage.entity_mut(source.as_str());
        storage.links.insert(
            handle.id(),
            LinkInfo {
                entity: source.as_str().to_string(),
                detached: false,
                settings: Some(settings.clone()),
            },
        );
        Ok(handle)
    }

    async fn open_management_link(
        &self,
        path: &EntityPath,
        _timeout: Duration,
    ) -> Result<LinkHandle, BusError> {
        let handle = LinkHandle::new(LinkRole::Management, path.clone());
        let mut storage = self.storage_mut();
        storage.entity_mut(path.as_str());
        storage.links.insert(
            handle.id(),
            LinkInfo {
                entity: path.as_str().to_string(),
                detached: false,
                settings: None,
            },
        );
        Ok(handle)
    }

    async fn send(
        &self,
        link: &LinkHandle,
        batch: &[RawMessage],
        _delivery_tag: &[u8],
        _timeout: Duration,
    ) -> Result<SendOutcome, BusError> {
        let mut storage = self.storage_mut();

        if let Some(kind) = storage.send_failures.pop() {
            return Err(kind.to_error());
        }

        let info = storage.link(link)?;
        let entity = info.entity.clone();
        let config = storage.config.clone();
        let store = storage.entity_mut(&entity);

        for raw in batch {
            let sequence = store.assign_sequence();
            store
                .ready
                .push_back(StoredMessage::from_raw(raw, sequence, &config));
        }
        Ok(SendOutcome::Accepted)
    }

    async fn receive(
        &self,
        link: &LinkHandle,
        max_count: u32,
        flush_interval: Duration,
        timeout: Duration,
    ) -> Result<Vec<RawMessage>, BusError> {
        let deadline = Timestamp::now() + timeout;
        let max_count = max_count.max(1) as usize;
        let mut out = Vec::new();
        let mut flush_deadline: Option<Timestamp> = None;

        loop {
            self.drain(link, max_count, &mut out)?;

            if out.len() >= max_count {
                break;
            }
            if !out.is_empty() {
                let flush_at = *flush_deadline.get_or_insert(Timestamp::now() + flush_interval);
                if flush_at.has_elapsed() {
                    break;
                }
            }
            if deadline.has_elapsed() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(RECEIVE_POLL_MS)).await;
        }
        Ok(out)
    }

    async fn dispose(
        &self,
        link: &LinkHandle,
        delivery_tag: &[u8],
        disposition: Disposition,
        _timeout: Duration,
    ) -> Result<SendOutcome, BusError> {
        let token = LockToken::from_delivery_tag(delivery_tag)?;
        let mut storage = self.storage_mut();
        let info = storage.link(link)?;
        let entity = info.entity.clone();
        let config = storage.config.clone();
        let store = storage.entity_mut(&entity);
        store.settle(&token, &disposition, config.max_delivery_count)?;
        Ok(SendOutcome::Accepted)
    }

    async fn execute_management_request(
        &self,
        link: &LinkHandle,
        operation: &str,
        request: PropertyMap,
        _timeout: Duration,
    ) -> Result<ManagementResponse, BusError> {
        self.handle_management(link, operation, request)
    }

    async fn close_link(&self, link: &LinkHandle) {
        let mut storage = self.storage_mut();
        storage.links.remove(&link.id());
    }
}

// ============================================================================
// Property Map Helpers
// ============================================================================

fn get_i64(request: &PropertyMap, key: &str) -> Option<i64> {
    request.get(key).and_then(|value| value.as_i64())
}

fn get_i64_list(request: &PropertyMap, key: &str) -> Result<Vec<i64>, BusError> {
    let value = request.get(key).ok_or_else(|| BusError::Management {
        status: 400,
        condition: format!("missing {} property", key),
    })?;
    serde_json::from_value(value.clone()).map_err(|e| BusError::Management {
        status: 400,
        condition: format!("invalid {} property: {}", key, e),
    })
}

fn get_token(request: &PropertyMap) -> Result<LockToken, BusError> {
    let value = request
        .get(properties::LOCK_TOKEN)
        .ok_or_else(|| BusError::Management {
            status: 400,
            condition: "missing lock-token property".to_string(),
        })?;
    serde_json::from_value(value.clone()).map_err(|e| BusError::Management {
        status: 400,
        condition: format!("invalid lock-token property: {}", e),
    })
}

fn get_timestamp(request: &PropertyMap, key: &str) -> Result<Timestamp, BusError> {
    let value = request.get(key).ok_or_else(|| BusError::Management {
        status: 400,
        condition: format!("missing {} property", key),
    })?;
    serde_json::from_value(value.clone()).map_err(|e| BusError::Management {
        status: 400,
        condition: format!("invalid {} property: {}", key, e),
    })
}

fn get_disposition(request: &PropertyMap) -> Result<Disposition, BusError> {
    let status = request
        .get(properties::DISPOSITION)
        .and_then(|value| value.as_str())
        .ok_or_else(|| BusError::Management {
            status: 400,
            condition: "missing disposition-status property".to_string(),
        })?;

    match status {
        "complete" => Ok(Disposition::Complete),
        "abandon" => Ok(Disposition::Abandon),
        "defer" => Ok(Disposition::Defer),
        "dead-letter" => {
            let reason = request
                .get(properties::DEADLETTER_REASON)
                .and_then(|value| value.as_str())
                .unwrap_or("dead-lettered")
                .to_string();
            let description = request
                .get(properties::DEADLETTER_DESCRIPTION)
                .and_then(|value| value.as_str())
                .map(|s| s.to_string());
            Ok(Disposition::DeadLetter {
                reason,
                description,
            })
        }
        other => Err(BusError::Management {
            status: 400,
            condition: format!("unknown disposition '{}'", other),
        }),
    }
}

fn timestamp_value(timestamp: Timestamp) -> Result<serde_json::Value, BusError> {
    serde_json::to_value(timestamp).map_err(|e| BusError::Management {
        status: 500,
        condition: format!("timestamp encoding failed: {}", e),
    })
}
