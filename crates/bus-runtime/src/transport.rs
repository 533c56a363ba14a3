//! Transport abstraction consumed by the sender/receiver cores.
//!
//! The wire protocol itself lives behind this boundary. Implementations
//! open link handles against broker entities, move raw messages, settle
//! deliveries by tag, and execute request/response management operations.

use crate::error::BusError;
use crate::message::{EntityPath, LockToken, ReceiveMode, SessionId, Timestamp};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Property map used by management requests and responses
pub type PropertyMap = HashMap<String, serde_json::Value>;

/// Role of an open link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkRole {
    Sender,
    Receiver,
    Management,
}

/// Handle to an open transport link
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkHandle {
    id: uuid::Uuid,
    role: LinkRole,
    entity: EntityPath,
}

impl LinkHandle {
    /// Create new handle with a fresh identity
    pub fn new(role: LinkRole, entity: EntityPath) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            role,
            entity,
        }
    }

    /// Unique identity of this link
    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    /// Role the link was opened with
    pub fn role(&self) -> LinkRole {
        self.role
    }

    /// Entity the link is attached to
    pub fn entity(&self) -> &EntityPath {
        &self.entity
    }
}

/// Settings for opening a receive link
#[derive(Debug, Clone)]
pub struct ReceiveLinkSettings {
    pub mode: ReceiveMode,
    /// Credit granted ahead of demand
    pub prefetch: u32,
    /// Session filter for session-scoped receivers
    pub session_id: Option<SessionId>,
}

/// Raw message as moved by the transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    pub message_id: String,
    #[serde(with = "crate::message::bytes_serde")]
    pub body: Bytes,
    pub properties: HashMap<String, String>,
    pub session_id: Option<String>,
    pub partition_key: Option<String>,
    pub correlation_id: Option<String>,
    pub content_type: Option<String>,
    pub sequence_number: i64,
    pub delivery_count: u32,
    pub enqueued_at: Timestamp,
    pub lock_token: Option<LockToken>,
    pub locked_until: Option<Timestamp>,
}

/// Terminal outcome of a delivery reported by the broker
#[derive(Debug)]
pub enum SendOutcome {
    Accepted,
    Rejected(BusError),
    Released,
    Modified,
}

/// Settlement applied to a locked delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Complete,
    Abandon,
    Defer,
    DeadLetter {
        reason: String,
        description: Option<String>,
    },
}

impl Disposition {
    /// Wire name of the disposition
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Abandon => "abandon",
            Self::Defer => "defer",
            Self::DeadLetter { .. } => "dead-letter",
        }
    }
}

/// Response of a management request
#[derive(Debug, Clone)]
pub struct ManagementResponse {
    pub status: u16,
    pub properties: PropertyMap,
}

impl ManagementResponse {
    /// Check for a successful status code
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Management operation names understood at the transport boundary
pub mod operations {
    pub const PEEK: &str = "peek-message";
    pub const RECEIVE_BY_SEQUENCE: &str = "receive-by-sequence-number";
    pub const RENEW_LOCK: &str = "renew-lock";
    pub const RENEW_SESSION_LOCK: &str = "renew-session-lock";
    pub const UPDATE_DISPOSITION: &str = "update-disposition";
    pub const SCHEDULE_MESSAGE: &str = "schedule-message";
    pub const CANCEL_SCHEDULED_MESSAGE: &str = "cancel-scheduled-message";
}

/// Property keys used in management request/response maps
pub mod properties {
    pub const MESSAGES: &str = "messages";
    pub const MESSAGE: &str = "message";
    pub const SEQUENCE_NUMBER: &str = "sequence-number";
    pub const SEQUENCE_NUMBERS: &str = "sequence-numbers";
    pub const FROM_SEQUENCE: &str = "from-sequence-number";
    pub const COUNT: &str = "count";
    pub const LOCK_TOKEN: &str = "lock-token";
    pub const LOCKED_UNTIL: &str = "locked-until";
    pub const SESSION_ID: &str = "session-id";
    pub const DISPOSITION: &str = "disposition-status";
    pub const DEADLETTER_REASON: &str = "deadletter-reason";
    pub const DEADLETTER_DESCRIPTION: &str = "deadletter-description";
    pub const SCHEDULED_ENQUEUE_TIME: &str = "scheduled-enqueue-time";
}

/// Encode raw messages into a management property value
pub fn encode_raw_messages(messages: &[RawMessage]) -> Result<serde_json::Value, BusError> {
    serde_json::to_value(messages).map_err(|e| BusError::Management {
        status: 500,
        condition: format!("message encoding failed: {}", e),
    })
}

/// Decode raw messages from a management property value
pub fn decode_raw_messages(value: &serde_json::Value) -> Result<Vec<RawMessage>, BusError> {
    serde_json::from_value(value.clone()).map_err(|e| BusError::Management {
        status: 500,
        condition: format!("message decoding failed: {}", e),
    })
}

/// Operations implemented by the wire-protocol layer
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a link for sending to `target`
    async fn open_send_link(
        &self,
        target: &EntityPath,
        timeout: Duration,
    ) -> Result<LinkHandle, BusError>;

    /// Open a link for receiving from `source`
    async fn open_receive_link(
        &self,
        source: &EntityPath,
        settings: &ReceiveLinkSettings,
        timeout: Duration,
    ) -> Result<LinkHandle, BusError>;

    /// Open a request/response management link for `path`
    async fn open_management_link(
        &self,
        path: &EntityPath,
        timeout: Duration,
    ) -> Result<LinkHandle, BusError>;

    /// Send a batch as one delivery identified by `delivery_tag`
    async fn send(
        &self,
        link: &LinkHandle,
        batch: &[RawMessage],
        delivery_tag: &[u8],
        timeout: Duration,
    ) -> Result<SendOutcome, BusError>;

    /// Receive up to `max_count` messages.
    ///
    /// Once at least one message is available the transport returns after
    /// `flush_interval` rather than waiting for a full batch. An empty
    /// vector means no messages arrived within `timeout`.
    async fn receive(
        &self,
        link: &LinkHandle,
        max_count: u32,
        flush_interval: Duration,
        timeout: Duration,
    ) -> Result<Vec<RawMessage>, BusError>;

    /// Settle the delivery identified by `delivery_tag`
    async fn dispose(
        &self,
        link: &LinkHandle,
        delivery_tag: &[u8],
        disposition: Disposition,
        timeout: Duration,
    ) -> Result<SendOutcome, BusError>;

    /// Execute a request/response management operation
    async fn execute_management_request(
        &self,
        link: &LinkHandle,
        operation: &str,
        request: PropertyMap,
        timeout: Duration,
    ) -> Result<ManagementResponse, BusError>;

    /// Close an open link; closing an unknown link is a no-op
    async fn close_link(&self, link: &LinkHandle);
}
