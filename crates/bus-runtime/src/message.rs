//! Message types and core domain identifiers for broker client operations.

use crate::error::ValidationError;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Add;
use std::str::FromStr;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated path of a broker entity (queue, topic, or subscription)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityPath(String);

impl EntityPath {
    /// Create new entity path with validation
    pub fn new(path: String) -> Result<Self, ValidationError> {
        // Validate length
        if path.is_empty() || path.len() > 260 {
            return Err(ValidationError::OutOfRange {
                field: "entity_path".to_string(),
                message: "must be 1-260 characters".to_string(),
            });
        }

        // Validate characters (ASCII alphanumeric plus separators)
        if !path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/' | '.'))
        {
            return Err(ValidationError::InvalidFormat {
                field: "entity_path".to_string(),
                message: "only ASCII alphanumeric, '-', '_', '/', '.' allowed".to_string(),
            });
        }

        if path.starts_with('-') || path.ends_with('-') || path.contains("--") {
            return Err(ValidationError::InvalidFormat {
                field: "entity_path".to_string(),
                message: "no leading/trailing hyphens or consecutive hyphens".to_string(),
            });
        }

        Ok(Self(path))
    }

    /// Create subscription path under a topic
    pub fn subscription(topic: &str, subscription: &str) -> Result<Self, ValidationError> {
        Self::new(format!("{}/subscriptions/{}", topic, subscription))
    }

    /// Get entity path as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityPath {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Unique identifier for messages within the broker
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Identifier for grouping related messages for ordered processing
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Create new session ID with validation
    pub fn new(id: String) -> Result<Self, ValidationError> {
        if id.is_empty() {
            return Err(ValidationError::Required {
                field: "session_id".to_string(),
            });
        }

        if id.len() > 128 {
            return Err(ValidationError::OutOfRange {
                field: "session_id".to_string(),
                message: "maximum 128 characters".to_string(),
            });
        }

        // Validate ASCII printable characters only
        if !id.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
            return Err(ValidationError::InvalidFormat {
                field: "session_id".to_string(),
                message: "only ASCII printable characters allowed".to_string(),
            });
        }

        Ok(Self(id))
    }

    /// Get session ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Duration remaining until this timestamp, zero if already passed
    pub fn remaining(&self) -> Duration {
        let now = Utc::now();
        if now >= self.0 {
            Duration::zero()
        } else {
            self.0 - now
        }
    }

    /// Check if this timestamp lies in the past
    pub fn has_elapsed(&self) -> bool {
        Utc::now() >= self.0
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = s.parse::<DateTime<Utc>>()?;
        Ok(Self::from_datetime(dt))
    }
}

// ============================================================================
// Lock Tokens
// ============================================================================

/// Opaque token correlating a received message to its broker-side lock.
///
/// The token and its link-level delivery tag are interconvertible: the tag is
/// the token's raw byte form, and a tag reinterpreted as a UUID yields the
/// token again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockToken(uuid::Uuid);

impl LockToken {
    /// Generate new random lock token
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Create lock token from UUID
    pub fn from_uuid(id: uuid::Uuid) -> Self {
        Self(id)
    }

    /// Get the link-level delivery tag for this token
    pub fn as_delivery_tag(&self) -> [u8; 16] {
        self.0.into_bytes()
    }

    /// Reinterpret a link-level delivery tag as a lock token
    pub fn from_delivery_tag(tag: &[u8]) -> Result<Self, ValidationError> {
        let bytes: [u8; 16] = tag.try_into().map_err(|_| ValidationError::InvalidFormat {
            field: "delivery_tag".to_string(),
            message: format!("expected 16 bytes, got {}", tag.len()),
        })?;
        Ok(Self(uuid::Uuid::from_bytes(bytes)))
    }
}

impl Default for LockToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LockToken {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = uuid::Uuid::parse_str(s).map_err(|e| ValidationError::InvalidFormat {
            field: "lock_token".to_string(),
            message: e.to_string(),
        })?;
        Ok(Self(id))
    }
}

// ============================================================================
// Receive Modes
// ============================================================================

/// How received messages are settled with the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiveMode {
    /// Messages stay on the broker, invisible to other receivers, until
    /// explicitly acknowledged or their lock expires
    PeekLock,
    /// Messages are removed from the broker as soon as they are delivered
    ReceiveAndDelete,
}

impl Default for ReceiveMode {
    fn default() -> Self {
        Self::PeekLock
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message to be sent through the broker
#[derive(Debug, Clone)]
pub struct Message {
    pub message_id: MessageId,
    pub body: Bytes,
    pub properties: HashMap<String, String>,
    pub session_id: Option<SessionId>,
    pub partition_key: Option<String>,
    pub correlation_id: Option<String>,
    pub content_type: Option<String>,
    pub time_to_live: Option<Duration>,
}

/// Custom serialization for Bytes, shared with the transport wire types
pub(crate) mod bytes_serde {
    use base64::{engine::general_purpose, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = general_purpose::STANDARD.encode(bytes);
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        Ok(Bytes::from(decoded))
    }
}

impl Message {
    /// Create new message with body
    pub fn new(body: Bytes) -> Self {
        Self {
            message_id: MessageId::new(),
            body,
            properties: HashMap::new(),
            session_id: None,
            partition_key: None,
            correlation_id: None,
            content_type: None,
            time_to_live: None,
        }
    }

    /// Set explicit message ID
    pub fn with_message_id(mut self, message_id: MessageId) -> Self {
        self.message_id = message_id;
        self
    }

    /// Add session ID for ordered processing
    pub fn with_session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Set partition key for broker-side placement
    pub fn with_partition_key(mut self, partition_key: String) -> Self {
        self.partition_key = Some(partition_key);
        self
    }

    /// Add application property
    pub fn with_property(mut self, key: String, value: String) -> Self {
        self.properties.insert(key, value);
        self
    }

    /// Add correlation ID for tracking
    pub fn with_correlation_id(mut self, correlation_id: String) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Set content type
    pub fn with_content_type(mut self, content_type: String) -> Self {
        self.content_type = Some(content_type);
        self
    }

    /// Add time-to-live for message expiration
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }
}

/// A message received from the broker with delivery metadata
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub body: Bytes,
    pub properties: HashMap<String, String>,
    pub session_id: Option<SessionId>,
    pub partition_key: Option<String>,
    pub correlation_id: Option<String>,
    pub content_type: Option<String>,
    /// Sequence number assigned by the broker at enqueue time
    pub sequence_number: i64,
    pub delivery_count: u32,
    pub enqueued_at: Timestamp,
    /// Present only under PeekLock; cleared once the message is settled
    pub lock_token: Option<LockToken>,
    pub locked_until: Option<Timestamp>,
}

impl ReceivedMessage {
    /// Convert back to Message (for forwarding/replaying)
    pub fn message(&self) -> Message {
        Message {
            message_id: self.message_id.clone(),
            body: self.body.clone(),
            properties: self.properties.clone(),
            session_id: self.session_id.clone(),
            partition_key: self.partition_key.clone(),
            correlation_id: self.correlation_id.clone(),
            content_type: self.content_type.clone(),
            time_to_live: None, // TTL is not preserved in received messages
        }
    }

    /// Check if the message lock has already expired
    pub fn is_lock_expired(&self) -> bool {
        match self.locked_until {
            Some(locked_until) => locked_until.has_elapsed(),
            None => false,
        }
    }

    /// Check if message has exceeded maximum delivery count
    pub fn has_exceeded_max_delivery_count(&self, max_count: u32) -> bool {
        self.delivery_count > max_count
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
