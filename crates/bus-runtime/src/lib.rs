//! # Bus Runtime
//!
//! Resilient client runtime for queue/topic-based message brokers. The
//! runtime hides transient network failures, broker overload, and lock-based
//! delivery semantics behind plain send/receive/acknowledge calls.
//!
//! This library provides:
//! - Retry policies with exponential backoff, jitter, and a shared
//!   server-busy cooldown window
//! - Single-flight lazy link management with fault-and-recreate
//! - Lock-token lifecycle tracking with path-aware disposition routing
//! - A bounded-concurrency message pump with auto-complete and lock renewal
//! - An in-memory transport for testing and development
//!
//! ## Module Organization
//!
//! - [`error`] - Error taxonomy for all broker operations
//! - [`message`] - Message structures, lock tokens, and domain identifiers
//! - [`options`] - Client, receiver, retry, and pump configuration
//! - [`retry`] - Retry decision engine
//! - [`resource`] - Resilient link holder
//! - [`lock_registry`] - Management-granted lock-token registry
//! - [`plugin`] - Ordered message mutator chain
//! - [`sender`] / [`receiver`] - Operation cores
//! - [`pump`] - Supervised receive pump
//! - [`transport`] / [`transports`] - Transport boundary and implementations
//! - [`client`] - Client facade

// Module declarations
pub mod client;
pub mod error;
mod links;
pub mod lock_registry;
pub mod message;
pub mod options;
pub mod plugin;
pub mod pump;
pub mod receiver;
pub mod resource;
pub mod retry;
pub mod sender;
pub mod transport;
pub mod transports;

// Re-export commonly used types at crate root for convenience
pub use client::BusClient;
pub use error::{BusError, ValidationError};
pub use lock_registry::LockTokenRegistry;
pub use message::{
    EntityPath, LockToken, Message, MessageId, ReceiveMode, ReceivedMessage, SessionId, Timestamp,
};
pub use options::{ClientOptions, PumpOptions, ReceiverOptions, RetryOptions, ShutdownMode};
pub use plugin::{MessagePlugin, PluginChain};
pub use pump::{
    MessageHandler, MessageReceivePump, PumpError, PumpErrorHandler, PumpErrorSource, PumpState,
};
pub use receiver::ReceiverCore;
pub use resource::{LinkFactory, LinkState, ResilientResource};
pub use retry::RetryPolicy;
pub use sender::SenderCore;
pub use transport::{
    Disposition, LinkHandle, LinkRole, ManagementResponse, PropertyMap, RawMessage,
    ReceiveLinkSettings, SendOutcome, Transport,
};
pub use transports::{FailureKind, InMemoryTransport, InMemoryTransportConfig};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
