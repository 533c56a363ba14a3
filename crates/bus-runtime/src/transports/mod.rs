//! Transport implementations.
//!
//! The in-memory transport is a full broker simulation used for testing and
//! development; wire-protocol transports live behind the same trait in
//! downstream crates.

mod memory;

pub use memory::{FailureKind, InMemoryTransport, InMemoryTransportConfig};
