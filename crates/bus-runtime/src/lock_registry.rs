//! Registry of lock tokens granted through the management channel.
//!
//! Dispositions must travel the same path the lock was granted on. Tokens
//! obtained via request/response calls (deferred receive by sequence number)
//! are recorded here; tokens absent from the registry settle through the
//! receive link instead. Entries expire at the message's locked-until time
//! and are treated as absent from that point even before physical removal.

use crate::message::{LockToken, Timestamp};
use std::collections::HashMap;
use std::sync::RwLock;

/// Opportunistic sweep threshold; avoids unbounded growth between accesses
const SWEEP_THRESHOLD: usize = 64;

/// Concurrent set of lock tokens with per-entry expiry
#[derive(Debug, Default)]
pub struct LockTokenRegistry {
    entries: RwLock<HashMap<LockToken, Timestamp>>,
}

impl LockTokenRegistry {
    /// Create empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a management-granted token with its lock expiry
    pub fn add(&self, token: LockToken, expires_at: Timestamp) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.len() >= SWEEP_THRESHOLD {
            entries.retain(|_, expiry| !expiry.has_elapsed());
        }
        entries.insert(token, expires_at);
    }

    /// Check whether a live entry exists for the token.
    ///
    /// Expired entries read as absent even if not yet removed.
    pub fn contains(&self, token: &LockToken) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        match entries.get(token) {
            Some(expires_at) => !expires_at.has_elapsed(),
            None => false,
        }
    }

    /// Remove a token, returning whether a live entry was present
    pub fn remove(&self, token: &LockToken) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        match entries.remove(token) {
            Some(expires_at) => !expires_at.has_elapsed(),
            None => false,
        }
    }

    /// Number of live (unexpired) entries
    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .values()
            .filter(|expires_at| !expires_at.has_elapsed())
            .count()
    }

    /// Check if the registry holds no live entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Physically remove expired entries
    pub fn sweep_expired(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, expires_at| !expires_at.has_elapsed());
    }
}

#[cfg(test)]
#[path = "lock_registry_tests.rs"]
mod tests;
