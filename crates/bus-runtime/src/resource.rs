//! Lazy holder for one long-lived link-like resource.
//!
//! [`ResilientResource`] owns creation, fault bookkeeping, and recreation of
//! a single transport link. Creation is single-flight: concurrent callers on
//! a cold or faulted holder share one `create` invocation. Fault detection
//! stays with the consumer; it observes a structural failure on the held
//! instance and reports it back via [`ResilientResource::mark_faulted`] so
//! the next lookup recreates rather than reuses.

use crate::error::BusError;
use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Factory seam for creating and closing link-like resources
#[async_trait]
pub trait LinkFactory: Send + Sync {
    type Link: Send + Sync + 'static;

    /// Create a fresh instance of the resource
    async fn create(&self, timeout: Duration) -> Result<Self::Link, BusError>;

    /// Close a live instance
    async fn close(&self, link: &Self::Link);
}

/// Observable lifecycle state of the held resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Unopened,
    Opening,
    Open,
    Faulted,
    Closed,
}

enum Slot<R> {
    Unopened,
    Open(Arc<R>),
    Faulted,
    Closed,
}

/// Generic lazy holder with single-flight creation and fault-and-recreate
pub struct ResilientResource<F: LinkFactory> {
    factory: F,
    entity: String,
    slot: Mutex<Slot<F::Link>>,
}

impl<F: LinkFactory> ResilientResource<F> {
    /// Create new holder in the unopened state
    pub fn new(factory: F, entity: impl Into<String>) -> Self {
        Self {
            factory,
            entity: entity.into(),
            slot: Mutex::new(Slot::Unopened),
        }
    }

    /// Return the live instance, creating it if necessary.
    ///
    /// Holding the slot lock across `create` makes creation single-flight:
    /// concurrent cold callers queue behind the first and then observe the
    /// instance it stored.
    pub async fn get_or_create(&self, timeout: Duration) -> Result<Arc<F::Link>, BusError> {
        let mut slot = self.slot.lock().await;
        match &*slot {
            Slot::Open(link) => Ok(link.clone()),
            Slot::Closed => Err(BusError::ClientClosed {
                entity: self.entity.clone(),
            }),
            Slot::Unopened | Slot::Faulted => {
                debug!(entity = %self.entity, "opening link");
                let link = Arc::new(self.factory.create(timeout).await?);
                *slot = Slot::Open(link.clone());
                Ok(link)
            }
        }
    }

    /// Waiting lookup; returns the instance only when open.
    ///
    /// Never triggers creation. Unlike [`ResilientResource::try_get_opened`]
    /// a momentarily held slot is waited out, so `None` means the holder is
    /// genuinely unopened, faulted, or closed.
    pub async fn get_opened(&self) -> Option<Arc<F::Link>> {
        let slot = self.slot.lock().await;
        match &*slot {
            Slot::Open(link) => Some(link.clone()),
            _ => None,
        }
    }

    /// Non-blocking lookup; returns the instance only when open.
    ///
    /// Never triggers creation. Returns `None` while another caller holds
    /// the slot for creation.
    pub fn try_get_opened(&self) -> Option<Arc<F::Link>> {
        let slot = self.slot.try_lock().ok()?;
        match &*slot {
            Slot::Open(link) => Some(link.clone()),
            _ => None,
        }
    }

    /// Report that `instance` failed with a structural error.
    ///
    /// Ignored unless `instance` is the currently held one, so a stale
    /// report cannot fault a freshly recreated link.
    pub async fn mark_faulted(&self, instance: &Arc<F::Link>) {
        let mut slot = self.slot.lock().await;
        if let Slot::Open(current) = &*slot {
            if Arc::ptr_eq(current, instance) {
                warn!(entity = %self.entity, "link faulted, will recreate on next use");
                *slot = Slot::Faulted;
                self.factory.close(instance).await;
            }
        }
    }

    /// Transition to the terminal closed state, closing any live instance
    pub async fn close(&self) {
        let mut slot = self.slot.lock().await;
        if let Slot::Open(link) = &*slot {
            self.factory.close(link).await;
        }
        *slot = Slot::Closed;
    }

    /// Current lifecycle state; `Opening` while a creation is in flight
    pub fn state(&self) -> LinkState {
        match self.slot.try_lock() {
            Err(_) => LinkState::Opening,
            Ok(slot) => match &*slot {
                Slot::Unopened => LinkState::Unopened,
                Slot::Open(_) => LinkState::Open,
                Slot::Faulted => LinkState::Faulted,
                Slot::Closed => LinkState::Closed,
            },
        }
    }
}

#[cfg(test)]
#[path = "resource_tests.rs"]
mod tests;
