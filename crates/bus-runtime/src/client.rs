//! Client facade creating senders and receivers over one transport.

use crate::error::BusError;
use crate::message::{EntityPath, SessionId};
use crate::options::{ClientOptions, ReceiverOptions};
use crate::plugin::{MessagePlugin, PluginChain};
use crate::receiver::ReceiverCore;
use crate::retry::RetryPolicy;
use crate::sender::SenderCore;
use crate::transport::Transport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Entry point for broker access over one transport connection.
///
/// Each sender and receiver owns its own links; the client carries the
/// shared configuration, the plugin chain, and the retry policy whose
/// server-busy snapshot new entities inherit.
pub struct BusClient {
    transport: Arc<dyn Transport>,
    options: ClientOptions,
    retry: RetryPolicy,
    plugins: PluginChain,
    closed: AtomicBool,
}

impl BusClient {
    /// Create new client over `transport`
    pub fn new(transport: Arc<dyn Transport>, options: ClientOptions) -> Self {
        let retry = RetryPolicy::new(options.retry.clone());
        Self {
            transport,
            options,
            retry,
            plugins: PluginChain::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Append a plugin applied by all senders and receivers created later
    pub fn register_plugin(&mut self, plugin: Arc<dyn MessagePlugin>) {
        self.plugins.register(plugin);
    }

    /// Create a sender for `entity`
    pub fn create_sender(&self, entity: EntityPath) -> Result<SenderCore, BusError> {
        self.ensure_open(&entity)?;
        Ok(SenderCore::new(
            self.transport.clone(),
            entity,
            &self.options,
            self.retry.clone(),
            self.plugins.clone(),
        ))
    }

    /// Create a receiver for `entity`
    pub fn create_receiver(
        &self,
        entity: EntityPath,
        options: ReceiverOptions,
    ) -> Result<Arc<ReceiverCore>, BusError> {
        self.ensure_open(&entity)?;
        Ok(Arc::new(ReceiverCore::new(
            self.transport.clone(),
            entity,
            &self.options,
            options,
            self.retry.clone(),
            self.plugins.clone(),
        )))
    }

    /// Create a session-scoped receiver for `entity`
    pub fn accept_session(
        &self,
        entity: EntityPath,
        session_id: SessionId,
        options: ReceiverOptions,
    ) -> Result<Arc<ReceiverCore>, BusError> {
        self.create_receiver(entity, options.with_session_id(session_id))
    }

    /// Client-wide retry policy
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Mark the client closed; senders and receivers already created stay
    /// usable until closed individually
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn ensure_open(&self, entity: &EntityPath) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::ClientClosed {
                entity: entity.as_str().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
