//! Ordered, user-extensible message mutator chain.
//!
//! Plugins transform outgoing messages before they reach the wire and
//! incoming messages after they are materialized. They are applied in
//! registration order. A plugin whose `continue_on_error` flag is set has
//! its failures logged and skipped, leaving the message as the previous
//! stage produced it; otherwise the failure aborts the enclosing send or
//! receive call.

use crate::error::BusError;
use crate::message::{Message, ReceivedMessage};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Transform hook applied to messages flowing through a sender or receiver
#[async_trait]
pub trait MessagePlugin: Send + Sync {
    /// Name used in error reporting and logs
    fn name(&self) -> &str;

    /// When set, failures of this plugin are logged and skipped
    fn continue_on_error(&self) -> bool {
        false
    }

    /// Transform an outgoing message
    async fn before_send(&self, message: Message) -> Result<Message, BusError> {
        Ok(message)
    }

    /// Transform an incoming message
    async fn after_receive(&self, message: ReceivedMessage) -> Result<ReceivedMessage, BusError> {
        Ok(message)
    }
}

/// Ordered pipeline of message plugins
#[derive(Clone, Default)]
pub struct PluginChain {
    plugins: Vec<Arc<dyn MessagePlugin>>,
}

impl PluginChain {
    /// Create empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a plugin; plugins run in registration order
    pub fn register(&mut self, plugin: Arc<dyn MessagePlugin>) {
        self.plugins.push(plugin);
    }

    /// Number of registered plugins
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Check if the chain has no plugins
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Apply all plugins to an outgoing message
    pub async fn apply_outgoing(&self, message: Message) -> Result<Message, BusError> {
        let mut current = message;
        for plugin in &self.plugins {
            let checkpoint = current.clone();
            match plugin.before_send(current).await {
                Ok(next) => current = next,
                Err(error) if plugin.continue_on_error() => {
                    warn!(plugin = plugin.name(), %error, "send plugin failed, continuing");
                    current = checkpoint;
                }
                Err(error) => {
                    return Err(BusError::Plugin {
                        name: plugin.name().to_string(),
                        message: error.to_string(),
                    });
                }
            }
        }
        Ok(current)
    }

    /// Apply all plugins to an incoming message
    pub async fn apply_incoming(
        &self,
        message: ReceivedMessage,
    ) -> Result<ReceivedMessage, BusError> {
        let mut current = message;
        for plugin in &self.plugins {
            let checkpoint = current.clone();
            match plugin.after_receive(current).await {
                Ok(next) => current = next,
                Err(error) if plugin.continue_on_error() => {
                    warn!(plugin = plugin.name(), %error, "receive plugin failed, continuing");
                    current = checkpoint;
                }
                Err(error) => {
                    return Err(BusError::Plugin {
                        name: plugin.name().to_string(),
                        message: error.to_string(),
                    });
                }
            }
        }
        Ok(current)
    }
}

impl std::fmt::Debug for PluginChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginChain")
            .field("plugins", &self.plugins.iter().map(|p| p.name()).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
#[path = "plugin_tests.rs"]
mod tests;
