//! Sender core: one operation per public send verb, combining a resilient
//! send link with retry handling.

use crate::error::BusError;
use crate::links::{ManagementLinkFactory, SendLinkFactory};
use crate::message::{EntityPath, Message, Timestamp};
use crate::options::ClientOptions;
use crate::plugin::PluginChain;
use crate::resource::ResilientResource;
use crate::retry::RetryPolicy;
use crate::transport::{
    operations, properties, LinkHandle, PropertyMap, RawMessage, SendOutcome, Transport,
};
use chrono::Duration;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Sender for one broker entity
pub struct SenderCore {
    entity: EntityPath,
    transport: Arc<dyn Transport>,
    link: ResilientResource<SendLinkFactory>,
    management_link: ResilientResource<ManagementLinkFactory>,
    retry: RetryPolicy,
    plugins: PluginChain,
    operation_timeout: Duration,
    closed: AtomicBool,
}

impl SenderCore {
    /// Create new sender for `entity`
    pub fn new(
        transport: Arc<dyn Transport>,
        entity: EntityPath,
        options: &ClientOptions,
        retry: RetryPolicy,
        plugins: PluginChain,
    ) -> Self {
        let link = ResilientResource::new(
            SendLinkFactory {
                transport: transport.clone(),
                entity: entity.clone(),
            },
            entity.as_str(),
        );
        let management_link = ResilientResource::new(
            ManagementLinkFactory {
                transport: transport.clone(),
                entity: entity.clone(),
            },
            entity.as_str(),
        );
        Self {
            entity,
            transport,
            link,
            management_link,
            retry,
            plugins,
            operation_timeout: options.operation_timeout,
            closed: AtomicBool::new(false),
        }
    }

    /// Entity this sender targets
    pub fn entity(&self) -> &EntityPath {
        &self.entity
    }

    /// Send a single message
    pub async fn send(&self, message: Message) -> Result<(), BusError> {
        self.send_batch(vec![message]).await
    }

    /// Send a batch of messages as one delivery
    pub async fn send_batch(&self, messages: Vec<Message>) -> Result<(), BusError> {
        self.ensure_open()?;
        if messages.is_empty() {
            return Ok(());
        }

        let mut raws = Vec::with_capacity(messages.len());
        for message in messages {
            let message = self.plugins.apply_outgoing(message).await?;
            raws.push(outgoing_raw(&message));
        }
        let delivery_tag = uuid::Uuid::new_v4().into_bytes();

        self.retry
            .run_operation(self.operation_timeout, |remaining| {
                let raws = &raws;
                Box::pin(async move {
                    let link = self.link.get_or_create(remaining).await?;
                    let outcome = self
                        .transport
                        .send(&link, raws, &delivery_tag, remaining)
                        .await;
                    let outcome = self.observe(&self.link, &link, outcome).await?;
                    map_send_outcome(outcome)
                })
            })
            .await?;

        debug!(entity = %self.entity, count = raws.len(), "batch sent");
        Ok(())
    }

    /// Schedule a message for a future enqueue time; returns the sequence
    /// number usable with [`SenderCore::cancel_scheduled_message`]
    pub async fn schedule_message(
        &self,
        message: Message,
        enqueue_time: Timestamp,
    ) -> Result<i64, BusError> {
        self.ensure_open()?;
        let message = self.plugins.apply_outgoing(message).await?;
        let raw = outgoing_raw(&message);
        let raw_value = serde_json::to_value(&raw).map_err(|e| BusError::Management {
            status: 500,
            condition: format!("message encoding failed: {}", e),
        })?;
        let time_value = serde_json::to_value(enqueue_time).map_err(|e| BusError::Management {
            status: 500,
            condition: format!("timestamp encoding failed: {}", e),
        })?;

        let response = self
            .retry
            .run_operation(self.operation_timeout, |remaining| {
                let raw_value = raw_value.clone();
                let time_value = time_value.clone();
                Box::pin(async move {
                    let link = self.management_link.get_or_create(remaining).await?;
                    let mut request = PropertyMap::new();
                    request.insert(properties::MESSAGE.to_string(), raw_value);
                    request.insert(properties::SCHEDULED_ENQUEUE_TIME.to_string(), time_value);
                    let result = self
                        .transport
                        .execute_management_request(
                            &link,
                            operations::SCHEDULE_MESSAGE,
                            request,
                            remaining,
                        )
                        .await;
                    self.observe(&self.management_link, &link, result).await
                })
            })
            .await?;

        response
            .properties
            .get(properties::SEQUENCE_NUMBER)
            .and_then(|value| value.as_i64())
            .ok_or_else(|| BusError::Management {
                status: response.status,
                condition: "missing sequence-number in schedule response".to_string(),
            })
    }

    /// Cancel a previously scheduled message
    pub async fn cancel_scheduled_message(&self, sequence_number: i64) -> Result<(), BusError> {
        self.ensure_open()?;
        self.retry
            .run_operation(self.operation_timeout, |remaining| {
                Box::pin(async move {
                    let link = self.management_link.get_or_create(remaining).await?;
                    let mut request = PropertyMap::new();
                    request.insert(
                        properties::SEQUENCE_NUMBER.to_string(),
                        serde_json::Value::from(sequence_number),
                    );
                    let result = self
                        .transport
                        .execute_management_request(
                            &link,
                            operations::CANCEL_SCHEDULED_MESSAGE,
                            request,
                            remaining,
                        )
                        .await;
                    self.observe(&self.management_link, &link, result).await?;
                    Ok(())
                })
            })
            .await
    }

    /// Close the sender and its links
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.link.close().await;
        self.management_link.close().await;
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::ClientClosed {
                entity: self.entity.as_str().to_string(),
            });
        }
        Ok(())
    }

    /// Report detach failures back to the resource holder so the next
    /// attempt recreates the link.
    async fn observe<T, F>(
        &self,
        resource: &ResilientResource<F>,
        link: &Arc<LinkHandle>,
        result: Result<T, BusError>,
    ) -> Result<T, BusError>
    where
        F: crate::resource::LinkFactory<Link = LinkHandle>,
    {
        if let Err(BusError::LinkDetached { .. }) = &result {
            resource.mark_faulted(link).await;
        }
        result
    }
}

/// Convert an outgoing message into its wire form
fn outgoing_raw(message: &Message) -> RawMessage {
    RawMessage {
        message_id: message.message_id.as_str().to_string(),
        body: message.body.clone(),
        properties: message.properties.clone(),
        session_id: message.session_id.as_ref().map(|s| s.as_str().to_string()),
        partition_key: message.partition_key.clone(),
        correlation_id: message.correlation_id.clone(),
        content_type: message.content_type.clone(),
        sequence_number: 0,
        delivery_count: 0,
        enqueued_at: Timestamp::now(),
        lock_token: None,
        locked_until: None,
    }
}

fn map_send_outcome(outcome: SendOutcome) -> Result<(), BusError> {
    match outcome {
        SendOutcome::Accepted => Ok(()),
        SendOutcome::Rejected(error) => Err(error),
        SendOutcome::Released => Err(BusError::ConnectionLost {
            message: "delivery released by broker".to_string(),
        }),
        SendOutcome::Modified => Err(BusError::ConnectionLost {
            message: "delivery modified by broker".to_string(),
        }),
    }
}

#[cfg(test)]
#[path = "sender_tests.rs"]
mod tests;
