//! Receiver core: receive, peek, deferred receive, dispositions, and lock
//! renewal for one broker entity.
//!
//! Dispositions are routed by acquisition path: tokens recorded in the
//! [`LockTokenRegistry`] were granted through the management channel and are
//! settled there; every other token settles as a link-level outcome using
//! the delivery tag derived from it.

use crate::error::BusError;
use crate::links::{ManagementLinkFactory, ReceiveLinkFactory};
use crate::lock_registry::LockTokenRegistry;
use crate::message::{
    EntityPath, LockToken, MessageId, ReceiveMode, ReceivedMessage, SessionId, Timestamp,
};
use crate::options::{ClientOptions, PumpOptions, ReceiverOptions};
use crate::plugin::PluginChain;
use crate::pump::{MessageHandler, MessageReceivePump, PumpErrorHandler, PumpState};
use crate::resource::ResilientResource;
use crate::retry::RetryPolicy;
use crate::transport::{
    operations, properties, Disposition, LinkHandle, ManagementResponse, PropertyMap, RawMessage,
    ReceiveLinkSettings, SendOutcome, Transport,
};
use chrono::Duration;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Wait applied by the transport for batch completion once one message is in
const BATCH_FLUSH_MS: i64 = 20;

/// Receiver for one broker entity
pub struct ReceiverCore {
    entity: EntityPath,
    transport: Arc<dyn Transport>,
    link: ResilientResource<ReceiveLinkFactory>,
    management_link: ResilientResource<ManagementLinkFactory>,
    retry: RetryPolicy,
    registry: LockTokenRegistry,
    mode: ReceiveMode,
    session_id: Option<SessionId>,
    plugins: PluginChain,
    operation_timeout: Duration,
    pump: Mutex<Option<Arc<MessageReceivePump>>>,
    closed: AtomicBool,
}

impl ReceiverCore {
    /// Create new receiver for `entity`
    pub fn new(
        transport: Arc<dyn Transport>,
        entity: EntityPath,
        client_options: &ClientOptions,
        receiver_options: ReceiverOptions,
        retry: RetryPolicy,
        plugins: PluginChain,
    ) -> Self {
        let settings = ReceiveLinkSettings {
            mode: receiver_options.receive_mode,
            prefetch: receiver_options.prefetch_count,
            session_id: receiver_options.session_id.clone(),
        };
        let link = ResilientResource::new(
            ReceiveLinkFactory {
                transport: transport.clone(),
                entity: entity.clone(),
                settings,
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
            registry: LockTokenRegistry::new(),
            mode: receiver_options.receive_mode,
            session_id: receiver_options.session_id,
            plugins,
            operation_timeout: receiver_options
                .operation_timeout
                .unwrap_or(client_options.operation_timeout),
            pump: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Entity this receiver consumes from
    pub fn entity(&self) -> &EntityPath {
        &self.entity
    }

    /// Receive mode of this receiver
    pub fn receive_mode(&self) -> ReceiveMode {
        self.mode
    }

    /// Session this receiver is scoped to, if any
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    // ========================================================================
    // Receiving
    // ========================================================================

    /// Receive up to `max_count` messages within the `wait` budget.
    ///
    /// PeekLock messages whose lock has already expired by the time they are
    /// materialized are released back to the broker and do not count against
    /// the batch; the loop keeps waiting for replacements until the budget
    /// runs out. An empty vector means no live messages arrived in time.
    pub async fn receive(
        &self,
        max_count: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, BusError> {
        self.ensure_open()?;
        let max_count = max_count.max(1);
        let deadline = Timestamp::now() + wait;

        self.retry
            .run_operation(wait, |remaining| {
                Box::pin(async move {
                    let link = self.link.get_or_create(remaining).await?;
                    let mut out: Vec<ReceivedMessage> = Vec::new();

                    loop {
                        let budget = deadline.remaining();
                        if budget <= Duration::zero() {
                            break;
                        }

                        let result = self
                            .transport
                            .receive(
                                &link,
                                (max_count - out.len()) as u32,
                                Duration::milliseconds(BATCH_FLUSH_MS),
                                budget,
                            )
                            .await;
                        // Messages already in hand are never forfeited to a
                        // transport error; the partial batch stands and the
                        // fault surfaces on the next call.
                        let raws = match self.observe_link(&link, result).await {
                            Ok(raws) => raws,
                            Err(error) if !out.is_empty() => {
                                warn!(
                                    entity = %self.entity,
                                    %error,
                                    "receive failed mid-batch, returning partial batch"
                                );
                                break;
                            }
                            Err(error) => return Err(error),
                        };

                        let mut discarded = 0usize;
                        for raw in raws {
                            let message = self.materialize(raw).await?;
                            if self.mode == ReceiveMode::PeekLock && message.is_lock_expired() {
                                discarded += 1;
                                self.release_expired(&link, &message).await;
                                continue;
                            }
                            out.push(message);
                        }

                        if out.len() >= max_count {
                            break;
                        }
                        // A short batch stands unless locks expired locally;
                        // then the remaining budget buys replacements.
                        if !out.is_empty() && discarded == 0 {
                            break;
                        }
                        if deadline.has_elapsed() {
                            break;
                        }
                    }
                    Ok(out)
                })
            })
            .await
    }

    /// Receive a single message, if one arrives within the wait budget
    pub async fn receive_one(&self, wait: Duration) -> Result<Option<ReceivedMessage>, BusError> {
        let mut batch = self.receive(1, wait).await?;
        Ok(batch.pop())
    }

    /// Peek messages without locking or consuming them
    pub async fn peek(
        &self,
        from_sequence: Option<i64>,
        count: usize,
    ) -> Result<Vec<ReceivedMessage>, BusError> {
        self.ensure_open()?;
        let response = self
            .management_request(operations::PEEK, move |request| {
                if let Some(from) = from_sequence {
                    request.insert(
                        properties::FROM_SEQUENCE.to_string(),
                        serde_json::Value::from(from),
                    );
                }
                request.insert(
                    properties::COUNT.to_string(),
                    serde_json::Value::from(count as i64),
                );
            })
            .await?;
        self.decode_messages(&response).await
    }

    /// Receive previously deferred messages by sequence number.
    ///
    /// The returned locks were granted through the management channel; their
    /// tokens are recorded so later dispositions take the same path.
    pub async fn receive_deferred(
        &self,
        sequence_numbers: &[i64],
    ) -> Result<Vec<ReceivedMessage>, BusError> {
        self.ensure_open()?;
        let sequences = sequence_numbers.to_vec();
        let response = self
            .management_request(operations::RECEIVE_BY_SEQUENCE, move |request| {
                request.insert(
                    properties::SEQUENCE_NUMBERS.to_string(),
                    serde_json::Value::from(sequences.clone()),
                );
            })
            .await?;

        let messages = self.decode_messages(&response).await?;
        for message in &messages {
            if let (Some(token), Some(locked_until)) = (message.lock_token, message.locked_until) {
                self.registry.add(token, locked_until);
            }
        }
        Ok(messages)
    }

    // ========================================================================
    // Dispositions
    // ========================================================================

    /// Mark a message as successfully processed
    pub async fn complete(&self, token: &LockToken) -> Result<(), BusError> {
        self.settle(token, Disposition::Complete).await
    }

    /// Return a message to the broker for redelivery
    pub async fn abandon(&self, token: &LockToken) -> Result<(), BusError> {
        self.settle(token, Disposition::Abandon).await
    }

    /// Set a message aside until received by sequence number
    pub async fn defer(&self, token: &LockToken) -> Result<(), BusError> {
        self.settle(token, Disposition::Defer).await
    }

    /// Move a message to the dead-letter sub-queue
    pub async fn dead_letter(
        &self,
        token: &LockToken,
        reason: String,
        description: Option<String>,
    ) -> Result<(), BusError> {
        self.settle(
            token,
            Disposition::DeadLetter {
                reason,
                description,
            },
        )
        .await
    }

    /// Renew the lock on a message, returning the new expiry
    pub async fn renew_lock(&self, token: &LockToken) -> Result<Timestamp, BusError> {
        self.ensure_open()?;
        let token = *token;
        let response = self
            .management_request(operations::RENEW_LOCK, move |request| {
                request.insert(
                    properties::LOCK_TOKEN.to_string(),
                    serde_json::Value::from(token.to_string()),
                );
            })
            .await?;

        let locked_until = decode_locked_until(&response)?;
        if self.registry.contains(&token) {
            self.registry.add(token, locked_until);
        }
        Ok(locked_until)
    }

    /// Renew the session lock of a session-scoped receiver
    pub async fn renew_session_lock(&self) -> Result<Timestamp, BusError> {
        self.ensure_open()?;
        let session_id = self
            .session_id
            .clone()
            .ok_or_else(|| BusError::Validation(crate::error::ValidationError::Required {
                field: "session_id".to_string(),
            }))?;
        let response = self
            .management_request(operations::RENEW_SESSION_LOCK, move |request| {
                request.insert(
                    properties::SESSION_ID.to_string(),
                    serde_json::Value::from(session_id.as_str().to_string()),
                );
            })
            .await?;
        decode_locked_until(&response)
    }

    // ========================================================================
    // Pump registration
    // ========================================================================

    /// Register a message handler, starting the receive pump.
    ///
    /// A receiver holds at most one active registration; a second call fails
    /// until the pump has stopped.
    pub fn register_message_handler(
        self: &Arc<Self>,
        handler: Arc<dyn MessageHandler>,
        error_handler: Arc<dyn PumpErrorHandler>,
        options: PumpOptions,
    ) -> Result<(), BusError> {
        self.ensure_open()?;
        let mut slot = self.pump.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pump) = slot.as_ref() {
            if pump.state() != PumpState::Stopped {
                return Err(BusError::HandlerAlreadyRegistered);
            }
        }
        let pump = MessageReceivePump::start(self.clone(), handler, error_handler, options);
        *slot = Some(pump);
        Ok(())
    }

    /// Stop the active pump, if any, honoring its shutdown mode
    pub async fn stop_pump(&self) {
        let pump = {
            let mut slot = self.pump.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        if let Some(pump) = pump {
            pump.stop().await;
        }
    }

    /// Close the receiver: stop the pump and close both links
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.stop_pump().await;
        self.link.close().await;
        self.management_link.close().await;
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::ClientClosed {
                entity: self.entity.as_str().to_string(),
            });
        }
        Ok(())
    }

    fn lock_lost(&self, token: &LockToken) -> BusError {
        match &self.session_id {
            Some(session_id) => BusError::SessionLockLost {
                session_id: session_id.as_str().to_string(),
            },
            None => BusError::MessageLockLost {
                lock_token: token.to_string(),
            },
        }
    }

    async fn settle(&self, token: &LockToken, disposition: Disposition) -> Result<(), BusError> {
        self.ensure_open()?;
        self.retry
            .run_operation(self.operation_timeout, |remaining| {
                let disposition = disposition.clone();
                Box::pin(async move {
                    if self.registry.contains(token) {
                        self.settle_via_management(token, disposition, remaining)
                            .await?;
                        self.registry.remove(token);
                        Ok(())
                    } else {
                        self.settle_via_link(token, disposition, remaining).await
                    }
                })
            })
            .await
    }

    async fn settle_via_link(
        &self,
        token: &LockToken,
        disposition: Disposition,
        timeout: Duration,
    ) -> Result<(), BusError> {
        // A disposition against a link that is genuinely unopened, faulted,
        // or closed means the lock cannot be honored anymore. A slot held
        // briefly by a concurrent receive is waited out, not misread.
        let Some(link) = self.link.get_opened().await else {
            return Err(self.lock_lost(token));
        };
        let result = self
            .transport
            .dispose(&link, &token.as_delivery_tag(), disposition, timeout)
            .await;
        match result {
            Ok(SendOutcome::Accepted) => Ok(()),
            Ok(SendOutcome::Rejected(error)) => Err(error),
            Ok(SendOutcome::Released) | Ok(SendOutcome::Modified) => {
                Err(BusError::ConnectionLost {
                    message: "disposition not settled by broker".to_string(),
                })
            }
            Err(BusError::LinkDetached { .. }) => {
                self.link.mark_faulted(&link).await;
                Err(self.lock_lost(token))
            }
            Err(error) => Err(error),
        }
    }

    async fn settle_via_management(
        &self,
        token: &LockToken,
        disposition: Disposition,
        timeout: Duration,
    ) -> Result<(), BusError> {
        let link = self.management_link.get_or_create(timeout).await?;
        let mut request = PropertyMap::new();
        request.insert(
            properties::LOCK_TOKEN.to_string(),
            serde_json::Value::from(token.to_string()),
        );
        request.insert(
            properties::DISPOSITION.to_string(),
            serde_json::Value::from(disposition.as_str()),
        );
        if let Disposition::DeadLetter {
            reason,
            description,
        } = &disposition
        {
            request.insert(
                properties::DEADLETTER_REASON.to_string(),
                serde_json::Value::from(reason.clone()),
            );
            if let Some(description) = description {
                request.insert(
                    properties::DEADLETTER_DESCRIPTION.to_string(),
                    serde_json::Value::from(description.clone()),
                );
            }
        }
        let result = self
            .transport
            .execute_management_request(&link, operations::UPDATE_DISPOSITION, request, timeout)
            .await;
        let result = self.observe_management(&link, result).await;
        match result {
            Err(BusError::LinkDetached { .. }) => Err(self.lock_lost(token)),
            other => other.map(|_| ()),
        }
    }

    /// Issue one management request under the receiver's retry policy
    async fn management_request<B>(
        &self,
        operation: &str,
        build: B,
    ) -> Result<ManagementResponse, BusError>
    where
        B: Fn(&mut PropertyMap) + Send + Sync,
    {
        self.retry
            .run_operation(self.operation_timeout, |remaining| {
                let build = &build;
                Box::pin(async move {
                    let link = self.management_link.get_or_create(remaining).await?;
                    let mut request = PropertyMap::new();
                    build(&mut request);
                    let result = self
                        .transport
                        .execute_management_request(&link, operation, request, remaining)
                        .await;
                    self.observe_management(&link, result).await
                })
            })
            .await
    }

    async fn observe_link<T>(
        &self,
        link: &Arc<LinkHandle>,
        result: Result<T, BusError>,
    ) -> Result<T, BusError> {
        if let Err(BusError::LinkDetached { .. }) = &result {
            self.link.mark_faulted(link).await;
        }
        result
    }

    async fn observe_management<T>(
        &self,
        link: &Arc<LinkHandle>,
        result: Result<T, BusError>,
    ) -> Result<T, BusError> {
        if let Err(BusError::LinkDetached { .. }) = &result {
            self.management_link.mark_faulted(link).await;
        }
        result
    }

    /// Release a message whose lock expired before it reached the caller
    async fn release_expired(&self, link: &Arc<LinkHandle>, message: &ReceivedMessage) {
        let Some(token) = message.lock_token else {
            return;
        };
        debug!(
            entity = %self.entity,
            message_id = %message.message_id,
            "discarding message with expired lock"
        );
        let result = self
            .transport
            .dispose(
                link,
                &token.as_delivery_tag(),
                Disposition::Abandon,
                Duration::milliseconds(BATCH_FLUSH_MS),
            )
            .await;
        if let Err(error) = result {
            // The broker requeues on lock expiry anyway; nothing to recover.
            warn!(entity = %self.entity, %error, "failed to release expired message");
        }
    }

    /// Convert a raw transport message and run the incoming plugin chain
    async fn materialize(&self, raw: RawMessage) -> Result<ReceivedMessage, BusError> {
        let message = ReceivedMessage {
            message_id: MessageId::from_str(&raw.message_id)?,
            body: raw.body,
            properties: raw.properties,
            session_id: raw.session_id.map(SessionId::new).transpose()?,
            partition_key: raw.partition_key,
            correlation_id: raw.correlation_id,
            content_type: raw.content_type,
            sequence_number: raw.sequence_number,
            delivery_count: raw.delivery_count,
            enqueued_at: raw.enqueued_at,
            lock_token: raw.lock_token,
            locked_until: raw.locked_until,
        };
        self.plugins.apply_incoming(message).await
    }

    async fn decode_messages(
        &self,
        response: &ManagementResponse,
    ) -> Result<Vec<ReceivedMessage>, BusError> {
        let raws = match response.properties.get(properties::MESSAGES) {
            Some(value) => crate::transport::decode_raw_messages(value)?,
            None => Vec::new(),
        };
        let mut messages = Vec::with_capacity(raws.len());
        for raw in raws {
            messages.push(self.materialize(raw).await?);
        }
        Ok(messages)
    }
}

fn decode_locked_until(response: &ManagementResponse) -> Result<Timestamp, BusError> {
    let value = response
        .properties
        .get(properties::LOCKED_UNTIL)
        .ok_or_else(|| BusError::Management {
            status: response.status,
            condition: "missing locked-until in response".to_string(),
        })?;
    serde_json::from_value(value.clone()).map_err(|e| BusError::Management {
        status: response.status,
        condition: format!("invalid locked-until in response: {}", e),
    })
}

#[cfg(test)]
#[path = "receiver_tests.rs"]
mod tests;
