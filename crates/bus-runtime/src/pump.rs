//! Supervised message receive pump.
//!
//! The pump continuously pulls messages from a [`ReceiverCore`] and
//! dispatches each to a user handler on its own worker task, bounded by a
//! semaphore of `max_concurrent_calls` permits. Under PeekLock it optionally
//! completes messages after the handler succeeds, abandons them after the
//! handler fails, and renews their locks on a ticker while the handler runs.
//! After registration succeeds the pump never raises to its caller; every
//! runtime failure routes through the error handler.

use crate::message::{MessageId, ReceiveMode, ReceivedMessage};
use crate::options::{PumpOptions, ShutdownMode};
use crate::receiver::ReceiverCore;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// User callback invoked once per received message
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: ReceivedMessage) -> Result<(), anyhow::Error>;
}

/// Stage of pump processing an error was raised in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpErrorSource {
    Receive,
    Handle,
    Complete,
    Abandon,
    RenewLock,
}

/// Error surfaced through the pump's error callback
#[derive(Debug)]
pub struct PumpError {
    pub source: PumpErrorSource,
    pub message_id: Option<MessageId>,
    pub error: anyhow::Error,
}

/// User callback for pump runtime failures
#[async_trait]
pub trait PumpErrorHandler: Send + Sync {
    async fn on_error(&self, error: PumpError);
}

/// Lifecycle state of the pump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    Idle,
    Running,
    Draining,
    Stopped,
}

const STATE_IDLE: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_DRAINING: u8 = 2;
const STATE_STOPPED: u8 = 3;

/// Permit-bounded worker pool consuming one receiver
pub struct MessageReceivePump {
    receiver: Arc<ReceiverCore>,
    handler: Arc<dyn MessageHandler>,
    error_handler: Arc<dyn PumpErrorHandler>,
    options: PumpOptions,
    permits: Arc<Semaphore>,
    /// Stops the receive loop
    cancel: CancellationToken,
    /// Stops renewal tickers of abandoned workers on immediate shutdown
    ticker_root: CancellationToken,
    state: AtomicU8,
    loop_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl MessageReceivePump {
    /// Create the pump and launch its receive loop
    pub fn start(
        receiver: Arc<ReceiverCore>,
        handler: Arc<dyn MessageHandler>,
        error_handler: Arc<dyn PumpErrorHandler>,
        options: PumpOptions,
    ) -> Arc<Self> {
        let max_concurrent = options.max_concurrent_calls.max(1);
        let pump = Arc::new(Self {
            receiver,
            handler,
            error_handler,
            options,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            cancel: CancellationToken::new(),
            ticker_root: CancellationToken::new(),
            state: AtomicU8::new(STATE_IDLE),
            loop_task: std::sync::Mutex::new(None),
        });

        pump.state.store(STATE_RUNNING, Ordering::SeqCst);
        let task = tokio::spawn(pump.clone().receive_loop());
        let mut slot = pump.loop_task.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(task);
        drop(slot);
        pump
    }

    /// Current lifecycle state
    pub fn state(&self) -> PumpState {
        match self.state.load(Ordering::SeqCst) {
            STATE_IDLE => PumpState::Idle,
            STATE_RUNNING => PumpState::Running,
            STATE_DRAINING => PumpState::Draining,
            _ => PumpState::Stopped,
        }
    }

    /// Stop the pump according to its shutdown mode.
    ///
    /// Both modes stop issuing receives immediately. Graceful shutdown then
    /// reacquires every permit so all in-flight handlers have finished by
    /// the time this returns; immediate shutdown cancels the renewal tickers
    /// of in-flight workers and returns without awaiting them.
    pub async fn stop(&self) {
        self.state.store(STATE_DRAINING, Ordering::SeqCst);
        self.cancel.cancel();

        let task = {
            let mut slot = self.loop_task.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        if let Some(task) = task {
            let _ = task.await;
        }

        match self.options.shutdown_mode {
            ShutdownMode::Graceful => {
                let total = self.options.max_concurrent_calls.max(1) as u32;
                // All permits free means no handler is still in flight.
                let _drained = self.permits.acquire_many(total).await;
            }
            ShutdownMode::Immediate => {
                self.ticker_root.cancel();
            }
        }

        self.state.store(STATE_STOPPED, Ordering::SeqCst);
        debug!(entity = %self.receiver.entity(), "pump stopped");
    }

    async fn receive_loop(self: Arc<Self>) {
        let receive_wait = self.options.receive_wait;
        let idle_backoff = self
            .options
            .idle_backoff
            .to_std()
            .unwrap_or(std::time::Duration::from_millis(100));

        loop {
            let permit = tokio::select! {
                _ = self.cancel.cancelled() => break,
                permit = self.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let received = tokio::select! {
                _ = self.cancel.cancelled() => {
                    drop(permit);
                    break;
                }
                received = self.receiver.receive_one(receive_wait) => received,
            };

            match received {
                Ok(Some(message)) => {
                    let pump = self.clone();
                    tokio::spawn(pump.process(permit, message));
                }
                Ok(None) => {
                    drop(permit);
                    tokio::time::sleep(idle_backoff).await;
                }
                Err(err) => {
                    drop(permit);
                    self.report(PumpErrorSource::Receive, None, err.into()).await;
                    tokio::time::sleep(idle_backoff).await;
                }
            }
        }
    }

    /// Process one message on its own worker task; owns a permit for the
    /// duration of the handler invocation.
    async fn process(self: Arc<Self>, permit: OwnedSemaphorePermit, message: ReceivedMessage) {
        let message_id = message.message_id.clone();
        let lock_token = message.lock_token;
        let peek_lock = self.receiver.receive_mode() == ReceiveMode::PeekLock;

        let renewal = if peek_lock && self.options.auto_renew_lock && lock_token.is_some() {
            Some(self.spawn_renewal(message_id.clone(), lock_token))
        } else {
            None
        };

        let outcome = self.handler.handle(message).await;

        match outcome {
            Ok(()) => {
                if peek_lock && self.options.auto_complete {
                    if let Some(token) = lock_token {
                        if let Err(err) = self.receiver.complete(&token).await {
                            self.report(
                                PumpErrorSource::Complete,
                                Some(message_id.clone()),
                                err.into(),
                            )
                            .await;
                        }
                    }
                }
            }
            Err(err) => {
                error!(message_id = %message_id, error = %err, "message handler failed");
                self.report(PumpErrorSource::Handle, Some(message_id.clone()), err)
                    .await;
                if peek_lock {
                    if let Some(token) = lock_token {
                        if let Err(err) = self.receiver.abandon(&token).await {
                            self.report(
                                PumpErrorSource::Abandon,
                                Some(message_id.clone()),
                                err.into(),
                            )
                            .await;
                        }
                    }
                }
            }
        }

        if let Some((cancel, task)) = renewal {
            cancel.cancel();
            let _ = task.await;
        }
        drop(permit);
    }

    /// Launch the lock renewal ticker for one in-flight message.
    ///
    /// Tickers for different messages are independent tasks; they never
    /// serialize on a shared lock.
    fn spawn_renewal(
        &self,
        message_id: MessageId,
        lock_token: Option<crate::message::LockToken>,
    ) -> (CancellationToken, JoinHandle<()>) {
        let cancel = self.ticker_root.child_token();
        let interval = self
            .options
            .renew_interval
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(10));
        let receiver = self.receiver.clone();
        let error_handler = self.error_handler.clone();
        let ticker_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            let Some(token) = lock_token else {
                return;
            };
            loop {
                tokio::select! {
                    _ = ticker_cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                match receiver.renew_lock(&token).await {
                    Ok(locked_until) => {
                        debug!(message_id = %message_id, until = %locked_until, "lock renewed");
                    }
                    Err(err) => {
                        warn!(message_id = %message_id, error = %err, "lock renewal failed");
                        error_handler
                            .on_error(PumpError {
                                source: PumpErrorSource::RenewLock,
                                message_id: Some(message_id.clone()),
                                error: err.into(),
                            })
                            .await;
                        break;
                    }
                }
            }
        });
        (cancel, task)
    }

    async fn report(
        &self,
        source: PumpErrorSource,
        message_id: Option<MessageId>,
        error: anyhow::Error,
    ) {
        self.error_handler
            .on_error(PumpError {
                source,
                message_id,
                error,
            })
            .await;
    }
}

impl Drop for MessageReceivePump {
    fn drop(&mut self) {
        // Last-resort teardown if stop() was never awaited.
        self.cancel.cancel();
        self.ticker_root.cancel();
    }
}

#[cfg(test)]
#[path = "pump_tests.rs"]
mod tests;
