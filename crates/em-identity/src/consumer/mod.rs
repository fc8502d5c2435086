//! Queue Consumers
//!
//! Long-running batch processors for the account pipeline:
//! - account created: send a confirmation email per message
//! - email confirmed: activate the whole batch of accounts in one call
//!
//! Delivery is at-least-once. A batch is deleted from the queue only after
//! its handler succeeds, so every handler side effect must be idempotent.
//! Bodies that cannot be decoded are dead-lettered: logged and deleted so
//! they cannot block the rest of the queue.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use em_common::{AccountMessage, QueuedMessage};
use em_queue::{QueueError, QueueReceiver};

use crate::shared::error::IdentityError;

pub mod account_created;
pub mod email_confirmed;
pub mod supervisor;

pub use account_created::AccountCreatedHandler;
pub use email_confirmed::EmailConfirmedHandler;
pub use supervisor::run_supervised;

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("Consumer cancelled")]
    Cancelled,

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Handler error: {0}")]
    Handler(#[source] IdentityError),
}

/// Processes one decoded batch at a time
#[async_trait]
pub trait BatchHandler: Send + Sync {
    /// Consumer name used in logs and metric labels
    fn name(&self) -> &'static str;

    /// Any error fails the whole batch, which is then redelivered
    async fn handle(&self, messages: &[AccountMessage]) -> crate::Result<()>;
}

/// Receive settings for a consumer loop
#[derive(Debug, Clone, Copy)]
pub struct ConsumerSettings {
    pub max_messages: u32,
    pub wait_seconds: u32,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            max_messages: 10,
            wait_seconds: 20,
        }
    }
}

pub struct BatchConsumer<H> {
    queue: Arc<dyn QueueReceiver>,
    handler: H,
    settings: ConsumerSettings,
}

impl<H: BatchHandler> BatchConsumer<H> {
    pub fn new(queue: Arc<dyn QueueReceiver>, handler: H, settings: ConsumerSettings) -> Self {
        Self {
            queue,
            handler,
            settings,
        }
    }

    pub fn name(&self) -> &'static str {
        self.handler.name()
    }

    /// Receive and process batches until cancelled or a batch fails.
    /// Never returns `Ok`.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), ConsumerError> {
        let name = self.handler.name();
        debug!(consumer = name, queue = %self.queue.identifier(), "Consumer loop started");

        loop {
            if cancel.is_cancelled() {
                return Err(ConsumerError::Cancelled);
            }

            let messages = tokio::select! {
                _ = cancel.cancelled() => return Err(ConsumerError::Cancelled),
                received = self.queue.receive(self.settings.max_messages, self.settings.wait_seconds) => received?,
            };

            if messages.is_empty() {
                continue;
            }

            self.process_batch(messages).await?;
        }
    }

    /// Decode, handle and delete one received batch
    pub async fn process_batch(&self, messages: Vec<QueuedMessage>) -> Result<(), ConsumerError> {
        let name = self.handler.name();
        metrics::counter!("identity.consumer.batches_total", "consumer" => name).increment(1);
        metrics::counter!("identity.consumer.messages_total", "consumer" => name)
            .increment(messages.len() as u64);

        let mut decoded = Vec::with_capacity(messages.len());
        let mut handles = Vec::with_capacity(messages.len());
        let mut poison_handles = Vec::new();

        for message in messages {
            match AccountMessage::from_json(&message.body) {
                Ok(account_message) => {
                    decoded.push(account_message);
                    handles.push(message.receipt_handle);
                }
                Err(e) => {
                    error!(
                        consumer = name,
                        queue = %message.queue_identifier,
                        message_id = ?message.broker_message_id,
                        error = %e,
                        "Undecodable message, dead-lettering"
                    );
                    metrics::counter!("identity.consumer.dead_lettered_total", "consumer" => name)
                        .increment(1);
                    poison_handles.push(message.receipt_handle);
                }
            }
        }

        if !decoded.is_empty() {
            if let Err(e) = self.handler.handle(&decoded).await {
                metrics::counter!("identity.consumer.failures_total", "consumer" => name)
                    .increment(1);
                warn!(
                    consumer = name,
                    batch_size = decoded.len(),
                    error = %e,
                    "Batch handler failed, leaving batch for redelivery"
                );
                // Poison messages can never succeed, drop them regardless
                if !poison_handles.is_empty() {
                    self.queue.delete_batch(&poison_handles).await?;
                }
                return Err(ConsumerError::Handler(e));
            }
        }

        handles.extend(poison_handles);
        self.queue.delete_batch(&handles).await?;

        debug!(consumer = name, processed = decoded.len(), "Batch processed");
        Ok(())
    }
}
