use async_trait::async_trait;
use aws_sdk_sqs::{types::DeleteMessageBatchRequestEntry, types::Message as SqsMessage, Client};
use tracing::{debug, error, warn};

use em_common::QueuedMessage;
use crate::{QueueError, QueueReceiver, QueueSender, Result};

/// SQS caps both receive and delete batches at 10 entries
const SQS_MAX_BATCH: usize = 10;

/// SQS caps long polling at 20 seconds
const SQS_MAX_WAIT_SECONDS: u32 = 20;

/// AWS SQS queue, used for both receiving and sending
pub struct SqsQueue {
    client: Client,
    queue_url: String,
    queue_name: String,
    visibility_timeout_seconds: i32,
}

impl SqsQueue {
    pub fn new(
        client: Client,
        queue_url: String,
        queue_name: String,
        visibility_timeout_seconds: i32,
    ) -> Self {
        Self {
            client,
            queue_url,
            queue_name,
            visibility_timeout_seconds,
        }
    }

    /// Create from queue URL, extracting name
    pub fn from_queue_url(client: Client, queue_url: String, visibility_timeout_seconds: i32) -> Self {
        let queue_name = queue_url
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("unknown")
            .to_string();

        Self::new(client, queue_url, queue_name, visibility_timeout_seconds)
    }

    fn to_queued(&self, sqs_msg: &SqsMessage) -> Option<QueuedMessage> {
        let Some(receipt_handle) = sqs_msg.receipt_handle() else {
            error!(
                queue = %self.queue_name,
                message_id = ?sqs_msg.message_id(),
                "SQS message without receipt handle, skipping"
            );
            return None;
        };

        // An empty body is passed through and dead-lettered by the consumer
        Some(QueuedMessage {
            body: sqs_msg.body().unwrap_or_default().to_string(),
            receipt_handle: receipt_handle.to_string(),
            broker_message_id: sqs_msg.message_id().map(|s| s.to_string()),
            queue_identifier: self.queue_name.clone(),
        })
    }
}

#[async_trait]
impl QueueReceiver for SqsQueue {
    fn identifier(&self) -> &str {
        &self.queue_name
    }

    async fn receive(&self, max_messages: u32, wait_seconds: u32) -> Result<Vec<QueuedMessage>> {
        let result = self.client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages.clamp(1, SQS_MAX_BATCH as u32) as i32)
            .visibility_timeout(self.visibility_timeout_seconds)
            .wait_time_seconds(wait_seconds.min(SQS_MAX_WAIT_SECONDS) as i32)
            .send()
            .await
            .map_err(|e| QueueError::Sqs(e.to_string()))?;

        let messages: Vec<QueuedMessage> = result
            .messages
            .unwrap_or_default()
            .iter()
            .filter_map(|m| self.to_queued(m))
            .collect();

        if !messages.is_empty() {
            debug!(
                queue = %self.queue_name,
                count = messages.len(),
                "Received messages from SQS"
            );
        }

        Ok(messages)
    }

    async fn delete_batch(&self, receipt_handles: &[String]) -> Result<()> {
        for chunk in receipt_handles.chunks(SQS_MAX_BATCH) {
            let entries = chunk
                .iter()
                .enumerate()
                .map(|(i, handle)| {
                    DeleteMessageBatchRequestEntry::builder()
                        .id(i.to_string())
                        .receipt_handle(handle)
                        .build()
                        .map_err(|e| QueueError::Sqs(e.to_string()))
                })
                .collect::<Result<Vec<_>>>()?;

            let output = self.client
                .delete_message_batch()
                .queue_url(&self.queue_url)
                .set_entries(Some(entries))
                .send()
                .await
                .map_err(|e| QueueError::Sqs(e.to_string()))?;

            let failed = output.failed();
            if !failed.is_empty() {
                for entry in failed {
                    warn!(
                        queue = %self.queue_name,
                        entry = %entry.id(),
                        code = %entry.code(),
                        message = ?entry.message(),
                        "SQS batch delete entry failed"
                    );
                }
                return Err(QueueError::PartialDelete {
                    failed: failed.len(),
                    requested: chunk.len(),
                });
            }
        }

        debug!(
            queue = %self.queue_name,
            count = receipt_handles.len(),
            "Messages deleted from SQS"
        );
        Ok(())
    }
}

#[async_trait]
impl QueueSender for SqsQueue {
    fn identifier(&self) -> &str {
        &self.queue_name
    }

    async fn send(&self, body: &str) -> Result<String> {
        let output = self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| QueueError::Sqs(e.to_string()))?;

        let message_id = output.message_id().unwrap_or_default().to_string();
        debug!(queue = %self.queue_name, message_id = %message_id, "Message sent to SQS");
        Ok(message_id)
    }
}
