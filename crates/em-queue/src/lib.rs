//! Queue abstractions for the account pipeline.
//!
//! Receivers hand back raw bodies; decoding (and dead-lettering of bodies that
//! fail to decode) is the consumer's concern.

use async_trait::async_trait;
use em_common::QueuedMessage;

pub mod error;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqs")]
pub mod sqs;

pub use error::QueueError;

pub type Result<T> = std::result::Result<T, QueueError>;

/// Batch receive side of a queue with explicit deletion
#[async_trait]
pub trait QueueReceiver: Send + Sync {
    /// Get the unique identifier for this queue
    fn identifier(&self) -> &str;

    /// Long-poll for up to `max_messages`, waiting at most `wait_seconds`.
    /// An empty result is not an error.
    async fn receive(&self, max_messages: u32, wait_seconds: u32) -> Result<Vec<QueuedMessage>>;

    /// Delete consumed messages by receipt handle
    async fn delete_batch(&self, receipt_handles: &[String]) -> Result<()>;
}

/// Publishing side of a queue
#[async_trait]
pub trait QueueSender: Send + Sync {
    fn identifier(&self) -> &str;

    /// Enqueue a raw body, returning the broker's message id
    async fn send(&self, body: &str) -> Result<String>;
}

/// Combined receiver and sender for embedded/dev mode
#[async_trait]
pub trait EmbeddedQueue: QueueReceiver + QueueSender {
    /// Initialize the queue schema (create tables, etc.)
    async fn init_schema(&self) -> Result<()>;
}
