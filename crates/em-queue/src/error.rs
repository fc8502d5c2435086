use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    /// Embedded queue storage failure
    #[error("Queue storage error: {0}")]
    Database(String),

    #[error("AWS SQS error: {0}")]
    Sqs(String),

    /// Some entries of a batch delete were rejected; they will be redelivered
    #[error("{failed} of {requested} deletes failed")]
    PartialDelete { failed: usize, requested: usize },
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for QueueError {
    fn from(e: sqlx::Error) -> Self {
        QueueError::Database(e.to_string())
    }
}
