//! Account pipeline notifications published to the queues.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use em_common::AccountMessage;
use em_queue::QueueSender;

use crate::shared::error::Result;

#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    /// Ask for a confirmation email to be sent to a new account
    async fn account_created(&self, email: &str) -> Result<()>;

    /// Ask for the account owning `email` to be activated
    async fn email_confirmed(&self, email: &str) -> Result<()>;
}

/// Publishes `{"id": "", "email": ...}` bodies to the two pipeline queues
pub struct QueueNotificationPublisher {
    account_created: Arc<dyn QueueSender>,
    email_confirmed: Arc<dyn QueueSender>,
}

impl QueueNotificationPublisher {
    pub fn new(account_created: Arc<dyn QueueSender>, email_confirmed: Arc<dyn QueueSender>) -> Self {
        Self {
            account_created,
            email_confirmed,
        }
    }

    async fn publish(&self, queue: &dyn QueueSender, email: &str) -> Result<()> {
        let body = AccountMessage::for_email(email).to_json()?;
        let message_id = queue.send(&body).await?;
        debug!(
            queue = %queue.identifier(),
            message_id = %message_id,
            "Published account notification"
        );
        Ok(())
    }
}

#[async_trait]
impl NotificationPublisher for QueueNotificationPublisher {
    async fn account_created(&self, email: &str) -> Result<()> {
        self.publish(self.account_created.as_ref(), email).await
    }

    async fn email_confirmed(&self, email: &str) -> Result<()> {
        self.publish(self.email_confirmed.as_ref(), email).await
    }
}
