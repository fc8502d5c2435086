use async_trait::async_trait;
use std::sync::Arc;

use em_common::AccountMessage;

use super::BatchHandler;
use crate::confirmation::EmailConfirmationService;

/// Sends a confirmation email for every newly created account.
///
/// Messages are handled one after another; a failure mid-batch means the
/// earlier recipients get a second email on redelivery.
///
/// Queue messages carry no request host, so a `ConfirmationLink::FromRequest`
/// link is always built on its `fallback_host` here.
pub struct AccountCreatedHandler {
    confirmations: Arc<EmailConfirmationService>,
}

impl AccountCreatedHandler {
    pub fn new(confirmations: Arc<EmailConfirmationService>) -> Self {
        Self { confirmations }
    }
}

#[async_trait]
impl BatchHandler for AccountCreatedHandler {
    fn name(&self) -> &'static str {
        "account-created"
    }

    async fn handle(&self, messages: &[AccountMessage]) -> crate::Result<()> {
        for message in messages {
            self.confirmations.send(&message.email, None).await?;
        }
        Ok(())
    }
}
