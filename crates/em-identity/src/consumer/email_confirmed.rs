use async_trait::async_trait;
use std::sync::Arc;

use em_common::AccountMessage;

use super::BatchHandler;
use crate::auth::AuthService;

/// Activates every confirmed account of a batch in a single call
pub struct EmailConfirmedHandler {
    auth: Arc<AuthService>,
}

impl EmailConfirmedHandler {
    pub fn new(auth: Arc<AuthService>) -> Self {
        Self { auth }
    }
}

#[async_trait]
impl BatchHandler for EmailConfirmedHandler {
    fn name(&self) -> &'static str {
        "email-confirmed"
    }

    async fn handle(&self, messages: &[AccountMessage]) -> crate::Result<()> {
        let emails: Vec<String> = messages.iter().map(|m| m.email.clone()).collect();
        self.auth.activate_accounts(&emails).await?;
        Ok(())
    }
}
