use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

use super::{confirmation_token_ttl, ConfirmationTokenStore, EmailConfirmationRecord};
use crate::shared::clock::Clock;
use crate::shared::error::Result;

pub struct InMemoryConfirmationTokenStore {
    /// Insertion order
    records: RwLock<Vec<EmailConfirmationRecord>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryConfirmationTokenStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            clock,
        }
    }
}

#[async_trait]
impl ConfirmationTokenStore for InMemoryConfirmationTokenStore {
    async fn insert_token(&self, email: &str, token: &str) -> Result<EmailConfirmationRecord> {
        let now = self.clock.now();
        let record = EmailConfirmationRecord {
            email: email.to_string(),
            token: token.to_string(),
            created_at: now,
            expires_at: now + confirmation_token_ttl(),
        };
        self.records.write().push(record.clone());
        Ok(record)
    }

    async fn find_token_record(&self, token: &str) -> Result<Option<EmailConfirmationRecord>> {
        Ok(self.records.read().iter().find(|r| r.token == token).cloned())
    }

    async fn list_tokens_email(&self, email: &str) -> Result<Vec<EmailConfirmationRecord>> {
        Ok(self
            .records
            .read()
            .iter()
            .rev()
            .filter(|r| r.email == email)
            .cloned()
            .collect())
    }
}
