//! Email confirmation tokens and the service that issues and checks them.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::shared::error::Result;

pub mod memory;
pub mod postgres;
pub mod service;

pub use memory::InMemoryConfirmationTokenStore;
pub use postgres::PostgresConfirmationTokenStore;
pub use service::{ConfirmationLink, EmailConfirmationService};

/// How long a confirmation token stays valid
pub fn confirmation_token_ttl() -> Duration {
    Duration::minutes(20)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailConfirmationRecord {
    pub email: String,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl EmailConfirmationRecord {
    /// Valid only while `now < expires_at`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Several records per email may coexist; none is consumed by confirmation.
#[async_trait]
pub trait ConfirmationTokenStore: Send + Sync {
    /// Store a token expiring 20 minutes from now
    async fn insert_token(&self, email: &str, token: &str) -> Result<EmailConfirmationRecord>;

    async fn find_token_record(&self, token: &str) -> Result<Option<EmailConfirmationRecord>>;

    /// Newest first
    async fn list_tokens_email(&self, email: &str) -> Result<Vec<EmailConfirmationRecord>>;
}
