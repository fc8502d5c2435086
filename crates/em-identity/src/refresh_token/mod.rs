//! Bounded per-account refresh token records.
//!
//! The store is the authority on whether a refresh token is still live: a
//! correctly signed, unexpired token whose record has been evicted, rotated or
//! deleted is revoked.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::shared::error::Result;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryRefreshTokenStore;
pub use postgres::PostgresRefreshTokenStore;

/// Live refresh tokens kept per account
pub const DEFAULT_MAX_TOKENS_PER_ACCOUNT: usize = 5;

/// A zero value (empty id) stands for "no record"
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub id: String,
    pub account_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Most recent first, at most the per-account limit
    async fn list(&self, account_id: &str) -> Result<Vec<RefreshTokenRecord>>;

    /// Insert a record, then evict all but the most recent ones (by
    /// created_at, ties broken by id) in the same transaction
    async fn add(
        &self,
        account_id: &str,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshTokenRecord>;

    /// Atomically swap a record for a new one on the same account.
    /// Unknown ids yield an empty record.
    async fn replace(
        &self,
        id: &str,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshTokenRecord>;

    /// Returns the deleted id, empty if there was none
    async fn delete(&self, id: &str) -> Result<String>;

    /// Returns the deleted ids
    async fn delete_by_account_id(&self, account_id: &str) -> Result<Vec<String>>;
}
