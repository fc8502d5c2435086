use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

use super::{RefreshTokenRecord, RefreshTokenStore, DEFAULT_MAX_TOKENS_PER_ACCOUNT};
use crate::shared::error::Result;

#[derive(Default)]
struct Arena {
    records: HashMap<String, RefreshTokenRecord>,
    /// Record ids per account, most recent first
    by_account: HashMap<String, Vec<String>>,
}

impl Arena {
    /// Ordered by created-at, newest first; among equal timestamps the most
    /// recently issued record comes first.
    fn insert(&mut self, record: RefreshTokenRecord) {
        let ids = self.by_account.entry(record.account_id.clone()).or_default();
        let records = &self.records;
        let pos = ids
            .iter()
            .position(|id| {
                records
                    .get(id)
                    .is_some_and(|existing| existing.created_at <= record.created_at)
            })
            .unwrap_or(ids.len());
        ids.insert(pos, record.id.clone());
        self.records.insert(record.id.clone(), record);
    }

    fn remove(&mut self, id: &str) -> Option<RefreshTokenRecord> {
        let record = self.records.remove(id)?;
        if let Some(ids) = self.by_account.get_mut(&record.account_id) {
            ids.retain(|other| other != id);
            if ids.is_empty() {
                self.by_account.remove(&record.account_id);
            }
        }
        Some(record)
    }

    /// Keep `keep_id` plus the `keep - 1` most recent other records
    fn evict_beyond(&mut self, account_id: &str, keep: usize, keep_id: &str) {
        let Some(ids) = self.by_account.get_mut(account_id) else {
            return;
        };
        if ids.len() <= keep {
            return;
        }

        let mut others = 0;
        let mut evicted = Vec::new();
        ids.retain(|id| {
            if id == keep_id {
                return true;
            }
            if others + 1 < keep {
                others += 1;
                true
            } else {
                evicted.push(id.clone());
                false
            }
        });

        for id in evicted {
            self.records.remove(&id);
        }
    }
}

/// Refresh token store held in process memory.
///
/// One mutex guards the whole arena, so every operation is serialisable.
pub struct InMemoryRefreshTokenStore {
    arena: Mutex<Arena>,
    max_per_account: usize,
}

impl InMemoryRefreshTokenStore {
    pub fn new(max_per_account: usize) -> Self {
        Self {
            arena: Mutex::new(Arena::default()),
            max_per_account: max_per_account.max(1),
        }
    }
}

impl Default for InMemoryRefreshTokenStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TOKENS_PER_ACCOUNT)
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryRefreshTokenStore {
    async fn list(&self, account_id: &str) -> Result<Vec<RefreshTokenRecord>> {
        let arena = self.arena.lock();
        Ok(arena
            .by_account
            .get(account_id)
            .map(|ids| {
                ids.iter()
                    .take(self.max_per_account)
                    .filter_map(|id| arena.records.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn add(
        &self,
        account_id: &str,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshTokenRecord> {
        let record = RefreshTokenRecord {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            created_at,
            expires_at,
        };

        let mut arena = self.arena.lock();
        arena.insert(record.clone());
        arena.evict_beyond(account_id, self.max_per_account, &record.id);
        Ok(record)
    }

    async fn replace(
        &self,
        id: &str,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshTokenRecord> {
        let mut arena = self.arena.lock();
        let Some(old) = arena.remove(id) else {
            return Ok(RefreshTokenRecord::default());
        };

        let record = RefreshTokenRecord {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: old.account_id,
            created_at,
            expires_at,
        };
        arena.insert(record.clone());
        Ok(record)
    }

    async fn delete(&self, id: &str) -> Result<String> {
        Ok(self
            .arena
            .lock()
            .remove(id)
            .map(|record| record.id)
            .unwrap_or_default())
    }

    async fn delete_by_account_id(&self, account_id: &str) -> Result<Vec<String>> {
        let mut arena = self.arena.lock();
        let ids = arena.by_account.remove(account_id).unwrap_or_default();
        for id in &ids {
            arena.records.remove(id);
        }
        Ok(ids)
    }
}
