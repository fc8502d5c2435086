use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;

use super::{RefreshTokenRecord, RefreshTokenStore, DEFAULT_MAX_TOKENS_PER_ACCOUNT};
use crate::shared::error::Result;

/// Refresh token store over the `refresh_tokens` table.
///
/// `add` and `replace` both lock the owning account row, so concurrent
/// logins and rotations for one account serialise. Records with equal
/// `created_at` are ordered by `issued_seq`, newest first.
pub struct PostgresRefreshTokenStore {
    pool: PgPool,
    max_per_account: usize,
}

impl PostgresRefreshTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self::with_limit(pool, DEFAULT_MAX_TOKENS_PER_ACCOUNT)
    }

    pub fn with_limit(pool: PgPool, max_per_account: usize) -> Self {
        Self {
            pool,
            max_per_account: max_per_account.max(1),
        }
    }

    fn from_row(row: &PgRow) -> Result<RefreshTokenRecord> {
        Ok(RefreshTokenRecord {
            id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

/// Serialise writers for one account on its `accounts` row
async fn lock_account(tx: &mut Transaction<'_, Postgres>, account_id: &str) -> Result<()> {
    sqlx::query("SELECT id FROM accounts WHERE id = $1 FOR UPDATE")
        .bind(account_id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(())
}

#[async_trait]
impl RefreshTokenStore for PostgresRefreshTokenStore {
    async fn list(&self, account_id: &str) -> Result<Vec<RefreshTokenRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, created_at, expires_at
            FROM refresh_tokens
            WHERE account_id = $1
            ORDER BY created_at DESC, issued_seq DESC
            LIMIT $2
            "#,
        )
        .bind(account_id)
        .bind(self.max_per_account as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn add(
        &self,
        account_id: &str,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshTokenRecord> {
        let mut tx = self.pool.begin().await?;

        lock_account(&mut tx, account_id).await?;

        let row = sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, account_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, account_id, created_at, expires_at
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(account_id)
        .bind(created_at)
        .bind(expires_at)
        .fetch_one(&mut *tx)
        .await?;
        let record = Self::from_row(&row)?;

        // The new record always survives; the K-1 most recent others stay with it
        let evicted = sqlx::query(
            r#"
            DELETE FROM refresh_tokens
            WHERE id IN (
                SELECT id FROM refresh_tokens
                WHERE account_id = $1 AND id <> $2
                ORDER BY created_at DESC, issued_seq DESC
                OFFSET $3
            )
            "#,
        )
        .bind(account_id)
        .bind(&record.id)
        .bind(self.max_per_account as i64 - 1)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if evicted.rows_affected() > 0 {
            debug!(
                account_id = %account_id,
                evicted = evicted.rows_affected(),
                "Evicted oldest refresh tokens"
            );
        }
        Ok(record)
    }

    async fn replace(
        &self,
        id: &str,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshTokenRecord> {
        let mut tx = self.pool.begin().await?;

        let owner = sqlx::query("SELECT account_id FROM refresh_tokens WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(owner) = owner else {
            tx.rollback().await?;
            return Ok(RefreshTokenRecord::default());
        };
        let account_id: String = owner.try_get("account_id")?;

        // Same lock as `add`, taken before the delete+insert
        lock_account(&mut tx, &account_id).await?;

        // Rotated or evicted while waiting for the lock
        let deleted = sqlx::query("DELETE FROM refresh_tokens WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(RefreshTokenRecord::default());
        }

        let row = sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, account_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, account_id, created_at, expires_at
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&account_id)
        .bind(created_at)
        .bind(expires_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Self::from_row(&row)
    }

    async fn delete(&self, id: &str) -> Result<String> {
        let row = sqlx::query("DELETE FROM refresh_tokens WHERE id = $1 RETURNING id")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(row.try_get("id")?),
            None => Ok(String::new()),
        }
    }

    async fn delete_by_account_id(&self, account_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("DELETE FROM refresh_tokens WHERE account_id = $1 RETURNING id")
            .bind(account_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get("id").map_err(Into::into))
            .collect()
    }
}
