use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;

use super::{confirmation_token_ttl, ConfirmationTokenStore, EmailConfirmationRecord};
use crate::shared::clock::Clock;
use crate::shared::error::Result;

pub struct PostgresConfirmationTokenStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PostgresConfirmationTokenStore {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    fn from_row(row: &PgRow) -> Result<EmailConfirmationRecord> {
        Ok(EmailConfirmationRecord {
            email: row.try_get("email")?,
            token: row.try_get("token")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

#[async_trait]
impl ConfirmationTokenStore for PostgresConfirmationTokenStore {
    async fn insert_token(&self, email: &str, token: &str) -> Result<EmailConfirmationRecord> {
        let now = self.clock.now();
        let row = sqlx::query(
            r#"
            INSERT INTO email_confirmations (token, email, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING token, email, created_at, expires_at
            "#,
        )
        .bind(token)
        .bind(email)
        .bind(now)
        .bind(now + confirmation_token_ttl())
        .fetch_one(&self.pool)
        .await?;

        Self::from_row(&row)
    }

    async fn find_token_record(&self, token: &str) -> Result<Option<EmailConfirmationRecord>> {
        let row = sqlx::query(
            "SELECT token, email, created_at, expires_at FROM email_confirmations WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_tokens_email(&self, email: &str) -> Result<Vec<EmailConfirmationRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT token, email, created_at, expires_at
            FROM email_confirmations
            WHERE email = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(email)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::from_row).collect()
    }
}
