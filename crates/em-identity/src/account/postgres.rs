use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;

use super::{Account, AccountRepository, AccountType, NewAccount};
use crate::password::PasswordHasher;
use crate::shared::error::{IdentityError, Result};

const ACCOUNT_COLUMNS: &str =
    "id, name, email, password_hash, account_type, activated_at, created_at";

pub struct PostgresAccountRepository {
    pool: PgPool,
    hasher: Arc<PasswordHasher>,
}

impl PostgresAccountRepository {
    pub fn new(pool: PgPool, hasher: Arc<PasswordHasher>) -> Self {
        Self { pool, hasher }
    }

    fn from_row(row: &PgRow) -> Result<Account> {
        let account_type: String = row.try_get("account_type")?;
        Ok(Account {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            account_type: account_type
                .parse::<AccountType>()
                .map_err(IdentityError::internal)?,
            activated_at: row.try_get("activated_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl AccountRepository for PostgresAccountRepository {
    async fn create_account(&self, account: NewAccount) -> Result<Account> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO accounts (id, name, email, password_hash, account_type, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&account.name)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(account.account_type.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => IdentityError::EmailIsInUse,
            _ => IdentityError::Database(e),
        })?;

        Self::from_row(&row)
    }

    async fn find_account(&self, id: &str) -> Result<Option<Account>> {
        let row = sqlx::query(&format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let row = sqlx::query(&format!("SELECT {} FROM accounts WHERE email = $1", ACCOUNT_COLUMNS))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn check_account_credentials(&self, email: &str, password: &str) -> Result<Option<Account>> {
        let account = self.find_account_by_email(email).await?;
        Ok(account.filter(|a| self.hasher.check(password, &a.password_hash)))
    }

    async fn activate_accounts_by_email(&self, emails: &[String], at: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET activated_at = $1
            WHERE email = ANY($2) AND activated_at IS NULL
            "#,
        )
        .bind(at)
        .bind(emails)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
