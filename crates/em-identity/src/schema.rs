//! PostgreSQL schema for accounts, refresh tokens and confirmation records.

use sqlx::PgPool;
use tracing::info;

use crate::shared::error::Result;

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        account_type TEXT NOT NULL,
        activated_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS refresh_tokens (
        id TEXT PRIMARY KEY,
        account_id TEXT NOT NULL REFERENCES accounts (id),
        created_at TIMESTAMPTZ NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL,
        issued_seq BIGSERIAL NOT NULL
    )
    "#,
    "ALTER TABLE refresh_tokens ADD COLUMN IF NOT EXISTS issued_seq BIGSERIAL NOT NULL",
    "DROP INDEX IF EXISTS idx_refresh_tokens_account",
    r#"
    CREATE INDEX IF NOT EXISTS idx_refresh_tokens_account_issued
    ON refresh_tokens (account_id, created_at DESC, issued_seq DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS email_confirmations (
        token TEXT PRIMARY KEY,
        email TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_email_confirmations_email
    ON email_confirmations (email, created_at DESC)
    "#,
];

/// Create tables and indexes if they do not exist
pub async fn init_schema(pool: &PgPool) -> Result<()> {
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    info!("Identity schema initialized");
    Ok(())
}
