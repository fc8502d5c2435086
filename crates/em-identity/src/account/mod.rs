//! Accounts and the repository that stores them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::shared::error::Result;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryAccountRepository;
pub use postgres::PostgresAccountRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    User,
    Seller,
    Admin,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Seller => "seller",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "seller" => Ok(Self::Seller),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown account type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub account_type: AccountType,
    /// Set once by activation, never cleared
    pub activated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn is_activated(&self) -> bool {
        self.activated_at.is_some()
    }
}

/// Fields supplied when creating an account; the repository assigns id and timestamps
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub account_type: AccountType,
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Fails with `EmailIsInUse` when the email is taken
    async fn create_account(&self, account: NewAccount) -> Result<Account>;

    async fn find_account(&self, id: &str) -> Result<Option<Account>>;

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>>;

    /// Returns the account when the password matches, `None` on mismatch or unknown email
    async fn check_account_credentials(&self, email: &str, password: &str) -> Result<Option<Account>>;

    /// Sets `activated_at` on accounts that have none. Returns how many changed.
    async fn activate_accounts_by_email(&self, emails: &[String], at: DateTime<Utc>) -> Result<u64>;
}
