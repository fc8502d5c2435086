use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::{Account, AccountRepository, NewAccount};
use crate::password::PasswordHasher;
use crate::shared::clock::Clock;
use crate::shared::error::{IdentityError, Result};

#[derive(Default)]
struct Accounts {
    by_id: HashMap<String, Account>,
    id_by_email: HashMap<String, String>,
}

/// Account repository held in process memory (dev mode and tests)
pub struct InMemoryAccountRepository {
    accounts: RwLock<Accounts>,
    hasher: Arc<PasswordHasher>,
    clock: Arc<dyn Clock>,
}

impl InMemoryAccountRepository {
    pub fn new(hasher: Arc<PasswordHasher>, clock: Arc<dyn Clock>) -> Self {
        Self {
            accounts: RwLock::new(Accounts::default()),
            hasher,
            clock,
        }
    }
}

#[async_trait]
impl AccountRepository for InMemoryAccountRepository {
    async fn create_account(&self, account: NewAccount) -> Result<Account> {
        let mut accounts = self.accounts.write();
        if accounts.id_by_email.contains_key(&account.email) {
            return Err(IdentityError::EmailIsInUse);
        }

        let created = Account {
            id: uuid::Uuid::new_v4().to_string(),
            name: account.name,
            email: account.email,
            password_hash: account.password_hash,
            account_type: account.account_type,
            activated_at: None,
            created_at: self.clock.now(),
        };
        accounts.id_by_email.insert(created.email.clone(), created.id.clone());
        accounts.by_id.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn find_account(&self, id: &str) -> Result<Option<Account>> {
        Ok(self.accounts.read().by_id.get(id).cloned())
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let accounts = self.accounts.read();
        Ok(accounts
            .id_by_email
            .get(email)
            .and_then(|id| accounts.by_id.get(id))
            .cloned())
    }

    async fn check_account_credentials(&self, email: &str, password: &str) -> Result<Option<Account>> {
        let account = self.find_account_by_email(email).await?;
        Ok(account.filter(|a| self.hasher.check(password, &a.password_hash)))
    }

    async fn activate_accounts_by_email(&self, emails: &[String], at: DateTime<Utc>) -> Result<u64> {
        let mut accounts = self.accounts.write();
        let Accounts { by_id, id_by_email } = &mut *accounts;

        let mut activated = 0;
        for email in emails {
            let Some(account) = id_by_email.get(email).and_then(|id| by_id.get_mut(id)) else {
                continue;
            };
            if account.activated_at.is_none() {
                account.activated_at = Some(at);
                activated += 1;
            }
        }
        Ok(activated)
    }
}
