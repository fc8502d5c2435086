use chrono::Duration;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

use crate::account::{Account, AccountRepository, AccountType, NewAccount};
use crate::notification::NotificationPublisher;
use crate::password::PasswordHasher;
use crate::refresh_token::RefreshTokenStore;
use crate::shared::clock::Clock;
use crate::shared::error::{IdentityError, Result};
use crate::token::{DecodedRefreshToken, TokenCodec};

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static email pattern"))
}

pub fn is_valid_email(email: &str) -> bool {
    email_pattern().is_match(email)
}

/// Collaborators of the auth service
pub struct AuthServiceDeps {
    pub accounts: Arc<dyn AccountRepository>,
    pub refresh_tokens: Arc<dyn RefreshTokenStore>,
    pub codec: Arc<TokenCodec>,
    pub hasher: Arc<PasswordHasher>,
    pub publisher: Arc<dyn NotificationPublisher>,
    pub clock: Arc<dyn Clock>,
}

/// Account creation, authentication and refresh-token lifecycle
pub struct AuthService {
    accounts: Arc<dyn AccountRepository>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    codec: Arc<TokenCodec>,
    hasher: Arc<PasswordHasher>,
    publisher: Arc<dyn NotificationPublisher>,
    clock: Arc<dyn Clock>,
    refresh_token_ttl: Duration,
}

impl AuthService {
    pub fn new(deps: AuthServiceDeps, refresh_token_ttl: Duration) -> Self {
        Self {
            accounts: deps.accounts,
            refresh_tokens: deps.refresh_tokens,
            codec: deps.codec,
            hasher: deps.hasher,
            publisher: deps.publisher,
            clock: deps.clock,
            refresh_token_ttl,
        }
    }

    pub async fn create_user(&self, name: &str, password: &str, email: &str) -> Result<Account> {
        self.create_account(name, password, email, AccountType::User).await
    }

    pub async fn create_admin(&self, name: &str, password: &str, email: &str) -> Result<Account> {
        self.create_account(name, password, email, AccountType::Admin).await
    }

    /// Sellers can only be created by an admin
    pub async fn create_seller(
        &self,
        access_token: &str,
        name: &str,
        password: &str,
        email: &str,
    ) -> Result<Account> {
        let caller = self.codec.decode_access(access_token)?;
        if caller.subject_type != AccountType::Admin {
            warn!(subject_id = %caller.subject_id, "Non-admin attempted to create a seller");
            return Err(IdentityError::PermissionDenied);
        }

        self.create_account(name, password, email, AccountType::Seller).await
    }

    /// The account row is committed before the notification is published; a
    /// publish failure is reported but does not roll the account back.
    async fn create_account(
        &self,
        name: &str,
        password: &str,
        email: &str,
        account_type: AccountType,
    ) -> Result<Account> {
        if !is_valid_email(email) {
            return Err(IdentityError::InvalidEmail);
        }
        let password_hash = self.hasher.hash(password)?;

        let account = self
            .accounts
            .create_account(NewAccount {
                name: name.to_string(),
                email: email.to_string(),
                password_hash,
                account_type,
            })
            .await?;

        self.publisher
            .account_created(&account.email)
            .await
            .map_err(|e| {
                warn!(
                    account_id = %account.id,
                    error = %e,
                    "Account created but confirmation notification failed"
                );
                IdentityError::SendAccountConfirmationFailed { message: e.to_string() }
            })?;

        info!(
            account_id = %account.id,
            account_type = %account.account_type,
            "Account created"
        );
        Ok(account)
    }

    /// Idempotent: already-active accounts keep their activation time
    pub async fn activate_accounts(&self, emails: &[String]) -> Result<u64> {
        if emails.is_empty() {
            return Ok(0);
        }

        let activated = self
            .accounts
            .activate_accounts_by_email(emails, self.clock.now())
            .await?;

        info!(requested = emails.len(), activated, "Accounts activated");
        Ok(activated)
    }

    /// Verify credentials and issue a refresh token
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<String> {
        let account = self
            .accounts
            .check_account_credentials(email, password)
            .await?
            .ok_or(IdentityError::InvalidCredentials)?;

        if !account.is_activated() {
            return Err(IdentityError::AccountNotActivated);
        }

        let now = self.clock.now();
        let record = self
            .refresh_tokens
            .add(&account.id, now, now + self.refresh_token_ttl)
            .await?;

        debug!(account_id = %account.id, "Refresh token issued");
        self.codec.encode_refresh(&record.id, &account.id, record.expires_at)
    }

    /// Rotate a refresh token; the old one stops working
    pub async fn replace_refresh_token(&self, refresh_token: &str) -> Result<String> {
        let decoded = self.decode_refresh(refresh_token)?;

        let now = self.clock.now();
        let record = self
            .refresh_tokens
            .replace(&decoded.id, now, now + self.refresh_token_ttl)
            .await?;

        if record.is_empty() {
            return Err(IdentityError::RefreshTokenToReplaceNotFound);
        }

        self.codec.encode_refresh(&record.id, &record.account_id, record.expires_at)
    }

    /// Mint an access token for a refresh token that is still live in the store
    pub async fn create_access_token(&self, refresh_token: &str) -> Result<String> {
        let decoded = self.decode_refresh(refresh_token)?;
        self.ensure_live(&decoded).await?;

        let account = self
            .accounts
            .find_account(&decoded.subject_id)
            .await?
            .ok_or(IdentityError::AccountNotFound)?;

        self.codec.encode_access(&account.id, account.account_type)
    }

    /// Revoke one refresh token. Expired tokens are accepted so a stale
    /// session can still be cleared. Returns whether a record was removed.
    pub async fn logout(&self, refresh_token: &str) -> Result<bool> {
        let decoded = match self.codec.decode_refresh(refresh_token) {
            Ok(decoded) => decoded,
            Err(IdentityError::TokenExpired { stale: Some(stale) }) => *stale,
            Err(e) => return Err(e),
        };

        let deleted = self.refresh_tokens.delete(&decoded.id).await?;
        debug!(account_id = %decoded.subject_id, removed = !deleted.is_empty(), "Logout");
        Ok(!deleted.is_empty())
    }

    /// Revoke every refresh token of the token's account
    pub async fn logout_everywhere(&self, refresh_token: &str) -> Result<usize> {
        let decoded = self.decode_refresh(refresh_token)?;
        self.ensure_live(&decoded).await?;

        let deleted = self
            .refresh_tokens
            .delete_by_account_id(&decoded.subject_id)
            .await?;

        info!(account_id = %decoded.subject_id, revoked = deleted.len(), "Logged out everywhere");
        Ok(deleted.len())
    }

    fn decode_refresh(&self, refresh_token: &str) -> Result<DecodedRefreshToken> {
        self.codec.decode_refresh(refresh_token).inspect_err(|e| {
            if let IdentityError::TokenExpired { stale: Some(stale) } = e {
                debug!(account_id = %stale.subject_id, "Expired refresh token presented");
            }
        })
    }

    /// Signature validity is not enough: the record must still be in the store
    async fn ensure_live(&self, decoded: &DecodedRefreshToken) -> Result<()> {
        let live = self.refresh_tokens.list(&decoded.subject_id).await?;
        if live.iter().any(|record| record.id == decoded.id) {
            Ok(())
        } else {
            debug!(account_id = %decoded.subject_id, "Revoked refresh token presented");
            Err(IdentityError::TokenRevoked)
        }
    }
}
