//! Shared fixtures for identity integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Duration;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use em_identity::account::InMemoryAccountRepository;
use em_identity::confirmation::InMemoryConfirmationTokenStore;
use em_identity::refresh_token::InMemoryRefreshTokenStore;
use em_identity::{
    Argon2Config, AuthService, AuthServiceDeps, ConfirmationLink, EmailConfirmationService,
    EmailTransport, IdentityError, KeyPair, Mail, ManualClock, NotificationPublisher,
    PasswordHasher, PasswordPolicy, TokenCodec,
};

pub const PASSWORD: &str = "pw123456";

pub fn test_keys() -> &'static KeyPair {
    static KEYS: OnceLock<KeyPair> = OnceLock::new();
    KEYS.get_or_init(|| KeyPair::generate().unwrap())
}

/// Records published notifications; can be switched to fail
#[derive(Default)]
pub struct RecordingPublisher {
    pub account_created: Mutex<Vec<String>>,
    pub email_confirmed: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

impl RecordingPublisher {
    fn check(&self) -> em_identity::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(IdentityError::internal("queue unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationPublisher for RecordingPublisher {
    async fn account_created(&self, email: &str) -> em_identity::Result<()> {
        self.check()?;
        self.account_created.lock().push(email.to_string());
        Ok(())
    }

    async fn email_confirmed(&self, email: &str) -> em_identity::Result<()> {
        self.check()?;
        self.email_confirmed.lock().push(email.to_string());
        Ok(())
    }
}

/// Records outgoing mail; can be switched to fail
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<Mail>>,
    pub fail: AtomicBool,
}

impl RecordingTransport {
    /// Token embedded in the most recent mail to `email`
    pub fn last_token_for(&self, email: &str) -> Option<String> {
        self.sent
            .lock()
            .iter()
            .rev()
            .find(|m| m.to == email)
            .and_then(|m| m.body.split("token=").nth(1))
            .map(|rest| rest.split_whitespace().next().unwrap_or_default().to_string())
    }
}

#[async_trait]
impl EmailTransport for RecordingTransport {
    async fn send_mail(&self, mail: &Mail) -> em_identity::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(IdentityError::SendEmailFailed {
                message: "smtp down".to_string(),
            });
        }
        self.sent.lock().push(mail.clone());
        Ok(())
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub accounts: Arc<InMemoryAccountRepository>,
    pub refresh_tokens: Arc<InMemoryRefreshTokenStore>,
    pub confirmation_store: Arc<InMemoryConfirmationTokenStore>,
    pub codec: Arc<TokenCodec>,
    pub publisher: Arc<RecordingPublisher>,
    pub mail: Arc<RecordingTransport>,
    pub auth: Arc<AuthService>,
    pub confirmations: Arc<EmailConfirmationService>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_publisher(Arc::new(RecordingPublisher::default()))
    }

    /// Build services around a caller-supplied notification publisher
    pub fn with_publisher(publisher: Arc<RecordingPublisher>) -> Self {
        Self::build(publisher.clone(), publisher)
    }

    pub fn build(
        recorder: Arc<RecordingPublisher>,
        publisher: Arc<dyn NotificationPublisher>,
    ) -> Self {
        let clock = Arc::new(ManualClock::starting_now());
        let hasher = Arc::new(
            PasswordHasher::new("test-pepper", PasswordPolicy::default(), Argon2Config::testing())
                .unwrap(),
        );
        let accounts = Arc::new(InMemoryAccountRepository::new(hasher.clone(), clock.clone()));
        let refresh_tokens = Arc::new(InMemoryRefreshTokenStore::new(5));
        let confirmation_store = Arc::new(InMemoryConfirmationTokenStore::new(clock.clone()));
        let codec = Arc::new(
            TokenCodec::new(test_keys(), Duration::minutes(15), clock.clone()).unwrap(),
        );
        let mail = Arc::new(RecordingTransport::default());

        let auth = Arc::new(AuthService::new(
            AuthServiceDeps {
                accounts: accounts.clone(),
                refresh_tokens: refresh_tokens.clone(),
                codec: codec.clone(),
                hasher,
                publisher: publisher.clone(),
                clock: clock.clone(),
            },
            Duration::days(30),
        ));

        let confirmations = Arc::new(EmailConfirmationService::new(
            confirmation_store.clone(),
            mail.clone(),
            publisher,
            ConfirmationLink::Static {
                base_url: "https://shop.example.com/email/confirm".to_string(),
            },
            clock.clone(),
        ));

        Self {
            clock,
            accounts,
            refresh_tokens,
            confirmation_store,
            codec,
            publisher: recorder,
            mail,
            auth,
            confirmations,
        }
    }

    /// Create and activate a user, returning its id
    pub async fn activated_user(&self, email: &str) -> String {
        let account = self.auth.create_user("Test", PASSWORD, email).await.unwrap();
        self.auth.activate_accounts(&[email.to_string()]).await.unwrap();
        account.id
    }

    pub async fn login(&self, email: &str) -> String {
        self.auth.authenticate(email, PASSWORD).await.unwrap()
    }
}
