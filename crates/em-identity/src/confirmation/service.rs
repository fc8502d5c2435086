use base64::Engine;
use rand::RngCore;
use std::sync::Arc;
use tracing::{info, warn};

use super::ConfirmationTokenStore;
use crate::email::{EmailTransport, Mail};
use crate::notification::NotificationPublisher;
use crate::shared::clock::Clock;
use crate::shared::error::{IdentityError, Result};

const TOKEN_BYTES: usize = 32;
const CONFIRMATION_SUBJECT: &str = "Confirm your email address";

/// Where confirmation links point
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationLink {
    /// Fixed base URL; the request host is ignored
    Static { base_url: String },
    /// Built from the host the request arrived on. Only direct `send`
    /// callers supply one; the account-created consumer always falls back.
    FromRequest {
        scheme: String,
        path: String,
        fallback_host: String,
    },
}

impl ConfirmationLink {
    pub fn url(&self, request_host: Option<&str>, token: &str) -> String {
        let base = match self {
            Self::Static { base_url } => base_url.clone(),
            Self::FromRequest {
                scheme,
                path,
                fallback_host,
            } => {
                let host = request_host
                    .filter(|h| !h.is_empty())
                    .unwrap_or(fallback_host.as_str());
                format!("{}://{}{}", scheme, host, path)
            }
        };
        let separator = if base.contains('?') { '&' } else { '?' };
        format!("{}{}token={}", base, separator, token)
    }
}

pub struct EmailConfirmationService {
    store: Arc<dyn ConfirmationTokenStore>,
    transport: Arc<dyn EmailTransport>,
    publisher: Arc<dyn NotificationPublisher>,
    link: ConfirmationLink,
    clock: Arc<dyn Clock>,
}

impl EmailConfirmationService {
    pub fn new(
        store: Arc<dyn ConfirmationTokenStore>,
        transport: Arc<dyn EmailTransport>,
        publisher: Arc<dyn NotificationPublisher>,
        link: ConfirmationLink,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            transport,
            publisher,
            link,
            clock,
        }
    }

    /// Issue a fresh confirmation token for `email` and mail the link
    pub async fn send(&self, email: &str, request_host: Option<&str>) -> Result<()> {
        let token = generate_token();
        self.store.insert_token(email, &token).await?;

        let url = self.link.url(request_host, &token);
        let mail = Mail {
            to: email.to_string(),
            subject: CONFIRMATION_SUBJECT.to_string(),
            body: format!(
                "Welcome to Emporium!\n\n\
                 Please confirm your email address by opening the link below.\n\
                 The link expires in 20 minutes.\n\n{}\n",
                url
            ),
        };
        self.transport.send_mail(&mail).await?;

        info!(email = %email, "Confirmation email sent");
        Ok(())
    }

    /// Check a confirmation token and publish the email-confirmed notification.
    /// Activation happens downstream in the email-confirmed consumer.
    pub async fn confirm(&self, token: &str) -> Result<()> {
        let record = self
            .store
            .find_token_record(token)
            .await?
            .ok_or(IdentityError::InvalidConfirmationToken)?;

        if record.is_expired_at(self.clock.now()) {
            return Err(IdentityError::ConfirmationTokenExpired);
        }

        self.publisher
            .email_confirmed(&record.email)
            .await
            .map_err(|e| {
                warn!(email = %record.email, error = %e, "Failed to publish email confirmed");
                IdentityError::SendEmailConfirmedFailed { message: e.to_string() }
            })?;

        info!(email = %record.email, "Email confirmed");
        Ok(())
    }
}

/// 32 random bytes, base64url without padding
fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
