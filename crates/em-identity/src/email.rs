//! Outbound email delivery.
//!
//! `SmtpEmailTransport` relays through an SMTP server with STARTTLS.
//! `LogEmailTransport` is the dev-mode transport: it logs the message and
//! reports success.

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{debug, info};

use crate::shared::error::{IdentityError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send_mail(&self, mail: &Mail) -> Result<()>;
}

/// SMTP connection settings
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    /// Empty disables authentication
    pub username: String,
    pub password: String,
    pub from: String,
}

pub struct SmtpEmailTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailTransport {
    pub fn new(settings: &SmtpSettings) -> Result<Self> {
        let from = settings
            .from
            .parse::<Mailbox>()
            .map_err(|e| IdentityError::internal(format!("Invalid sender address: {}", e)))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .map_err(|e| IdentityError::internal(format!("Invalid SMTP relay: {}", e)))?
            .port(settings.port);

        if !settings.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                settings.username.clone(),
                settings.password.clone(),
            ));
        }

        info!(host = %settings.host, port = settings.port, "SMTP email transport configured");
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl EmailTransport for SmtpEmailTransport {
    async fn send_mail(&self, mail: &Mail) -> Result<()> {
        let to = mail
            .to
            .parse::<Mailbox>()
            .map_err(|e| IdentityError::SendEmailFailed { message: e.to_string() })?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(mail.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body.clone())
            .map_err(|e| IdentityError::SendEmailFailed { message: e.to_string() })?;

        self.transport
            .send(message)
            .await
            .map_err(|e| IdentityError::SendEmailFailed { message: e.to_string() })?;

        debug!(to = %mail.to, subject = %mail.subject, "Email sent");
        Ok(())
    }
}

/// Local dev transport that logs the message instead of sending it
#[derive(Debug, Clone, Default)]
pub struct LogEmailTransport;

#[async_trait]
impl EmailTransport for LogEmailTransport {
    async fn send_mail(&self, mail: &Mail) -> Result<()> {
        info!(
            to = %mail.to,
            subject = %mail.subject,
            body = %mail.body,
            "Email send stub"
        );
        Ok(())
    }
}
