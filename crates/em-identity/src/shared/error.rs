//! Identity Error Types

use serde::Serialize;
use thiserror::Error;

use em_queue::QueueError;
use crate::token::DecodedRefreshToken;

#[derive(Error, Debug)]
pub enum IdentityError {
    // Validation
    #[error("Invalid email address")]
    InvalidEmail,

    #[error("Password must be at least {min} characters")]
    PasswordTooShort { min: usize },

    #[error("Password must be at most {max} bytes")]
    PasswordTooLong { max: usize },

    // Conflict
    #[error("Email is already in use")]
    EmailIsInUse,

    // Authentication
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is not activated")]
    AccountNotActivated,

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("Invalid access token")]
    InvalidAccessToken,

    #[error("Invalid token type")]
    InvalidTokenType,

    /// Refresh tokens carry their decoded fields so the stale subject can be logged
    #[error("Token expired")]
    TokenExpired { stale: Option<Box<DecodedRefreshToken>> },

    #[error("Token has been revoked")]
    TokenRevoked,

    #[error("Invalid confirmation token")]
    InvalidConfirmationToken,

    #[error("Confirmation token expired")]
    ConfirmationTokenExpired,

    // Authorization
    #[error("Permission denied")]
    PermissionDenied,

    // Not found
    #[error("Account not found")]
    AccountNotFound,

    #[error("Refresh token to replace not found")]
    RefreshTokenToReplaceNotFound,

    // Internal
    #[error("Failed to send account confirmation: {message}")]
    SendAccountConfirmationFailed { message: String },

    #[error("Failed to send email confirmed notification: {message}")]
    SendEmailConfirmedFailed { message: String },

    #[error("Failed to send email: {message}")]
    SendEmailFailed { message: String },

    #[error("Token signing error: {message}")]
    Signing { message: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Broad category of an error, for picking a transport status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Conflict,
    Authentication,
    Authorization,
    NotFound,
    Internal,
}

/// `{code, message}` pair surfaced at the transport boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl IdentityError {
    pub fn token_expired() -> Self {
        Self::TokenExpired { stale: None }
    }

    pub fn signing(message: impl Into<String>) -> Self {
        Self::Signing { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidEmail => "INVALID_EMAIL",
            Self::PasswordTooShort { .. } => "PASSWORD_TOO_SHORT",
            Self::PasswordTooLong { .. } => "PASSWORD_TOO_LONG",
            Self::EmailIsInUse => "EMAIL_IS_IN_USE",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::AccountNotActivated => "ACCOUNT_NOT_ACTIVATED",
            Self::InvalidRefreshToken => "INVALID_REFRESH_TOKEN",
            Self::InvalidAccessToken => "INVALID_ACCESS_TOKEN",
            Self::InvalidTokenType => "INVALID_TOKEN_TYPE",
            Self::TokenExpired { .. } => "TOKEN_EXPIRED",
            Self::TokenRevoked => "TOKEN_REVOKED",
            Self::InvalidConfirmationToken => "INVALID_CONFIRMATION_TOKEN",
            Self::ConfirmationTokenExpired => "CONFIRMATION_TOKEN_EXPIRED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::AccountNotFound => "ACCOUNT_NOT_FOUND",
            Self::RefreshTokenToReplaceNotFound => "REFRESH_TOKEN_TO_REPLACE_NOT_FOUND",
            Self::SendAccountConfirmationFailed { .. } => "SEND_ACCOUNT_CONFIRMATION_FAILED",
            Self::SendEmailConfirmedFailed { .. } => "SEND_EMAIL_CONFIRMED_FAILED",
            Self::SendEmailFailed { .. } => "SEND_EMAIL_FAILED",
            Self::Signing { .. } => "SIGNING_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Queue(_) => "QUEUE_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidEmail
            | Self::PasswordTooShort { .. }
            | Self::PasswordTooLong { .. } => ErrorKind::Validation,

            Self::EmailIsInUse => ErrorKind::Conflict,

            Self::InvalidCredentials
            | Self::AccountNotActivated
            | Self::InvalidRefreshToken
            | Self::InvalidAccessToken
            | Self::InvalidTokenType
            | Self::TokenExpired { .. }
            | Self::TokenRevoked
            | Self::InvalidConfirmationToken
            | Self::ConfirmationTokenExpired => ErrorKind::Authentication,

            Self::PermissionDenied => ErrorKind::Authorization,

            Self::AccountNotFound | Self::RefreshTokenToReplaceNotFound => ErrorKind::NotFound,

            Self::SendAccountConfirmationFailed { .. }
            | Self::SendEmailConfirmedFailed { .. }
            | Self::SendEmailFailed { .. }
            | Self::Signing { .. }
            | Self::Database(_)
            | Self::Queue(_)
            | Self::Json(_)
            | Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Internal failures are reported without their underlying cause
    pub fn detail(&self) -> ErrorDetail {
        let message = match self.kind() {
            ErrorKind::Internal => "Internal server error".to_string(),
            _ => self.to_string(),
        };
        ErrorDetail {
            code: self.code().to_string(),
            message,
        }
    }
}

pub type Result<T> = std::result::Result<T, IdentityError>;
