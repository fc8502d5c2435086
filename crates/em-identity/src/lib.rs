//! Emporium Identity
//!
//! Sessions and credentials for the account platform:
//! - RS256 refresh and access tokens
//! - Argon2id password hashing
//! - Bounded per-account refresh token retention with revocation
//! - Email confirmation and the queue-driven activation pipeline

pub mod account;
pub mod auth;
pub mod confirmation;
pub mod consumer;
pub mod email;
pub mod notification;
pub mod password;
pub mod refresh_token;
pub mod schema;
pub mod shared;
pub mod token;

pub use account::{Account, AccountRepository, AccountType, NewAccount};
pub use auth::{AuthService, AuthServiceDeps};
pub use confirmation::{ConfirmationLink, ConfirmationTokenStore, EmailConfirmationRecord, EmailConfirmationService};
pub use consumer::{BatchConsumer, BatchHandler, ConsumerError, ConsumerSettings};
pub use email::{EmailTransport, Mail};
pub use notification::{NotificationPublisher, QueueNotificationPublisher};
pub use password::{Argon2Config, PasswordHasher, PasswordPolicy};
pub use refresh_token::{RefreshTokenRecord, RefreshTokenStore};
pub use shared::clock::{Clock, ManualClock, SystemClock};
pub use shared::error::{ErrorDetail, ErrorKind, IdentityError, Result};
pub use token::{DecodedAccessToken, DecodedRefreshToken, KeyPair, TokenCodec};
