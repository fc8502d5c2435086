//! Refresh and access tokens.

use chrono::{DateTime, Utc};

use crate::account::AccountType;

pub mod codec;
pub mod keys;

pub use codec::TokenCodec;
pub use keys::KeyPair;

/// Prefix marking a refresh token's record id
pub const REFRESH_ID_PREFIX: &str = "rt_";

/// Verified refresh token fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRefreshToken {
    /// Refresh token record id, without prefix
    pub id: String,
    pub subject_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Verified access token fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAccessToken {
    pub subject_id: String,
    pub subject_type: AccountType,
    pub expires_at: DateTime<Utc>,
}
