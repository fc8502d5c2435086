//! Password Hashing
//!
//! Argon2id over the password concatenated with a server-side pepper.
//! Hashes are stored in PHC string format, so parameters and salt travel
//! with the hash.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, SaltString},
    Algorithm, Argon2, Params, PasswordHasher as _, PasswordVerifier as _, Version,
};
use tracing::{debug, warn};

use crate::shared::error::{IdentityError, Result};

/// Hard upper bound in bytes, shared with bcrypt-compatible stores
pub const MAX_PASSWORD_BYTES: usize = 72;

/// Password length policy
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    /// Minimum length in characters
    pub min_length: usize,
    /// Maximum length in bytes
    pub max_length: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            max_length: MAX_PASSWORD_BYTES,
        }
    }
}

impl PasswordPolicy {
    pub fn validate(&self, password: &str) -> Result<()> {
        let max = self.max_length.min(MAX_PASSWORD_BYTES);
        if password.len() > max {
            return Err(IdentityError::PasswordTooLong { max });
        }
        if password.chars().count() < self.min_length {
            return Err(IdentityError::PasswordTooShort { min: self.min_length });
        }
        Ok(())
    }
}

/// Argon2id configuration
#[derive(Debug, Clone)]
pub struct Argon2Config {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub memory_cost: u32,
    pub time_cost: u32,
    pub parallelism: u32,
    pub output_len: usize,
}

impl Default for Argon2Config {
    fn default() -> Self {
        Self {
            memory_cost: 65536,
            time_cost: 3,
            parallelism: 4,
            output_len: 32,
        }
    }
}

impl Argon2Config {
    /// Low memory config for testing (faster but less secure)
    pub fn testing() -> Self {
        Self {
            memory_cost: 4096,
            time_cost: 1,
            parallelism: 1,
            output_len: 32,
        }
    }

    fn to_params(&self) -> Result<Params> {
        Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            Some(self.output_len),
        )
        .map_err(|e| IdentityError::internal(format!("Invalid Argon2 params: {}", e)))
    }
}

pub struct PasswordHasher {
    argon2: Argon2<'static>,
    pepper: String,
    policy: PasswordPolicy,
}

impl PasswordHasher {
    pub fn new(pepper: impl Into<String>, policy: PasswordPolicy, config: Argon2Config) -> Result<Self> {
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, config.to_params()?);
        Ok(Self {
            argon2,
            pepper: pepper.into(),
            policy,
        })
    }

    pub fn policy(&self) -> &PasswordPolicy {
        &self.policy
    }

    fn peppered(&self, password: &str) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(password.len() + self.pepper.len());
        bytes.extend_from_slice(password.as_bytes());
        bytes.extend_from_slice(self.pepper.as_bytes());
        bytes
    }

    /// Validate against the policy, then hash
    pub fn hash(&self, password: &str) -> Result<String> {
        self.policy.validate(password)?;

        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(&self.peppered(password), &salt)
            .map_err(|e| IdentityError::internal(format!("Failed to hash password: {}", e)))?;

        debug!("Password hashed successfully");
        Ok(hash.to_string())
    }

    /// `false` on mismatch and on a stored hash that cannot be parsed
    pub fn check(&self, password: &str, hash: &str) -> bool {
        let parsed = match PasswordHash::new(hash) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Stored password hash is unparseable");
                return false;
            }
        };

        match self.argon2.verify_password(&self.peppered(password), &parsed) {
            Ok(()) => true,
            Err(argon2::password_hash::Error::Password) => false,
            Err(e) => {
                warn!(error = %e, "Password verification error");
                false
            }
        }
    }
}
