//! RSA key material for token signing.

use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::shared::error::{IdentityError, Result};

const PRIVATE_KEY_ENV: &str = "EMPORIUM_JWT_PRIVATE_KEY";
const PUBLIC_KEY_ENV: &str = "EMPORIUM_JWT_PUBLIC_KEY";
const PERSISTED_KEYS_DIR: &str = ".jwt-keys";

/// PEM-encoded RSA key pair (PKCS#8 private key, SPKI public key)
#[derive(Clone)]
pub struct KeyPair {
    pub private_pem: String,
    pub public_pem: String,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("private_pem", &"<redacted>")
            .field("public_pem", &self.public_pem)
            .finish()
    }
}

impl KeyPair {
    /// Resolve signing keys, in order:
    /// 1. the configured PEM files
    /// 2. `EMPORIUM_JWT_PRIVATE_KEY` / `EMPORIUM_JWT_PUBLIC_KEY`
    /// 3. keys persisted in `.jwt-keys/`
    /// 4. a freshly generated pair, persisted to `.jwt-keys/`
    pub fn load_or_generate(private_key_path: Option<&str>, public_key_path: Option<&str>) -> Result<Self> {
        let private = load_key(private_key_path, PRIVATE_KEY_ENV);
        let public = load_key(public_key_path, PUBLIC_KEY_ENV);
        if let (Some(private_pem), Some(public_pem)) = (private, public) {
            return Ok(Self { private_pem, public_pem });
        }

        let keys_dir = Path::new(PERSISTED_KEYS_DIR);
        if let Some(pair) = Self::load_dir(keys_dir) {
            info!("Loaded persisted RSA keys from {}/", PERSISTED_KEYS_DIR);
            return Ok(pair);
        }

        let pair = Self::generate()?;
        pair.persist(keys_dir);
        Ok(pair)
    }

    /// Generate a 2048-bit pair without persisting it
    pub fn generate() -> Result<Self> {
        use rsa::{
            pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding},
            RsaPrivateKey, RsaPublicKey,
        };

        info!("Generating RSA key pair (2048 bit)");

        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048)
            .map_err(|e| IdentityError::signing(format!("Failed to generate RSA key: {}", e)))?;
        let public_key = RsaPublicKey::from(&private_key);

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| IdentityError::signing(format!("Failed to encode private key: {}", e)))?
            .to_string();
        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| IdentityError::signing(format!("Failed to encode public key: {}", e)))?;

        Ok(Self { private_pem, public_pem })
    }

    /// Read `private.key` and `public.key` from a directory
    pub fn load_dir(dir: &Path) -> Option<Self> {
        let private_pem = fs::read_to_string(dir.join("private.key")).ok()?;
        let public_pem = fs::read_to_string(dir.join("public.key")).ok()?;
        Some(Self { private_pem, public_pem })
    }

    /// Best effort; failures are logged and the in-memory pair is still used
    pub fn persist(&self, dir: &Path) {
        if let Err(e) = fs::create_dir_all(dir) {
            warn!(error = %e, "Could not create key directory");
            return;
        }
        if let Err(e) = fs::write(dir.join("private.key"), &self.private_pem) {
            warn!(error = %e, "Could not persist private key");
        } else if let Err(e) = fs::write(dir.join("public.key"), &self.public_pem) {
            warn!(error = %e, "Could not persist public key");
        } else {
            info!("Persisted RSA keys to {}", dir.display());
        }
    }

    /// Key id for the token header: first 6 bytes of SHA-256 over the public PEM
    pub fn key_id(&self) -> String {
        key_id(&self.public_pem)
    }
}

pub(crate) fn key_id(public_pem: &str) -> String {
    use base64::Engine;
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(public_pem.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&hash[..6])
}

fn load_key(path: Option<&str>, env_var: &str) -> Option<String> {
    if let Some(path) = path.filter(|p| !p.is_empty()) {
        match fs::read_to_string(path) {
            Ok(content) => {
                info!(path, "Loaded JWT key from file");
                return Some(content);
            }
            Err(e) => warn!(path, error = %e, "Could not read JWT key file"),
        }
    }

    std::env::var(env_var)
        .ok()
        .filter(|content| !content.is_empty())
        .inspect(|_| info!(env_var, "Loaded JWT key from env"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persist_and_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        let pair = KeyPair {
            private_pem: "private".to_string(),
            public_pem: "public".to_string(),
        };
        pair.persist(dir.path());

        let loaded = KeyPair::load_dir(dir.path()).unwrap();
        assert_eq!(loaded.private_pem, "private");
        assert_eq!(loaded.public_pem, "public");
    }

    #[test]
    fn test_load_dir_requires_both_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("private.key"), "private").unwrap();
        assert!(KeyPair::load_dir(dir.path()).is_none());
    }

    #[test]
    fn test_key_id_is_stable_and_short() {
        let a = key_id("-----BEGIN PUBLIC KEY-----");
        assert_eq!(a, key_id("-----BEGIN PUBLIC KEY-----"));
        assert_eq!(a.len(), 8);
        assert_ne!(a, key_id("other"));
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let pair = KeyPair {
            private_pem: "secret material".to_string(),
            public_pem: "public".to_string(),
        };
        assert!(!format!("{:?}", pair).contains("secret material"));
    }
}
