use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use super::keys::{key_id, KeyPair};
use super::{DecodedAccessToken, DecodedRefreshToken, REFRESH_ID_PREFIX};
use crate::account::AccountType;
use crate::shared::clock::Clock;
use crate::shared::error::{IdentityError, Result};

const TOKEN_TYPE_REFRESH: &str = "refresh";
const TOKEN_TYPE_ACCESS: &str = "access";

/// Claims shared by both token kinds
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenClaims {
    /// `rt_<record id>`, refresh tokens only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_id: Option<String>,

    subject_id: String,

    /// Account type, access tokens only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subject_type: Option<String>,

    token_type: String,

    /// Expiration time (Unix timestamp)
    exp: i64,

    /// Issued at (Unix timestamp)
    iat: i64,
}

/// Signs and verifies refresh and access tokens (RS256)
pub struct TokenCodec {
    /// Absent for verification-only codecs
    encoding_key: Option<EncodingKey>,
    decoding_key: DecodingKey,
    key_id: String,
    access_token_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    pub fn new(keys: &KeyPair, access_token_ttl: Duration, clock: Arc<dyn Clock>) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(keys.private_pem.as_bytes())
            .map_err(|e| IdentityError::signing(format!("Invalid RSA private key: {}", e)))?;

        let mut codec = Self::verifier(&keys.public_pem, clock)?;
        codec.encoding_key = Some(encoding_key);
        codec.access_token_ttl = access_token_ttl;

        info!(key_id = %codec.key_id, "Token codec initialized with RS256");
        Ok(codec)
    }

    /// Codec that can only verify tokens
    pub fn verifier(public_pem: &str, clock: Arc<dyn Clock>) -> Result<Self> {
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| IdentityError::signing(format!("Invalid RSA public key: {}", e)))?;

        Ok(Self {
            encoding_key: None,
            decoding_key,
            key_id: key_id(public_pem),
            access_token_ttl: Duration::zero(),
            clock,
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn can_sign(&self) -> bool {
        self.encoding_key.is_some()
    }

    pub fn encode_refresh(&self, id: &str, subject_id: &str, expires_at: DateTime<Utc>) -> Result<String> {
        let claims = TokenClaims {
            token_id: Some(format!("{}{}", REFRESH_ID_PREFIX, id)),
            subject_id: subject_id.to_string(),
            subject_type: None,
            token_type: TOKEN_TYPE_REFRESH.to_string(),
            exp: expires_at.timestamp(),
            iat: self.clock.now().timestamp(),
        };
        self.sign(&claims)
    }

    pub fn encode_access(&self, subject_id: &str, subject_type: AccountType) -> Result<String> {
        let now = self.clock.now();
        let claims = TokenClaims {
            token_id: None,
            subject_id: subject_id.to_string(),
            subject_type: Some(subject_type.as_str().to_string()),
            token_type: TOKEN_TYPE_ACCESS.to_string(),
            exp: (now + self.access_token_ttl).timestamp(),
            iat: now.timestamp(),
        };
        self.sign(&claims)
    }

    /// Expired tokens fail with `TokenExpired` carrying the decoded fields
    pub fn decode_refresh(&self, token: &str) -> Result<DecodedRefreshToken> {
        let claims = self
            .verify(token)
            .ok_or(IdentityError::InvalidRefreshToken)?;

        if claims.token_type != TOKEN_TYPE_REFRESH {
            return Err(IdentityError::InvalidTokenType);
        }

        let id = claims
            .token_id
            .as_deref()
            .and_then(|t| t.strip_prefix(REFRESH_ID_PREFIX))
            .filter(|id| !id.is_empty())
            .ok_or(IdentityError::InvalidRefreshToken)?;

        let decoded = DecodedRefreshToken {
            id: id.to_string(),
            subject_id: claims.subject_id,
            expires_at: timestamp(claims.exp).ok_or(IdentityError::InvalidRefreshToken)?,
        };

        if self.is_expired(claims.exp) {
            debug!(subject_id = %decoded.subject_id, "Refresh token expired");
            return Err(IdentityError::TokenExpired {
                stale: Some(Box::new(decoded)),
            });
        }

        Ok(decoded)
    }

    pub fn decode_access(&self, token: &str) -> Result<DecodedAccessToken> {
        let claims = self
            .verify(token)
            .ok_or(IdentityError::InvalidAccessToken)?;

        if claims.token_type != TOKEN_TYPE_ACCESS {
            return Err(IdentityError::InvalidTokenType);
        }

        let subject_type = claims
            .subject_type
            .as_deref()
            .and_then(|t| t.parse::<AccountType>().ok())
            .ok_or(IdentityError::InvalidAccessToken)?;
        let expires_at = timestamp(claims.exp).ok_or(IdentityError::InvalidAccessToken)?;

        if self.is_expired(claims.exp) {
            return Err(IdentityError::token_expired());
        }

        Ok(DecodedAccessToken {
            subject_id: claims.subject_id,
            subject_type,
            expires_at,
        })
    }

    fn sign(&self, claims: &TokenClaims) -> Result<String> {
        let encoding_key = self
            .encoding_key
            .as_ref()
            .ok_or_else(|| IdentityError::signing("Codec holds no signing key"))?;

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.key_id.clone());

        encode(&header, claims, encoding_key)
            .map_err(|e| IdentityError::signing(format!("Failed to encode JWT: {}", e)))
    }

    /// Signature and structure only; expiry is checked against the injected clock
    fn verify(&self, token: &str) -> Option<TokenClaims> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        match decode::<TokenClaims>(token, &self.decoding_key, &validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                debug!(error = %e, "Token verification failed");
                None
            }
        }
    }

    /// No leeway: a token is expired from its `exp` second onwards
    fn is_expired(&self, exp: i64) -> bool {
        self.clock.now().timestamp() >= exp
    }
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::clock::ManualClock;
    use std::sync::OnceLock;

    fn test_keys() -> &'static KeyPair {
        static KEYS: OnceLock<KeyPair> = OnceLock::new();
        KEYS.get_or_init(|| KeyPair::generate().unwrap())
    }

    fn codec() -> (TokenCodec, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let codec = TokenCodec::new(test_keys(), Duration::minutes(15), clock.clone()).unwrap();
        (codec, clock)
    }

    #[test]
    fn test_refresh_token_carries_record_id() {
        let (codec, clock) = codec();
        let expires_at = clock.now() + Duration::days(30);

        let token = codec.encode_refresh("abc", "acct-1", expires_at).unwrap();
        let decoded = codec.decode_refresh(&token).unwrap();

        assert_eq!(decoded.id, "abc");
        assert_eq!(decoded.subject_id, "acct-1");
        assert_eq!(decoded.expires_at, expires_at);
    }

    #[test]
    fn test_access_token_carries_subject_type() {
        let (codec, clock) = codec();
        let token = codec.encode_access("acct-1", AccountType::Admin).unwrap();
        let decoded = codec.decode_access(&token).unwrap();

        assert_eq!(decoded.subject_id, "acct-1");
        assert_eq!(decoded.subject_type, AccountType::Admin);
        assert_eq!(decoded.expires_at, clock.now() + Duration::minutes(15));
    }

    #[test]
    fn test_header_carries_key_id() {
        let (codec, clock) = codec();
        let token = codec.encode_refresh("abc", "acct-1", clock.now() + Duration::days(1)).unwrap();
        let header = jsonwebtoken::decode_header(&token).unwrap();
        assert_eq!(header.kid.as_deref(), Some(codec.key_id()));
        assert_eq!(header.alg, Algorithm::RS256);
    }

    #[test]
    fn test_wrong_kind_is_invalid_token_type() {
        let (codec, clock) = codec();
        let refresh = codec.encode_refresh("abc", "acct-1", clock.now() + Duration::days(1)).unwrap();
        let access = codec.encode_access("acct-1", AccountType::User).unwrap();

        assert!(matches!(codec.decode_access(&refresh), Err(IdentityError::InvalidTokenType)));
        assert!(matches!(codec.decode_refresh(&access), Err(IdentityError::InvalidTokenType)));
    }

    #[test]
    fn test_expiry_boundary_has_no_leeway() {
        let (codec, clock) = codec();
        let expires_at = clock.now() + Duration::seconds(60);
        let token = codec.encode_refresh("abc", "acct-1", expires_at).unwrap();

        clock.advance(Duration::seconds(59));
        assert!(codec.decode_refresh(&token).is_ok());

        clock.advance(Duration::seconds(1));
        match codec.decode_refresh(&token) {
            Err(IdentityError::TokenExpired { stale: Some(stale) }) => {
                assert_eq!(stale.id, "abc");
                assert_eq!(stale.subject_id, "acct-1");
            }
            other => panic!("expected TokenExpired with stale claims, got {:?}", other),
        }
    }

    #[test]
    fn test_expired_access_token() {
        let (codec, clock) = codec();
        let token = codec.encode_access("acct-1", AccountType::User).unwrap();
        clock.advance(Duration::minutes(15));

        assert!(matches!(
            codec.decode_access(&token),
            Err(IdentityError::TokenExpired { stale: None })
        ));
    }

    #[test]
    fn test_tampered_and_garbage_tokens() {
        let (codec, clock) = codec();
        let expires_at = clock.now() + Duration::days(1);
        let token = codec.encode_refresh("abc", "acct-1", expires_at).unwrap();
        let other = codec.encode_refresh("abc", "acct-2", expires_at).unwrap();

        // acct-2's claims under acct-1's signature
        let parts: Vec<&str> = token.split('.').collect();
        let other_parts: Vec<&str> = other.split('.').collect();
        let tampered = format!("{}.{}.{}", parts[0], other_parts[1], parts[2]);

        assert!(matches!(codec.decode_refresh(&tampered), Err(IdentityError::InvalidRefreshToken)));
        assert!(matches!(codec.decode_refresh("garbage"), Err(IdentityError::InvalidRefreshToken)));
        assert!(matches!(codec.decode_access("garbage"), Err(IdentityError::InvalidAccessToken)));
    }

    #[test]
    fn test_token_from_other_key_is_rejected() {
        let (codec, clock) = codec();
        let other = TokenCodec::new(
            &KeyPair::generate().unwrap(),
            Duration::minutes(15),
            clock.clone(),
        )
        .unwrap();
        let token = other.encode_refresh("abc", "acct-1", clock.now() + Duration::days(1)).unwrap();

        assert!(matches!(codec.decode_refresh(&token), Err(IdentityError::InvalidRefreshToken)));
    }

    #[test]
    fn test_verifier_cannot_sign() {
        let (codec, clock) = codec();
        let verifier = TokenCodec::verifier(&test_keys().public_pem, clock.clone()).unwrap();
        assert!(!verifier.can_sign());

        let token = codec.encode_access("acct-1", AccountType::Seller).unwrap();
        assert_eq!(verifier.decode_access(&token).unwrap().subject_type, AccountType::Seller);

        assert!(matches!(
            verifier.encode_access("acct-1", AccountType::User),
            Err(IdentityError::Signing { .. })
        ));
    }
}
