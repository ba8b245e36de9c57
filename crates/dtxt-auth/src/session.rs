//! Session tokens: HS256 JWTs carrying the derived key
//!
//! The server keeps no session table. Everything a request needs to reach
//! the DEK travels in the signed `token` cookie.

use chrono::{DateTime, Duration, Utc};
use dtxt_core::{CryptoResult, DtxtError, DtxtResult, UserId};
use dtxt_crypto::Key32;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub user_id: UserId,
    pub name: String,
    /// Derived key, standard base64
    pub derived_key: String,
    /// Unix seconds
    pub exp: i64,
}

impl std::fmt::Debug for SessionClaims {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClaims")
            .field("user_id", &self.user_id)
            .field("name", &self.name)
            .field("derived_key", &"[REDACTED]")
            .field("exp", &self.exp)
            .finish()
    }
}

impl SessionClaims {
    pub fn derived_key(&self) -> CryptoResult<Key32> {
        Key32::from_std_b64(&self.derived_key)
    }
}

pub struct SessionSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    lifetime: Duration,
}

impl SessionSigner {
    pub fn new(secret: &[u8], lifetime_days: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            lifetime: Duration::days(lifetime_days),
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Issue a token valid for the configured lifetime. Returns the token and
    /// its expiry, which the cookie reuses.
    pub fn issue(
        &self,
        user_id: UserId,
        username: &str,
        derived: &Key32,
    ) -> DtxtResult<(String, DateTime<Utc>)> {
        let expires = Utc::now() + self.lifetime;
        let claims = SessionClaims {
            user_id,
            name: username.to_string(),
            derived_key: derived.to_std_b64(),
            exp: expires.timestamp(),
        };
        Ok((self.sign(&claims)?, expires))
    }

    pub fn sign(&self, claims: &SessionClaims) -> DtxtResult<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| DtxtError::Other(anyhow::anyhow!("session token encode failed: {e}")))
    }

    /// Signature, algorithm and expiry are all checked; any failure is
    /// `Unauthorized`.
    pub fn validate(&self, token: &str) -> DtxtResult<SessionClaims> {
        decode::<SessionClaims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| DtxtError::unauthorized(format!("session token rejected: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> SessionSigner {
        SessionSigner::new(b"test-secret", 30)
    }

    #[test]
    fn test_issue_and_validate() {
        let key = Key32::generate();
        let (token, expires) = signer().issue(7, "alice", &key).unwrap();

        let claims = signer().validate(&token).unwrap();
        assert_eq!(claims.user_id, 7);
        assert_eq!(claims.name, "alice");
        assert_eq!(claims.exp, expires.timestamp());
        assert_eq!(claims.derived_key().unwrap().as_bytes(), key.as_bytes());
    }

    #[test]
    fn test_modified_token_rejected() {
        let (token, _) = signer().issue(1, "alice", &Key32::generate()).unwrap();
        let mut bytes = token.into_bytes();
        let i = bytes.len() / 2;
        bytes[i] = if bytes[i] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).unwrap();

        let err = signer().validate(&tampered).unwrap_err();
        assert!(err.is_auth_failure());
    }

    #[test]
    fn test_other_secret_rejected() {
        let (token, _) = signer().issue(1, "alice", &Key32::generate()).unwrap();
        assert!(SessionSigner::new(b"other", 30).validate(&token).is_err());
    }

    #[test]
    fn test_expired_rejected() {
        let claims = SessionClaims {
            user_id: 1,
            name: "alice".into(),
            derived_key: Key32::generate().to_std_b64(),
            exp: Utc::now().timestamp() - 5,
        };
        let token = signer().sign(&claims).unwrap();
        assert!(signer().validate(&token).is_err());
    }

    #[test]
    fn test_debug_hides_key() {
        let claims = SessionClaims {
            user_id: 1,
            name: "alice".into(),
            derived_key: "c2VjcmV0".into(),
            exp: 0,
        };
        assert!(!format!("{claims:?}").contains("c2VjcmV0"));
    }
}
