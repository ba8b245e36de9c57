use thiserror::Error;

pub type DtxtResult<T> = Result<T, DtxtError>;

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Failures from the primitives and envelope codecs.
///
/// Messages never carry key material or plaintext.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("base64 decode failed: {0}")]
    Decode(String),

    #[error("ciphertext too short: {got} bytes (expected at least {min})")]
    TooShort { got: usize, min: usize },

    #[error("decryption failed")]
    Decrypt,

    #[error("encryption failed")]
    Encrypt,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("legacy token rejected: {0}")]
    Legacy(String),

    #[error("plaintext is not valid UTF-8")]
    Utf8,
}

#[derive(Debug, Error)]
pub enum DtxtError {
    /// Authentication failure; the message is for logs only.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("registration is disabled")]
    RegistrationDisabled,

    #[error("username already taken")]
    UsernameTaken,

    #[error("user not found")]
    UserNotFound,

    #[error("migration already in progress")]
    MigrationInProgress,

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("email not allowed")]
    EmailNotAllowed,

    #[error("invalid or expired verification code")]
    InvalidCode,

    #[error("verification required")]
    VerificationRequired,

    #[error("share verification is not configured")]
    VerificationNotConfigured,

    #[error("invalid email address")]
    InvalidEmail,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("smtp error: {0}")]
    Smtp(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DtxtError {
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized(reason.into())
    }

    /// True for every failure the HTTP layer must collapse into one opaque
    /// "not authorized" answer.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::UserNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crypto_error_converts() {
        let err: DtxtError = CryptoError::Decrypt.into();
        assert!(matches!(err, DtxtError::Crypto(CryptoError::Decrypt)));
        assert_eq!(err.to_string(), "crypto error: decryption failed");
    }

    #[test]
    fn test_auth_failure_classification() {
        assert!(DtxtError::unauthorized("wrong password").is_auth_failure());
        assert!(DtxtError::UserNotFound.is_auth_failure());
        assert!(!DtxtError::UsernameTaken.is_auth_failure());
        assert!(!DtxtError::Crypto(CryptoError::Decrypt).is_auth_failure());
    }
}
