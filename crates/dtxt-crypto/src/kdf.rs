//! Argon2id: password verifiers and password → derived key

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use dtxt_core::config::CryptoConfig;
use dtxt_core::{CryptoError, CryptoResult};
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use crate::keys::{random_bytes, Key32};
use crate::{KEY_SIZE, SALT_SIZE};

/// Argon2id parameters for hashing and key derivation
#[derive(Debug, Clone)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 2)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 2,
            parallelism: 4,
        }
    }
}

impl From<&CryptoConfig> for KdfParams {
    fn from(cfg: &CryptoConfig) -> Self {
        Self {
            mem_cost_kib: cfg.argon2_mem_cost_kib,
            time_cost: cfg.argon2_time_cost,
            parallelism: cfg.argon2_parallelism,
        }
    }
}

impl KdfParams {
    fn argon2(&self) -> CryptoResult<Argon2<'static>> {
        let params = Params::new(
            self.mem_cost_kib,
            self.time_cost,
            self.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| CryptoError::Kdf(format!("invalid Argon2id params: {e}")))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// What `hash_password` produces: a self-describing PHC verifier and a
/// separate KDF salt (standard base64) used by [`derive_key`].
#[derive(Debug, Clone)]
pub struct PasswordRecord {
    pub verifier: String,
    pub salt: String,
}

/// Fresh 16-byte KDF salt, standard base64.
pub fn generate_salt() -> String {
    STANDARD.encode(random_bytes(SALT_SIZE))
}

pub fn hash_password(password: &SecretString, params: &KdfParams) -> CryptoResult<PasswordRecord> {
    let phc_salt = SaltString::generate(&mut OsRng);
    let verifier = params
        .argon2()?
        .hash_password(password.expose_secret().as_bytes(), &phc_salt)
        .map_err(|e| CryptoError::Kdf(format!("password hash failed: {e}")))?
        .to_string();

    Ok(PasswordRecord {
        verifier,
        salt: generate_salt(),
    })
}

/// Check `password` against a PHC verifier. Cost parameters come from the
/// verifier itself, so hashes written with other settings still verify.
/// A malformed verifier is a mismatch.
pub fn verify_password(password: &SecretString, verifier: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(verifier) else {
        tracing::warn!("stored password verifier is not a valid PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(password.expose_secret().as_bytes(), &parsed)
        .is_ok()
}

/// Derive the 32-byte key that unseals the DEK.
pub fn derive_key(
    password: &SecretString,
    salt_b64: &str,
    params: &KdfParams,
) -> CryptoResult<Key32> {
    let salt = STANDARD
        .decode(salt_b64.trim())
        .map_err(|e| CryptoError::Decode(e.to_string()))?;

    let mut key = [0u8; KEY_SIZE];
    params
        .argon2()?
        .hash_password_into(password.expose_secret().as_bytes(), &salt, &mut key)
        .map_err(|e| CryptoError::Kdf(format!("Argon2id KDF failed: {e}")))?;

    let derived = Key32::from_bytes(key);
    key.zeroize();
    Ok(derived)
}
