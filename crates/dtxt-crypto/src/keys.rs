//! Key values, random material, key wrapping, share-token hashing

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use dtxt_core::{CryptoError, CryptoResult};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::KEY_SIZE;

/// A raw 256-bit symmetric key. Zeroized on drop.
///
/// Keys travel as strings in two encodings: codec keys (DEKs, share tokens,
/// backup-code keys) are URL-safe base64, while the derived key inside a
/// session is standard base64. Both conversions live here so callers never
/// hand an encoded string to the AEAD.
#[derive(Clone)]
pub struct Key32 {
    bytes: [u8; KEY_SIZE],
}

impl Key32 {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Fresh random key from the OS-seeded CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::from_bytes(bytes)
    }

    pub fn from_slice(raw: &[u8]) -> CryptoResult<Self> {
        if raw.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "expected {KEY_SIZE} bytes, got {}",
                raw.len()
            )));
        }
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(raw);
        Ok(Self::from_bytes(bytes))
    }

    pub fn from_urlsafe_b64(encoded: &str) -> CryptoResult<Self> {
        decode_key(&URL_SAFE, encoded)
    }

    pub fn to_urlsafe_b64(&self) -> String {
        URL_SAFE.encode(self.bytes)
    }

    pub fn from_std_b64(encoded: &str) -> CryptoResult<Self> {
        decode_key(&STANDARD, encoded)
    }

    pub fn to_std_b64(&self) -> String {
        STANDARD.encode(self.bytes)
    }
}

fn decode_key<E: Engine>(engine: &E, encoded: &str) -> CryptoResult<Key32> {
    let mut raw = engine
        .decode(encoded.trim())
        .map_err(|e| CryptoError::Decode(e.to_string()))?;
    let key = Key32::from_slice(&raw);
    raw.zeroize();
    key
}

impl Drop for Key32 {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for Key32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Key32")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// `n` bytes from the OS-seeded CSPRNG.
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

/// 32 random bytes, URL-safe base64 (padded). Used for share tokens and the
/// generated process secret.
pub fn new_secret_token() -> String {
    let mut raw = random_bytes(KEY_SIZE);
    let token = URL_SAFE.encode(&raw);
    raw.zeroize();
    token
}

/// Server-side lookup handle for a share token:
/// `b64url(SHA-256(decoded token bytes))`.
pub fn token_hash(token: &str) -> CryptoResult<String> {
    let mut raw = URL_SAFE
        .decode(token.trim())
        .map_err(|e| CryptoError::Decode(e.to_string()))?;
    let digest = Sha256::digest(&raw);
    raw.zeroize();
    Ok(URL_SAFE.encode(digest))
}

/// Seal `key` under `kek`; output is standard base64 of `nonce || ct || tag`.
///
/// This is the on-record form of the sealed DEK (`enc_enc_key`).
pub fn wrap_key(kek: &Key32, key: &Key32) -> CryptoResult<String> {
    let sealed = crate::aead::seal(kek, key.as_bytes(), None)?;
    Ok(STANDARD.encode(sealed))
}

/// Inverse of [`wrap_key`].
pub fn unwrap_key(kek: &Key32, wrapped: &str) -> CryptoResult<Key32> {
    let sealed = STANDARD
        .decode(wrapped.trim())
        .map_err(|e| CryptoError::Decode(e.to_string()))?;
    let mut plaintext = crate::aead::open(kek, &sealed, None)?;
    let key = Key32::from_slice(&plaintext);
    plaintext.zeroize();
    key
}
