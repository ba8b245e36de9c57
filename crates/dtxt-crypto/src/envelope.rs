//! v2 envelopes: base64url strings for small fields, raw bytes for files

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use dtxt_core::{CryptoError, CryptoResult};

use crate::aead::{open, seal};
use crate::keys::Key32;

/// Encrypt a UTF-8 field (entry text, file name, settings blob, ...).
///
/// Output: `b64url(nonce || ct || tag)`
pub fn encrypt_text(plaintext: &str, key: &Key32) -> CryptoResult<String> {
    let sealed = seal(key, plaintext.as_bytes(), None)?;
    Ok(URL_SAFE.encode(sealed))
}

pub fn decrypt_text(ciphertext: &str, key: &Key32) -> CryptoResult<String> {
    let sealed = URL_SAFE
        .decode(ciphertext.trim())
        .map_err(|e| CryptoError::Decode(e.to_string()))?;
    let plaintext = open(key, &sealed, None)?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::Utf8)
}

/// Encrypt attachment bytes. Output is raw `nonce || ct || tag`.
pub fn encrypt_file(plaintext: &[u8], key: &Key32) -> CryptoResult<Vec<u8>> {
    seal(key, plaintext, None)
}

pub fn decrypt_file(ciphertext: &[u8], key: &Key32) -> CryptoResult<Vec<u8>> {
    open(key, ciphertext, None)
}
