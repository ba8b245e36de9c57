//! ChaCha20-Poly1305 seal/open with a random 96-bit nonce per call

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use dtxt_core::{CryptoError, CryptoResult};
use rand::RngCore;

use crate::keys::Key32;
use crate::{NONCE_SIZE, TAG_SIZE};

/// Encrypt `plaintext` under `key`.
///
/// Output: `[12-byte nonce][ciphertext + 16-byte tag]`
pub fn seal(key: &Key32, plaintext: &[u8], aad: Option<&[u8]>) -> CryptoResult<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: aad.unwrap_or_default(),
            },
        )
        .map_err(|_| CryptoError::Encrypt)?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt the output of [`seal`]. Any tamper or wrong key yields
/// [`CryptoError::Decrypt`].
pub fn open(key: &Key32, blob: &[u8], aad: Option<&[u8]>) -> CryptoResult<Vec<u8>> {
    if blob.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::TooShort {
            got: blob.len(),
            min: NONCE_SIZE + TAG_SIZE,
        });
    }

    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_SIZE);
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    cipher
        .decrypt(
            Nonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad: aad.unwrap_or_default(),
            },
        )
        .map_err(|_| CryptoError::Decrypt)
}
