//! Read side of the v1 on-disk format.
//!
//! v1 sealed everything with Fernet (AES-128-CBC + HMAC-SHA256) under a key
//! from PBKDF2-HMAC-SHA256, and stored password verifiers as
//! `sha256$<salt>$<hex hmac>`. Only the migrator uses this module. The
//! encrypting half exists to build fixtures.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use dtxt_core::{CryptoError, CryptoResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::keys::{random_bytes, Key32};

type HmacSha256 = Hmac<Sha256>;
type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// PBKDF2 rounds used by v1
pub const LEGACY_PBKDF2_ROUNDS: u32 = 100_000;

const FERNET_VERSION: u8 = 0x80;
const TS_LEN: usize = 8;
const IV_LEN: usize = 16;
const HMAC_LEN: usize = 32;
const HEADER_LEN: usize = 1 + TS_LEN + IV_LEN;

/// v1 wrote padded base64url; accept unpadded input too.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

fn b64url_decode(input: &str) -> CryptoResult<Vec<u8>> {
    URL_SAFE_LENIENT
        .decode(input.trim())
        .map_err(|e| CryptoError::Decode(e.to_string()))
}

/// Derive the v1 key: `PBKDF2-HMAC-SHA256(password, b64url(salt), 100000, 32)`.
///
/// The 32 raw bytes are used directly as the Fernet key.
pub fn legacy_key(password: &str, salt_b64url: &str) -> CryptoResult<Key32> {
    let salt = b64url_decode(salt_b64url)?;
    let mut out = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, LEGACY_PBKDF2_ROUNDS, &mut out);
    let key = Key32::from_bytes(out);
    out.zeroize();
    Ok(key)
}

/// Decrypt a Fernet token. The HMAC is checked; the timestamp is not, since
/// stored tokens can be years old.
pub fn fernet_decrypt(token: &str, key: &Key32) -> CryptoResult<Vec<u8>> {
    let raw = b64url_decode(token)?;
    // at least one cipher block
    let min = HEADER_LEN + 16 + HMAC_LEN;
    if raw.len() < min {
        return Err(CryptoError::TooShort {
            got: raw.len(),
            min,
        });
    }
    if raw[0] != FERNET_VERSION {
        return Err(CryptoError::Legacy(format!("unknown version byte {:#04x}", raw[0])));
    }

    let (signing_key, encryption_key) = key.as_bytes().split_at(16);
    let (signed, tag) = raw.split_at(raw.len() - HMAC_LEN);

    let mut mac = <HmacSha256 as Mac>::new_from_slice(signing_key)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    mac.update(signed);
    let expected = mac.finalize().into_bytes();
    if !bool::from(expected.as_slice().ct_eq(tag)) {
        return Err(CryptoError::Legacy("signature mismatch".into()));
    }

    let iv = &signed[1 + TS_LEN..HEADER_LEN];
    let ciphertext = &signed[HEADER_LEN..];
    if ciphertext.len() % 16 != 0 {
        return Err(CryptoError::Legacy("ciphertext is not block aligned".into()));
    }

    Aes128CbcDec::new_from_slices(encryption_key, iv)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::Legacy("bad padding".into()))
}

/// Convenience for the many v1 fields that hold UTF-8 text.
pub fn fernet_decrypt_text(token: &str, key: &Key32) -> CryptoResult<String> {
    String::from_utf8(fernet_decrypt(token, key)?).map_err(|_| CryptoError::Utf8)
}

/// Produce a Fernet token with the current time as timestamp.
pub fn fernet_encrypt(plaintext: &[u8], key: &Key32) -> CryptoResult<String> {
    let (signing_key, encryption_key) = key.as_bytes().split_at(16);
    let iv = random_bytes(IV_LEN);
    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    let ciphertext = Aes128CbcEnc::new_from_slices(encryption_key, &iv)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut token = Vec::with_capacity(HEADER_LEN + ciphertext.len() + HMAC_LEN);
    token.push(FERNET_VERSION);
    token.extend_from_slice(&ts.to_be_bytes());
    token.extend_from_slice(&iv);
    token.extend_from_slice(&ciphertext);

    let mut mac = <HmacSha256 as Mac>::new_from_slice(signing_key)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    mac.update(&token);
    token.extend_from_slice(&mac.finalize().into_bytes());

    Ok(base64::engine::general_purpose::URL_SAFE.encode(token))
}

fn legacy_digest(salt: &str, password: &str) -> CryptoResult<String> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(salt.as_bytes())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    mac.update(password.as_bytes());
    Ok(hex_lower(&mac.finalize().into_bytes()))
}

/// Check a `sha256$<salt>$<hex>` verifier. Anything else is a mismatch.
pub fn verify_legacy_password(password: &str, verifier: &str) -> bool {
    let mut parts = verifier.split('$');
    let (Some("sha256"), Some(salt), Some(stored), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    match legacy_digest(salt, password) {
        Ok(computed) => bool::from(computed.as_bytes().ct_eq(stored.as_bytes())),
        Err(_) => false,
    }
}

/// Build a v1 verifier string.
pub fn hash_legacy_password(password: &str, salt: &str) -> CryptoResult<String> {
    Ok(format!("sha256${salt}${}", legacy_digest(salt, password)?))
}

fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}
