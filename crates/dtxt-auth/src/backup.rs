//! Single-use backup codes
//!
//! Each code stands in for the password exactly once: it has its own
//! Argon2id verifier and carries the derived key sealed under a key derived
//! from the code.

use dtxt_core::DtxtResult;
use dtxt_crypto::{decrypt_text, derive_key, encrypt_text, hash_password, KdfParams, Key32};
use dtxt_store::BackupCodeRecord;
use rand::Rng;
use secrecy::SecretString;

pub const BACKUP_CODE_COUNT: usize = 6;
pub const BACKUP_CODE_LEN: usize = 10;

const ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789/+-_*!?#$%&(){}[]=@~";

pub fn random_code() -> String {
    let mut rng = rand::thread_rng();
    (0..BACKUP_CODE_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Fresh codes for `derived`. Returns the plaintext codes (shown once) and
/// the records to store.
pub fn generate_backup_codes(
    derived: &Key32,
    params: &KdfParams,
) -> DtxtResult<(Vec<String>, Vec<BackupCodeRecord>)> {
    let mut codes = Vec::with_capacity(BACKUP_CODE_COUNT);
    let mut records = Vec::with_capacity(BACKUP_CODE_COUNT);
    for _ in 0..BACKUP_CODE_COUNT {
        let code = random_code();
        let secret = SecretString::from(code.clone());
        let hashed = hash_password(&secret, params)?;
        let wrapping = derive_key(&secret, &hashed.salt, params)?;
        records.push(BackupCodeRecord {
            password: hashed.verifier,
            enc_derived_key: encrypt_text(&derived.to_std_b64(), &wrapping)?,
            salt: hashed.salt,
        });
        codes.push(code);
    }
    Ok((codes, records))
}

/// Recover the derived key from a code already verified against `record`.
pub fn open_backup_code(
    code: &SecretString,
    record: &BackupCodeRecord,
    params: &KdfParams,
) -> DtxtResult<Key32> {
    let wrapping = derive_key(code, &record.salt, params)?;
    let encoded = decrypt_text(&record.enc_derived_key, &wrapping)?;
    Ok(Key32::from_std_b64(&encoded)?)
}
