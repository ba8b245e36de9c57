//! Share e-mail verification: one-time codes and the signed cookie

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use dtxt_core::{DtxtError, DtxtResult};
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Trim and lowercase.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn is_valid_email(email: &str) -> bool {
    !email.is_empty() && email.parse::<lettre::Address>().is_ok()
}

/// Uniform six-digit code, zero padded.
pub fn generate_code() -> String {
    let code: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{code:06}")
}

struct PendingCode {
    code: String,
    expires_at: DateTime<Utc>,
}

/// In-memory `(token_hash, email) → code` map. Codes are lost on restart.
pub struct CodeStore {
    ttl: Duration,
    codes: Mutex<HashMap<String, PendingCode>>,
}

fn store_key(token_hash: &str, email: &str) -> String {
    format!("{token_hash}|{email}")
}

impl CodeStore {
    pub fn new(ttl_minutes: i64) -> Self {
        Self {
            ttl: Duration::minutes(ttl_minutes),
            codes: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl_minutes(&self) -> i64 {
        self.ttl.num_minutes()
    }

    /// Replace any pending code for the pair. Expired entries are purged.
    pub fn store(&self, token_hash: &str, email: &str, code: &str) {
        let now = Utc::now();
        let mut codes = self.codes.lock().unwrap_or_else(PoisonError::into_inner);
        codes.retain(|_, pending| pending.expires_at > now);
        codes.insert(
            store_key(token_hash, email),
            PendingCode {
                code: code.to_string(),
                expires_at: now + self.ttl,
            },
        );
    }

    /// True at most once per stored code. Expired codes are dropped.
    pub fn verify(&self, token_hash: &str, email: &str, code: &str) -> bool {
        let key = store_key(token_hash, email);
        let mut codes = self.codes.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(pending) = codes.get(&key) else {
            return false;
        };
        if pending.expires_at <= Utc::now() {
            codes.remove(&key);
            return false;
        }
        if !bool::from(pending.code.as_bytes().ct_eq(code.as_bytes())) {
            return false;
        }
        codes.remove(&key);
        true
    }

    #[cfg(test)]
    fn expire_all(&self) {
        let mut codes = self.codes.lock().unwrap_or_else(PoisonError::into_inner);
        for pending in codes.values_mut() {
            pending.expires_at = Utc::now() - Duration::seconds(1);
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CookiePayload {
    token_hash: String,
    email: String,
    exp: i64,
}

/// `b64url(json) "." b64url(HMAC-SHA256(secret, b64url(json)))`
pub struct CookieSigner {
    secret: Vec<u8>,
}

impl CookieSigner {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            secret: secret.to_vec(),
        }
    }

    fn mac(&self) -> DtxtResult<HmacSha256> {
        <HmacSha256 as Mac>::new_from_slice(&self.secret)
            .map_err(|e| DtxtError::Config(format!("verification cookie key: {e}")))
    }

    pub fn sign(&self, token_hash: &str, email: &str, expires_at: DateTime<Utc>) -> DtxtResult<String> {
        let payload = serde_json::to_vec(&CookiePayload {
            token_hash: token_hash.to_string(),
            email: email.to_string(),
            exp: expires_at.timestamp(),
        })?;
        let encoded = URL_SAFE_NO_PAD.encode(payload);
        let mut mac = self.mac()?;
        mac.update(encoded.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{encoded}.{signature}"))
    }

    /// The verified e-mail, if `value` is well formed, correctly signed,
    /// unexpired and bound to `token_hash`.
    pub fn verify(&self, value: &str, token_hash: &str) -> Option<String> {
        let (encoded, signature) = value.split_once('.')?;
        let signature = URL_SAFE_NO_PAD.decode(signature).ok()?;
        let mut mac = self.mac().ok()?;
        mac.update(encoded.as_bytes());
        mac.verify_slice(&signature).ok()?;

        let payload: CookiePayload =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(encoded).ok()?).ok()?;
        if payload.exp <= Utc::now().timestamp() {
            return None;
        }
        if !bool::from(payload.token_hash.as_bytes().ct_eq(token_hash.as_bytes())) {
            return None;
        }
        Some(payload.email)
    }
}
