//! Registry document types (`users.json`)
//!
//! Every struct keeps an `extra` map so fields written by newer versions
//! survive a read-modify-write cycle.

use dtxt_core::{SmtpSettings, UserId, CURRENT_DATA_VERSION};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The whole registry document: `{id_counter, users: [...]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub id_counter: UserId,
    #[serde(default)]
    pub users: Vec<UserRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Registry {
    pub fn find_by_id(&self, id: UserId) -> Option<&UserRecord> {
        self.users.iter().find(|u| u.user_id == id)
    }

    pub fn find_by_id_mut(&mut self, id: UserId) -> Option<&mut UserRecord> {
        self.users.iter_mut().find(|u| u.user_id == id)
    }

    /// Exact, case-sensitive match (login path).
    pub fn find_by_username(&self, name: &str) -> Option<&UserRecord> {
        self.users.iter().find(|u| u.username == name)
    }

    pub fn find_by_username_ci(&self, name: &str) -> Option<&UserRecord> {
        let lowered = name.to_lowercase();
        self.users
            .iter()
            .find(|u| u.username.to_lowercase() == lowered)
    }

    pub fn is_id_used(&self, id: UserId) -> bool {
        self.find_by_id(id).is_some()
    }

    /// Smallest id above `id_counter` that no record uses.
    pub fn next_free_id(&self) -> UserId {
        let mut candidate = self.id_counter + 1;
        while self.is_id_used(candidate) {
            candidate += 1;
        }
        candidate
    }
}

/// One account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dailytxt_version: Option<u32>,
    pub username: String,
    /// PHC-format Argon2id verifier
    #[serde(rename = "password")]
    pub password_verifier: String,
    /// KDF salt (standard base64); independent of the verifier's own salt
    pub salt: String,
    /// DEK sealed under the derived key (standard base64)
    pub enc_enc_key: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backup_codes: Vec<BackupCodeRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_token: Option<ShareTokenRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp_settings: Option<SmtpSettings>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub share_email_whitelist: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserRecord {
    pub fn new(
        user_id: UserId,
        username: impl Into<String>,
        password_verifier: String,
        salt: String,
        enc_enc_key: String,
    ) -> Self {
        Self {
            user_id,
            dailytxt_version: Some(CURRENT_DATA_VERSION),
            username: username.into(),
            password_verifier,
            salt,
            enc_enc_key,
            backup_codes: Vec::new(),
            share_token: None,
            smtp_settings: None,
            share_email_whitelist: Vec::new(),
            extra: Map::new(),
        }
    }

    /// False for records still in the v1 format.
    pub fn is_current(&self) -> bool {
        self.dailytxt_version.unwrap_or(1) >= CURRENT_DATA_VERSION
    }
}

/// A single-use backup code: its own verifier and salt plus the user's
/// derived key sealed under the code-derived key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupCodeRecord {
    pub password: String,
    pub salt: String,
    pub enc_derived_key: String,
}

/// At most one per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareTokenRecord {
    /// `b64url(SHA-256(raw token bytes))`
    pub token_hash: String,
    /// Derived key as a string envelope under the token itself
    pub enc_derived_key: String,
}

/// Minimal listing for the admin view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
}
