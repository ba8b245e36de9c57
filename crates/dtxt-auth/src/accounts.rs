//! Registration, login and the password-gated account operations

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use dtxt_core::{DtxtError, DtxtResult, UserId};
use dtxt_crypto::{derive_key, hash_password, unwrap_key, verify_password, wrap_key, KdfParams, Key32};
use dtxt_migrate::Migrator;
use dtxt_store::{RegistryStore, UserRecord};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::backup::{generate_backup_codes, open_backup_code};

pub const DEFAULT_OPEN_SECONDS: u64 = 300;
pub const MAX_OPEN_SECONDS: u64 = 900;

/// 1..=900 is taken as given; anything else means the default 300.
pub fn open_seconds(requested: Option<u64>) -> u64 {
    requested
        .filter(|s| (1..=MAX_OPEN_SECONDS).contains(s))
        .unwrap_or(DEFAULT_OPEN_SECONDS)
}

/// `ALLOW_REGISTRATION` plus an admin-opened temporary window.
pub struct RegistrationGate {
    allow: bool,
    until: Mutex<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationStatus {
    pub registration_allowed: bool,
    pub temporary_allowed: bool,
    pub until: Option<DateTime<Utc>>,
}

impl RegistrationGate {
    pub fn new(allow: bool) -> Self {
        Self {
            allow,
            until: Mutex::new(None),
        }
    }

    pub fn status(&self) -> RegistrationStatus {
        let until = *self.until.lock().unwrap_or_else(PoisonError::into_inner);
        RegistrationStatus {
            registration_allowed: self.allow,
            temporary_allowed: until.is_some_and(|t| Utc::now() < t),
            until,
        }
    }

    pub fn is_open(&self) -> bool {
        let status = self.status();
        status.registration_allowed || status.temporary_allowed
    }

    /// Open for `seconds`, see [`open_seconds`].
    pub fn open_for(&self, seconds: Option<u64>) -> DateTime<Utc> {
        let seconds = open_seconds(seconds);
        let until = Utc::now() + Duration::seconds(seconds as i64);
        *self.until.lock().unwrap_or_else(PoisonError::into_inner) = Some(until);
        tracing::info!(until = %until.to_rfc3339(), "registration temporarily opened");
        until
    }
}

/// A successful password check.
pub struct Unlocked {
    pub derived: Key32,
    /// Remaining backup codes if one was consumed, `None` for the password.
    pub backup_codes_left: Option<usize>,
}

impl Unlocked {
    /// The `available_backup_codes` wire value: -1 unless a code was used.
    pub fn available_backup_codes(&self) -> i64 {
        self.backup_codes_left.map_or(-1, |n| n as i64)
    }
}

pub struct LoginOutcome {
    pub user_id: UserId,
    pub username: String,
    pub unlocked: Unlocked,
}

pub enum ChangePassword {
    Changed { derived: Key32 },
    PasswordIncorrect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeUsername {
    Changed,
    UsernameTaken,
    PasswordIncorrect,
}

pub struct Accounts {
    registry: Arc<RegistryStore>,
    migrator: Arc<Migrator>,
    kdf: KdfParams,
    gate: RegistrationGate,
}

impl Accounts {
    pub fn new(
        registry: Arc<RegistryStore>,
        migrator: Arc<Migrator>,
        kdf: KdfParams,
        gate: RegistrationGate,
    ) -> Self {
        Self {
            registry,
            migrator,
            kdf,
            gate,
        }
    }

    pub fn gate(&self) -> &RegistrationGate {
        &self.gate
    }

    pub fn migrator(&self) -> &Migrator {
        &self.migrator
    }

    pub fn registry(&self) -> &RegistryStore {
        &self.registry
    }

    pub async fn register(&self, username: &str, password: &SecretString) -> DtxtResult<UserId> {
        if !self.gate.is_open() {
            tracing::warn!(username = %username, "registration attempt while closed");
            return Err(DtxtError::RegistrationDisabled);
        }
        let username = username.trim();
        if username.is_empty() || password.expose_secret().is_empty() {
            return Err(DtxtError::InvalidInput("username and password are required".into()));
        }
        self.create_account(username, password).await
    }

    /// Build the key hierarchy for a new user and insert the record.
    async fn create_account(&self, username: &str, password: &SecretString) -> DtxtResult<UserId> {
        let record = hash_password(password, &self.kdf)?;
        let derived = derive_key(password, &record.salt, &self.kdf)?;
        let sealed_dek = wrap_key(&derived, &Key32::generate())?;

        let user_id = self
            .registry
            .create_user(username, |id| {
                UserRecord::new(id, username, record.verifier, record.salt, sealed_dek)
            })
            .await?;
        tracing::info!(user_id, username = %username, "user registered");
        Ok(user_id)
    }

    /// Exact-name login. A name only known to `old/users.json` is migrated
    /// first; the migration claim makes concurrent logins fail fast.
    pub async fn login(&self, username: &str, password: &SecretString) -> DtxtResult<LoginOutcome> {
        let user = match self.registry.find_by_username(username).await? {
            Some(user) => user,
            None => {
                if self.migrator.legacy_user(username).await?.is_none() {
                    return Err(DtxtError::UserNotFound);
                }
                tracing::info!(username = %username, "legacy user found, migrating");
                self.migrator.migrate(username, password).await?;
                self.registry
                    .find_by_username(username)
                    .await?
                    .ok_or(DtxtError::UserNotFound)?
            }
        };

        if !user.is_current() {
            tracing::warn!(
                user_id = user.user_id,
                "refusing login for a v1 record inside the v2 registry"
            );
            return Err(DtxtError::unauthorized("record not in current format"));
        }

        let unlocked = self
            .check_password(user.user_id, password)
            .await?
            .ok_or_else(|| DtxtError::unauthorized("wrong password"))?;

        tracing::info!(user_id = user.user_id, "login");
        Ok(LoginOutcome {
            user_id: user.user_id,
            username: user.username,
            unlocked,
        })
    }

    /// Try the password, then each backup code. A matching code is consumed
    /// before the derived key is returned. `None` means no match.
    pub async fn check_password(
        &self,
        user_id: UserId,
        password: &SecretString,
    ) -> DtxtResult<Option<Unlocked>> {
        let user = self.registry.require(user_id).await?;

        if verify_password(password, &user.password_verifier) {
            let derived = derive_key(password, &user.salt, &self.kdf)?;
            return Ok(Some(Unlocked {
                derived,
                backup_codes_left: None,
            }));
        }

        for code in &user.backup_codes {
            if !verify_password(password, &code.password) {
                continue;
            }
            let Some(left) = self
                .registry
                .consume_backup_code(user_id, &code.password)
                .await?
            else {
                // consumed concurrently
                return Ok(None);
            };
            let derived = open_backup_code(password, code, &self.kdf)?;
            tracing::info!(user_id, remaining = left, "backup code used");
            return Ok(Some(Unlocked {
                derived,
                backup_codes_left: Some(left),
            }));
        }
        Ok(None)
    }

    /// Re-seal the existing DEK under a new password. Backup codes are
    /// cleared; the share token is left alone.
    pub async fn change_password(
        &self,
        user_id: UserId,
        old_password: &SecretString,
        new_password: &SecretString,
    ) -> DtxtResult<ChangePassword> {
        let Some(unlocked) = self.check_password(user_id, old_password).await? else {
            return Ok(ChangePassword::PasswordIncorrect);
        };
        let user = self.registry.require(user_id).await?;
        let dek = unwrap_key(&unlocked.derived, &user.enc_enc_key)?;

        let record = hash_password(new_password, &self.kdf)?;
        let derived = derive_key(new_password, &record.salt, &self.kdf)?;
        let sealed = wrap_key(&derived, &dek)?;
        self.registry
            .replace_credentials(user_id, record.verifier, record.salt, sealed)
            .await?;

        tracing::info!(user_id, "password changed");
        Ok(ChangePassword::Changed { derived })
    }

    pub async fn change_username(
        &self,
        user_id: UserId,
        new_username: &str,
        password: &SecretString,
    ) -> DtxtResult<ChangeUsername> {
        let new_username = new_username.trim();
        if new_username.is_empty() {
            return Err(DtxtError::InvalidInput("username must not be empty".into()));
        }
        if let Some(other) = self.registry.find_by_username_ci(new_username).await? {
            if other.user_id != user_id {
                return Ok(ChangeUsername::UsernameTaken);
            }
        }
        if self.check_password(user_id, password).await?.is_none() {
            return Ok(ChangeUsername::PasswordIncorrect);
        }

        match self.registry.set_username(user_id, new_username).await {
            Ok(()) => {
                tracing::info!(user_id, username = %new_username, "username changed");
                Ok(ChangeUsername::Changed)
            }
            Err(DtxtError::UsernameTaken) => Ok(ChangeUsername::UsernameTaken),
            Err(e) => Err(e),
        }
    }

    /// Returns false on a wrong password.
    pub async fn delete_account(&self, user_id: UserId, password: &SecretString) -> DtxtResult<bool> {
        if self.check_password(user_id, password).await?.is_none() {
            return Ok(false);
        }
        self.registry.delete_user(user_id).await?;
        tracing::info!(user_id, "account deleted");
        Ok(true)
    }

    /// Fresh backup codes replacing any earlier set. `None` on a wrong
    /// password.
    pub async fn create_backup_codes(
        &self,
        user_id: UserId,
        password: &SecretString,
    ) -> DtxtResult<Option<Vec<String>>> {
        let Some(unlocked) = self.check_password(user_id, password).await? else {
            return Ok(None);
        };
        let (codes, records) = generate_backup_codes(&unlocked.derived, &self.kdf)?;
        self.registry.save_backup_codes(user_id, records).await?;
        tracing::info!(user_id, count = codes.len(), "backup codes created");
        Ok(Some(codes))
    }
}
