//! User registry: `users.json` behind a single reader/writer lock
//!
//! Every mutation is a read-modify-write under the writer guard followed by
//! an atomic temp+rename, so readers never observe a partial document and
//! writes are totally ordered.

use std::path::{Path, PathBuf};

use dtxt_core::{DtxtError, DtxtResult, SmtpSettings, UserId};
use tokio::sync::RwLock;

use crate::fsio;
use crate::model::{BackupCodeRecord, Registry, ShareTokenRecord, UserRecord, UserSummary};

pub const REGISTRY_FILE: &str = "users.json";

pub struct RegistryStore {
    data_path: PathBuf,
    path: PathBuf,
    indent: usize,
    lock: RwLock<()>,
}

impl RegistryStore {
    /// Registry at `<data_path>/users.json`.
    pub fn new(data_path: impl Into<PathBuf>, indent: usize) -> Self {
        let data_path = data_path.into();
        let path = data_path.join(REGISTRY_FILE);
        Self {
            data_path,
            path,
            indent,
            lock: RwLock::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> DtxtResult<Registry> {
        Ok(fsio::read_json(&self.path).await?.unwrap_or_default())
    }

    /// Load the registry. An absent file is an empty registry.
    pub async fn get_users(&self) -> DtxtResult<Registry> {
        let _guard = self.lock.read().await;
        self.load().await
    }

    /// Run `f` against the current registry under the writer guard and
    /// persist the result if `f` succeeds. Nothing is written on error.
    pub async fn update<T, F>(&self, f: F) -> DtxtResult<T>
    where
        F: FnOnce(&mut Registry) -> DtxtResult<T>,
    {
        let _guard = self.lock.write().await;
        let mut registry = self.load().await?;
        let out = f(&mut registry)?;
        fsio::write_json(&self.path, &registry, self.indent).await?;
        Ok(out)
    }

    /// Like [`update`](Self::update) for a single existing user.
    async fn update_user<T, F>(&self, user_id: UserId, f: F) -> DtxtResult<T>
    where
        F: FnOnce(&mut UserRecord) -> DtxtResult<T>,
    {
        self.update(|reg| {
            let user = reg.find_by_id_mut(user_id).ok_or(DtxtError::UserNotFound)?;
            f(user)
        })
        .await
    }

    pub async fn find_by_username(&self, name: &str) -> DtxtResult<Option<UserRecord>> {
        Ok(self.get_users().await?.find_by_username(name).cloned())
    }

    pub async fn find_by_username_ci(&self, name: &str) -> DtxtResult<Option<UserRecord>> {
        Ok(self.get_users().await?.find_by_username_ci(name).cloned())
    }

    pub async fn find_by_id(&self, user_id: UserId) -> DtxtResult<Option<UserRecord>> {
        Ok(self.get_users().await?.find_by_id(user_id).cloned())
    }

    /// Like `find_by_id` but a missing user is an error.
    pub async fn require(&self, user_id: UserId) -> DtxtResult<UserRecord> {
        self.find_by_id(user_id).await?.ok_or(DtxtError::UserNotFound)
    }

    pub async fn list_users(&self) -> DtxtResult<Vec<UserSummary>> {
        Ok(self
            .get_users()
            .await?
            .users
            .iter()
            .map(|u| UserSummary {
                id: u.user_id,
                username: u.username.clone(),
            })
            .collect())
    }

    pub async fn next_free_id(&self) -> DtxtResult<UserId> {
        Ok(self.get_users().await?.next_free_id())
    }

    /// Insert a new native account with `id = id_counter + 1`.
    /// The username must be unique ignoring case.
    pub async fn create_user<F>(&self, username: &str, build: F) -> DtxtResult<UserId>
    where
        F: FnOnce(UserId) -> UserRecord,
    {
        self.update(|reg| {
            if reg.find_by_username_ci(username).is_some() {
                return Err(DtxtError::UsernameTaken);
            }
            let id = reg.next_free_id();
            reg.id_counter = id;
            reg.users.push(build(id));
            Ok(id)
        })
        .await
    }

    /// Claim an id for a record that will be inserted later: `preferred` if
    /// it lies above `id_counter` and no record holds it, otherwise the next
    /// free one. Ids at or below the counter may belong to deleted accounts
    /// and are never handed out again. Bumps `id_counter` so concurrent
    /// registrations cannot take it.
    pub async fn reserve_id(&self, preferred: Option<UserId>) -> DtxtResult<UserId> {
        self.update(|reg| {
            let id = match preferred {
                Some(id) if id > reg.id_counter && !reg.is_id_used(id) => id,
                _ => reg.next_free_id(),
            };
            reg.id_counter = reg.id_counter.max(id);
            Ok(id)
        })
        .await
    }

    /// Insert a fully built record under an id from [`reserve_id`](Self::reserve_id).
    pub async fn insert_user(&self, record: UserRecord) -> DtxtResult<()> {
        self.update(|reg| {
            if reg.is_id_used(record.user_id) {
                return Err(DtxtError::Storage(format!(
                    "user id {} already in use",
                    record.user_id
                )));
            }
            if reg.find_by_username_ci(&record.username).is_some() {
                return Err(DtxtError::UsernameTaken);
            }
            reg.id_counter = reg.id_counter.max(record.user_id);
            reg.users.push(record);
            Ok(())
        })
        .await
    }

    /// Rename, rejecting case-insensitive clashes with other users.
    pub async fn set_username(&self, user_id: UserId, new_name: &str) -> DtxtResult<()> {
        self.update(|reg| {
            if let Some(other) = reg.find_by_username_ci(new_name) {
                if other.user_id != user_id {
                    return Err(DtxtError::UsernameTaken);
                }
            }
            let user = reg.find_by_id_mut(user_id).ok_or(DtxtError::UserNotFound)?;
            user.username = new_name.to_string();
            Ok(())
        })
        .await
    }

    /// Swap in new password material. Backup codes seal the old derived key,
    /// so they are dropped too.
    pub async fn replace_credentials(
        &self,
        user_id: UserId,
        verifier: String,
        salt: String,
        enc_enc_key: String,
    ) -> DtxtResult<()> {
        self.update_user(user_id, |u| {
            u.password_verifier = verifier;
            u.salt = salt;
            u.enc_enc_key = enc_enc_key;
            u.backup_codes.clear();
            Ok(())
        })
        .await
    }

    pub async fn save_backup_codes(
        &self,
        user_id: UserId,
        codes: Vec<BackupCodeRecord>,
    ) -> DtxtResult<()> {
        self.update_user(user_id, |u| {
            u.backup_codes = codes;
            Ok(())
        })
        .await
    }

    /// Remove the backup code whose verifier is `verifier`. Returns the
    /// number left, or `None` if it was already gone.
    pub async fn consume_backup_code(
        &self,
        user_id: UserId,
        verifier: &str,
    ) -> DtxtResult<Option<usize>> {
        self.update_user(user_id, |u| {
            let before = u.backup_codes.len();
            u.backup_codes.retain(|c| c.password != verifier);
            if u.backup_codes.len() == before {
                return Ok(None);
            }
            Ok(Some(u.backup_codes.len()))
        })
        .await
    }

    /// Resolve a share-token hash to `(user_id, sealed derived key)`.
    pub async fn get_user_by_share_token_hash(
        &self,
        token_hash: &str,
    ) -> DtxtResult<(UserId, String)> {
        let registry = self.get_users().await?;
        registry
            .users
            .iter()
            .find_map(|u| {
                u.share_token
                    .as_ref()
                    .filter(|t| t.token_hash == token_hash)
                    .map(|t| (u.user_id, t.enc_derived_key.clone()))
            })
            .ok_or_else(|| DtxtError::unauthorized("unknown share token"))
    }

    /// Store the user's share token, replacing any previous one.
    pub async fn save_share_token(
        &self,
        user_id: UserId,
        token_hash: String,
        enc_derived_key: String,
    ) -> DtxtResult<()> {
        self.update_user(user_id, |u| {
            u.share_token = Some(ShareTokenRecord {
                token_hash,
                enc_derived_key,
            });
            Ok(())
        })
        .await
    }

    pub async fn delete_share_token(&self, user_id: UserId) -> DtxtResult<()> {
        self.update_user(user_id, |u| {
            u.share_token = None;
            Ok(())
        })
        .await
    }

    pub async fn has_share_token(&self, user_id: UserId) -> DtxtResult<bool> {
        Ok(self
            .find_by_id(user_id)
            .await?
            .is_some_and(|u| u.share_token.is_some()))
    }

    pub async fn get_share_email_whitelist(&self, user_id: UserId) -> DtxtResult<Vec<String>> {
        Ok(self.require(user_id).await?.share_email_whitelist)
    }

    pub async fn save_share_email_whitelist(
        &self,
        user_id: UserId,
        emails: Vec<String>,
    ) -> DtxtResult<()> {
        self.update_user(user_id, |u| {
            u.share_email_whitelist = emails;
            Ok(())
        })
        .await
    }

    pub async fn get_smtp_settings(&self, user_id: UserId) -> DtxtResult<Option<SmtpSettings>> {
        Ok(self.require(user_id).await?.smtp_settings)
    }

    pub async fn save_smtp_settings(
        &self,
        user_id: UserId,
        settings: Option<SmtpSettings>,
    ) -> DtxtResult<()> {
        self.update_user(user_id, |u| {
            u.smtp_settings = settings;
            Ok(())
        })
        .await
    }

    /// Remove the registry entry, then the user's on-disk tree.
    pub async fn delete_user(&self, user_id: UserId) -> DtxtResult<()> {
        self.update(|reg| {
            let before = reg.users.len();
            reg.users.retain(|u| u.user_id != user_id);
            if reg.users.len() == before {
                return Err(DtxtError::UserNotFound);
            }
            Ok(())
        })
        .await?;

        let tree = self.data_path.join(user_id.to_string());
        match tokio::fs::remove_dir_all(&tree).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tracing::info!(user_id, "user deleted");
        Ok(())
    }
}
