//! Per-user on-disk journal tree
//!
//! ```text
//! <data>/<user_id>/settings.encrypted
//!                 /templates.json
//!                 /tags.json
//!                 /share_access_log.json
//!                 /<YYYY>/<MM>.json
//!                 /files/<uuid>
//! ```
//!
//! Each user's tree has one reader/writer lock; different users never
//! contend. The lock table holds one entry per user id, so it is bounded by
//! the number of accounts.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use dtxt_core::{DtxtError, DtxtResult, UserId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use crate::documents::{AccessLogEntry, MonthDoc, TagsDoc, TemplatesDoc};
use crate::fsio;

pub const SETTINGS_FILE: &str = "settings.encrypted";
pub const TEMPLATES_FILE: &str = "templates.json";
pub const TAGS_FILE: &str = "tags.json";
pub const ACCESS_LOG_FILE: &str = "share_access_log.json";
pub const FILES_DIR: &str = "files";

pub struct JournalStore {
    data_path: PathBuf,
    indent: usize,
    locks: Mutex<HashMap<UserId, Arc<RwLock<()>>>>,
}

impl JournalStore {
    pub fn new(data_path: impl Into<PathBuf>, indent: usize) -> Self {
        Self {
            data_path: data_path.into(),
            indent,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn data_path(&self) -> &std::path::Path {
        &self.data_path
    }

    pub fn user_dir(&self, user_id: UserId) -> PathBuf {
        self.data_path.join(user_id.to_string())
    }

    fn month_path(&self, user_id: UserId, year: i32, month: u32) -> PathBuf {
        self.user_dir(user_id)
            .join(format!("{year:04}"))
            .join(format!("{month:02}.json"))
    }

    fn file_path(&self, user_id: UserId, uuid: &str) -> DtxtResult<PathBuf> {
        validate_uuid(uuid)?;
        Ok(self.user_dir(user_id).join(FILES_DIR).join(uuid))
    }

    async fn lock_for(&self, user_id: UserId) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    async fn read_doc<T: DeserializeOwned + Default>(
        &self,
        user_id: UserId,
        path: PathBuf,
    ) -> DtxtResult<T> {
        let lock = self.lock_for(user_id).await;
        let _guard = lock.read().await;
        Ok(fsio::read_json(&path).await?.unwrap_or_default())
    }

    async fn write_doc<T: Serialize>(
        &self,
        user_id: UserId,
        path: PathBuf,
        doc: &T,
    ) -> DtxtResult<()> {
        let lock = self.lock_for(user_id).await;
        let _guard = lock.write().await;
        fsio::write_json(&path, doc, self.indent).await
    }

    /// Missing month → empty document.
    pub async fn get_month(&self, user_id: UserId, year: i32, month: u32) -> DtxtResult<MonthDoc> {
        if !(1..=12).contains(&month) {
            return Err(DtxtError::InvalidInput(format!("month {month} out of range")));
        }
        self.read_doc(user_id, self.month_path(user_id, year, month)).await
    }

    pub async fn write_month(
        &self,
        user_id: UserId,
        year: i32,
        month: u32,
        doc: &MonthDoc,
    ) -> DtxtResult<()> {
        if !(1..=12).contains(&month) {
            return Err(DtxtError::InvalidInput(format!("month {month} out of range")));
        }
        self.write_doc(user_id, self.month_path(user_id, year, month), doc).await
    }

    pub async fn get_tags(&self, user_id: UserId) -> DtxtResult<TagsDoc> {
        self.read_doc(user_id, self.user_dir(user_id).join(TAGS_FILE)).await
    }

    pub async fn write_tags(&self, user_id: UserId, doc: &TagsDoc) -> DtxtResult<()> {
        self.write_doc(user_id, self.user_dir(user_id).join(TAGS_FILE), doc).await
    }

    pub async fn get_templates(&self, user_id: UserId) -> DtxtResult<TemplatesDoc> {
        self.read_doc(user_id, self.user_dir(user_id).join(TEMPLATES_FILE)).await
    }

    pub async fn write_templates(&self, user_id: UserId, doc: &TemplatesDoc) -> DtxtResult<()> {
        self.write_doc(user_id, self.user_dir(user_id).join(TEMPLATES_FILE), doc)
            .await
    }

    /// The encrypted settings blob, or `None` if the user never saved any.
    pub async fn get_settings(&self, user_id: UserId) -> DtxtResult<Option<String>> {
        let path = self.user_dir(user_id).join(SETTINGS_FILE);
        let lock = self.lock_for(user_id).await;
        let _guard = lock.read().await;
        match tokio::fs::read_to_string(&path).await {
            Ok(s) if s.trim().is_empty() => Ok(None),
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn write_settings(&self, user_id: UserId, sealed: &str) -> DtxtResult<()> {
        let path = self.user_dir(user_id).join(SETTINGS_FILE);
        let lock = self.lock_for(user_id).await;
        let _guard = lock.write().await;
        fsio::write_atomic(&path, sealed.as_bytes()).await
    }

    pub async fn read_file(&self, user_id: UserId, uuid: &str) -> DtxtResult<Vec<u8>> {
        let path = self.file_path(user_id, uuid)?;
        let lock = self.lock_for(user_id).await;
        let _guard = lock.read().await;
        Ok(tokio::fs::read(&path).await?)
    }

    pub async fn write_file(&self, user_id: UserId, uuid: &str, sealed: &[u8]) -> DtxtResult<()> {
        let path = self.file_path(user_id, uuid)?;
        let lock = self.lock_for(user_id).await;
        let _guard = lock.write().await;
        fsio::write_atomic(&path, sealed).await
    }

    pub async fn remove_file(&self, user_id: UserId, uuid: &str) -> DtxtResult<()> {
        let path = self.file_path(user_id, uuid)?;
        let lock = self.lock_for(user_id).await;
        let _guard = lock.write().await;
        Ok(tokio::fs::remove_file(&path).await?)
    }

    pub async fn get_access_log(&self, user_id: UserId) -> DtxtResult<Vec<AccessLogEntry>> {
        self.read_doc(user_id, self.user_dir(user_id).join(ACCESS_LOG_FILE))
            .await
    }

    /// Append and keep only the newest `limit` entries.
    pub async fn append_access_log(
        &self,
        user_id: UserId,
        entry: AccessLogEntry,
        limit: usize,
    ) -> DtxtResult<()> {
        let path = self.user_dir(user_id).join(ACCESS_LOG_FILE);
        let lock = self.lock_for(user_id).await;
        let _guard = lock.write().await;

        let mut logs: Vec<AccessLogEntry> = fsio::read_json(&path).await?.unwrap_or_default();
        logs.push(entry);
        if logs.len() > limit {
            let excess = logs.len() - limit;
            logs.drain(..excess);
        }
        fsio::write_json(&path, &logs, self.indent).await
    }

    pub async fn clear_access_log(&self, user_id: UserId) -> DtxtResult<()> {
        self.write_doc(
            user_id,
            self.user_dir(user_id).join(ACCESS_LOG_FILE),
            &Vec::<AccessLogEntry>::new(),
        )
        .await
    }
}

/// File ids are opaque tokens; reject anything that could walk the tree.
fn validate_uuid(uuid: &str) -> DtxtResult<()> {
    let ok = !uuid.is_empty()
        && uuid.len() <= 128
        && uuid
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'=');
    if ok {
        Ok(())
    } else {
        Err(DtxtError::InvalidInput("invalid file id".into()))
    }
}
