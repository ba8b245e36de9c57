//! The v1 tree under `<data>/old/`

use std::path::{Path, PathBuf};

use dtxt_core::{DtxtResult, UserId, CURRENT_DATA_VERSION};
use dtxt_store::fsio;
use serde::Deserialize;
use serde_json::Value;

pub const OLD_DIR: &str = "old";

/// A v1 registry entry. Only the fields the migrator reads.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyUser {
    pub user_id: UserId,
    pub username: String,
    /// `sha256$<salt>$<hex>`
    pub password: String,
    /// PBKDF2 salt, base64url
    pub salt: String,
    /// Fernet token over the base64url DEK
    pub enc_enc_key: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LegacyRegistry {
    #[serde(default)]
    pub users: Vec<LegacyUser>,
}

pub fn old_root(data_path: &Path) -> PathBuf {
    data_path.join(OLD_DIR)
}

/// `old/users.json`; absent file → empty.
pub async fn read_legacy_registry(data_path: &Path) -> DtxtResult<LegacyRegistry> {
    let path = old_root(data_path).join(dtxt_store::registry::REGISTRY_FILE);
    Ok(fsio::read_json(&path).await?.unwrap_or_default())
}

/// Exact username match in the legacy registry.
pub async fn find_legacy_user(data_path: &Path, username: &str) -> DtxtResult<Option<LegacyUser>> {
    Ok(read_legacy_registry(data_path)
        .await?
        .users
        .into_iter()
        .find(|u| u.username == username))
}

/// Move a v1 data directory out of the way on startup.
///
/// If `<data>/users.json` lists any user not at the current version, every
/// entry of `<data>` except `old/` is moved into `<data>/old/`. Returns
/// whether anything was moved. Nothing is ever deleted.
pub async fn relocate_legacy_tree(data_path: &Path) -> DtxtResult<bool> {
    let users_path = data_path.join(dtxt_store::registry::REGISTRY_FILE);
    let Some(doc) = fsio::read_json::<Value>(&users_path).await? else {
        tracing::debug!("no users.json, skipping legacy check");
        return Ok(false);
    };

    let users = doc
        .get("users")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let needs_move = users.iter().any(|u| {
        u.get("dailytxt_version").and_then(Value::as_u64) != Some(u64::from(CURRENT_DATA_VERSION))
    });
    if !needs_move {
        return Ok(false);
    }

    let old = old_root(data_path);
    tokio::fs::create_dir_all(&old).await?;
    tracing::warn!(
        old = %old.display(),
        "users.json contains v1 accounts, moving data directory into old/"
    );

    let mut rd = tokio::fs::read_dir(data_path).await?;
    while let Some(entry) = rd.next_entry().await? {
        let name = entry.file_name();
        if name.to_str() == Some(OLD_DIR) {
            continue;
        }
        let dest = old.join(&name);
        if let Err(e) = tokio::fs::rename(entry.path(), &dest).await {
            tracing::error!(entry = ?name, "failed to move into old/: {e}");
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_relocate_moves_v1_tree() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::write(
            root.join("users.json"),
            r#"{"id_counter":1,"users":[{"user_id":1,"username":"carol"}]}"#,
        )
        .unwrap();
        std::fs::create_dir_all(root.join("1/2022")).unwrap();
        std::fs::write(root.join("1/2022/06.json"), "{}").unwrap();
        std::fs::create_dir_all(root.join("files")).unwrap();

        assert!(relocate_legacy_tree(root).await.unwrap());

        assert!(root.join("old/users.json").exists());
        assert!(root.join("old/1/2022/06.json").exists());
        assert!(root.join("old/files").is_dir());
        assert!(!root.join("users.json").exists());
        assert!(!root.join("1").exists());

        // second run: nothing left to move
        assert!(!relocate_legacy_tree(root).await.unwrap());
    }

    #[tokio::test]
    async fn test_relocate_leaves_v2_tree_alone() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::write(
            root.join("users.json"),
            r#"{"id_counter":1,"users":[{"user_id":1,"username":"a","dailytxt_version":2}]}"#,
        )
        .unwrap();

        assert!(!relocate_legacy_tree(root).await.unwrap());
        assert!(root.join("users.json").exists());
        assert!(!root.join("old").exists());
    }

    #[tokio::test]
    async fn test_find_legacy_user_exact_match() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("old")).unwrap();
        std::fs::write(
            tmp.path().join("old/users.json"),
            r#"{"users":[{"user_id":4,"username":"Carol","password":"sha256$a$b","salt":"c2FsdA==","enc_enc_key":"x"}]}"#,
        )
        .unwrap();

        assert!(find_legacy_user(tmp.path(), "carol").await.unwrap().is_none());
        assert_eq!(
            find_legacy_user(tmp.path(), "Carol").await.unwrap().unwrap().user_id,
            4
        );
        assert!(find_legacy_user(&tmp.path().join("nowhere"), "Carol")
            .await
            .unwrap()
            .is_none());
    }
}
