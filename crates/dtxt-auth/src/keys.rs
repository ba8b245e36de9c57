//! Key service: derived key → DEK

use std::sync::Arc;

use dtxt_core::{DtxtError, DtxtResult, UserId};
use dtxt_crypto::{unwrap_key, Key32};
use dtxt_store::RegistryStore;

pub struct KeyService {
    registry: Arc<RegistryStore>,
}

impl KeyService {
    pub fn new(registry: Arc<RegistryStore>) -> Self {
        Self { registry }
    }

    /// Unseal the user's DEK. A missing user, a wrong key and a tampered
    /// record all fail the same way.
    pub async fn get_dek(&self, user_id: UserId, derived: &Key32) -> DtxtResult<Key32> {
        let user = self
            .registry
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| DtxtError::unauthorized("no such user for DEK"))?;

        unwrap_key(derived, &user.enc_enc_key).map_err(|e| {
            tracing::warn!(user_id, "DEK unseal failed: {e}");
            DtxtError::unauthorized("DEK unseal failed")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtxt_crypto::wrap_key;
    use dtxt_store::UserRecord;

    #[tokio::test]
    async fn test_get_dek_is_stable() {
        let tmp = tempfile::TempDir::new().unwrap();
        let registry = Arc::new(RegistryStore::new(tmp.path(), 0));
        let derived = Key32::generate();
        let dek = Key32::generate();
        let sealed = wrap_key(&derived, &dek).unwrap();
        let id = registry
            .create_user("alice", |id| {
                UserRecord::new(id, "alice", "v".into(), "s".into(), sealed)
            })
            .await
            .unwrap();

        let keys = KeyService::new(registry.clone());
        for _ in 0..3 {
            assert_eq!(keys.get_dek(id, &derived).await.unwrap().as_bytes(), dek.as_bytes());
        }
        // a fresh service over the same file sees the same DEK
        let reopened = KeyService::new(Arc::new(RegistryStore::new(tmp.path(), 0)));
        assert_eq!(reopened.get_dek(id, &derived).await.unwrap().as_bytes(), dek.as_bytes());

        assert!(keys.get_dek(id, &Key32::generate()).await.unwrap_err().is_auth_failure());
        assert!(keys.get_dek(99, &derived).await.unwrap_err().is_auth_failure());
    }
}
