//! Per-user settings blob (`settings.encrypted`)

use dtxt_core::{DtxtError, DtxtResult, UserId};
use dtxt_crypto::{decrypt_text, encrypt_text, Key32};
use dtxt_store::JournalStore;
use serde_json::{json, Map, Value};

pub fn default_settings() -> Map<String, Value> {
    let defaults = json!({
        "autoloadImagesByDefault": false,
        "setAutoloadImagesPerDevice": true,
        "useALookBack": true,
        "aLookBackYears": [1, 5, 10],
        "useBrowserTimezone": true,
        "timezone": "UTC",
        "useBrowserLanguage": true,
        "language": "en",
        "darkModeAutoDetect": true,
        "useDarkMode": false,
        "background": "gradient",
        "monochromeBackgroundColor": "#ececec",
        "checkForUpdates": true,
        "includeTestVersions": false,
        "requirePasswordOnPageLoad": false,
    });
    match defaults {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

async fn read_stored(
    journal: &JournalStore,
    user_id: UserId,
    dek: &Key32,
) -> DtxtResult<Option<Map<String, Value>>> {
    let Some(sealed) = journal.get_settings(user_id).await? else {
        return Ok(None);
    };
    let plain = decrypt_text(&sealed, dek)?;
    match serde_json::from_str::<Value>(&plain)? {
        Value::Object(map) => Ok(Some(map)),
        _ => Err(DtxtError::Storage("settings blob is not a JSON object".into())),
    }
}

/// Stored settings with missing keys filled from the defaults.
pub async fn load_settings(
    journal: &JournalStore,
    user_id: UserId,
    dek: &Key32,
) -> DtxtResult<Map<String, Value>> {
    let mut settings = read_stored(journal, user_id, dek).await?.unwrap_or_default();
    for (key, value) in default_settings() {
        settings.entry(key).or_insert(value);
    }
    Ok(settings)
}

/// Merge `patch` over the stored settings (or the defaults if there are
/// none) and write the result back.
pub async fn save_settings(
    journal: &JournalStore,
    user_id: UserId,
    dek: &Key32,
    patch: Map<String, Value>,
) -> DtxtResult<Map<String, Value>> {
    let mut settings = match read_stored(journal, user_id, dek).await? {
        Some(map) if !map.is_empty() => map,
        _ => default_settings(),
    };
    settings.extend(patch);

    let sealed = encrypt_text(&serde_json::to_string(&settings)?, dek)?;
    journal.write_settings(user_id, &sealed).await?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_settings_are_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let journal = JournalStore::new(tmp.path(), 0);
        let settings = load_settings(&journal, 1, &Key32::generate()).await.unwrap();
        assert_eq!(settings, default_settings());
        assert_eq!(settings["aLookBackYears"], json!([1, 5, 10]));
    }

    #[tokio::test]
    async fn test_save_merges_and_encrypts() {
        let tmp = tempfile::TempDir::new().unwrap();
        let journal = JournalStore::new(tmp.path(), 0);
        let dek = Key32::generate();

        let mut patch = Map::new();
        patch.insert("useDarkMode".into(), json!(true));
        patch.insert("customKey".into(), json!("x"));
        save_settings(&journal, 1, &dek, patch).await.unwrap();

        let raw = journal.get_settings(1).await.unwrap().unwrap();
        assert!(!raw.contains("useDarkMode"));

        let loaded = load_settings(&journal, 1, &dek).await.unwrap();
        assert_eq!(loaded["useDarkMode"], json!(true));
        assert_eq!(loaded["customKey"], json!("x"));
        assert_eq!(loaded["language"], json!("en"));

        // a wrong key cannot read them
        assert!(load_settings(&journal, 1, &Key32::generate()).await.is_err());
    }
}
