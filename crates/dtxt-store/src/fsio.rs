//! JSON file helpers shared by the registry and the journal store

use std::path::Path;

use dtxt_core::DtxtResult;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serialize compactly when `indent == 0`, otherwise pretty-print with
/// `indent` spaces.
pub fn to_json_bytes<T: Serialize>(value: &T, indent: usize) -> DtxtResult<Vec<u8>> {
    if indent == 0 {
        return Ok(serde_json::to_vec(value)?);
    }
    let pad = " ".repeat(indent);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(pad.as_bytes());
    let mut out = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut ser)?;
    Ok(out)
}

/// Read and parse `path`; `None` when the file does not exist.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> DtxtResult<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Atomic write: write to temp file, then rename. Creates parent dirs.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> DtxtResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

pub async fn write_json<T: Serialize>(path: &Path, value: &T, indent: usize) -> DtxtResult<()> {
    let bytes = to_json_bytes(value, indent)?;
    write_atomic(path, &bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indent_modes() {
        let v = serde_json::json!({"a": [1]});
        assert_eq!(to_json_bytes(&v, 0).unwrap(), br#"{"a":[1]}"#);
        let pretty = String::from_utf8(to_json_bytes(&v, 2).unwrap()).unwrap();
        assert!(pretty.contains("\n  \"a\""));
    }

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let tmp = tempfile::TempDir::new().unwrap();
        let got: Option<serde_json::Value> = read_json(&tmp.path().join("nope.json")).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_write_creates_parents_and_leaves_no_temp() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("a/b/doc.json");
        write_json(&path, &serde_json::json!({"x": 1}), 0).await.unwrap();

        let back: serde_json::Value = read_json(&path).await.unwrap().unwrap();
        assert_eq!(back["x"], 1);
        assert!(!tmp.path().join("a/b/doc.json.tmp").exists());
    }
}
