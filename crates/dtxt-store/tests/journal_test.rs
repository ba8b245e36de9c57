//! Integration tests: journal store documents, files, access log

use dtxt_store::{AccessLogEntry, DayEntry, JournalStore, MonthDoc, TemplatesDoc};
use tempfile::TempDir;

#[tokio::test]
async fn month_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let store = JournalStore::new(tmp.path(), 0);

    let doc = MonthDoc {
        days: vec![DayEntry {
            day: 14,
            text: Some("sealed".into()),
            ..Default::default()
        }],
        ..Default::default()
    };
    store.write_month(1, 2022, 6, &doc).await.unwrap();
    store.write_month(1, 2022, 11, &doc).await.unwrap();
    store.write_month(1, 2024, 3, &doc).await.unwrap();

    assert!(tmp.path().join("1/2022/06.json").exists());
    assert!(tmp.path().join("1/2022/11.json").exists());
    assert!(tmp.path().join("1/2024/03.json").exists());

    let back = store.get_month(1, 2022, 6).await.unwrap();
    assert_eq!(back.day(14).unwrap().text.as_deref(), Some("sealed"));

    // other users see nothing
    assert!(store.get_month(2, 2022, 6).await.unwrap().days.is_empty());
}

#[tokio::test]
async fn files_and_settings() {
    let tmp = TempDir::new().unwrap();
    let store = JournalStore::new(tmp.path(), 0);

    store.write_file(3, "abc_DEF-1", b"\x00\x01").await.unwrap();
    assert_eq!(store.read_file(3, "abc_DEF-1").await.unwrap(), b"\x00\x01");
    assert!(store.read_file(3, "../../etc/passwd").await.is_err());
    store.remove_file(3, "abc_DEF-1").await.unwrap();
    assert!(store.read_file(3, "abc_DEF-1").await.is_err());

    assert!(store.get_settings(3).await.unwrap().is_none());
    store.write_settings(3, "sealed-settings").await.unwrap();
    assert_eq!(
        store.get_settings(3).await.unwrap().as_deref(),
        Some("sealed-settings")
    );
}

#[tokio::test]
async fn access_log_is_capped() {
    let tmp = TempDir::new().unwrap();
    let store = JournalStore::new(tmp.path(), 0);

    for i in 0..7 {
        let entry = AccessLogEntry::now("bob@example.org", "10.0.0.1", "access", &format!("/p{i}"));
        store.append_access_log(5, entry, 5).await.unwrap();
    }
    let logs = store.get_access_log(5).await.unwrap();
    assert_eq!(logs.len(), 5);
    assert_eq!(logs[0].path, "/p2");
    assert_eq!(logs[4].path, "/p6");

    store.clear_access_log(5).await.unwrap();
    assert!(store.get_access_log(5).await.unwrap().is_empty());
}

#[tokio::test]
async fn templates_pretty_printed_with_indent() {
    let tmp = TempDir::new().unwrap();
    let store = JournalStore::new(tmp.path(), 4);

    let doc: TemplatesDoc =
        serde_json::from_str(r#"{"templates":[{"name":"n","text":"t"}]}"#).unwrap();
    store.write_templates(9, &doc).await.unwrap();

    let raw = std::fs::read_to_string(tmp.path().join("9/templates.json")).unwrap();
    assert!(raw.contains("\n    \"templates\""));
    assert_eq!(store.get_templates(9).await.unwrap().templates[0].name, "n");
}
