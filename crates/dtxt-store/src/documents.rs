//! Per-user journal documents. String fields marked `enc` hold string
//! envelopes; everything else is plaintext metadata.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `<YYYY>/<MM>.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonthDoc {
    #[serde(default)]
    pub days: Vec<DayEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MonthDoc {
    pub fn day(&self, day: u32) -> Option<&DayEntry> {
        self.days.iter().find(|d| d.day == day)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DayEntry {
    pub day: u32,
    /// enc
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// enc
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_written: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Value>,
    #[serde(
        rename = "isBookmarked",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub is_bookmarked: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DayEntry {
    pub fn bookmarked(&self) -> bool {
        self.is_bookmarked.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// enc
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// enc
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_written: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Attachment reference inside a day.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileRecord {
    #[serde(default)]
    pub uuid_filename: String,
    /// enc
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enc_filename: Option<String>,
    /// Plaintext size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `tags.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagsDoc {
    #[serde(default)]
    pub next_id: u64,
    #[serde(default)]
    pub tags: Vec<StoredTag>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A tag as persisted: every descriptive field is a string envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTag {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub icon: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `templates.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplatesDoc {
    #[serde(default)]
    pub templates: Vec<StoredTemplate>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTemplate {
    /// enc
    pub name: String,
    /// enc
    #[serde(default)]
    pub text: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One line of `share_access_log.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    /// RFC 3339
    pub timestamp: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub ip: String,
    pub event: String,
    #[serde(default)]
    pub path: String,
}

impl AccessLogEntry {
    pub fn now(email: &str, ip: &str, event: &str, path: &str) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            email: email.to_string(),
            ip: ip.to_string(),
            event: event.to_string(),
            path: path.to_string(),
        }
    }
}
