//! dtxt-store: on-disk state for dailytxt
//!
//! [`RegistryStore`] owns `users.json`; [`JournalStore`] owns the per-user
//! trees. Both write atomically and keep their own locks.

pub mod documents;
pub mod fsio;
pub mod journal;
pub mod model;
pub mod registry;

pub use documents::{
    AccessLogEntry, DayEntry, FileRecord, HistoryEntry, MonthDoc, StoredTag, StoredTemplate,
    TagsDoc, TemplatesDoc,
};
pub use journal::JournalStore;
pub use model::{BackupCodeRecord, Registry, ShareTokenRecord, UserRecord, UserSummary};
pub use registry::RegistryStore;
