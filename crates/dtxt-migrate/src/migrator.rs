//! Per-user v1 → v2 re-keying
//!
//! Reads everything from `old/`, writes the new tree under the reserved v2
//! id, and inserts the registry record last. The `old/` tree is never
//! modified.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use dtxt_core::{DtxtError, DtxtResult, UserId};
use dtxt_crypto::legacy::{fernet_decrypt, fernet_decrypt_text, legacy_key, verify_legacy_password};
use dtxt_crypto::{derive_key, encrypt_file, encrypt_text, hash_password, wrap_key, KdfParams, Key32};
use dtxt_store::journal::{FILES_DIR, SETTINGS_FILE, TAGS_FILE, TEMPLATES_FILE};
use dtxt_store::{fsio, DayEntry, JournalStore, MonthDoc, RegistryStore, TagsDoc, TemplatesDoc, UserRecord};
use secrecy::{ExposeSecret, SecretString};

use crate::legacy::{self, LegacyUser};
use crate::progress::{MigrationGuard, MigrationPhase, MigrationTracker, PROGRESS_EVERY};

pub struct Migrator {
    data_path: PathBuf,
    registry: Arc<RegistryStore>,
    journal: Arc<JournalStore>,
    kdf: KdfParams,
    tracker: MigrationTracker,
}

/// One month file read from the legacy tree.
struct MonthJob {
    year: i32,
    month: u32,
    doc: MonthDoc,
}

/// Counters shared by the data phases.
struct Run<'a> {
    guard: &'a MigrationGuard,
    old_dek: Key32,
    new_dek: Key32,
    errors: usize,
}

impl Run<'_> {
    fn fail(&mut self, what: &str, err: impl std::fmt::Display) {
        self.errors += 1;
        tracing::warn!(item = what, "migration item skipped: {err}");
    }
}

impl Migrator {
    pub fn new(
        data_path: impl Into<PathBuf>,
        registry: Arc<RegistryStore>,
        journal: Arc<JournalStore>,
        kdf: KdfParams,
        tracker: MigrationTracker,
    ) -> Self {
        Self {
            data_path: data_path.into(),
            registry,
            journal,
            kdf,
            tracker,
        }
    }

    pub fn tracker(&self) -> &MigrationTracker {
        &self.tracker
    }

    /// Exact lookup in `old/users.json`.
    pub async fn legacy_user(&self, username: &str) -> DtxtResult<Option<LegacyUser>> {
        legacy::find_legacy_user(&self.data_path, username).await
    }

    /// Migrate `username` and return the new v2 id.
    ///
    /// A wrong password or an unreadable legacy key aborts before anything
    /// is written. Later per-item failures are counted and skipped.
    pub async fn migrate(&self, username: &str, password: &SecretString) -> DtxtResult<UserId> {
        let guard = self.tracker.begin(username)?;

        let old = self
            .legacy_user(username)
            .await?
            .ok_or(DtxtError::UserNotFound)?;

        if !verify_legacy_password(password.expose_secret(), &old.password) {
            return Err(DtxtError::unauthorized("legacy password mismatch"));
        }

        let old_dek = legacy_key(password.expose_secret(), &old.salt)
            .and_then(|kek| fernet_decrypt_text(&old.enc_enc_key, &kek))
            .and_then(|encoded| Key32::from_urlsafe_b64(encoded.trim()))
            .map_err(|e| DtxtError::Migration(format!("legacy key unreadable: {e}")))?;

        if self.registry.find_by_username_ci(username).await?.is_some() {
            return Err(DtxtError::UsernameTaken);
        }

        guard.report(MigrationPhase::CreatingNewUser, 0, 0, 0);
        let record = hash_password(password, &self.kdf)?;
        let derived = derive_key(password, &record.salt, &self.kdf)?;
        let new_dek = Key32::generate();
        let sealed_dek = wrap_key(&derived, &new_dek)?;

        let new_id = self.registry.reserve_id(Some(old.user_id)).await?;
        tracing::info!(
            username = %username,
            legacy_id = old.user_id,
            user_id = new_id,
            "migrating legacy user"
        );

        let mut run = Run {
            guard: &guard,
            old_dek,
            new_dek,
            errors: 0,
        };
        let old_dir = legacy::old_root(&self.data_path).join(old.user_id.to_string());

        guard.report(MigrationPhase::WritingUserData, 0, 1, 0);
        self.migrate_settings(&old_dir, new_id, &mut run).await;

        guard.report(MigrationPhase::MigratingTemplates, 0, 2, run.errors);
        self.copy_templates_and_tags(&old_dir, new_id, &mut run).await;

        let mut months = self.migrate_logs(&old_dir, &mut run).await?;
        self.migrate_files(new_id, &mut months, &mut run).await;

        for job in &months {
            if let Err(e) = self
                .journal
                .write_month(new_id, job.year, job.month, &job.doc)
                .await
            {
                run.fail(&format!("{:04}/{:02}", job.year, job.month), e);
            }
        }

        let user = UserRecord::new(
            new_id,
            old.username.clone(),
            record.verifier,
            record.salt,
            sealed_dek,
        );
        self.registry.insert_user(user).await?;

        guard.report(MigrationPhase::Completed, 0, 0, run.errors);
        tracing::info!(
            username = %username,
            user_id = new_id,
            error_count = run.errors,
            "migration completed"
        );
        Ok(new_id)
    }

    async fn migrate_settings(&self, old_dir: &Path, new_id: UserId, run: &mut Run<'_>) {
        let path = old_dir.join(SETTINGS_FILE);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => return run.fail("settings", e),
        };

        let sealed = fernet_decrypt_text(raw.trim(), &run.old_dek)
            .and_then(|plain| encrypt_text(&plain, &run.new_dek));
        match sealed {
            Ok(sealed) => {
                if let Err(e) = self.journal.write_settings(new_id, &sealed).await {
                    run.fail("settings", e);
                }
            }
            Err(e) => run.fail("settings", e),
        }
    }

    /// Templates and tags were never encrypted by v1; they are copied through
    /// the typed documents so unknown fields survive.
    async fn copy_templates_and_tags(&self, old_dir: &Path, new_id: UserId, run: &mut Run<'_>) {
        match fsio::read_json::<TemplatesDoc>(&old_dir.join(TEMPLATES_FILE)).await {
            Ok(Some(doc)) => {
                if let Err(e) = self.journal.write_templates(new_id, &doc).await {
                    run.fail("templates", e);
                }
            }
            Ok(None) => {}
            Err(e) => run.fail("templates", e),
        }
        run.guard
            .report(MigrationPhase::MigratingTemplates, 1, 2, run.errors);

        match fsio::read_json::<TagsDoc>(&old_dir.join(TAGS_FILE)).await {
            Ok(Some(doc)) => {
                if let Err(e) = self.journal.write_tags(new_id, &doc).await {
                    run.fail("tags", e);
                }
            }
            Ok(None) => {}
            Err(e) => run.fail("tags", e),
        }
        run.guard
            .report(MigrationPhase::MigratingTemplates, 2, 2, run.errors);
    }

    /// Re-encrypt every day of every month in memory. Writing happens after
    /// the file phase has rewritten the attachment references.
    async fn migrate_logs(&self, old_dir: &Path, run: &mut Run<'_>) -> DtxtResult<Vec<MonthJob>> {
        let paths = list_month_files(old_dir).await?;
        let total = paths.len();
        run.guard
            .report(MigrationPhase::MigratingLogs, 0, total, run.errors);

        let mut months = Vec::with_capacity(total);
        for (i, (year, month, path)) in paths.into_iter().enumerate() {
            match fsio::read_json::<MonthDoc>(&path).await {
                Ok(Some(mut doc)) => {
                    for day in &mut doc.days {
                        reencrypt_day(day, run, &format!("{year:04}/{month:02}"));
                    }
                    months.push(MonthJob { year, month, doc });
                }
                Ok(None) => {}
                Err(e) => run.fail(&format!("{year:04}/{month:02}"), e),
            }
            if (i + 1) % PROGRESS_EVERY == 0 {
                run.guard
                    .report(MigrationPhase::MigratingLogs, i + 1, total, run.errors);
            }
        }
        run.guard
            .report(MigrationPhase::MigratingLogs, total, total, run.errors);
        Ok(months)
    }

    async fn migrate_files(&self, new_id: UserId, months: &mut [MonthJob], run: &mut Run<'_>) {
        let old_files = legacy::old_root(&self.data_path).join(FILES_DIR);
        let total: usize = months
            .iter()
            .flat_map(|m| &m.doc.days)
            .map(|d| d.files.iter().filter(|f| !f.uuid_filename.is_empty()).count())
            .sum();
        run.guard
            .report(MigrationPhase::MigratingFiles, 0, total, run.errors);

        let mut processed = 0;
        for job in months.iter_mut() {
            for day in &mut job.doc.days {
                for file in &mut day.files {
                    if file.uuid_filename.is_empty() {
                        continue;
                    }
                    let old_uuid = file.uuid_filename.clone();
                    match self
                        .migrate_one_file(new_id, &old_files.join(&old_uuid), run)
                        .await
                    {
                        Ok((new_uuid, size)) => {
                            file.uuid_filename = new_uuid;
                            file.size = Some(size);
                            file.extra.remove("id");
                            if let Some(name) = file.enc_filename.take() {
                                match fernet_decrypt_text(&name, &run.old_dek)
                                    .and_then(|plain| encrypt_text(&plain, &run.new_dek))
                                {
                                    Ok(sealed) => {
                                        file.enc_filename = Some(sealed);
                                        file.extra.remove("name");
                                    }
                                    Err(e) => {
                                        file.enc_filename = Some(name);
                                        run.fail(&old_uuid, e);
                                    }
                                }
                            }
                        }
                        Err(e) => run.fail(&old_uuid, e),
                    }

                    processed += 1;
                    if processed % PROGRESS_EVERY == 0 {
                        run.guard.report(
                            MigrationPhase::MigratingFiles,
                            processed,
                            total,
                            run.errors,
                        );
                    }
                }
            }
        }
        run.guard
            .report(MigrationPhase::MigratingFiles, processed, total, run.errors);
    }

    async fn migrate_one_file(
        &self,
        new_id: UserId,
        old_path: &Path,
        run: &Run<'_>,
    ) -> DtxtResult<(String, u64)> {
        let token = tokio::fs::read_to_string(old_path).await?;
        let plain = fernet_decrypt(token.trim(), &run.old_dek)?;
        let sealed = encrypt_file(&plain, &run.new_dek)?;
        let new_uuid = URL_SAFE_NO_PAD.encode(uuid::Uuid::now_v7().as_bytes());
        self.journal.write_file(new_id, &new_uuid, &sealed).await?;
        Ok((new_uuid, plain.len() as u64))
    }
}

/// v1 day: `text` is a Fernet token, `date_written` is plaintext.
fn reencrypt_day(day: &mut DayEntry, run: &mut Run<'_>, month: &str) {
    let label = format!("{month}/{:02}", day.day);
    if let Some(text) = day.text.take() {
        match reencrypt_legacy_text(&text, run) {
            Ok(sealed) => day.text = Some(sealed),
            Err(e) => {
                day.text = Some(text);
                run.fail(&label, e);
            }
        }
    }
    if let Some(written) = day.date_written.take() {
        match encrypt_text(&written, &run.new_dek) {
            Ok(sealed) => day.date_written = Some(sealed),
            Err(e) => {
                day.date_written = Some(written);
                run.fail(&label, e);
            }
        }
    }
    for item in &mut day.history {
        if let Some(text) = item.text.take() {
            match reencrypt_legacy_text(&text, run) {
                Ok(sealed) => item.text = Some(sealed),
                Err(e) => {
                    item.text = Some(text);
                    run.fail(&label, e);
                }
            }
        }
        if let Some(written) = item.date_written.take() {
            match encrypt_text(&written, &run.new_dek) {
                Ok(sealed) => item.date_written = Some(sealed),
                Err(e) => {
                    item.date_written = Some(written);
                    run.fail(&label, e);
                }
            }
        }
    }
}

fn reencrypt_legacy_text(token: &str, run: &Run<'_>) -> DtxtResult<String> {
    let plain = if token.is_empty() {
        String::new()
    } else {
        fernet_decrypt_text(token, &run.old_dek)?
    };
    Ok(encrypt_text(&plain, &run.new_dek)?)
}

/// `<old_dir>/<YYYY>/<MM>.json`, sorted by year then month.
async fn list_month_files(old_dir: &Path) -> DtxtResult<Vec<(i32, u32, PathBuf)>> {
    let mut out = Vec::new();
    let mut years = match tokio::fs::read_dir(old_dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e.into()),
    };

    while let Some(year_entry) = years.next_entry().await? {
        let Some(year) = year_entry
            .file_name()
            .to_str()
            .filter(|n| n.len() == 4)
            .and_then(|n| n.parse::<i32>().ok())
        else {
            continue;
        };
        if !year_entry.file_type().await?.is_dir() {
            continue;
        }

        let mut months = tokio::fs::read_dir(year_entry.path()).await?;
        while let Some(month_entry) = months.next_entry().await? {
            let name = month_entry.file_name();
            let Some(month) = name
                .to_str()
                .and_then(|n| n.strip_suffix(".json"))
                .and_then(|n| n.parse::<u32>().ok())
                .filter(|m| (1..=12).contains(m))
            else {
                continue;
            };
            out.push((year, month, month_entry.path()));
        }
    }
    out.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_month_files_skips_noise() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("2023")).unwrap();
        std::fs::create_dir_all(root.join("2022")).unwrap();
        std::fs::create_dir_all(root.join("files")).unwrap();
        std::fs::write(root.join("2023/01.json"), "{}").unwrap();
        std::fs::write(root.join("2022/11.json"), "{}").unwrap();
        std::fs::write(root.join("2022/06.json"), "{}").unwrap();
        std::fs::write(root.join("2022/13.json"), "{}").unwrap();
        std::fs::write(root.join("2022/notes.txt"), "").unwrap();
        std::fs::write(root.join("templates.json"), "{}").unwrap();

        let found: Vec<(i32, u32)> = list_month_files(root)
            .await
            .unwrap()
            .into_iter()
            .map(|(y, m, _)| (y, m))
            .collect();
        assert_eq!(found, vec![(2022, 6), (2022, 11), (2023, 1)]);

        assert!(list_month_files(&root.join("missing")).await.unwrap().is_empty());
    }
}
