//! Integration tests: share tokens, e-mail verification and shared reads

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dtxt_auth::{Mailer, ShareService};
use dtxt_core::config::ShareConfig;
use dtxt_core::{DtxtError, DtxtResult, SmtpSettings};
use dtxt_crypto::{encrypt_file, encrypt_text, wrap_key, Key32};
use dtxt_store::{DayEntry, FileRecord, JournalStore, MonthDoc, RegistryStore, UserRecord};
use tempfile::TempDir;

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<(String, String, String)>>,
    fail: bool,
}

impl RecordingMailer {
    fn last_code(&self) -> String {
        let sent = self.sent.lock().unwrap();
        let (_, _, body) = sent.last().expect("no mail sent");
        body.split("code is: ")
            .nth(1)
            .unwrap()
            .chars()
            .take(6)
            .collect()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(
        &self,
        _settings: &SmtpSettings,
        to: &str,
        subject: &str,
        body: &str,
    ) -> DtxtResult<()> {
        if self.fail {
            return Err(DtxtError::Smtp("connection refused".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string(), body.to_string()));
        Ok(())
    }
}

struct Fixture {
    _tmp: TempDir,
    registry: Arc<RegistryStore>,
    journal: Arc<JournalStore>,
    mailer: Arc<RecordingMailer>,
    share: ShareService,
    user_id: u64,
    derived: Key32,
    dek: Key32,
}

async fn fixture_with(mailer: RecordingMailer) -> Fixture {
    let tmp = TempDir::new().unwrap();
    let registry = Arc::new(RegistryStore::new(tmp.path(), 0));
    let journal = Arc::new(JournalStore::new(tmp.path(), 0));

    let derived = Key32::generate();
    let dek = Key32::generate();
    let sealed = wrap_key(&derived, &dek).unwrap();
    let user_id = registry
        .create_user("alice", |id| {
            UserRecord::new(id, "alice", "v".into(), "s".into(), sealed)
        })
        .await
        .unwrap();

    let mailer = Arc::new(mailer);
    let share = ShareService::new(
        registry.clone(),
        journal.clone(),
        mailer.clone(),
        SmtpSettings::default(),
        b"process-secret",
        &ShareConfig::default(),
    );
    Fixture {
        _tmp: tmp,
        registry,
        journal,
        mailer,
        share,
        user_id,
        derived,
        dek,
    }
}

async fn fixture() -> Fixture {
    fixture_with(RecordingMailer::default()).await
}

async fn enable_2fa(f: &Fixture) {
    f.share
        .save_smtp(
            f.user_id,
            SmtpSettings {
                host: "smtp.example.org".into(),
                from: "journal@example.org".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    f.share
        .save_whitelist(f.user_id, &["Bob@Example.org ".to_string()])
        .await
        .unwrap();
}

async fn seed_march(f: &Fixture) {
    let doc = MonthDoc {
        days: vec![
            DayEntry {
                day: 2,
                text: Some(encrypt_text("first entry", &f.dek).unwrap()),
                date_written: Some(encrypt_text("02.03.2024 20:00", &f.dek).unwrap()),
                is_bookmarked: Some(true),
                ..Default::default()
            },
            DayEntry {
                day: 9,
                files: vec![FileRecord {
                    uuid_filename: "file-1".into(),
                    enc_filename: Some(encrypt_text("cat.jpg", &f.dek).unwrap()),
                    size: Some(4),
                    ..Default::default()
                }],
                ..Default::default()
            },
            DayEntry {
                day: 20,
                ..Default::default()
            },
        ],
        ..Default::default()
    };
    f.journal.write_month(f.user_id, 2024, 3, &doc).await.unwrap();
    f.journal
        .write_file(f.user_id, "file-1", &encrypt_file(b"meow", &f.dek).unwrap())
        .await
        .unwrap();
}

#[tokio::test]
async fn share_read_then_revoke() {
    let f = fixture().await;
    seed_march(&f).await;

    let token = f.share.generate(f.user_id, &f.derived).await.unwrap();
    assert!(f.share.has_token(f.user_id).await.unwrap());

    let access = f.share.validate_token(&token).await.unwrap();
    assert_eq!(access.user_id, f.user_id);
    assert!(f.share.check_verified(&access, None, None).await.unwrap().is_none());

    let days = f.share.month_for_reading(&access, 2024, 3).await.unwrap();
    assert_eq!(days.len(), 2);
    assert_eq!(days[0]["text"], "first entry");
    assert_eq!(days[0]["date_written"], "02.03.2024 20:00");
    assert_eq!(days[1]["files"][0]["filename"], "cat.jpg");
    assert_eq!(days[1]["files"][0]["uuid_filename"], "file-1");
    assert!(days[1].get("text").is_none());

    let marked = f.share.marked_days(&access, 2024, 3).await.unwrap();
    assert_eq!(marked.days_with_logs, vec![2]);
    assert_eq!(marked.days_with_files, vec![9]);
    assert_eq!(marked.days_bookmarked, vec![2]);

    assert_eq!(f.share.download_file(&access, "file-1").await.unwrap(), b"meow");

    f.share.revoke(f.user_id).await.unwrap();
    assert!(f.share.validate_token(&token).await.unwrap_err().is_auth_failure());
}

#[tokio::test]
async fn token_hash_alone_does_not_open() {
    let f = fixture().await;
    let token = f.share.generate(f.user_id, &f.derived).await.unwrap();
    let record = f.registry.require(f.user_id).await.unwrap().share_token.unwrap();

    assert!(f.share.validate_token(&record.token_hash).await.is_err());
    assert!(f.share.validate_token("not base64 !!").await.is_err());
    assert!(f.share.validate_token("").await.is_err());

    // a new token replaces the old one
    let newer = f.share.generate(f.user_id, &f.derived).await.unwrap();
    assert!(f.share.validate_token(&token).await.is_err());
    assert!(f.share.validate_token(&newer).await.is_ok());
}

#[tokio::test]
async fn email_verification_flow() {
    let f = fixture().await;
    seed_march(&f).await;
    let token = f.share.generate(f.user_id, &f.derived).await.unwrap();
    let access = f.share.validate_token(&token).await.unwrap();

    // without SMTP and whitelist nothing is required
    assert!(matches!(
        f.share.request_code(&access, "bob@example.org").await,
        Err(DtxtError::VerificationNotConfigured)
    ));

    enable_2fa(&f).await;
    let status = f.share.verification_status(&access, None).await.unwrap();
    assert!(status.required && !status.verified);
    assert!(matches!(
        f.share.check_verified(&access, None, None).await,
        Err(DtxtError::VerificationRequired)
    ));

    assert!(matches!(
        f.share.request_code(&access, "mallory@x.org").await,
        Err(DtxtError::EmailNotAllowed)
    ));
    assert!(matches!(
        f.share.request_code(&access, "bob").await,
        Err(DtxtError::InvalidEmail)
    ));

    f.share.request_code(&access, " BOB@example.org").await.unwrap();
    let code = f.mailer.last_code();
    assert_eq!(code.len(), 6);
    {
        let sent = f.mailer.sent.lock().unwrap();
        assert_eq!(sent[0].0, "bob@example.org");
        assert_eq!(sent[0].1, "DailyTxT share verification code");
    }

    assert!(matches!(
        f.share.verify_code(&access, "bob@example.org", "").await,
        Err(DtxtError::InvalidInput(_))
    ));
    let wrong = if code == "000000" { "111111" } else { "000000" };
    assert!(matches!(
        f.share.verify_code(&access, "bob@example.org", wrong).await,
        Err(DtxtError::InvalidCode)
    ));

    let (cookie, _) = f
        .share
        .verify_code(&access, "bob@example.org", &code)
        .await
        .unwrap();
    // consumed
    assert!(f
        .share
        .verify_code(&access, "bob@example.org", &code)
        .await
        .is_err());

    let email = f
        .share
        .check_verified(&access, Some(&cookie), Some("bob@example.org"))
        .await
        .unwrap();
    assert_eq!(email.as_deref(), Some("bob@example.org"));
    assert!(f
        .share
        .verification_status(&access, Some(&cookie))
        .await
        .unwrap()
        .verified);

    assert!(matches!(
        f.share
            .check_verified(&access, Some(&cookie), Some("mallory@x"))
            .await,
        Err(DtxtError::VerificationRequired)
    ));

    // dropping the address from the whitelist invalidates its cookie
    f.share
        .save_whitelist(f.user_id, &["carol@example.org".to_string()])
        .await
        .unwrap();
    assert!(f
        .share
        .check_verified(&access, Some(&cookie), None)
        .await
        .is_err());
}

#[tokio::test]
async fn cookie_is_bound_to_its_token() {
    let f = fixture().await;
    enable_2fa(&f).await;
    let token = f.share.generate(f.user_id, &f.derived).await.unwrap();
    let access = f.share.validate_token(&token).await.unwrap();

    f.share.request_code(&access, "bob@example.org").await.unwrap();
    let code = f.mailer.last_code();
    let (cookie, _) = f
        .share
        .verify_code(&access, "bob@example.org", &code)
        .await
        .unwrap();

    let rotated = f.share.generate(f.user_id, &f.derived).await.unwrap();
    let new_access = f.share.validate_token(&rotated).await.unwrap();
    assert!(f
        .share
        .check_verified(&new_access, Some(&cookie), None)
        .await
        .is_err());
}

#[tokio::test]
async fn send_failure_surfaces() {
    let f = fixture_with(RecordingMailer {
        fail: true,
        ..Default::default()
    })
    .await;
    enable_2fa(&f).await;
    let token = f.share.generate(f.user_id, &f.derived).await.unwrap();
    let access = f.share.validate_token(&token).await.unwrap();

    assert!(matches!(
        f.share.request_code(&access, "bob@example.org").await,
        Err(DtxtError::Smtp(_))
    ));
    assert!(matches!(
        f.share
            .test_smtp(f.user_id, "bob@example.org", SmtpSettings::default())
            .await,
        Err(DtxtError::Smtp(_))
    ));
}

#[tokio::test]
async fn whitelist_and_smtp_settings_validation() {
    let f = fixture().await;

    let saved = f
        .share
        .save_whitelist(
            f.user_id,
            &[
                "A@x.org".to_string(),
                " a@x.org".to_string(),
                "".to_string(),
                "b@x.org".to_string(),
            ],
        )
        .await
        .unwrap();
    assert_eq!(saved, vec!["a@x.org", "b@x.org"]);
    assert!(f
        .share
        .save_whitelist(f.user_id, &["nope".to_string()])
        .await
        .is_err());
    assert_eq!(f.share.whitelist(f.user_id).await.unwrap(), saved);

    assert!(f
        .share
        .save_smtp(
            f.user_id,
            SmtpSettings {
                host: "smtp.example.org".into(),
                ..Default::default()
            }
        )
        .await
        .is_err());

    let stored = f
        .share
        .save_smtp(
            f.user_id,
            SmtpSettings {
                host: " smtp.example.org ".into(),
                port: 0,
                password: "hunter2".into(),
                from: "Journal@Example.org".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.port, 587);
    assert_eq!(stored.from, "journal@example.org");

    let view = f.share.smtp_view(f.user_id).await.unwrap();
    assert!(!view.using_global_default);
    assert_eq!(view.effective_settings.host, "smtp.example.org");
    assert_eq!(view.settings.unwrap().password, "********");

    // both empty clears the override
    assert!(f
        .share
        .save_smtp(f.user_id, SmtpSettings::default())
        .await
        .unwrap()
        .is_none());
    assert!(f.share.smtp_view(f.user_id).await.unwrap().using_global_default);
}

#[tokio::test]
async fn user_smtp_replaces_global_as_a_whole() {
    let f = fixture().await;
    let global = SmtpSettings {
        host: "mail.global.org".into(),
        port: 465,
        username: "global-user".into(),
        password: "global-pw".into(),
        from: "noreply@global.org".into(),
    };
    let share = ShareService::new(
        f.registry.clone(),
        f.journal.clone(),
        f.mailer.clone(),
        global,
        b"process-secret",
        &ShareConfig::default(),
    );

    let (effective, using_global) = share.effective_smtp(f.user_id).await.unwrap();
    assert!(using_global);
    assert_eq!(effective.username, "global-user");

    share
        .save_smtp(
            f.user_id,
            SmtpSettings {
                host: "smtp.example.org".into(),
                from: "journal@example.org".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // blank user fields are not filled in from the global record
    let (effective, using_global) = share.effective_smtp(f.user_id).await.unwrap();
    assert!(!using_global);
    assert_eq!(effective.host, "smtp.example.org");
    assert_eq!(effective.port, 587);
    assert!(effective.username.is_empty());
    assert!(effective.password.is_empty());
}

#[tokio::test]
async fn access_log_records_events() {
    let f = fixture().await;
    f.share
        .log_access(f.user_id, "bob@example.org", "10.0.0.1", "access", "/api/shared/x")
        .await;
    let logs = f.share.access_logs(f.user_id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].event, "access");

    f.share.clear_access_logs(f.user_id).await.unwrap();
    assert!(f.share.access_logs(f.user_id).await.unwrap().is_empty());
}
