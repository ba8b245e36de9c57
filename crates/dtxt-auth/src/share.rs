//! Share tokens, the optional e-mail second factor, and read-only access to
//! a sharer's journal.
//!
//! A share token is a bearer secret. The server keeps only its hash and the
//! sharer's derived key sealed under the token itself, so a leaked registry
//! does not open anything.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dtxt_core::config::ShareConfig;
use dtxt_core::{DtxtError, DtxtResult, SmtpSettings, UserId, DEFAULT_SMTP_PORT};
use dtxt_crypto::{decrypt_file, decrypt_text, encrypt_text, new_secret_token, token_hash, Key32};
use dtxt_store::{AccessLogEntry, JournalStore, RegistryStore};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::keys::KeyService;
use crate::mail::{verification_body, Mailer, TEST_BODY, TEST_SUBJECT, VERIFICATION_SUBJECT};
use crate::verification::{generate_code, is_valid_email, normalize_email, CodeStore, CookieSigner};

pub const EVENT_CODE_REQUESTED: &str = "code_requested";
pub const EVENT_VERIFIED: &str = "verified";
pub const EVENT_ACCESS: &str = "access";

/// A validated share token: whose journal it opens and with which key.
pub struct ShareAccess {
    pub user_id: UserId,
    pub token_hash: String,
    derived: Key32,
}

impl std::fmt::Debug for ShareAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareAccess")
            .field("user_id", &self.user_id)
            .field("token_hash", &self.token_hash)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VerificationStatus {
    pub required: bool,
    pub verified: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MarkedDays {
    pub days_with_logs: Vec<u32>,
    pub days_with_files: Vec<u32>,
    pub days_bookmarked: Vec<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SmtpView {
    pub settings: Option<SmtpSettings>,
    pub effective_settings: SmtpSettings,
    pub using_global_default: bool,
}

pub struct ShareService {
    registry: Arc<RegistryStore>,
    journal: Arc<JournalStore>,
    keys: KeyService,
    mailer: Arc<dyn Mailer>,
    global_smtp: SmtpSettings,
    codes: CodeStore,
    cookies: CookieSigner,
    cookie_days: i64,
    access_log_limit: usize,
}

/// Trim every field, lowercase the sender and default the port.
pub fn normalize_smtp(mut settings: SmtpSettings) -> SmtpSettings {
    settings.host = settings.host.trim().to_string();
    settings.username = settings.username.trim().to_string();
    settings.from = normalize_email(&settings.from);
    if settings.port == 0 {
        settings.port = DEFAULT_SMTP_PORT;
    }
    settings
}

impl ShareService {
    pub fn new(
        registry: Arc<RegistryStore>,
        journal: Arc<JournalStore>,
        mailer: Arc<dyn Mailer>,
        global_smtp: SmtpSettings,
        secret: &[u8],
        config: &ShareConfig,
    ) -> Self {
        Self {
            keys: KeyService::new(registry.clone()),
            registry,
            journal,
            mailer,
            global_smtp: normalize_smtp(global_smtp),
            codes: CodeStore::new(config.code_ttl_minutes),
            cookies: CookieSigner::new(secret),
            cookie_days: config.cookie_days,
            access_log_limit: config.access_log_limit,
        }
    }

    // --- token lifecycle (authenticated) ---

    /// Create a token for `user_id`, replacing any previous one. The raw
    /// token is returned once and never stored.
    pub async fn generate(&self, user_id: UserId, derived: &Key32) -> DtxtResult<String> {
        let token = new_secret_token();
        let hash = token_hash(&token)?;
        let token_key = Key32::from_urlsafe_b64(&token)?;
        let sealed = encrypt_text(&derived.to_std_b64(), &token_key)?;
        self.registry.save_share_token(user_id, hash, sealed).await?;
        tracing::info!(user_id, "share token generated");
        Ok(token)
    }

    pub async fn revoke(&self, user_id: UserId) -> DtxtResult<()> {
        self.registry.delete_share_token(user_id).await?;
        tracing::info!(user_id, "share token revoked");
        Ok(())
    }

    pub async fn has_token(&self, user_id: UserId) -> DtxtResult<bool> {
        self.registry.has_share_token(user_id).await
    }

    /// Resolve a presented token. Every failure is `Unauthorized`.
    pub async fn validate_token(&self, token: &str) -> DtxtResult<ShareAccess> {
        let token = token.trim();
        if token.is_empty() {
            return Err(DtxtError::unauthorized("missing share token"));
        }
        let hash = token_hash(token).map_err(|_| DtxtError::unauthorized("malformed share token"))?;
        let (user_id, sealed) = self.registry.get_user_by_share_token_hash(&hash).await?;

        let derived = Key32::from_urlsafe_b64(token)
            .and_then(|key| decrypt_text(&sealed, &key))
            .and_then(|encoded| Key32::from_std_b64(&encoded))
            .map_err(|e| {
                tracing::warn!(user_id, "share token did not open its derived key: {e}");
                DtxtError::unauthorized("share token does not open")
            })?;

        Ok(ShareAccess {
            user_id,
            token_hash: hash,
            derived,
        })
    }

    // --- e-mail second factor ---

    /// Returns the settings and whether they are the global default.
    pub async fn effective_smtp(&self, user_id: UserId) -> DtxtResult<(SmtpSettings, bool)> {
        match self.registry.get_smtp_settings(user_id).await? {
            Some(own) if own.is_configured() => Ok((normalize_smtp(own), false)),
            _ => Ok((self.global_smtp.clone(), true)),
        }
    }

    /// 2FA applies iff mail can be sent and the whitelist is non-empty.
    pub async fn verification_required(&self, user_id: UserId) -> DtxtResult<bool> {
        let (smtp, _) = self.effective_smtp(user_id).await?;
        if !smtp.is_configured() {
            return Ok(false);
        }
        Ok(!self.registry.get_share_email_whitelist(user_id).await?.is_empty())
    }

    async fn is_whitelisted(&self, user_id: UserId, email: &str) -> DtxtResult<bool> {
        Ok(self
            .registry
            .get_share_email_whitelist(user_id)
            .await?
            .iter()
            .any(|allowed| normalize_email(allowed) == email))
    }

    /// E-mail a fresh code to a whitelisted address.
    pub async fn request_code(&self, access: &ShareAccess, email: &str) -> DtxtResult<()> {
        if !self.verification_required(access.user_id).await? {
            return Err(DtxtError::VerificationNotConfigured);
        }
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(DtxtError::InvalidEmail);
        }
        if !self.is_whitelisted(access.user_id, &email).await? {
            tracing::warn!(user_id = access.user_id, "code requested for a non-whitelisted address");
            return Err(DtxtError::EmailNotAllowed);
        }

        let code = generate_code();
        self.codes.store(&access.token_hash, &email, &code);

        let (smtp, _) = self.effective_smtp(access.user_id).await?;
        let body = verification_body(&code, self.codes.ttl_minutes());
        self.mailer
            .send(&smtp, &email, VERIFICATION_SUBJECT, &body)
            .await?;
        tracing::info!(user_id = access.user_id, "share verification code sent");
        Ok(())
    }

    /// Consume a code and return the signed cookie value and its expiry.
    pub async fn verify_code(
        &self,
        access: &ShareAccess,
        email: &str,
        code: &str,
    ) -> DtxtResult<(String, DateTime<Utc>)> {
        if !self.verification_required(access.user_id).await? {
            return Err(DtxtError::VerificationNotConfigured);
        }
        let email = normalize_email(email);
        let code = code.trim();
        if code.is_empty() || !is_valid_email(&email) {
            return Err(DtxtError::InvalidInput("invalid email or code".into()));
        }
        if !self.codes.verify(&access.token_hash, &email, code) {
            tracing::warn!(user_id = access.user_id, "share verification code rejected");
            return Err(DtxtError::InvalidCode);
        }

        let expires = Utc::now() + Duration::days(self.cookie_days);
        let cookie = self.cookies.sign(&access.token_hash, &email, expires)?;
        Ok((cookie, expires))
    }

    /// Gate for share data endpoints. Returns the verified address when 2FA
    /// applies, `None` when it does not.
    ///
    /// The cookie must be bound to this token, its address must still be
    /// whitelisted, and an explicitly requested address must match it.
    pub async fn check_verified(
        &self,
        access: &ShareAccess,
        cookie: Option<&str>,
        requested_email: Option<&str>,
    ) -> DtxtResult<Option<String>> {
        if !self.verification_required(access.user_id).await? {
            return Ok(None);
        }
        let email = cookie
            .and_then(|value| self.cookies.verify(value, &access.token_hash))
            .ok_or(DtxtError::VerificationRequired)?;
        if !self.is_whitelisted(access.user_id, &email).await? {
            return Err(DtxtError::VerificationRequired);
        }
        if let Some(requested) = requested_email.map(normalize_email) {
            if !requested.is_empty() && requested != email {
                return Err(DtxtError::VerificationRequired);
            }
        }
        Ok(Some(email))
    }

    pub async fn verification_status(
        &self,
        access: &ShareAccess,
        cookie: Option<&str>,
    ) -> DtxtResult<VerificationStatus> {
        let required = self.verification_required(access.user_id).await?;
        let verified = !required
            || cookie
                .and_then(|value| self.cookies.verify(value, &access.token_hash))
                .is_some();
        Ok(VerificationStatus { required, verified })
    }

    /// Append to the access log. Failures are logged, never returned.
    pub async fn log_access(&self, user_id: UserId, email: &str, ip: &str, event: &str, path: &str) {
        let entry = AccessLogEntry::now(email, ip, event, path);
        if let Err(e) = self
            .journal
            .append_access_log(user_id, entry, self.access_log_limit)
            .await
        {
            tracing::warn!(user_id, "failed to append share access log: {e}");
        }
    }

    pub async fn access_logs(&self, user_id: UserId) -> DtxtResult<Vec<AccessLogEntry>> {
        self.journal.get_access_log(user_id).await
    }

    pub async fn clear_access_logs(&self, user_id: UserId) -> DtxtResult<()> {
        self.journal.clear_access_log(user_id).await
    }

    // --- verification settings (authenticated) ---

    pub async fn whitelist(&self, user_id: UserId) -> DtxtResult<Vec<String>> {
        self.registry.get_share_email_whitelist(user_id).await
    }

    /// Normalize, validate and dedupe, keeping first-seen order.
    pub async fn save_whitelist(&self, user_id: UserId, emails: &[String]) -> DtxtResult<Vec<String>> {
        let mut cleaned: Vec<String> = Vec::with_capacity(emails.len());
        for raw in emails {
            let email = normalize_email(raw);
            if email.is_empty() {
                continue;
            }
            if !is_valid_email(&email) {
                return Err(DtxtError::InvalidInput(format!("invalid email address: {raw}")));
            }
            if !cleaned.contains(&email) {
                cleaned.push(email);
            }
        }
        self.registry
            .save_share_email_whitelist(user_id, cleaned.clone())
            .await?;
        tracing::info!(user_id, count = cleaned.len(), "share whitelist saved");
        Ok(cleaned)
    }

    pub async fn smtp_view(&self, user_id: UserId) -> DtxtResult<SmtpView> {
        let own = self.registry.get_smtp_settings(user_id).await?;
        let (effective, using_global_default) = self.effective_smtp(user_id).await?;
        Ok(SmtpView {
            settings: own.map(|s| s.redacted()),
            effective_settings: effective.redacted(),
            using_global_default,
        })
    }

    /// Save per-user SMTP settings. Host and sender go together; both empty
    /// clears the override. Returns what was stored.
    pub async fn save_smtp(
        &self,
        user_id: UserId,
        settings: SmtpSettings,
    ) -> DtxtResult<Option<SmtpSettings>> {
        let settings = normalize_smtp(settings);
        let stored = if settings.host.is_empty() && settings.from.is_empty() {
            None
        } else {
            if settings.host.is_empty() || settings.from.is_empty() {
                return Err(DtxtError::InvalidInput(
                    "host and from must both be provided".into(),
                ));
            }
            if !is_valid_email(&settings.from) {
                return Err(DtxtError::InvalidInput("invalid from email address".into()));
            }
            Some(settings)
        };
        self.registry
            .save_smtp_settings(user_id, stored.clone())
            .await?;
        tracing::info!(user_id, configured = stored.is_some(), "share SMTP settings saved");
        Ok(stored)
    }

    /// Send a test mail with `candidate`, or with the effective settings
    /// when no host and sender are given.
    pub async fn test_smtp(
        &self,
        user_id: UserId,
        to_email: &str,
        candidate: SmtpSettings,
    ) -> DtxtResult<()> {
        let to = normalize_email(to_email);
        if !is_valid_email(&to) {
            return Err(DtxtError::InvalidEmail);
        }
        let mut settings = normalize_smtp(candidate);
        if settings.host.is_empty() && settings.from.is_empty() {
            settings = self.effective_smtp(user_id).await?.0;
        }
        self.mailer.send(&settings, &to, TEST_SUBJECT, TEST_BODY).await
    }

    // --- shared reads ---

    async fn dek(&self, access: &ShareAccess) -> DtxtResult<Key32> {
        self.keys.get_dek(access.user_id, &access.derived).await
    }

    pub async fn marked_days(&self, access: &ShareAccess, year: i32, month: u32) -> DtxtResult<MarkedDays> {
        let doc = self.journal.get_month(access.user_id, year, month).await?;
        let mut marked = MarkedDays::default();
        for day in &doc.days {
            if day.text.is_some() {
                marked.days_with_logs.push(day.day);
            }
            if !day.files.is_empty() {
                marked.days_with_files.push(day.day);
            }
            if day.bookmarked() {
                marked.days_bookmarked.push(day.day);
            }
        }
        Ok(marked)
    }

    /// Decrypted days of one month. A day appears only if it has text,
    /// files or tags.
    pub async fn month_for_reading(
        &self,
        access: &ShareAccess,
        year: i32,
        month: u32,
    ) -> DtxtResult<Vec<Value>> {
        let doc = self.journal.get_month(access.user_id, year, month).await?;
        let dek = self.dek(access).await?;

        let mut out = Vec::new();
        for day in &doc.days {
            let mut entry = Map::new();
            entry.insert("day".into(), Value::from(day.day));

            if let Some(text) = day.text.as_deref().filter(|t| !t.is_empty()) {
                entry.insert("text".into(), Value::String(decrypt_text(text, &dek)?));
                if let Some(written) = day.date_written.as_deref().filter(|d| !d.is_empty()) {
                    entry.insert(
                        "date_written".into(),
                        Value::String(decrypt_text(written, &dek)?),
                    );
                }
            }
            if !day.tags.is_empty() {
                entry.insert("tags".into(), Value::Array(day.tags.clone()));
            }
            if !day.files.is_empty() {
                let mut files = Vec::new();
                for file in &day.files {
                    let Some(enc_name) = file.enc_filename.as_deref() else {
                        continue;
                    };
                    let mut view = match serde_json::to_value(file)? {
                        Value::Object(map) => map,
                        _ => Map::new(),
                    };
                    view.insert("filename".into(), Value::String(decrypt_text(enc_name, &dek)?));
                    files.push(Value::Object(view));
                }
                entry.insert("files".into(), Value::Array(files));
            }

            if ["text", "files", "tags"].iter().any(|k| entry.contains_key(*k)) {
                out.push(Value::Object(entry));
            }
        }
        Ok(out)
    }

    pub async fn download_file(&self, access: &ShareAccess, uuid: &str) -> DtxtResult<Vec<u8>> {
        let dek = self.dek(access).await?;
        let sealed = self.journal.read_file(access.user_id, uuid).await?;
        Ok(decrypt_file(&sealed, &dek)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_smtp() {
        let s = normalize_smtp(SmtpSettings {
            host: "  smtp.example.org ".into(),
            port: 0,
            username: " mailer ".into(),
            password: " keep spaces ".into(),
            from: " Journal@Example.ORG".into(),
        });
        assert_eq!(s.host, "smtp.example.org");
        assert_eq!(s.port, DEFAULT_SMTP_PORT);
        assert_eq!(s.username, "mailer");
        assert_eq!(s.password, " keep spaces ");
        assert_eq!(s.from, "journal@example.org");
    }

    #[test]
    fn test_share_access_debug_hides_key() {
        let access = ShareAccess {
            user_id: 1,
            token_hash: "h".into(),
            derived: Key32::generate(),
        };
        let shown = format!("{access:?}");
        assert!(shown.contains("token_hash"));
        assert!(!shown.contains("derived"));
    }
}
