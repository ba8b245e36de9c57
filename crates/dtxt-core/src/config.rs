use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{DtxtError, DtxtResult};
use crate::types::{SmtpSettings, DEFAULT_SMTP_PORT};

/// Top-level server configuration (loaded from config.toml, then overridden
/// by environment variables)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DtxtConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub share: ShareConfig,
    /// Global SMTP defaults for share verification mail
    pub smtp: SmtpSettings,
    pub crypto: CryptoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP listen address (default: 0.0.0.0:8000)
    pub listen: String,
    /// Development mode (relaxed cookie handling in the frontend)
    pub development: bool,
    /// URL prefix the frontend is served under (default: /)
    pub base_path: String,
    /// Hosts allowed to make cross-origin requests
    pub allowed_hosts: Vec<String>,
    /// Per-request timeout for non-streaming routes, in seconds
    pub request_timeout_secs: u64,
    /// How long shutdown waits for in-flight requests, in seconds
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the on-disk tree (users.json, per-user dirs, old/)
    pub data_path: PathBuf,
    /// JSON indentation width; 0 writes compact documents
    pub indent: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Process secret for session and verification-cookie signatures.
    /// Generated at startup when empty.
    pub secret_token: String,
    /// Session lifetime in days
    pub logout_after_days: i64,
    /// Whether self-service registration is open
    pub allow_registration: bool,
    /// Admin password; empty disables the admin endpoints
    pub admin_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareConfig {
    /// Lifetime of an e-mailed one-time code, in minutes
    pub code_ttl_minutes: i64,
    /// Lifetime of the share_verification cookie, in days
    pub cookie_days: i64,
    /// Maximum retained share access-log entries per user
    pub access_log_limit: usize,
}

/// Argon2id parameters for password hashing and key derivation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (iterations, default: 2)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 4)
    pub argon2_parallelism: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8000".into(),
            development: false,
            base_path: "/".into(),
            allowed_hosts: Vec::new(),
            request_timeout_secs: 15,
            shutdown_grace_secs: 30,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("/data"),
            indent: 0,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_token: String::new(),
            logout_after_days: 30,
            allow_registration: false,
            admin_password: String::new(),
        }
    }
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            code_ttl_minutes: 10,
            cookie_days: 30,
            access_log_limit: 500,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            argon2_mem_cost_kib: 65536,
            argon2_time_cost: 2,
            argon2_parallelism: 4,
        }
    }
}

impl DtxtConfig {
    /// Overlay process environment variables on top of file values.
    pub fn apply_env(&mut self) -> DtxtResult<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay variables from `lookup` on top of file values.
    ///
    /// Unset or blank variables leave the current value alone.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> DtxtResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("DATA_PATH") {
            self.storage.data_path = PathBuf::from(v);
        }
        if let Some(v) = get("INDENT") {
            self.storage.indent = parse_number("INDENT", &v)?;
        }
        if let Some(v) = get("DEVELOPMENT") {
            self.server.development = parse_bool("DEVELOPMENT", &v)?;
        }
        if let Some(v) = get("BASE_PATH") {
            self.server.base_path = v;
        }
        if let Some(v) = get("ALLOWED_HOSTS") {
            self.server.allowed_hosts = v
                .split(',')
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .collect();
        }
        if let Some(v) = get("SECRET_TOKEN") {
            self.auth.secret_token = v;
        }
        if let Some(v) = get("LOGOUT_AFTER_DAYS") {
            self.auth.logout_after_days = parse_number("LOGOUT_AFTER_DAYS", &v)?;
        }
        if let Some(v) = get("ALLOW_REGISTRATION") {
            self.auth.allow_registration = parse_bool("ALLOW_REGISTRATION", &v)?;
        }
        if let Some(v) = get("ADMIN_PASSWORD") {
            self.auth.admin_password = v;
        }
        if let Some(v) = get("SHARE_CODE_TTL_MINUTES") {
            self.share.code_ttl_minutes = parse_number("SHARE_CODE_TTL_MINUTES", &v)?;
        }
        if let Some(v) = get("SHARE_COOKIE_DAYS") {
            self.share.cookie_days = parse_number("SHARE_COOKIE_DAYS", &v)?;
        }
        if let Some(v) = get("SMTP_HOST") {
            self.smtp.host = v.trim().to_string();
        }
        if let Some(v) = get("SMTP_PORT") {
            self.smtp.port = parse_number("SMTP_PORT", &v)?;
        }
        if let Some(v) = get("SMTP_USERNAME") {
            self.smtp.username = v.trim().to_string();
        }
        if let Some(v) = get("SMTP_PASSWORD") {
            self.smtp.password = v;
        }
        if let Some(v) = get("SMTP_FROM") {
            self.smtp.from = v.trim().to_lowercase();
        }

        if self.smtp.port == 0 {
            self.smtp.port = DEFAULT_SMTP_PORT;
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> DtxtResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| DtxtError::Config(format!("{key}: not a valid number: {value:?}")))
}

fn parse_bool(key: &str, value: &str) -> DtxtResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(DtxtError::Config(format!(
            "{key}: expected true/false, got {value:?}"
        ))),
    }
}
