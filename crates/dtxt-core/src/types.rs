use serde::{Deserialize, Serialize};

/// Numeric account id, assigned from the registry's `id_counter`.
pub type UserId = u64;

/// Registry format version written for every native record.
pub const CURRENT_DATA_VERSION: u32 = 2;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "token";

/// Name of the share e-mail verification cookie.
pub const SHARE_VERIFICATION_COOKIE: &str = "share_verification";

/// Default SMTP submission port.
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// SMTP connection settings, used both for the global default (config) and
/// for the optional per-user override stored on the registry record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_SMTP_PORT,
            username: String::new(),
            password: String::new(),
            from: String::new(),
        }
    }
}

impl SmtpSettings {
    /// Host and sender are the minimum needed to send anything.
    pub fn is_configured(&self) -> bool {
        !self.host.trim().is_empty() && !self.from.trim().is_empty()
    }

    /// Copy with the password blanked, for responses and logs.
    pub fn redacted(&self) -> Self {
        Self {
            password: if self.password.is_empty() {
                String::new()
            } else {
                "********".to_string()
            },
            ..self.clone()
        }
    }
}
