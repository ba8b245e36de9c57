pub mod config;
pub mod error;
pub mod types;

pub use config::DtxtConfig;
pub use error::{CryptoError, CryptoResult, DtxtError, DtxtResult};
pub use types::{
    SmtpSettings, UserId, CURRENT_DATA_VERSION, DEFAULT_SMTP_PORT, SESSION_COOKIE,
    SHARE_VERIFICATION_COOKIE,
};
