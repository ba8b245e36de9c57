//! dtxt-auth: who may open which journal
//!
//! Key hierarchy, from the outside in:
//!   password ──Argon2id──▶ derived key ──AEAD──▶ DEK ──AEAD──▶ journal data
//!
//! [`Accounts`] manages passwords and backup codes, [`SessionSigner`] carries
//! the derived key in a signed cookie, [`KeyService`] unseals the DEK per
//! request and [`ShareService`] lets a bearer token stand in for a session.

pub mod accounts;
pub mod backup;
pub mod keys;
pub mod mail;
pub mod session;
pub mod settings;
pub mod share;
pub mod verification;

pub use accounts::{
    open_seconds, Accounts, ChangePassword, ChangeUsername, LoginOutcome, RegistrationGate,
    RegistrationStatus, Unlocked,
};
pub use keys::KeyService;
pub use mail::{Mailer, SmtpMailer};
pub use session::{SessionClaims, SessionSigner};
pub use settings::{default_settings, load_settings, save_settings};
pub use share::{MarkedDays, ShareAccess, ShareService, SmtpView, VerificationStatus};
pub use verification::{normalize_email, CodeStore, CookieSigner};
