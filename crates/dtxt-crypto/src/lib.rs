//! dtxt-crypto: credential and content encryption for dailytxt
//!
//! Key hierarchy:
//! ```text
//! password ──Argon2id(salt)──► derived key (32 B, carried in the session, never stored)
//!   └── sealed DEK = ChaCha20-Poly1305(derived, DEK)   (registry: enc_enc_key)
//!         └── DEK (32 B random, per user)
//!               ├── string envelope: b64url(nonce || ct || tag)   entry text, names, settings
//!               └── file envelope:   nonce || ct || tag            attachments
//!
//! share token (32 B random, b64url) ──► string envelope over the derived key
//! backup code ──Argon2id(salt)──► string envelope over the derived key
//! ```
//!
//! The v1 format (Fernet + PBKDF2) is readable through [`legacy`] and is only
//! used by the migrator.

pub mod aead;
pub mod envelope;
pub mod kdf;
pub mod keys;
pub mod legacy;

pub use aead::{open, seal};
pub use envelope::{decrypt_file, decrypt_text, encrypt_file, encrypt_text};
pub use kdf::{derive_key, hash_password, verify_password, KdfParams, PasswordRecord};
pub use keys::{new_secret_token, random_bytes, token_hash, unwrap_key, wrap_key, Key32};

/// Size of every symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of a ChaCha20-Poly1305 nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of a password KDF salt
pub const SALT_SIZE: usize = 16;
