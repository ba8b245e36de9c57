//! dtxt-migrate: moving v1 accounts onto the v2 key hierarchy
//!
//! On startup [`relocate_legacy_tree`] parks a v1 data directory under
//! `old/`. The first login of a v1 user then runs [`Migrator::migrate`],
//! which re-encrypts the user's corpus under a fresh DEK.

pub mod legacy;
pub mod migrator;
pub mod progress;

pub use legacy::{find_legacy_user, read_legacy_registry, relocate_legacy_tree, LegacyUser};
pub use migrator::Migrator;
pub use progress::{MigrationPhase, MigrationProgress, MigrationTracker};
