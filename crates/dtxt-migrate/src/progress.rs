//! Migration progress and the per-username in-flight guard

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use dtxt_core::{DtxtError, DtxtResult};
use serde::Serialize;

/// Emit an in-phase update every this many items.
pub const PROGRESS_EVERY: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    NotStarted,
    CreatingNewUser,
    WritingUserData,
    MigratingTemplates,
    MigratingLogs,
    MigratingFiles,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationProgress {
    pub phase: MigrationPhase,
    pub processed_items: usize,
    pub total_items: usize,
    pub error_count: usize,
}

impl MigrationProgress {
    pub fn not_started() -> Self {
        Self {
            phase: MigrationPhase::NotStarted,
            processed_items: 0,
            total_items: 0,
            error_count: 0,
        }
    }
}

#[derive(Default)]
struct TrackerState {
    active: HashSet<String>,
    progress: HashMap<String, MigrationProgress>,
}

/// Process-wide view of running and finished migrations.
#[derive(Default, Clone)]
pub struct MigrationTracker {
    state: Arc<Mutex<TrackerState>>,
}

impl MigrationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut TrackerState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Claim `username`. Fails with `MigrationInProgress` if another task
    /// holds it; the claim is released when the guard drops.
    pub fn begin(&self, username: &str) -> DtxtResult<MigrationGuard> {
        self.with_state(|s| {
            if !s.active.insert(username.to_string()) {
                return Err(DtxtError::MigrationInProgress);
            }
            s.progress
                .insert(username.to_string(), MigrationProgress::not_started());
            Ok(())
        })?;
        Ok(MigrationGuard {
            tracker: self.clone(),
            username: username.to_string(),
        })
    }

    pub fn is_active(&self, username: &str) -> bool {
        self.with_state(|s| s.active.contains(username))
    }

    pub fn get(&self, username: &str) -> Option<MigrationProgress> {
        self.with_state(|s| s.progress.get(username).cloned())
    }

    fn set(&self, username: &str, progress: MigrationProgress) {
        self.with_state(|s| {
            s.progress.insert(username.to_string(), progress);
        })
    }
}

/// Held for the whole migration of one user.
pub struct MigrationGuard {
    tracker: MigrationTracker,
    username: String,
}

impl MigrationGuard {
    pub fn report(
        &self,
        phase: MigrationPhase,
        processed_items: usize,
        total_items: usize,
        error_count: usize,
    ) {
        tracing::debug!(
            username = %self.username,
            ?phase,
            processed_items,
            total_items,
            error_count,
            "migration progress"
        );
        self.tracker.set(
            &self.username,
            MigrationProgress {
                phase,
                processed_items,
                total_items,
                error_count,
            },
        );
    }
}

impl Drop for MigrationGuard {
    fn drop(&mut self) {
        self.tracker.with_state(|s| {
            s.active.remove(&self.username);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_begin_is_rejected_until_drop() {
        let tracker = MigrationTracker::new();
        let guard = tracker.begin("carol").unwrap();
        assert!(tracker.is_active("carol"));
        assert!(matches!(
            tracker.begin("carol"),
            Err(DtxtError::MigrationInProgress)
        ));
        // other users are independent
        let _other = tracker.begin("dave").unwrap();

        drop(guard);
        assert!(!tracker.is_active("carol"));
        assert!(tracker.begin("carol").is_ok());
    }

    #[test]
    fn test_progress_survives_guard() {
        let tracker = MigrationTracker::new();
        {
            let guard = tracker.begin("carol").unwrap();
            guard.report(MigrationPhase::MigratingLogs, 5, 12, 1);
            assert_eq!(tracker.get("carol").unwrap().processed_items, 5);
            guard.report(MigrationPhase::Completed, 0, 0, 1);
        }
        let last = tracker.get("carol").unwrap();
        assert_eq!(last.phase, MigrationPhase::Completed);
        assert_eq!(last.error_count, 1);
        assert!(tracker.get("nobody").is_none());
    }

    #[test]
    fn test_phase_wire_names() {
        let json = serde_json::to_value(MigrationProgress::not_started()).unwrap();
        assert_eq!(json["phase"], "not_started");
        assert_eq!(
            serde_json::to_value(MigrationPhase::CreatingNewUser).unwrap(),
            "creating_new_user"
        );
    }
}
