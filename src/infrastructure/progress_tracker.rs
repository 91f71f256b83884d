//! # Progress Tracker
//!
//! Durable resumption checkpoint (the status file). Workers may finish
//! batches out of order, so completions are recorded as index ranges and the
//! persisted cursor only moves over the contiguous prefix of completed work.

use crate::domain::{PersistenceError, ProgressState};
use crate::infrastructure::write_atomically;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct ProgressTracker {
    path: PathBuf,
    state: ProgressState,
    /// Completed ranges ahead of the cursor, keyed by start
    pending: BTreeMap<usize, usize>,
}

impl ProgressTracker {
    /// Loads the status file; absent or corrupt files start from zero
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match read_status(&path) {
            Ok(state) => state,
            Err(e) => {
                if path.exists() {
                    warn!("⚠️ Ignoring unreadable status file: {}", e);
                } else {
                    debug!("No status file yet at {:?}", path);
                }
                ProgressState::default()
            }
        };

        Self { path, state, pending: BTreeMap::new() }
    }

    pub const fn state(&self) -> ProgressState {
        self.state
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies one advance and persists the result
    pub fn advance(
        &mut self,
        new_cursor: usize,
        succeeded_delta: u64,
        failed_delta: u64,
    ) -> Result<ProgressState, PersistenceError> {
        self.state.advance(new_cursor, succeeded_delta, failed_delta);
        self.save()?;
        Ok(self.state)
    }

    /// Records that `[start, end)` was fully handled.
    ///
    /// Counters are applied immediately. The cursor moves only once every
    /// range before `end` has completed, absorbing held ranges as gaps close.
    pub fn complete_range(
        &mut self,
        start: usize,
        end: usize,
        succeeded_delta: u64,
        failed_delta: u64,
    ) -> Result<ProgressState, PersistenceError> {
        if end > start && end > self.state.cursor {
            let held = self.pending.entry(start).or_insert(end);
            *held = (*held).max(end);
        }

        let mut cursor = self.state.cursor;
        while let Some((&range_start, &range_end)) = self.pending.first_key_value() {
            if range_start > cursor {
                break;
            }
            cursor = cursor.max(range_end);
            self.pending.remove(&range_start);
        }

        self.advance(cursor, succeeded_delta, failed_delta)
    }

    /// Completed ranges still waiting on an earlier gap
    pub fn pending_ranges(&self) -> usize {
        self.pending.len()
    }

    pub fn save(&self) -> Result<(), PersistenceError> {
        let json = serde_json::to_vec_pretty(&self.state)
            .map_err(|e| PersistenceError::write(&self.path, e))?;
        write_atomically(&self.path, &json)
    }
}

fn read_status(path: &Path) -> Result<ProgressState, PersistenceError> {
    let raw = std::fs::read_to_string(path).map_err(|e| PersistenceError::read(path, e))?;
    serde_json::from_str(&raw).map_err(|e| PersistenceError::parse(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> (tempfile::TempDir, ProgressTracker) {
        let dir = tempfile::tempdir().unwrap();
        let tracker = ProgressTracker::load(dir.path().join("status.json"));
        (dir, tracker)
    }

    #[test]
    fn absent_and_corrupt_files_start_at_zero() {
        let (dir, tracker) = tracker();
        assert_eq!(tracker.state(), ProgressState::default());

        let corrupt = dir.path().join("corrupt.json");
        std::fs::write(&corrupt, "{\"last_processed\": \"x\"").unwrap();
        assert_eq!(ProgressTracker::load(&corrupt).state(), ProgressState::default());
    }

    #[test]
    fn advance_persists_the_status_file() {
        let (_dir, mut tracker) = tracker();
        tracker.advance(10, 8, 2).unwrap();

        let reloaded = ProgressTracker::load(tracker.path());
        assert_eq!(
            reloaded.state(),
            ProgressState { cursor: 10, total_succeeded: 8, total_failed: 2 }
        );

        let raw = std::fs::read_to_string(tracker.path()).unwrap();
        assert!(raw.contains("\"last_processed\": 10"));
        assert!(raw.contains("\"total_processed\": 8"));
    }

    #[test]
    fn out_of_order_ranges_wait_for_the_gap() {
        let (_dir, mut tracker) = tracker();

        let state = tracker.complete_range(10, 20, 10, 0).unwrap();
        assert_eq!(state.cursor, 0);
        assert_eq!(state.total_succeeded, 10);
        assert_eq!(tracker.pending_ranges(), 1);

        let state = tracker.complete_range(0, 10, 9, 1).unwrap();
        assert_eq!(state.cursor, 20);
        assert_eq!(state.total_succeeded, 19);
        assert_eq!(state.total_failed, 1);
        assert_eq!(tracker.pending_ranges(), 0);
    }

    #[test]
    fn partial_range_leaves_the_rest_for_later() {
        let (_dir, mut tracker) = tracker();
        tracker.complete_range(0, 4, 4, 0).unwrap();
        tracker.complete_range(10, 20, 10, 0).unwrap();

        assert_eq!(tracker.state().cursor, 4);
        assert_eq!(tracker.pending_ranges(), 1);
    }

    #[test]
    fn ranges_behind_the_cursor_do_not_move_it() {
        let (_dir, mut tracker) = tracker();
        tracker.advance(30, 0, 0).unwrap();
        let state = tracker.complete_range(10, 20, 1, 0).unwrap();

        assert_eq!(state.cursor, 30);
        assert_eq!(state.total_succeeded, 1);
        assert_eq!(tracker.pending_ranges(), 0);
    }
}
