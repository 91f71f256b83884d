//! # Progress State
//!
//! Durable resumption checkpoint. Serialized as the status file, so the
//! field names on disk follow that format.

use serde::{Deserialize, Serialize};

/// Cursor over the input sequence plus aggregate counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    /// Every id before this index is in the result set, the failure set, or was skipped
    #[serde(rename = "last_processed")]
    pub cursor: usize,

    #[serde(rename = "total_processed")]
    pub total_succeeded: u64,

    pub total_failed: u64,
}

impl ProgressState {
    /// Applies one advance. The cursor never moves backwards; counters always accumulate.
    pub fn advance(&mut self, new_cursor: usize, succeeded_delta: u64, failed_delta: u64) {
        self.cursor = self.cursor.max(new_cursor);
        self.total_succeeded = self.total_succeeded.saturating_add(succeeded_delta);
        self.total_failed = self.total_failed.saturating_add(failed_delta);
    }
}
