//! Single writer for the persisted run state
//!
//! One [`PersistenceWriter`] per run owns the [`RecordStore`] and the
//! [`ProgressTracker`]. Workers reach it only through a cloneable
//! [`PersistenceHandle`] (mpsc request, oneshot reply), so no two workers
//! ever write the artifacts concurrently.
//!
//! The writer runs on the blocking pool and exits after the last handle is
//! dropped, returning the final progress.

use crate::domain::{CustomerId, ProgressState, RecordData, ResultEntry};
use crate::infrastructure::{ProgressTracker, RecordStore};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

const COMMAND_BUFFER: usize = 64;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("persistence writer has shut down")]
pub struct WriterClosed;

/// A contiguous slice of the input handed to one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchClaim {
    pub start: usize,
    pub ids: Vec<CustomerId>,
}

impl BatchClaim {
    pub fn end(&self) -> usize {
        self.start + self.ids.len()
    }
}

/// Outcome of a (possibly partial) batch. `handled` counts the ids of the
/// claim's prefix that were fetched, failed or skipped.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub start: usize,
    pub handled: usize,
    pub entries: Vec<ResultEntry>,
    pub failures: Vec<CustomerId>,
    pub skipped: usize,
}

impl BatchReport {
    pub fn new(start: usize) -> Self {
        Self { start, ..Self::default() }
    }

    pub fn record_success(&mut self, id: CustomerId, data: RecordData) {
        self.entries.push(ResultEntry { id, data });
        self.handled += 1;
    }

    pub fn record_failure(&mut self, id: CustomerId) {
        self.failures.push(id);
        self.handled += 1;
    }

    pub fn record_skip(&mut self) {
        self.skipped += 1;
        self.handled += 1;
    }

    pub fn succeeded(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn failed(&self) -> u64 {
        self.failures.len() as u64
    }
}

enum Command {
    Claim { reply: oneshot::Sender<Option<BatchClaim>> },
    Contains { id: CustomerId, reply: oneshot::Sender<bool> },
    Merge { report: BatchReport, reply: oneshot::Sender<ProgressState> },
}

/// Worker-side access to the writer
#[derive(Clone)]
pub struct PersistenceHandle {
    tx: mpsc::Sender<Command>,
}

impl PersistenceHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, WriterClosed> {
        let (reply, response) = oneshot::channel();
        self.tx.send(build(reply)).await.map_err(|_| WriterClosed)?;
        response.await.map_err(|_| WriterClosed)
    }

    /// Next unclaimed batch, or `None` once the input is exhausted
    pub async fn claim_batch(&self) -> Result<Option<BatchClaim>, WriterClosed> {
        self.request(|reply| Command::Claim { reply }).await
    }

    /// Whether the id already has a result or a recorded failure
    pub async fn contains(&self, id: &CustomerId) -> Result<bool, WriterClosed> {
        let id = id.clone();
        self.request(|reply| Command::Contains { id, reply }).await
    }

    /// Merges the batch and completes its handled range
    pub async fn merge_batch(&self, report: BatchReport) -> Result<ProgressState, WriterClosed> {
        self.request(|reply| Command::Merge { report, reply }).await
    }
}

pub struct PersistenceWriter {
    ids: Arc<[CustomerId]>,
    batch_size: usize,
    next_dispatch: usize,
    store: RecordStore,
    tracker: ProgressTracker,
    progress: Arc<watch::Sender<ProgressState>>,
}

impl PersistenceWriter {
    pub fn new(
        ids: Arc<[CustomerId]>,
        batch_size: usize,
        store: RecordStore,
        tracker: ProgressTracker,
        progress: Arc<watch::Sender<ProgressState>>,
    ) -> Self {
        let next_dispatch = tracker.state().cursor.min(ids.len());
        progress.send_replace(tracker.state());

        Self { ids, batch_size: batch_size.max(1), next_dispatch, store, tracker, progress }
    }

    /// Starts the writer on the blocking pool
    pub fn spawn(self) -> (PersistenceHandle, JoinHandle<ProgressState>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let task = tokio::task::spawn_blocking(move || self.run(rx));
        (PersistenceHandle { tx }, task)
    }

    fn run(mut self, mut rx: mpsc::Receiver<Command>) -> ProgressState {
        info!(
            "💾 Persistence writer started: {} ids, resuming at {}",
            self.ids.len(),
            self.next_dispatch
        );

        while let Some(command) = rx.blocking_recv() {
            match command {
                Command::Claim { reply } => {
                    let _ = reply.send(self.claim());
                }
                Command::Contains { id, reply } => {
                    let _ = reply.send(self.store.contains(&id));
                }
                Command::Merge { report, reply } => {
                    let _ = reply.send(self.merge(report));
                }
            }
        }

        let state = self.tracker.state();
        info!(
            "💾 Persistence writer finished: cursor {}, {} succeeded, {} failed",
            state.cursor, state.total_succeeded, state.total_failed
        );
        state
    }

    fn claim(&mut self) -> Option<BatchClaim> {
        let start = self.next_dispatch;
        if start >= self.ids.len() {
            return None;
        }
        let end = (start + self.batch_size).min(self.ids.len());
        self.next_dispatch = end;

        debug!("Dispatching batch [{}, {})", start, end);
        Some(BatchClaim { start, ids: self.ids[start..end].to_vec() })
    }

    fn merge(&mut self, report: BatchReport) -> ProgressState {
        let (succeeded, failed) = (report.succeeded(), report.failed());
        let (start, end) = (report.start, report.start + report.handled);

        // In-memory state stays authoritative when a write fails
        if let Err(e) = self.store.merge(report.entries, report.failures) {
            error!("💥 Failed to persist records for [{}, {}): {}", start, end, e);
        }

        let state = match self.tracker.complete_range(start, end, succeeded, failed) {
            Ok(state) => state,
            Err(e) => {
                error!("💥 Failed to persist progress for [{}, {}): {}", start, end, e);
                self.tracker.state()
            }
        };

        debug!(
            "Merged [{}, {}): +{} ok, +{} failed, {} skipped → cursor {}",
            start, end, succeeded, failed, report.skipped, state.cursor
        );
        self.progress.send_replace(state);
        state
    }
}
