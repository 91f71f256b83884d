//! # Batch Scheduler
//!
//! One worker's processing loop: claim a batch, skip ids that are already
//! recorded, fetch the rest, merge the batch, repeat until the input is
//! exhausted or a stop is requested.

use crate::crawling::control::{Checkpoint, RunControl};
use crate::crawling::fetch_client::{FetchClient, FetchFailure};
use crate::crawling::persistence::{BatchClaim, BatchReport, PersistenceHandle, WriterClosed};
use crate::domain::CustomerId;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Why a worker loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// No unclaimed batches remain
    Exhausted,
    Stopped,
    /// The persistence writer went away
    WriterClosed,
}

/// Per-worker totals for the log line at exit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub batches: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
}

pub struct BatchScheduler {
    worker_id: usize,
    control: Arc<RunControl>,
    persistence: PersistenceHandle,
    fetcher: FetchClient,
    inter_batch_delay: Duration,
    summary: WorkerSummary,
}

impl BatchScheduler {
    pub fn new(
        worker_id: usize,
        control: Arc<RunControl>,
        persistence: PersistenceHandle,
        fetcher: FetchClient,
        inter_batch_delay: Duration,
    ) -> Self {
        Self {
            worker_id,
            control,
            persistence,
            fetcher,
            inter_batch_delay,
            summary: WorkerSummary::default(),
        }
    }

    /// Drives this worker until the input is exhausted or a stop lands
    pub async fn run_loop(mut self) -> (LoopExit, WorkerSummary) {
        let worker_id = self.worker_id;
        info!(worker_id, "🚀 Worker loop started");

        let exit = match self.drive().await {
            Ok(exit) => exit,
            Err(WriterClosed) => {
                error!(worker_id, "💥 Persistence writer closed; worker exiting");
                LoopExit::WriterClosed
            }
        };

        let summary = self.summary;
        info!(
            worker_id,
            batches = summary.batches,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "🏁 Worker loop finished ({:?})",
            exit
        );
        (exit, summary)
    }

    async fn drive(&mut self) -> Result<LoopExit, WriterClosed> {
        loop {
            if self.control.checkpoint(self.worker_id).await == Checkpoint::Stop {
                return Ok(LoopExit::Stopped);
            }

            let Some(claim) = self.persistence.claim_batch().await? else {
                return Ok(LoopExit::Exhausted);
            };

            let interrupted = self.process_batch(claim).await?;
            if interrupted || self.control.is_stopping() {
                return Ok(LoopExit::Stopped);
            }

            if !self.control.sleep_or_stop(self.inter_batch_delay).await {
                return Ok(LoopExit::Stopped);
            }
        }
    }

    /// Processes one claim and merges whatever was handled. Returns true if
    /// a stop cut the batch short.
    async fn process_batch(&mut self, claim: BatchClaim) -> Result<bool, WriterClosed> {
        let worker_id = self.worker_id;
        let (start, end) = (claim.start, claim.end());
        debug!(worker_id, start, end, "📦 Batch claimed");

        let mut report = BatchReport::new(start);
        // The writer only learns about this batch at merge time
        let mut seen: HashSet<CustomerId> = HashSet::new();
        let mut interrupted = false;

        for id in claim.ids {
            if self.control.checkpoint(worker_id).await == Checkpoint::Stop {
                interrupted = true;
                break;
            }

            if seen.contains(&id) {
                debug!(worker_id, cid = %id, "⏭️ Repeated in this batch, skipping");
                report.record_skip();
                continue;
            }
            if self.persistence.contains(&id).await? {
                debug!(worker_id, cid = %id, "⏭️ Already recorded, skipping");
                report.record_skip();
                continue;
            }

            match self.fetcher.fetch(&id).await {
                Ok(data) => {
                    info!(worker_id, cid = %id, periods = data.len(), "✅ Record fetched");
                    seen.insert(id.clone());
                    report.record_success(id, data);
                }
                Err(failure @ FetchFailure::Exhausted { .. }) => {
                    warn!(worker_id, cid = %id, "❌ {}", failure);
                    seen.insert(id.clone());
                    report.record_failure(id);
                }
                Err(failure @ FetchFailure::Aborted { .. }) => {
                    info!(worker_id, cid = %id, "🛑 {}", failure);
                    interrupted = true;
                    break;
                }
            }
        }

        self.summary.batches += 1;
        self.summary.succeeded += report.succeeded();
        self.summary.failed += report.failed();
        self.summary.skipped += report.skipped as u64;

        let handled = report.handled;
        let state = self.persistence.merge_batch(report).await?;
        info!(
            worker_id,
            start,
            handled,
            cursor = state.cursor,
            total_succeeded = state.total_succeeded,
            total_failed = state.total_failed,
            "💾 Batch merged"
        );

        Ok(interrupted)
    }
}
