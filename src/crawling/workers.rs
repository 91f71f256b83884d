//! # Worker Pool Coordinator
//!
//! Launches N workers, each with its own portal context, sharing one
//! persistence writer and one [`RunControl`]. The pool keeps only the join
//! handles; portal contexts never leave their worker task.

use crate::crawling::control::RunControl;
use crate::crawling::fetch_client::{FetchClient, RetryPolicy, RowParser};
use crate::crawling::persistence::PersistenceHandle;
use crate::crawling::scheduler::{BatchScheduler, LoopExit, WorkerSummary};
use crate::infrastructure::billing_portal::PortalFactory;
use crate::infrastructure::connectivity::ConnectivityProbe;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// How one worker slot ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    Finished { worker_id: usize, exit: LoopExit, summary: WorkerSummary },
    /// The portal context could not be created; the slot is lost for this run
    SetupFailed { worker_id: usize, reason: String },
    /// The worker task panicked or was aborted
    Crashed { worker_id: usize, reason: String },
}

/// Everything a worker needs besides its own portal context
#[derive(Clone)]
pub struct WorkerContext {
    pub factory: Arc<dyn PortalFactory>,
    pub probe: Arc<dyn ConnectivityProbe>,
    pub control: Arc<RunControl>,
    pub persistence: PersistenceHandle,
    pub parser: Arc<RowParser>,
    pub policy: RetryPolicy,
    pub inter_batch_delay: Duration,
}

/// Decrements the active worker count when the worker task ends
struct ActiveSlot {
    control: Arc<RunControl>,
    worker_id: usize,
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        let remaining = self.control.worker_finished();
        info!(worker_id = self.worker_id, remaining, "Worker slot released");
    }
}

pub struct WorkerPool {
    handles: Vec<(usize, JoinHandle<WorkerOutcome>)>,
}

impl WorkerPool {
    /// Spawns `count` workers. The active count is raised before this returns.
    pub fn start(count: usize, context: WorkerContext) -> Self {
        let handles = (0..count)
            .map(|worker_id| {
                context.control.worker_started();
                let slot = ActiveSlot { control: Arc::clone(&context.control), worker_id };
                let context = context.clone();
                (worker_id, tokio::spawn(run_worker(worker_id, context, slot)))
            })
            .collect();

        info!("👷 Worker pool started with {} workers", count);
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every worker to terminate
    pub async fn join(self) -> Vec<WorkerOutcome> {
        let (ids, handles): (Vec<usize>, Vec<_>) = self.handles.into_iter().unzip();
        let results = join_all(handles).await;

        ids.into_iter()
            .zip(results)
            .map(|(worker_id, result)| {
                result.unwrap_or_else(|e| {
                    error!(worker_id, "💥 Worker task failed: {}", e);
                    WorkerOutcome::Crashed { worker_id, reason: e.to_string() }
                })
            })
            .collect()
    }
}

async fn run_worker(worker_id: usize, context: WorkerContext, _slot: ActiveSlot) -> WorkerOutcome {
    let portal = match context.factory.create(worker_id).await {
        Ok(portal) => portal,
        Err(e) => {
            error!(worker_id, "💥 Failed to create portal context: {:#}", e);
            return WorkerOutcome::SetupFailed { worker_id, reason: format!("{e:#}") };
        }
    };

    let fetcher = FetchClient::new(
        worker_id,
        portal,
        context.probe,
        Arc::clone(&context.control),
        context.parser,
        context.policy,
    );
    let scheduler = BatchScheduler::new(
        worker_id,
        context.control,
        context.persistence,
        fetcher,
        context.inter_batch_delay,
    );

    let (exit, summary) = scheduler.run_loop().await;
    WorkerOutcome::Finished { worker_id, exit, summary }
}
