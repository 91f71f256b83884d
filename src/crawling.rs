//! # Crawling Engine
//!
//! Resumable batch engine for billing record retrieval.
//! - `control`: run lifecycle and cooperative pause/stop signals
//! - `fetch_client`: connectivity wait, retry loop, row parsing
//! - `persistence`: single writer owning the record store and progress
//! - `scheduler`: one worker's batch loop
//! - `workers`: worker pool start/join
//!
//! [`CrawlingEngine`] is the facade the control API and the process entry
//! point talk to. A run is: load input → spawn writer → spawn workers →
//! supervisor waits for the drain and settles the phase.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub mod control;
pub mod fetch_client;
pub mod persistence;
pub mod scheduler;
pub mod workers;

pub use control::{Checkpoint, ControlAction, ControlError, RunControl, RunPhase};
pub use fetch_client::{FetchClient, FetchFailure, RetryPolicy, RowParser};
pub use persistence::{BatchClaim, BatchReport, PersistenceHandle, PersistenceWriter};
pub use scheduler::{BatchScheduler, LoopExit, WorkerSummary};
pub use workers::{WorkerContext, WorkerOutcome, WorkerPool};

use crate::domain::{CustomerId, PersistenceError, ProgressState};
use crate::infrastructure::billing_portal::PortalFactory;
use crate::infrastructure::config::{AppConfig, EngineConfig, PathsConfig, PortalConfig};
use crate::infrastructure::connectivity::ConnectivityProbe;
use crate::infrastructure::{InputSource, ProgressTracker, RecordStore};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Control(#[from] ControlError),

    #[error("Failed to start run: {0}")]
    StartFailed(String),
}

/// Snapshot reported by `GET /status`
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EngineStatus {
    pub processing_active: bool,
    pub active_workers: usize,
    pub paused: bool,
    pub stopped: bool,
    pub last_processed: usize,
    pub total_processed: u64,
    pub total_failed: u64,
    pub phase: RunPhase,
    pub run_id: Option<Uuid>,
}

/// Result of a successful start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartedRun {
    pub run_id: Uuid,
    pub workers: usize,
    pub total_ids: usize,
}

/// Engine settings taken from the application config
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub engine: EngineConfig,
    pub paths: PathsConfig,
    pub portal: PortalConfig,
}

impl From<&AppConfig> for EngineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            engine: config.engine.clone(),
            paths: config.paths.clone(),
            portal: config.portal.clone(),
        }
    }
}

struct RunSlot {
    control: Option<Arc<RunControl>>,
    run_id: Option<Uuid>,
}

struct EngineInner {
    settings: EngineSettings,
    factory: Arc<dyn PortalFactory>,
    probe: Arc<dyn ConnectivityProbe>,
    parser: Arc<RowParser>,
    progress: Arc<watch::Sender<ProgressState>>,
    phase: watch::Sender<RunPhase>,
    // Serializes control requests; phase changes happen under this lock
    run: Mutex<RunSlot>,
}

#[derive(Clone)]
pub struct CrawlingEngine {
    inner: Arc<EngineInner>,
}

impl CrawlingEngine {
    pub fn new(
        settings: EngineSettings,
        factory: Arc<dyn PortalFactory>,
        probe: Arc<dyn ConnectivityProbe>,
    ) -> anyhow::Result<Self> {
        let parser = Arc::new(RowParser::new(&settings.portal)?);
        let initial = ProgressTracker::load(&settings.paths.status_file).state();
        let (progress, _) = watch::channel(initial);
        let (phase, _) = watch::channel(RunPhase::Idle);

        info!(
            "⚙️ Engine ready: resume cursor {}, {} succeeded, {} failed so far",
            initial.cursor, initial.total_succeeded, initial.total_failed
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                settings,
                factory,
                probe,
                parser,
                progress: Arc::new(progress),
                phase,
                run: Mutex::new(RunSlot { control: None, run_id: None }),
            }),
        })
    }

    pub fn phase(&self) -> RunPhase {
        *self.inner.phase.borrow()
    }

    pub fn progress(&self) -> ProgressState {
        *self.inner.progress.borrow()
    }

    /// Starts a run with `requested` workers (clamped to the configured range)
    pub async fn start(&self, requested: Option<usize>) -> Result<StartedRun, EngineError> {
        let mut run = self.inner.run.lock().await;
        let next = self.phase().transition(ControlAction::Start)?;

        let settings = &self.inner.settings;
        let workers = settings.engine.clamp_workers(requested);

        let (ids, store, tracker) = load_run_inputs(settings.paths.clone()).await?;
        let total_ids = ids.len();

        let writer = PersistenceWriter::new(
            ids,
            settings.engine.batch_size,
            store,
            tracker,
            Arc::clone(&self.inner.progress),
        );
        let (persistence, writer_task) = writer.spawn();

        let control = Arc::new(RunControl::new(settings.engine.pause_poll()));
        let pool = WorkerPool::start(
            workers,
            WorkerContext {
                factory: Arc::clone(&self.inner.factory),
                probe: Arc::clone(&self.inner.probe),
                control: Arc::clone(&control),
                persistence,
                parser: Arc::clone(&self.inner.parser),
                policy: RetryPolicy::from(&settings.engine),
                inter_batch_delay: settings.engine.inter_batch_delay(),
            },
        );

        let run_id = Uuid::new_v4();
        run.control = Some(Arc::clone(&control));
        run.run_id = Some(run_id);
        self.inner.phase.send_replace(next);

        let reporter_done = CancellationToken::new();
        let reporter = self.spawn_stats_reporter(Arc::clone(&control), reporter_done.clone());
        self.spawn_supervisor(run_id, pool, writer_task, reporter, reporter_done);

        info!("🚀 Run {} started: {} workers over {} ids", run_id, workers, total_ids);
        Ok(StartedRun { run_id, workers, total_ids })
    }

    pub async fn pause(&self) -> Result<(), EngineError> {
        let run = self.inner.run.lock().await;
        let next = self.phase().transition(ControlAction::Pause)?;
        if let Some(control) = &run.control {
            control.pause();
        }
        self.inner.phase.send_replace(next);
        info!("⏸️ Processing paused");
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), EngineError> {
        let run = self.inner.run.lock().await;
        let next = self.phase().transition(ControlAction::Resume)?;
        if let Some(control) = &run.control {
            control.resume();
        }
        self.inner.phase.send_replace(next);
        info!("▶️ Processing resumed");
        Ok(())
    }

    /// Raises the stop signal and waits until every worker has drained
    pub async fn stop(&self) -> Result<(), EngineError> {
        {
            let run = self.inner.run.lock().await;
            let next = self.phase().transition(ControlAction::Stop)?;
            if let Some(control) = &run.control {
                control.stop();
            }
            self.inner.phase.send_replace(next);
            info!("🛑 Stop requested, waiting for workers to drain");
        }

        self.wait_until_idle().await;
        info!("🛑 All workers drained");
        Ok(())
    }

    /// Stops an active run, if any. Used on process shutdown.
    pub async fn shutdown(&self) {
        match self.stop().await {
            Ok(()) => {}
            Err(EngineError::Control(_)) => {
                // Nothing to stop, or a stop is already draining
                self.wait_until_idle().await;
            }
            Err(e) => warn!("Shutdown stop failed: {}", e),
        }
    }

    /// Resolves once no run is active
    pub async fn wait_until_idle(&self) {
        let mut phase = self.inner.phase.subscribe();
        let closed = phase.wait_for(|phase| !phase.is_active()).await.is_err();
        if closed {
            debug!("Phase channel closed while waiting for idle");
        }
    }

    pub async fn status(&self) -> EngineStatus {
        let run = self.inner.run.lock().await;
        let phase = self.phase();
        let progress = self.progress();
        let (active_workers, stopping) = run
            .control
            .as_ref()
            .map_or((0, false), |control| (control.active_workers(), control.is_stopping()));

        EngineStatus {
            processing_active: phase.is_active(),
            active_workers,
            paused: phase == RunPhase::Paused,
            stopped: stopping || phase == RunPhase::Stopped,
            last_processed: progress.cursor,
            total_processed: progress.total_succeeded,
            total_failed: progress.total_failed,
            phase,
            run_id: run.run_id,
        }
    }

    fn spawn_stats_reporter(
        &self,
        control: Arc<RunControl>,
        done: CancellationToken,
    ) -> JoinHandle<()> {
        let progress = self.inner.progress.subscribe();
        let period = self.inner.settings.engine.stats_interval().max(Duration::from_millis(100));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = done.cancelled() => {
                        debug!("Stats reporter shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let state = *progress.borrow();
                        info!(
                            "📊 Progress: cursor={}, ok={}, failed={}, workers={}, paused={}",
                            state.cursor,
                            state.total_succeeded,
                            state.total_failed,
                            control.active_workers(),
                            control.is_paused()
                        );
                    }
                }
            }
        })
    }

    fn spawn_supervisor(
        &self,
        run_id: Uuid,
        pool: WorkerPool,
        writer_task: JoinHandle<ProgressState>,
        reporter: JoinHandle<()>,
        reporter_done: CancellationToken,
    ) {
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            let outcomes = pool.join().await;
            let lost = outcomes
                .iter()
                .filter(|outcome| !matches!(outcome, WorkerOutcome::Finished { .. }))
                .count();
            if lost > 0 {
                warn!("⚠️ Run {}: {} worker slot(s) lost", run_id, lost);
            }

            match writer_task.await {
                Ok(state) => info!(
                    "🏁 Run {} drained: cursor {}, {} succeeded, {} failed",
                    run_id, state.cursor, state.total_succeeded, state.total_failed
                ),
                Err(e) => error!("💥 Persistence writer for run {} failed: {}", run_id, e),
            }

            reporter_done.cancel();
            if let Err(e) = reporter.await {
                debug!("Stats reporter ended abnormally: {}", e);
            }

            let _run = inner.run.lock().await;
            let current = *inner.phase.borrow();
            match current.transition(ControlAction::Drained) {
                Ok(next) => {
                    inner.phase.send_replace(next);
                }
                Err(e) => warn!("Run {} drained in unexpected phase: {}", run_id, e),
            }
        });
    }
}

/// Reads the input list and both stores on the blocking pool
async fn load_run_inputs(
    paths: PathsConfig,
) -> Result<(Arc<[CustomerId]>, RecordStore, ProgressTracker), EngineError> {
    let loaded = tokio::task::spawn_blocking(move || {
        let ids = InputSource::new(&paths.input_list).load()?;
        let store = RecordStore::load(&paths.result_table, &paths.failure_list);
        let tracker = ProgressTracker::load(&paths.status_file);
        Ok::<_, PersistenceError>((ids, store, tracker))
    })
    .await
    .map_err(|e| EngineError::StartFailed(format!("loading run inputs failed: {e}")))?;

    let (ids, store, tracker) = loaded.map_err(|e| EngineError::StartFailed(e.to_string()))?;
    Ok((ids.into(), store, tracker))
}
