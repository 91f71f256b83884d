//! # Control Plane
//!
//! Run lifecycle state machine plus the cooperative signals workers poll at
//! their checkpoints. A fresh [`RunControl`] is created for every run, so the
//! flags start as `{paused: false, stopping: false, active_workers: 0}`.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Lifecycle of the batch job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Running,
    Paused,
    Stopping,
    Stopped,
}

impl RunPhase {
    /// A run exists and has not finished draining
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused | Self::Stopping)
    }

    pub fn transition(self, action: ControlAction) -> Result<Self, ControlError> {
        let next = match (self, action) {
            (Self::Idle | Self::Stopped, ControlAction::Start) => Self::Running,
            (Self::Running, ControlAction::Pause) => Self::Paused,
            (Self::Paused, ControlAction::Resume) => Self::Running,
            (Self::Running | Self::Paused, ControlAction::Stop) => Self::Stopping,
            (Self::Stopping, ControlAction::Drained) => Self::Stopped,
            (Self::Running | Self::Paused, ControlAction::Drained) => Self::Idle,
            (phase, action) => return Err(ControlError::InvalidStateTransition { phase, action }),
        };
        Ok(next)
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Requests that move the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Start,
    Pause,
    Resume,
    Stop,
    /// Every worker has exited
    Drained,
}

impl std::fmt::Display for ControlAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
            Self::Drained => "drain",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlError {
    #[error("cannot {action} while {phase}")]
    InvalidStateTransition { phase: RunPhase, action: ControlAction },
}

/// What a worker should do after a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Continue,
    Stop,
}

/// Per-run cooperative signals shared by every worker of the run
#[derive(Debug)]
pub struct RunControl {
    paused: watch::Sender<bool>,
    stop: CancellationToken,
    active_workers: AtomicUsize,
    pause_poll: Duration,
}

impl RunControl {
    pub fn new(pause_poll: Duration) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            paused,
            stop: CancellationToken::new(),
            active_workers: AtomicUsize::new(0),
            pause_poll,
        }
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    pub(crate) fn worker_started(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns the number of workers still running
    pub(crate) fn worker_finished(&self) -> usize {
        self.active_workers.fetch_sub(1, Ordering::SeqCst).saturating_sub(1)
    }

    /// Blocks while paused. Returns [`Checkpoint::Stop`] once a stop is
    /// requested, whether paused or not.
    pub async fn checkpoint(&self, worker_id: usize) -> Checkpoint {
        let mut paused = self.paused.subscribe();
        let mut announced = false;

        loop {
            if self.stop.is_cancelled() {
                return Checkpoint::Stop;
            }
            let is_paused = *paused.borrow_and_update();
            if !is_paused {
                if announced {
                    info!(worker_id, "▶️ Worker resumed");
                }
                return Checkpoint::Continue;
            }
            if !announced {
                info!(worker_id, "⏸️ Worker paused");
                announced = true;
            }

            tokio::select! {
                () = self.stop.cancelled() => return Checkpoint::Stop,
                _ = paused.changed() => {}
                () = tokio::time::sleep(self.pause_poll) => {
                    debug!(worker_id, "Still paused");
                }
            }
        }
    }

    /// Sleeps for `duration` unless a stop arrives first. Returns false on stop.
    pub async fn sleep_or_stop(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.stop.is_cancelled();
        }
        tokio::select! {
            () = self.stop.cancelled() => false,
            () = tokio::time::sleep(duration) => true,
        }
    }
}
