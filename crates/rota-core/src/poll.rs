//! Background polling of the shared folder.
//!
//! A spawned task periodically asks the session to merge in snapshots
//! newer than its base. A tick that finds the session busy is dropped,
//! never queued, so at most one folder operation is in flight at a
//! time; while a merge awaits resolutions the poller stops listing the
//! folder and holds in `AwaitingResolution` until the merge is applied
//! or cancelled.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use crate::models::FileVersionInfo;
use crate::session::{SyncSession, SyncStatus};

/// Where the poller currently is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Waiting for the next tick
    Idle,
    /// A folder check is in flight
    Polling,
    /// A pending merge needs resolutions before polling resumes
    AwaitingResolution,
}

/// Notable outcomes of poll ticks, delivered to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    /// Newer snapshots merged cleanly into the working copy
    FastForwarded {
        /// The snapshot that became the new base
        new_base: FileVersionInfo,
    },
    /// Divergent changes were parked for resolution
    ConflictsFound {
        /// Number of rows needing a decision
        count: usize,
    },
    /// The tick found the session busy and was dropped
    Skipped,
    /// The folder check itself failed
    Failed {
        /// Rendered error
        message: String,
    },
}

/// Configures and spawns the background poller for one session
pub struct PollScheduler {
    session: SyncSession,
    interval: Duration,
}

impl PollScheduler {
    /// Scheduler for `session`, ticking at its configured poll interval
    #[must_use]
    pub fn new(session: SyncSession) -> Self {
        let interval = session.config().poll_interval();
        Self { session, interval }
    }

    /// Override the tick interval
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Spawn the polling task.
    ///
    /// Returns a handle for observing and stopping the poller plus the
    /// event stream. Dropping the handle also stops the task.
    #[must_use]
    pub fn spawn(self) -> (PollHandle, mpsc::UnboundedReceiver<PollEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(PollState::Idle);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        // tokio panics on a zero interval.
        let interval = self.interval.max(Duration::from_millis(1));
        let task = tokio::spawn(run(self.session, interval, event_tx, state_tx, shutdown_rx));
        (
            PollHandle {
                shutdown: shutdown_tx,
                state: state_rx,
                task,
            },
            event_rx,
        )
    }
}

/// Handle to a running poller
pub struct PollHandle {
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<PollState>,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// The poller's current state
    #[must_use]
    pub fn state(&self) -> PollState {
        *self.state.borrow()
    }

    /// Whether the polling task has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the poller and wait for the task to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(error) = self.task.await {
            warn!(%error, "background poller did not shut down cleanly");
        }
    }
}

async fn run(
    session: SyncSession,
    interval: Duration,
    events: mpsc::UnboundedSender<PollEvent>,
    state: watch::Sender<PollState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately; polling proper starts one
    // interval after spawn.
    ticker.tick().await;

    let mut current = PollState::Idle;
    let mut consecutive_failures: u32 = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let awaiting = current == PollState::AwaitingResolution;
                if !awaiting {
                    current = PollState::Polling;
                    state.send_replace(current);
                }
                debug!(?current, "poll tick");

                match session.try_check_remote().await {
                    Ok(None) => {
                        debug!("session busy, tick dropped");
                        let _ = events.send(PollEvent::Skipped);
                        if !awaiting {
                            current = PollState::Idle;
                            state.send_replace(current);
                        }
                    }
                    Ok(Some(SyncStatus::UpToDate)) => {
                        consecutive_failures = 0;
                        current = PollState::Idle;
                        state.send_replace(current);
                    }
                    Ok(Some(SyncStatus::FastForwarded { new_base })) => {
                        consecutive_failures = 0;
                        let _ = events.send(PollEvent::FastForwarded { new_base });
                        current = PollState::Idle;
                        state.send_replace(current);
                    }
                    Ok(Some(SyncStatus::ConflictsFound { count })) => {
                        consecutive_failures = 0;
                        // One notification per parked merge; repeat ticks
                        // that see the same pending merge stay quiet.
                        if !awaiting {
                            let _ = events.send(PollEvent::ConflictsFound { count });
                        }
                        current = PollState::AwaitingResolution;
                        state.send_replace(current);
                    }
                    Err(error) => {
                        consecutive_failures = consecutive_failures.saturating_add(1);
                        error!(%error, consecutive_failures, "background poll failed");
                        let _ = events.send(PollEvent::Failed {
                            message: error.to_string(),
                        });
                        current = PollState::Idle;
                        state.send_replace(current);
                    }
                }
            }
            // A closed channel means the handle is gone; stop either way.
            _ = shutdown.changed() => break,
        }
    }
    debug!("background poller stopped");
}
