//! Top-level worker: owns the root cancellation token, the command and
//! response queues and the tracker every spawned task is registered with.
//!
//! # Lifecycle
//!
//! 1. `WorkerCore::new` creates the queues; collaborators that spawn work
//!    (the lifecycle manager) take `root_token()` and `tracker()` from it.
//! 2. `start` launches the dispatch loop and the status heartbeat.
//! 3. `RunningWorker::shutdown` cancels the root and waits until the tracker
//!    reports no outstanding task.

use std::time::Duration;

use chrono::Utc;
use clusterlink_common::command_types::STATUS_SYNC_KEY;
use clusterlink_common::{AgentConfig, Command, StatusReport, kinds};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::allow_list::AllowList;
use crate::router::{CommandRouter, HandlerRegistry, Outbound};

#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub max_in_flight: usize,
    pub command_queue_capacity: usize,
    pub response_queue_capacity: usize,
    pub status_interval: Duration,
}

impl From<&AgentConfig> for WorkerSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_in_flight: config.max_in_flight_commands,
            command_queue_capacity: config.command_queue_capacity.max(1),
            response_queue_capacity: config.command_queue_capacity.max(1),
            status_interval: config.status_interval(),
        }
    }
}

pub struct WorkerCore {
    settings: WorkerSettings,
    root: CancellationToken,
    tracker: TaskTracker,
    commands_tx: mpsc::Sender<Command>,
    commands_rx: mpsc::Receiver<Command>,
    responses_tx: mpsc::Sender<Command>,
}

impl WorkerCore {
    /// Returns the core and the receiving end of the response queue, which
    /// belongs to whatever carries responses back to the control plane.
    #[must_use]
    pub fn new(settings: WorkerSettings) -> (Self, mpsc::Receiver<Command>) {
        let (commands_tx, commands_rx) = mpsc::channel(settings.command_queue_capacity.max(1));
        let (responses_tx, responses_rx) = mpsc::channel(settings.response_queue_capacity.max(1));
        let core = Self {
            settings,
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
            commands_tx,
            commands_rx,
            responses_tx,
        };
        (core, responses_rx)
    }

    #[must_use]
    pub fn root_token(&self) -> CancellationToken {
        self.root.clone()
    }

    #[must_use]
    pub fn tracker(&self) -> TaskTracker {
        self.tracker.clone()
    }

    /// Sender for inbound commands.
    #[must_use]
    pub fn command_sender(&self) -> mpsc::Sender<Command> {
        self.commands_tx.clone()
    }

    /// Start dispatching with `handlers` and heartbeat `allow_list` snapshots.
    #[must_use]
    pub fn start(self, handlers: HandlerRegistry, allow_list: AllowList) -> RunningWorker {
        info!(kinds = ?handlers.kinds(), "starting worker");

        let router = CommandRouter::new(
            handlers,
            Outbound {
                commands: self.commands_tx.clone(),
                responses: self.responses_tx.clone(),
            },
            self.settings.max_in_flight,
            self.tracker.clone(),
            self.root.clone(),
        );
        self.tracker.spawn(router.run(self.commands_rx));

        self.tracker.spawn(report_status(
            allow_list,
            self.responses_tx,
            self.settings.status_interval,
            self.root.clone(),
        ));

        RunningWorker {
            root: self.root,
            tracker: self.tracker,
            commands_tx: self.commands_tx,
        }
    }
}

pub struct RunningWorker {
    root: CancellationToken,
    tracker: TaskTracker,
    commands_tx: mpsc::Sender<Command>,
}

impl RunningWorker {
    #[must_use]
    pub fn command_sender(&self) -> mpsc::Sender<Command> {
        self.commands_tx.clone()
    }

    #[must_use]
    pub fn root_token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Number of tasks still running (dispatch, heartbeat, handlers, pipelines).
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.tracker.len()
    }

    /// Cancel everything and wait for every tracked task to finish.
    pub async fn shutdown(self) {
        info!(outstanding = self.tracker.len(), "shutting down worker");
        self.root.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("worker stopped");
    }
}

/// Periodic `status_sync` heartbeat carrying the current allow-list.
async fn report_status(
    allow_list: AllowList,
    responses: mpsc::Sender<Command>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let report = StatusReport {
            namespaces: allow_list.snapshot(),
            reported_at: Utc::now(),
        };
        let payload = match serde_json::to_string(&report) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to encode status report");
                continue;
            }
        };

        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            sent = responses.send(Command::new(STATUS_SYNC_KEY, kinds::STATUS_SYNC, payload)) => {
                if sent.is_err() {
                    debug!("response queue closed, stopping status reports");
                    break;
                }
            }
        }
    }
    info!("status reporter stopped");
}
