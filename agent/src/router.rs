//! Type-keyed command dispatch.
//!
//! A [`HandlerRegistry`] is filled once at startup and handed to a
//! [`CommandRouter`], which runs every known command on its own task and
//! forwards what the handler returns to the outbound queues.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use clusterlink_common::Command;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::RouterError;

/// What a handler hands back: commands to re-dispatch and an optional reply.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HandlerOutcome {
    pub follow_ups: Vec<Command>,
    pub response: Option<Command>,
}

impl HandlerOutcome {
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn respond(response: Command) -> Self {
        Self {
            follow_ups: Vec::new(),
            response: Some(response),
        }
    }

    #[must_use]
    pub fn follow_up(follow_ups: Vec<Command>) -> Self {
        Self {
            follow_ups,
            response: None,
        }
    }
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, cmd: &Command) -> HandlerOutcome;
}

/// Mapping from command type to handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `kind` to `handler`. Registering a type twice is a wiring bug
    /// and is reported instead of silently replacing the first handler.
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<(), RouterError> {
        let kind = kind.into();
        if self.handlers.contains_key(&kind) {
            return Err(RouterError::DuplicateHandler(kind));
        }
        self.handlers.insert(kind, handler);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, kind: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(kind).cloned()
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

/// Result of handing one command to the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A handler task was started.
    Spawned,
    /// No handler for the type; dropped without a response.
    Unknown,
    /// Shutdown began before a handler slot was free.
    Cancelled,
}

/// Where handler output goes.
#[derive(Debug, Clone)]
pub struct Outbound {
    /// Follow-ups are fed back into the inbound queue.
    pub commands: mpsc::Sender<Command>,
    pub responses: mpsc::Sender<Command>,
}

pub struct CommandRouter {
    handlers: Arc<HandlerRegistry>,
    outbound: Outbound,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    unknown_commands: Arc<AtomicU64>,
}

impl CommandRouter {
    /// `max_in_flight` bounds concurrently running handlers; further commands
    /// wait in the inbound queue.
    #[must_use]
    pub fn new(
        handlers: HandlerRegistry,
        outbound: Outbound,
        max_in_flight: usize,
        tracker: TaskTracker,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            handlers: Arc::new(handlers),
            outbound,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            tracker,
            shutdown,
            unknown_commands: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of commands dropped because no handler matched their type.
    #[must_use]
    pub fn unknown_commands(&self) -> u64 {
        self.unknown_commands.load(Ordering::Relaxed)
    }

    /// Route one command. Returns once its handler task is started; the
    /// handler itself runs concurrently with later dispatches.
    pub async fn dispatch(&self, cmd: Command) -> Dispatch {
        info!(key = %cmd.key, kind = %cmd.kind, "received command");

        // Unknown types never get a reply; callers must not wait for one.
        let Some(handler) = self.handlers.get(&cmd.kind) else {
            self.unknown_commands.fetch_add(1, Ordering::Relaxed);
            warn!(key = %cmd.key, kind = %cmd.kind, "no handler registered, dropping command");
            return Dispatch::Unknown;
        };

        let permit = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => return Dispatch::Cancelled,
            permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return Dispatch::Cancelled,
            },
        };

        let outbound = self.outbound.clone();
        let tracker = self.tracker.clone();
        let shutdown = self.shutdown.clone();
        self.tracker.spawn(async move {
            let outcome = handler.handle(&cmd).await;
            drop(permit);
            forward(outcome, &outbound, &tracker, &shutdown);
        });
        Dispatch::Spawned
    }

    /// Dispatch until the inbound queue closes or shutdown is requested.
    pub async fn run(self, mut inbound: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                next = inbound.recv() => match next {
                    Some(cmd) => {
                        if self.dispatch(cmd).await == Dispatch::Cancelled {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        info!("command dispatcher stopped");
    }
}

/// Follow-ups and the response are sent from their own tasks so a full
/// queue on one side never holds up the other, or the dispatcher.
fn forward(
    outcome: HandlerOutcome,
    outbound: &Outbound,
    tracker: &TaskTracker,
    shutdown: &CancellationToken,
) {
    if !outcome.follow_ups.is_empty() {
        let tx = outbound.commands.clone();
        let shutdown = shutdown.clone();
        tracker.spawn(async move {
            for cmd in outcome.follow_ups {
                tokio::select! {
                    () = shutdown.cancelled() => return,
                    sent = tx.send(cmd) => if sent.is_err() {
                        debug!("command queue closed, dropping follow-ups");
                        return;
                    },
                }
            }
        });
    }

    if let Some(response) = outcome.response {
        let tx = outbound.responses.clone();
        let shutdown = shutdown.clone();
        tracker.spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => {}
                sent = tx.send(response) => if let Err(e) = sent {
                    debug!(key = %e.0.key, "response queue closed, dropping response");
                },
            }
        });
    }
}
