//! Per-namespace sync pipeline: a repo watcher paired with a reconcile loop.
//!
//! Both loops share one [`StopSignal`] and one depth-1 [`SyncTrigger`]. The
//! watcher polls the upstream head and fires the trigger on change; the sync
//! loop reconciles on trigger or on a fallback tick. Closing the stop signal
//! (or cancelling the root token it derives from) ends both loops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::ports::{Reconciler, RepoWatcher, SyncTarget};

// ── Stop signal ───────────────────────────────────────────────────────────────

/// One-shot cancellation scoped to a single namespace.
///
/// Derived from the root token, so process shutdown closes it too. `close`
/// is guarded: only the first call has an effect.
#[derive(Debug)]
pub struct StopSignal {
    token: CancellationToken,
    closed: AtomicBool,
}

impl StopSignal {
    #[must_use]
    pub fn child_of(root: &CancellationToken) -> Self {
        Self {
            token: root.child_token(),
            closed: AtomicBool::new(false),
        }
    }

    /// Close the signal. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.token.cancel();
        true
    }

    /// `true` once closed directly or through the root token.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn closed(&self) {
        self.token.cancelled().await;
    }
}

// ── Sync trigger ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerResult {
    Queued,
    /// A sync was already pending; this request merged into it.
    Coalesced,
    /// The sync loop is gone.
    Closed,
}

/// Depth-1 wake-up for the sync loop. At most one request is ever pending.
#[derive(Debug, Clone)]
pub struct SyncTrigger {
    tx: mpsc::Sender<()>,
}

impl SyncTrigger {
    fn channel() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    pub fn fire(&self) -> TriggerResult {
        match self.tx.try_send(()) {
            Ok(()) => TriggerResult::Queued,
            Err(mpsc::error::TrySendError::Full(())) => TriggerResult::Coalesced,
            Err(mpsc::error::TrySendError::Closed(())) => TriggerResult::Closed,
        }
    }
}

// ── Runtime handle ────────────────────────────────────────────────────────────

/// Registry entry for an active namespace.
#[derive(Clone)]
pub struct NamespaceRuntime {
    repo: Arc<dyn RepoWatcher>,
    stop: Arc<StopSignal>,
    trigger: SyncTrigger,
    revision: watch::Receiver<Option<String>>,
}

impl NamespaceRuntime {
    #[must_use]
    pub fn remote(&self) -> &str {
        self.repo.remote()
    }

    #[must_use]
    pub fn stop_signal(&self) -> &Arc<StopSignal> {
        &self.stop
    }

    #[must_use]
    pub fn trigger(&self) -> &SyncTrigger {
        &self.trigger
    }

    /// Last upstream revision the watcher saw.
    #[must_use]
    pub fn revision(&self) -> Option<String> {
        self.revision.borrow().clone()
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

/// Not-yet-started pipeline. `new` allocates the signals and hands back the
/// registry entry; `spawn` starts both loops.
pub struct NamespaceSyncPipeline {
    namespace: String,
    repo: Arc<dyn RepoWatcher>,
    reconciler: Arc<dyn Reconciler>,
    sync_interval: Duration,
    stop: Arc<StopSignal>,
    trigger: SyncTrigger,
    trigger_rx: mpsc::Receiver<()>,
    revision_tx: watch::Sender<Option<String>>,
}

impl NamespaceSyncPipeline {
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        repo: Arc<dyn RepoWatcher>,
        reconciler: Arc<dyn Reconciler>,
        sync_interval: Duration,
        root: &CancellationToken,
    ) -> (Self, NamespaceRuntime) {
        let stop = Arc::new(StopSignal::child_of(root));
        let (trigger, trigger_rx) = SyncTrigger::channel();
        let (revision_tx, revision_rx) = watch::channel(None);
        let runtime = NamespaceRuntime {
            repo: Arc::clone(&repo),
            stop: Arc::clone(&stop),
            trigger: trigger.clone(),
            revision: revision_rx,
        };
        let pipeline = Self {
            namespace: namespace.into(),
            repo,
            reconciler,
            sync_interval,
            stop,
            trigger,
            trigger_rx,
            revision_tx,
        };
        (pipeline, runtime)
    }

    /// Start the watcher and the sync loop on `tracker`.
    pub fn spawn(self, tracker: &TaskTracker) {
        info!(namespace = %self.namespace, remote = %self.repo.remote(), "starting sync pipeline");

        let syncer = Syncer {
            namespace: self.namespace.clone(),
            repo: Arc::clone(&self.repo),
            reconciler: self.reconciler,
            sync_interval: self.sync_interval,
            stop: Arc::clone(&self.stop),
            trigger_rx: self.trigger_rx,
            revision: self.revision_tx.subscribe(),
        };
        let watcher = Watcher {
            namespace: self.namespace,
            repo: self.repo,
            stop: self.stop,
            trigger: self.trigger,
            revision: self.revision_tx,
        };

        tracker.spawn(watcher.run());
        tracker.spawn(syncer.run());
    }
}

struct Watcher {
    namespace: String,
    repo: Arc<dyn RepoWatcher>,
    stop: Arc<StopSignal>,
    trigger: SyncTrigger,
    revision: watch::Sender<Option<String>>,
}

impl Watcher {
    async fn run(self) {
        let mut ticker = tokio::time::interval(self.repo.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.stop.closed() => break,
                _ = ticker.tick() => {}
            }

            let head = tokio::select! {
                biased;
                () = self.stop.closed() => break,
                head = self.repo.head() => head,
            };

            match head {
                Ok(rev) => self.observe(rev),
                Err(e) => {
                    warn!(namespace = %self.namespace, error = %e, "failed to poll upstream");
                }
            }
        }
        info!(namespace = %self.namespace, "repo watcher stopped");
    }

    fn observe(&self, rev: String) {
        let changed = self.revision.send_if_modified(|current| {
            if current.as_deref() == Some(rev.as_str()) {
                return false;
            }
            *current = Some(rev.clone());
            true
        });
        if !changed {
            return;
        }
        let result = self.trigger.fire();
        debug!(namespace = %self.namespace, revision = %rev, ?result, "upstream changed");
    }
}

struct Syncer {
    namespace: String,
    repo: Arc<dyn RepoWatcher>,
    reconciler: Arc<dyn Reconciler>,
    sync_interval: Duration,
    stop: Arc<StopSignal>,
    trigger_rx: mpsc::Receiver<()>,
    revision: watch::Receiver<Option<String>>,
}

impl Syncer {
    async fn run(mut self) {
        let mut fallback =
            tokio::time::interval_at(Instant::now() + self.sync_interval, self.sync_interval);
        fallback.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let reason = tokio::select! {
                biased;
                () = self.stop.closed() => break,
                Some(()) = self.trigger_rx.recv() => "upstream change",
                _ = fallback.tick() => "periodic",
            };

            let revision = self.revision.borrow().clone();
            let target = SyncTarget {
                namespace: &self.namespace,
                remote: self.repo.remote(),
                revision: revision.as_deref(),
            };
            // In-flight reconciles run to completion even if stop closes meanwhile.
            match self.reconciler.reconcile(target).await {
                Ok(()) => info!(namespace = %self.namespace, reason, "namespace reconciled"),
                Err(e) => {
                    warn!(namespace = %self.namespace, reason, error = %e, "reconcile failed");
                }
            }
            fallback.reset();
        }
        info!(namespace = %self.namespace, "sync loop stopped");
    }
}
