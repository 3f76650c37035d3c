//! In-memory fakes for every port trait, plus small builders shared by the
//! test modules.

#![allow(clippy::expect_used, dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use clusterlink_agent::allow_list::AllowList;
use clusterlink_agent::error::{CredentialError, GitError, ReconcileError};
use clusterlink_agent::lifecycle::{Collaborators, EnvironmentLifecycleManager, PipelineSettings};
use clusterlink_agent::ports::{CredentialStore, Reconciler, RepoFactory, RepoWatcher, SyncTarget};
use clusterlink_common::{AgentInitOptions, EnvPara};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub const GIT_HOST: &str = "git.example.com";

// ── Builders ──────────────────────────────────────────────────────────────────

pub fn env(namespace: &str) -> EnvPara {
    EnvPara {
        namespace: namespace.to_string(),
        git_url: format!("git@{GIT_HOST}:org/{namespace}.git"),
        git_rsa_key: format!("KEY-{namespace}"),
    }
}

pub fn options(namespaces: &[&str]) -> AgentInitOptions {
    AgentInitOptions {
        git_host: GIT_HOST.to_string(),
        envs: namespaces.iter().map(|ns| env(ns)).collect(),
    }
}

pub fn payload(namespaces: &[&str]) -> String {
    serde_json::to_string(&options(namespaces)).expect("encode options")
}

// ── Credentials ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeCredentials {
    fail_on: Mutex<Option<String>>,
    provisioned: Mutex<Vec<Vec<String>>>,
    revoked: Mutex<Vec<String>>,
}

impl FakeCredentials {
    /// Fail any batch that contains `namespace`.
    pub fn fail_on(&self, namespace: &str) {
        *self.fail_on.lock().expect("lock") = Some(namespace.to_string());
    }

    pub fn provisioned(&self) -> Vec<Vec<String>> {
        self.provisioned.lock().expect("lock").clone()
    }

    pub fn revoked(&self) -> Vec<String> {
        self.revoked.lock().expect("lock").clone()
    }
}

#[async_trait]
impl CredentialStore for FakeCredentials {
    async fn provision(&self, _git_host: &str, envs: &[EnvPara]) -> Result<(), CredentialError> {
        let fail_on = self.fail_on.lock().expect("lock").clone();
        if let Some(ns) = fail_on {
            if envs.iter().any(|e| e.namespace == ns) {
                return Err(CredentialError::Write {
                    path: format!("/ssh-keys/rsa-{ns}").into(),
                    source: std::io::Error::other("disk full"),
                });
            }
        }
        self.provisioned
            .lock()
            .expect("lock")
            .push(envs.iter().map(|e| e.namespace.clone()).collect());
        Ok(())
    }

    async fn revoke(&self, namespace: &str) -> Result<(), CredentialError> {
        self.revoked.lock().expect("lock").push(namespace.to_string());
        Ok(())
    }
}

// ── Git ───────────────────────────────────────────────────────────────────────

/// Upstream state shared between a test and the repo handles it opened.
pub struct FakeRepo {
    remote: String,
    poll_interval: Duration,
    head: Mutex<String>,
    polls: AtomicUsize,
}

impl FakeRepo {
    pub fn push(&self, revision: &str) {
        *self.head.lock().expect("lock") = revision.to_string();
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RepoWatcher for FakeRepo {
    fn remote(&self) -> &str {
        &self.remote
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn head(&self) -> Result<String, GitError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(self.head.lock().expect("lock").clone())
    }
}

#[derive(Default)]
pub struct FakeRepos {
    opened: Mutex<Vec<Arc<FakeRepo>>>,
    fail_on: Mutex<Option<String>>,
}

impl FakeRepos {
    pub fn fail_on(&self, remote: &str) {
        *self.fail_on.lock().expect("lock") = Some(remote.to_string());
    }

    pub fn opened(&self) -> Vec<Arc<FakeRepo>> {
        self.opened.lock().expect("lock").clone()
    }

    pub fn remotes(&self) -> Vec<String> {
        self.opened().iter().map(|r| r.remote.clone()).collect()
    }

    /// Most recently opened handle for `remote`.
    pub fn repo(&self, remote: &str) -> Arc<FakeRepo> {
        self.opened()
            .into_iter()
            .rev()
            .find(|r| r.remote == remote)
            .expect("repo was opened")
    }
}

impl RepoFactory for FakeRepos {
    fn open(
        &self,
        remote: &str,
        poll_interval: Duration,
    ) -> Result<Arc<dyn RepoWatcher>, GitError> {
        if self.fail_on.lock().expect("lock").as_deref() == Some(remote) {
            return Err(GitError::InvalidRemote(remote.to_string()));
        }
        let repo = Arc::new(FakeRepo {
            remote: remote.to_string(),
            poll_interval,
            head: Mutex::new("rev-1".to_string()),
            polls: AtomicUsize::new(0),
        });
        self.opened.lock().expect("lock").push(Arc::clone(&repo));
        Ok(repo)
    }
}

// ── Reconciler ────────────────────────────────────────────────────────────────

/// Reports every reconcile as `(namespace, revision)` on a channel.
pub struct RecordingReconciler {
    tx: mpsc::UnboundedSender<(String, Option<String>)>,
    calls: Mutex<HashMap<String, usize>>,
    fail: bool,
}

impl RecordingReconciler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, Option<String>)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let reconciler = Self {
            tx,
            calls: Mutex::new(HashMap::new()),
            fail: false,
        };
        (reconciler, rx)
    }

    pub fn failing() -> (Self, mpsc::UnboundedReceiver<(String, Option<String>)>) {
        let (mut reconciler, rx) = Self::new();
        reconciler.fail = true;
        (reconciler, rx)
    }

    pub fn calls(&self, namespace: &str) -> usize {
        self.calls
            .lock()
            .expect("lock")
            .get(namespace)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Reconciler for RecordingReconciler {
    async fn reconcile(&self, target: SyncTarget<'_>) -> Result<(), ReconcileError> {
        *self
            .calls
            .lock()
            .expect("lock")
            .entry(target.namespace.to_string())
            .or_default() += 1;
        let _ = self.tx.send((
            target.namespace.to_string(),
            target.revision.map(str::to_owned),
        ));
        if self.fail {
            return Err(ReconcileError::Failed {
                namespace: target.namespace.to_string(),
                status: "exit status: 1".to_string(),
                stderr: "apply failed".to_string(),
            });
        }
        Ok(())
    }
}

// ── Harness ───────────────────────────────────────────────────────────────────

pub const POLL: Duration = Duration::from_millis(50);
pub const SYNC: Duration = Duration::from_secs(600);

/// A lifecycle manager wired to fakes, with handles onto each of them.
pub struct Harness {
    pub lifecycle: Arc<EnvironmentLifecycleManager>,
    pub credentials: Arc<FakeCredentials>,
    pub repos: Arc<FakeRepos>,
    pub reconciler: Arc<RecordingReconciler>,
    pub reconciles: mpsc::UnboundedReceiver<(String, Option<String>)>,
    pub allow_list: AllowList,
    pub root: CancellationToken,
    pub tracker: TaskTracker,
}

impl Harness {
    pub fn new() -> Self {
        let (reconciler, reconciles) = RecordingReconciler::new();
        Self::with_reconciler(reconciler, reconciles)
    }

    pub fn with_reconciler(
        reconciler: RecordingReconciler,
        reconciles: mpsc::UnboundedReceiver<(String, Option<String>)>,
    ) -> Self {
        Self::build(
            reconciler,
            reconciles,
            CancellationToken::new(),
            TaskTracker::new(),
        )
    }

    /// Spawn pipelines under an existing root token and tracker, e.g. a
    /// worker's.
    pub fn attached(root: CancellationToken, tracker: TaskTracker) -> Self {
        let (reconciler, reconciles) = RecordingReconciler::new();
        Self::build(reconciler, reconciles, root, tracker)
    }

    fn build(
        reconciler: RecordingReconciler,
        reconciles: mpsc::UnboundedReceiver<(String, Option<String>)>,
        root: CancellationToken,
        tracker: TaskTracker,
    ) -> Self {
        let credentials = Arc::new(FakeCredentials::default());
        let repos = Arc::new(FakeRepos::default());
        let reconciler = Arc::new(reconciler);
        let allow_list = AllowList::new();
        let lifecycle = Arc::new(EnvironmentLifecycleManager::new(
            Collaborators {
                credentials: credentials.clone(),
                repos: repos.clone(),
                reconciler: reconciler.clone(),
            },
            allow_list.clone(),
            PipelineSettings {
                poll_interval: POLL,
                sync_interval: SYNC,
            },
            root.clone(),
            tracker.clone(),
        ));
        Self {
            lifecycle,
            credentials,
            repos,
            reconciler,
            reconciles,
            allow_list,
            root,
            tracker,
        }
    }

    /// Wait for the next reconcile of `namespace`, skipping others.
    pub async fn next_reconcile(&mut self, namespace: &str) -> Option<String> {
        loop {
            let next = tokio::time::timeout(Duration::from_secs(5), self.reconciles.recv());
            let (ns, revision) = next
                .await
                .expect("reconcile within timeout")
                .expect("reconciler alive");
            if ns == namespace {
                return revision;
            }
        }
    }

    pub async fn shutdown(&self) {
        self.root.cancel();
        self.tracker.close();
        tokio::time::timeout(Duration::from_secs(5), self.tracker.wait())
            .await
            .expect("all pipelines stop");
    }
}
