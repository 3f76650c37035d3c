//! Port trait definitions for the collaborators the agent core drives.
//!
//! The core only talks to the filesystem, git and the cluster through these
//! traits; `crate::infra` holds the production implementations and tests
//! substitute in-memory fakes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clusterlink_common::EnvPara;

use crate::error::{CredentialError, GitError, ReconcileError};

// ── Credentials ───────────────────────────────────────────────────────────────

/// Writes per-namespace SSH keys and the host-config stanzas that bind the
/// shared git host to each namespace alias.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Write every key and the full host config for `envs`.
    ///
    /// Must be all-or-nothing: on error no new file is left in place and
    /// files that existed before keep their previous contents.
    async fn provision(&self, git_host: &str, envs: &[EnvPara]) -> Result<(), CredentialError>;

    /// Remove the key of a namespace that is no longer managed.
    async fn revoke(&self, namespace: &str) -> Result<(), CredentialError>;
}

// ── Git ───────────────────────────────────────────────────────────────────────

/// A watched git remote.
#[async_trait]
pub trait RepoWatcher: Send + Sync {
    fn remote(&self) -> &str;

    /// How often the pipeline should ask for the upstream head.
    fn poll_interval(&self) -> Duration;

    /// Current upstream revision of the watched ref.
    async fn head(&self) -> Result<String, GitError>;
}

/// Builds repo handles. Called while planning an update, before any side
/// effect, so a failure here rejects the update cleanly.
pub trait RepoFactory: Send + Sync {
    fn open(&self, remote: &str, poll_interval: Duration)
    -> Result<Arc<dyn RepoWatcher>, GitError>;
}

// ── Cluster ───────────────────────────────────────────────────────────────────

/// What a single reconcile pass is asked to converge.
#[derive(Debug, Clone, Copy)]
pub struct SyncTarget<'a> {
    pub namespace: &'a str,
    pub remote: &'a str,
    pub revision: Option<&'a str>,
}

/// Applies the manifests of one namespace to the cluster.
#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(&self, target: SyncTarget<'_>) -> Result<(), ReconcileError>;
}
