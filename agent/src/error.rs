//! Typed error enums.
//!
//! Each concern gets its own enum so callers can match on what failed.
//! Everything converts to `anyhow::Error` at the binary edge via `?`.

use std::path::PathBuf;

use clusterlink_common::types::InitPayloadError;
use thiserror::Error;

// ── Router errors ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("a handler is already registered for command type '{0}'")]
    DuplicateHandler(String),
}

// ── Credential errors ─────────────────────────────────────────────────────────

/// Errors raised while writing SSH keys and host config.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to install {path}: {source}")]
    Commit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("credential writer task failed: {0}")]
    Task(String),
}

// ── Git errors ────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum GitError {
    #[error("invalid remote '{0}'")]
    InvalidRemote(String),

    #[error("failed to run git: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("git ls-remote {remote} timed out after {secs}s")]
    Timeout { remote: String, secs: u64 },

    #[error("git ls-remote {remote} failed: {stderr}")]
    Failed { remote: String, stderr: String },
}

// ── Reconcile errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to spawn reconcile command: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("reconcile of namespace '{namespace}' exited with {status}: {stderr}")]
    Failed {
        namespace: String,
        status: String,
        stderr: String,
    },
}

// ── Lifecycle errors ──────────────────────────────────────────────────────────

/// Reasons an `agent_init` update was rejected. None of them leave state behind.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Payload(#[from] InitPayloadError),

    #[error("credential provisioning failed: {0}")]
    Credentials(#[from] CredentialError),

    #[error("cannot watch namespace '{namespace}': {source}")]
    Repo {
        namespace: String,
        #[source]
        source: GitError,
    },

    #[error("agent is shutting down")]
    ShuttingDown,
}
