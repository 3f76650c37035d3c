//! Reconciler that hands each pass to an operator-supplied program.
//!
//! The program gets the target through `CLUSTERLINK_NAMESPACE`,
//! `CLUSTERLINK_REMOTE` and `CLUSTERLINK_REVISION`; how it applies the
//! manifests (kubectl, helm, ...) is its own business.

use std::process::Stdio;

use async_trait::async_trait;
use tracing::debug;

use crate::error::ReconcileError;
use crate::ports::{Reconciler, SyncTarget};

#[derive(Debug, Clone, Default)]
pub struct CommandReconciler {
    program: Option<String>,
}

impl CommandReconciler {
    #[must_use]
    pub fn new(program: Option<String>) -> Self {
        Self {
            program: program.filter(|p| !p.trim().is_empty()),
        }
    }
}

#[async_trait]
impl Reconciler for CommandReconciler {
    async fn reconcile(&self, target: SyncTarget<'_>) -> Result<(), ReconcileError> {
        let Some(program) = &self.program else {
            debug!(namespace = target.namespace, "no reconcile command configured, skipping");
            return Ok(());
        };

        let output = tokio::process::Command::new(program)
            .env("CLUSTERLINK_NAMESPACE", target.namespace)
            .env("CLUSTERLINK_REMOTE", target.remote)
            .env("CLUSTERLINK_REVISION", target.revision.unwrap_or_default())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(ReconcileError::Spawn)?;

        if output.status.success() {
            return Ok(());
        }
        Err(ReconcileError::Failed {
            namespace: target.namespace.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
