//! Environment lifecycle: turns each `agent_init` into a diff against the
//! running namespaces and starts or stops their sync pipelines.
//!
//! All registry access goes through one async mutex that is held for the
//! whole update, so overlapping `agent_init` commands apply one after the
//! other and never interleave.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clusterlink_common::types::InitPayloadError;
use clusterlink_common::{AgentInitOptions, AgentStatus, Command, NamespaceStatus, kinds};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::allow_list::AllowList;
use crate::error::LifecycleError;
use crate::pipeline::{NamespaceRuntime, NamespaceSyncPipeline, TriggerResult};
use crate::ports::{CredentialStore, Reconciler, RepoFactory, RepoWatcher};
use crate::router::{CommandHandler, HandlerOutcome};

/// Timing shared by every pipeline the manager starts.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub poll_interval: Duration,
    pub sync_interval: Duration,
}

/// External collaborators the manager drives.
#[derive(Clone)]
pub struct Collaborators {
    pub credentials: Arc<dyn CredentialStore>,
    pub repos: Arc<dyn RepoFactory>,
    pub reconciler: Arc<dyn Reconciler>,
}

/// Namespaces touched by one successful update, each list sorted.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub retained: Vec<String>,
}

#[derive(Default)]
struct LifecycleState {
    registry: HashMap<String, NamespaceRuntime>,
    baseline: AgentInitOptions,
}

pub struct EnvironmentLifecycleManager {
    state: Mutex<LifecycleState>,
    collaborators: Collaborators,
    allow_list: AllowList,
    settings: PipelineSettings,
    root: CancellationToken,
    tracker: TaskTracker,
}

impl EnvironmentLifecycleManager {
    /// Pipelines are spawned on `tracker` and their stop signals derive from
    /// `root`, so cancelling `root` tears every namespace down.
    #[must_use]
    pub fn new(
        collaborators: Collaborators,
        allow_list: AllowList,
        settings: PipelineSettings,
        root: CancellationToken,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            state: Mutex::new(LifecycleState::default()),
            collaborators,
            allow_list,
            settings,
            root,
            tracker,
        }
    }

    #[must_use]
    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    /// Make `options` the running configuration.
    ///
    /// Nothing is changed unless every repo handle can be built and every
    /// credential written. After that point the update cannot fail: the
    /// allow-list is committed, added namespaces start, removed ones stop.
    pub async fn apply(&self, options: AgentInitOptions) -> Result<ApplyReport, LifecycleError> {
        if self.root.is_cancelled() {
            return Err(LifecycleError::ShuttingDown);
        }
        options.validate().map_err(InitPayloadError::from)?;

        let mut state = self.state.lock().await;

        let desired: HashSet<&str> = options.namespaces().collect();
        let mut removed: Vec<String> = state
            .registry
            .keys()
            .filter(|ns| !desired.contains(ns.as_str()))
            .cloned()
            .collect();
        removed.sort_unstable();
        let mut retained: Vec<String> = options
            .namespaces()
            .filter(|ns| state.registry.contains_key(*ns))
            .map(str::to_owned)
            .collect();
        retained.sort_unstable();

        let mut planned: Vec<(String, Arc<dyn RepoWatcher>)> = Vec::new();
        for env in options
            .envs
            .iter()
            .filter(|e| !state.registry.contains_key(&e.namespace))
        {
            let remote = env.remote(&options.git_host);
            let repo = self
                .collaborators
                .repos
                .open(&remote, self.settings.poll_interval)
                .map_err(|source| LifecycleError::Repo {
                    namespace: env.namespace.clone(),
                    source,
                })?;
            planned.push((env.namespace.clone(), repo));
        }

        self.collaborators
            .credentials
            .provision(&options.git_host, &options.envs)
            .await?;

        // Authorize before anything for a new namespace starts.
        self.allow_list.replace(options.namespaces());

        let mut added = Vec::with_capacity(planned.len());
        for (namespace, repo) in planned {
            let (pipeline, runtime) = NamespaceSyncPipeline::new(
                namespace.clone(),
                repo,
                Arc::clone(&self.collaborators.reconciler),
                self.settings.sync_interval,
                &self.root,
            );
            state.registry.insert(namespace.clone(), runtime);
            pipeline.spawn(&self.tracker);
            added.push(namespace);
        }
        added.sort_unstable();

        for namespace in &removed {
            if let Some(runtime) = state.registry.get(namespace) {
                if runtime.stop_signal().close() {
                    info!(namespace = %namespace, "stopping environment");
                }
            }
            state.registry.remove(namespace);
            if let Err(e) = self.collaborators.credentials.revoke(namespace).await {
                warn!(namespace = %namespace, error = %e, "failed to revoke credentials");
            }
        }

        state.baseline = options;

        Ok(ApplyReport {
            added,
            removed,
            retained,
        })
    }

    /// Sorted names of every namespace with a running pipeline.
    pub async fn tracked_namespaces(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut namespaces: Vec<String> = state.registry.keys().cloned().collect();
        namespaces.sort_unstable();
        namespaces
    }

    /// Registry entry for `namespace`, if it is active.
    pub async fn runtime(&self, namespace: &str) -> Option<NamespaceRuntime> {
        self.state.lock().await.registry.get(namespace).cloned()
    }

    /// Ask `namespace` to reconcile now. `None` if it is not tracked.
    pub async fn request_sync(&self, namespace: &str) -> Option<TriggerResult> {
        let state = self.state.lock().await;
        state.registry.get(namespace).map(|rt| rt.trigger().fire())
    }

    pub async fn status(&self) -> AgentStatus {
        let state = self.state.lock().await;
        let mut namespaces: Vec<NamespaceStatus> = state
            .registry
            .iter()
            .map(|(namespace, rt)| NamespaceStatus {
                namespace: namespace.clone(),
                remote: rt.remote().to_string(),
                revision: rt.revision(),
            })
            .collect();
        namespaces.sort_by(|a, b| a.namespace.cmp(&b.namespace));
        AgentStatus {
            git_host: state.baseline.git_host.clone(),
            namespaces,
        }
    }
}

#[async_trait]
impl CommandHandler for EnvironmentLifecycleManager {
    async fn handle(&self, cmd: &Command) -> HandlerOutcome {
        let result = match AgentInitOptions::from_payload(&cmd.payload) {
            Ok(options) => self.apply(options).await,
            Err(e) => Err(LifecycleError::from(e)),
        };

        match result {
            Ok(report) => {
                info!(
                    key = %cmd.key,
                    added = ?report.added,
                    removed = ?report.removed,
                    retained = report.retained.len(),
                    "agent configuration applied",
                );
                HandlerOutcome::respond(cmd.reply(kinds::AGENT_INIT_SUCCEED, cmd.payload.clone()))
            }
            Err(e) => {
                warn!(key = %cmd.key, error = %e, "agent configuration rejected");
                HandlerOutcome::respond(cmd.reply_error(kinds::AGENT_INIT_FAILED, &e))
            }
        }
    }
}
