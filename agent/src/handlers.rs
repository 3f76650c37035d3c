//! Command handlers that read from the lifecycle manager without changing
//! which namespaces are active.

use std::sync::Arc;

use async_trait::async_trait;
use clusterlink_common::{Command, NamespaceSyncRequest, kinds};
use tracing::{debug, error, warn};

use crate::lifecycle::EnvironmentLifecycleManager;
use crate::pipeline::TriggerResult;
use crate::router::{CommandHandler, HandlerOutcome};

/// `namespace_sync`: wake one namespace's sync loop. A request naming several
/// namespaces is split into one follow-up command per namespace.
pub struct NamespaceSyncHandler {
    lifecycle: Arc<EnvironmentLifecycleManager>,
}

impl NamespaceSyncHandler {
    #[must_use]
    pub fn new(lifecycle: Arc<EnvironmentLifecycleManager>) -> Self {
        Self { lifecycle }
    }
}

#[async_trait]
impl CommandHandler for NamespaceSyncHandler {
    async fn handle(&self, cmd: &Command) -> HandlerOutcome {
        let request: NamespaceSyncRequest = match serde_json::from_str(&cmd.payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(key = %cmd.key, error = %e, "malformed namespace_sync payload");
                return HandlerOutcome::respond(cmd.reply_error(kinds::NAMESPACE_SYNC_FAILED, &e));
            }
        };

        match request.namespaces.as_slice() {
            [] => HandlerOutcome::respond(
                cmd.reply(kinds::NAMESPACE_SYNC_FAILED, "no namespaces requested"),
            ),
            [namespace] => self.sync_one(cmd, namespace).await,
            many => {
                let follow_ups = many
                    .iter()
                    .filter_map(|ns| single_sync(&cmd.key, ns))
                    .collect();
                HandlerOutcome::follow_up(follow_ups)
            }
        }
    }
}

impl NamespaceSyncHandler {
    async fn sync_one(&self, cmd: &Command, namespace: &str) -> HandlerOutcome {
        match self.lifecycle.request_sync(namespace).await {
            Some(result @ (TriggerResult::Queued | TriggerResult::Coalesced)) => {
                debug!(namespace, ?result, "sync requested");
                HandlerOutcome::respond(cmd.reply(kinds::NAMESPACE_SYNC_QUEUED, namespace))
            }
            Some(TriggerResult::Closed) => HandlerOutcome::respond(cmd.reply(
                kinds::NAMESPACE_SYNC_FAILED,
                format!("namespace '{namespace}' is stopping"),
            )),
            None => HandlerOutcome::respond(cmd.reply(
                kinds::NAMESPACE_SYNC_FAILED,
                format!("namespace '{namespace}' is not managed by this agent"),
            )),
        }
    }
}

fn single_sync(key: &str, namespace: &str) -> Option<Command> {
    let request = NamespaceSyncRequest {
        namespaces: vec![namespace.to_string()],
    };
    match serde_json::to_string(&request) {
        Ok(payload) => Some(Command::new(key, kinds::NAMESPACE_SYNC, payload)),
        Err(e) => {
            error!(namespace, error = %e, "failed to encode namespace_sync follow-up");
            None
        }
    }
}

/// `agent_status`: report tracked namespaces, remotes and last revisions.
pub struct StatusHandler {
    lifecycle: Arc<EnvironmentLifecycleManager>,
}

impl StatusHandler {
    #[must_use]
    pub fn new(lifecycle: Arc<EnvironmentLifecycleManager>) -> Self {
        Self { lifecycle }
    }
}

#[async_trait]
impl CommandHandler for StatusHandler {
    async fn handle(&self, cmd: &Command) -> HandlerOutcome {
        let status = self.lifecycle.status().await;
        match serde_json::to_string(&status) {
            Ok(payload) => HandlerOutcome::respond(cmd.reply(kinds::AGENT_STATUS, payload)),
            Err(e) => {
                error!(key = %cmd.key, error = %e, "failed to encode agent status");
                HandlerOutcome::none()
            }
        }
    }
}
