//! clusterlink agent entry point.
//!
//! Initialises tracing, loads configuration from `CLUSTERLINK_*` environment
//! variables, wires the lifecycle manager and handlers into the worker and
//! serves the control-plane bridge until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clusterlink_agent::allow_list::AllowList;
use clusterlink_agent::handlers::{NamespaceSyncHandler, StatusHandler};
use clusterlink_agent::infra::{CommandReconciler, GitCli, SshCredentialStore};
use clusterlink_agent::lifecycle::{Collaborators, EnvironmentLifecycleManager, PipelineSettings};
use clusterlink_agent::router::HandlerRegistry;
use clusterlink_agent::transport;
use clusterlink_agent::worker::{WorkerCore, WorkerSettings};
use clusterlink_common::config::ENV_PREFIX;
use clusterlink_common::{AgentConfig, kinds};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

/// Upper bound on waiting for pipelines and handlers to wind down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialise tracing with RUST_LOG env filter.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("clusterlink-agent starting");

    // 2. Load configuration from CLUSTERLINK_* env vars.
    let config: AgentConfig = envy::prefixed(ENV_PREFIX)
        .from_env()
        .context("failed to load config from CLUSTERLINK_* env vars")?;

    tracing::info!(
        listen_addr = %config.listen_addr,
        ssh_key_dir = %config.ssh_key_dir.display(),
        ssh_config = %config.ssh_config_path.display(),
        poll_secs = config.git_poll_interval_secs,
        sync_secs = config.sync_interval_secs,
        reconcile = config.reconcile_command.is_some(),
        "configuration loaded",
    );

    // 3. Worker core and the lifecycle manager that spawns onto it.
    let (core, responses_rx) = WorkerCore::new(WorkerSettings::from(&config));
    let allow_list = AllowList::new();
    let lifecycle = Arc::new(EnvironmentLifecycleManager::new(
        Collaborators {
            credentials: Arc::new(SshCredentialStore::new(
                config.ssh_key_dir.clone(),
                config.ssh_config_path.clone(),
            )),
            repos: Arc::new(GitCli::new(config.git_timeout())),
            reconciler: Arc::new(CommandReconciler::new(config.reconcile_command.clone())),
        },
        allow_list.clone(),
        PipelineSettings {
            poll_interval: config.git_poll_interval(),
            sync_interval: config.sync_interval(),
        },
        core.root_token(),
        core.tracker(),
    ));

    // 4. Handler registry.
    let mut handlers = HandlerRegistry::new();
    handlers.register(kinds::AGENT_INIT, lifecycle.clone())?;
    handlers.register(
        kinds::NAMESPACE_SYNC,
        Arc::new(NamespaceSyncHandler::new(lifecycle.clone())),
    )?;
    handlers.register(kinds::AGENT_STATUS, Arc::new(StatusHandler::new(lifecycle)))?;

    let worker = core.start(handlers, allow_list);

    // 5. Control-plane bridge.
    let (responses_tx, _) = broadcast::channel(transport::RESPONSE_BROADCAST_CAPACITY);
    tokio::spawn(transport::fan_out(responses_rx, responses_tx.clone()));
    let root = worker.root_token();
    let app = transport::router(worker.command_sender(), responses_tx, root.clone());

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind TCP listener")?;
    tracing::info!("agent ready on http://{}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            root.cancel();
        })
        .await
        .context("HTTP server error")?;

    // 6. Stop pipelines and in-flight handlers.
    if tokio::time::timeout(SHUTDOWN_GRACE, worker.shutdown())
        .await
        .is_err()
    {
        tracing::warn!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "worker did not stop in time"
        );
    }

    tracing::info!("clusterlink-agent shut down");
    Ok(())
}

/// Wait for SIGINT (Ctrl-C) for graceful shutdown.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("received shutdown signal");
}
