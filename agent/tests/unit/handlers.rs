//! `namespace_sync` and `agent_status` handlers against a live lifecycle.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use clusterlink_agent::handlers::{NamespaceSyncHandler, StatusHandler};
use clusterlink_agent::router::CommandHandler;
use clusterlink_common::{AgentStatus, Command, NamespaceSyncRequest, kinds};

use crate::mocks::{GIT_HOST, Harness, RecordingReconciler, options};

fn sync_cmd(key: &str, namespaces: &[&str]) -> Command {
    let request = NamespaceSyncRequest {
        namespaces: namespaces.iter().map(ToString::to_string).collect(),
    };
    Command::new(
        key,
        kinds::NAMESPACE_SYNC,
        serde_json::to_string(&request).unwrap(),
    )
}

#[tokio::test]
async fn sync_of_tracked_namespace_is_queued() {
    let mut h = Harness::new();
    h.lifecycle.apply(options(&["dev"])).await.unwrap();
    h.next_reconcile("dev").await;
    let handler = NamespaceSyncHandler::new(h.lifecycle.clone());

    let resp = handler
        .handle(&sync_cmd("s:1", &["dev"]))
        .await
        .response
        .expect("response");

    assert_eq!(resp, Command::new("s:1", kinds::NAMESPACE_SYNC_QUEUED, "dev"));
    // The forced pass sees the revision already observed.
    assert_eq!(h.next_reconcile("dev").await.as_deref(), Some("rev-1"));
    h.shutdown().await;
}

#[tokio::test]
async fn sync_of_unknown_namespace_fails() {
    let h = Harness::new();
    let handler = NamespaceSyncHandler::new(h.lifecycle.clone());

    let resp = handler
        .handle(&sync_cmd("s:2", &["prod"]))
        .await
        .response
        .expect("response");

    assert_eq!(resp.kind, kinds::NAMESPACE_SYNC_FAILED);
    assert!(resp.payload.contains("not managed"), "payload: {}", resp.payload);
    h.shutdown().await;
}

#[tokio::test]
async fn sync_during_shutdown_reports_stopping() {
    let h = Harness::new();
    h.lifecycle.apply(options(&["dev"])).await.unwrap();
    h.shutdown().await;
    let handler = NamespaceSyncHandler::new(h.lifecycle.clone());

    let resp = handler
        .handle(&sync_cmd("s:3", &["dev"]))
        .await
        .response
        .expect("response");

    assert_eq!(resp.kind, kinds::NAMESPACE_SYNC_FAILED);
    assert!(resp.payload.contains("stopping"), "payload: {}", resp.payload);
}

#[tokio::test]
async fn empty_and_malformed_requests_fail() {
    let h = Harness::new();
    let handler = NamespaceSyncHandler::new(h.lifecycle.clone());

    let empty = handler.handle(&sync_cmd("s:4", &[])).await.response.unwrap();
    assert_eq!(empty.kind, kinds::NAMESPACE_SYNC_FAILED);

    let garbage = Command::new("s:5", kinds::NAMESPACE_SYNC, "[1, 2");
    let malformed = handler.handle(&garbage).await.response.unwrap();
    assert_eq!(malformed.key, "s:5");
    assert_eq!(malformed.kind, kinds::NAMESPACE_SYNC_FAILED);
    h.shutdown().await;
}

#[tokio::test]
async fn multi_namespace_sync_splits_into_follow_ups() {
    let h = Harness::new();
    let handler = NamespaceSyncHandler::new(h.lifecycle.clone());

    let outcome = handler.handle(&sync_cmd("s:6", &["dev", "staging"])).await;

    assert!(outcome.response.is_none());
    assert_eq!(
        outcome.follow_ups,
        [sync_cmd("s:6", &["dev"]), sync_cmd("s:6", &["staging"])]
    );
    h.shutdown().await;
}

#[tokio::test]
async fn reconcile_failure_does_not_stop_the_pipeline() {
    let (reconciler, reconciles) = RecordingReconciler::failing();
    let mut h = Harness::with_reconciler(reconciler, reconciles);
    h.lifecycle.apply(options(&["dev"])).await.unwrap();
    h.next_reconcile("dev").await;
    let handler = NamespaceSyncHandler::new(h.lifecycle.clone());

    let resp = handler.handle(&sync_cmd("s:7", &["dev"])).await.response.unwrap();

    assert_eq!(resp.kind, kinds::NAMESPACE_SYNC_QUEUED);
    h.next_reconcile("dev").await;
    assert!(h.reconciler.calls("dev") >= 2);
    h.shutdown().await;
}

#[tokio::test]
async fn status_lists_tracked_namespaces() {
    let mut h = Harness::new();
    h.lifecycle.apply(options(&["staging", "dev"])).await.unwrap();
    h.next_reconcile("dev").await;
    let handler = StatusHandler::new(Arc::clone(&h.lifecycle));

    let resp = handler
        .handle(&Command::new("st:1", kinds::AGENT_STATUS, ""))
        .await
        .response
        .expect("response");

    assert_eq!(resp.key, "st:1");
    assert_eq!(resp.kind, kinds::AGENT_STATUS);
    let status: AgentStatus = serde_json::from_str(&resp.payload).unwrap();
    assert_eq!(status.git_host, GIT_HOST);
    let names: Vec<&str> = status.namespaces.iter().map(|n| n.namespace.as_str()).collect();
    assert_eq!(names, ["dev", "staging"]);
    assert_eq!(status.namespaces[0].remote, "git@dev:org/dev.git");
    assert_eq!(status.namespaces[0].revision.as_deref(), Some("rev-1"));
    h.shutdown().await;
}
