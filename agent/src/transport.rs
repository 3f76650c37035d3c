//! HTTP bridge to the control plane.
//!
//! - `GET  /health`       → liveness probe
//! - `POST /v1/commands`  → enqueue one `Command` (202 Accepted)
//! - `GET  /v1/responses` → server-sent events, one JSON `Command` per event

use std::convert::Infallible;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use clusterlink_common::Command;
use futures::Stream;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Buffered responses per SSE subscriber before it starts lagging.
pub const RESPONSE_BROADCAST_CAPACITY: usize = 1024;

#[derive(Clone)]
struct TransportState {
    commands: mpsc::Sender<Command>,
    responses: broadcast::Sender<Command>,
    shutdown: CancellationToken,
}

/// Build the axum router. `responses` is fed by [`fan_out`]; open response
/// streams end when `shutdown` is cancelled.
pub fn router(
    commands: mpsc::Sender<Command>,
    responses: broadcast::Sender<Command>,
    shutdown: CancellationToken,
) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/commands", post(submit))
        .route("/v1/responses", get(stream_responses))
        .with_state(TransportState {
            commands,
            responses,
            shutdown,
        })
}

/// Copy every response from the worker's queue to all SSE subscribers.
/// Returns once the worker side of the queue is gone.
pub async fn fan_out(
    mut responses: mpsc::Receiver<Command>,
    subscribers: broadcast::Sender<Command>,
) {
    while let Some(resp) = responses.recv().await {
        if subscribers.send(resp).is_err() {
            debug!("no response subscribers, dropping response");
        }
    }
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn submit(State(state): State<TransportState>, Json(cmd): Json<Command>) -> StatusCode {
    match state.commands.send(cmd).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(e) => {
            warn!(key = %e.0.key, "command queue closed, rejecting command");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn stream_responses(
    State(state): State<TransportState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.responses.subscribe();
    let shutdown = state.shutdown;
    let stream = async_stream::stream! {
        loop {
            let next = tokio::select! {
                () = shutdown.cancelled() => break,
                next = rx.recv() => next,
            };
            match next {
                Ok(resp) => match Event::default().event(resp.kind.clone()).json_data(&resp) {
                    Ok(event) => yield Ok(event),
                    Err(e) => warn!(key = %resp.key, error = %e, "failed to encode response event"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "response subscriber lagging, responses dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}
