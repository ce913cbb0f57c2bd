//! HTTP reverse-proxy front end: one JSON value in, one JSON value out, with
//! the coalescer doing the batching in between.

use crate::coalescer::Coalescer;
use crate::error::CoalescerError;
use axum::body::Bytes as AxumBytes;
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;

const INFO_BODY: &str = "batcher: POST a JSON request body to / to submit it for batching\n";

/// Shared state handed to every request handler.
pub struct AppState {
    pub coalescer: Coalescer,
    pub idle_timeout: Duration,
}

impl AppState {
    /// Pair a coalescer with the per-request wait budget enforced in front of
    /// it. Rejects an `idle_timeout` that does not strictly exceed the
    /// coalescer's own `batch_timeout`, for the same reason `Coalescer::submit`
    /// rejects it: a caller that cannot outwait the batch window can never
    /// receive a response.
    pub fn new(coalescer: Coalescer, idle_timeout: Duration) -> Result<Self, CoalescerError> {
        let batch_timeout = coalescer.batch_timeout();
        if idle_timeout <= batch_timeout {
            return Err(CoalescerError::InvalidArgument(format!(
                "idle_timeout ({idle_timeout:?}) must strictly exceed batch_timeout ({batch_timeout:?})"
            )));
        }
        Ok(Self { coalescer, idle_timeout })
    }
}

/// Build the router: `/` for submissions, `/healthz` for liveness.
pub fn build_router(state: Arc<AppState>, max_concurrent_conns: usize) -> Router {
    Router::new()
        .route("/", any(root))
        .route("/healthz", any(healthz))
        .with_state(state)
        .layer(ConcurrencyLimitLayer::new(max_concurrent_conns))
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn root(State(state): State<Arc<AppState>>, method: Method, body: AxumBytes) -> Response {
    if method != Method::POST {
        return (StatusCode::OK, INFO_BODY).into_response();
    }

    let value: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => {
            return (StatusCode::BAD_REQUEST, "Expecting request body in JSON format").into_response();
        }
    };

    // Re-serialize to canonical bytes: the coalescer and transport only ever
    // see opaque, already-validated JSON, never the client's raw formatting.
    let payload: Bytes = match serde_json::to_vec(&value) {
        Ok(bytes) => Bytes::from(bytes),
        Err(_) => {
            return (StatusCode::BAD_REQUEST, "Expecting request body in JSON format").into_response();
        }
    };

    match state.coalescer.submit(payload, state.idle_timeout).await {
        Ok(response) => (StatusCode::OK, [("content-type", "application/json")], response).into_response(),
        Err(err) => error_response(err),
    }
}

fn error_response(err: CoalescerError) -> Response {
    let status = if err.is_timeout() {
        StatusCode::REQUEST_TIMEOUT
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, err.to_string()).into_response()
}
