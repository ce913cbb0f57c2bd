//! End-to-end tests driving the real HTTP front end against a local mock
//! backend, covering the status-code mapping in the front end's contract.

use axum::extract::State as AxumState;
use axum::routing::post;
use axum::{Json, Router};
use batch_coalescer::{AppState, BackendClient, Coalescer, CoalescerConfig, build_router};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Spawn a mock backend that echoes the request array back (identity), after
/// an optional artificial delay, and return its base URL.
async fn spawn_mock_backend(delay: Duration) -> String {
    async fn echo(AxumState(delay): AxumState<Duration>, Json(values): Json<Vec<Value>>) -> Json<Vec<Value>> {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Json(values)
    }

    let app = Router::new().route("/", post(echo)).with_state(delay);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Spawn a mock backend that always responds with a 500.
async fn spawn_failing_backend() -> String {
    async fn fail() -> (axum::http::StatusCode, &'static str) {
        (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom")
    }

    let app = Router::new().route("/", post(fail));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn spawn_front_end(backend_url: &str, batch_timeout: Duration, idle_timeout: Duration) -> String {
    let backend = BackendClient::new(backend_url).unwrap();
    let coalescer = Coalescer::new(
        CoalescerConfig::new(8, batch_timeout, backend.into_handler()),
        CancellationToken::new(),
    )
    .unwrap();

    let state = Arc::new(AppState::new(coalescer, idle_timeout).unwrap());
    let app = build_router(state, 1024);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn concurrent_clients_get_their_own_response() {
    let backend_url = spawn_mock_backend(Duration::ZERO).await;
    let front_end = spawn_front_end(&backend_url, Duration::from_millis(20), Duration::from_secs(5)).await;

    let client = reqwest::Client::new();
    let mut handles = Vec::new();
    for i in 0..6 {
        let client = client.clone();
        let front_end = front_end.clone();
        handles.push(tokio::spawn(async move {
            let resp = client
                .post(&front_end)
                .json(&serde_json::json!({ "n": i }))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), reqwest::StatusCode::OK);
            let body: Value = resp.json().await.unwrap();
            assert_eq!(body, serde_json::json!({ "n": i }));
        }));
    }

    for h in handles {
        h.await.unwrap();
    }
}

#[tokio::test]
async fn non_json_body_is_bad_request() {
    let backend_url = spawn_mock_backend(Duration::ZERO).await;
    let front_end = spawn_front_end(&backend_url, Duration::from_millis(10), Duration::from_secs(5)).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(&front_end)
        .body("not json at all")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn backend_failure_maps_to_bad_request() {
    let backend_url = spawn_failing_backend().await;
    let front_end = spawn_front_end(&backend_url, Duration::from_millis(10), Duration::from_secs(5)).await;

    let client = reqwest::Client::new();
    let resp = client.post(&front_end).json(&serde_json::json!(1)).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn slow_backend_yields_request_timeout() {
    let backend_url = spawn_mock_backend(Duration::from_millis(500)).await;
    let front_end = spawn_front_end(&backend_url, Duration::from_millis(10), Duration::from_millis(50)).await;

    let client = reqwest::Client::new();
    let resp = client.post(&front_end).json(&serde_json::json!(1)).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::REQUEST_TIMEOUT);
}

#[tokio::test]
async fn get_on_root_returns_informational_body() {
    let backend_url = spawn_mock_backend(Duration::ZERO).await;
    let front_end = spawn_front_end(&backend_url, Duration::from_millis(10), Duration::from_secs(5)).await;

    let client = reqwest::Client::new();
    let resp = client.get(&front_end).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
}

#[tokio::test]
async fn healthz_is_ok() {
    let backend_url = spawn_mock_backend(Duration::ZERO).await;
    let front_end = spawn_front_end(&backend_url, Duration::from_millis(10), Duration::from_secs(5)).await;

    let client = reqwest::Client::new();
    let resp = client.get(format!("{front_end}/healthz")).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
}
