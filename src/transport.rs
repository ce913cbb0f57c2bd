//! Batch transport: serializes a dispatched batch as a JSON array, POSTs it to
//! the configured backend, and parses the JSON array response back into one
//! payload per request.
//!
//! This is wired into the [`Coalescer`](crate::Coalescer) as its handler; it is
//! not special-cased by the coalescer core, which only ever sees the
//! [`BatchHandlerFn`](crate::BatchHandlerFn) signature.

use crate::coalescer::{BatchHandlerFn, HandlerFuture};
use crate::error::TransportError;
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Talks to the batch-processing backend over HTTP.
#[derive(Clone)]
pub struct BackendClient {
    inner: reqwest::Client,
    url: String,
}

impl BackendClient {
    /// Build a client posting batches to `url`.
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let inner = reqwest::Client::builder()
            .pool_max_idle_per_host(32)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            inner,
            url: url.into(),
        })
    }

    /// Send one batch, returning one response payload per request, in order.
    ///
    /// `requests` are assumed to already be well-formed JSON values (the HTTP
    /// front end validates each one before handing it to the coalescer), so
    /// they are assembled into the outgoing array without re-parsing.
    pub async fn send_batch(&self, requests: Vec<Bytes>) -> Result<Vec<Bytes>, TransportError> {
        let body = encode_json_array(&requests);

        let resp = self
            .inner
            .post(&self.url)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::BadStatus {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = resp.bytes().await?;
        let values: Vec<Value> = serde_json::from_slice(&bytes)?;

        values
            .into_iter()
            .map(|v| serde_json::to_vec(&v).map(Bytes::from).map_err(TransportError::from))
            .collect()
    }

    /// Wrap this client as a [`BatchHandlerFn`] suitable for
    /// [`Coalescer::new`](crate::Coalescer::new).
    pub fn into_handler(self) -> BatchHandlerFn {
        let client = Arc::new(self);
        Arc::new(move |batch: Vec<Bytes>| -> HandlerFuture {
            let client = client.clone();
            Box::pin(async move { client.send_batch(batch).await.map_err(|e| e.to_string()) })
        })
    }
}

/// Concatenate already-valid JSON values into a single JSON array, without
/// re-parsing each element.
fn encode_json_array(elements: &[Bytes]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + elements.iter().map(|e| e.len() + 1).sum::<usize>());
    out.push(b'[');
    for (i, element) in elements.iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        out.extend_from_slice(element);
    }
    out.push(b']');
    out
}
