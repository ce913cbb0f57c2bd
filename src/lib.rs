//! Request-batching coalescer library.
//!
//! Merges concurrent single-request submissions into bounded batches, dispatches
//! each batch to a user-supplied handler, and routes each element of the
//! handler's response back to the caller that submitted the corresponding input.
//!
//! # Quick Start
//!
//! ```no_run
//! use batch_coalescer::{Coalescer, CoalescerConfig};
//! use bytes::Bytes;
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let handler: batch_coalescer::BatchHandlerFn = Arc::new(|batch: Vec<Bytes>| {
//!         Box::pin(async move { Ok(batch) })
//!     });
//!
//!     let coalescer = Coalescer::new(
//!         CoalescerConfig::new(32, Duration::from_millis(10), handler),
//!         CancellationToken::new(),
//!     )
//!     .unwrap();
//!
//!     let response = coalescer
//!         .submit(Bytes::from_static(b"hello"), Duration::from_secs(1))
//!         .await
//!         .unwrap();
//!     assert_eq!(response, Bytes::from_static(b"hello"));
//! }
//! ```

mod coalescer;
mod config;
mod error;
mod server;
mod transport;

pub use coalescer::{BatchHandlerFn, Coalescer, CoalescerConfig, HandlerFuture};
pub use config::Config;
pub use error::{CoalescerError, TransportError};
pub use server::{build_router, AppState};
pub use transport::BackendClient;
