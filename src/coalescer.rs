//! The request-batching coalescer.
//!
//! Merges concurrent single-request submissions into bounded batches, dispatches
//! each batch to a user-supplied handler on its own background task, and routes
//! each element of the handler's response back to the caller that submitted the
//! corresponding input.

use crate::error::CoalescerError;
use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A batch handler invocation: given the ordered payloads of one batch, returns
/// one response per payload in the same order, or a single error for the batch.
pub type HandlerFuture = BoxFuture<'static, Result<Vec<Bytes>, String>>;

/// Type alias for the user-supplied batch handler (`SendF`).
///
/// Opaque and possibly blocking from the coalescer's point of view: it is never
/// invoked while the instance mutex is held.
pub type BatchHandlerFn = Arc<dyn Fn(Vec<Bytes>) -> HandlerFuture + Send + Sync>;

/// Configuration for a [`Coalescer`].
#[derive(Clone)]
pub struct CoalescerConfig {
    /// Maximum number of submissions per dispatched batch.
    pub max_batch_size: usize,
    /// Maximum time a batch may remain open after its first submission.
    pub batch_timeout: Duration,
    /// The handler invoked once per dispatched batch.
    pub handler: BatchHandlerFn,
}

impl CoalescerConfig {
    pub fn new(max_batch_size: usize, batch_timeout: Duration, handler: BatchHandlerFn) -> Self {
        Self {
            max_batch_size,
            batch_timeout,
            handler,
        }
    }
}

/// One submitted request still waiting for its response.
struct Subscriber {
    tx: oneshot::Sender<Result<Bytes, CoalescerError>>,
}

/// The current in-progress accumulator, before dispatch.
struct OpenBatch {
    /// Tags this batch so a queued timer callback can recognize it has already
    /// been detached and dispatched by something else.
    generation: u64,
    payloads: Vec<Bytes>,
    subscribers: Vec<Subscriber>,
    timer: JoinHandle<()>,
}

struct State {
    open: Option<OpenBatch>,
    stopped: bool,
}

/// A request-batching coalescer.
///
/// Cheap to clone; clones share the same underlying batch and handler.
#[derive(Clone)]
pub struct Coalescer {
    state: Arc<Mutex<State>>,
    max_batch_size: usize,
    batch_timeout: Duration,
    handler: BatchHandlerFn,
    next_generation: Arc<AtomicU64>,
}

impl Coalescer {
    /// Construct a coalescer bound to `cancel`. When `cancel` fires, the
    /// coalescer stops accepting new batches and releases any waiters with
    /// [`CoalescerError::Stopped`].
    ///
    /// Fails if `max_batch_size` is zero.
    pub fn new(config: CoalescerConfig, cancel: CancellationToken) -> Result<Self, CoalescerError> {
        if config.max_batch_size == 0 {
            return Err(CoalescerError::InvalidArgument(
                "max_batch_size must be at least 1".to_string(),
            ));
        }

        let state = Arc::new(Mutex::new(State {
            open: None,
            stopped: false,
        }));

        let watcher_state = state.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            let batch = {
                let mut guard = watcher_state.lock();
                guard.stopped = true;
                guard.open.take()
            };
            if let Some(batch) = batch {
                batch.timer.abort();
                // Dropping the senders closes every response channel without
                // publishing a value; a waiting Submit sees this as Stopped.
                drop(batch.subscribers);
            }
        });

        Ok(Self {
            state,
            max_batch_size: config.max_batch_size,
            batch_timeout: config.batch_timeout,
            handler: config.handler,
            next_generation: Arc::new(AtomicU64::new(0)),
        })
    }

    /// The configured batch timeout, exposed so callers (e.g. the HTTP front
    /// end) can validate that their own timeout strictly exceeds it up front.
    pub fn batch_timeout(&self) -> Duration {
        self.batch_timeout
    }

    /// Submit one payload and wait for its response.
    ///
    /// `timeout` must strictly exceed `batch_timeout`; a caller that cannot
    /// outwait the batch window can never receive a response.
    pub async fn submit(&self, payload: Bytes, timeout: Duration) -> Result<Bytes, CoalescerError> {
        if payload.is_empty() {
            return Err(CoalescerError::InvalidArgument(
                "payload must not be empty".to_string(),
            ));
        }
        if timeout <= self.batch_timeout {
            return Err(CoalescerError::InvalidArgument(format!(
                "timeout ({timeout:?}) must strictly exceed batch_timeout ({:?})",
                self.batch_timeout
            )));
        }

        let (tx, rx) = oneshot::channel();
        let dispatch_ready = self.accumulate(payload, Subscriber { tx })?;

        if let Some(batch) = dispatch_ready {
            self.spawn_dispatch(batch);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped without sending: shutdown raced the dispatch.
            Ok(Err(_)) => Err(CoalescerError::Stopped),
            Err(_) => Err(CoalescerError::Timeout),
        }
    }

    /// Append to the open batch (creating one if absent), returning a batch to
    /// dispatch if this submission filled it to `max_batch_size`.
    fn accumulate(
        &self,
        payload: Bytes,
        subscriber: Subscriber,
    ) -> Result<Option<OpenBatch>, CoalescerError> {
        let mut state = self.state.lock();
        if state.stopped {
            return Err(CoalescerError::Stopped);
        }

        match state.open.as_mut() {
            Some(open) => {
                open.payloads.push(payload);
                open.subscribers.push(subscriber);

                if open.payloads.len() >= self.max_batch_size {
                    let batch = state.open.take().expect("just matched Some");
                    batch.timer.abort();
                    Ok(Some(batch))
                } else {
                    Ok(None)
                }
            }
            None => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let timer = self.spawn_timer(generation);
                state.open = Some(OpenBatch {
                    generation,
                    payloads: vec![payload],
                    subscribers: vec![subscriber],
                    timer,
                });
                Ok(None)
            }
        }
    }

    /// Spawn the one-shot deadline for a newly opened batch.
    fn spawn_timer(&self, generation: u64) -> JoinHandle<()> {
        let state = self.state.clone();
        let handler = self.handler.clone();
        let batch_timeout = self.batch_timeout;

        tokio::spawn(async move {
            tokio::time::sleep(batch_timeout).await;

            let batch = {
                let mut guard = state.lock();
                match guard.open.as_ref() {
                    // Stale fire: the batch this timer belonged to was already
                    // detached by size-triggered dispatch or by shutdown.
                    Some(open) if open.generation == generation => guard.open.take(),
                    _ => None,
                }
            };

            if let Some(batch) = batch {
                dispatch(handler, batch).await;
            }
        })
    }

    /// Dispatch a full batch on a fresh background task so accumulation of the
    /// next batch can proceed concurrently with this handler invocation.
    fn spawn_dispatch(&self, batch: OpenBatch) {
        let handler = self.handler.clone();
        tokio::spawn(dispatch(handler, batch));
    }
}

async fn dispatch(handler: BatchHandlerFn, batch: OpenBatch) {
    let OpenBatch {
        payloads,
        subscribers,
        ..
    } = batch;
    let expected = payloads.len();

    let result = handler(payloads).await;

    match result {
        Err(message) => {
            tracing::error!(batch_len = expected, error = %message, "batch handler returned an error");
            for subscriber in subscribers {
                let _ = subscriber.tx.send(Err(CoalescerError::HandlerError(message.clone())));
            }
        }
        Ok(responses) if responses.len() != expected => {
            tracing::error!(
                expected,
                actual = responses.len(),
                "batch handler returned a mismatched response count"
            );
            for subscriber in subscribers {
                let _ = subscriber.tx.send(Err(CoalescerError::ProtocolMismatch {
                    expected,
                    actual: responses.len(),
                }));
            }
        }
        Ok(responses) => {
            for (subscriber, response) in subscribers.into_iter().zip(responses) {
                let _ = subscriber.tx.send(Ok(response));
            }
        }
    }
}
