//! CLI flags and environment-variable configuration for the `batcher` binary.

use clap::Parser;
use std::time::Duration;

/// Request-batching coalescer with an HTTP reverse-proxy front end.
#[derive(Parser, Debug, Clone)]
#[command(name = "batcher", version, about)]
pub struct Config {
    /// Address to listen on.
    #[arg(long, env = "BATCHER_BIND", default_value = "0.0.0.0:8000")]
    pub bind: String,

    /// Backend URL that receives batch POSTs.
    #[arg(long, env = "BATCHER_BACKEND")]
    pub backend: String,

    /// Maximum number of submissions per dispatched batch.
    #[arg(long, env = "BATCHER_MAX_BATCH_SIZE", default_value_t = 32)]
    pub max_batch_size: usize,

    /// Maximum time a batch stays open after its first submission, in milliseconds.
    #[arg(long, env = "BATCHER_BATCH_TIMEOUT_MILLIS", default_value_t = 10)]
    pub batch_timeout_millis: u64,

    /// Per-request wait budget, in milliseconds. Must strictly exceed `batch-timeout-millis`.
    #[arg(long, env = "BATCHER_IDLE_TIMEOUT_MILLIS", default_value_t = 60_000)]
    pub idle_timeout_millis: u64,

    /// Maximum number of concurrent accepted connections.
    #[arg(long, env = "BATCHER_MAX_CONCURRENT_CONNS", default_value_t = 1024)]
    pub max_concurrent_conns: usize,

    /// `tracing` verbosity (`error`, `warn`, `info`, `debug`, `trace`), overridable via `RUST_LOG`.
    #[arg(long, env = "BATCHER_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_millis)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_millis)
    }

    /// Validate cross-field constraints that `clap` cannot express declaratively.
    pub fn validate(&self) -> Result<(), String> {
        if self.backend.trim().is_empty() {
            return Err("-backend is required".to_string());
        }
        if self.batch_timeout_millis >= self.idle_timeout_millis {
            return Err(format!(
                "batch-timeout-millis ({}) must be strictly less than idle-timeout-millis ({})",
                self.batch_timeout_millis, self.idle_timeout_millis
            ));
        }
        Ok(())
    }
}
