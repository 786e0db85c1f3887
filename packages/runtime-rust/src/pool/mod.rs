//! Worker thread pool.
//!
//! Tasks are opaque byte payloads. The pool neither knows nor cares that they
//! are dispatch envelopes; the [`TaskHandler`] given at startup interprets
//! them on the worker thread.

pub mod lifecycle;
pub mod manager;
pub mod stats;
pub mod worker;

use async_trait::async_trait;

pub use lifecycle::PoolState;
pub use manager::WorkerPool;
pub use stats::PoolStats;
pub use worker::{current_worker, WorkerInfo};

/// Entry point executed on a worker thread for every task.
///
/// Implementations report their own failures inside the returned bytes. A
/// panic that escapes `handle` is treated as a worker crash.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(&self, payload: Vec<u8>) -> Vec<u8>;
}
