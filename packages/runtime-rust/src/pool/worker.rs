//! Worker threads.
//!
//! Each worker is a dedicated OS thread driving a single-threaded tokio
//! runtime. Workers pull tasks from the pool's shared queue, so an idle
//! worker always takes the next task.

use std::any::Any;
use std::cell::RefCell;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::oneshot;
use tracing::{debug, error};

use super::lifecycle::InFlightGuard;
use super::manager::PoolShared;
use crate::error::PoolError;

// ---------------------------------------------------------------------------
// WorkerInfo
// ---------------------------------------------------------------------------

/// Launch data of the worker running the current thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub id: usize,
    pub argv: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl WorkerInfo {
    /// Value of a forwarded environment variable.
    #[must_use]
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

thread_local! {
    static CURRENT_WORKER: RefCell<Option<Arc<WorkerInfo>>> = const { RefCell::new(None) };
}

/// The worker executing the current code, or `None` outside a worker thread.
#[must_use]
pub fn current_worker() -> Option<Arc<WorkerInfo>> {
    CURRENT_WORKER.with(|slot| slot.borrow().clone())
}

// ---------------------------------------------------------------------------
// Worker loop
// ---------------------------------------------------------------------------

/// One queued call.
pub(crate) struct Job {
    pub(crate) payload: Vec<u8>,
    pub(crate) reply: oneshot::Sender<Result<Vec<u8>, PoolError>>,
    pub(crate) in_flight: InFlightGuard,
}

/// Why a worker loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerExit {
    /// Queue closed by `destroy()`.
    Closed,
    /// Idle past the timeout while above the minimum. Slot already released.
    Evicted,
    /// A task panicked outside the handler's own recovery.
    Crashed,
}

/// Thread entry point. The caller has already reserved a thread slot.
pub(crate) fn run_worker(shared: Arc<PoolShared>, info: Arc<WorkerInfo>) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(worker_id = info.id, error = %e, "failed to build worker runtime");
            shared.counters.threads.fetch_sub(1, Ordering::SeqCst);
            return;
        }
    };

    CURRENT_WORKER.with(|slot| *slot.borrow_mut() = Some(Arc::clone(&info)));
    debug!(worker_id = info.id, "worker started");

    let exit = runtime.block_on(worker_loop(&shared, info.id));

    CURRENT_WORKER.with(|slot| slot.borrow_mut().take());
    match exit {
        WorkerExit::Evicted => debug!(worker_id = info.id, "idle worker evicted"),
        WorkerExit::Closed => {
            shared.counters.threads.fetch_sub(1, Ordering::SeqCst);
            debug!(worker_id = info.id, "worker stopped");
        }
        WorkerExit::Crashed => {
            shared.counters.threads.fetch_sub(1, Ordering::SeqCst);
            shared.replenish();
        }
    }
}

async fn worker_loop(shared: &Arc<PoolShared>, worker_id: usize) -> WorkerExit {
    let idle_timeout = shared.config.idle_timeout();

    loop {
        shared.counters.idle.fetch_add(1, Ordering::SeqCst);
        let received = {
            let mut queue = shared.queue.lock().await;
            let received = tokio::time::timeout(idle_timeout, queue.recv()).await;
            if received.is_err() && shared.try_evict(&queue) {
                shared.counters.idle.fetch_sub(1, Ordering::SeqCst);
                return WorkerExit::Evicted;
            }
            received
        };
        shared.counters.idle.fetch_sub(1, Ordering::SeqCst);

        let job = match received {
            Err(_elapsed) => continue,
            Ok(None) => return WorkerExit::Closed,
            Ok(Some(job)) => job,
        };
        shared.counters.queued.fetch_sub(1, Ordering::Relaxed);

        let Job {
            payload,
            reply,
            in_flight,
        } = job;
        let outcome = AssertUnwindSafe(shared.handler.handle(payload))
            .catch_unwind()
            .await;

        match outcome {
            Ok(bytes) => {
                shared.counters.completed.fetch_add(1, Ordering::Relaxed);
                // The caller may have stopped waiting.
                let _ = reply.send(Ok(bytes));
                drop(in_flight);
            }
            Err(panic) => {
                shared.counters.crashed.fetch_add(1, Ordering::Relaxed);
                error!(
                    worker_id,
                    panic = %panic_message(panic.as_ref()),
                    "worker crashed while running a task"
                );
                let _ = reply.send(Err(PoolError::WorkerCrashed));
                drop(in_flight);
                return WorkerExit::Crashed;
            }
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}
