//! Pool lifecycle state with in-flight call tracking.
//!
//! Uses `ArcSwap` for lock-free state transitions and an atomic counter with
//! RAII guards so in-flight calls are counted even if a task panics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Serialize;

/// Pool state, advanced by [`WorkerPool::start`] and [`WorkerPool::destroy`].
///
/// State machine: Starting -> Ready -> Draining -> Stopped
///
/// [`WorkerPool::start`]: super::WorkerPool::start
/// [`WorkerPool::destroy`]: super::WorkerPool::destroy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PoolState {
    /// Minimum threads are being spawned.
    Starting,
    /// Accepting calls.
    Ready,
    /// Refusing new calls, waiting for in-flight ones.
    Draining,
    /// Queue closed and every worker thread joined.
    Stopped,
}

#[derive(Debug)]
pub(crate) struct Lifecycle {
    in_flight: Arc<AtomicU64>,
    state: ArcSwap<PoolState>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            in_flight: Arc::new(AtomicU64::new(0)),
            state: ArcSwap::from_pointee(PoolState::Starting),
        }
    }

    pub(crate) fn state(&self) -> PoolState {
        **self.state.load()
    }

    pub(crate) fn set_ready(&self) {
        self.state.store(Arc::new(PoolState::Ready));
    }

    pub(crate) fn set_stopped(&self) {
        self.state.store(Arc::new(PoolState::Stopped));
    }

    /// Moves to `Draining`. Returns `false` if draining had already begun.
    pub(crate) fn begin_draining(&self) -> bool {
        let current = self.state.load_full();
        if matches!(*current, PoolState::Draining | PoolState::Stopped) {
            return false;
        }
        let previous = self
            .state
            .compare_and_swap(&current, Arc::new(PoolState::Draining));
        Arc::ptr_eq(&*previous, &current)
    }

    /// Counts one call as in flight until the guard is dropped.
    pub(crate) fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    pub(crate) fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Waits until no call is in flight, up to `timeout`. Returns `false` on
    /// timeout.
    pub(crate) async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.in_flight.load(Ordering::Relaxed) == 0 {
                return true;
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// RAII guard that decrements the in-flight counter when dropped.
///
/// Travels with the queued task, so a call stays counted until its worker has
/// finished with it, even if the caller stopped waiting.
#[derive(Debug)]
pub(crate) struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
