use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

use super::lifecycle::PoolState;

/// Read-only snapshot of the worker pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub state: PoolState,
    pub threads: usize,
    pub idle: usize,
    pub busy: usize,
    pub queued: usize,
    pub completed: u64,
    pub crashed: u64,
    /// Busy threads as a fraction of `max_threads`.
    pub utilization: f64,
    pub min_threads: usize,
    pub max_threads: usize,
    pub queue_capacity: usize,
}

/// Live counters shared between the pool handle and its worker threads.
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub(crate) threads: AtomicUsize,
    pub(crate) idle: AtomicUsize,
    pub(crate) queued: AtomicUsize,
    pub(crate) completed: AtomicU64,
    pub(crate) crashed: AtomicU64,
}

impl PoolCounters {
    pub(crate) fn threads(&self) -> usize {
        self.threads.load(Ordering::SeqCst)
    }

    pub(crate) fn idle(&self) -> usize {
        self.idle.load(Ordering::SeqCst)
    }

    pub(crate) fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn snapshot(
        &self,
        state: PoolState,
        min_threads: usize,
        max_threads: usize,
        queue_capacity: usize,
    ) -> PoolStats {
        let threads = self.threads();
        let idle = self.idle().min(threads);
        let busy = threads - idle;
        PoolStats {
            state,
            threads,
            idle,
            busy,
            queued: self.queued(),
            completed: self.completed.load(Ordering::Relaxed),
            crashed: self.crashed.load(Ordering::Relaxed),
            utilization: if max_threads == 0 {
                0.0
            } else {
                busy as f64 / max_threads as f64
            },
            min_threads,
            max_threads,
            queue_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_derives_busy_and_utilization() {
        let counters = PoolCounters::default();
        counters.threads.store(4, Ordering::SeqCst);
        counters.idle.store(1, Ordering::SeqCst);
        counters.completed.store(10, Ordering::Relaxed);

        let stats = counters.snapshot(PoolState::Ready, 2, 6, 36);
        assert_eq!(stats.busy, 3);
        assert!((stats.utilization - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.completed, 10);
    }

    #[test]
    fn stats_serialize_camel_case() {
        let stats = PoolCounters::default().snapshot(PoolState::Stopped, 1, 1, 1);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["state"], "stopped");
        assert_eq!(json["queueCapacity"], 1);
        assert_eq!(json["threads"], 0);
    }
}
