//! Bounded worker pool.
//!
//! [`WorkerPool`] owns a bounded task queue shared by a dynamic set of worker
//! threads. Threads are kept between `min_threads` and `max_threads`: extra
//! ones are spawned when a call arrives and no worker is idle, and exit again
//! after `idle_timeout_ms` without work.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use super::lifecycle::{Lifecycle, PoolState};
use super::stats::{PoolCounters, PoolStats};
use super::worker::{run_worker, Job, WorkerInfo};
use super::TaskHandler;
use crate::config::PoolConfig;
use crate::error::{ConfigError, PoolError};

// ---------------------------------------------------------------------------
// PoolShared
// ---------------------------------------------------------------------------

/// State shared by the pool handle and every worker thread.
///
/// Holds the receiving half of the queue only; the queue closes when the
/// handle drops its sender.
pub(crate) struct PoolShared {
    pub(crate) config: PoolConfig,
    pub(crate) handler: Arc<dyn TaskHandler>,
    pub(crate) queue: tokio::sync::Mutex<mpsc::Receiver<Job>>,
    pub(crate) counters: PoolCounters,
    pub(crate) lifecycle: Lifecycle,
    handles: Mutex<Vec<JoinHandle<()>>>,
    next_id: std::sync::atomic::AtomicUsize,
}

impl PoolShared {
    /// Reserves a thread slot if fewer than `limit` threads are running.
    fn reserve_slot(&self, limit: usize) -> bool {
        self.counters
            .threads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < limit).then_some(n + 1)
            })
            .is_ok()
    }

    /// Spawns a worker into an already reserved slot.
    fn spawn_reserved(self: &Arc<Self>) -> std::io::Result<()> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let info = Arc::new(WorkerInfo {
            id,
            argv: self.config.argv.clone(),
            env: self.config.env.clone(),
        });
        let shared = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(format!("{}-{id}", self.config.thread_name_prefix))
            .spawn(move || run_worker(shared, info));

        match spawned {
            Ok(handle) => {
                let mut handles = self.handles.lock();
                handles.retain(|h| !h.is_finished());
                handles.push(handle);
                Ok(())
            }
            Err(e) => {
                self.counters.threads.fetch_sub(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Spawns a worker when a call is waiting and nobody is idle to take it.
    fn grow_if_needed(self: &Arc<Self>) -> Result<(), PoolError> {
        let threads = self.counters.threads();
        if threads > 0 && self.counters.idle() > 0 {
            return Ok(());
        }
        if !self.reserve_slot(self.config.max_threads) {
            return Ok(());
        }
        match self.spawn_reserved() {
            Ok(()) => Ok(()),
            Err(e) if threads == 0 => Err(PoolError::Spawn(e)),
            Err(e) => {
                warn!(error = %e, "failed to grow worker pool, continuing with existing threads");
                Ok(())
            }
        }
    }

    /// Respawns workers up to `min_threads` while the pool is ready, and at
    /// least one worker while calls are still queued.
    pub(crate) fn replenish(self: &Arc<Self>) {
        while self.lifecycle.state() == PoolState::Ready
            && self.reserve_slot(self.config.min_threads)
        {
            if let Err(e) = self.spawn_reserved() {
                error!(error = %e, "failed to respawn worker");
                break;
            }
        }

        // Calls queued behind a crashed task must still be picked up, even
        // with `min_threads = 0` or while draining.
        let state = self.lifecycle.state();
        if matches!(state, PoolState::Ready | PoolState::Draining) && self.counters.queued() > 0 {
            if let Err(e) = self.grow_if_needed() {
                error!(error = %e, queued = self.counters.queued(), "no worker left for queued calls");
            }
        }
    }

    /// Releases the caller's slot if the pool is above its minimum and no
    /// work is waiting.
    pub(crate) fn try_evict(&self, queue: &mpsc::Receiver<Job>) -> bool {
        let min = self.config.min_threads;
        let released = self
            .counters
            .threads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n > min).then(|| n - 1)
            })
            .is_ok();
        if !released {
            return false;
        }
        // A call enqueued before the release must not be left without a worker.
        if queue.is_empty() {
            return true;
        }
        self.counters.threads.fetch_add(1, Ordering::SeqCst);
        false
    }

    fn take_handles(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.handles.lock())
    }
}

// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

/// Handle to the worker pool.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    queue_capacity: usize,
}

impl WorkerPool {
    /// Validates `config`, spawns `min_threads` workers and returns a ready pool.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPool`] for malformed options and
    /// [`ConfigError::WorkerSpawn`] if a worker thread cannot be spawned.
    pub fn start(config: PoolConfig, handler: Arc<dyn TaskHandler>) -> Result<Self, ConfigError> {
        config.validate()?;
        let queue_capacity = config.queue_capacity();
        let (sender, receiver) = mpsc::channel(queue_capacity);

        let shared = Arc::new(PoolShared {
            config,
            handler,
            queue: tokio::sync::Mutex::new(receiver),
            counters: PoolCounters::default(),
            lifecycle: Lifecycle::new(),
            handles: Mutex::new(Vec::new()),
            next_id: std::sync::atomic::AtomicUsize::new(0),
        });

        for _ in 0..shared.config.min_threads {
            if shared.reserve_slot(shared.config.min_threads) {
                shared.spawn_reserved().map_err(ConfigError::WorkerSpawn)?;
            }
        }
        shared.lifecycle.set_ready();

        info!(
            min_threads = shared.config.min_threads,
            max_threads = shared.config.max_threads,
            queue_capacity,
            "worker pool started"
        );

        Ok(Self {
            shared,
            sender: Mutex::new(Some(sender)),
            queue_capacity,
        })
    }

    /// Runs one task on a worker and returns its output.
    ///
    /// # Errors
    ///
    /// - [`PoolError::Closed`] once `destroy()` has begun.
    /// - [`PoolError::QueueFull`] when `max_queue` tasks are already waiting.
    /// - [`PoolError::WorkerCrashed`] if the worker died running the task.
    /// - [`PoolError::Spawn`] if no worker exists and none could be spawned.
    pub async fn run(&self, payload: Vec<u8>) -> Result<Vec<u8>, PoolError> {
        if self.shared.lifecycle.state() != PoolState::Ready {
            return Err(PoolError::Closed);
        }

        let (reply, response) = oneshot::channel();
        let job = Job {
            payload,
            reply,
            in_flight: self.shared.lifecycle.in_flight_guard(),
        };

        {
            let sender = self.sender.lock();
            let Some(sender) = sender.as_ref() else {
                return Err(PoolError::Closed);
            };
            self.shared.counters.queued.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = sender.try_send(job) {
                self.shared.counters.queued.fetch_sub(1, Ordering::Relaxed);
                return Err(match e {
                    TrySendError::Full(_) => PoolError::QueueFull {
                        capacity: self.queue_capacity,
                    },
                    TrySendError::Closed(_) => PoolError::Closed,
                });
            }
        }

        self.shared.grow_if_needed()?;

        // A dropped reply sender means the worker went away with the task.
        response.await.unwrap_or(Err(PoolError::WorkerCrashed))
    }

    #[must_use]
    pub fn state(&self) -> PoolState {
        self.shared.lifecycle.state()
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.shared.counters.snapshot(
            self.state(),
            self.shared.config.min_threads,
            self.shared.config.max_threads,
            self.queue_capacity,
        )
    }

    /// Stops the pool: refuses new calls, waits up to `drain_timeout_ms` for
    /// in-flight ones, closes the queue and joins every worker thread.
    ///
    /// Calling it again is a no-op.
    pub async fn destroy(&self) {
        if !self.shared.lifecycle.begin_draining() {
            return;
        }
        let in_flight = self.shared.lifecycle.in_flight_count();
        info!(in_flight, "draining worker pool");

        let drain_timeout = self.shared.config.drain_timeout();
        if !self.shared.lifecycle.wait_for_drain(drain_timeout).await {
            warn!(
                remaining = self.shared.lifecycle.in_flight_count(),
                "drain timed out, closing queue with calls in flight"
            );
        }

        // Workers finish what is queued, then see the closed channel and exit.
        self.sender.lock().take();

        loop {
            let handles = self.shared.take_handles();
            if handles.is_empty() {
                break;
            }
            let joined = tokio::task::spawn_blocking(move || {
                handles
                    .into_iter()
                    .map(JoinHandle::join)
                    .filter(Result::is_err)
                    .count()
            })
            .await;
            match joined {
                Ok(0) => {}
                Ok(panicked) => warn!(panicked, "worker threads panicked during shutdown"),
                Err(e) => {
                    error!(error = %e, "failed to join worker threads");
                    break;
                }
            }
        }

        self.shared.lifecycle.set_stopped();
        info!(
            completed = self.shared.counters.completed.load(Ordering::Relaxed),
            "worker pool stopped"
        );
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::pool::worker::current_worker;

    /// Echoes the payload, reversed. `b"panic"` panics (`b"slow-panic"` after
    /// a delay), `b"sleep"` sleeps, `b"env"` returns the forwarded `MODE`
    /// variable and `b"argv"` the forwarded arguments.
    struct Reverse {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl TaskHandler for Reverse {
        async fn handle(&self, payload: Vec<u8>) -> Vec<u8> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match payload.as_slice() {
                b"panic" => panic!("task blew up"),
                b"slow-panic" => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    panic!("task blew up late")
                }
                b"argv" => current_worker()
                    .map(|w| w.argv.join(" ").into_bytes())
                    .unwrap_or_default(),
                b"sleep" => {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    b"slept".to_vec()
                }
                b"env" => current_worker()
                    .and_then(|w| w.env_var("MODE").map(|v| v.as_bytes().to_vec()))
                    .unwrap_or_default(),
                other => other.iter().rev().copied().collect(),
            }
        }
    }

    fn pool(config: PoolConfig) -> (WorkerPool, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let handler = Arc::new(Reverse {
            calls: calls.clone(),
        });
        (WorkerPool::start(config, handler).unwrap(), calls)
    }

    #[tokio::test]
    async fn runs_tasks_on_workers() {
        let (pool, calls) = pool(PoolConfig::fixed(2));
        assert_eq!(pool.state(), PoolState::Ready);
        assert_eq!(pool.stats().threads, 2);

        let out = pool.run(b"abc".to_vec()).await.unwrap();
        assert_eq!(out, b"cba");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        pool.destroy().await;
        assert_eq!(pool.stats().completed, 1);
    }

    #[tokio::test]
    async fn destroy_joins_threads_and_refuses_work() {
        let (pool, _) = pool(PoolConfig::fixed(3));
        pool.destroy().await;

        let stats = pool.stats();
        assert_eq!(stats.state, PoolState::Stopped);
        assert_eq!(stats.threads, 0);
        assert!(matches!(pool.run(b"x".to_vec()).await, Err(PoolError::Closed)));

        // Second destroy is a no-op.
        pool.destroy().await;
    }

    #[tokio::test]
    async fn crash_rejects_task_and_respawns() {
        let (pool, _) = pool(PoolConfig::fixed(1));

        let err = pool.run(b"panic".to_vec()).await.unwrap_err();
        assert!(matches!(err, PoolError::WorkerCrashed));

        let out = pool.run(b"ok".to_vec()).await.unwrap();
        assert_eq!(out, b"ko");

        let stats = pool.stats();
        assert_eq!(stats.crashed, 1);
        assert_eq!(stats.threads, 1);
        pool.destroy().await;
    }

    #[tokio::test]
    async fn queued_task_survives_crash_without_minimum_threads() {
        let config = PoolConfig {
            min_threads: 0,
            max_threads: 1,
            ..PoolConfig::default()
        };
        let (pool, _) = pool(config);
        let pool = Arc::new(pool);

        let crashing = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.run(b"slow-panic".to_vec()).await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        let queued = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.run(b"ok".to_vec()).await }
        });

        assert!(matches!(
            crashing.await.unwrap(),
            Err(PoolError::WorkerCrashed)
        ));
        let out = tokio::time::timeout(Duration::from_secs(3), queued)
            .await
            .expect("queued task was never picked up")
            .unwrap()
            .unwrap();
        assert_eq!(out, b"ko");

        let stats = pool.stats();
        assert_eq!(stats.crashed, 1);
        assert_eq!(stats.queued, 0);
        pool.destroy().await;
    }

    #[tokio::test]
    async fn forwards_environment_and_argv_to_workers() {
        let config = PoolConfig {
            env: vec![("MODE".to_string(), "offloaded".to_string())],
            argv: vec!["--profile".to_string(), "fast".to_string()],
            ..PoolConfig::fixed(1)
        };
        let (pool, _) = pool(config);
        assert_eq!(pool.run(b"env".to_vec()).await.unwrap(), b"offloaded");
        assert_eq!(pool.run(b"argv".to_vec()).await.unwrap(), b"--profile fast");
        pool.destroy().await;
    }

    #[tokio::test]
    async fn full_queue_is_rejected() {
        let config = PoolConfig {
            max_queue: Some(1),
            ..PoolConfig::fixed(1)
        };
        let (pool, _) = pool(config);
        let pool = Arc::new(pool);

        // One running, one queued.
        let running = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.run(b"sleep".to_vec()).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let queued = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.run(b"sleep".to_vec()).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = pool.run(b"late".to_vec()).await.unwrap_err();
        assert!(matches!(err, PoolError::QueueFull { capacity: 1 }));

        assert_eq!(running.await.unwrap().unwrap(), b"slept");
        assert_eq!(queued.await.unwrap().unwrap(), b"slept");
        pool.destroy().await;
    }

    #[tokio::test]
    async fn grows_on_demand_and_evicts_when_idle() {
        let config = PoolConfig {
            min_threads: 0,
            max_threads: 2,
            idle_timeout_ms: 50,
            ..PoolConfig::default()
        };
        let (pool, _) = pool(config);
        assert_eq!(pool.stats().threads, 0);

        let out = pool.run(b"xy".to_vec()).await.unwrap();
        assert_eq!(out, b"yx");
        assert!(pool.stats().threads >= 1);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(pool.stats().threads, 0);
        pool.destroy().await;
    }

    #[test]
    fn invalid_config_is_rejected() {
        let handler = Arc::new(Reverse {
            calls: Arc::new(AtomicU32::new(0)),
        });
        let err = WorkerPool::start(PoolConfig::fixed(0), handler).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPool(_)));
    }
}
