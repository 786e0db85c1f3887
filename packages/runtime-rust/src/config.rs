//! Configuration types for the offload runtime.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use offload_core::{ContextIdFactory, KeyedContextIds, RandomContextIds};
use serde::Deserialize;

use crate::error::ConfigError;

/// Top-level configuration consumed by [`OffloadApp::start`].
///
/// [`OffloadApp::start`]: crate::app::OffloadApp::start
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OffloadConfig {
    /// Worker pool sizing and worker environment.
    pub pool: PoolConfig,
    /// How request contexts are mapped to context identifiers.
    pub context_ids: ContextIdMode,
}

impl OffloadConfig {
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPool`] for malformed pool options.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pool.validate()
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PoolConfig {
    /// Threads kept alive even when idle.
    pub min_threads: usize,
    /// Upper bound on concurrently running worker threads.
    pub max_threads: usize,
    /// Idle time after which a thread above `min_threads` exits.
    pub idle_timeout_ms: u64,
    /// Maximum queued (not yet running) tasks. `None` means `max_threads²`.
    pub max_queue: Option<usize>,
    /// How long `destroy()` waits for in-flight calls before closing the queue.
    pub drain_timeout_ms: u64,
    /// Worker thread names are `{prefix}-{id}`.
    pub thread_name_prefix: String,
    /// Extra launch arguments exposed to offloaded code.
    pub argv: Vec<String>,
    /// Environment variables exposed to offloaded code.
    pub env: Vec<(String, String)>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
        Self {
            min_threads: (cpus / 2).max(1),
            max_threads: (cpus * 3 / 2).max(1),
            idle_timeout_ms: 60_000,
            max_queue: None,
            drain_timeout_ms: 30_000,
            thread_name_prefix: "offload-worker".to_string(),
            argv: Vec::new(),
            env: Vec::new(),
        }
    }
}

impl PoolConfig {
    /// A config with exactly `threads` workers, otherwise default.
    #[must_use]
    pub fn fixed(threads: usize) -> Self {
        Self {
            min_threads: threads,
            max_threads: threads,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Effective queue capacity.
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.max_queue
            .unwrap_or_else(|| self.max_threads.saturating_mul(self.max_threads))
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPool`] when `max_threads` is zero,
    /// `min_threads` exceeds `max_threads`, or `max_queue` is `Some(0)`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_threads == 0 {
            return Err(ConfigError::InvalidPool(
                "max_threads must be at least 1".to_string(),
            ));
        }
        if self.min_threads > self.max_threads {
            return Err(ConfigError::InvalidPool(format!(
                "min_threads ({}) exceeds max_threads ({})",
                self.min_threads, self.max_threads
            )));
        }
        if self.max_queue == Some(0) {
            return Err(ConfigError::InvalidPool(
                "max_queue must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Strategy for deriving context identifiers from request objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum ContextIdMode {
    /// A fresh random identifier per request object.
    #[default]
    Random,
    /// Requests with equal values under `key` share an identifier.
    Keyed { key: String },
}

impl ContextIdMode {
    /// Builds the factory shared by the caller side and every worker.
    #[must_use]
    pub fn factory(&self) -> ContextIdFactory {
        match self {
            Self::Random => ContextIdFactory::new(Arc::new(RandomContextIds)),
            Self::Keyed { key } => ContextIdFactory::new(Arc::new(KeyedContextIds::new(key.clone()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use offload_core::RequestContext;

    use super::*;

    #[test]
    fn pool_defaults_are_valid() {
        let config = PoolConfig::default();
        assert!(config.min_threads >= 1);
        assert!(config.min_threads <= config.max_threads);
        assert_eq!(config.idle_timeout(), Duration::from_secs(60));
        assert_eq!(config.drain_timeout(), Duration::from_secs(30));
        assert_eq!(config.thread_name_prefix, "offload-worker");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn queue_capacity_defaults_to_square_of_max_threads() {
        let mut config = PoolConfig::fixed(3);
        assert_eq!(config.queue_capacity(), 9);
        config.max_queue = Some(4);
        assert_eq!(config.queue_capacity(), 4);
    }

    #[test]
    fn malformed_pool_options_are_rejected() {
        let zero = PoolConfig::fixed(0);
        assert!(matches!(zero.validate(), Err(ConfigError::InvalidPool(_))));

        let inverted = PoolConfig {
            min_threads: 4,
            max_threads: 2,
            ..PoolConfig::default()
        };
        let err = inverted.validate().unwrap_err();
        assert!(err.to_string().contains("min_threads (4)"));

        let no_queue = PoolConfig {
            max_queue: Some(0),
            ..PoolConfig::fixed(1)
        };
        assert!(no_queue.validate().is_err());
    }

    #[test]
    fn deserializes_partial_json_with_defaults() {
        let config: OffloadConfig = serde_json::from_str(
            r#"{
                "pool": { "minThreads": 1, "maxThreads": 2, "env": [["MODE", "test"]] },
                "contextIds": { "mode": "keyed", "key": "requestId" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.pool.max_threads, 2);
        assert_eq!(config.pool.idle_timeout_ms, 60_000);
        assert_eq!(config.pool.env, vec![("MODE".to_string(), "test".to_string())]);
        assert_eq!(
            config.context_ids,
            ContextIdMode::Keyed {
                key: "requestId".to_string()
            }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn keyed_mode_shares_ids_for_equal_keys() {
        let factory = ContextIdMode::Keyed {
            key: "requestId".to_string(),
        }
        .factory();
        let mut a = RequestContext::new().with("requestId", "r1");
        let mut b = RequestContext::new().with("requestId", "r1");
        assert_eq!(factory.get_by_request(&mut a), factory.get_by_request(&mut b));
    }
}
