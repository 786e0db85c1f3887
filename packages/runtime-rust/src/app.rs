//! Application lifecycle.
//!
//! [`OffloadApp::start`] wires the pieces in a fixed order:
//! 1. validate configuration
//! 2. build the application container
//! 3. explore offload targets (fatal errors abort before any thread exists)
//! 4. start the worker pool with a [`WorkerBootstrap`] as its task handler
//! 5. install the interception hook
//! 6. instantiate static providers
//!
//! [`OffloadApp::shutdown`] closes the container, then destroys the pool.

use std::sync::Arc;

use offload_core::{ContextIdFactory, Token, TokenId, Value};
use tracing::{info, warn};

use crate::config::OffloadConfig;
use crate::di::{Catalog, Container, Instance, Provider};
use crate::error::{ConfigError, OffloadError, ResolutionError};
use crate::offload::{Dispatcher, InterceptHook, OffloadExplorer, OffloadRegistry, WorkerBootstrap};
use crate::pool::{PoolStats, WorkerPool};

/// A running application with offloading enabled.
pub struct OffloadApp {
    container: Arc<Container>,
    registry: Arc<OffloadRegistry>,
    pool: Arc<WorkerPool>,
    context_ids: ContextIdFactory,
}

impl OffloadApp {
    /// Starts the application rooted at module `root`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for malformed options, missing module markers,
    /// worker spawn failures, or a static provider that cannot be built. No
    /// worker thread outlives a failed start.
    pub async fn start(
        catalog: Arc<Catalog>,
        root: &TokenId,
        config: OffloadConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let container = Arc::new(Container::for_application(Arc::clone(&catalog), root)?);
        let registry = Arc::new(OffloadExplorer::explore(&container)?);
        let context_ids = config.context_ids.factory();

        let bootstrap = WorkerBootstrap::new(Arc::clone(&catalog), context_ids.clone());
        let pool = Arc::new(WorkerPool::start(config.pool, Arc::new(bootstrap))?);
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&pool)));

        container.set_instance_hook(Arc::new(InterceptHook::new(
            Arc::clone(&registry),
            dispatcher,
            Arc::downgrade(&container),
            context_ids.clone(),
        )));

        let instantiated = match container.init() {
            Ok(instantiated) => instantiated,
            Err(e) => {
                warn!(error = %e, "application failed to initialize");
                container.close().await;
                pool.destroy().await;
                return Err(e.into());
            }
        };

        info!(
            module = %root,
            providers = container.providers().len(),
            instantiated,
            offload_targets = registry.len(),
            "application started"
        );

        Ok(Self {
            container,
            registry,
            pool,
            context_ids,
        })
    }

    /// Calls `method` on the provider registered under `provider`.
    ///
    /// Request-scoped providers need a request context as `args[0]`; the call
    /// runs on that request's instance.
    ///
    /// # Errors
    ///
    /// Returns resolution errors, [`OffloadError`]s from offloaded methods,
    /// or whatever a local method returns.
    pub async fn call(
        &self,
        provider: &TokenId,
        method: &str,
        mut args: Vec<Value>,
    ) -> anyhow::Result<Value> {
        if self.container.is_tree_static(provider) {
            let instance = self.container.get(provider)?;
            return instance.invoke(method, args).await;
        }

        let Some(Value::Request(request)) = args.first_mut() else {
            return Err(OffloadError::MissingRequestContext {
                provider: provider.clone(),
                method: method.to_string(),
            }
            .into());
        };
        let id = self.context_ids.get_by_request(request);
        self.container.register_request(id, request.clone());

        let result = match self.container.resolve_in_context(provider, id) {
            Ok(instance) => instance.invoke(method, args).await,
            Err(e) => Err(e.into()),
        };
        self.container.release_context(id).await;
        result
    }

    /// The static instance of `provider`, as seen by callers (intercepted).
    ///
    /// # Errors
    ///
    /// Returns any [`ResolutionError`], including
    /// [`ResolutionError::RequestScoped`].
    pub fn instance_of(&self, provider: &TokenId) -> Result<Instance, ResolutionError> {
        self.container.get(provider)
    }

    /// Typed access to a static provider. Calls made through the returned
    /// value run locally, never on a worker.
    ///
    /// # Errors
    ///
    /// Returns any [`ResolutionError`].
    pub fn instance<T: Provider + Token>(&self) -> Result<Arc<T>, ResolutionError> {
        let token = T::token_id();
        self.container
            .get(&token)?
            .downcast::<T>()
            .ok_or(ResolutionError::TypeMismatch {
                provider: token,
                expected: std::any::type_name::<T>(),
            })
    }

    #[must_use]
    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    #[must_use]
    pub fn offload_targets(&self) -> &OffloadRegistry {
        &self.registry
    }

    /// Read-only handle to the worker pool.
    #[must_use]
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Closes the application container, then drains and destroys the pool.
    pub async fn shutdown(&self) {
        info!("application shutting down");
        self.container.close().await;
        self.pool.destroy().await;
        info!("application stopped");
    }
}
