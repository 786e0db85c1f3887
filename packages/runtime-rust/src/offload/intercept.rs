//! Construction-time interception of offloaded methods.
//!
//! The application container runs every new instance through
//! [`InterceptHook`]. Instances of providers with offload targets come back
//! wrapped in an [`OffloadStub`], so the decision to dispatch is made when the
//! instance is built, for every instance including request-scoped ones.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use offload_core::{ContextId, ContextIdFactory, TokenId, Value};

use super::dispatch::Dispatcher;
use super::explorer::{OffloadRegistry, OffloadTarget};
use crate::di::{Container, Instance, InstanceHook, Provider, ProviderDef, Scope};
use crate::error::{OffloadError, ResolutionError};

/// Wraps instances of providers that have offload targets.
pub struct InterceptHook {
    registry: Arc<OffloadRegistry>,
    dispatcher: Arc<Dispatcher>,
    container: Weak<Container>,
    context_ids: ContextIdFactory,
}

impl InterceptHook {
    #[must_use]
    pub fn new(
        registry: Arc<OffloadRegistry>,
        dispatcher: Arc<Dispatcher>,
        container: Weak<Container>,
        context_ids: ContextIdFactory,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            container,
            context_ids,
        }
    }
}

impl InstanceHook for InterceptHook {
    fn on_instance(
        &self,
        def: &ProviderDef,
        instance: Instance,
        _context: Option<ContextId>,
    ) -> Instance {
        let Some(targets) = self.registry.methods_of(def.token()) else {
            return instance;
        };
        let stub = OffloadStub {
            provider: def.token().clone(),
            inner: Arc::clone(instance.provider()),
            targets: targets.clone(),
            dispatcher: Arc::clone(&self.dispatcher),
            container: self.container.clone(),
            context_ids: self.context_ids.clone(),
        };
        instance.wrap(Arc::new(stub))
    }
}

/// By-name handle of an intercepted instance.
///
/// Marked methods are sent to a worker; every other method runs locally on
/// the wrapped instance.
pub struct OffloadStub {
    provider: TokenId,
    inner: Arc<dyn Provider>,
    targets: BTreeMap<String, OffloadTarget>,
    dispatcher: Arc<Dispatcher>,
    container: Weak<Container>,
    context_ids: ContextIdFactory,
}

impl OffloadStub {
    async fn dispatch_scoped(
        &self,
        target: &OffloadTarget,
        mut args: Vec<Value>,
    ) -> anyhow::Result<Value> {
        let Some(Value::Request(request)) = args.first_mut() else {
            return Err(OffloadError::MissingRequestContext {
                provider: self.provider.clone(),
                method: target.descriptor.method.clone(),
            }
            .into());
        };
        // Attached before encoding so the worker derives the same id.
        let id = self.context_ids.get_by_request(request);
        let request = request.clone();

        let container = self
            .container
            .upgrade()
            .ok_or_else(|| ResolutionError::Closed(target.template.module.clone()))?;
        container.register_request(id, request);

        let result = match container.resolve_in_context(&self.provider, id) {
            Ok(_bound) => self
                .dispatcher
                .submit(target.template.fill(args))
                .await
                .map_err(anyhow::Error::from),
            Err(e) => Err(e.into()),
        };
        container.release_context(id).await;
        result
    }
}

#[async_trait]
impl Provider for OffloadStub {
    async fn invoke(&self, method: &str, args: Vec<Value>) -> anyhow::Result<Value> {
        let Some(target) = self.targets.get(method) else {
            return self.inner.invoke(method, args).await;
        };
        match target.scope {
            Scope::Static => Ok(self.dispatcher.submit(target.template.fill(args)).await?),
            Scope::Request => self.dispatch_scoped(target, args).await,
        }
    }

    async fn on_close(&self) -> anyhow::Result<()> {
        self.inner.on_close().await
    }
}
