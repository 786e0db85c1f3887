//! Provider definitions, instances and the resolver handed to factories.
//!
//! A [`ProviderDef`] is the definition side of a provider: its token, scope,
//! declared dependencies, offload markers and factory. Definitions are shared
//! read-only between the application and every worker. An [`Instance`] is
//! what a factory produced inside one container.

use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use offload_core::{ContextId, RequestContext, Token, TokenId, Value};

use super::container::Container;
use crate::error::ResolutionError;

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// A DI-managed object whose methods can be invoked by name.
///
/// Implementations dispatch on `method` and return [`UnknownMethod`] for names
/// they do not handle. The `Any` bound enables typed access via
/// [`Instance::downcast`].
#[async_trait]
pub trait Provider: Send + Sync + Any {
    /// Invoke `method` with `args`.
    async fn invoke(&self, method: &str, args: Vec<Value>) -> anyhow::Result<Value>;

    /// Called when the owning container closes. Default is a no-op.
    async fn on_close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Returned by [`Provider::invoke`] for a method name the provider lacks.
#[derive(Debug, Clone, thiserror::Error)]
#[error("method `{method}` not found")]
pub struct UnknownMethod {
    pub method: String,
}

impl UnknownMethod {
    #[must_use]
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
        }
    }
}

/// Lifecycle classification declared on a provider definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Scope {
    /// One instance for the container's lifetime.
    #[default]
    Static,
    /// One instance per registered context id.
    Request,
}

// ---------------------------------------------------------------------------
// Instance
// ---------------------------------------------------------------------------

/// A constructed provider.
///
/// Holds the dynamic handle used for by-name invocation and, separately, the
/// concrete object for typed access. Interception replaces the former and
/// leaves the latter untouched.
#[derive(Clone)]
pub struct Instance {
    token: TokenId,
    provider: Arc<dyn Provider>,
    concrete: Arc<dyn Any + Send + Sync>,
}

impl Instance {
    #[must_use]
    pub fn new<T: Provider>(token: TokenId, value: Arc<T>) -> Self {
        Self {
            token,
            provider: value.clone(),
            concrete: value,
        }
    }

    /// Replaces the by-name handle, keeping the concrete object.
    #[must_use]
    pub fn wrap(self, provider: Arc<dyn Provider>) -> Self {
        Self { provider, ..self }
    }

    #[must_use]
    pub fn token(&self) -> &TokenId {
        &self.token
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Typed access to the concrete object. Calls made this way run locally.
    #[must_use]
    pub fn downcast<T: Provider>(&self) -> Option<Arc<T>> {
        self.concrete.clone().downcast::<T>().ok()
    }

    /// Invoke `method` through the (possibly intercepted) by-name handle.
    ///
    /// # Errors
    ///
    /// Returns whatever the provider returns.
    pub async fn invoke(&self, method: &str, args: Vec<Value>) -> anyhow::Result<Value> {
        self.provider.invoke(method, args).await
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance").field("token", &self.token).finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ProviderDef
// ---------------------------------------------------------------------------

type Factory = Arc<dyn Fn(&Resolver<'_>) -> anyhow::Result<Instance> + Send + Sync>;

/// Definition of a provider: how to build it and how it participates in DI.
///
/// Dependencies are declared explicitly because they cannot be reflected.
/// [`Resolver::resolve`] refuses anything not declared here, which keeps the
/// scope classification honest.
#[derive(Clone)]
pub struct ProviderDef {
    token: TokenId,
    scope: Scope,
    dependencies: Vec<TokenId>,
    offloaded: Vec<String>,
    factory: Factory,
}

impl ProviderDef {
    /// Creates a static-scope definition under an explicit token.
    pub fn new<T, F>(token: TokenId, factory: F) -> Self
    where
        T: Provider,
        F: Fn(&Resolver<'_>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let instance_token = token.clone();
        let factory: Factory = Arc::new(move |resolver: &Resolver<'_>| {
            let value = factory(resolver)?;
            Ok(Instance::new(instance_token.clone(), Arc::new(value)))
        });
        Self {
            token,
            scope: Scope::Static,
            dependencies: Vec::new(),
            offloaded: Vec::new(),
            factory,
        }
    }

    /// Creates a definition for a type carrying its own [`Token`].
    pub fn of<T, F>(factory: F) -> Self
    where
        T: Provider + Token,
        F: Fn(&Resolver<'_>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::new(T::token_id(), factory)
    }

    #[must_use]
    pub fn request_scoped(mut self) -> Self {
        self.scope = Scope::Request;
        self
    }

    /// Declares a dependency on another provider.
    #[must_use]
    pub fn depends_on(mut self, token: TokenId) -> Self {
        if !self.dependencies.contains(&token) {
            self.dependencies.push(token);
        }
        self
    }

    /// Marks `method` to execute in a worker instead of locally.
    #[must_use]
    pub fn offload(mut self, method: impl Into<String>) -> Self {
        let method = method.into();
        if !self.offloaded.contains(&method) {
            self.offloaded.push(method);
        }
        self
    }

    #[must_use]
    pub fn token(&self) -> &TokenId {
        &self.token
    }

    #[must_use]
    pub fn scope(&self) -> Scope {
        self.scope
    }

    #[must_use]
    pub fn dependencies(&self) -> &[TokenId] {
        &self.dependencies
    }

    #[must_use]
    pub fn offloaded_methods(&self) -> &[String] {
        &self.offloaded
    }

    pub(crate) fn build(&self, resolver: &Resolver<'_>) -> anyhow::Result<Instance> {
        (self.factory)(resolver)
    }
}

impl fmt::Debug for ProviderDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDef")
            .field("token", &self.token)
            .field("scope", &self.scope)
            .field("dependencies", &self.dependencies)
            .field("offloaded", &self.offloaded)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Handle passed to a factory while its provider is being constructed.
pub struct Resolver<'a> {
    container: &'a Container,
    def: &'a ProviderDef,
    context: Option<ContextId>,
    path: Vec<TokenId>,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(
        container: &'a Container,
        def: &'a ProviderDef,
        context: Option<ContextId>,
        path: Vec<TokenId>,
    ) -> Self {
        Self {
            container,
            def,
            context,
            path,
        }
    }

    /// Token of the provider being constructed.
    #[must_use]
    pub fn token(&self) -> &TokenId {
        self.def.token()
    }

    /// Context id of the request this instance is bound to, if request-scoped.
    #[must_use]
    pub fn context_id(&self) -> Option<ContextId> {
        self.context
    }

    /// The request object registered for this instance's context id.
    #[must_use]
    pub fn request(&self) -> Option<RequestContext> {
        self.context.and_then(|id| self.container.request(id))
    }

    /// Resolves a declared dependency.
    ///
    /// # Errors
    ///
    /// Fails with [`ResolutionError::UndeclaredDependency`] if `token` was not
    /// declared via [`ProviderDef::depends_on`], or with any resolution error
    /// raised while producing the dependency.
    pub fn resolve(&self, token: &TokenId) -> Result<Instance, ResolutionError> {
        if !self.def.dependencies().contains(token) {
            return Err(ResolutionError::UndeclaredDependency {
                provider: self.def.token().clone(),
                dependency: token.clone(),
            });
        }
        self.container.resolve_along(token, self.context, &self.path)
    }

    /// Resolves a declared dependency and downcasts it to `T`.
    ///
    /// # Errors
    ///
    /// Same as [`Resolver::resolve`], plus [`ResolutionError::TypeMismatch`].
    pub fn get<T: Provider + Token>(&self) -> Result<Arc<T>, ResolutionError> {
        let token = T::token_id();
        let instance = self.resolve(&token)?;
        instance
            .downcast::<T>()
            .ok_or(ResolutionError::TypeMismatch {
                provider: token,
                expected: type_name::<T>(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Provider for Echo {
        async fn invoke(&self, method: &str, args: Vec<Value>) -> anyhow::Result<Value> {
            match method {
                "echo" => Ok(args.into_iter().next().unwrap_or(Value::Null)),
                other => Err(UnknownMethod::new(other).into()),
            }
        }
    }

    struct Shadow;

    #[async_trait]
    impl Provider for Shadow {
        async fn invoke(&self, _method: &str, _args: Vec<Value>) -> anyhow::Result<Value> {
            Ok(Value::from("shadow"))
        }
    }

    #[tokio::test]
    async fn instance_invokes_by_name() {
        let instance = Instance::new(TokenId::new("t", "Echo"), Arc::new(Echo));
        let out = instance.invoke("echo", vec![Value::Int(5)]).await.unwrap();
        assert_eq!(out, Value::Int(5));
    }

    #[tokio::test]
    async fn unknown_method_is_detectable() {
        let instance = Instance::new(TokenId::new("t", "Echo"), Arc::new(Echo));
        let err = instance.invoke("nope", Vec::new()).await.unwrap_err();
        assert!(err.downcast_ref::<UnknownMethod>().is_some());
        assert_eq!(err.to_string(), "method `nope` not found");
    }

    #[tokio::test]
    async fn wrap_replaces_handle_but_keeps_concrete() {
        let instance = Instance::new(TokenId::new("t", "Echo"), Arc::new(Echo));
        let wrapped = instance.wrap(Arc::new(Shadow));
        let out = wrapped.invoke("echo", vec![Value::Int(5)]).await.unwrap();
        assert_eq!(out, Value::from("shadow"));
        assert!(wrapped.downcast::<Echo>().is_some());
        assert!(wrapped.downcast::<Shadow>().is_none());
    }

    #[test]
    fn builder_deduplicates_markers_and_dependencies() {
        let def = ProviderDef::new(TokenId::new("t", "Echo"), |_| Ok(Echo))
            .depends_on(TokenId::new("t", "Dep"))
            .depends_on(TokenId::new("t", "Dep"))
            .offload("echo")
            .offload("echo")
            .request_scoped();
        assert_eq!(def.dependencies().len(), 1);
        assert_eq!(def.offloaded_methods(), ["echo".to_string()]);
        assert_eq!(def.scope(), Scope::Request);
    }
}
