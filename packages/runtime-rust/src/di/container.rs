//! Application contexts: the instance side of dependency injection.
//!
//! A [`Container`] is built from one root module and sees only providers
//! reachable through that module's imports (plus global modules, for the
//! application container). Static providers are cached for the container's
//! lifetime; request-scoped providers are cached per registered [`ContextId`].
//!
//! Workers build a fresh container per call with [`Container::for_module`]
//! and close it afterwards, so no instance state survives between calls.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use offload_core::{ContextId, RequestContext, TokenId};
use parking_lot::RwLock;
use tracing::debug;

use super::catalog::{reachable_providers, Catalog};
use super::provider::{Instance, ProviderDef, Resolver, Scope};
use super::registry::InstanceRegistry;
use crate::error::ResolutionError;

/// Decides, at construction time, what handle an instance is exposed through.
///
/// Runs for every instance a container constructs, static or request-scoped,
/// before the instance is cached.
pub trait InstanceHook: Send + Sync {
    fn on_instance(
        &self,
        def: &ProviderDef,
        instance: Instance,
        context: Option<ContextId>,
    ) -> Instance;
}

/// Instances and the request object for one context id.
struct RequestScope {
    request: RequestContext,
    instances: InstanceRegistry,
    registrations: AtomicUsize,
}

/// A DI application context rooted at one module.
pub struct Container {
    module: TokenId,
    catalog: Arc<Catalog>,
    visible: HashSet<TokenId>,
    statics: InstanceRegistry,
    scopes: DashMap<ContextId, Arc<RequestScope>>,
    hook: RwLock<Option<Arc<dyn InstanceHook>>>,
    closed: AtomicBool,
}

impl Container {
    /// Builds the application container: the root module's graph plus every
    /// global module.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::ModuleNotFound`] if `root` is not in the catalog.
    pub fn for_application(catalog: Arc<Catalog>, root: &TokenId) -> Result<Self, ResolutionError> {
        if catalog.load_module(root).is_none() {
            return Err(ResolutionError::ModuleNotFound(root.clone()));
        }
        let mut roots = vec![root.clone()];
        roots.extend(catalog.global_modules().map(|m| m.token().clone()));
        Ok(Self::with_roots(catalog, root.clone(), &roots))
    }

    /// Builds an isolated container from a single module's import graph.
    ///
    /// Global modules are deliberately excluded: anything the module needs
    /// must be reachable through its own imports.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::ModuleNotFound`] if `module` is not in the catalog.
    pub fn for_module(catalog: Arc<Catalog>, module: &TokenId) -> Result<Self, ResolutionError> {
        if catalog.load_module(module).is_none() {
            return Err(ResolutionError::ModuleNotFound(module.clone()));
        }
        let roots = [module.clone()];
        Ok(Self::with_roots(catalog, module.clone(), &roots))
    }

    fn with_roots(catalog: Arc<Catalog>, module: TokenId, roots: &[TokenId]) -> Self {
        let visible = reachable_providers(&catalog, roots);
        Self {
            module,
            catalog,
            visible,
            statics: InstanceRegistry::new(),
            scopes: DashMap::new(),
            hook: RwLock::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Token of the root module.
    #[must_use]
    pub fn module(&self) -> &TokenId {
        &self.module
    }

    #[must_use]
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Whether `token` is visible from this container's root.
    #[must_use]
    pub fn contains(&self, token: &TokenId) -> bool {
        self.visible.contains(token)
    }

    /// Visible provider definitions, ordered by token.
    #[must_use]
    pub fn providers(&self) -> Vec<Arc<ProviderDef>> {
        let mut tokens: Vec<&TokenId> = self.visible.iter().collect();
        tokens.sort();
        tokens
            .into_iter()
            .filter_map(|token| self.catalog.load_provider(token))
            .collect()
    }

    /// `true` if neither the provider nor any transitive dependency is
    /// request-scoped.
    #[must_use]
    pub fn is_tree_static(&self, token: &TokenId) -> bool {
        let mut seen = HashSet::new();
        self.tree_static_from(token, &mut seen)
    }

    fn tree_static_from(&self, token: &TokenId, seen: &mut HashSet<TokenId>) -> bool {
        if !seen.insert(token.clone()) {
            // Cycles are reported when resolving, not here.
            return true;
        }
        let Some(def) = self.catalog.load_provider(token) else {
            return true;
        };
        def.scope() == Scope::Static
            && def
                .dependencies()
                .iter()
                .all(|dep| self.tree_static_from(dep, seen))
    }

    /// Effective scope after tree-staticness classification.
    #[must_use]
    pub fn effective_scope(&self, token: &TokenId) -> Scope {
        if self.is_tree_static(token) {
            Scope::Static
        } else {
            Scope::Request
        }
    }

    /// Installs the construction-time hook. Instances built afterwards pass
    /// through it; already-cached ones are not touched.
    pub fn set_instance_hook(&self, hook: Arc<dyn InstanceHook>) {
        *self.hook.write() = Some(hook);
    }

    /// Resolves a static provider.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::RequestScoped`] for request-scoped providers,
    /// or any error raised while constructing the provider or its dependencies.
    pub fn get(&self, token: &TokenId) -> Result<Instance, ResolutionError> {
        self.resolve_along(token, None, &[])
    }

    /// Resolves a provider bound to a registered context id.
    ///
    /// Static providers resolve to their single instance.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::ContextNotRegistered`] if `id` has no
    /// registered request, or any construction error.
    pub fn resolve_in_context(
        &self,
        token: &TokenId,
        id: ContextId,
    ) -> Result<Instance, ResolutionError> {
        self.resolve_along(token, Some(id), &[])
    }

    /// Registers `request` under `id`. Registrations are counted; the scope
    /// lives until every registration has been released.
    pub fn register_request(&self, id: ContextId, request: RequestContext) {
        // Counted under the shard lock so a concurrent last release cannot
        // remove the scope between lookup and increment.
        let scope = self.scopes.entry(id).or_insert_with(|| {
            Arc::new(RequestScope {
                request,
                instances: InstanceRegistry::new(),
                registrations: AtomicUsize::new(0),
            })
        });
        scope.registrations.fetch_add(1, Ordering::AcqRel);
    }

    /// The request registered under `id`.
    #[must_use]
    pub fn request(&self, id: ContextId) -> Option<RequestContext> {
        self.scopes.get(&id).map(|scope| scope.request.clone())
    }

    /// Releases one registration of `id`; the last release closes the scope's
    /// instances.
    pub async fn release_context(&self, id: ContextId) {
        let removed = self.scopes.remove_if(&id, |_, scope| {
            scope.registrations.fetch_sub(1, Ordering::AcqRel) <= 1
        });
        if let Some((_, scope)) = removed {
            let closed = scope.instances.close_all().await;
            debug!(context_id = %id, closed, "request scope released");
        }
    }

    /// Number of context ids with a live registration.
    #[must_use]
    pub fn active_contexts(&self) -> usize {
        self.scopes.len()
    }

    /// Number of cached static instances.
    #[must_use]
    pub fn static_instances(&self) -> usize {
        self.statics.len()
    }

    /// Eagerly constructs every static provider. Returns how many were built.
    ///
    /// # Errors
    ///
    /// Returns the first resolution error encountered.
    pub fn init(&self) -> Result<usize, ResolutionError> {
        let mut created = 0;
        for def in self.providers() {
            if self.is_tree_static(def.token()) {
                self.get(def.token())?;
                created += 1;
            }
        }
        Ok(created)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes every request scope, then every static instance, each in reverse
    /// creation order. Later resolutions fail with [`ResolutionError::Closed`].
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let scopes: Vec<Arc<RequestScope>> = self
            .scopes
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.scopes.clear();
        for scope in scopes {
            scope.instances.close_all().await;
        }
        let closed = self.statics.close_all().await;
        debug!(module = %self.module, closed, "application context closed");
    }

    pub(crate) fn resolve_along(
        &self,
        token: &TokenId,
        context: Option<ContextId>,
        path: &[TokenId],
    ) -> Result<Instance, ResolutionError> {
        if self.is_closed() {
            return Err(ResolutionError::Closed(self.module.clone()));
        }
        let not_found = || ResolutionError::ProviderNotFound {
            provider: token.clone(),
            module: self.module.clone(),
        };
        if !self.visible.contains(token) {
            return Err(not_found());
        }
        let def = self.catalog.load_provider(token).ok_or_else(not_found)?;
        if path.contains(token) {
            let mut cycle = path.to_vec();
            cycle.push(token.clone());
            return Err(ResolutionError::CircularDependency(cycle));
        }

        if self.is_tree_static(token) {
            if let Some(existing) = self.statics.get(token) {
                return Ok(existing);
            }
            let instance = self.construct(&def, None, path)?;
            Ok(self.statics.insert_if_absent(instance))
        } else {
            let id = context.ok_or_else(|| ResolutionError::RequestScoped(token.clone()))?;
            let scope = self
                .scopes
                .get(&id)
                .map(|entry| Arc::clone(entry.value()))
                .ok_or(ResolutionError::ContextNotRegistered(id))?;
            if let Some(existing) = scope.instances.get(token) {
                return Ok(existing);
            }
            let instance = self.construct(&def, Some(id), path)?;
            Ok(scope.instances.insert_if_absent(instance))
        }
    }

    fn construct(
        &self,
        def: &ProviderDef,
        context: Option<ContextId>,
        path: &[TokenId],
    ) -> Result<Instance, ResolutionError> {
        let mut path = path.to_vec();
        path.push(def.token().clone());
        let resolver = Resolver::new(self, def, context, path);

        let instance = def.build(&resolver).map_err(|source| {
            // Dependency failures surface as themselves, not as a wrapper.
            match source.downcast::<ResolutionError>() {
                Ok(inner) => inner,
                Err(source) => ResolutionError::Construction {
                    provider: def.token().clone(),
                    source,
                },
            }
        })?;

        let hook = self.hook.read().clone();
        let instance = match hook {
            Some(hook) => hook.on_instance(def, instance, context),
            None => instance,
        };
        debug!(provider = %def.token(), context_id = ?context, "provider instantiated");
        Ok(instance)
    }
}
