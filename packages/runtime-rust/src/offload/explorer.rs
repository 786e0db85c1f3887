//! Startup scan for offloaded methods.

use std::collections::BTreeMap;

use offload_core::{EnvelopeTemplate, OffloadDescriptor, TokenId};
use tracing::{debug, info};

use crate::di::{Container, Scope};
use crate::error::ConfigError;

/// One offloaded method, resolved at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffloadTarget {
    pub descriptor: OffloadDescriptor,
    /// Module and provider identifiers; only the arguments vary per call.
    pub template: EnvelopeTemplate,
    /// Effective scope after tree-staticness classification.
    pub scope: Scope,
}

/// Every offload target of an application, keyed by provider then method.
///
/// Populated once by [`OffloadExplorer::explore`] and never mutated after.
#[derive(Debug, Default)]
pub struct OffloadRegistry {
    by_provider: BTreeMap<TokenId, BTreeMap<String, OffloadTarget>>,
}

impl OffloadRegistry {
    #[must_use]
    pub fn get(&self, provider: &TokenId, method: &str) -> Option<&OffloadTarget> {
        self.by_provider.get(provider)?.get(method)
    }

    /// Targets of one provider, by method name.
    #[must_use]
    pub fn methods_of(&self, provider: &TokenId) -> Option<&BTreeMap<String, OffloadTarget>> {
        self.by_provider.get(provider)
    }

    pub fn targets(&self) -> impl Iterator<Item = &OffloadTarget> {
        self.by_provider.values().flat_map(BTreeMap::values)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_provider.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_provider.is_empty()
    }
}

/// Scans an application container for methods marked for offloading.
pub struct OffloadExplorer;

impl OffloadExplorer {
    /// Validates markers and builds the [`OffloadRegistry`].
    ///
    /// Runs once, in the application process only.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::ProviderWithoutModule`] if a provider with offloaded
    ///   methods is not declared by any module.
    /// - [`ConfigError::ModuleNotEnabled`] if its owning module lacks the
    ///   enablement marker.
    pub fn explore(container: &Container) -> Result<OffloadRegistry, ConfigError> {
        let mut registry = OffloadRegistry::default();

        for def in container.providers() {
            let Some(first_method) = def.offloaded_methods().first() else {
                continue;
            };
            let provider = def.token();

            let Some(module) = container.catalog().owning_module(provider) else {
                return Err(ConfigError::ProviderWithoutModule {
                    provider: provider.clone(),
                    method: first_method.clone(),
                });
            };
            let Some(marker) = module.marker() else {
                return Err(ConfigError::ModuleNotEnabled {
                    module: module.token().clone(),
                    provider: provider.clone(),
                    method: first_method.clone(),
                });
            };

            let scope = container.effective_scope(provider);
            let methods = registry.by_provider.entry(provider.clone()).or_default();
            for method in def.offloaded_methods() {
                let target = OffloadTarget {
                    descriptor: OffloadDescriptor {
                        provider: provider.clone(),
                        method: method.clone(),
                    },
                    template: EnvelopeTemplate::new(
                        marker.module.clone(),
                        provider.clone(),
                        method.clone(),
                    ),
                    scope,
                };
                debug!(provider = %provider, method = %method, ?scope, "offload target registered");
                methods.insert(method.clone(), target);
            }
        }

        info!(targets = registry.len(), "offload targets explored");
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use offload_core::Value;

    use super::*;
    use crate::di::{Catalog, ModuleDef, Provider, ProviderDef};

    struct Noop;

    #[async_trait]
    impl Provider for Noop {
        async fn invoke(&self, _method: &str, _args: Vec<Value>) -> anyhow::Result<Value> {
            Ok(Value::Null)
        }
    }

    fn token(name: &str) -> TokenId {
        TokenId::new("explorer::tests", name)
    }

    fn container(catalog: Catalog, root: &str) -> Container {
        Container::for_application(Arc::new(catalog), &token(root)).unwrap()
    }

    #[test]
    fn collects_targets_with_scope_and_template() {
        let catalog = Catalog::builder()
            .provider(ProviderDef::new(token("Pi"), |_| Ok(Noop)).offload("pi").offload("e"))
            .provider(ProviderDef::new(token("Req"), |_| Ok(Noop)).request_scoped())
            .provider(
                ProviderDef::new(token("Greeter"), |_| Ok(Noop))
                    .depends_on(token("Req"))
                    .offload("greet"),
            )
            .provider(ProviderDef::new(token("Plain"), |_| Ok(Noop)))
            .module(
                ModuleDef::new(token("Math"))
                    .provide(token("Pi"))
                    .provide(token("Req"))
                    .provide(token("Greeter"))
                    .provide(token("Plain"))
                    .enable_offload(),
            )
            .build()
            .unwrap();

        let registry = OffloadExplorer::explore(&container(catalog, "Math")).unwrap();
        assert_eq!(registry.len(), 3);

        let pi = registry.get(&token("Pi"), "pi").unwrap();
        assert_eq!(pi.scope, Scope::Static);
        assert_eq!(pi.template.module, token("Math"));
        assert_eq!(pi.template.provider, token("Pi"));

        let greet = registry.get(&token("Greeter"), "greet").unwrap();
        assert_eq!(greet.scope, Scope::Request);
        assert!(registry.methods_of(&token("Plain")).is_none());
    }

    #[test]
    fn missing_marker_is_fatal_and_names_module() {
        let catalog = Catalog::builder()
            .provider(ProviderDef::new(token("Pi"), |_| Ok(Noop)).offload("pi"))
            .module(ModuleDef::new(token("Math")).provide(token("Pi")))
            .build()
            .unwrap();

        let err = OffloadExplorer::explore(&container(catalog, "Math")).unwrap_err();
        match err {
            ConfigError::ModuleNotEnabled { module, method, .. } => {
                assert_eq!(module, token("Math"));
                assert_eq!(method, "pi");
            }
            other => panic!("expected ModuleNotEnabled, got {other:?}"),
        }
    }

    #[test]
    fn no_marked_methods_yields_empty_registry() {
        let catalog = Catalog::builder()
            .provider(ProviderDef::new(token("Plain"), |_| Ok(Noop)))
            .module(ModuleDef::new(token("App")).provide(token("Plain")))
            .build()
            .unwrap();
        let registry = OffloadExplorer::explore(&container(catalog, "App")).unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.targets().count(), 0);
    }
}
