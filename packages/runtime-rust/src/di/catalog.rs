//! Process-wide table of provider and module definitions.
//!
//! The catalog is how a worker "re-imports" what it was asked to run: given a
//! [`TokenId`] it returns the same definition the application was built from.
//! It holds definitions only. Instances always live in a [`Container`].
//!
//! [`Container`]: super::container::Container

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use offload_core::TokenId;

use super::module::ModuleDef;
use super::provider::ProviderDef;
use crate::error::ConfigError;

/// Immutable set of definitions, shared by the application and its workers.
#[derive(Debug)]
pub struct Catalog {
    modules: BTreeMap<TokenId, Arc<ModuleDef>>,
    providers: BTreeMap<TokenId, Arc<ProviderDef>>,
    /// Registration order, used to pick the owning module deterministically.
    module_order: Vec<TokenId>,
}

impl Catalog {
    #[must_use]
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    /// Looks up a module definition by token.
    #[must_use]
    pub fn load_module(&self, token: &TokenId) -> Option<Arc<ModuleDef>> {
        self.modules.get(token).cloned()
    }

    /// Looks up a provider definition by token.
    #[must_use]
    pub fn load_provider(&self, token: &TokenId) -> Option<Arc<ProviderDef>> {
        self.providers.get(token).cloned()
    }

    /// The first registered module that declares `provider`.
    #[must_use]
    pub fn owning_module(&self, provider: &TokenId) -> Option<Arc<ModuleDef>> {
        self.module_order
            .iter()
            .filter_map(|token| self.modules.get(token))
            .find(|module| module.providers().contains(provider))
            .cloned()
    }

    /// Modules flagged as global, in registration order.
    pub fn global_modules(&self) -> impl Iterator<Item = &Arc<ModuleDef>> {
        self.module_order
            .iter()
            .filter_map(|token| self.modules.get(token))
            .filter(|module| module.is_global())
    }
}

/// Collects definitions and validates them into a [`Catalog`].
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    modules: Vec<ModuleDef>,
    providers: Vec<ProviderDef>,
}

impl CatalogBuilder {
    #[must_use]
    pub fn module(mut self, module: ModuleDef) -> Self {
        self.modules.push(module);
        self
    }

    #[must_use]
    pub fn provider(mut self, provider: ProviderDef) -> Self {
        self.providers.push(provider);
        self
    }

    /// Validates and freezes the definitions.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for unresolvable or duplicate tokens, modules
    /// listing unknown providers or imports, and dependencies on unknown
    /// providers.
    pub fn build(self) -> Result<Catalog, ConfigError> {
        let mut providers = BTreeMap::new();
        for def in self.providers {
            if !def.token().is_resolvable() {
                return Err(ConfigError::MissingOrigin {
                    what: "provider",
                    token: def.token().clone(),
                });
            }
            let token = def.token().clone();
            if providers.insert(token.clone(), Arc::new(def)).is_some() {
                return Err(ConfigError::DuplicateProvider(token));
            }
        }

        let mut modules = BTreeMap::new();
        let mut module_order = Vec::with_capacity(self.modules.len());
        for def in self.modules {
            if !def.token().is_resolvable() {
                return Err(ConfigError::MissingOrigin {
                    what: "module",
                    token: def.token().clone(),
                });
            }
            let token = def.token().clone();
            if modules.insert(token.clone(), Arc::new(def)).is_some() {
                return Err(ConfigError::DuplicateModule(token));
            }
            module_order.push(token);
        }

        for module in modules.values() {
            if let Some(provider) = module
                .providers()
                .iter()
                .find(|p| !providers.contains_key(*p))
            {
                return Err(ConfigError::UnknownProvider {
                    module: module.token().clone(),
                    provider: provider.clone(),
                });
            }
            if let Some(import) = module.imports().iter().find(|m| !modules.contains_key(*m)) {
                return Err(ConfigError::UnknownImport {
                    module: module.token().clone(),
                    import: import.clone(),
                });
            }
        }

        for def in providers.values() {
            if let Some(dependency) = def
                .dependencies()
                .iter()
                .find(|d| !providers.contains_key(*d))
            {
                return Err(ConfigError::UnknownDependency {
                    provider: def.token().clone(),
                    dependency: dependency.clone(),
                });
            }
        }

        Ok(Catalog {
            modules,
            providers,
            module_order,
        })
    }
}

/// Providers visible from `roots`: the roots' own providers plus those of
/// every module reachable through imports.
pub(crate) fn reachable_providers(catalog: &Catalog, roots: &[TokenId]) -> HashSet<TokenId> {
    let mut seen_modules = HashSet::new();
    let mut visible = HashSet::new();
    let mut stack: Vec<TokenId> = roots.to_vec();

    while let Some(token) = stack.pop() {
        if !seen_modules.insert(token.clone()) {
            continue;
        }
        let Some(module) = catalog.load_module(&token) else {
            continue;
        };
        visible.extend(module.providers().iter().cloned());
        stack.extend(module.imports().iter().cloned());
    }
    visible
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use offload_core::Value;

    use super::*;
    use crate::di::provider::Provider;

    struct Noop;

    #[async_trait]
    impl Provider for Noop {
        async fn invoke(&self, _method: &str, _args: Vec<Value>) -> anyhow::Result<Value> {
            Ok(Value::Null)
        }
    }

    fn token(name: &str) -> TokenId {
        TokenId::new("catalog::tests", name)
    }

    fn noop(name: &str) -> ProviderDef {
        ProviderDef::new(token(name), |_| Ok(Noop))
    }

    #[test]
    fn lookup_returns_the_registered_definition() {
        let catalog = Catalog::builder()
            .provider(noop("Pi").offload("pi"))
            .module(ModuleDef::new(token("Math")).provide(token("Pi")))
            .build()
            .unwrap();

        let def = catalog.load_provider(&token("Pi")).unwrap();
        assert_eq!(def.offloaded_methods(), ["pi".to_string()]);
        assert!(catalog.load_module(&token("Math")).is_some());
        assert!(catalog.load_provider(&token("Missing")).is_none());
    }

    #[test]
    fn token_round_trip_resolves_same_definition() {
        let catalog = Catalog::builder()
            .provider(noop("Pi"))
            .module(ModuleDef::new(token("Math")).provide(token("Pi")))
            .build()
            .unwrap();

        let bytes = rmp_serde::to_vec_named(&token("Pi")).unwrap();
        let crossed: TokenId = rmp_serde::from_slice(&bytes).unwrap();
        let a = catalog.load_provider(&token("Pi")).unwrap();
        let b = catalog.load_provider(&crossed).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn unresolvable_token_is_rejected() {
        let err = Catalog::builder()
            .provider(ProviderDef::new(TokenId::new("", "Pi"), |_| Ok(Noop)))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingOrigin { what: "provider", .. }));
    }

    #[test]
    fn duplicates_are_rejected() {
        let err = Catalog::builder()
            .provider(noop("Pi"))
            .provider(noop("Pi"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateProvider(_)));
    }

    #[test]
    fn unknown_references_are_rejected() {
        let err = Catalog::builder()
            .module(ModuleDef::new(token("Math")).provide(token("Ghost")))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProvider { .. }));

        let err = Catalog::builder()
            .module(ModuleDef::new(token("Math")).import(token("Ghost")))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownImport { .. }));

        let err = Catalog::builder()
            .provider(noop("Pi").depends_on(token("Ghost")))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDependency { .. }));
    }

    #[test]
    fn owning_module_follows_registration_order() {
        let catalog = Catalog::builder()
            .provider(noop("Shared"))
            .module(ModuleDef::new(token("First")).provide(token("Shared")))
            .module(ModuleDef::new(token("Second")).provide(token("Shared")))
            .build()
            .unwrap();
        let owner = catalog.owning_module(&token("Shared")).unwrap();
        assert_eq!(owner.token(), &token("First"));
    }

    #[test]
    fn reachability_follows_imports_only() {
        let catalog = Catalog::builder()
            .provider(noop("Pi"))
            .provider(noop("Clock"))
            .provider(noop("Logger"))
            .module(ModuleDef::new(token("Clock")).provide(token("Clock")))
            .module(ModuleDef::new(token("Logging")).provide(token("Logger")).global())
            .module(
                ModuleDef::new(token("Math"))
                    .import(token("Clock"))
                    .provide(token("Pi")),
            )
            .build()
            .unwrap();

        let visible = reachable_providers(&catalog, &[token("Math")]);
        assert!(visible.contains(&token("Pi")));
        assert!(visible.contains(&token("Clock")));
        assert!(!visible.contains(&token("Logger")));
        assert_eq!(catalog.global_modules().count(), 1);
    }
}
