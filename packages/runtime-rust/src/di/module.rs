use offload_core::{ModuleMarker, Token, TokenId};

/// Definition of a DI module: which providers it declares and which modules
/// it imports.
///
/// A container built for a module sees the providers of that module and of
/// every module reachable through `imports`. Global modules are added only to
/// the application container, never to a worker's per-call container.
#[derive(Debug, Clone)]
pub struct ModuleDef {
    token: TokenId,
    imports: Vec<TokenId>,
    providers: Vec<TokenId>,
    global: bool,
    marker: Option<ModuleMarker>,
}

impl ModuleDef {
    #[must_use]
    pub fn new(token: TokenId) -> Self {
        Self {
            token,
            imports: Vec::new(),
            providers: Vec::new(),
            global: false,
            marker: None,
        }
    }

    /// Creates a definition for a type carrying its own [`Token`].
    #[must_use]
    pub fn of<T: Token>() -> Self {
        Self::new(T::token_id())
    }

    #[must_use]
    pub fn import(mut self, module: TokenId) -> Self {
        self.imports.push(module);
        self
    }

    #[must_use]
    pub fn provide(mut self, provider: TokenId) -> Self {
        self.providers.push(provider);
        self
    }

    /// Makes the module's providers visible application-wide.
    #[must_use]
    pub fn global(mut self) -> Self {
        self.global = true;
        self
    }

    /// Attaches the enablement marker: providers of this module may have
    /// offloaded methods.
    #[must_use]
    pub fn enable_offload(mut self) -> Self {
        self.marker = Some(ModuleMarker {
            module: self.token.clone(),
        });
        self
    }

    #[must_use]
    pub fn token(&self) -> &TokenId {
        &self.token
    }

    #[must_use]
    pub fn imports(&self) -> &[TokenId] {
        &self.imports
    }

    #[must_use]
    pub fn providers(&self) -> &[TokenId] {
        &self.providers
    }

    #[must_use]
    pub fn is_global(&self) -> bool {
        self.global
    }

    #[must_use]
    pub fn marker(&self) -> Option<&ModuleMarker> {
        self.marker.as_ref()
    }
}
