//! Error taxonomy for the offload runtime.
//!
//! - [`ConfigError`]: fatal at startup; the application must not start.
//! - [`ResolutionError`]: a definition or instance could not be produced.
//! - [`PoolError`]: the worker pool refused or lost a task.
//! - [`OffloadError`]: what an offloaded call returns to its caller.

use offload_core::{CodecError, ContextId, RemoteError, TokenId};

/// Configuration problems detected before the application starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{what} has no resolvable origin: {token}")]
    MissingOrigin { what: &'static str, token: TokenId },
    #[error("provider registered twice: {0}")]
    DuplicateProvider(TokenId),
    #[error("module registered twice: {0}")]
    DuplicateModule(TokenId),
    #[error("module {module} lists unknown provider {provider}")]
    UnknownProvider { module: TokenId, provider: TokenId },
    #[error("module {module} imports unknown module {import}")]
    UnknownImport { module: TokenId, import: TokenId },
    #[error("provider {provider} depends on unregistered provider {dependency}")]
    UnknownDependency {
        provider: TokenId,
        dependency: TokenId,
    },
    #[error(
        "module {module} is not enabled for offloading but provider {provider} marks method `{method}`"
    )]
    ModuleNotEnabled {
        module: TokenId,
        provider: TokenId,
        method: String,
    },
    #[error("provider {provider} marks method `{method}` for offloading but no module declares it")]
    ProviderWithoutModule { provider: TokenId, method: String },
    #[error("invalid pool options: {0}")]
    InvalidPool(String),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

/// Failures producing a definition or an instance inside a container.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("module {0} not found")]
    ModuleNotFound(TokenId),
    #[error("provider {provider} not found in the context of module {module}")]
    ProviderNotFound { provider: TokenId, module: TokenId },
    #[error("provider {0} is request-scoped and needs a context id")]
    RequestScoped(TokenId),
    #[error("no request is registered for {0}")]
    ContextNotRegistered(ContextId),
    #[error("provider {provider} resolved undeclared dependency {dependency}")]
    UndeclaredDependency {
        provider: TokenId,
        dependency: TokenId,
    },
    #[error("circular dependency: {}", format_path(.0))]
    CircularDependency(Vec<TokenId>),
    #[error("provider {provider} is not a {expected}")]
    TypeMismatch {
        provider: TokenId,
        expected: &'static str,
    },
    #[error("failed to construct provider {provider}: {source}")]
    Construction {
        provider: TokenId,
        #[source]
        source: anyhow::Error,
    },
    #[error("application context for module {0} is closed")]
    Closed(TokenId),
}

fn format_path(path: &[TokenId]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Failures of the worker pool itself.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool is closed")]
    Closed,
    #[error("worker pool queue is full ({capacity} tasks)")]
    QueueFull { capacity: usize },
    #[error("worker terminated while running the task")]
    WorkerCrashed,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Error returned to the caller of an offloaded method.
#[derive(Debug, thiserror::Error)]
pub enum OffloadError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The worker-side failure, message preserved verbatim.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("{provider}::{method} is request-scoped; its first argument must be a request context")]
    MissingRequestContext { provider: TokenId, method: String },
}

#[cfg(test)]
mod tests {
    use offload_core::RemoteErrorKind;

    use super::*;

    #[test]
    fn remote_error_is_transparent() {
        let err = OffloadError::from(RemoteError::new(RemoteErrorKind::User, "boom"));
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn module_not_enabled_names_module() {
        let err = ConfigError::ModuleNotEnabled {
            module: TokenId::new("app", "MathModule"),
            provider: TokenId::new("app", "PiService"),
            method: "pi".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("app::MathModule"));
        assert!(text.contains("`pi`"));
    }

    #[test]
    fn circular_dependency_formats_path() {
        let err = ResolutionError::CircularDependency(vec![
            TokenId::new("a", "A"),
            TokenId::new("b", "B"),
            TokenId::new("a", "A"),
        ]);
        assert_eq!(err.to_string(), "circular dependency: a::A -> b::B -> a::A");
    }

    #[test]
    fn provider_not_found_is_descriptive() {
        let err = ResolutionError::ProviderNotFound {
            provider: TokenId::new("app", "Clock"),
            module: TokenId::new("app", "MathModule"),
        };
        assert!(err.to_string().contains("not found"));
    }
}
