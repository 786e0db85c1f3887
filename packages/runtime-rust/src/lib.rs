//! Offload Runtime: runs marked methods of DI-managed providers on a worker
//! thread pool while callers see an ordinary async method call.

pub mod app;
pub mod config;
pub mod di;
pub mod error;
pub mod offload;
pub mod pool;

pub use app::OffloadApp;
pub use config::{ContextIdMode, OffloadConfig, PoolConfig};
pub use di::{
    Catalog, Container, Instance, ModuleDef, Provider, ProviderDef, Resolver, Scope, UnknownMethod,
};
pub use error::{ConfigError, OffloadError, PoolError, ResolutionError};
pub use offload_core::{declare_token, RequestContext, Token, TokenId, Value};
pub use pool::{current_worker, PoolState, PoolStats, WorkerInfo};
