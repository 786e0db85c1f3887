//! Minimal dependency-injection runtime.
//!
//! 1. **Definitions** (`provider`, `module`): what can be built and how
//! 2. **Catalog** (`catalog`): immutable lookup of definitions by token
//! 3. **Containers** (`container`): instances, scopes and lifecycle
//! 4. **Registry** (`registry`): per-container instance storage

pub mod catalog;
pub mod container;
pub mod module;
pub mod provider;
pub mod registry;

pub use catalog::{Catalog, CatalogBuilder};
pub use container::{Container, InstanceHook};
pub use module::ModuleDef;
pub use provider::{Instance, Provider, ProviderDef, Resolver, Scope, UnknownMethod};
pub use registry::InstanceRegistry;
