//! Offloading: from a marked method on the calling side to its body running
//! on a worker thread.
//!
//! 1. **Explorer** (`explorer`): startup scan producing the offload registry
//! 2. **Interception** (`intercept`): construction-time stubs for marked methods
//! 3. **Dispatch** (`dispatch`): envelope in, result or remote error out
//! 4. **Bootstrap** (`bootstrap`): worker-side reconstruction and invocation

pub mod bootstrap;
pub mod dispatch;
pub mod explorer;
pub mod intercept;

pub use bootstrap::WorkerBootstrap;
pub use dispatch::Dispatcher;
pub use explorer::{OffloadExplorer, OffloadRegistry, OffloadTarget};
pub use intercept::{InterceptHook, OffloadStub};
