use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use offload_core::TokenId;
use parking_lot::RwLock;
use tracing::warn;

use super::provider::Instance;

// ---------------------------------------------------------------------------
// InstanceRegistry
// ---------------------------------------------------------------------------

/// Instances constructed inside one container (or one request scope).
///
/// Instances are closed in reverse creation order, so a provider is always
/// closed before the dependencies it was built from.
pub struct InstanceRegistry {
    by_token: DashMap<TokenId, Instance>,
    /// Creation order for deterministic close sequencing.
    creation_order: RwLock<Vec<TokenId>>,
}

impl InstanceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_token: DashMap::new(),
            creation_order: RwLock::new(Vec::new()),
        }
    }

    /// Retrieve an instance by token.
    pub fn get(&self, token: &TokenId) -> Option<Instance> {
        self.by_token.get(token).map(|entry| entry.value().clone())
    }

    /// Stores `instance` unless one is already present for its token.
    ///
    /// Returns the instance that ends up registered; when two threads race to
    /// construct the same provider, the first insert wins.
    pub fn insert_if_absent(&self, instance: Instance) -> Instance {
        match self.by_token.entry(instance.token().clone()) {
            Entry::Occupied(existing) => existing.get().clone(),
            Entry::Vacant(slot) => {
                self.creation_order.write().push(instance.token().clone());
                slot.insert(instance.clone());
                instance
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }

    /// Closes and removes every instance in reverse creation order.
    ///
    /// A failing `on_close` is logged and does not stop the remaining ones.
    /// Returns the number of instances closed.
    pub async fn close_all(&self) -> usize {
        let order = std::mem::take(&mut *self.creation_order.write());
        let mut closed = 0;
        for token in order.iter().rev() {
            let Some((_, instance)) = self.by_token.remove(token) else {
                continue;
            };
            if let Err(e) = instance.provider().on_close().await {
                warn!(provider = %token, error = %e, "provider failed to close");
            }
            closed += 1;
        }
        closed
    }
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
