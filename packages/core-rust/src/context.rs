//! Request context objects and the identifiers that key per-request scopes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::hash::fnv1a_64;
use crate::types::Value;

/// Identifier keying one per-request set of provider instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextId(u64);

impl ContextId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{:016x}", self.0)
    }
}

/// Caller-supplied object representing one logical request.
///
/// The payload is an arbitrary string-keyed map. The context identifier is a
/// hidden slot: it is not part of the payload, it is set at most once, and it
/// is serialized along with the object so that the same identifier is seen on
/// both sides of the worker boundary and by nested calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    payload: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    context_id: Option<ContextId>,
}

impl RequestContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a payload entry, builder style.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    #[must_use]
    pub fn payload(&self) -> &BTreeMap<String, Value> {
        &self.payload
    }

    /// The attached identifier, if one has been derived.
    #[must_use]
    pub fn context_id(&self) -> Option<ContextId> {
        self.context_id
    }

    /// Attaches `id` unless an identifier is already present.
    ///
    /// Returns the identifier that is attached after the call; a second attach
    /// never replaces the first.
    pub fn attach_context_id(&mut self, id: ContextId) -> ContextId {
        *self.context_id.get_or_insert(id)
    }
}

/// Derives a fresh [`ContextId`] for a request that has none attached yet.
pub trait ContextIdStrategy: Send + Sync + fmt::Debug {
    fn derive(&self, request: &RequestContext) -> ContextId;
}

/// Identity-based: every request object gets its own random identifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomContextIds;

impl ContextIdStrategy for RandomContextIds {
    fn derive(&self, _request: &RequestContext) -> ContextId {
        ContextId(rand::random())
    }
}

/// Content-based: requests carrying equal values under `key` share an
/// identifier. Requests without the key fall back to a random identifier.
#[derive(Debug, Clone)]
pub struct KeyedContextIds {
    key: String,
}

impl KeyedContextIds {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl ContextIdStrategy for KeyedContextIds {
    fn derive(&self, request: &RequestContext) -> ContextId {
        let encoded = request
            .get(&self.key)
            .and_then(|value| rmp_serde::to_vec_named(value).ok());
        match encoded {
            Some(bytes) => ContextId(fnv1a_64(&bytes)),
            None => {
                tracing::debug!(key = %self.key, "request has no key, using random context id");
                RandomContextIds.derive(request)
            }
        }
    }
}

/// Attaches context identifiers to request objects using a shared strategy.
///
/// The caller side and every worker must be built with the same strategy.
#[derive(Debug, Clone)]
pub struct ContextIdFactory {
    strategy: Arc<dyn ContextIdStrategy>,
}

impl ContextIdFactory {
    #[must_use]
    pub fn new(strategy: Arc<dyn ContextIdStrategy>) -> Self {
        Self { strategy }
    }

    /// Returns the attached identifier, deriving and attaching one first if
    /// the request has none.
    pub fn get_by_request(&self, request: &mut RequestContext) -> ContextId {
        if let Some(id) = request.context_id() {
            return id;
        }
        let id = self.strategy.derive(request);
        request.attach_context_id(id)
    }
}

impl Default for ContextIdFactory {
    fn default() -> Self {
        Self::new(Arc::new(RandomContextIds))
    }
}
