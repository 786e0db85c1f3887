//! Wire payloads exchanged between the calling thread and a worker.
//!
//! Everything is encoded with `rmp_serde::to_vec_named()` so the worker receives
//! a copy, never a reference into the caller's object graph.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::RequestContext;
use crate::token::TokenId;
use crate::types::Value;

// ---------------------------------------------------------------------------
// Codec errors
// ---------------------------------------------------------------------------

/// Failure to encode or decode a wire payload.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode payload: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode payload: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

// ---------------------------------------------------------------------------
// DispatchEnvelope
// ---------------------------------------------------------------------------

/// Everything a worker needs to rebuild the target and run one call.
///
/// Constructed fresh per call and moved into the pool. It carries identifiers
/// only; the worker re-derives the target object from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchEnvelope {
    pub module: TokenId,
    pub provider: TokenId,
    pub method: String,
    pub args: Vec<Value>,
}

impl DispatchEnvelope {
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if an argument cannot be serialized.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if `bytes` is not a valid envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// The request context in first-argument position, if any.
    #[must_use]
    pub fn request_context(&self) -> Option<&RequestContext> {
        self.args.first().and_then(Value::as_request)
    }
}

/// Per-method envelope prefix, built once at startup.
///
/// Identifiers never change between calls; only the arguments do.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnvelopeTemplate {
    pub module: TokenId,
    pub provider: TokenId,
    pub method: String,
}

impl EnvelopeTemplate {
    #[must_use]
    pub fn new(module: TokenId, provider: TokenId, method: impl Into<String>) -> Self {
        Self {
            module,
            provider,
            method: method.into(),
        }
    }

    /// Completes the template with this call's arguments.
    #[must_use]
    pub fn fill(&self, args: Vec<Value>) -> DispatchEnvelope {
        DispatchEnvelope {
            module: self.module.clone(),
            provider: self.provider.clone(),
            method: self.method.clone(),
            args,
        }
    }
}

// ---------------------------------------------------------------------------
// Markers
// ---------------------------------------------------------------------------

/// Method-level marker: this method's body runs in a worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OffloadDescriptor {
    /// The provider defining the method.
    pub provider: TokenId,
    pub method: String,
}

/// Module-level marker: this module is a valid offload target and exposes its
/// own locator to workers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleMarker {
    pub module: TokenId,
}

// ---------------------------------------------------------------------------
// Replies
// ---------------------------------------------------------------------------

/// Category of a failure that happened on the worker side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RemoteErrorKind {
    ModuleNotFound,
    ProviderNotFound,
    MethodNotFound,
    MissingRequestContext,
    /// Any other DI resolution failure (construction, cycles, ...).
    Resolution,
    Codec,
    /// The offloaded method's own error.
    User,
    /// The offloaded method panicked.
    Panicked,
}

impl RemoteErrorKind {
    /// Whether the failure is a resolution problem rather than user code.
    #[must_use]
    pub fn is_resolution(self) -> bool {
        matches!(
            self,
            Self::ModuleNotFound
                | Self::ProviderNotFound
                | Self::MethodNotFound
                | Self::MissingRequestContext
                | Self::Resolution
        )
    }
}

/// A worker-side failure, copied back to the caller.
///
/// `Display` is the original message so a failed offloaded call reads exactly
/// like a failed local call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
    /// Causes below the top-level message, outermost first.
    #[serde(default)]
    pub chain: Vec<String>,
    /// Best-effort backtrace captured in the worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl RemoteError {
    #[must_use]
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            chain: Vec::new(),
            stack: None,
        }
    }

    /// Captures a user error verbatim, including its cause chain.
    #[must_use]
    pub fn from_user(kind: RemoteErrorKind, error: &(dyn std::error::Error + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        Self {
            kind,
            message: error.to_string(),
            chain,
            stack: None,
        }
    }

    #[must_use]
    pub fn with_backtrace(mut self, backtrace: impl fmt::Display) -> Self {
        let rendered = backtrace.to_string();
        if !rendered.is_empty() && rendered != "disabled backtrace" {
            self.stack = Some(rendered);
        }
        self
    }
}

/// Outcome of one worker-side call as it travels back.
pub type WorkerReply = Result<Value, RemoteError>;

/// # Errors
///
/// Returns [`CodecError::Encode`] if the reply cannot be serialized.
pub fn encode_reply(reply: &WorkerReply) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(reply)?)
}

/// # Errors
///
/// Returns [`CodecError::Decode`] if `bytes` is not a valid reply.
pub fn decode_reply(bytes: &[u8]) -> Result<WorkerReply, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextId;

    fn template() -> EnvelopeTemplate {
        EnvelopeTemplate::new(
            TokenId::new("app", "MathModule"),
            TokenId::new("app::math", "PiService"),
            "pi",
        )
    }

    #[test]
    fn template_fill_keeps_identifiers() {
        let env = template().fill(vec![Value::Int(10_000)]);
        assert_eq!(env.module.export_name, "MathModule");
        assert_eq!(env.provider.export_name, "PiService");
        assert_eq!(env.method, "pi");
        assert_eq!(env.args, vec![Value::Int(10_000)]);
    }

    #[test]
    fn envelope_carries_attached_context_id() {
        let mut ctx = RequestContext::new().with("requestId", "r1");
        ctx.attach_context_id(ContextId::new(42));
        let env = template().fill(vec![ctx.into(), Value::Int(1)]);

        let decoded = DispatchEnvelope::decode(&env.encode().expect("encode")).expect("decode");
        let crossed = decoded.request_context().expect("request context");
        assert_eq!(crossed.context_id(), Some(ContextId::new(42)));
        assert_eq!(decoded, env);
    }

    #[test]
    fn request_context_requires_first_position() {
        let ctx = RequestContext::new();
        let env = template().fill(vec![Value::Int(1), ctx.into()]);
        assert!(env.request_context().is_none());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            DispatchEnvelope::decode(&[0xc1, 0x00]),
            Err(CodecError::Decode(_))
        ));
    }

    #[test]
    fn remote_error_displays_original_message() {
        let err = RemoteError::new(RemoteErrorKind::User, "boom");
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn error_reply_crosses_the_wire() {
        let reply: WorkerReply = Err(RemoteError::new(RemoteErrorKind::ProviderNotFound, "gone"));
        let decoded = decode_reply(&encode_reply(&reply).expect("encode")).expect("decode");
        let err = decoded.expect_err("error reply");
        assert_eq!(err.kind, RemoteErrorKind::ProviderNotFound);
        assert_eq!(err.message, "gone");
    }

    #[test]
    fn from_user_collects_cause_chain() {
        #[derive(Debug, thiserror::Error)]
        #[error("outer")]
        struct Outer(#[source] std::io::Error);

        let err = Outer(std::io::Error::other("inner"));
        let remote = RemoteError::from_user(RemoteErrorKind::User, &err);
        assert_eq!(remote.message, "outer");
        assert_eq!(remote.chain, vec!["inner".to_string()]);
    }

    #[test]
    fn resolution_kinds() {
        assert!(RemoteErrorKind::ProviderNotFound.is_resolution());
        assert!(!RemoteErrorKind::User.is_resolution());
        assert!(!RemoteErrorKind::Panicked.is_resolution());
    }
}
