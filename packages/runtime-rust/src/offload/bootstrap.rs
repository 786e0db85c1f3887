//! Worker-side entry point.
//!
//! Each dispatched call is run against a fresh container built from the
//! envelope's module alone. Nothing survives between calls: the container is
//! closed on every exit path, including panics in provider code.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use offload_core::{
    encode_reply, ContextIdFactory, DispatchEnvelope, RemoteError, RemoteErrorKind, TokenId,
    Value, WorkerReply,
};
use tracing::{debug, warn};

use crate::di::{Catalog, Container, UnknownMethod};
use crate::error::ResolutionError;
use crate::pool::worker::panic_message;
use crate::pool::TaskHandler;

/// Rebuilds the target of a dispatch envelope and invokes it.
#[derive(Debug, Clone)]
pub struct WorkerBootstrap {
    catalog: Arc<Catalog>,
    context_ids: ContextIdFactory,
}

impl WorkerBootstrap {
    /// `context_ids` must use the same strategy as the calling side.
    #[must_use]
    pub fn new(catalog: Arc<Catalog>, context_ids: ContextIdFactory) -> Self {
        Self {
            catalog,
            context_ids,
        }
    }

    /// Runs one call: resolve module and provider, build a fresh container
    /// for the module, invoke the method, close the container.
    pub async fn execute(&self, envelope: DispatchEnvelope) -> WorkerReply {
        let DispatchEnvelope {
            module,
            provider,
            method,
            args,
        } = envelope;

        if self.catalog.load_module(&module).is_none() {
            return Err(resolution_failure(&ResolutionError::ModuleNotFound(module)));
        }
        if self.catalog.load_provider(&provider).is_none() {
            return Err(RemoteError::new(
                RemoteErrorKind::ProviderNotFound,
                format!("provider {provider} not found"),
            ));
        }

        let container = Container::for_module(Arc::clone(&self.catalog), &module)
            .map_err(|e| resolution_failure(&e))?;

        let outcome = AssertUnwindSafe(self.invoke_in(&container, &provider, &method, args))
            .catch_unwind()
            .await;
        container.close().await;

        match outcome {
            Ok(reply) => reply,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(provider = %provider, method = %method, panic = %message, "offloaded method panicked");
                Err(RemoteError::new(RemoteErrorKind::Panicked, message))
            }
        }
    }

    async fn invoke_in(
        &self,
        container: &Container,
        provider: &TokenId,
        method: &str,
        mut args: Vec<Value>,
    ) -> WorkerReply {
        if !container.contains(provider) {
            return Err(resolution_failure(&ResolutionError::ProviderNotFound {
                provider: provider.clone(),
                module: container.module().clone(),
            }));
        }

        let resolved = if container.is_tree_static(provider) {
            container.get(provider)
        } else {
            let Some(Value::Request(request)) = args.first_mut() else {
                return Err(RemoteError::new(
                    RemoteErrorKind::MissingRequestContext,
                    format!("{provider}::{method} is request-scoped; its first argument must be a request context"),
                ));
            };
            let id = self.context_ids.get_by_request(request);
            container.register_request(id, request.clone());
            debug!(provider = %provider, context_id = %id, "request registered in worker context");
            container.resolve_in_context(provider, id)
        };
        let instance = resolved.map_err(|e| resolution_failure(&e))?;

        debug!(provider = %provider, method = %method, "invoking offloaded method");
        instance
            .invoke(method, args)
            .await
            .map_err(|e| user_failure(provider, &e))
    }
}

#[async_trait]
impl TaskHandler for WorkerBootstrap {
    async fn handle(&self, payload: Vec<u8>) -> Vec<u8> {
        let reply = match DispatchEnvelope::decode(&payload) {
            Ok(envelope) => self.execute(envelope).await,
            Err(e) => Err(RemoteError::new(RemoteErrorKind::Codec, e.to_string())),
        };
        match encode_reply(&reply) {
            Ok(bytes) => bytes,
            Err(e) => {
                // Usually a result value that cannot be serialized.
                let fallback: WorkerReply = Err(RemoteError::new(
                    RemoteErrorKind::Codec,
                    format!("failed to encode reply: {e}"),
                ));
                encode_reply(&fallback).unwrap_or_default()
            }
        }
    }
}

fn resolution_failure(error: &ResolutionError) -> RemoteError {
    let kind = match error {
        ResolutionError::ModuleNotFound(_) => RemoteErrorKind::ModuleNotFound,
        ResolutionError::ProviderNotFound { .. } => RemoteErrorKind::ProviderNotFound,
        _ => RemoteErrorKind::Resolution,
    };
    warn!(error = %error, "worker failed to resolve offloaded call");
    RemoteError::from_user(kind, error)
}

fn user_failure(provider: &TokenId, error: &anyhow::Error) -> RemoteError {
    if let Some(unknown) = error.downcast_ref::<UnknownMethod>() {
        return RemoteError::new(
            RemoteErrorKind::MethodNotFound,
            format!("{unknown} on provider {provider}"),
        );
    }
    RemoteError::from_user(RemoteErrorKind::User, &**error).with_backtrace(error.backtrace())
}
