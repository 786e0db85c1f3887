use std::sync::Arc;
use std::time::Instant;

use offload_core::{decode_reply, DispatchEnvelope, Value};
use tracing::{debug, debug_span, error, warn, Instrument};

use crate::error::OffloadError;
use crate::pool::WorkerPool;

/// Sends dispatch envelopes to the worker pool and unpacks the replies.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    pool: Arc<WorkerPool>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self { pool }
    }

    /// Runs `envelope` on a worker and returns the method's result.
    ///
    /// Failed calls are not retried.
    ///
    /// # Errors
    ///
    /// - [`OffloadError::Remote`] carrying the worker-side failure; its
    ///   message is the original error's message.
    /// - [`OffloadError::Pool`] if the pool refused or lost the task.
    /// - [`OffloadError::Codec`] if the envelope or reply cannot be encoded.
    pub async fn submit(&self, envelope: DispatchEnvelope) -> Result<Value, OffloadError> {
        let span = debug_span!(
            "offload",
            provider = %envelope.provider,
            method = %envelope.method,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );
        let start = Instant::now();
        let result = self.round_trip(envelope).instrument(span.clone()).await;

        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = start.elapsed().as_millis() as u64;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(OffloadError::Remote(_)) => "remote_error",
            Err(_) => "error",
        };
        span.record("duration_ms", duration_ms);
        span.record("outcome", outcome);
        result
    }

    async fn round_trip(&self, envelope: DispatchEnvelope) -> Result<Value, OffloadError> {
        let payload = envelope.encode()?;
        let DispatchEnvelope {
            provider, method, ..
        } = envelope;
        debug!(provider = %provider, method = %method, bytes = payload.len(), "dispatching offloaded call");

        let reply = match self.pool.run(payload).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(provider = %provider, method = %method, error = %e, "worker pool failed offloaded call");
                return Err(e.into());
            }
        };

        match decode_reply(&reply)? {
            Ok(value) => Ok(value),
            Err(remote) => {
                if remote.kind.is_resolution() {
                    warn!(
                        provider = %provider,
                        method = %method,
                        kind = ?remote.kind,
                        error = %remote.message,
                        "offloaded call failed to resolve in worker"
                    );
                } else {
                    debug!(provider = %provider, method = %method, error = %remote.message, "offloaded call failed");
                }
                Err(OffloadError::Remote(remote))
            }
        }
    }
}
