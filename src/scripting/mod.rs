//! Interface to the external per-provider scripting runtime.
//!
//! Providers can register scripts exposing three hooks — `on_request`,
//! `on_response`, `on_stream_chunk` — that rewrite raw JSON payloads. The
//! runtime itself (sandboxing, compilation, instruction budgets) lives
//! outside this crate; the pipeline only needs the call surface below.
//! Hook failures surface as [`ProxyError::Script`] and are not retried.

use serde_json::Value;
use std::sync::Arc;

use crate::core::error::Result;
use crate::transformer::features::FeatureTransformer;
use crate::transformer::unified::{UnifiedRequest, UnifiedResponse, UnifiedStreamChunk};

/// Call surface of a scripting runtime.
///
/// Each hook receives the payload for a named provider and returns the
/// (possibly rewritten) payload. A runtime that has no script for the
/// provider must return the payload unchanged.
pub trait ScriptRuntime: Send + Sync {
    /// Whether a script is registered for this provider.
    fn has_script(&self, provider: &str) -> bool;

    /// Whether the provider's script defines the stream-chunk hook.
    fn has_stream_chunk_hook(&self, provider: &str) -> bool;

    /// Rewrite the provider-bound request payload.
    fn on_request(&self, provider: &str, payload: Value) -> Result<Value>;

    /// Rewrite the raw provider response.
    fn on_response(&self, provider: &str, payload: Value) -> Result<Value>;

    /// Rewrite one stream chunk (serialized unified form).
    fn on_stream_chunk(&self, provider: &str, chunk: Value) -> Result<Value>;
}

/// Chain member that marks script-backed providers as active.
///
/// The UIF-level hooks are deliberate no-ops: scripts operate on raw JSON,
/// so the pipeline invokes the runtime directly at the raw-payload
/// boundaries. This transformer exists so chain introspection (`names`,
/// activity) still sees the scripting stage.
pub struct ScriptFeatureTransformer {
    runtime: Arc<dyn ScriptRuntime>,
    provider_name: String,
}

impl ScriptFeatureTransformer {
    pub fn new(runtime: Arc<dyn ScriptRuntime>, provider_name: impl Into<String>) -> Self {
        Self {
            runtime,
            provider_name: provider_name.into(),
        }
    }
}

impl FeatureTransformer for ScriptFeatureTransformer {
    fn is_active(&self) -> bool {
        self.runtime.has_script(&self.provider_name)
    }

    fn transform_request(&self, _request: &mut UnifiedRequest) -> Result<()> {
        Ok(())
    }

    fn transform_response(&self, _response: &mut UnifiedResponse) -> Result<()> {
        Ok(())
    }

    fn transform_stream_chunk(&self, _chunk: &mut UnifiedStreamChunk) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "script"
    }
}
