//! Protocol transformation infrastructure.
//!
//! Four hooks move a payload through the proxy:
//!
//! ```text
//! Client request
//!     ↓ transform_request_out   (client wire → UIF)
//! Unified Internal Format
//!     ↓ transform_request_in    (UIF → provider wire)
//! Provider
//!     ↓ transform_response_in   (provider wire → UIF)
//! Unified Internal Format
//!     ↓ transform_response_out  (UIF → client wire)
//! Client response
//! ```
//!
//! Streams follow the same shape chunk-wise through
//! `transform_stream_chunk_in` / `transform_stream_chunk_out`, with
//! per-session decode state owned by the pipeline (see [`stream`]).

pub mod anthropic;
pub mod detector;
pub mod features;
pub mod gcp_vertex;
pub mod gemini;
pub mod openai;
pub mod pipeline;
pub mod rectifier;
pub mod response_api;
pub mod stream;
pub mod unified;

use arc_swap::ArcSwap;
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub use detector::ProtocolDetector;
pub use features::{
    FeatureTransformer, FeatureTransformerChain, ReasoningConfig, ReasoningTransformer,
    TokenLimitTransformer,
};
pub use stream::{SseParser, StreamBridge, StreamDecoder, StreamEncoder, StreamSession};
pub use unified::*;

use crate::core::error::{ProxyError, Result};

// ============================================================================
// Transformer trait
// ============================================================================

/// Bidirectional translator between one wire protocol and the UIF.
///
/// Implementations are stateless and shared across requests; anything a
/// stream needs to remember between chunks lives in the [`StreamDecoder`]
/// the pipeline constructs per session and passes by `&mut`.
pub trait Transformer: Send + Sync {
    /// Protocol this transformer handles.
    fn protocol(&self) -> Protocol;

    /// Canonical endpoint path for the protocol.
    fn endpoint(&self) -> &'static str;

    /// Client wire → UIF.
    fn transform_request_out(&self, raw: Value) -> Result<UnifiedRequest>;

    /// UIF → provider wire.
    fn transform_request_in(&self, unified: &UnifiedRequest) -> Result<Value>;

    /// Provider wire → UIF. `original_model` restores the client's model
    /// name, which the provider may have rewritten.
    fn transform_response_in(&self, raw: Value, original_model: &str) -> Result<UnifiedResponse>;

    /// UIF → client wire.
    fn transform_response_out(
        &self,
        unified: &UnifiedResponse,
        client_protocol: Protocol,
    ) -> Result<Value>;

    /// Provider SSE frame → UIF chunks. One frame may yield zero or many
    /// chunks.
    fn transform_stream_chunk_in(
        &self,
        decoder: &mut StreamDecoder,
        chunk: &Bytes,
    ) -> Result<Vec<UnifiedStreamChunk>>;

    /// UIF chunk → client SSE frame. An empty string means the chunk has no
    /// representation on this wire; a returned string may carry more than
    /// one frame.
    fn transform_stream_chunk_out(
        &self,
        encoder: &mut StreamEncoder,
        chunk: &UnifiedStreamChunk,
        client_protocol: Protocol,
    ) -> Result<String>;

    /// Request content type.
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    /// Structural sniff used by content-based detection.
    fn can_handle(&self, raw: &Value) -> bool;
}

impl std::fmt::Debug for dyn Transformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transformer")
            .field("protocol", &self.protocol())
            .finish()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Maps protocol tags to transformer instances.
pub struct TransformerRegistry {
    transformers: HashMap<Protocol, Arc<dyn Transformer>>,
}

impl TransformerRegistry {
    /// Registry with all built-in transformers.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(openai::OpenAITransformer::new()));
        registry.register(Arc::new(anthropic::AnthropicTransformer::new()));
        registry.register(Arc::new(response_api::ResponseApiTransformer::new()));
        registry.register(Arc::new(gemini::GeminiTransformer::new()));
        registry.register(Arc::new(gcp_vertex::GcpVertexTransformer::new()));
        registry
    }

    /// Empty registry, for tests and custom setups.
    pub fn empty() -> Self {
        Self {
            transformers: HashMap::new(),
        }
    }

    pub fn register(&mut self, transformer: Arc<dyn Transformer>) {
        self.transformers
            .insert(transformer.protocol(), transformer);
    }

    pub fn get(&self, protocol: Protocol) -> Option<&Arc<dyn Transformer>> {
        self.transformers.get(&protocol)
    }

    pub fn get_or_error(&self, protocol: Protocol) -> Result<&Arc<dyn Transformer>> {
        self.get(protocol)
            .ok_or_else(|| ProxyError::UnknownProtocol(protocol.to_string()))
    }

    /// Content-based discovery: first registered transformer whose
    /// `can_handle` accepts the payload.
    pub fn detect_and_get(&self, raw: &Value) -> Option<&Arc<dyn Transformer>> {
        self.transformers.values().find(|t| t.can_handle(raw))
    }

    pub fn protocols(&self) -> Vec<Protocol> {
        self.transformers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-mostly handle around the registry. Reads are lock-free snapshots;
/// `reload` swaps in a whole new registry (startup and explicit reload only).
pub struct SharedRegistry {
    inner: ArcSwap<TransformerRegistry>,
}

impl SharedRegistry {
    pub fn new(registry: TransformerRegistry) -> Self {
        Self {
            inner: ArcSwap::from_pointee(registry),
        }
    }

    /// Current registry snapshot.
    pub fn load(&self) -> Arc<TransformerRegistry> {
        self.inner.load_full()
    }

    /// Replace the registry wholesale.
    pub fn reload(&self, registry: TransformerRegistry) {
        self.inner.store(Arc::new(registry));
    }
}

impl Default for SharedRegistry {
    fn default() -> Self {
        Self::new(TransformerRegistry::new())
    }
}

// ============================================================================
// Transform context
// ============================================================================

/// Per-request context threaded through the pipeline.
#[derive(Debug, Clone, Default)]
pub struct TransformContext {
    pub request_id: String,
    pub client_protocol: Protocol,
    pub provider_protocol: Protocol,
    /// Model name as the client sent it.
    pub original_model: String,
    /// Model name after provider-side mapping; empty means unmapped.
    pub mapped_model: String,
    /// Provider name, used to address scripting hooks.
    pub provider_name: String,
    pub stream: bool,
    pub metadata: HashMap<String, Value>,
}

impl TransformContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        TransformContext {
            request_id: request_id.into(),
            ..Default::default()
        }
    }

    pub fn is_same_protocol(&self) -> bool {
        self.client_protocol == self.provider_protocol
    }

    /// Model name the provider should see.
    pub fn effective_model(&self) -> &str {
        if self.mapped_model.is_empty() {
            &self.original_model
        } else {
            &self.mapped_model
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
