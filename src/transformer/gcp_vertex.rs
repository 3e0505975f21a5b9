//! GCP Vertex AI transformer.
//!
//! Claude on Vertex speaks the Anthropic Messages wire format; only the
//! URL shape differs, and that belongs to the dispatcher. This transformer
//! is the Anthropic one under a distinct protocol tag.

use super::anthropic::AnthropicTransformer;
use super::{
    Protocol, StreamDecoder, StreamEncoder, Transformer, UnifiedRequest, UnifiedResponse,
    UnifiedStreamChunk,
};
use crate::core::error::Result;
use bytes::Bytes;
use serde_json::Value;

pub struct GcpVertexTransformer {
    inner: AnthropicTransformer,
}

impl GcpVertexTransformer {
    pub fn new() -> Self {
        GcpVertexTransformer {
            inner: AnthropicTransformer::new(),
        }
    }
}

impl Default for GcpVertexTransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer for GcpVertexTransformer {
    fn protocol(&self) -> Protocol {
        Protocol::GcpVertex
    }

    fn endpoint(&self) -> &'static str {
        // Real endpoints are per-project URLs built by the dispatcher.
        "/v1/messages"
    }

    fn transform_request_out(&self, raw: Value) -> Result<UnifiedRequest> {
        self.inner.transform_request_out(raw)
    }

    fn transform_request_in(&self, unified: &UnifiedRequest) -> Result<Value> {
        self.inner.transform_request_in(unified)
    }

    fn transform_response_in(&self, raw: Value, original_model: &str) -> Result<UnifiedResponse> {
        self.inner.transform_response_in(raw, original_model)
    }

    fn transform_response_out(
        &self,
        unified: &UnifiedResponse,
        client_protocol: Protocol,
    ) -> Result<Value> {
        self.inner.transform_response_out(unified, client_protocol)
    }

    fn transform_stream_chunk_in(
        &self,
        decoder: &mut StreamDecoder,
        chunk: &Bytes,
    ) -> Result<Vec<UnifiedStreamChunk>> {
        self.inner.transform_stream_chunk_in(decoder, chunk)
    }

    fn transform_stream_chunk_out(
        &self,
        encoder: &mut StreamEncoder,
        chunk: &UnifiedStreamChunk,
        client_protocol: Protocol,
    ) -> Result<String> {
        self.inner
            .transform_stream_chunk_out(encoder, chunk, client_protocol)
    }

    fn can_handle(&self, raw: &Value) -> bool {
        self.inner.can_handle(raw)
    }
}
