//! Pipeline orchestration.
//!
//! Request leg: detect → `transform_request_out` → feature chain →
//! `transform_request_in` → rectify → script `on_request` → dispatch.
//! Response leg: script `on_response` → `transform_response_in` → feature
//! chain → `transform_response_out`.
//!
//! Streams pump provider frames through a per-session [`StreamTranslator`]:
//! decode → grammar bridge → feature chain → script chunk hook → encode.
//! One frame is fully processed and handed to the client before the next is
//! consumed; cancellation is by dropping the output stream.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use http::HeaderMap;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::core::error::{ProxyError, Result};
use crate::core::error_types::ERROR_TYPE_STREAM;
use crate::scripting::ScriptRuntime;
use crate::transformer::detector::ProtocolDetector;
use crate::transformer::features::FeatureTransformer;
use crate::transformer::rectifier::sanitize_provider_payload;
use crate::transformer::stream::{format_sse_data, format_sse_event, StreamSession};
use crate::transformer::{
    Protocol, TransformContext, Transformer, TransformerRegistry, UnifiedStreamChunk,
};

// ============================================================================
// Dispatch interface
// ============================================================================

/// Provider-bound request handed to the external dispatcher.
#[derive(Debug)]
pub struct DispatchRequest {
    pub payload: Value,
    pub method: http::Method,
    pub headers: HeaderMap,
    pub stream: bool,
}

impl DispatchRequest {
    pub fn post(payload: Value, headers: HeaderMap, stream: bool) -> Self {
        Self {
            payload,
            method: http::Method::POST,
            headers,
            stream,
        }
    }
}

/// What the dispatcher produced: a buffered body or an SSE byte stream.
pub enum DispatchReply {
    Buffered(Value),
    Stream(BoxStream<'static, Result<Bytes>>),
}

/// Upstream I/O boundary. Provider selection, retries, and URL construction
/// live behind this trait, outside the crate.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send(&self, request: DispatchRequest) -> Result<DispatchReply>;
}

// ============================================================================
// Pipeline
// ============================================================================

/// Orchestrates protocol transformers, the feature chain, the rectifier,
/// and the scripting runtime for one proxy deployment. Cheap to clone
/// handles into; holds no per-request state.
pub struct TransformPipeline {
    registry: Arc<TransformerRegistry>,
    features: Option<Arc<dyn FeatureTransformer>>,
    scripts: Option<Arc<dyn ScriptRuntime>>,
}

impl TransformPipeline {
    pub fn new(registry: Arc<TransformerRegistry>) -> Self {
        Self {
            registry,
            features: None,
            scripts: None,
        }
    }

    pub fn with_features(mut self, features: impl FeatureTransformer + 'static) -> Self {
        self.features = Some(Arc::new(features));
        self
    }

    pub fn with_features_arc(mut self, features: Arc<dyn FeatureTransformer>) -> Self {
        self.features = Some(features);
        self
    }

    pub fn with_script_runtime(mut self, scripts: Arc<dyn ScriptRuntime>) -> Self {
        self.scripts = Some(scripts);
        self
    }

    pub fn registry(&self) -> &TransformerRegistry {
        &self.registry
    }

    /// Classify an incoming request and confirm a transformer exists for
    /// it.
    pub fn detect(&self, raw: &Value, headers: &HeaderMap, path: &str) -> Result<Protocol> {
        let protocol = ProtocolDetector::detect_with_headers(raw, headers, path);
        self.registry.get_or_error(protocol)?;
        Ok(protocol)
    }

    /// Client wire → provider wire.
    pub fn transform_request(&self, raw: Value, ctx: &TransformContext) -> Result<Value> {
        let client = self.registry.get_or_error(ctx.client_protocol)?;
        let provider = self.registry.get_or_error(ctx.provider_protocol)?;

        let mut unified = client.transform_request_out(raw)?;
        unified.model = ctx.effective_model().to_string();
        if !ctx.request_id.is_empty() {
            unified.request_id = ctx.request_id.clone();
        }

        if let Some(ref features) = self.features {
            features.transform_request(&mut unified)?;
        }

        let mut payload = provider.transform_request_in(&unified)?;
        sanitize_provider_payload(&mut payload);

        if let Some(ref scripts) = self.scripts {
            if scripts.has_script(&ctx.provider_name) {
                payload = scripts.on_request(&ctx.provider_name, payload)?;
            }
        }

        Ok(payload)
    }

    /// Provider wire → client wire.
    pub fn transform_response(&self, raw: Value, ctx: &TransformContext) -> Result<Value> {
        let client = self.registry.get_or_error(ctx.client_protocol)?;
        let provider = self.registry.get_or_error(ctx.provider_protocol)?;

        let mut raw = raw;
        if let Some(ref scripts) = self.scripts {
            if scripts.has_script(&ctx.provider_name) {
                raw = scripts.on_response(&ctx.provider_name, raw)?;
            }
        }

        let mut unified = provider.transform_response_in(raw, &ctx.original_model)?;
        unified.model = ctx.original_model.clone();

        if let Some(ref features) = self.features {
            features.transform_response(&mut unified)?;
        }

        client.transform_response_out(&unified, ctx.client_protocol)
    }

    /// Fresh per-stream translator for this context.
    pub fn stream_translator(&self, ctx: &TransformContext) -> Result<StreamTranslator> {
        Ok(StreamTranslator {
            provider: self.registry.get_or_error(ctx.provider_protocol)?.clone(),
            client: self.registry.get_or_error(ctx.client_protocol)?.clone(),
            features: self.features.clone(),
            scripts: self.scripts.clone(),
            ctx: ctx.clone(),
            session: StreamSession::new(ctx.original_model.clone()),
        })
    }

    /// One buffered round trip through the dispatcher.
    pub async fn execute(
        &self,
        raw: Value,
        ctx: &TransformContext,
        dispatcher: &dyn Dispatcher,
        headers: HeaderMap,
    ) -> Result<Value> {
        let payload = self.transform_request(raw, ctx)?;
        match dispatcher
            .send(DispatchRequest::post(payload, headers, false))
            .await?
        {
            DispatchReply::Buffered(body) => self.transform_response(body, ctx),
            DispatchReply::Stream(_) => Err(ProxyError::Upstream(
                "dispatcher returned a stream for a buffered request".into(),
            )),
        }
    }

    /// One streaming round trip. The returned stream yields client-ready
    /// SSE text; decode failures skip the frame, an upstream abort closes
    /// the client's state machine cleanly.
    pub async fn execute_stream(
        &self,
        raw: Value,
        ctx: &TransformContext,
        dispatcher: &dyn Dispatcher,
        headers: HeaderMap,
    ) -> Result<BoxStream<'static, String>> {
        let payload = self.transform_request(raw, ctx)?;
        let reply = dispatcher
            .send(DispatchRequest::post(payload, headers, true))
            .await?;
        let mut frames = match reply {
            DispatchReply::Stream(frames) => frames,
            DispatchReply::Buffered(_) => {
                return Err(ProxyError::Upstream(
                    "dispatcher returned a buffered body for a streaming request".into(),
                ))
            }
        };

        let mut translator = self.stream_translator(ctx)?;
        let output = async_stream::stream! {
            while let Some(item) = frames.next().await {
                match item {
                    Ok(frame) => match translator.feed(&frame) {
                        Ok(text) => {
                            if !text.is_empty() {
                                yield text;
                            }
                        }
                        Err(err) => {
                            let tail = translator.abort(&err);
                            if !tail.is_empty() {
                                yield tail;
                            }
                            return;
                        }
                    },
                    Err(err) => {
                        tracing::warn!(error = %err, "upstream stream failed mid-flight");
                        let tail = translator.abort(&err);
                        if !tail.is_empty() {
                            yield tail;
                        }
                        return;
                    }
                }
            }
            let tail = translator.finish();
            if !tail.is_empty() {
                yield tail;
            }
        };
        Ok(output.boxed())
    }
}

// ============================================================================
// Stream translator
// ============================================================================

/// Per-stream bundle: transformer handles plus the session state. Owned by
/// exactly one streaming translation; never shared.
pub struct StreamTranslator {
    provider: Arc<dyn Transformer>,
    client: Arc<dyn Transformer>,
    features: Option<Arc<dyn FeatureTransformer>>,
    scripts: Option<Arc<dyn ScriptRuntime>>,
    ctx: TransformContext,
    session: StreamSession,
}

impl StreamTranslator {
    /// Translate incoming provider bytes into client SSE text.
    ///
    /// Bytes may be cut anywhere; the session's SSE parser reassembles
    /// complete frames before decoding. A frame that fails to decode is
    /// skipped with a warning; later frames still drive the state machine.
    pub fn feed(&mut self, bytes: &Bytes) -> Result<String> {
        let mut out = String::new();
        for event in self.session.sse.parse(bytes) {
            let Some(data) = event.data else { continue };
            let frame = Bytes::from(format_sse_event(event.event.as_deref(), &data));

            let decoded = match self
                .provider
                .transform_stream_chunk_in(&mut self.session.decoder, &frame)
            {
                Ok(chunks) => chunks,
                Err(ProxyError::Decode(msg)) => {
                    tracing::warn!(
                        request_id = %self.ctx.request_id,
                        error = %msg,
                        "skipping undecodable stream frame"
                    );
                    continue;
                }
                Err(other) => return Err(other),
            };

            let normalized = self.session.bridge.process(decoded);
            out.push_str(&self.encode_chunks(normalized)?);
        }
        Ok(out)
    }

    /// Whether the stream already closed with a `message_stop`.
    pub fn is_complete(&self) -> bool {
        self.session.bridge.message_stopped()
    }

    /// Close out a stream that ended without its terminal events.
    pub fn finish(&mut self) -> String {
        let tail = self.session.bridge.finalize();
        self.encode_chunks(tail).unwrap_or_default()
    }

    /// Close out an aborted stream: synthetic terminal events plus a
    /// stream-error frame where the client protocol can carry one.
    pub fn abort(&mut self, err: &ProxyError) -> String {
        let mut out = self.finish();
        out.push_str(&self.stream_error_frame(err));
        out
    }

    fn encode_chunks(&mut self, chunks: Vec<UnifiedStreamChunk>) -> Result<String> {
        let mut out = String::new();
        for mut chunk in chunks {
            if let Some(ref features) = self.features {
                features.transform_stream_chunk(&mut chunk)?;
            }
            if let Some(ref scripts) = self.scripts {
                if scripts.has_stream_chunk_hook(&self.ctx.provider_name) {
                    let rewritten =
                        scripts.on_stream_chunk(&self.ctx.provider_name, serde_json::to_value(&chunk)?)?;
                    chunk = serde_json::from_value(rewritten)
                        .map_err(|e| ProxyError::Script(format!("invalid chunk from script: {}", e)))?;
                }
            }
            out.push_str(&self.client.transform_stream_chunk_out(
                &mut self.session.encoder,
                &chunk,
                self.ctx.client_protocol,
            )?);
        }
        Ok(out)
    }

    fn stream_error_frame(&self, err: &ProxyError) -> String {
        let envelope = json!({
            "type": ERROR_TYPE_STREAM,
            "message": err.to_string(),
        });
        match self.ctx.client_protocol {
            // Named-event wires carry a dedicated error event.
            Protocol::Anthropic | Protocol::GcpVertex => {
                format_sse_event(Some("error"), &envelope.to_string())
            }
            Protocol::ResponseApi => format_sse_data(
                &json!({"type": "error", "error": envelope}).to_string(),
            ),
            // OpenAI and Gemini have no error event; the synthetic stop
            // already closed the stream.
            Protocol::OpenAI | Protocol::Gemini => String::new(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
