//! Feature transformers: ordered, pluggable mutations over the UIF.
//!
//! Applied by the pipeline after `transform_request_out` (before the
//! provider leg) and after `transform_response_in` (before the client
//! leg), and to every unified stream chunk. Inactive transformers are
//! skipped without being consulted further.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::core::error::{ProxyError, Result};

use super::unified::{UnifiedContent, UnifiedRequest, UnifiedResponse, UnifiedStreamChunk};

// ============================================================================
// Trait
// ============================================================================

/// A cross-cutting mutation applied to requests, responses, and stream
/// chunks in unified form.
pub trait FeatureTransformer: Send + Sync {
    /// Whether this transformer should run at all for the current
    /// configuration.
    fn is_active(&self) -> bool {
        true
    }

    /// Mutate a request after it reached unified form.
    fn transform_request(&self, request: &mut UnifiedRequest) -> Result<()>;

    /// Mutate a response after it reached unified form.
    fn transform_response(&self, response: &mut UnifiedResponse) -> Result<()>;

    /// Mutate one unified stream chunk.
    fn transform_stream_chunk(&self, chunk: &mut UnifiedStreamChunk) -> Result<()>;

    /// Name for logging.
    fn name(&self) -> &'static str;
}

// ============================================================================
// Reasoning
// ============================================================================

/// Per-provider reasoning policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    /// Keep thinking blocks in responses and streams.
    pub include_thinking: bool,
    /// Clamp for the `thinking.budget_tokens` request parameter.
    #[serde(default)]
    pub max_budget_tokens: Option<i64>,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            include_thinking: true,
            max_budget_tokens: None,
        }
    }
}

/// Enables, strips, or clamps extended-thinking content.
#[derive(Debug, Clone)]
pub struct ReasoningTransformer {
    config: ReasoningConfig,
}

impl ReasoningTransformer {
    pub fn new(config: ReasoningConfig) -> Self {
        Self { config }
    }

    /// Shorthand used by most call sites: keep or strip, no clamping.
    pub fn with_thinking(include_thinking: bool) -> Self {
        Self::new(ReasoningConfig {
            include_thinking,
            max_budget_tokens: None,
        })
    }

    fn is_thinking(content: &UnifiedContent) -> bool {
        matches!(content, UnifiedContent::Thinking { .. })
    }
}

impl FeatureTransformer for ReasoningTransformer {
    fn transform_request(&self, request: &mut UnifiedRequest) -> Result<()> {
        if !self.config.include_thinking {
            request.parameters.extra.remove("thinking");
            return Ok(());
        }
        if let Some(limit) = self.config.max_budget_tokens {
            if let Some(thinking) = request.parameters.extra.get_mut("thinking") {
                if let Some(budget) = thinking.get("budget_tokens").and_then(|b| b.as_i64()) {
                    if budget > limit {
                        thinking["budget_tokens"] = json!(limit);
                        tracing::debug!(
                            request_id = %request.request_id,
                            requested = budget,
                            clamped = limit,
                            "clamped thinking budget"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    fn transform_response(&self, response: &mut UnifiedResponse) -> Result<()> {
        if !self.config.include_thinking {
            response.content.retain(|c| !Self::is_thinking(c));
        }
        Ok(())
    }

    fn transform_stream_chunk(&self, chunk: &mut UnifiedStreamChunk) -> Result<()> {
        if !self.config.include_thinking {
            if chunk.delta.as_ref().is_some_and(Self::is_thinking) {
                chunk.delta = None;
            }
            if chunk.content_block.as_ref().is_some_and(Self::is_thinking) {
                chunk.content_block = None;
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "reasoning"
    }
}

// ============================================================================
// Token limits
// ============================================================================

/// Clamps (or rejects) `max_tokens` per model.
#[derive(Debug, Clone)]
pub struct TokenLimitTransformer {
    max_tokens: Option<u32>,
    cap_instead_of_reject: bool,
}

impl TokenLimitTransformer {
    /// Cap requests above the limit. `None` disables the transformer.
    pub fn new(max_tokens: Option<u32>) -> Self {
        Self {
            max_tokens,
            cap_instead_of_reject: true,
        }
    }

    /// Reject requests above the limit instead of capping.
    pub fn new_strict(max_tokens: u32) -> Self {
        Self {
            max_tokens: Some(max_tokens),
            cap_instead_of_reject: false,
        }
    }
}

impl FeatureTransformer for TokenLimitTransformer {
    fn is_active(&self) -> bool {
        self.max_tokens.is_some()
    }

    fn transform_request(&self, request: &mut UnifiedRequest) -> Result<()> {
        let Some(limit) = self.max_tokens else {
            return Ok(());
        };
        let Some(requested) = request.parameters.max_tokens else {
            return Ok(());
        };
        if requested > limit as i32 {
            if self.cap_instead_of_reject {
                request.parameters.max_tokens = Some(limit as i32);
                tracing::debug!(
                    request_id = %request.request_id,
                    requested,
                    limit,
                    "capped max_tokens"
                );
            } else {
                return Err(ProxyError::InvalidRequest(format!(
                    "max_tokens {} exceeds limit {}",
                    requested, limit
                )));
            }
        }
        Ok(())
    }

    fn transform_response(&self, _response: &mut UnifiedResponse) -> Result<()> {
        Ok(())
    }

    fn transform_stream_chunk(&self, _chunk: &mut UnifiedStreamChunk) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "token_limit"
    }
}

// ============================================================================
// Chain
// ============================================================================

/// Ordered list of feature transformers, applied in registration order.
#[derive(Default)]
pub struct FeatureTransformerChain {
    transformers: Vec<Box<dyn FeatureTransformer>>,
}

impl FeatureTransformerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, transformer: impl FeatureTransformer + 'static) -> Self {
        self.transformers.push(Box::new(transformer));
        self
    }

    pub fn push(&mut self, transformer: Box<dyn FeatureTransformer>) {
        self.transformers.push(transformer);
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.transformers.iter().map(|t| t.name()).collect()
    }

    fn active(&self) -> impl Iterator<Item = &dyn FeatureTransformer> + '_ {
        self.transformers
            .iter()
            .map(|t| t.as_ref())
            .filter(|t| t.is_active())
    }
}

impl FeatureTransformer for FeatureTransformerChain {
    fn transform_request(&self, request: &mut UnifiedRequest) -> Result<()> {
        for transformer in self.active() {
            transformer.transform_request(request)?;
        }
        Ok(())
    }

    fn transform_response(&self, response: &mut UnifiedResponse) -> Result<()> {
        for transformer in self.active() {
            transformer.transform_response(response)?;
        }
        Ok(())
    }

    fn transform_stream_chunk(&self, chunk: &mut UnifiedStreamChunk) -> Result<()> {
        for transformer in self.active() {
            transformer.transform_stream_chunk(chunk)?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "chain"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformer::unified::{ChunkType, UnifiedMessage, UnifiedUsage};
    use assert_matches::assert_matches;

    #[test]
    fn test_reasoning_keeps_thinking_by_default() {
        let t = ReasoningTransformer::new(ReasoningConfig::default());
        let mut response = UnifiedResponse::new(
            "msg_1",
            "claude-3",
            vec![
                UnifiedContent::thinking("hmm", None),
                UnifiedContent::text("42"),
            ],
            None,
            UnifiedUsage::new(1, 2),
        );
        t.transform_response(&mut response).unwrap();
        assert_eq!(response.content.len(), 2);
    }

    #[test]
    fn test_reasoning_strips_thinking() {
        let t = ReasoningTransformer::with_thinking(false);
        let mut response = UnifiedResponse::new(
            "msg_1",
            "claude-3",
            vec![
                UnifiedContent::thinking("hmm", None),
                UnifiedContent::text("42"),
            ],
            None,
            UnifiedUsage::new(1, 2),
        );
        t.transform_response(&mut response).unwrap();
        assert_eq!(response.content.len(), 1);
        assert_matches!(response.content[0], UnifiedContent::Text { .. });
    }

    #[test]
    fn test_reasoning_strips_thinking_param_from_request() {
        let t = ReasoningTransformer::with_thinking(false);
        let mut request = UnifiedRequest::new("claude-3", vec![UnifiedMessage::user("hi")]);
        request
            .parameters
            .extra
            .insert("thinking".into(), json!({"type": "enabled"}));
        t.transform_request(&mut request).unwrap();
        assert!(!request.parameters.extra.contains_key("thinking"));
    }

    #[test]
    fn test_reasoning_clamps_budget() {
        let t = ReasoningTransformer::new(ReasoningConfig {
            include_thinking: true,
            max_budget_tokens: Some(1024),
        });
        let mut request = UnifiedRequest::new("claude-3", vec![UnifiedMessage::user("hi")]);
        request.parameters.extra.insert(
            "thinking".into(),
            json!({"type": "enabled", "budget_tokens": 90000}),
        );
        t.transform_request(&mut request).unwrap();
        assert_eq!(
            request.parameters.extra["thinking"]["budget_tokens"],
            json!(1024)
        );
    }

    #[test]
    fn test_reasoning_stream_chunk_strip() {
        let t = ReasoningTransformer::with_thinking(false);
        let mut chunk =
            UnifiedStreamChunk::content_block_delta(0, UnifiedContent::thinking("x", None));
        t.transform_stream_chunk(&mut chunk).unwrap();
        assert!(chunk.delta.is_none());

        let mut chunk =
            UnifiedStreamChunk::content_block_start(0, UnifiedContent::thinking("", None));
        t.transform_stream_chunk(&mut chunk).unwrap();
        assert!(chunk.content_block.is_none());
    }

    #[test]
    fn test_token_limit_inactive_without_limit() {
        assert!(!TokenLimitTransformer::new(None).is_active());
        assert!(TokenLimitTransformer::new(Some(10)).is_active());
    }

    #[test]
    fn test_token_limit_caps() {
        let t = TokenLimitTransformer::new(Some(4096));
        let mut request = UnifiedRequest::new("gpt-4", vec![UnifiedMessage::user("hi")])
            .with_max_tokens(10000);
        t.transform_request(&mut request).unwrap();
        assert_eq!(request.parameters.max_tokens, Some(4096));
    }

    #[test]
    fn test_token_limit_under_limit_untouched() {
        let t = TokenLimitTransformer::new(Some(4096));
        let mut request =
            UnifiedRequest::new("gpt-4", vec![UnifiedMessage::user("hi")]).with_max_tokens(100);
        t.transform_request(&mut request).unwrap();
        assert_eq!(request.parameters.max_tokens, Some(100));
    }

    #[test]
    fn test_token_limit_strict_rejects() {
        let t = TokenLimitTransformer::new_strict(4096);
        let mut request = UnifiedRequest::new("gpt-4", vec![UnifiedMessage::user("hi")])
            .with_max_tokens(10000);
        let err = t.transform_request(&mut request).unwrap_err();
        assert_matches!(err, ProxyError::InvalidRequest(_));
    }

    #[test]
    fn test_chain_applies_in_order() {
        let chain = FeatureTransformerChain::new()
            .with(ReasoningTransformer::with_thinking(false))
            .with(TokenLimitTransformer::new(Some(4096)));
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.names(), vec!["reasoning", "token_limit"]);

        let mut request = UnifiedRequest::new("gpt-4", vec![UnifiedMessage::user("hi")])
            .with_max_tokens(10000);
        chain.transform_request(&mut request).unwrap();
        assert_eq!(request.parameters.max_tokens, Some(4096));

        let mut response = UnifiedResponse::new(
            "msg_1",
            "gpt-4",
            vec![
                UnifiedContent::thinking("x", None),
                UnifiedContent::text("y"),
            ],
            None,
            UnifiedUsage::new(1, 1),
        );
        chain.transform_response(&mut response).unwrap();
        assert_eq!(response.content.len(), 1);
    }

    #[test]
    fn test_chain_skips_inactive() {
        let chain = FeatureTransformerChain::new().with(TokenLimitTransformer::new(None));
        let mut request = UnifiedRequest::new("gpt-4", vec![UnifiedMessage::user("hi")])
            .with_max_tokens(1_000_000);
        chain.transform_request(&mut request).unwrap();
        assert_eq!(request.parameters.max_tokens, Some(1_000_000));
    }

    #[test]
    fn test_chunk_passthrough_without_features() {
        let chain = FeatureTransformerChain::new();
        let mut chunk = UnifiedStreamChunk::content_block_delta(
            0,
            UnifiedContent::thinking("keep me", None),
        );
        chain.transform_stream_chunk(&mut chunk).unwrap();
        assert!(chunk.delta.is_some());
        assert_eq!(chunk.chunk_type, ChunkType::ContentBlockDelta);
    }
}
