//! Anthropic Messages transformer.
//!
//! The wire format closest to the UIF: typed content blocks, top-level
//! system, and the full streaming event grammar map nearly one-to-one.

use super::{
    ChunkType, Protocol, Role, StopReason, StreamDecoder, StreamEncoder, Transformer,
    UnifiedContent, UnifiedMessage, UnifiedParameters, UnifiedRequest, UnifiedResponse,
    UnifiedStreamChunk, UnifiedTool, UnifiedToolCall, UnifiedUsage,
};
use crate::core::error::{ProxyError, Result};
use crate::transformer::stream::format_sse_event;
use crate::transformer::unified::{extract_tool_calls, ToolType};
use bytes::Bytes;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

lazy_static! {
    /// Billing routing prefix some gateways prepend to the system prompt.
    /// Stripped before the prompt ever reaches the UIF.
    static ref BILLING_HEADER_RE: Regex = Regex::new(r"^x-anthropic-billing-header:\s*").unwrap();
}

fn strip_billing_header(text: &str) -> String {
    BILLING_HEADER_RE.replace(text, "").to_string()
}

// ============================================================================
// Bedrock compatibility
// ============================================================================

/// Bedrock-routed Claude models carry a `claude-*-bedrock` name.
pub fn is_bedrock_claude_model(model: &str) -> bool {
    model.starts_with("claude-") && model.ends_with("-bedrock")
}

/// Bedrock rejects conversations that mention tool content without a tool
/// schema; this placeholder satisfies the validator.
fn placeholder_tool() -> MessagesTool {
    MessagesTool {
        name: "_placeholder_tool".to_string(),
        description: Some("Placeholder tool for Bedrock compatibility".to_string()),
        input_schema: json!({"type": "object", "properties": {}}),
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesMessage {
    pub role: String,
    pub content: MessagesContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessagesContent {
    Text(String),
    Blocks(Vec<MessagesBlock>),
}

impl MessagesContent {
    fn is_empty(&self) -> bool {
        match self {
            MessagesContent::Text(text) => text.is_empty(),
            MessagesContent::Blocks(blocks) => blocks.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagesBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    Thinking {
        thinking: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub source_type: String,
    pub media_type: String,
    pub data: String,
}

/// Top-level system: plain string or text blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessagesSystem {
    Text(String),
    Blocks(Vec<SystemBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesTool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: i32,
    pub messages: Vec<MessagesMessage>,
    pub system: Option<MessagesSystem>,
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default)]
    pub stream: bool,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<i32>,
    pub tools: Option<Vec<MessagesTool>>,
    pub tool_choice: Option<Value>,
    pub thinking: Option<Value>,
    pub metadata: Option<HashMap<String, Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagesUsage {
    #[serde(default)]
    pub input_tokens: i32,
    #[serde(default)]
    pub output_tokens: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<i32>,
}

impl MessagesUsage {
    fn to_unified(&self) -> UnifiedUsage {
        UnifiedUsage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cache_read_tokens: self.cache_read_input_tokens,
            cache_write_tokens: self.cache_creation_input_tokens,
        }
    }

    fn from_unified(usage: &UnifiedUsage) -> Self {
        MessagesUsage {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_creation_input_tokens: usage.cache_write_tokens,
            cache_read_input_tokens: usage.cache_read_tokens,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesResponse {
    pub id: String,
    pub content: Vec<MessagesBlock>,
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: MessagesUsage,
}

/// SSE event bodies, tagged by the `type` field inside `data:`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum MessagesStreamEvent {
    MessageStart {
        message: StreamMessage,
    },
    ContentBlockStart {
        index: usize,
        content_block: MessagesBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: MessagesDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: StreamMessageDelta,
        #[serde(default)]
        usage: MessagesUsage,
    },
    MessageStop {},
    Ping {},
}

#[derive(Debug, Clone, Deserialize)]
struct StreamMessage {
    id: String,
    model: String,
    #[serde(default)]
    content: Vec<MessagesBlock>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: MessagesUsage,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum MessagesDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
}

#[derive(Debug, Clone, Deserialize)]
struct StreamMessageDelta {
    stop_reason: Option<String>,
}

// ============================================================================
// Transformer
// ============================================================================

pub struct AnthropicTransformer;

impl AnthropicTransformer {
    pub fn new() -> Self {
        AnthropicTransformer
    }

    fn stop_reason_to_unified(reason: &str) -> StopReason {
        match reason {
            "end_turn" => StopReason::EndTurn,
            "max_tokens" => StopReason::MaxTokens,
            "stop_sequence" => StopReason::StopSequence,
            "tool_use" => StopReason::ToolUse,
            _ => StopReason::EndTurn,
        }
    }

    fn stop_reason_from_unified(reason: StopReason) -> &'static str {
        match reason {
            StopReason::EndTurn | StopReason::ContentFilter => "end_turn",
            StopReason::MaxTokens | StopReason::Length => "max_tokens",
            StopReason::StopSequence => "stop_sequence",
            StopReason::ToolUse => "tool_use",
        }
    }

    fn block_to_unified(block: &MessagesBlock) -> UnifiedContent {
        match block {
            MessagesBlock::Text { text } => UnifiedContent::text(text),
            MessagesBlock::Image { source } => {
                if source.source_type == "base64" {
                    UnifiedContent::image_base64(&source.media_type, &source.data)
                } else {
                    UnifiedContent::image_url(&source.data)
                }
            }
            MessagesBlock::ToolUse { id, name, input } => {
                UnifiedContent::tool_use(id, name, input.clone())
            }
            MessagesBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => UnifiedContent::tool_result(tool_use_id, content.clone(), is_error.unwrap_or(false)),
            MessagesBlock::Thinking {
                thinking,
                signature,
            } => UnifiedContent::thinking(thinking, signature.clone()),
        }
    }

    fn unified_to_block(content: &UnifiedContent) -> Option<MessagesBlock> {
        match content {
            UnifiedContent::Text { text } => Some(MessagesBlock::Text { text: text.clone() }),
            UnifiedContent::Image {
                source_type,
                media_type,
                data,
            } => Some(MessagesBlock::Image {
                source: ImageSource {
                    source_type: source_type.clone(),
                    media_type: media_type.clone(),
                    data: data.clone(),
                },
            }),
            UnifiedContent::ToolUse { id, name, input } => Some(MessagesBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            }),
            UnifiedContent::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Some(MessagesBlock::ToolResult {
                tool_use_id: tool_use_id.clone(),
                content: content.clone(),
                is_error: is_error.then_some(true),
            }),
            UnifiedContent::Thinking { text, signature } => Some(MessagesBlock::Thinking {
                thinking: text.clone(),
                signature: signature.clone(),
            }),
            _ => None,
        }
    }

    fn message_to_unified(msg: &MessagesMessage) -> UnifiedMessage {
        let role = msg.role.parse().unwrap_or(Role::User);

        let content: Vec<UnifiedContent> = match &msg.content {
            MessagesContent::Text(text) => vec![UnifiedContent::text(text)],
            MessagesContent::Blocks(blocks) => blocks.iter().map(Self::block_to_unified).collect(),
        };

        let tool_calls = extract_tool_calls(&content);
        let tool_call_id = content.iter().find_map(|c| match c {
            UnifiedContent::ToolResult { tool_use_id, .. } => Some(tool_use_id.clone()),
            _ => None,
        });

        UnifiedMessage {
            role,
            content,
            name: None,
            tool_calls,
            tool_call_id,
        }
    }

    fn unified_to_message(msg: &UnifiedMessage) -> MessagesMessage {
        // The wire only knows user/assistant; tool results travel as user
        // messages with tool_result blocks. OpenAI-shaped tool messages
        // (string content + tool_call_id, no ToolResult block) are wrapped
        // here; messages already carrying ToolResult blocks take the
        // generic path below.
        if msg.role == Role::Tool
            && !msg
                .content
                .iter()
                .any(|c| matches!(c, UnifiedContent::ToolResult { .. }))
        {
            if let Some(ref tool_call_id) = msg.tool_call_id {
                let text = msg.text_content();
                return MessagesMessage {
                    role: "user".to_string(),
                    content: MessagesContent::Blocks(vec![MessagesBlock::ToolResult {
                        tool_use_id: tool_call_id.clone(),
                        content: if text.is_empty() {
                            Value::Null
                        } else {
                            Value::String(text)
                        },
                        is_error: None,
                    }]),
                };
            }
        }
        let role = match msg.role {
            Role::Tool => "user".to_string(),
            other => other.to_string(),
        };

        let mut blocks: Vec<MessagesBlock> = msg
            .content
            .iter()
            .filter_map(Self::unified_to_block)
            .collect();

        // OpenAI keeps tool calls outside content; fold them in as
        // tool_use blocks, skipping ids already present.
        if !msg.tool_calls.is_empty() {
            let existing: HashSet<&str> = blocks
                .iter()
                .filter_map(|b| match b {
                    MessagesBlock::ToolUse { id, .. } => Some(id.as_str()),
                    _ => None,
                })
                .collect();
            let missing: Vec<&UnifiedToolCall> = msg
                .tool_calls
                .iter()
                .filter(|tc| !existing.contains(tc.id.as_str()))
                .collect();
            for tc in missing {
                blocks.push(MessagesBlock::ToolUse {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    input: tc.arguments.clone(),
                });
            }
        }

        // Collapse a lone text block back to the string form.
        let content = match blocks.as_slice() {
            [MessagesBlock::Text { text }] => MessagesContent::Text(text.clone()),
            _ => MessagesContent::Blocks(blocks),
        };

        MessagesMessage { role, content }
    }

    fn extract_system(system: &Option<MessagesSystem>) -> Option<String> {
        system.as_ref().map(|s| match s {
            MessagesSystem::Text(text) => strip_billing_header(text),
            MessagesSystem::Blocks(blocks) => blocks
                .iter()
                .map(|b| strip_billing_header(&b.text))
                .collect::<Vec<_>>()
                .join("\n"),
        })
    }

    fn sse(event_name: &str, body: &Value) -> String {
        format_sse_event(Some(event_name), &body.to_string())
    }
}

impl Default for AnthropicTransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer for AnthropicTransformer {
    fn protocol(&self) -> Protocol {
        Protocol::Anthropic
    }

    fn endpoint(&self) -> &'static str {
        "/v1/messages"
    }

    fn transform_request_out(&self, raw: Value) -> Result<UnifiedRequest> {
        let request: MessagesRequest =
            serde_json::from_value(raw).map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;

        let messages: Vec<UnifiedMessage> = request
            .messages
            .iter()
            .map(Self::message_to_unified)
            .collect();

        let system = Self::extract_system(&request.system);

        let tools: Vec<UnifiedTool> = request
            .tools
            .unwrap_or_default()
            .into_iter()
            .map(|t| UnifiedTool {
                name: t.name,
                description: t.description,
                input_schema: t.input_schema,
                tool_type: ToolType::Function,
            })
            .collect();

        let mut extra = HashMap::new();
        if let Some(thinking) = request.thinking {
            extra.insert("thinking".to_string(), thinking);
        }

        Ok(UnifiedRequest {
            model: request.model,
            messages,
            system,
            parameters: UnifiedParameters {
                temperature: request.temperature,
                max_tokens: Some(request.max_tokens),
                top_p: request.top_p,
                top_k: request.top_k,
                stop_sequences: request.stop_sequences,
                stream: request.stream,
                extra,
            },
            tools,
            tool_choice: request.tool_choice,
            request_id: uuid::Uuid::new_v4().to_string(),
            client_protocol: Protocol::Anthropic,
            metadata: request.metadata.unwrap_or_default(),
        })
    }

    fn transform_request_in(&self, unified: &UnifiedRequest) -> Result<Value> {
        let mut messages: Vec<MessagesMessage> = unified
            .messages
            .iter()
            .map(Self::unified_to_message)
            .collect();

        // All but the trailing message (assistant prefill) must be
        // non-empty; fill the rest to dodge validation errors.
        if messages.len() > 1 {
            let last = messages.len() - 1;
            for msg in &mut messages[..last] {
                if msg.role == "assistant" && msg.content.is_empty() {
                    msg.content = MessagesContent::Text("null".to_string());
                }
            }
        }

        let tools: Option<Vec<MessagesTool>> = if unified.tools.is_empty() {
            let needs_placeholder = is_bedrock_claude_model(&unified.model)
                && unified.messages.iter().any(UnifiedMessage::has_tool_content);
            needs_placeholder.then(|| vec![placeholder_tool()])
        } else {
            Some(
                unified
                    .tools
                    .iter()
                    .map(|t| MessagesTool {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        input_schema: t.input_schema.clone(),
                    })
                    .collect(),
            )
        };

        let mut request = json!({
            "model": unified.model,
            "max_tokens": unified.parameters.max_tokens.unwrap_or(4096),
            "messages": messages,
        });

        if let Some(ref system) = unified.system {
            request["system"] = json!(system);
        }
        if let Some(temperature) = unified.parameters.temperature {
            request["temperature"] = json!(temperature);
        }
        if let Some(top_p) = unified.parameters.top_p {
            request["top_p"] = json!(top_p);
        }
        if let Some(top_k) = unified.parameters.top_k {
            request["top_k"] = json!(top_k);
        }
        if let Some(ref stop) = unified.parameters.stop_sequences {
            request["stop_sequences"] = json!(stop);
        }
        if unified.parameters.stream {
            request["stream"] = json!(true);
        }
        if let Some(tools) = tools {
            request["tools"] = json!(tools);
        }
        if let Some(ref tool_choice) = unified.tool_choice {
            request["tool_choice"] = tool_choice.clone();
        }
        if let Some(thinking) = unified.parameters.extra.get("thinking") {
            request["thinking"] = thinking.clone();
        }
        if !unified.metadata.is_empty() {
            request["metadata"] = json!(unified.metadata);
        }

        Ok(request)
    }

    fn transform_response_in(&self, raw: Value, original_model: &str) -> Result<UnifiedResponse> {
        let response: MessagesResponse =
            serde_json::from_value(raw).map_err(|e| ProxyError::Decode(e.to_string()))?;

        let content: Vec<UnifiedContent> = response
            .content
            .iter()
            .map(Self::block_to_unified)
            .collect();
        let tool_calls = extract_tool_calls(&content);
        let stop_reason = response
            .stop_reason
            .as_deref()
            .map(Self::stop_reason_to_unified);

        Ok(UnifiedResponse {
            id: response.id,
            model: original_model.to_string(),
            content,
            stop_reason,
            usage: response.usage.to_unified(),
            tool_calls,
        })
    }

    fn transform_response_out(
        &self,
        unified: &UnifiedResponse,
        _client_protocol: Protocol,
    ) -> Result<Value> {
        let mut content: Vec<MessagesBlock> = unified
            .content
            .iter()
            .filter_map(Self::unified_to_block)
            .collect();

        // Re-add tool calls that only exist in the denormalized projection.
        let existing: HashSet<&str> = unified
            .content
            .iter()
            .filter_map(|c| match c {
                UnifiedContent::ToolUse { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect();
        for tc in &unified.tool_calls {
            if !existing.contains(tc.id.as_str()) {
                content.push(MessagesBlock::ToolUse {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    input: tc.arguments.clone(),
                });
            }
        }

        Ok(json!({
            "id": unified.id,
            "type": "message",
            "role": "assistant",
            "model": unified.model,
            "content": content,
            "stop_reason": unified.stop_reason.map(Self::stop_reason_from_unified),
            "stop_sequence": null,
            "usage": MessagesUsage::from_unified(&unified.usage),
        }))
    }

    fn transform_stream_chunk_in(
        &self,
        _decoder: &mut StreamDecoder,
        chunk: &Bytes,
    ) -> Result<Vec<UnifiedStreamChunk>> {
        let chunk_str = std::str::from_utf8(chunk)
            .map_err(|e| ProxyError::Decode(format!("invalid UTF-8 in frame: {}", e)))?;

        let mut chunks = vec![];

        for line in chunk_str.lines() {
            let line = line.trim();
            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            let event: MessagesStreamEvent =
                serde_json::from_str(data).map_err(|e| ProxyError::Decode(e.to_string()))?;

            match event {
                MessagesStreamEvent::MessageStart { message } => {
                    let content: Vec<UnifiedContent> =
                        message.content.iter().map(Self::block_to_unified).collect();
                    chunks.push(UnifiedStreamChunk::message_start(UnifiedResponse {
                        id: message.id,
                        model: message.model,
                        content,
                        stop_reason: message
                            .stop_reason
                            .as_deref()
                            .map(Self::stop_reason_to_unified),
                        usage: message.usage.to_unified(),
                        tool_calls: vec![],
                    }));
                }
                MessagesStreamEvent::ContentBlockStart {
                    index,
                    content_block,
                } => {
                    chunks.push(UnifiedStreamChunk::content_block_start(
                        index,
                        Self::block_to_unified(&content_block),
                    ));
                }
                MessagesStreamEvent::ContentBlockDelta { index, delta } => {
                    let content = match delta {
                        MessagesDelta::TextDelta { text } => UnifiedContent::text(text),
                        MessagesDelta::InputJsonDelta { partial_json } => {
                            UnifiedContent::tool_input_delta(index, partial_json)
                        }
                        MessagesDelta::ThinkingDelta { thinking } => {
                            UnifiedContent::thinking(thinking, None)
                        }
                        MessagesDelta::SignatureDelta { signature } => {
                            UnifiedContent::thinking("", Some(signature))
                        }
                    };
                    chunks.push(UnifiedStreamChunk::content_block_delta(index, content));
                }
                MessagesStreamEvent::ContentBlockStop { index } => {
                    chunks.push(UnifiedStreamChunk::content_block_stop(index));
                }
                MessagesStreamEvent::MessageDelta { delta, usage } => {
                    chunks.push(UnifiedStreamChunk::message_delta(
                        delta
                            .stop_reason
                            .as_deref()
                            .map(Self::stop_reason_to_unified)
                            .unwrap_or_default(),
                        usage.to_unified(),
                    ));
                }
                MessagesStreamEvent::MessageStop {} => {
                    chunks.push(UnifiedStreamChunk::message_stop());
                }
                MessagesStreamEvent::Ping {} => {
                    chunks.push(UnifiedStreamChunk::ping());
                }
            }
        }

        Ok(chunks)
    }

    fn transform_stream_chunk_out(
        &self,
        _encoder: &mut StreamEncoder,
        chunk: &UnifiedStreamChunk,
        _client_protocol: Protocol,
    ) -> Result<String> {
        let body = match chunk.chunk_type {
            ChunkType::MessageStart => {
                let Some(ref message) = chunk.message else {
                    return Ok(String::new());
                };
                let content: Vec<MessagesBlock> = message
                    .content
                    .iter()
                    .filter_map(Self::unified_to_block)
                    .collect();
                json!({
                    "type": "message_start",
                    "message": {
                        "id": message.id,
                        "type": "message",
                        "role": "assistant",
                        "model": message.model,
                        "content": content,
                        "stop_reason": null,
                        "stop_sequence": null,
                        "usage": {
                            "input_tokens": message.usage.input_tokens,
                            "output_tokens": message.usage.output_tokens,
                        },
                    }
                })
            }
            ChunkType::ContentBlockStart => {
                let Some(block) = chunk.content_block.as_ref().and_then(Self::unified_to_block)
                else {
                    return Ok(String::new());
                };
                json!({
                    "type": "content_block_start",
                    "index": chunk.index,
                    "content_block": block,
                })
            }
            ChunkType::ContentBlockDelta => {
                let Some(ref delta) = chunk.delta else {
                    return Ok(String::new());
                };
                let delta_body = match delta {
                    UnifiedContent::Text { text } => json!({"type": "text_delta", "text": text}),
                    UnifiedContent::Thinking { text, signature } => {
                        if delta.is_signature_only() {
                            json!({
                                "type": "signature_delta",
                                "signature": signature.clone().unwrap_or_default(),
                            })
                        } else {
                            json!({"type": "thinking_delta", "thinking": text})
                        }
                    }
                    UnifiedContent::ToolInputDelta { partial_json, .. } => {
                        json!({"type": "input_json_delta", "partial_json": partial_json})
                    }
                    _ => return Ok(String::new()),
                };
                json!({
                    "type": "content_block_delta",
                    "index": chunk.index,
                    "delta": delta_body,
                })
            }
            ChunkType::ContentBlockStop => {
                json!({"type": "content_block_stop", "index": chunk.index})
            }
            ChunkType::MessageDelta => {
                json!({
                    "type": "message_delta",
                    "delta": {
                        "stop_reason": chunk.stop_reason.map(Self::stop_reason_from_unified),
                        "stop_sequence": null,
                    },
                    "usage": chunk.usage.as_ref().map(|u| json!({
                        "input_tokens": u.input_tokens,
                        "output_tokens": u.output_tokens,
                    })),
                })
            }
            ChunkType::MessageStop => json!({"type": "message_stop"}),
            ChunkType::Ping => json!({"type": "ping"}),
        };

        Ok(Self::sse(&chunk.chunk_type.to_string(), &body))
    }

    fn can_handle(&self, raw: &Value) -> bool {
        raw.get("system").is_some()
            || (raw.get("max_tokens").is_some()
                && raw
                    .get("messages")
                    .and_then(Value::as_array)
                    .is_some_and(|msgs| {
                        msgs.iter().any(|msg| {
                            msg.get("content")
                                .and_then(Value::as_array)
                                .is_some_and(|blocks| {
                                    blocks.iter().any(|block| {
                                        matches!(
                                            block.get("type").and_then(Value::as_str),
                                            Some("text")
                                                | Some("image")
                                                | Some("tool_use")
                                                | Some("tool_result")
                                        )
                                    })
                                })
                        })
                    }))
    }
}

// ============================================================================
// Tests
// ============================================================================
